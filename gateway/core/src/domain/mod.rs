// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Pure types and invariants for the access-control core. No I/O lives here;
//! infrastructure seams are expressed as traits ([`secret_store::SecretStore`],
//! [`identity::IdentityRepository`], [`execution::ExecutionBackend`]).

pub mod audit;
pub mod clock;
pub mod command;
pub mod error;
pub mod events;
pub mod execution;
pub mod gateway_config;
pub mod identity;
pub mod secret_store;
pub mod security_state;
pub mod session;
