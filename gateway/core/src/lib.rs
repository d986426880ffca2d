// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `warden-core`: Access Control Core
//!
//! Authenticates identities, manages their sessions and gates every command
//! bound for the isolated execution service behind a permission-tier model.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `Identity`, `Session`, `Command`, `SecurityState`, config manifest, errors |
//! | [`application`] | Application | `CredentialVerifier`, `SessionManager`, `ExecutionGateway` |
//! | [`infrastructure`] | Infrastructure | secret store, AES-GCM cipher, audit log, event bus, execution service |
//! | [`presentation`] | Presentation | Axum HTTP routes for the gateway |

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
