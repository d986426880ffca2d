// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod audit;
pub mod cipher;
pub mod event_bus;
pub mod execution_client;
pub mod execution_link;
pub mod execution_service;
pub mod identity_repository;
pub mod secret_store;
