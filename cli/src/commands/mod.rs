// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Warden CLI

pub mod config;
pub mod daemon;
pub mod execution_service;
pub mod keys;

pub use self::config::ConfigCommand;
pub use self::daemon::DaemonCommand;
pub use self::keys::KeysCommand;
