// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod context;
pub mod credential_verifier;
pub mod execution_gateway;
pub mod security_monitor;
pub mod session_manager;

pub use context::GatewayContext;
pub use credential_verifier::{sign_challenge, AuthenticationRequest, CredentialVerifier};
pub use execution_gateway::{ExecutionGateway, GatewayStatus};
pub use security_monitor::SecurityMonitor;
pub use session_manager::{SessionManager, SessionSettings};
