// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Execution Backend Seam
//!
//! The isolated execution service sits behind a process boundary. The gateway
//! only talks to it through [`ExecutionBackend`], which has an in-process
//! implementation ([`crate::infrastructure::execution_service::IsolatedExecutionService`])
//! and an HTTP client ([`crate::infrastructure::execution_client::HttpExecutionBackend`]).
//!
//! The gateway wraps every backend call in a hard timeout and never holds a
//! lock across it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::command::Command;
use crate::domain::identity::IdentityId;
use crate::domain::session::DownstreamToken;

/// Secret-store owner of the key shared by the gateway and a standalone
/// execution service. Reserved; no identity may use it.
pub const LINK_AUTHORITY: &str = "warden.execution-link";

/// Failures reported by the execution service. Serialized as the error body of
/// the `/internal/*` routes so the HTTP client can reconstruct them.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum UpstreamError {
    #[error("execution service unreachable: {0}")]
    Unreachable(String),

    #[error("identity '{0}' is not registered with the execution service")]
    UnauthorizedIdentity(IdentityId),

    #[error("downstream token is not recognised")]
    InvalidChannel,

    #[error("no handler for operation '{0}'")]
    NoHandler(String),

    #[error("handler failed: {0}")]
    HandlerFailed(String),

    #[error("request not authenticated as coming from the gateway")]
    LinkRejected,

    #[error("malformed request: {0}")]
    MalformedRequest(String),
}

impl UpstreamError {
    /// Transport-level failures are retryable; everything else is a definitive answer.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenChannelRequest {
    pub identity_id: IdentityId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenChannelResponse {
    pub downstream_token: DownstreamToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub downstream_token: DownstreamToken,
    pub command: Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub result: Value,
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Obtain a channel credential for `identity_id`.
    async fn open_channel(&self, identity_id: &IdentityId) -> Result<DownstreamToken, UpstreamError>;

    async fn dispatch(&self, token: &DownstreamToken, command: &Command) -> Result<Value, UpstreamError>;

    /// True when the backend lives in another process.
    fn is_remote(&self) -> bool;
}
