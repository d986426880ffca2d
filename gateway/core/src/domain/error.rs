// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Gateway error taxonomy.
//!
//! The `Display` text of each variant is what callers see. Authentication and
//! authorization failures are deliberately uniform; the detail that explains a
//! rejection goes to the server-side log and the audit trail only.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("authentication failed")]
    AuthenticationFailure,

    #[error("not authorized to perform this operation")]
    AuthorizationFailure,

    #[error("session expired; re-authenticate")]
    SessionExpired,

    #[error("session revoked; re-authenticate")]
    SessionRevoked,

    #[error("execution service unavailable; retry after {retry_after:?}")]
    UpstreamUnavailable { retry_after: Duration },

    #[error("execution is halted by emergency stop")]
    ExecutionHalted,

    #[error("operation '{0}' requires explicit confirmation")]
    ConfirmationRequired(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("execution service rejected the command: {0}")]
    Rejected(String),
}

impl GatewayError {
    /// Errors the caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. })
    }
}

/// Internal reason behind an [`GatewayError::AuthenticationFailure`]. Logged, never returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailureReason {
    UnknownIdentity,
    DeniedIdentity,
    StaleTimestamp,
    ReplayedNonce,
    MalformedSignature,
    SignatureMismatch,
    KeyUnavailable,
    UnknownToken,
    ForgedSession,
}

impl std::fmt::Display for AuthFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UnknownIdentity => "unknown identity",
            Self::DeniedIdentity => "identity tier is denied",
            Self::StaleTimestamp => "timestamp outside freshness window",
            Self::ReplayedNonce => "nonce already used",
            Self::MalformedSignature => "signature is not valid hex",
            Self::SignatureMismatch => "signature mismatch",
            Self::KeyUnavailable => "identity key unavailable",
            Self::UnknownToken => "unknown session token",
            Self::ForgedSession => "session MAC mismatch",
        };
        f.write_str(s)
    }
}
