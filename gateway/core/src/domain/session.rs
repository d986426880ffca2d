// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Session Aggregate
//!
//! A [`Session`] binds an opaque bearer token to one verified identity for a
//! bounded window. Sessions are minted by the
//! [`crate::application::session_manager::SessionManager`] after the
//! [`crate::application::credential_verifier::CredentialVerifier`] accepts a
//! proof-of-possession signature.
//!
//! ## Session Lifecycle
//!
//! ```text
//! unauthenticated
//!   └─ authenticate()  ──▶ Active
//!         ├─ heartbeat()                    ──▶ Active (last_activity bumped)
//!         ├─ heartbeat() past rotation age  ──▶ Rotated { successor } ─▶ (grace) ─▶ gone
//!         ├─ validate() / sweep past expiry ──▶ Expired   (terminal)
//!         └─ revoke(reason)                 ──▶ Revoked   (terminal)
//! ```
//!
//! ## Invariants
//!
//! - `expires_at - issued_at == ttl` for every session, including rotated successors.
//! - A session is valid iff `status == Active` and `now <= expires_at`.
//! - `mac` covers `token`, `identity_id` and `issued_at`; a record whose MAC no
//!   longer verifies is treated as forged.
//! - Tokens carry 256 bits of OS randomness and are never reissued.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::domain::identity::IdentityId;

const TOKEN_BYTES: usize = 32;

/// Reserved secret-store owner whose key MACs session records.
pub const SESSION_AUTHORITY: &str = "warden.session-authority";

/// Opaque bearer credential. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Draw a fresh 256-bit token from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix safe to put in logs.
    pub fn fingerprint(&self) -> String {
        self.0.chars().take(8).collect()
    }

    /// SHA-256 of the token. Identifies a token after its record is gone.
    pub fn digest(&self) -> [u8; 32] {
        Sha256::digest(self.0.as_bytes()).into()
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({}…)", self.fingerprint())
    }
}

/// Credential handed out by the isolated execution service for one identity's channel.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownstreamToken(String);

impl DownstreamToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DownstreamToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DownstreamToken(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    /// Retired by rotation. Resolves to `successor` until the grace window closes.
    Rotated {
        successor: SessionToken,
        rotated_at: DateTime<Utc>,
    },
    Expired,
    Revoked { reason: String },
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Revoked { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub token: SessionToken,
    pub identity_id: IdentityId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub downstream_token: Option<DownstreamToken>,
    pub mac: Vec<u8>,
    pub status: SessionStatus,
}

impl Session {
    /// Build an active session. `mac` is computed by the caller over
    /// [`Session::mac_input`] with the session-authority key.
    pub fn new(
        token: SessionToken,
        identity_id: IdentityId,
        issued_at: DateTime<Utc>,
        ttl: Duration,
        mac: Vec<u8>,
    ) -> Self {
        debug_assert!(ttl > Duration::zero(), "session ttl must be positive");
        Self {
            token,
            identity_id,
            issued_at,
            expires_at: issued_at + ttl,
            last_activity: issued_at,
            downstream_token: None,
            mac,
            status: SessionStatus::Active,
        }
    }

    /// Canonical bytes bound by the session MAC.
    pub fn mac_input(token: &SessionToken, identity_id: &IdentityId, issued_at: DateTime<Utc>) -> Vec<u8> {
        format!(
            "{}:{}:{}",
            token.as_str(),
            identity_id,
            issued_at.timestamp_nanos_opt().unwrap_or_else(|| issued_at.timestamp())
        )
        .into_bytes()
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Valid iff active and `now <= expires_at`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && !self.is_past_expiry(now)
    }

    pub fn ttl(&self) -> Duration {
        self.expires_at - self.issued_at
    }

    pub fn expires_in(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }

    pub fn due_for_rotation(&self, now: DateTime<Utc>, rotation_interval: Duration) -> bool {
        now - self.issued_at >= rotation_interval
    }

    pub fn expire(&mut self) {
        if self.is_active() {
            self.status = SessionStatus::Expired;
        }
    }

    pub fn revoke(&mut self, reason: String) {
        if !self.status.is_terminal() {
            self.status = SessionStatus::Revoked { reason };
        }
    }

    pub fn retire(&mut self, successor: SessionToken, at: DateTime<Utc>) {
        self.status = SessionStatus::Rotated {
            successor,
            rotated_at: at,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_at(now: DateTime<Utc>, ttl_secs: i64) -> Session {
        Session::new(
            SessionToken::generate(),
            IdentityId::new("controller-a"),
            now,
            Duration::seconds(ttl_secs),
            vec![0u8; 32],
        )
    }

    #[test]
    fn test_token_has_256_bits() {
        let token = SessionToken::generate();
        let raw = URL_SAFE_NO_PAD.decode(token.as_str()).unwrap();
        assert_eq!(raw.len(), 32);
        assert_ne!(token, SessionToken::generate());
    }

    #[test]
    fn test_debug_hides_token() {
        let token = SessionToken::generate();
        let rendered = format!("{:?}", token);
        assert!(!rendered.contains(token.as_str()));
    }

    #[test]
    fn test_validity_boundary_is_inclusive() {
        let now = Utc::now();
        let session = session_at(now, 3600);
        assert_eq!(session.ttl(), Duration::seconds(3600));
        assert!(session.is_valid_at(session.expires_at));
        assert!(!session.is_valid_at(session.expires_at + Duration::milliseconds(1)));
    }

    #[test]
    fn test_terminal_states_stick() {
        let mut session = session_at(Utc::now(), 60);
        session.revoke("admin".into());
        session.expire();
        assert_eq!(session.status, SessionStatus::Revoked { reason: "admin".into() });
        session.revoke("again".into());
        assert_eq!(session.status, SessionStatus::Revoked { reason: "admin".into() });
    }

    #[test]
    fn test_rotation_due_after_interval() {
        let now = Utc::now();
        let session = session_at(now, 3600);
        assert!(!session.due_for_rotation(now + Duration::minutes(14), Duration::minutes(15)));
        assert!(session.due_for_rotation(now + Duration::minutes(15), Duration::minutes(15)));
    }
}
