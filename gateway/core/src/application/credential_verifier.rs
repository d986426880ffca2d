// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Credential Verifier
//!
//! Proof-of-possession check that precedes every session.
//!
//! ```text
//! AuthenticationRequest { identity_id, timestamp, nonce, signature }
//!   1. identity_id must be registered and not `denied`
//!   2. |now - timestamp| <= freshness_window
//!   3. signature == hex(HMAC-SHA256(key(identity_id), "identity_id:timestamp:nonce"))
//!      compared in constant time; the MAC is computed inside the secret store
//!   4. (identity_id, nonce) must not have been accepted inside the window
//! ```
//!
//! Every failure surfaces as the same [`GatewayError::AuthenticationFailure`].
//! The specific [`AuthFailureReason`] goes to the server log only.
//!
//! Nonces are recorded only after the signature verifies, so unauthenticated
//! callers cannot fill the cache.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use crate::application::security_monitor::SecurityMonitor;
use crate::domain::clock::Clock;
use crate::domain::error::{AuthFailureReason, GatewayError};
use crate::domain::identity::{Identity, IdentityId, IdentityRepository};
use crate::domain::secret_store::{KeyMaterial, SecretStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationRequest {
    pub identity_id: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub nonce: String,
    /// Lowercase hex HMAC-SHA256.
    pub signature: String,
}

/// Canonical string covered by the authentication signature.
pub fn canonical_challenge(identity_id: &str, timestamp: i64, nonce: &str) -> String {
    format!("{}:{}:{}", identity_id, timestamp, nonce)
}

/// Client-side helper producing the `signature` field of an [`AuthenticationRequest`].
pub fn sign_challenge(key: &KeyMaterial, identity_id: &str, timestamp: i64, nonce: &str) -> String {
    // HMAC accepts keys of any length, so this cannot fail for a 32-byte key.
    let mut mac = match Hmac::<Sha256>::new_from_slice(key.expose()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(canonical_challenge(identity_id, timestamp, nonce).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub struct CredentialVerifier {
    identities: Arc<dyn IdentityRepository>,
    secrets: Arc<dyn SecretStore>,
    monitor: Arc<SecurityMonitor>,
    clock: Arc<dyn Clock>,
    freshness_window: Duration,
    // (identity, nonce) -> request timestamp
    seen_nonces: Mutex<HashMap<(IdentityId, String), DateTime<Utc>>>,
}

impl CredentialVerifier {
    pub fn new(
        identities: Arc<dyn IdentityRepository>,
        secrets: Arc<dyn SecretStore>,
        monitor: Arc<SecurityMonitor>,
        clock: Arc<dyn Clock>,
        freshness_window: Duration,
    ) -> Self {
        Self {
            identities,
            secrets,
            monitor,
            clock,
            freshness_window,
            seen_nonces: Mutex::new(HashMap::new()),
        }
    }

    pub async fn verify(&self, request: &AuthenticationRequest) -> Result<Identity, GatewayError> {
        match self.check(request).await {
            Ok(identity) => {
                info!(identity_id = %identity.id, tier = %identity.tier, "Credential verified");
                Ok(identity)
            }
            Err(reason) => {
                self.monitor.authentication_failed(&request.identity_id, reason);
                Err(GatewayError::AuthenticationFailure)
            }
        }
    }

    async fn check(&self, request: &AuthenticationRequest) -> Result<Identity, AuthFailureReason> {
        let identity_id = IdentityId::new(request.identity_id.clone());

        let identity = self
            .identities
            .find(&identity_id)
            .await
            .ok()
            .flatten()
            .ok_or(AuthFailureReason::UnknownIdentity)?;
        if identity.is_denied() {
            return Err(AuthFailureReason::DeniedIdentity);
        }

        let now = self.clock.now();
        let window = self.freshness_window.num_seconds().max(0) as u64;
        if now.timestamp().abs_diff(request.timestamp) > window {
            return Err(AuthFailureReason::StaleTimestamp);
        }

        let provided = hex::decode(request.signature.trim()).map_err(|_| AuthFailureReason::MalformedSignature)?;

        let handle = self
            .secrets
            .find_key(&identity_id)
            .await
            .ok()
            .flatten()
            .ok_or(AuthFailureReason::KeyUnavailable)?;
        let challenge = canonical_challenge(identity_id.as_str(), request.timestamp, &request.nonce);
        let expected = self
            .secrets
            .compute_mac(&handle, challenge.as_bytes())
            .await
            .map_err(|_| AuthFailureReason::KeyUnavailable)?;

        if !bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
            return Err(AuthFailureReason::SignatureMismatch);
        }

        self.record_nonce(identity_id, &request.nonce, request.timestamp, now)?;
        Ok(identity)
    }

    fn record_nonce(
        &self,
        identity_id: IdentityId,
        nonce: &str,
        timestamp: i64,
        now: DateTime<Utc>,
    ) -> Result<(), AuthFailureReason> {
        let stamped = DateTime::<Utc>::from_timestamp(timestamp, 0).unwrap_or(now);
        let horizon = now - self.freshness_window;

        let mut seen = self.seen_nonces.lock();
        let before = seen.len();
        seen.retain(|_, at| *at >= horizon);
        if seen.len() != before {
            debug!(pruned = before - seen.len(), "Pruned stale nonces");
        }

        let key = (identity_id, nonce.to_string());
        if seen.contains_key(&key) {
            return Err(AuthFailureReason::ReplayedNonce);
        }
        seen.insert(key, stamped);
        Ok(())
    }

    #[cfg(test)]
    fn cached_nonces(&self) -> usize {
        self.seen_nonces.lock().len()
    }
}
