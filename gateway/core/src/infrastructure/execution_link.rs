// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Execution Link Authentication
//!
//! A standalone execution service only takes requests from the gateway. Both
//! processes share one 256-bit link key (`spec.execution.service_key`) and
//! every `/internal/*` request carries:
//!
//! ```text
//! x-warden-link-timestamp: <unix seconds>
//! x-warden-link-nonce:     <random hex>
//! x-warden-link-signature: hex(HMAC-SHA256(link_key, "path:timestamp:nonce:" || body))
//! ```
//!
//! The service recomputes the MAC inside its secret store and compares in
//! constant time. It rejects timestamps outside the freshness window and
//! nonces already accepted inside that window. Nonces are recorded only after
//! the MAC verifies.

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;
use uuid::Uuid;

use crate::domain::clock::Clock;
use crate::domain::execution::LINK_AUTHORITY;
use crate::domain::identity::IdentityId;
use crate::domain::secret_store::{KeyHandle, KeyMaterial, SecretStore, SecretStoreError};
use crate::infrastructure::secret_store::InMemorySecretStore;

pub const TIMESTAMP_HEADER: &str = "x-warden-link-timestamp";
pub const NONCE_HEADER: &str = "x-warden-link-nonce";
pub const SIGNATURE_HEADER: &str = "x-warden-link-signature";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSignature {
    pub timestamp: i64,
    pub nonce: String,
    /// Lowercase hex HMAC-SHA256.
    pub signature: String,
}

impl LinkSignature {
    /// `None` when any of the three headers is missing or unparsable.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
        Some(Self {
            timestamp: text(TIMESTAMP_HEADER)?.parse().ok()?,
            nonce: text(NONCE_HEADER)?,
            signature: text(SIGNATURE_HEADER)?,
        })
    }

    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            (TIMESTAMP_HEADER, self.timestamp.to_string()),
            (NONCE_HEADER, self.nonce.clone()),
            (SIGNATURE_HEADER, self.signature.clone()),
        ]
    }
}

/// Why a request was refused. Logged on the service side only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRejection {
    Missing,
    StaleTimestamp,
    MalformedSignature,
    SignatureMismatch,
    ReplayedNonce,
    KeyUnavailable,
}

impl fmt::Display for LinkRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Missing => "missing link headers",
            Self::StaleTimestamp => "timestamp outside freshness window",
            Self::MalformedSignature => "malformed signature",
            Self::SignatureMismatch => "signature mismatch",
            Self::ReplayedNonce => "replayed nonce",
            Self::KeyUnavailable => "link key unavailable",
        };
        f.write_str(text)
    }
}

pub struct ExecutionLink {
    secrets: Arc<dyn SecretStore>,
    handle: KeyHandle,
    clock: Arc<dyn Clock>,
    freshness_window: Duration,
    seen_nonces: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl ExecutionLink {
    /// Link keyed by the current [`LINK_AUTHORITY`] key in `secrets`.
    pub async fn new(
        secrets: Arc<dyn SecretStore>,
        clock: Arc<dyn Clock>,
        freshness_window: Duration,
    ) -> Result<Self, SecretStoreError> {
        let owner = IdentityId::new(LINK_AUTHORITY);
        let handle = secrets
            .find_key(&owner)
            .await?
            .ok_or(SecretStoreError::KeyNotFound(owner))?;
        Ok(Self {
            secrets,
            handle,
            clock,
            freshness_window,
            seen_nonces: Mutex::new(HashMap::new()),
        })
    }

    /// Link over a private store that holds only `material`.
    pub async fn from_material(
        material: KeyMaterial,
        clock: Arc<dyn Clock>,
        freshness_window: Duration,
    ) -> Result<Self, SecretStoreError> {
        let secrets: Arc<dyn SecretStore> = Arc::new(InMemorySecretStore::new());
        secrets.provision_key(&IdentityId::new(LINK_AUTHORITY), material).await?;
        Self::new(secrets, clock, freshness_window).await
    }

    fn canonical(path: &str, timestamp: i64, nonce: &str, body: &[u8]) -> Vec<u8> {
        let mut data = format!("{}:{}:{}:", path, timestamp, nonce).into_bytes();
        data.extend_from_slice(body);
        data
    }

    pub async fn sign(&self, path: &str, body: &[u8]) -> Result<LinkSignature, SecretStoreError> {
        let timestamp = self.clock.now().timestamp();
        let nonce = Uuid::new_v4().simple().to_string();
        let mac = self
            .secrets
            .compute_mac(&self.handle, &Self::canonical(path, timestamp, &nonce, body))
            .await?;
        Ok(LinkSignature {
            timestamp,
            nonce,
            signature: hex::encode(mac),
        })
    }

    pub async fn verify(&self, path: &str, provided: Option<&LinkSignature>, body: &[u8]) -> Result<(), LinkRejection> {
        let result = self.check(path, provided, body).await;
        if let Err(reason) = &result {
            warn!(path = %path, reason = %reason, "Execution link request refused");
        }
        result
    }

    async fn check(&self, path: &str, provided: Option<&LinkSignature>, body: &[u8]) -> Result<(), LinkRejection> {
        let provided = provided.ok_or(LinkRejection::Missing)?;

        let now = self.clock.now();
        let window = self.freshness_window.num_seconds().max(0) as u64;
        if now.timestamp().abs_diff(provided.timestamp) > window {
            return Err(LinkRejection::StaleTimestamp);
        }

        let signature = hex::decode(provided.signature.trim()).map_err(|_| LinkRejection::MalformedSignature)?;
        let expected = self
            .secrets
            .compute_mac(
                &self.handle,
                &Self::canonical(path, provided.timestamp, &provided.nonce, body),
            )
            .await
            .map_err(|_| LinkRejection::KeyUnavailable)?;
        if !bool::from(expected.as_slice().ct_eq(signature.as_slice())) {
            return Err(LinkRejection::SignatureMismatch);
        }

        let horizon = now - self.freshness_window;
        let mut seen = self.seen_nonces.lock();
        seen.retain(|_, at| *at >= horizon);
        if seen.contains_key(&provided.nonce) {
            return Err(LinkRejection::ReplayedNonce);
        }
        let stamped = DateTime::<Utc>::from_timestamp(provided.timestamp, 0).unwrap_or(now);
        seen.insert(provided.nonce.clone(), stamped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;

    async fn link(clock: Arc<ManualClock>, byte: u8) -> ExecutionLink {
        ExecutionLink::from_material(KeyMaterial::from_bytes([byte; 32]), clock, Duration::seconds(60))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_signed_request_verifies_once() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let gateway_side = link(clock.clone(), 9).await;
        let service_side = link(clock, 9).await;

        let signed = gateway_side.sign("/internal/dispatch", b"{}").await.unwrap();
        assert_eq!(service_side.verify("/internal/dispatch", Some(&signed), b"{}").await, Ok(()));
        assert_eq!(
            service_side.verify("/internal/dispatch", Some(&signed), b"{}").await,
            Err(LinkRejection::ReplayedNonce)
        );
    }

    #[tokio::test]
    async fn test_body_path_and_key_are_bound() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let gateway_side = link(clock.clone(), 9).await;
        let service_side = link(clock.clone(), 9).await;
        let stranger = link(clock, 4).await;

        let signed = gateway_side.sign("/internal/channels", br#"{"identity_id":"worker-b"}"#).await.unwrap();
        assert_eq!(
            service_side
                .verify("/internal/channels", Some(&signed), br#"{"identity_id":"controller-a"}"#)
                .await,
            Err(LinkRejection::SignatureMismatch)
        );
        assert_eq!(
            service_side
                .verify("/internal/dispatch", Some(&signed), br#"{"identity_id":"worker-b"}"#)
                .await,
            Err(LinkRejection::SignatureMismatch)
        );

        let forged = stranger.sign("/internal/channels", b"{}").await.unwrap();
        assert_eq!(
            service_side.verify("/internal/channels", Some(&forged), b"{}").await,
            Err(LinkRejection::SignatureMismatch)
        );
    }

    #[tokio::test]
    async fn test_missing_stale_and_malformed() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let gateway_side = link(clock.clone(), 9).await;
        let service_side = link(clock.clone(), 9).await;

        assert_eq!(
            service_side.verify("/internal/channels", None, b"{}").await,
            Err(LinkRejection::Missing)
        );

        let mut signed = gateway_side.sign("/internal/channels", b"{}").await.unwrap();
        clock.advance(Duration::seconds(61));
        assert_eq!(
            service_side.verify("/internal/channels", Some(&signed), b"{}").await,
            Err(LinkRejection::StaleTimestamp)
        );

        signed.timestamp = clock.now().timestamp();
        signed.signature = "not-hex".to_string();
        assert_eq!(
            service_side.verify("/internal/channels", Some(&signed), b"{}").await,
            Err(LinkRejection::MalformedSignature)
        );
    }

    #[test]
    fn test_header_roundtrip() {
        let signed = LinkSignature {
            timestamp: 1_700_000_000,
            nonce: "abc".to_string(),
            signature: "00ff".to_string(),
        };
        let mut headers = HeaderMap::new();
        for (name, value) in signed.headers() {
            headers.insert(name, value.parse().unwrap());
        }
        assert_eq!(LinkSignature::from_headers(&headers), Some(signed));

        headers.remove(NONCE_HEADER);
        assert_eq!(LinkSignature::from_headers(&headers), None);
    }
}
