// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Secret Store Interface
//!
//! Owns every per-identity symmetric key. Callers hold a [`KeyHandle`], never
//! the key itself. The store exposes exactly two uses of key material:
//!
//! - [`SecretStore::compute_mac`]: HMAC-SHA256 computed inside the store.
//! - [`SecretStore::cipher`]: an AES-256-GCM instance keyed inside the store,
//!   handed to the encryption routine. The cipher does not expose its key.
//!
//! Keys arrive either lazily ([`SecretStore::get_or_create_key`]) or through
//! explicit out-of-band provisioning ([`SecretStore::provision_key`]), and can
//! be rotated. Rotation adds a new version; older versions remain usable for
//! opening data sealed before the rotation.

use async_trait::async_trait;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::domain::identity::IdentityId;
use crate::infrastructure::cipher::MessageCipher;

pub const KEY_LEN: usize = 32;

/// Reference to one version of an identity's key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyHandle {
    pub owner: IdentityId,
    pub version: u32,
}

/// Raw 256-bit key material. Zeroed on drop; `Debug` is redacted.
#[derive(Clone)]
pub struct KeyMaterial(Zeroizing<[u8; KEY_LEN]>);

impl KeyMaterial {
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut bytes[..]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn from_hex(encoded: &str) -> Result<Self, SecretStoreError> {
        let decoded = Zeroizing::new(
            hex::decode(encoded.trim()).map_err(|e| SecretStoreError::InvalidMaterial(e.to_string()))?,
        );
        let bytes: [u8; KEY_LEN] = decoded.as_slice().try_into().map_err(|_| {
            SecretStoreError::InvalidMaterial(format!("expected {} bytes, got {}", KEY_LEN, decoded.len()))
        })?;
        Ok(Self::from_bytes(bytes))
    }

    /// Hex export for the out-of-band provisioning step only.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0[..])
    }

    pub(crate) fn expose(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretStoreError {
    #[error("no key provisioned for '{0}'")]
    KeyNotFound(IdentityId),

    #[error("key version {version} not found for '{owner}'")]
    VersionNotFound { owner: IdentityId, version: u32 },

    #[error("invalid key material: {0}")]
    InvalidMaterial(String),

    #[error("secret store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Current key for `owner`, creating one if none exists.
    async fn get_or_create_key(&self, owner: &IdentityId) -> Result<KeyHandle, SecretStoreError>;

    /// Current key for `owner`, without creating one.
    async fn find_key(&self, owner: &IdentityId) -> Result<Option<KeyHandle>, SecretStoreError>;

    /// Install externally supplied material as the newest version.
    async fn provision_key(&self, owner: &IdentityId, material: KeyMaterial) -> Result<KeyHandle, SecretStoreError>;

    /// Generate a new version for `owner`.
    async fn rotate_key(&self, owner: &IdentityId) -> Result<KeyHandle, SecretStoreError>;

    async fn compute_mac(&self, handle: &KeyHandle, data: &[u8]) -> Result<Vec<u8>, SecretStoreError>;

    async fn cipher(&self, handle: &KeyHandle) -> Result<MessageCipher, SecretStoreError>;
}
