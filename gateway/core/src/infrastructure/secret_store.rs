// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, info};

use crate::domain::identity::IdentityId;
use crate::domain::secret_store::{KeyHandle, KeyMaterial, SecretStore, SecretStoreError};
use crate::infrastructure::cipher::MessageCipher;

type HmacSha256 = Hmac<Sha256>;

/// Process-local key store. Each identity owns an append-only list of key
/// versions; version `n` lives at index `n - 1`.
#[derive(Default)]
pub struct InMemorySecretStore {
    keys: DashMap<IdentityId, Vec<KeyMaterial>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn material(&self, handle: &KeyHandle) -> Result<KeyMaterial, SecretStoreError> {
        let versions = self
            .keys
            .get(&handle.owner)
            .ok_or_else(|| SecretStoreError::KeyNotFound(handle.owner.clone()))?;
        let index = (handle.version as usize).checked_sub(1);
        index
            .and_then(|i| versions.get(i))
            .cloned()
            .ok_or_else(|| SecretStoreError::VersionNotFound {
                owner: handle.owner.clone(),
                version: handle.version,
            })
    }

    fn push(&self, owner: &IdentityId, material: KeyMaterial) -> KeyHandle {
        let mut versions = self.keys.entry(owner.clone()).or_default();
        versions.push(material);
        KeyHandle {
            owner: owner.clone(),
            version: versions.len() as u32,
        }
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get_or_create_key(&self, owner: &IdentityId) -> Result<KeyHandle, SecretStoreError> {
        let mut versions = self.keys.entry(owner.clone()).or_default();
        if versions.is_empty() {
            versions.push(KeyMaterial::generate());
            info!(identity_id = %owner, "Provisioned key lazily");
        }
        Ok(KeyHandle {
            owner: owner.clone(),
            version: versions.len() as u32,
        })
    }

    async fn find_key(&self, owner: &IdentityId) -> Result<Option<KeyHandle>, SecretStoreError> {
        Ok(self
            .keys
            .get(owner)
            .filter(|versions| !versions.is_empty())
            .map(|versions| KeyHandle {
                owner: owner.clone(),
                version: versions.len() as u32,
            }))
    }

    async fn provision_key(&self, owner: &IdentityId, material: KeyMaterial) -> Result<KeyHandle, SecretStoreError> {
        let handle = self.push(owner, material);
        info!(identity_id = %owner, version = handle.version, "Provisioned key out of band");
        Ok(handle)
    }

    async fn rotate_key(&self, owner: &IdentityId) -> Result<KeyHandle, SecretStoreError> {
        if !self.keys.contains_key(owner) {
            return Err(SecretStoreError::KeyNotFound(owner.clone()));
        }
        let handle = self.push(owner, KeyMaterial::generate());
        info!(identity_id = %owner, version = handle.version, "Rotated key");
        Ok(handle)
    }

    async fn compute_mac(&self, handle: &KeyHandle, data: &[u8]) -> Result<Vec<u8>, SecretStoreError> {
        let material = self.material(handle)?;
        let mut mac = HmacSha256::new_from_slice(material.expose())
            .map_err(|e| SecretStoreError::InvalidMaterial(e.to_string()))?;
        mac.update(data);
        debug!(identity_id = %handle.owner, version = handle.version, "Computed MAC");
        Ok(mac.finalize().into_bytes().to_vec())
    }

    async fn cipher(&self, handle: &KeyHandle) -> Result<MessageCipher, SecretStoreError> {
        let material = self.material(handle)?;
        Ok(MessageCipher::new(&material))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_is_stable() {
        let store = InMemorySecretStore::new();
        let owner = IdentityId::new("worker-c");
        assert!(store.find_key(&owner).await.unwrap().is_none());

        let first = store.get_or_create_key(&owner).await.unwrap();
        let second = store.get_or_create_key(&owner).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.version, 1);
        assert_eq!(store.find_key(&owner).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_mac_matches_provisioned_material() {
        let store = InMemorySecretStore::new();
        let owner = IdentityId::new("controller-a");
        let material = KeyMaterial::from_bytes([7u8; 32]);
        let handle = store.provision_key(&owner, material.clone()).await.unwrap();

        let mut expected = HmacSha256::new_from_slice(material.expose()).unwrap();
        expected.update(b"payload");
        let expected = expected.finalize().into_bytes().to_vec();

        assert_eq!(store.compute_mac(&handle, b"payload").await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_rotation_keeps_old_versions_openable() {
        let store = InMemorySecretStore::new();
        let owner = IdentityId::new("worker-b");
        let v1 = store.get_or_create_key(&owner).await.unwrap();
        let sealed = store.cipher(&v1).await.unwrap().seal(b"before rotation", b"").unwrap();

        let v2 = store.rotate_key(&owner).await.unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(store.find_key(&owner).await.unwrap(), Some(v2.clone()));

        let opened = store.cipher(&v1).await.unwrap().open(&sealed, b"").unwrap();
        assert_eq!(opened, b"before rotation");
        assert!(store.cipher(&v2).await.unwrap().open(&sealed, b"").is_err());
    }

    #[tokio::test]
    async fn test_unknown_handles_fail() {
        let store = InMemorySecretStore::new();
        let owner = IdentityId::new("ghost");
        assert!(matches!(store.rotate_key(&owner).await, Err(SecretStoreError::KeyNotFound(_))));

        store.get_or_create_key(&owner).await.unwrap();
        let bogus = KeyHandle { owner: owner.clone(), version: 9 };
        assert!(matches!(
            store.compute_mac(&bogus, b"x").await,
            Err(SecretStoreError::VersionNotFound { .. })
        ));
        let zero = KeyHandle { owner, version: 0 };
        assert!(store.cipher(&zero).await.is_err());
    }
}
