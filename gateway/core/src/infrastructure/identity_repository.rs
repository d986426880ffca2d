// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::identity::{Identity, IdentityId, IdentityRepository};

pub struct InMemoryIdentityRepository {
    // Maps IdentityId -> Identity
    identities: Arc<RwLock<HashMap<IdentityId, Identity>>>,
}

impl InMemoryIdentityRepository {
    pub fn new() -> Self {
        Self {
            identities: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_identities(identities: impl IntoIterator<Item = Identity>) -> Self {
        let map = identities.into_iter().map(|i| (i.id.clone(), i)).collect();
        Self {
            identities: Arc::new(RwLock::new(map)),
        }
    }
}

impl Default for InMemoryIdentityRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityRepository for InMemoryIdentityRepository {
    async fn find(&self, id: &IdentityId) -> Result<Option<Identity>> {
        let guard = self.identities.read().await;
        Ok(guard.get(id).cloned())
    }

    async fn save(&self, identity: Identity) -> Result<()> {
        let mut guard = self.identities.write().await;
        guard.insert(identity.id.clone(), identity);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Identity>> {
        let guard = self.identities.read().await;
        let mut all: Vec<_> = guard.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::IdentityTier;

    #[tokio::test]
    async fn test_save_find_list() {
        let repo = InMemoryIdentityRepository::new();
        repo.save(Identity::new("worker-b", IdentityTier::WorkerAgent)).await.unwrap();
        repo.save(Identity::new("controller-a", IdentityTier::PrivilegedController)).await.unwrap();

        let found = repo.find(&IdentityId::new("worker-b")).await.unwrap().unwrap();
        assert_eq!(found.tier, IdentityTier::WorkerAgent);
        assert!(repo.find(&IdentityId::new("nobody")).await.unwrap().is_none());

        let ids: Vec<_> = repo.list_all().await.unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![IdentityId::new("controller-a"), IdentityId::new("worker-b")]);
    }
}
