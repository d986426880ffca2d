// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Identity Aggregate
//!
//! An [`Identity`] is a registered principal that may authenticate against the
//! gateway and exchange messages on the mesh.
//!
//! ## Tiers
//!
//! | Tier | May invoke |
//! |------|-----------|
//! | `privileged-controller` | every operation, including CRITICAL ones |
//! | `worker-agent` | READ / EXECUTE operations granted by its capability strings |
//! | `denied` | nothing; cannot authenticate |
//!
//! Capability strings never lift an identity above its tier. See
//! [`crate::domain::command::PermissionTier`] for how operations map to tiers.
//!
//! ## Key Ownership
//!
//! The symmetric key belonging to an identity lives exclusively inside the
//! [`crate::domain::secret_store::SecretStore`]. An `Identity` carries no key
//! material, only the fact that one is owned under its id.

use async_trait::async_trait;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Capability string granting every READ and EXECUTE operation.
pub const WILDCARD_CAPABILITY: &str = "*";
pub const READ_CAPABILITY: &str = "read";
pub const EXECUTE_CAPABILITY: &str = "execute";

/// Stable, unique identity name (e.g. `"controller-a"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(String);

impl IdentityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityTier {
    PrivilegedController,
    WorkerAgent,
    Denied,
}

impl fmt::Display for IdentityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PrivilegedController => "privileged-controller",
            Self::WorkerAgent => "worker-agent",
            Self::Denied => "denied",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub tier: IdentityTier,
    /// Identity "type" consulted by the mesh affinity table.
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>, tier: IdentityTier) -> Self {
        Self {
            id: IdentityId::new(id),
            tier,
            role: default_role(),
            capabilities: BTreeSet::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_controller(&self) -> bool {
        self.tier == IdentityTier::PrivilegedController
    }

    pub fn is_denied(&self) -> bool {
        self.tier == IdentityTier::Denied
    }

    /// True if any of `names` appears in the capability set, or the set holds `"*"`.
    pub fn has_any_capability(&self, names: &[&str]) -> bool {
        self.capabilities.contains(WILDCARD_CAPABILITY)
            || names.iter().any(|n| self.capabilities.contains(*n))
    }

    /// Permission strings reported back to the caller after authentication.
    pub fn permissions(&self) -> Vec<String> {
        let mut out = vec![format!("tier:{}", self.tier)];
        out.extend(self.capabilities.iter().cloned());
        out
    }
}

fn default_role() -> String {
    "generalist".to_string()
}

/// Registry of identities authorized to authenticate against the gateway.
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    async fn find(&self, id: &IdentityId) -> Result<Option<Identity>>;
    async fn save(&self, identity: Identity) -> Result<()>;
    async fn list_all(&self) -> Result<Vec<Identity>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_capability_grants_any_name() {
        let worker = Identity::new("worker-b", IdentityTier::WorkerAgent).with_capabilities(["*"]);
        assert!(worker.has_any_capability(&["submit"]));
        assert!(worker.has_any_capability(&[READ_CAPABILITY]));
    }

    #[test]
    fn test_capability_lookup_is_exact() {
        let worker = Identity::new("worker-b", IdentityTier::WorkerAgent).with_capabilities(["read"]);
        assert!(worker.has_any_capability(&["read"]));
        assert!(!worker.has_any_capability(&["execute", "submit"]));
    }

    #[test]
    fn test_tier_serializes_kebab_case() {
        let json = serde_json::to_string(&IdentityTier::PrivilegedController).unwrap();
        assert_eq!(json, "\"privileged-controller\"");
        let tier: IdentityTier = serde_json::from_str("\"worker-agent\"").unwrap();
        assert_eq!(tier, IdentityTier::WorkerAgent);
    }

    #[test]
    fn test_permissions_lead_with_tier() {
        let controller = Identity::new("controller-a", IdentityTier::PrivilegedController)
            .with_capabilities(["read"]);
        assert_eq!(controller.permissions(), vec!["tier:privileged-controller", "read"]);
    }
}
