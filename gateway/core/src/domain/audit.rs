// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Audit records for authorization decisions.
//!
//! One [`AuditEntry`] is written for every allow and every deny the gateway
//! makes, including emergency stops and session revocations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::command::PermissionTier;
use crate::domain::identity::IdentityId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AuditDecision {
    Allow,
    Deny { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub identity_id: IdentityId,
    pub operation: String,
    pub required_tier: Option<PermissionTier>,
    #[serde(flatten)]
    pub decision: AuditDecision,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn allow(
        identity_id: IdentityId,
        operation: impl Into<String>,
        required_tier: Option<PermissionTier>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity_id,
            operation: operation.into(),
            required_tier,
            decision: AuditDecision::Allow,
            timestamp,
        }
    }

    pub fn deny(
        identity_id: IdentityId,
        operation: impl Into<String>,
        required_tier: Option<PermissionTier>,
        reason: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity_id,
            operation: operation.into(),
            required_tier,
            decision: AuditDecision::Deny {
                reason: reason.into(),
            },
            timestamp,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision == AuditDecision::Allow
    }
}
