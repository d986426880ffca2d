// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::audit::AuditEntry;
use crate::domain::identity::IdentityId;
use crate::domain::security_state::ThreatLevel;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SecurityEvent {
    SessionIssued {
        identity_id: IdentityId,
        expires_at: DateTime<Utc>,
        issued_at: DateTime<Utc>,
    },
    SessionRotated {
        identity_id: IdentityId,
        rotated_at: DateTime<Utc>,
    },
    SessionRevoked {
        identity_id: IdentityId,
        reason: String,
        revoked_at: DateTime<Utc>,
    },
    SessionsExpired {
        count: usize,
        swept_at: DateTime<Utc>,
    },
    AuthenticationFailed {
        /// Claimed identity; may not exist in the registry.
        identity_id: String,
        failed_at: DateTime<Utc>,
    },
    AuthorizationDecided(AuditEntry),
    EmergencyStopActivated {
        identity_id: IdentityId,
        stopped_at: DateTime<Utc>,
    },
    ExecutionResumed {
        identity_id: IdentityId,
        resumed_at: DateTime<Utc>,
    },
    ThreatLevelRaised {
        level: ThreatLevel,
        raised_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessagingEvent {
    MessageSent {
        message_id: Uuid,
        sender_id: IdentityId,
        recipient_id: IdentityId,
        relevance_score: f64,
        sent_at: DateTime<Utc>,
    },
    MessageErrored {
        message_id: Uuid,
        reason: String,
        errored_at: DateTime<Utc>,
    },
    SafetyRejected {
        message_id: Uuid,
        reasons: Vec<String>,
        rejected_at: DateTime<Utc>,
    },
    InsightPropagated {
        insight_id: Uuid,
        source_message_id: Uuid,
        targets: Vec<IdentityId>,
        propagated_at: DateTime<Utc>,
    },
}
