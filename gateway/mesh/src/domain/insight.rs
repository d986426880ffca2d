// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warden_core::domain::identity::IdentityId;

use crate::domain::message::{MessageId, MessageType, SafetyLevel};

/// Shareable summary derived from a sufficiently cross-relevant message.
///
/// Only the propagator builds these, and only from content the safety filter
/// accepted, so `safety_validated` is true on every artifact that reaches an
/// inbox. The flag is still checked at propagation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightArtifact {
    pub id: Uuid,
    pub source_message_id: MessageId,
    pub origin: IdentityId,
    pub category: String,
    pub sanitized_content: String,
    pub strategic_value: f64,
    pub complexity: f64,
    pub insight_value: f64,
    pub relevance_score: f64,
    pub safety_validated: bool,
    pub created_at: DateTime<Utc>,
}

/// What leaves the trust boundary for one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeProjection {
    pub message_id: MessageId,
    pub sender_id: IdentityId,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub safety_level: SafetyLevel,
    pub content: String,
    /// Redaction categories applied, in match order.
    pub redactions: Vec<String>,
    pub truncated: bool,
    pub insight_value: f64,
    pub relevance_score: f64,
    pub timestamp: DateTime<Utc>,
}
