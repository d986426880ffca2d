// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Messages as the bus stores them: sealed, addressed, scored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use warden_core::domain::identity::IdentityId;
use warden_core::domain::secret_store::KeyHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Insight,
    Query,
    Collaboration,
    Warning,
    Discovery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    Safe,
    Internal,
    Restricted,
    Classified,
}

impl SafetyLevel {
    /// Only `safe` and `internal` messages are ever considered for external projection.
    pub fn is_projectable(self) -> bool {
        matches!(self, Self::Safe | Self::Internal)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Delivered { at: DateTime<Utc> },
    Errored { reason: String, at: DateTime<Utc> },
}

impl DeliveryState {
    pub fn is_errored(&self) -> bool {
        matches!(self, Self::Errored { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: IdentityId,
    pub recipient_id: IdentityId,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// `base64(nonce || tag || ciphertext)`.
    pub ciphertext: String,
    /// Version of the recipient key that sealed `ciphertext`.
    pub key_version: u32,
    pub safety_level: SafetyLevel,
    pub relevance_score: f64,
    pub timestamp: DateTime<Utc>,
    pub delivery: DeliveryState,
}

impl Message {
    /// Associated data bound into the AEAD tag. Re-addressing a sealed payload
    /// to another message, sender or recipient makes it fail to open.
    pub fn associated_data(id: &MessageId, sender: &IdentityId, recipient: &IdentityId) -> Vec<u8> {
        format!("warden.msg.v1|{}|{}|{}", id, sender, recipient).into_bytes()
    }

    pub fn aad(&self) -> Vec<u8> {
        Self::associated_data(&self.id, &self.sender_id, &self.recipient_id)
    }

    pub fn key_handle(&self) -> KeyHandle {
        KeyHandle {
            owner: self.recipient_id.clone(),
            version: self.key_version,
        }
    }

    pub fn mark_delivered(&mut self, at: DateTime<Utc>) {
        // An errored message keeps its diagnosis.
        if !self.delivery.is_errored() {
            self.delivery = DeliveryState::Delivered { at };
        }
    }

    pub fn mark_errored(&mut self, reason: impl Into<String>, at: DateTime<Utc>) {
        self.delivery = DeliveryState::Errored {
            reason: reason.into(),
            at,
        };
    }
}
