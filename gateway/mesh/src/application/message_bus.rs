// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Encrypted Messaging Bus
//!
//! Point-to-point transport between registered identities. Each message is
//! sealed under the recipient's key (lazily provisioned through the
//! [`SecretStore`]) with AES-256-GCM, binding message id, sender and recipient
//! as associated data.
//!
//! The store holds ciphertext only. Plaintext is handed to the recipient by
//! [`MessageBus::open_message`] / [`MessageBus::open_pending`] and is not kept.
//! A message that fails to open is marked errored and stays in the store.
//!
//! The store is bounded by [`MessageRetention`]: delivered messages expire
//! after `delivered_ttl`, and past `max_messages` the oldest delivered go
//! first, then errored, then pending.

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use warden_core::domain::clock::Clock;
use warden_core::domain::events::MessagingEvent;
use warden_core::domain::gateway_config::RetentionConfig;
use warden_core::domain::identity::{Identity, IdentityId, IdentityRepository};
use warden_core::domain::secret_store::SecretStore;
use warden_core::infrastructure::cipher::{MessageCipher, SealedPayload};
use warden_core::infrastructure::event_bus::EventBus;

use crate::application::insight_propagator::InsightPropagator;
use crate::application::safety_filter::{record_safety_rejection, FilterDecision, SafetyFilter};
use crate::domain::error::MessagingError;
use crate::domain::insight::{InsightArtifact, SafeProjection};
use crate::domain::message::{DeliveryState, Message, MessageId, MessageType, SafetyLevel};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: String,
    pub recipient_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub plaintext: String,
    pub safety_level: SafetyLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub message_id: MessageId,
}

/// Decrypted message for its single intended consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenedMessage {
    pub message_id: MessageId,
    pub sender_id: IdentityId,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub safety_level: SafetyLevel,
    pub relevance_score: f64,
    pub timestamp: DateTime<Utc>,
    pub plaintext: String,
}

impl OpenedMessage {
    fn from_message(message: &Message, plaintext: String) -> Self {
        Self {
            message_id: message.id,
            sender_id: message.sender_id.clone(),
            message_type: message.message_type,
            safety_level: message.safety_level,
            relevance_score: message.relevance_score,
            timestamp: message.timestamp,
            plaintext,
        }
    }
}

fn open_sealed(cipher: &MessageCipher, message: &Message) -> Result<String, MessagingError> {
    let sealed = SealedPayload::from_base64(&message.ciphertext)?;
    let bytes = cipher.open(&sealed, &message.aad())?;
    String::from_utf8(bytes).map_err(|_| MessagingError::DecryptionFailure("plaintext is not valid UTF-8".into()))
}

#[derive(Debug, Clone, Copy)]
pub struct MessageRetention {
    pub max_messages: usize,
    pub delivered_ttl: Duration,
}

impl Default for MessageRetention {
    fn default() -> Self {
        Self {
            max_messages: 10_000,
            delivered_ttl: Duration::hours(1),
        }
    }
}

impl From<&RetentionConfig> for MessageRetention {
    fn from(config: &RetentionConfig) -> Self {
        Self {
            max_messages: config.max_messages,
            delivered_ttl: config.delivered_ttl(),
        }
    }
}

fn eviction_rank(delivery: &DeliveryState) -> u8 {
    match delivery {
        DeliveryState::Delivered { .. } => 0,
        DeliveryState::Errored { .. } => 1,
        DeliveryState::Pending => 2,
    }
}

pub struct MessageBus {
    secrets: Arc<dyn SecretStore>,
    identities: Arc<dyn IdentityRepository>,
    filter: Arc<SafetyFilter>,
    propagator: Arc<InsightPropagator>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    retention: MessageRetention,
    messages: RwLock<HashMap<MessageId, Message>>,
}

impl MessageBus {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        identities: Arc<dyn IdentityRepository>,
        filter: Arc<SafetyFilter>,
        propagator: Arc<InsightPropagator>,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            secrets,
            identities,
            filter,
            propagator,
            event_bus,
            clock,
            retention: MessageRetention::default(),
            messages: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_retention(mut self, retention: MessageRetention) -> Self {
        self.retention = retention;
        self
    }

    async fn participant(&self, id: &str) -> Result<Identity, MessagingError> {
        self.identities
            .find(&IdentityId::new(id))
            .await
            .ok()
            .flatten()
            .filter(|i| !i.is_denied())
            .ok_or_else(|| MessagingError::UnknownIdentity(id.to_string()))
    }

    pub async fn send(&self, request: SendMessageRequest) -> Result<MessageId, MessagingError> {
        let sender = self.participant(&request.sender_id).await?;
        let recipient = self.participant(&request.recipient_id).await?;

        let handle = self.secrets.get_or_create_key(&recipient.id).await?;
        let cipher = self.secrets.cipher(&handle).await?;

        let id = MessageId::new();
        let aad = Message::associated_data(&id, &sender.id, &recipient.id);
        let sealed = cipher.seal(request.plaintext.as_bytes(), &aad).map_err(|e| {
            warn!(sender_id = %sender.id, recipient_id = %recipient.id, error = %e, "Message rejected at encryption");
            MessagingError::from(e)
        })?;

        let relevance_score = self
            .propagator
            .relevance_score(&sender.role, &recipient.role, &request.plaintext);
        let now = self.clock.now();
        let message = Message {
            id,
            sender_id: sender.id.clone(),
            recipient_id: recipient.id.clone(),
            message_type: request.message_type,
            ciphertext: sealed.to_base64(),
            key_version: handle.version,
            safety_level: request.safety_level,
            relevance_score,
            timestamp: now,
            delivery: DeliveryState::Pending,
        };
        self.messages.write().insert(id, message.clone());
        self.enforce_retention(now);

        metrics::counter!("warden_messages_sent_total").increment(1);
        info!(
            message_id = %id,
            sender_id = %sender.id,
            recipient_id = %recipient.id,
            relevance_score,
            "Message sealed and queued"
        );
        self.event_bus.publish_messaging_event(MessagingEvent::MessageSent {
            message_id: id.0,
            sender_id: sender.id.clone(),
            recipient_id: recipient.id.clone(),
            relevance_score,
            sent_at: now,
        });

        self.propagator
            .consider(&message, &sender, &recipient, &request.plaintext)
            .await;
        Ok(id)
    }

    /// Stored record (ciphertext and delivery state) of one message.
    pub fn message(&self, id: &MessageId) -> Option<Message> {
        self.messages.read().get(id).cloned()
    }

    /// Every stored message addressed to `recipient`, newest first, errored ones included.
    pub fn messages_for(&self, recipient: &IdentityId) -> Vec<Message> {
        let mut out: Vec<Message> = self
            .messages
            .read()
            .values()
            .filter(|m| &m.recipient_id == recipient)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub fn errored_messages(&self) -> Vec<Message> {
        self.messages
            .read()
            .values()
            .filter(|m| m.delivery.is_errored())
            .cloned()
            .collect()
    }

    /// Evict expired deliveries, then the lowest-priority messages above the cap.
    fn enforce_retention(&self, now: DateTime<Utc>) {
        let horizon = now - self.retention.delivered_ttl;
        let mut evicted = Vec::new();
        {
            let mut messages = self.messages.write();
            messages.retain(|id, m| match m.delivery {
                DeliveryState::Delivered { at } if at <= horizon => {
                    evicted.push(*id);
                    false
                }
                _ => true,
            });

            let cap = self.retention.max_messages.max(1);
            if messages.len() > cap {
                let mut ranked: Vec<(u8, DateTime<Utc>, MessageId)> = messages
                    .values()
                    .map(|m| (eviction_rank(&m.delivery), m.timestamp, m.id))
                    .collect();
                ranked.sort();
                let excess = messages.len() - cap;
                for (rank, _, id) in ranked.into_iter().take(excess) {
                    if rank == eviction_rank(&DeliveryState::Pending) {
                        warn!(message_id = %id, "Message store full; dropping undelivered message");
                    }
                    messages.remove(&id);
                    evicted.push(id);
                }
            }
        }

        if !evicted.is_empty() {
            debug!(count = evicted.len(), "Evicted messages from the store");
            metrics::counter!("warden_messages_evicted_total").increment(evicted.len() as u64);
            self.propagator.forget(&evicted);
        }
    }

    fn mark_errored(&self, id: &MessageId, error: &MessagingError) {
        let now = self.clock.now();
        if let Some(message) = self.messages.write().get_mut(id) {
            message.mark_errored(error.to_string(), now);
        }
        warn!(message_id = %id, error = %error, "Message marked errored");
        self.event_bus.publish_messaging_event(MessagingEvent::MessageErrored {
            message_id: id.0,
            reason: error.to_string(),
            errored_at: now,
        });
    }

    fn mark_delivered(&self, id: &MessageId) {
        let now = self.clock.now();
        if let Some(message) = self.messages.write().get_mut(id) {
            message.mark_delivered(now);
        }
    }

    async fn decrypt(&self, message: &Message) -> Result<String, MessagingError> {
        let cipher = self.secrets.cipher(&message.key_handle()).await?;
        open_sealed(&cipher, message)
    }

    /// Decrypt one message for its recipient.
    pub async fn open_message(&self, requester: &IdentityId, id: &MessageId) -> Result<OpenedMessage, MessagingError> {
        let message = self.message(id).ok_or(MessagingError::MessageNotFound(*id))?;
        if &message.recipient_id != requester {
            warn!(message_id = %id, requester = %requester, "Non-recipient tried to open message");
            return Err(MessagingError::NotRecipient(*id));
        }

        match self.decrypt(&message).await {
            Ok(plaintext) => {
                self.mark_delivered(id);
                debug!(message_id = %id, "Message delivered");
                Ok(OpenedMessage::from_message(&message, plaintext))
            }
            Err(e) => {
                self.mark_errored(id, &e);
                Err(e)
            }
        }
    }

    /// Decrypt every pending message for `recipient` in parallel on the blocking pool.
    /// Each result is independent; failures mark only their own message errored.
    pub async fn open_pending(&self, recipient: &IdentityId) -> Vec<(MessageId, Result<OpenedMessage, MessagingError>)> {
        let mut pending: Vec<Message> = self
            .messages
            .read()
            .values()
            .filter(|m| &m.recipient_id == recipient && m.delivery == DeliveryState::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

        let jobs = pending.into_iter().map(|message| async move {
            let id = message.id;
            let cipher = match self.secrets.cipher(&message.key_handle()).await {
                Ok(c) => c,
                Err(e) => return (id, Err(MessagingError::from(e))),
            };
            let result = tokio::task::spawn_blocking(move || {
                open_sealed(&cipher, &message).map(|plaintext| OpenedMessage::from_message(&message, plaintext))
            })
            .await
            .unwrap_or_else(|e| Err(MessagingError::DecryptionFailure(format!("decrypt task failed: {e}"))));
            (id, result)
        });

        let results = join_all(jobs).await;
        for (id, result) in &results {
            match result {
                Ok(_) => self.mark_delivered(id),
                Err(e) => self.mark_errored(id, e),
            }
        }
        results
    }

    /// Sanitized projections of `requester`'s `safe`/`internal` messages, newest first.
    ///
    /// Messages the filter rejects are suppressed (and audited); messages that
    /// fail to decrypt are marked errored and skipped.
    pub async fn fetch_safe_messages(&self, requester: &IdentityId, limit: usize) -> Vec<SafeProjection> {
        let candidates: Vec<Message> = self
            .messages_for(requester)
            .into_iter()
            .filter(|m| m.safety_level.is_projectable() && !m.delivery.is_errored())
            .collect();

        let mut out = Vec::new();
        for message in candidates {
            if out.len() >= limit {
                break;
            }
            let plaintext = match self.decrypt(&message).await {
                Ok(p) => p,
                Err(e) => {
                    self.mark_errored(&message.id, &e);
                    continue;
                }
            };
            match self.filter.filter(&plaintext) {
                FilterDecision::Accepted(sanitized) => out.push(SafeProjection {
                    message_id: message.id,
                    sender_id: message.sender_id.clone(),
                    message_type: message.message_type,
                    safety_level: message.safety_level,
                    content: sanitized.content,
                    redactions: sanitized.redactions,
                    truncated: sanitized.truncated,
                    insight_value: sanitized.insight_value,
                    relevance_score: message.relevance_score,
                    timestamp: message.timestamp,
                }),
                FilterDecision::Rejected { reasons } => {
                    record_safety_rejection(&self.event_bus, &message.id, &reasons, self.clock.now());
                }
            }
        }
        out
    }

    pub fn insights_for(&self, identity_id: &IdentityId) -> Vec<InsightArtifact> {
        self.propagator.insights_for(identity_id)
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite the stored ciphertext of a message.
    #[cfg(test)]
    pub(crate) fn replace_ciphertext(&self, id: &MessageId, ciphertext: String) {
        if let Some(message) = self.messages.write().get_mut(id) {
            message.ciphertext = ciphertext;
        }
    }
}
