// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cross-Insight Propagator
//!
//! Scores how relevant a message is across the sender/recipient role pair and,
//! above the threshold, derives a safety-checked [`InsightArtifact`] and fans
//! it out to the best-matching other identities.
//!
//! ```text
//! marker_density = min(weighted_marker_hits / marker_saturation, 1)
//! score          = min(affinity(sender.role, recipient.role) * (1 + 0.5 * marker_density), 1)
//!
//! rank(c) = 0.4 * jaccard(c.capabilities, sender.capabilities)
//!         + 0.4 * (1 - |affinity(sender.role, c.role) - score|)
//!         + 0.2 * strategic_value
//! ```
//!
//! Candidates exclude the sender, the recipient and `denied` identities. Ties
//! break on identity id. Each message yields at most one artifact.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::cmp::Ordering;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use warden_core::domain::clock::Clock;
use warden_core::domain::events::MessagingEvent;
use warden_core::domain::gateway_config::MessagingConfig;
use warden_core::domain::identity::{Identity, IdentityId, IdentityRepository};
use warden_core::infrastructure::event_bus::EventBus;

use crate::application::safety_filter::{record_safety_rejection, FilterDecision, SafetyFilter};
use crate::domain::insight::InsightArtifact;
use crate::domain::message::{Message, MessageId};
use crate::domain::rules::CompiledRules;

const GENERAL_CATEGORY: &str = "general";

#[derive(Debug, Clone, Copy)]
pub struct PropagatorSettings {
    pub insight_threshold: f64,
    pub fanout: usize,
    pub max_inbox_entries: usize,
    pub insight_ttl: Duration,
}

impl Default for PropagatorSettings {
    fn default() -> Self {
        Self {
            insight_threshold: 0.7,
            fanout: 3,
            max_inbox_entries: 256,
            insight_ttl: Duration::hours(24),
        }
    }
}

impl From<&MessagingConfig> for PropagatorSettings {
    fn from(config: &MessagingConfig) -> Self {
        Self {
            insight_threshold: config.insight_threshold,
            fanout: config.propagation_fanout,
            max_inbox_entries: config.retention.max_inbox_entries,
            insight_ttl: config.retention.insight_ttl(),
        }
    }
}

pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

pub struct InsightPropagator {
    rules: Arc<CompiledRules>,
    filter: Arc<SafetyFilter>,
    identities: Arc<dyn IdentityRepository>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    settings: PropagatorSettings,
    inboxes: DashMap<IdentityId, VecDeque<InsightArtifact>>,
    // source message -> artifact id, dropped when the message store evicts the source
    derived: DashMap<MessageId, Uuid>,
}

impl InsightPropagator {
    pub fn new(
        rules: Arc<CompiledRules>,
        filter: Arc<SafetyFilter>,
        identities: Arc<dyn IdentityRepository>,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
        settings: PropagatorSettings,
    ) -> Self {
        Self {
            rules,
            filter,
            identities,
            event_bus,
            clock,
            settings,
            inboxes: DashMap::new(),
            derived: DashMap::new(),
        }
    }

    pub fn marker_density(&self, text: &str) -> f64 {
        self.rules.markers.saturated_score(text)
    }

    pub fn relevance_score(&self, sender_role: &str, recipient_role: &str, text: &str) -> f64 {
        let affinity = self.rules.affinity.lookup(sender_role, recipient_role);
        (affinity * (1.0 + 0.5 * self.marker_density(text))).clamp(0.0, 1.0)
    }

    /// Build the artifact for `message` if it clears the threshold and the filter.
    pub fn derive(&self, message: &Message, plaintext: &str) -> Option<InsightArtifact> {
        if message.relevance_score < self.settings.insight_threshold {
            return None;
        }

        let sanitized = match self.filter.filter(plaintext) {
            FilterDecision::Accepted(s) => s,
            FilterDecision::Rejected { reasons } => {
                record_safety_rejection(&self.event_bus, &message.id, &reasons, self.clock.now());
                return None;
            }
        };

        Some(InsightArtifact {
            id: Uuid::new_v4(),
            source_message_id: message.id,
            origin: message.sender_id.clone(),
            category: self
                .rules
                .categories
                .dominant_category(&sanitized.content)
                .unwrap_or_else(|| GENERAL_CATEGORY.to_string()),
            strategic_value: self.rules.strategic.saturated_score(plaintext),
            complexity: self.rules.complexity.saturated_score(plaintext),
            insight_value: sanitized.insight_value,
            sanitized_content: sanitized.content,
            relevance_score: message.relevance_score,
            safety_validated: true,
            created_at: self.clock.now(),
        })
    }

    /// Top `fanout` candidates for an artifact, best first.
    pub fn rank(
        &self,
        sender: &Identity,
        recipient: &Identity,
        score: f64,
        strategic_value: f64,
        candidates: &[Identity],
    ) -> Vec<(IdentityId, f64)> {
        let mut ranked: Vec<(IdentityId, f64)> = candidates
            .iter()
            .filter(|c| c.id != sender.id && c.id != recipient.id && !c.is_denied())
            .map(|c| {
                let overlap = jaccard(&c.capabilities, &sender.capabilities);
                let alignment = 1.0 - (self.rules.affinity.lookup(&sender.role, &c.role) - score).abs();
                (c.id.clone(), 0.4 * overlap + 0.4 * alignment + 0.2 * strategic_value)
            })
            .collect();

        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.settings.fanout);
        ranked
    }

    /// Derive and fan out once per message. Returns the artifact when one was propagated.
    pub async fn consider(
        &self,
        message: &Message,
        sender: &Identity,
        recipient: &Identity,
        plaintext: &str,
    ) -> Option<InsightArtifact> {
        if self.derived.contains_key(&message.id) {
            debug!(message_id = %message.id, "Insight already derived");
            return None;
        }
        let artifact = self.derive(message, plaintext)?;

        let candidates = match self.identities.list_all().await {
            Ok(all) => all,
            Err(e) => {
                warn!(error = %e, "Identity registry unavailable; no propagation targets");
                Vec::new()
            }
        };
        let targets: Vec<IdentityId> = self
            .rank(sender, recipient, message.relevance_score, artifact.strategic_value, &candidates)
            .into_iter()
            .map(|(id, _)| id)
            .collect();

        if self.derived.insert(message.id, artifact.id).is_some() {
            return None;
        }
        self.propagate(&artifact, &targets);
        Some(artifact)
    }

    fn propagate(&self, artifact: &InsightArtifact, targets: &[IdentityId]) {
        if !artifact.safety_validated {
            warn!(insight_id = %artifact.id, "Refusing to propagate unvalidated insight");
            return;
        }
        let now = self.clock.now();
        for target in targets {
            let mut inbox = self.inboxes.entry(target.clone()).or_default();
            inbox.push_back(artifact.clone());
            self.trim_inbox(&mut inbox, now);
        }
        info!(
            insight_id = %artifact.id,
            source_message_id = %artifact.source_message_id,
            category = %artifact.category,
            targets = targets.len(),
            "Insight propagated"
        );
        self.event_bus.publish_messaging_event(MessagingEvent::InsightPropagated {
            insight_id: artifact.id,
            source_message_id: artifact.source_message_id.0,
            targets: targets.to_vec(),
            propagated_at: self.clock.now(),
        });
    }

    /// Drop expired artifacts, then the oldest beyond the inbox cap.
    fn trim_inbox(&self, inbox: &mut VecDeque<InsightArtifact>, now: DateTime<Utc>) {
        let horizon = now - self.settings.insight_ttl;
        let before = inbox.len();
        inbox.retain(|a| a.created_at > horizon);
        while inbox.len() > self.settings.max_inbox_entries.max(1) {
            inbox.pop_front();
        }
        let dropped = before - inbox.len();
        if dropped > 0 {
            metrics::counter!("warden_insights_evicted_total").increment(dropped as u64);
        }
    }

    /// Artifacts propagated to `identity_id` and still retained, oldest first.
    pub fn insights_for(&self, identity_id: &IdentityId) -> Vec<InsightArtifact> {
        let now = self.clock.now();
        match self.inboxes.get_mut(identity_id) {
            Some(mut inbox) => {
                self.trim_inbox(&mut inbox, now);
                inbox.iter().cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Release the once-per-message records of evicted messages.
    pub fn forget(&self, message_ids: &[MessageId]) {
        for id in message_ids {
            self.derived.remove(id);
        }
    }

    pub fn derived_count(&self) -> usize {
        self.derived.len()
    }
}
