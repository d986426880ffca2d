// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Authorization Audit Log
//!
//! Every allow and deny decision produced by the execution gateway lands here.
//! Each entry is:
//!
//! - written to the structured tracing log (`info!` for allow, `warn!` for deny),
//! - counted in `warden_authz_decisions_total{decision}`,
//! - published as [`SecurityEvent::AuthorizationDecided`] on the [`EventBus`],
//! - retained in a bounded in-memory ring for the `/v1/audit` endpoint.
//!
//! The ring is a diagnostic window, not durable storage; the tracing output is
//! the system of record.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{info, warn};

use crate::domain::audit::{AuditDecision, AuditEntry};
use crate::domain::events::SecurityEvent;
use crate::infrastructure::event_bus::EventBus;

pub const DEFAULT_RETAINED_ENTRIES: usize = 10_000;

pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
    event_bus: EventBus,
}

impl AuditLog {
    pub fn new(event_bus: EventBus) -> Self {
        Self::with_capacity(event_bus, DEFAULT_RETAINED_ENTRIES)
    }

    pub fn with_capacity(event_bus: EventBus, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            event_bus,
        }
    }

    pub fn record(&self, entry: AuditEntry) {
        match &entry.decision {
            AuditDecision::Allow => {
                info!(
                    identity_id = %entry.identity_id,
                    operation = %entry.operation,
                    tier = ?entry.required_tier,
                    "Authorization allowed"
                );
                metrics::counter!("warden_authz_decisions_total", "decision" => "allow").increment(1);
            }
            AuditDecision::Deny { reason } => {
                warn!(
                    identity_id = %entry.identity_id,
                    operation = %entry.operation,
                    tier = ?entry.required_tier,
                    reason = %reason,
                    "Authorization denied"
                );
                metrics::counter!("warden_authz_decisions_total", "decision" => "deny").increment(1);
            }
        }

        {
            let mut entries = self.entries.lock();
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }

        self.event_bus
            .publish_security_event(SecurityEvent::AuthorizationDecided(entry));
    }

    /// Newest entries first.
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        self.entries.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::command::PermissionTier;
    use crate::domain::identity::IdentityId;
    use crate::infrastructure::event_bus::DomainEvent;
    use chrono::Utc;

    #[tokio::test]
    async fn test_record_publishes_and_retains() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let log = AuditLog::new(bus);

        log.record(AuditEntry::deny(
            IdentityId::new("worker-b"),
            "emergency_stop",
            Some(PermissionTier::Critical),
            "tier",
            Utc::now(),
        ));

        assert_eq!(log.len(), 1);
        assert!(!log.recent(1)[0].is_allowed());
        match rx.recv().await.unwrap() {
            DomainEvent::Security(SecurityEvent::AuthorizationDecided(entry)) => {
                assert_eq!(entry.operation, "emergency_stop");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_ring_is_bounded_and_newest_first() {
        let log = AuditLog::with_capacity(EventBus::new(4), 3);
        for op in ["a", "b", "c", "d"] {
            log.record(AuditEntry::allow(IdentityId::new("controller-a"), op, None, Utc::now()));
        }
        let ops: Vec<_> = log.recent(10).into_iter().map(|e| e.operation).collect();
        assert_eq!(ops, vec!["d", "c", "b"]);
    }
}
