// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::sync::Arc;
use tracing::warn;

use crate::domain::clock::Clock;
use crate::domain::error::AuthFailureReason;
use crate::domain::events::SecurityEvent;
use crate::domain::identity::IdentityId;
use crate::domain::security_state::SecurityState;
use crate::infrastructure::event_bus::EventBus;

/// Single place where failed authentication and denied authorization turn
/// into breach counts, metrics, threat escalation and events.
pub struct SecurityMonitor {
    state: Arc<SecurityState>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
}

impl SecurityMonitor {
    pub fn new(state: Arc<SecurityState>, event_bus: EventBus, clock: Arc<dyn Clock>) -> Self {
        Self {
            state,
            event_bus,
            clock,
        }
    }

    pub fn state(&self) -> &Arc<SecurityState> {
        &self.state
    }

    /// `claimed` is whatever the caller asserted; it is logged, never echoed back.
    pub fn authentication_failed(&self, claimed: &str, reason: AuthFailureReason) {
        warn!(claimed_identity = %claimed, reason = %reason, "Authentication failed");
        metrics::counter!("warden_auth_failures_total").increment(1);
        self.event_bus.publish_security_event(SecurityEvent::AuthenticationFailed {
            identity_id: claimed.to_string(),
            failed_at: self.clock.now(),
        });
        self.breach();
    }

    pub fn authorization_denied(&self, identity_id: &IdentityId, operation: &str) {
        warn!(identity_id = %identity_id, operation = %operation, "Unauthorized attempt counted as breach");
        self.breach();
    }

    fn breach(&self) {
        if let Some(level) = self.state.record_breach() {
            warn!(threat_level = %level, "Threat level raised");
            self.event_bus.publish_security_event(SecurityEvent::ThreatLevelRaised {
                level,
                raised_at: self.clock.now(),
            });
        }
    }
}
