// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Process-wide security counters.
//!
//! Created once at startup and dropped at shutdown; nothing here is persisted.
//! Mutation goes through the methods below, each of which takes the single
//! internal lock for the duration of one counter update.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Low,
    Elevated,
    High,
    Critical,
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Elevated => "elevated",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Breach counts at which the threat level escalates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreatThresholds {
    pub elevated: u64,
    pub high: u64,
    pub critical: u64,
}

impl Default for ThreatThresholds {
    fn default() -> Self {
        Self {
            elevated: 5,
            high: 20,
            critical: 50,
        }
    }
}

impl ThreatThresholds {
    fn level_for(&self, breaches: u64) -> ThreatLevel {
        if breaches >= self.critical {
            ThreatLevel::Critical
        } else if breaches >= self.high {
            ThreatLevel::High
        } else if breaches >= self.elevated {
            ThreatLevel::Elevated
        } else {
            ThreatLevel::Low
        }
    }
}

#[derive(Debug)]
struct Counters {
    active_sessions: u64,
    security_breaches: u64,
    threat_level: ThreatLevel,
}

#[derive(Debug)]
pub struct SecurityState {
    thresholds: ThreatThresholds,
    counters: Mutex<Counters>,
}

/// Read-only copy handed to the status interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySnapshot {
    pub active_sessions: u64,
    pub security_breaches: u64,
    pub threat_level: ThreatLevel,
}

impl SecurityState {
    pub fn new(thresholds: ThreatThresholds) -> Self {
        Self {
            thresholds,
            counters: Mutex::new(Counters {
                active_sessions: 0,
                security_breaches: 0,
                threat_level: ThreatLevel::Low,
            }),
        }
    }

    pub fn session_opened(&self) {
        let mut c = self.counters.lock();
        c.active_sessions += 1;
        metrics::gauge!("warden_sessions_active").set(c.active_sessions as f64);
    }

    pub fn session_closed(&self) {
        let mut c = self.counters.lock();
        c.active_sessions = c.active_sessions.saturating_sub(1);
        metrics::gauge!("warden_sessions_active").set(c.active_sessions as f64);
    }

    /// Count a breach. Returns the new threat level if this breach raised it.
    ///
    /// The level only ever rises; it is capped at [`ThreatLevel::Critical`].
    pub fn record_breach(&self) -> Option<ThreatLevel> {
        let mut c = self.counters.lock();
        c.security_breaches += 1;
        let level = self.thresholds.level_for(c.security_breaches);
        if level > c.threat_level {
            c.threat_level = level;
            Some(level)
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> SecuritySnapshot {
        let c = self.counters.lock();
        SecuritySnapshot {
            active_sessions: c.active_sessions,
            security_breaches: c.security_breaches,
            threat_level: c.threat_level,
        }
    }
}

impl Default for SecurityState {
    fn default() -> Self {
        Self::new(ThreatThresholds::default())
    }
}
