// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Commands and Permission Tiers
//!
//! Every [`Operation`] carries a static [`PermissionTier`] classification. The
//! gateway evaluates that classification against the caller's identity:
//!
//! 1. Tier first: CRITICAL operations require `privileged-controller`, full stop.
//! 2. Capability second: EXECUTE and READ operations consult capability strings.
//! 3. Unknown operations have no classification and are denied.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::domain::identity::{Identity, EXECUTE_CAPABILITY, READ_CAPABILITY};

/// String-keyed command parameters forwarded verbatim to the execution service.
pub type Parameters = HashMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PermissionTier {
    Read,
    Execute,
    Critical,
}

impl fmt::Display for PermissionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Read => "READ",
            Self::Execute => "EXECUTE",
            Self::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    EmergencyStop,
    ResumeExecution,
    PurgeState,
    Submit,
    Amend,
    Cancel,
    Query,
    Describe,
    #[serde(untagged)]
    Unknown(String),
}

impl Operation {
    pub fn parse(name: &str) -> Self {
        match name {
            "emergency_stop" => Self::EmergencyStop,
            "resume_execution" => Self::ResumeExecution,
            "purge_state" => Self::PurgeState,
            "submit" => Self::Submit,
            "amend" => Self::Amend,
            "cancel" => Self::Cancel,
            "query" => Self::Query,
            "describe" => Self::Describe,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::EmergencyStop => "emergency_stop",
            Self::ResumeExecution => "resume_execution",
            Self::PurgeState => "purge_state",
            Self::Submit => "submit",
            Self::Amend => "amend",
            Self::Cancel => "cancel",
            Self::Query => "query",
            Self::Describe => "describe",
            Self::Unknown(name) => name,
        }
    }

    /// Static classification. `None` means the operation is unknown and denied.
    pub fn required_tier(&self) -> Option<PermissionTier> {
        match self {
            Self::EmergencyStop | Self::ResumeExecution | Self::PurgeState => {
                Some(PermissionTier::Critical)
            }
            Self::Submit | Self::Amend | Self::Cancel => Some(PermissionTier::Execute),
            Self::Query | Self::Describe => Some(PermissionTier::Read),
            Self::Unknown(_) => None,
        }
    }

    /// CRITICAL operations other than emergency stop need an explicit confirmation.
    pub fn requires_confirmation(&self) -> bool {
        matches!(self, Self::ResumeExecution | Self::PurgeState)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub operation: Operation,
    #[serde(default)]
    pub parameters: Parameters,
}

impl Command {
    pub fn new(operation: Operation, parameters: Parameters) -> Self {
        Self {
            operation,
            parameters,
        }
    }

    pub fn required_tier(&self) -> Option<PermissionTier> {
        self.operation.required_tier()
    }

    pub fn requires_confirmation(&self) -> bool {
        self.operation.requires_confirmation()
    }

    pub fn is_confirmed(&self) -> bool {
        self.parameters
            .get("confirmed")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Outcome of evaluating one identity against one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny(String),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Evaluate the tier-first, capability-second rule.
pub fn evaluate_access(identity: &Identity, operation: &Operation) -> AccessDecision {
    if identity.is_denied() {
        return AccessDecision::Deny(format!("identity tier '{}' may not invoke operations", identity.tier));
    }

    let Some(tier) = operation.required_tier() else {
        return AccessDecision::Deny(format!("operation '{}' is not classified", operation));
    };

    if identity.is_controller() {
        return AccessDecision::Allow;
    }

    match tier {
        PermissionTier::Critical => AccessDecision::Deny(format!(
            "CRITICAL operation '{}' requires privileged-controller tier",
            operation
        )),
        PermissionTier::Execute => {
            if identity.has_any_capability(&[EXECUTE_CAPABILITY, operation.name()]) {
                AccessDecision::Allow
            } else {
                AccessDecision::Deny(format!("missing capability for EXECUTE operation '{}'", operation))
            }
        }
        PermissionTier::Read => {
            if identity.has_any_capability(&[READ_CAPABILITY]) {
                AccessDecision::Allow
            } else {
                AccessDecision::Deny(format!("missing capability for READ operation '{}'", operation))
            }
        }
    }
}
