// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Execution Gateway
//!
//! Authorizes commands against the live session and forwards them to the
//! isolated execution service.
//!
//! ## Request Pipeline
//!
//! ```text
//! execute(token, command)
//!   1. SessionManager::validate(token)        → SessionExpired / SessionRevoked / AuthenticationFailure
//!   2. evaluate_access(identity, operation)   → AuthorizationFailure (audited, counted as breach)
//!   3. emergency_stop / resume_execution      → handled here, never forwarded
//!   4. confirmation check                     → ConfirmationRequired (audited)
//!   5. kill switch (non-CRITICAL only)        → ExecutionHalted (audited)
//!   6. audit allow
//!   7. backend.dispatch under hard timeout    → UpstreamUnavailable on timeout/transport error
//! ```
//!
//! The kill switch is a single `AtomicBool`. Emergency stop flips it without
//! touching the session store or the backend, so it works while either is
//! degraded. Work already dispatched is left to finish.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::application::credential_verifier::{AuthenticationRequest, CredentialVerifier};
use crate::application::security_monitor::SecurityMonitor;
use crate::application::session_manager::{HeartbeatOutcome, SessionManager};
use crate::domain::audit::AuditEntry;
use crate::domain::clock::Clock;
use crate::domain::command::{evaluate_access, AccessDecision, Command, Operation, PermissionTier};
use crate::domain::error::GatewayError;
use crate::domain::events::SecurityEvent;
use crate::domain::execution::{ExecutionBackend, UpstreamError};
use crate::domain::identity::{Identity, IdentityId, IdentityRepository};
use crate::domain::security_state::ThreatLevel;
use crate::domain::session::{DownstreamToken, Session, SessionToken};
use crate::infrastructure::audit::AuditLog;
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationResponse {
    pub session_token: SessionToken,
    pub expires_in: i64,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyStopReceipt {
    pub stopped: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationFlags {
    pub execution_enabled: bool,
    /// True when the execution service runs in a separate process.
    pub execution_service_remote: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_by: Option<IdentityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayStatus {
    pub active_sessions: u64,
    pub security_breaches: u64,
    pub threat_level: ThreatLevel,
    pub isolation_flags: IsolationFlags,
}

/// What a revocation request targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationTarget {
    Token(SessionToken),
    Identity(IdentityId),
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub timeout: Duration,
    pub retry_after: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_after: Duration::from_secs(5),
        }
    }
}

pub struct ExecutionGateway {
    verifier: Arc<CredentialVerifier>,
    sessions: Arc<SessionManager>,
    identities: Arc<dyn IdentityRepository>,
    backend: Arc<dyn ExecutionBackend>,
    audit: Arc<AuditLog>,
    monitor: Arc<SecurityMonitor>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    settings: GatewaySettings,
    execution_enabled: AtomicBool,
    stop_record: Mutex<Option<(IdentityId, DateTime<Utc>)>>,
}

impl ExecutionGateway {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        verifier: Arc<CredentialVerifier>,
        sessions: Arc<SessionManager>,
        identities: Arc<dyn IdentityRepository>,
        backend: Arc<dyn ExecutionBackend>,
        audit: Arc<AuditLog>,
        monitor: Arc<SecurityMonitor>,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            verifier,
            sessions,
            identities,
            backend,
            audit,
            monitor,
            event_bus,
            clock,
            settings,
            execution_enabled: AtomicBool::new(true),
            stop_record: Mutex::new(None),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn is_execution_enabled(&self) -> bool {
        self.execution_enabled.load(Ordering::SeqCst)
    }

    pub async fn authenticate(&self, request: &AuthenticationRequest) -> Result<AuthenticationResponse, GatewayError> {
        let identity = self.verifier.verify(request).await?;
        let issued = self.sessions.mint(&identity).await?;
        Ok(AuthenticationResponse {
            session_token: issued.session_token,
            expires_in: issued.expires_in,
            permissions: identity.permissions(),
        })
    }

    pub async fn heartbeat(&self, token: &SessionToken) -> Result<HeartbeatOutcome, GatewayError> {
        self.sessions.heartbeat(token).await
    }

    /// Resolve a token to its session and the identity's current registry entry.
    pub async fn authorize_session(&self, token: &SessionToken) -> Result<(Session, Identity), GatewayError> {
        let session = self.sessions.validate(token).await?;
        let identity = self
            .identities
            .find(&session.identity_id)
            .await
            .ok()
            .flatten()
            .ok_or_else(|| {
                warn!(identity_id = %session.identity_id, "Session outlived its identity");
                GatewayError::AuthorizationFailure
            })?;
        Ok((session, identity))
    }

    fn deny(&self, identity_id: &IdentityId, operation: &str, tier: Option<PermissionTier>, reason: String) {
        self.audit
            .record(AuditEntry::deny(identity_id.clone(), operation, tier, reason, self.clock.now()));
    }

    fn allow(&self, identity_id: &IdentityId, operation: &str, tier: Option<PermissionTier>) {
        self.audit
            .record(AuditEntry::allow(identity_id.clone(), operation, tier, self.clock.now()));
    }

    /// Tier-first, capability-second check with audit and breach accounting.
    fn check_access(&self, identity: &Identity, operation: &Operation) -> Result<(), GatewayError> {
        match evaluate_access(identity, operation) {
            AccessDecision::Allow => Ok(()),
            AccessDecision::Deny(reason) => {
                self.deny(&identity.id, operation.name(), operation.required_tier(), reason);
                self.monitor.authorization_denied(&identity.id, operation.name());
                Err(GatewayError::AuthorizationFailure)
            }
        }
    }

    pub async fn execute(&self, token: &SessionToken, command: Command) -> Result<Value, GatewayError> {
        let (session, identity) = self.authorize_session(token).await?;
        self.check_access(&identity, &command.operation)?;

        let operation = command.operation.name().to_string();
        let tier = command.required_tier();

        if command.requires_confirmation() && !command.is_confirmed() {
            self.deny(&identity.id, &operation, tier, "explicit confirmation missing".into());
            return Err(GatewayError::ConfirmationRequired(operation));
        }

        match command.operation {
            Operation::EmergencyStop => {
                self.allow(&identity.id, &operation, tier);
                let receipt = self.halt(&identity.id);
                return Ok(json!(receipt));
            }
            Operation::ResumeExecution => {
                self.allow(&identity.id, &operation, tier);
                self.resume(&identity.id);
                return Ok(json!({ "resumed": true, "timestamp": self.clock.now() }));
            }
            _ => {}
        }

        if tier != Some(PermissionTier::Critical) && !self.is_execution_enabled() {
            self.deny(&identity.id, &operation, tier, "execution halted by emergency stop".into());
            return Err(GatewayError::ExecutionHalted);
        }

        self.allow(&identity.id, &operation, tier);
        self.dispatch(&session, &command).await
    }

    /// Flip the kill switch. Requires `privileged-controller`; idempotent.
    pub async fn emergency_stop(&self, token: &SessionToken) -> Result<EmergencyStopReceipt, GatewayError> {
        let (_, identity) = self.authorize_session(token).await?;
        self.check_access(&identity, &Operation::EmergencyStop)?;
        self.allow(&identity.id, Operation::EmergencyStop.name(), Some(PermissionTier::Critical));
        Ok(self.halt(&identity.id))
    }

    fn halt(&self, by: &IdentityId) -> EmergencyStopReceipt {
        let now = self.clock.now();
        if self.execution_enabled.swap(false, Ordering::SeqCst) {
            *self.stop_record.lock() = Some((by.clone(), now));
            warn!(identity_id = %by, "EMERGENCY STOP: execution disabled");
            self.event_bus.publish_security_event(SecurityEvent::EmergencyStopActivated {
                identity_id: by.clone(),
                stopped_at: now,
            });
        } else {
            info!(identity_id = %by, "Emergency stop repeated; execution already disabled");
        }
        EmergencyStopReceipt {
            stopped: true,
            timestamp: now,
        }
    }

    fn resume(&self, by: &IdentityId) {
        let now = self.clock.now();
        if !self.execution_enabled.swap(true, Ordering::SeqCst) {
            *self.stop_record.lock() = None;
            warn!(identity_id = %by, "Execution re-enabled");
            self.event_bus.publish_security_event(SecurityEvent::ExecutionResumed {
                identity_id: by.clone(),
                resumed_at: now,
            });
        }
    }

    fn unavailable(&self, error: &UpstreamError) -> GatewayError {
        warn!(error = %error, "Execution service unavailable");
        GatewayError::UpstreamUnavailable {
            retry_after: self.settings.retry_after,
        }
    }

    async fn with_timeout<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, UpstreamError>>,
    ) -> Result<T, UpstreamError> {
        match tokio::time::timeout(self.settings.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Unreachable(format!(
                "no response within {:?}",
                self.settings.timeout
            ))),
        }
    }

    async fn open_channel(&self, session: &Session) -> Result<DownstreamToken, GatewayError> {
        let token = self
            .with_timeout(self.backend.open_channel(&session.identity_id))
            .await
            .map_err(|e| {
                if e.is_transport() {
                    self.unavailable(&e)
                } else {
                    GatewayError::Rejected(e.to_string())
                }
            })?;
        self.sessions.attach_downstream_token(&session.token, token.clone());
        Ok(token)
    }

    async fn dispatch(&self, session: &Session, command: &Command) -> Result<Value, GatewayError> {
        let mut reopened = false;
        let mut downstream = match &session.downstream_token {
            Some(token) => token.clone(),
            None => {
                reopened = true;
                self.open_channel(session).await?
            }
        };

        loop {
            match self.with_timeout(self.backend.dispatch(&downstream, command)).await {
                Ok(result) => return Ok(result),
                // Execution service restarted and forgot the channel; reopen once.
                Err(UpstreamError::InvalidChannel) if !reopened => {
                    self.sessions.clear_downstream_token(&session.token);
                    downstream = self.open_channel(session).await?;
                    reopened = true;
                }
                Err(e) if e.is_transport() => return Err(self.unavailable(&e)),
                Err(e) => {
                    warn!(identity_id = %session.identity_id, operation = %command.operation, error = %e, "Execution service rejected command");
                    return Err(GatewayError::Rejected(e.to_string()));
                }
            }
        }
    }

    /// Revoke a session or every session of an identity.
    ///
    /// Any caller may revoke its own token; anything else needs `privileged-controller`.
    pub async fn revoke(&self, token: &SessionToken, target: RevocationTarget, reason: &str) -> Result<usize, GatewayError> {
        let (session, identity) = self.authorize_session(token).await?;
        let own_token = matches!(&target, RevocationTarget::Token(t) if *t == session.token || t == token);

        if !own_token && !identity.is_controller() {
            self.deny(
                &identity.id,
                "revoke_session",
                Some(PermissionTier::Critical),
                "revoking other sessions requires privileged-controller tier".into(),
            );
            self.monitor.authorization_denied(&identity.id, "revoke_session");
            return Err(GatewayError::AuthorizationFailure);
        }

        let tier = if own_token { None } else { Some(PermissionTier::Critical) };
        self.allow(&identity.id, "revoke_session", tier);
        let count = match target {
            RevocationTarget::Token(t) => usize::from(self.sessions.revoke_token(&t, reason)),
            RevocationTarget::Identity(id) => self.sessions.revoke_identity(&id, reason),
        };
        Ok(count)
    }

    /// Read-only status snapshot. Any valid session may read it.
    pub async fn status(&self, token: &SessionToken) -> Result<GatewayStatus, GatewayError> {
        let (_, identity) = self.authorize_session(token).await?;
        info!(identity_id = %identity.id, "Status read");
        Ok(self.snapshot())
    }

    pub fn snapshot(&self) -> GatewayStatus {
        let security = self.monitor.state().snapshot();
        let stop = self.stop_record.lock().clone();
        GatewayStatus {
            active_sessions: security.active_sessions,
            security_breaches: security.security_breaches,
            threat_level: security.threat_level,
            isolation_flags: IsolationFlags {
                execution_enabled: self.is_execution_enabled(),
                execution_service_remote: self.backend.is_remote(),
                stopped_by: stop.as_ref().map(|(id, _)| id.clone()),
                stopped_at: stop.map(|(_, at)| at),
            },
        }
    }

    /// Resolve `token` and require the `privileged-controller` tier for `action`.
    /// Denials are audited and counted.
    pub async fn require_controller(&self, token: &SessionToken, action: &str) -> Result<Identity, GatewayError> {
        let (_, identity) = self.authorize_session(token).await?;
        if !identity.is_controller() {
            self.deny(&identity.id, action, None, format!("{} requires privileged-controller tier", action));
            self.monitor.authorization_denied(&identity.id, action);
            return Err(GatewayError::AuthorizationFailure);
        }
        Ok(identity)
    }

    /// Resolve `token` and require that the session acts as `claimed`.
    pub async fn require_self(&self, token: &SessionToken, claimed: &str, action: &str) -> Result<Identity, GatewayError> {
        let (_, identity) = self.authorize_session(token).await?;
        if identity.id.as_str() != claimed {
            self.deny(&identity.id, action, None, format!("session cannot act as '{}'", claimed));
            self.monitor.authorization_denied(&identity.id, action);
            return Err(GatewayError::AuthorizationFailure);
        }
        Ok(identity)
    }

    /// Recent audit entries, newest first. Controller only.
    pub async fn audit_entries(&self, token: &SessionToken, limit: usize) -> Result<Vec<AuditEntry>, GatewayError> {
        self.require_controller(token, "read_audit").await?;
        Ok(self.audit.recent(limit))
    }
}
