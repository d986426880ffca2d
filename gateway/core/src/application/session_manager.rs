// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Session Manager
//!
//! Owns the session store. All mutation happens under one `parking_lot`
//! mutex that is never held across an `.await`: MAC computation and
//! verification run against the secret store between lock scopes, and the
//! store state is re-checked after re-acquiring the lock.
//!
//! ## Rotation
//!
//! A heartbeat on a session older than `rotation_interval` mints a successor
//! token with a fresh TTL and marks the old record `Rotated { successor }`.
//! During `rotation_grace` the old token resolves to the successor, so
//! requests already in flight keep validating. After the grace window the old
//! token fails with `SessionExpired`, and the sweeper evicts the record.
//!
//! ## Tombstones
//!
//! The sweeper keeps the SHA-256 digest of every token it evicts, with the
//! terminal error that token earned, until one TTL past the record's
//! `expires_at`. A late caller presenting such a token gets `SessionExpired`
//! or `SessionRevoked` and is not counted as a breach. The tombstone table is
//! capped at `tombstone_capacity`, dropping the soonest-to-lapse entries first.
//!
//! ## Counters
//!
//! `active_sessions` goes up on mint and down when an active session expires
//! or is revoked. Rotation does not change it.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::security_monitor::SecurityMonitor;
use crate::domain::clock::Clock;
use crate::domain::error::{AuthFailureReason, GatewayError};
use crate::domain::events::SecurityEvent;
use crate::domain::gateway_config::AuthConfig;
use crate::domain::identity::{Identity, IdentityId};
use crate::domain::secret_store::{KeyHandle, SecretStore};
use crate::domain::session::{DownstreamToken, Session, SessionStatus, SessionToken, SESSION_AUTHORITY};
use crate::infrastructure::event_bus::EventBus;

/// Longest successor chain followed when resolving a rotated token.
const MAX_ROTATION_HOPS: usize = 8;

pub const DEFAULT_TOMBSTONE_CAPACITY: usize = 65_536;

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub ttl: Duration,
    pub rotation_interval: Duration,
    pub rotation_grace: Duration,
    pub tombstone_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&AuthConfig::default())
    }
}

impl From<&AuthConfig> for SessionSettings {
    fn from(auth: &AuthConfig) -> Self {
        Self {
            ttl: auth.session_ttl(),
            rotation_interval: auth.rotation_interval(),
            rotation_grace: auth.rotation_grace(),
            tombstone_capacity: DEFAULT_TOMBSTONE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedSession {
    pub session_token: SessionToken,
    pub identity_id: IdentityId,
    pub expires_at: DateTime<Utc>,
    /// Seconds until expiry.
    pub expires_in: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatOutcome {
    pub session_token: SessionToken,
    pub expires_in: i64,
    pub rotated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TombstoneKind {
    Expired,
    Revoked,
}

#[derive(Debug, Clone, Copy)]
struct Tombstone {
    kind: TombstoneKind,
    until: DateTime<Utc>,
}

impl Tombstone {
    fn error(&self) -> GatewayError {
        match self.kind {
            TombstoneKind::Expired => GatewayError::SessionExpired,
            TombstoneKind::Revoked => GatewayError::SessionRevoked,
        }
    }
}

pub struct SessionManager {
    sessions: Mutex<HashMap<SessionToken, Session>>,
    // Locked after `sessions` whenever both are held.
    tombstones: Mutex<HashMap<[u8; 32], Tombstone>>,
    secrets: Arc<dyn SecretStore>,
    authority_key: KeyHandle,
    monitor: Arc<SecurityMonitor>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
}

enum Resolution {
    Live(Session),
    Failed(GatewayError),
}

impl SessionManager {
    /// Fetches (or creates) the session-authority key used to MAC session records.
    pub async fn new(
        secrets: Arc<dyn SecretStore>,
        monitor: Arc<SecurityMonitor>,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
    ) -> anyhow::Result<Self> {
        let authority_key = secrets.get_or_create_key(&IdentityId::new(SESSION_AUTHORITY)).await?;
        Ok(Self {
            sessions: Mutex::new(HashMap::new()),
            tombstones: Mutex::new(HashMap::new()),
            secrets,
            authority_key,
            monitor,
            event_bus,
            clock,
            settings,
        })
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    async fn mac_for(&self, token: &SessionToken, identity_id: &IdentityId, issued_at: DateTime<Utc>) -> Result<Vec<u8>, GatewayError> {
        self.secrets
            .compute_mac(&self.authority_key, &Session::mac_input(token, identity_id, issued_at))
            .await
            .map_err(|e| {
                warn!(error = %e, "Session authority key unavailable");
                GatewayError::AuthenticationFailure
            })
    }

    /// Mint a session for an identity the credential verifier has accepted.
    pub async fn mint(&self, identity: &Identity) -> Result<IssuedSession, GatewayError> {
        let now = self.clock.now();
        let token = SessionToken::generate();
        let mac = self.mac_for(&token, &identity.id, now).await?;
        let session = Session::new(token.clone(), identity.id.clone(), now, self.settings.ttl, mac);
        let expires_at = session.expires_at;

        self.sessions.lock().insert(token.clone(), session);
        self.monitor.state().session_opened();

        info!(identity_id = %identity.id, token = %token.fingerprint(), expires_at = %expires_at, "Session issued");
        self.event_bus.publish_security_event(SecurityEvent::SessionIssued {
            identity_id: identity.id.clone(),
            expires_at,
            issued_at: now,
        });

        Ok(IssuedSession {
            session_token: token,
            identity_id: identity.id.clone(),
            expires_at,
            expires_in: (expires_at - now).num_seconds(),
        })
    }

    /// Resolve `token` to its live session, following rotation within grace.
    fn resolve(&self, token: &SessionToken, now: DateTime<Utc>) -> Resolution {
        let mut sessions = self.sessions.lock();
        let mut current = token.clone();

        for _ in 0..MAX_ROTATION_HOPS {
            let Some(record) = sessions.get_mut(&current) else {
                let tombstones = self.tombstones.lock();
                return match tombstones.get(&current.digest()) {
                    Some(tombstone) if now <= tombstone.until => Resolution::Failed(tombstone.error()),
                    _ => Resolution::Failed(GatewayError::AuthenticationFailure),
                };
            };

            match record.status.clone() {
                SessionStatus::Active => {
                    if record.is_past_expiry(now) {
                        record.expire();
                        let identity_id = record.identity_id.clone();
                        drop(sessions);
                        self.monitor.state().session_closed();
                        debug!(identity_id = %identity_id, "Session expired on validation");
                        return Resolution::Failed(GatewayError::SessionExpired);
                    }
                    return Resolution::Live(record.clone());
                }
                SessionStatus::Rotated { successor, rotated_at } => {
                    if now - rotated_at > self.settings.rotation_grace {
                        return Resolution::Failed(GatewayError::SessionExpired);
                    }
                    current = successor;
                }
                SessionStatus::Expired => return Resolution::Failed(GatewayError::SessionExpired),
                SessionStatus::Revoked { .. } => return Resolution::Failed(GatewayError::SessionRevoked),
            }
        }

        Resolution::Failed(GatewayError::SessionExpired)
    }

    /// Validate a bearer token against the live store.
    pub async fn validate(&self, token: &SessionToken) -> Result<Session, GatewayError> {
        let now = self.clock.now();
        let session = match self.resolve(token, now) {
            Resolution::Live(session) => session,
            Resolution::Failed(GatewayError::AuthenticationFailure) => {
                self.monitor
                    .authentication_failed(&format!("token:{}", token.fingerprint()), AuthFailureReason::UnknownToken);
                return Err(GatewayError::AuthenticationFailure);
            }
            Resolution::Failed(err) => return Err(err),
        };

        let expected = self.mac_for(&session.token, &session.identity_id, session.issued_at).await?;
        if !bool::from(expected.as_slice().ct_eq(session.mac.as_slice())) {
            self.monitor
                .authentication_failed(session.identity_id.as_str(), AuthFailureReason::ForgedSession);
            self.revoke_token(&session.token, "session MAC mismatch");
            return Err(GatewayError::AuthenticationFailure);
        }

        Ok(session)
    }

    /// Record activity and rotate the token once it is old enough.
    pub async fn heartbeat(&self, token: &SessionToken) -> Result<HeartbeatOutcome, GatewayError> {
        let session = self.validate(token).await?;
        let now = self.clock.now();

        if !session.due_for_rotation(now, self.settings.rotation_interval) {
            let mut sessions = self.sessions.lock();
            if let Some(record) = sessions.get_mut(&session.token) {
                record.touch(now);
            }
            return Ok(HeartbeatOutcome {
                session_token: session.token.clone(),
                expires_in: session.expires_in(now).num_seconds(),
                rotated: false,
            });
        }

        let successor_token = SessionToken::generate();
        let mac = self.mac_for(&successor_token, &session.identity_id, now).await?;

        let mut sessions = self.sessions.lock();
        let Some(record) = sessions.get_mut(&session.token) else {
            return Err(GatewayError::SessionExpired);
        };
        match record.status.clone() {
            SessionStatus::Active => {}
            // A concurrent heartbeat already rotated this session.
            SessionStatus::Rotated { successor, .. } => {
                let expires_in = sessions
                    .get(&successor)
                    .map(|s| s.expires_in(now).num_seconds())
                    .unwrap_or(0);
                return Ok(HeartbeatOutcome {
                    session_token: successor,
                    expires_in,
                    rotated: true,
                });
            }
            SessionStatus::Expired => return Err(GatewayError::SessionExpired),
            SessionStatus::Revoked { .. } => return Err(GatewayError::SessionRevoked),
        }

        record.retire(successor_token.clone(), now);
        let downstream = record.downstream_token.clone();
        let identity_id = record.identity_id.clone();

        let mut successor = Session::new(successor_token.clone(), identity_id.clone(), now, self.settings.ttl, mac);
        successor.downstream_token = downstream;
        let expires_in = successor.expires_in(now).num_seconds();
        sessions.insert(successor_token.clone(), successor);
        drop(sessions);

        info!(
            identity_id = %identity_id,
            old = %session.token.fingerprint(),
            new = %successor_token.fingerprint(),
            "Session rotated"
        );
        self.event_bus.publish_security_event(SecurityEvent::SessionRotated {
            identity_id,
            rotated_at: now,
        });

        Ok(HeartbeatOutcome {
            session_token: successor_token,
            expires_in,
            rotated: true,
        })
    }

    /// Revoke the session behind `token`, including every token rotated into it.
    /// Returns false if nothing was revoked.
    pub fn revoke_token(&self, token: &SessionToken, reason: &str) -> bool {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock();

        let mut chain = vec![token.clone()];
        let mut current = token.clone();
        for _ in 0..MAX_ROTATION_HOPS {
            match sessions.get(&current).map(|s| &s.status) {
                Some(SessionStatus::Rotated { successor, .. }) => {
                    current = successor.clone();
                    chain.push(current.clone());
                }
                _ => break,
            }
        }

        let mut revoked_identity = None;
        let mut closed = 0usize;
        for t in &chain {
            if let Some(record) = sessions.get_mut(t) {
                if record.status.is_terminal() {
                    continue;
                }
                if record.is_active() {
                    closed += 1;
                }
                record.revoke(reason.to_string());
                revoked_identity = Some(record.identity_id.clone());
            }
        }
        drop(sessions);

        for _ in 0..closed {
            self.monitor.state().session_closed();
        }

        match revoked_identity {
            Some(identity_id) => {
                warn!(identity_id = %identity_id, token = %token.fingerprint(), reason = %reason, "Session revoked");
                self.event_bus.publish_security_event(SecurityEvent::SessionRevoked {
                    identity_id,
                    reason: reason.to_string(),
                    revoked_at: now,
                });
                true
            }
            None => false,
        }
    }

    /// Revoke every non-terminal session held by `identity_id`.
    pub fn revoke_identity(&self, identity_id: &IdentityId, reason: &str) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock();
        let mut revoked = 0usize;
        let mut closed = 0usize;
        for record in sessions.values_mut().filter(|s| &s.identity_id == identity_id) {
            if record.status.is_terminal() {
                continue;
            }
            if record.is_active() {
                closed += 1;
            }
            record.revoke(reason.to_string());
            revoked += 1;
        }
        drop(sessions);

        for _ in 0..closed {
            self.monitor.state().session_closed();
        }
        if revoked > 0 {
            warn!(identity_id = %identity_id, count = revoked, reason = %reason, "Sessions revoked for identity");
            self.event_bus.publish_security_event(SecurityEvent::SessionRevoked {
                identity_id: identity_id.clone(),
                reason: reason.to_string(),
                revoked_at: now,
            });
        }
        revoked
    }

    pub fn attach_downstream_token(&self, token: &SessionToken, downstream: DownstreamToken) {
        if let Some(record) = self.sessions.lock().get_mut(token) {
            record.downstream_token = Some(downstream);
        }
    }

    pub fn clear_downstream_token(&self, token: &SessionToken) {
        if let Some(record) = self.sessions.lock().get_mut(token) {
            record.downstream_token = None;
        }
    }

    /// Evict expired, revoked, and post-grace rotated records.
    /// Returns the number of active sessions that expired.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let grace = self.settings.rotation_grace;
        let mut expired = 0usize;

        let mut evicted: Vec<([u8; 32], Tombstone)> = Vec::new();
        let mut sessions = self.sessions.lock();
        sessions.retain(|token, record| {
            let kind = match &record.status {
                SessionStatus::Active => {
                    if !record.is_past_expiry(now) {
                        return true;
                    }
                    expired += 1;
                    TombstoneKind::Expired
                }
                SessionStatus::Rotated { rotated_at, .. } => {
                    if now - *rotated_at <= grace {
                        return true;
                    }
                    TombstoneKind::Expired
                }
                SessionStatus::Expired => TombstoneKind::Expired,
                SessionStatus::Revoked { .. } => TombstoneKind::Revoked,
            };
            evicted.push((
                token.digest(),
                Tombstone {
                    kind,
                    until: record.expires_at + self.settings.ttl,
                },
            ));
            false
        });
        let remaining = sessions.len();
        self.bury(evicted, now);
        drop(sessions);

        for _ in 0..expired {
            self.monitor.state().session_closed();
        }
        if expired > 0 {
            info!(count = expired, remaining, "Swept expired sessions");
            self.event_bus.publish_security_event(SecurityEvent::SessionsExpired {
                count: expired,
                swept_at: now,
            });
        }
        expired
    }

    fn bury(&self, evicted: Vec<([u8; 32], Tombstone)>, now: DateTime<Utc>) {
        let mut tombstones = self.tombstones.lock();
        tombstones.retain(|_, t| t.until >= now);
        tombstones.extend(evicted.into_iter().filter(|(_, t)| t.until >= now));

        let capacity = self.settings.tombstone_capacity.max(1);
        if tombstones.len() > capacity {
            let mut by_lapse: Vec<([u8; 32], DateTime<Utc>)> =
                tombstones.iter().map(|(digest, t)| (*digest, t.until)).collect();
            by_lapse.sort_by(|a, b| a.1.cmp(&b.1));
            let excess = tombstones.len() - capacity;
            for (digest, _) in by_lapse.into_iter().take(excess) {
                tombstones.remove(&digest);
            }
            debug!(dropped = excess, "Session tombstone table full");
        }
    }

    /// Tokens remembered after eviction.
    pub fn tombstone_count(&self) -> usize {
        self.tombstones.lock().len()
    }

    /// Run [`SessionManager::sweep`] every `interval` until `cancel` fires.
    pub fn spawn_sweeper(self: Arc<Self>, interval: std::time::Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Session sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.sweep();
                    }
                }
            }
        })
    }

    /// Number of records held, in any state.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().values().filter(|s| s.is_active()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;
    use crate::domain::identity::IdentityTier;
    use crate::domain::security_state::SecurityState;
    use crate::infrastructure::secret_store::InMemorySecretStore;

    struct Fixture {
        manager: Arc<SessionManager>,
        clock: Arc<ManualClock>,
        state: Arc<SecurityState>,
    }

    async fn fixture() -> Fixture {
        fixture_with(SessionSettings {
            ttl: Duration::hours(1),
            rotation_interval: Duration::minutes(15),
            rotation_grace: Duration::seconds(30),
            tombstone_capacity: DEFAULT_TOMBSTONE_CAPACITY,
        })
        .await
    }

    async fn fixture_with(settings: SessionSettings) -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let state = Arc::new(SecurityState::default());
        let bus = EventBus::new(64);
        let monitor = Arc::new(SecurityMonitor::new(state.clone(), bus.clone(), clock.clone()));
        let manager = SessionManager::new(Arc::new(InMemorySecretStore::new()), monitor, bus, clock.clone(), settings)
            .await
            .unwrap();
        Fixture {
            manager: Arc::new(manager),
            clock,
            state,
        }
    }

    fn worker() -> Identity {
        Identity::new("worker-b", IdentityTier::WorkerAgent)
    }

    #[tokio::test]
    async fn test_mint_sets_ttl_and_counts() {
        let f = fixture().await;
        let issued = f.manager.mint(&worker()).await.unwrap();
        assert_eq!(issued.expires_in, 3600);

        let session = f.manager.validate(&issued.session_token).await.unwrap();
        assert_eq!(session.expires_at - session.issued_at, Duration::hours(1));
        assert_eq!(f.state.snapshot().active_sessions, 1);
    }

    #[tokio::test]
    async fn test_expiry_is_lazy_and_terminal() {
        let f = fixture().await;
        let issued = f.manager.mint(&worker()).await.unwrap();

        f.clock.advance(Duration::hours(1));
        assert!(f.manager.validate(&issued.session_token).await.is_ok());

        f.clock.advance(Duration::seconds(1));
        assert_eq!(f.manager.validate(&issued.session_token).await, Err(GatewayError::SessionExpired));
        assert_eq!(f.state.snapshot().active_sessions, 0);
        assert_eq!(f.manager.validate(&issued.session_token).await, Err(GatewayError::SessionExpired));
        assert_eq!(f.state.snapshot().active_sessions, 0);
    }

    #[tokio::test]
    async fn test_unknown_token_is_auth_failure_and_breach() {
        let f = fixture().await;
        let bogus = SessionToken::generate();
        assert_eq!(f.manager.validate(&bogus).await, Err(GatewayError::AuthenticationFailure));
        assert_eq!(f.state.snapshot().security_breaches, 1);
    }

    #[tokio::test]
    async fn test_heartbeat_before_interval_does_not_rotate() {
        let f = fixture().await;
        let issued = f.manager.mint(&worker()).await.unwrap();
        f.clock.advance(Duration::minutes(5));
        let beat = f.manager.heartbeat(&issued.session_token).await.unwrap();
        assert!(!beat.rotated);
        assert_eq!(beat.session_token, issued.session_token);
        let session = f.manager.validate(&issued.session_token).await.unwrap();
        assert_eq!(session.last_activity, f.clock.now());
    }

    #[tokio::test]
    async fn test_rotation_grace_then_expiry() {
        let f = fixture().await;
        let issued = f.manager.mint(&worker()).await.unwrap();
        f.manager
            .attach_downstream_token(&issued.session_token, DownstreamToken::from_raw("ds-1"));

        f.clock.advance(Duration::minutes(15));
        let beat = f.manager.heartbeat(&issued.session_token).await.unwrap();
        assert!(beat.rotated);
        assert_ne!(beat.session_token, issued.session_token);
        assert_eq!(beat.expires_in, 3600);

        // Old token still resolves to the successor during grace.
        let via_old = f.manager.validate(&issued.session_token).await.unwrap();
        assert_eq!(via_old.token, beat.session_token);
        assert_eq!(via_old.downstream_token, Some(DownstreamToken::from_raw("ds-1")));
        assert_eq!(f.state.snapshot().active_sessions, 1);

        f.clock.advance(Duration::seconds(31));
        assert_eq!(f.manager.validate(&issued.session_token).await, Err(GatewayError::SessionExpired));
        assert!(f.manager.validate(&beat.session_token).await.is_ok());

        f.manager.sweep();
        assert_eq!(f.manager.len(), 1);
    }

    #[tokio::test]
    async fn test_revoke_token_follows_rotation_chain() {
        let f = fixture().await;
        let issued = f.manager.mint(&worker()).await.unwrap();
        f.clock.advance(Duration::minutes(15));
        let beat = f.manager.heartbeat(&issued.session_token).await.unwrap();

        assert!(f.manager.revoke_token(&issued.session_token, "admin"));
        assert_eq!(f.manager.validate(&beat.session_token).await, Err(GatewayError::SessionRevoked));
        assert_eq!(f.state.snapshot().active_sessions, 0);
        assert!(!f.manager.revoke_token(&issued.session_token, "again"));
    }

    #[tokio::test]
    async fn test_revoke_identity() {
        let f = fixture().await;
        let a = f.manager.mint(&worker()).await.unwrap();
        let b = f.manager.mint(&worker()).await.unwrap();
        let other = f
            .manager
            .mint(&Identity::new("controller-a", IdentityTier::PrivilegedController))
            .await
            .unwrap();

        assert_eq!(f.manager.revoke_identity(&IdentityId::new("worker-b"), "compromised"), 2);
        assert_eq!(f.manager.validate(&a.session_token).await, Err(GatewayError::SessionRevoked));
        assert_eq!(f.manager.validate(&b.session_token).await, Err(GatewayError::SessionRevoked));
        assert!(f.manager.validate(&other.session_token).await.is_ok());
        assert_eq!(f.state.snapshot().active_sessions, 1);
    }

    #[tokio::test]
    async fn test_sweep_evicts_and_keeps_counter_consistent() {
        let f = fixture().await;
        let _a = f.manager.mint(&worker()).await.unwrap();
        f.clock.advance(Duration::minutes(30));
        let b = f.manager.mint(&worker()).await.unwrap();
        assert_eq!(f.state.snapshot().active_sessions, 2);

        f.clock.advance(Duration::minutes(31));
        assert_eq!(f.manager.sweep(), 1);
        assert_eq!(f.manager.len(), 1);
        assert_eq!(f.state.snapshot().active_sessions, 1);
        assert!(f.manager.validate(&b.session_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let f = fixture().await;
        let cancel = CancellationToken::new();
        let handle = f
            .manager
            .clone()
            .spawn_sweeper(std::time::Duration::from_millis(10), cancel.clone());
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_forged_record_rejected() {
        let f = fixture().await;
        let issued = f.manager.mint(&worker()).await.unwrap();
        if let Some(record) = f.manager.sessions.lock().get_mut(&issued.session_token) {
            record.identity_id = IdentityId::new("controller-a");
        }
        assert_eq!(
            f.manager.validate(&issued.session_token).await,
            Err(GatewayError::AuthenticationFailure)
        );
        assert_eq!(f.manager.validate(&issued.session_token).await, Err(GatewayError::SessionRevoked));
    }

    #[tokio::test]
    async fn test_swept_tokens_fail_without_counting_breaches() {
        let f = fixture().await;
        let expiring = f.manager.mint(&worker()).await.unwrap();
        let revoked = f.manager.mint(&worker()).await.unwrap();
        let rotating = f.manager.mint(&worker()).await.unwrap();
        assert!(f.manager.revoke_token(&revoked.session_token, "operator request"));

        f.clock.advance(Duration::minutes(15));
        assert!(f.manager.heartbeat(&rotating.session_token).await.unwrap().rotated);

        f.clock.advance(Duration::minutes(46));
        assert_eq!(f.manager.sweep(), 1);
        assert_eq!(f.manager.len(), 1);
        assert_eq!(f.manager.tombstone_count(), 3);

        assert_eq!(f.manager.validate(&expiring.session_token).await, Err(GatewayError::SessionExpired));
        assert_eq!(f.manager.validate(&revoked.session_token).await, Err(GatewayError::SessionRevoked));
        assert_eq!(f.manager.validate(&rotating.session_token).await, Err(GatewayError::SessionExpired));
        assert_eq!(f.state.snapshot().security_breaches, 0);

        // Tombstones lapse one TTL after the record's own expiry.
        f.clock.advance(Duration::hours(1));
        assert_eq!(
            f.manager.validate(&expiring.session_token).await,
            Err(GatewayError::AuthenticationFailure)
        );
        assert_eq!(f.state.snapshot().security_breaches, 1);
        f.manager.sweep();
        assert_eq!(f.manager.tombstone_count(), 1);
    }

    #[tokio::test]
    async fn test_tombstone_table_is_bounded() {
        let f = fixture_with(SessionSettings {
            tombstone_capacity: 2,
            ..SessionSettings::default()
        })
        .await;
        let mut tokens = Vec::new();
        for _ in 0..3 {
            tokens.push(f.manager.mint(&worker()).await.unwrap().session_token);
            f.clock.advance(Duration::seconds(1));
        }
        assert_eq!(f.manager.revoke_identity(&IdentityId::new("worker-b"), "offboarded"), 3);
        f.manager.sweep();
        assert_eq!(f.manager.tombstone_count(), 2);

        // The earliest-lapsing token was dropped.
        assert_eq!(
            f.manager.validate(&tokens[0]).await,
            Err(GatewayError::AuthenticationFailure)
        );
        assert_eq!(f.manager.validate(&tokens[2]).await, Err(GatewayError::SessionRevoked));
    }
}
