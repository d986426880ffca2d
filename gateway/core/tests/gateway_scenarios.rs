// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use warden_core::application::context::GatewayContext;
use warden_core::application::credential_verifier::{sign_challenge, AuthenticationRequest};
use warden_core::application::execution_gateway::RevocationTarget;
use warden_core::domain::clock::{Clock, ManualClock, SystemClock};
use warden_core::domain::command::{Command, Operation, Parameters};
use warden_core::domain::error::GatewayError;
use warden_core::domain::execution::{ExecutionBackend, UpstreamError};
use warden_core::domain::gateway_config::{GatewayConfigManifest, IdentityConfig};
use warden_core::domain::identity::{IdentityId, IdentityTier};
use warden_core::domain::secret_store::KeyMaterial;
use warden_core::domain::session::{DownstreamToken, SessionToken};
use warden_core::infrastructure::execution_link::ExecutionLink;
use warden_core::infrastructure::execution_service::{router, IsolatedExecutionService};

const CONTROLLER_KEY: &str = "a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1";
const WORKER_KEY: &str = "b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2";

fn identity(id: &str, tier: IdentityTier, caps: &[&str], key: &str) -> IdentityConfig {
    IdentityConfig {
        id: id.to_string(),
        tier,
        role: "generalist".to_string(),
        capabilities: caps.iter().map(|c| c.to_string()).collect(),
        key: Some(key.to_string()),
    }
}

fn config() -> GatewayConfigManifest {
    let mut config = GatewayConfigManifest::default();
    config.spec.identities = vec![
        identity("controller-a", IdentityTier::PrivilegedController, &[], CONTROLLER_KEY),
        identity(
            "worker-b",
            IdentityTier::WorkerAgent,
            &["read", "submit", "emergency_stop", "purge_state"],
            WORKER_KEY,
        ),
        identity("worker-star", IdentityTier::WorkerAgent, &["*"], WORKER_KEY),
    ];
    config
}

async fn harness() -> (GatewayContext, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let ctx = GatewayContext::build(config(), clock.clone()).await.unwrap();
    (ctx, clock)
}

fn key_for(id: &str) -> KeyMaterial {
    let hex = if id == "controller-a" { CONTROLLER_KEY } else { WORKER_KEY };
    KeyMaterial::from_hex(hex).unwrap()
}

fn auth_request(clock: &dyn Clock, id: &str, nonce: &str) -> AuthenticationRequest {
    let ts = clock.now().timestamp();
    AuthenticationRequest {
        identity_id: id.to_string(),
        timestamp: ts,
        nonce: nonce.to_string(),
        signature: sign_challenge(&key_for(id), id, ts, nonce),
    }
}

async fn login(ctx: &GatewayContext, id: &str, nonce: &str) -> SessionToken {
    ctx.gateway
        .authenticate(&auth_request(ctx.clock.as_ref(), id, nonce))
        .await
        .unwrap()
        .session_token
}

fn command(name: &str, params: Value) -> Command {
    let parameters: Parameters = serde_json::from_value(params).unwrap();
    Command::new(Operation::parse(name), parameters)
}

#[tokio::test]
async fn controller_stop_then_worker_stop_is_unauthorized() {
    let (ctx, _) = harness().await;
    let controller = login(&ctx, "controller-a", "c-1").await;
    let worker = login(&ctx, "worker-b", "w-1").await;

    let receipt = ctx.gateway.emergency_stop(&controller).await.unwrap();
    assert!(receipt.stopped);
    assert!(!ctx.gateway.is_execution_enabled());

    let breaches_before = ctx.security.snapshot().security_breaches;
    assert_eq!(
        ctx.gateway.emergency_stop(&worker).await,
        Err(GatewayError::AuthorizationFailure)
    );
    assert_eq!(ctx.security.snapshot().security_breaches, breaches_before + 1);

    let entries = ctx.audit.recent(10);
    let stop_allowed = entries
        .iter()
        .any(|e| e.identity_id.as_str() == "controller-a" && e.operation == "emergency_stop" && e.is_allowed());
    let stop_denied = entries
        .iter()
        .any(|e| e.identity_id.as_str() == "worker-b" && e.operation == "emergency_stop" && !e.is_allowed());
    assert!(stop_allowed);
    assert!(stop_denied);
}

#[tokio::test]
async fn emergency_stop_is_idempotent() {
    let (ctx, _) = harness().await;
    let controller = login(&ctx, "controller-a", "c-1").await;
    assert!(ctx.gateway.emergency_stop(&controller).await.unwrap().stopped);
    assert!(ctx.gateway.emergency_stop(&controller).await.unwrap().stopped);
    assert!(!ctx.gateway.is_execution_enabled());
}

#[tokio::test]
async fn critical_operations_ignore_capability_strings() {
    let (ctx, _) = harness().await;
    for (id, nonce) in [("worker-b", "w-1"), ("worker-star", "s-1")] {
        let token = login(&ctx, id, nonce).await;
        for op in ["emergency_stop", "purge_state", "resume_execution"] {
            let result = ctx
                .gateway
                .execute(&token, command(op, json!({ "confirmed": true })))
                .await;
            assert_eq!(result, Err(GatewayError::AuthorizationFailure), "{} ran {}", id, op);
        }
    }
    assert!(ctx.gateway.is_execution_enabled());
}

#[tokio::test]
async fn unknown_operations_are_denied_by_default() {
    let (ctx, _) = harness().await;
    let controller = login(&ctx, "controller-a", "c-1").await;
    assert_eq!(
        ctx.gateway.execute(&controller, command("format_disk", json!({}))).await,
        Err(GatewayError::AuthorizationFailure)
    );
}

#[tokio::test]
async fn halted_execution_blocks_dispatch_until_resume() {
    let (ctx, _) = harness().await;
    let controller = login(&ctx, "controller-a", "c-1").await;
    let worker = login(&ctx, "worker-b", "w-1").await;

    ctx.gateway.execute(&worker, command("submit", json!({}))).await.unwrap();
    ctx.gateway.emergency_stop(&controller).await.unwrap();

    assert_eq!(
        ctx.gateway.execute(&worker, command("submit", json!({}))).await,
        Err(GatewayError::ExecutionHalted)
    );
    assert_eq!(
        ctx.gateway.execute(&worker, command("query", json!({}))).await,
        Err(GatewayError::ExecutionHalted)
    );

    assert_eq!(
        ctx.gateway.execute(&controller, command("resume_execution", json!({}))).await,
        Err(GatewayError::ConfirmationRequired("resume_execution".into()))
    );
    ctx.gateway
        .execute(&controller, command("resume_execution", json!({ "confirmed": true })))
        .await
        .unwrap();

    let result = ctx.gateway.execute(&worker, command("submit", json!({}))).await.unwrap();
    assert_eq!(result["acknowledged"], true);
}

#[tokio::test]
async fn purge_state_requires_confirmation() {
    let (ctx, _) = harness().await;
    let controller = login(&ctx, "controller-a", "c-1").await;
    assert_eq!(
        ctx.gateway.execute(&controller, command("purge_state", json!({}))).await,
        Err(GatewayError::ConfirmationRequired("purge_state".into()))
    );
    let result = ctx
        .gateway
        .execute(&controller, command("purge_state", json!({ "confirmed": true })))
        .await
        .unwrap();
    assert_eq!(result["operation"], "purge_state");
}

#[tokio::test]
async fn session_ttl_is_exact_and_expiry_is_enforced() {
    let (ctx, clock) = harness().await;
    let token = login(&ctx, "worker-b", "w-1").await;

    let session = ctx.sessions.validate(&token).await.unwrap();
    assert_eq!(session.expires_at - session.issued_at, ctx.sessions.settings().ttl);

    clock.advance(ctx.sessions.settings().ttl);
    assert!(ctx.sessions.validate(&token).await.is_ok());

    clock.advance(Duration::seconds(1));
    assert_eq!(ctx.sessions.validate(&token).await.err(), Some(GatewayError::SessionExpired));
    assert_eq!(ctx.security.snapshot().active_sessions, 0);
}

#[tokio::test]
async fn replay_after_freshness_window_fails() {
    let (ctx, clock) = harness().await;
    let request = auth_request(clock.as_ref(), "worker-b", "replayed");
    assert!(ctx.gateway.authenticate(&request).await.is_ok());
    assert_eq!(
        ctx.gateway.authenticate(&request).await.err(),
        Some(GatewayError::AuthenticationFailure)
    );

    clock.advance(ctx.config.spec.auth.freshness_window() + Duration::seconds(1));
    assert_eq!(
        ctx.gateway.authenticate(&request).await.err(),
        Some(GatewayError::AuthenticationFailure)
    );
}

#[tokio::test]
async fn rotation_keeps_old_token_only_during_grace() {
    let (ctx, clock) = harness().await;
    let original = login(&ctx, "worker-b", "w-1").await;

    clock.advance(ctx.sessions.settings().rotation_interval);
    let outcome = ctx.gateway.heartbeat(&original).await.unwrap();
    assert!(outcome.rotated);
    assert_ne!(outcome.session_token, original);

    let successor = ctx.sessions.validate(&outcome.session_token).await.unwrap();
    assert_eq!(successor.expires_at - successor.issued_at, ctx.sessions.settings().ttl);

    // Old token resolves to the successor while in grace.
    let in_flight = ctx.sessions.validate(&original).await.unwrap();
    assert_eq!(in_flight.token, outcome.session_token);
    assert!(ctx.gateway.execute(&original, command("query", json!({}))).await.is_ok());

    clock.advance(ctx.sessions.settings().rotation_grace + Duration::seconds(1));
    assert_eq!(ctx.sessions.validate(&original).await.err(), Some(GatewayError::SessionExpired));
    assert!(ctx.sessions.validate(&outcome.session_token).await.is_ok());
    assert_eq!(ctx.security.snapshot().active_sessions, 1);
}

#[tokio::test]
async fn sweep_evicts_expired_sessions_and_keeps_counter_consistent() {
    let (ctx, clock) = harness().await;
    login(&ctx, "worker-b", "w-1").await;
    login(&ctx, "worker-star", "s-1").await;
    clock.advance(Duration::minutes(30));
    let late = login(&ctx, "controller-a", "c-1").await;
    assert_eq!(ctx.security.snapshot().active_sessions, 3);

    clock.advance(Duration::minutes(31));
    assert_eq!(ctx.sessions.sweep(), 2);
    assert_eq!(ctx.sessions.len(), 1);
    assert_eq!(ctx.security.snapshot().active_sessions, 1);
    assert!(ctx.sessions.validate(&late).await.is_ok());
}

#[tokio::test]
async fn controller_revokes_identity_sessions() {
    let (ctx, _) = harness().await;
    let controller = login(&ctx, "controller-a", "c-1").await;
    let worker = login(&ctx, "worker-b", "w-1").await;

    assert_eq!(
        ctx.gateway
            .revoke(&worker, RevocationTarget::Identity(IdentityId::new("controller-a")), "nope")
            .await,
        Err(GatewayError::AuthorizationFailure)
    );

    let count = ctx
        .gateway
        .revoke(&controller, RevocationTarget::Identity(IdentityId::new("worker-b")), "rotation drill")
        .await
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(
        ctx.gateway.execute(&worker, command("query", json!({}))).await,
        Err(GatewayError::SessionRevoked)
    );
}

struct SlowBackend;

#[async_trait]
impl ExecutionBackend for SlowBackend {
    async fn open_channel(&self, _identity_id: &IdentityId) -> Result<DownstreamToken, UpstreamError> {
        Ok(DownstreamToken::generate())
    }

    async fn dispatch(&self, _token: &DownstreamToken, _command: &Command) -> Result<Value, UpstreamError> {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        Ok(Value::Null)
    }

    fn is_remote(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn slow_execution_service_yields_upstream_unavailable() {
    let mut config = config();
    config.spec.execution.timeout_secs = 1;
    config.spec.execution.retry_after_secs = 7;
    let ctx = GatewayContext::with_backend(config, Arc::new(ManualClock::new(Utc::now())), Arc::new(SlowBackend))
        .await
        .unwrap();
    let worker = login(&ctx, "worker-b", "w-1").await;

    let err = ctx
        .gateway
        .execute(&worker, command("submit", json!({})))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(
        err,
        GatewayError::UpstreamUnavailable {
            retry_after: std::time::Duration::from_secs(7)
        }
    );
    // The gateway itself stays usable.
    assert!(ctx.gateway.status(&worker).await.is_ok());
}

#[tokio::test]
async fn forgotten_channel_is_reopened_once() {
    let ids = ["controller-a", "worker-b", "worker-star"].map(IdentityId::new);
    let service = Arc::new(IsolatedExecutionService::acknowledging(ids));
    let ctx = GatewayContext::with_backend(config(), Arc::new(ManualClock::new(Utc::now())), service.clone())
        .await
        .unwrap();
    let worker = login(&ctx, "worker-b", "w-1").await;

    ctx.gateway.execute(&worker, command("submit", json!({}))).await.unwrap();
    assert_eq!(service.open_channel_count(), 1);

    // Simulates an execution-service restart that dropped every channel.
    service.deauthorize(&IdentityId::new("worker-b")).await;
    service.authorize(IdentityId::new("worker-b")).await;
    assert_eq!(service.open_channel_count(), 0);

    ctx.gateway.execute(&worker, command("submit", json!({}))).await.unwrap();
    assert_eq!(service.open_channel_count(), 1);
}

#[tokio::test]
async fn deauthorized_identity_is_rejected_downstream() {
    let service = Arc::new(IsolatedExecutionService::acknowledging([IdentityId::new("controller-a")]));
    let ctx = GatewayContext::with_backend(config(), Arc::new(ManualClock::new(Utc::now())), service)
        .await
        .unwrap();
    let worker = login(&ctx, "worker-b", "w-1").await;
    let err = ctx
        .gateway
        .execute(&worker, command("submit", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Rejected(_)));
    assert!(!err.is_retryable());
}

const LINK_KEY: &str = "c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3";

async fn spawn_linked_service() -> String {
    let link = ExecutionLink::from_material(
        KeyMaterial::from_hex(LINK_KEY).unwrap(),
        Arc::new(SystemClock),
        Duration::seconds(300),
    )
    .await
    .unwrap();
    let service = Arc::new(IsolatedExecutionService::acknowledging([
        IdentityId::new("controller-a"),
        IdentityId::new("worker-b"),
    ]));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(service, Arc::new(link))).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn remote_harness(endpoint: String, service_key: &str) -> GatewayContext {
    let mut config = config();
    config.spec.execution.endpoint = Some(endpoint);
    config.spec.execution.service_key = Some(service_key.to_string());
    config.validate().unwrap();
    GatewayContext::build(config, Arc::new(SystemClock)).await.unwrap()
}

#[tokio::test]
async fn remote_execution_service_accepts_only_the_linked_gateway() {
    let endpoint = spawn_linked_service().await;

    let linked = remote_harness(endpoint.clone(), LINK_KEY).await;
    let worker = login(&linked, "worker-b", "w-remote").await;
    let result = linked
        .gateway
        .execute(&worker, command("query", json!({})))
        .await
        .unwrap();
    assert_eq!(result["caller"], "worker-b");

    let foreign = remote_harness(endpoint, CONTROLLER_KEY).await;
    let worker = login(&foreign, "worker-b", "w-foreign").await;
    assert!(matches!(
        foreign.gateway.execute(&worker, command("query", json!({}))).await,
        Err(GatewayError::Rejected(_))
    ));
}
