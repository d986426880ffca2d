// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Gateway HTTP routes.
//!
//! | Method | Path | Auth |
//! |--------|------|------|
//! | `POST` | `/v1/auth` | signed challenge |
//! | `POST` | `/v1/sessions/heartbeat` | Bearer |
//! | `POST` | `/v1/sessions/revoke` | Bearer |
//! | `POST` | `/v1/execute` | Bearer or `session_token` in body |
//! | `POST` | `/v1/emergency-stop` | Bearer or `session_token` in body |
//! | `GET` | `/v1/status` | Bearer |
//! | `GET` | `/v1/audit` | Bearer, controller |
//! | `GET` | `/v1/events` | Bearer, controller (SSE) |
//! | `GET` | `/health` | none |
//!
//! Error bodies are always `{"success": false, "error": <message>}` where the
//! message is the uniform `Display` text of [`GatewayError`].

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::application::credential_verifier::AuthenticationRequest;
use crate::application::execution_gateway::{ExecutionGateway, RevocationTarget};
use crate::domain::command::{Command, Operation, Parameters};
use crate::domain::error::GatewayError;
use crate::domain::identity::IdentityId;
use crate::domain::session::SessionToken;
use crate::infrastructure::event_bus::{DomainEvent, EventBus};

const DEFAULT_AUDIT_LIMIT: usize = 100;

pub struct AppState {
    pub gateway: Arc<ExecutionGateway>,
    pub event_bus: EventBus,
    pub started: Instant,
}

pub fn app(gateway: Arc<ExecutionGateway>, event_bus: EventBus) -> Router {
    let state = Arc::new(AppState {
        gateway,
        event_bus,
        started: Instant::now(),
    });

    Router::new()
        .route("/health", get(health))
        .route("/v1/auth", post(authenticate))
        .route("/v1/sessions/heartbeat", post(heartbeat))
        .route("/v1/sessions/revoke", post(revoke_session))
        .route("/v1/execute", post(execute))
        .route("/v1/emergency-stop", post(emergency_stop))
        .route("/v1/status", get(status))
        .route("/v1/audit", get(audit))
        .route("/v1/events", get(events))
        .with_state(state)
}

/// HTTP projection of a [`GatewayError`].
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            GatewayError::AuthenticationFailure | GatewayError::SessionExpired | GatewayError::SessionRevoked => {
                StatusCode::UNAUTHORIZED
            }
            GatewayError::AuthorizationFailure => StatusCode::FORBIDDEN,
            GatewayError::ExecutionHalted | GatewayError::ConfirmationRequired(_) => StatusCode::CONFLICT,
            GatewayError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "success": false, "error": self.0.to_string() }));
        let mut response = (status, body).into_response();

        match &self.0 {
            GatewayError::UpstreamUnavailable { retry_after } => {
                let secs = retry_after.as_secs().max(1).to_string();
                if let Ok(value) = HeaderValue::from_str(&secs) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
            }
            GatewayError::AuthenticationFailure | GatewayError::SessionExpired | GatewayError::SessionRevoked => {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            _ => {}
        }
        response
    }
}

/// Extract the session token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<SessionToken, GatewayError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(SessionToken::from_raw)
        .ok_or(GatewayError::AuthenticationFailure)
}

/// A token in the body wins over the header.
fn resolve_token(headers: &HeaderMap, body_token: Option<SessionToken>) -> Result<SessionToken, GatewayError> {
    match body_token {
        Some(token) => Ok(token),
        None => bearer_token(headers),
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenBody {
    #[serde(default)]
    session_token: Option<SessionToken>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub session_token: Option<SessionToken>,
    pub operation: String,
    #[serde(default)]
    pub parameters: Parameters,
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    #[serde(default)]
    pub target_token: Option<SessionToken>,
    #[serde(default)]
    pub target_identity: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl RevokeRequest {
    fn target(self) -> Result<(RevocationTarget, String), GatewayError> {
        let reason = self.reason.unwrap_or_else(|| "revoked by request".to_string());
        match (self.target_token, self.target_identity) {
            (Some(token), None) => Ok((RevocationTarget::Token(token), reason)),
            (None, Some(id)) if !id.trim().is_empty() => Ok((RevocationTarget::Identity(IdentityId::new(id)), reason)),
            _ => Err(GatewayError::InvalidRequest(
                "exactly one of target_token or target_identity is required".into(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "execution_enabled": state.gateway.is_execution_enabled(),
        "uptime_seconds": state.started.elapsed().as_secs(),
    }))
}

async fn authenticate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AuthenticationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state.gateway.authenticate(&request).await?;
    Ok(Json(response))
}

async fn heartbeat(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers)?;
    let outcome = state.gateway.heartbeat(&token).await?;
    Ok(Json(outcome))
}

async fn revoke_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RevokeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers)?;
    let (target, reason) = request.target()?;
    let revoked = state.gateway.revoke(&token, target, &reason).await?;
    Ok(Json(json!({ "revoked": revoked })))
}

async fn execute(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ExecuteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let token = resolve_token(&headers, request.session_token)?;
    let command = Command::new(Operation::parse(&request.operation), request.parameters);
    let result = state.gateway.execute(&token, command).await?;
    Ok(Json(json!({ "success": true, "result": result })))
}

async fn emergency_stop(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    // The body is optional so the stop works with nothing but a header.
    let parsed: TokenBody = if body.is_empty() {
        TokenBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| GatewayError::InvalidRequest(e.to_string()))?
    };
    let token = resolve_token(&headers, parsed.session_token)?;
    let receipt = state.gateway.emergency_stop(&token).await?;
    Ok(Json(receipt))
}

async fn status(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers)?;
    Ok(Json(state.gateway.status(&token).await?))
}

async fn audit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AuditQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers)?;
    let limit = query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT);
    Ok(Json(state.gateway.audit_entries(&token, limit).await?))
}

fn event_name(event: &DomainEvent) -> &'static str {
    match event {
        DomainEvent::Security(_) => "security",
        DomainEvent::Messaging(_) => "messaging",
    }
}

async fn events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let token = bearer_token(&headers)?;
    state.gateway.require_controller(&token, "stream_events").await?;

    let receiver = state.event_bus.subscribe().into_inner();
    let stream = BroadcastStream::new(receiver).filter_map(|item| match item {
        Ok(event) => Some(Event::default().event(event_name(&event)).json_data(&event)),
        Err(lagged) => {
            debug!(error = %lagged, "Event stream subscriber lagged");
            None
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
