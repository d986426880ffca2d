// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Messaging HTTP routes.
//!
//! | Method | Path | Acts as |
//! |--------|------|---------|
//! | `POST` | `/v1/messages` | `sender_id` (must be the session identity) |
//! | `GET` | `/v1/messages/safe` | `requesting_identity` (defaults to the session identity) |
//! | `GET` | `/v1/messages/{id}` | recipient |
//! | `GET` | `/v1/insights` | session identity |
//!
//! All routes take `Authorization: Bearer <session_token>`.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use warden_core::application::execution_gateway::ExecutionGateway;
use warden_core::domain::error::GatewayError;
use warden_core::presentation::api::{bearer_token, ApiError};

use crate::application::message_bus::{MessageBus, SendMessageRequest, SendMessageResponse};
use crate::domain::error::MessagingError;
use crate::domain::message::MessageId;

const DEFAULT_SAFE_LIMIT: usize = 20;
const MAX_SAFE_LIMIT: usize = 200;

pub struct MeshState {
    pub gateway: Arc<ExecutionGateway>,
    pub bus: Arc<MessageBus>,
}

pub fn app(gateway: Arc<ExecutionGateway>, bus: Arc<MessageBus>) -> Router {
    let state = Arc::new(MeshState { gateway, bus });

    Router::new()
        .route("/v1/messages", post(send_message))
        .route("/v1/messages/safe", get(fetch_safe))
        .route("/v1/messages/{id}", get(open_message))
        .route("/v1/insights", get(insights))
        .with_state(state)
}

#[derive(Debug)]
pub enum MeshApiError {
    Gateway(GatewayError),
    Messaging(MessagingError),
}

impl From<GatewayError> for MeshApiError {
    fn from(e: GatewayError) -> Self {
        Self::Gateway(e)
    }
}

impl From<MessagingError> for MeshApiError {
    fn from(e: MessagingError) -> Self {
        Self::Messaging(e)
    }
}

fn messaging_status(e: &MessagingError) -> StatusCode {
    match e {
        MessagingError::UnknownIdentity(_) | MessagingError::MessageNotFound(_) => StatusCode::NOT_FOUND,
        MessagingError::NotRecipient(_) => StatusCode::FORBIDDEN,
        MessagingError::EncryptionFailure(_) | MessagingError::DecryptionFailure(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        MessagingError::KeyStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for MeshApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Gateway(e) => ApiError(e).into_response(),
            Self::Messaging(e) => {
                let body = Json(json!({ "success": false, "error": e.to_string() }));
                (messaging_status(&e), body).into_response()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SafeQuery {
    pub requesting_identity: Option<String>,
    pub limit: Option<usize>,
}

async fn send_message(
    State(state): State<Arc<MeshState>>,
    headers: HeaderMap,
    Json(request): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, MeshApiError> {
    let token = bearer_token(&headers)?;
    state.gateway.require_self(&token, &request.sender_id, "send_message").await?;
    let message_id = state.bus.send(request).await?;
    Ok(Json(SendMessageResponse { message_id }))
}

async fn fetch_safe(
    State(state): State<Arc<MeshState>>,
    headers: HeaderMap,
    Query(query): Query<SafeQuery>,
) -> Result<impl IntoResponse, MeshApiError> {
    let token = bearer_token(&headers)?;
    let identity = match &query.requesting_identity {
        Some(claimed) => state.gateway.require_self(&token, claimed, "fetch_safe_messages").await?,
        None => state.gateway.authorize_session(&token).await?.1,
    };
    let limit = query.limit.unwrap_or(DEFAULT_SAFE_LIMIT).min(MAX_SAFE_LIMIT);
    Ok(Json(state.bus.fetch_safe_messages(&identity.id, limit).await))
}

async fn open_message(
    State(state): State<Arc<MeshState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, MeshApiError> {
    let token = bearer_token(&headers)?;
    let (_, identity) = state.gateway.authorize_session(&token).await?;
    let id = Uuid::parse_str(&id)
        .map(MessageId)
        .map_err(|_| GatewayError::InvalidRequest(format!("'{}' is not a message id", id)))?;
    Ok(Json(state.bus.open_message(&identity.id, &id).await?))
}

async fn insights(State(state): State<Arc<MeshState>>, headers: HeaderMap) -> Result<impl IntoResponse, MeshApiError> {
    let token = bearer_token(&headers)?;
    let (_, identity) = state.gateway.authorize_session(&token).await?;
    Ok(Json(state.bus.insights_for(&identity.id)))
}
