// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Isolated Execution Service
//!
//! The dispatcher on the far side of the process boundary. It keeps its own
//! registry of identities allowed to open channels, hands out one
//! [`DownstreamToken`] per channel, and routes each dispatched [`Command`] to
//! an [`OperationHandler`].
//!
//! Business logic is not implemented here: the default handler acknowledges
//! every command it receives. Deployments register real handlers per
//! operation name.
//!
//! The service runs either in-process (it implements [`ExecutionBackend`]
//! directly) or behind [`router`] in the `warden execution-service` process.

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::domain::command::Command;
use crate::domain::execution::{
    DispatchRequest, DispatchResponse, ExecutionBackend, OpenChannelRequest, OpenChannelResponse, UpstreamError,
};
use crate::domain::identity::IdentityId;
use crate::domain::session::DownstreamToken;
use crate::infrastructure::execution_link::{ExecutionLink, LinkSignature};

#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn handle(&self, caller: &IdentityId, command: &Command) -> anyhow::Result<Value>;
}

/// Accepts every command and echoes what it was asked to do.
pub struct AcknowledgeHandler;

#[async_trait]
impl OperationHandler for AcknowledgeHandler {
    async fn handle(&self, caller: &IdentityId, command: &Command) -> anyhow::Result<Value> {
        Ok(json!({
            "acknowledged": true,
            "operation": command.operation.name(),
            "caller": caller.as_str(),
            "parameter_count": command.parameters.len(),
            "received_at": Utc::now(),
        }))
    }
}

pub struct IsolatedExecutionService {
    authorized: RwLock<HashSet<IdentityId>>,
    channels: DashMap<DownstreamToken, IdentityId>,
    handlers: HashMap<String, Arc<dyn OperationHandler>>,
    fallback: Option<Arc<dyn OperationHandler>>,
}

impl IsolatedExecutionService {
    /// Service with no handlers; every dispatch fails with `NoHandler`.
    pub fn new(authorized: impl IntoIterator<Item = IdentityId>) -> Self {
        Self {
            authorized: RwLock::new(authorized.into_iter().collect()),
            channels: DashMap::new(),
            handlers: HashMap::new(),
            fallback: None,
        }
    }

    /// Service whose fallback handler acknowledges every command.
    pub fn acknowledging(authorized: impl IntoIterator<Item = IdentityId>) -> Self {
        Self::new(authorized).with_fallback(Arc::new(AcknowledgeHandler))
    }

    pub fn with_handler(mut self, operation: impl Into<String>, handler: Arc<dyn OperationHandler>) -> Self {
        self.handlers.insert(operation.into(), handler);
        self
    }

    pub fn with_fallback(mut self, handler: Arc<dyn OperationHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    pub async fn authorize(&self, identity_id: IdentityId) {
        self.authorized.write().await.insert(identity_id);
    }

    /// Remove an identity and close all of its channels.
    pub async fn deauthorize(&self, identity_id: &IdentityId) {
        self.authorized.write().await.remove(identity_id);
        self.channels.retain(|_, owner| owner != identity_id);
    }

    pub fn open_channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[async_trait]
impl ExecutionBackend for IsolatedExecutionService {
    async fn open_channel(&self, identity_id: &IdentityId) -> Result<DownstreamToken, UpstreamError> {
        if !self.authorized.read().await.contains(identity_id) {
            warn!(identity_id = %identity_id, "Channel refused: identity not in execution registry");
            return Err(UpstreamError::UnauthorizedIdentity(identity_id.clone()));
        }
        let token = DownstreamToken::generate();
        self.channels.insert(token.clone(), identity_id.clone());
        debug!(identity_id = %identity_id, "Opened execution channel");
        Ok(token)
    }

    async fn dispatch(&self, token: &DownstreamToken, command: &Command) -> Result<Value, UpstreamError> {
        let caller = self
            .channels
            .get(token)
            .map(|entry| entry.value().clone())
            .ok_or(UpstreamError::InvalidChannel)?;

        // Registry is re-checked on every dispatch so deauthorization is immediate.
        if !self.authorized.read().await.contains(&caller) {
            return Err(UpstreamError::UnauthorizedIdentity(caller));
        }

        let name = command.operation.name();
        let handler = self
            .handlers
            .get(name)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| UpstreamError::NoHandler(name.to_string()))?;

        info!(identity_id = %caller, operation = %name, "Dispatching command");
        handler
            .handle(&caller, command)
            .await
            .map_err(|e| UpstreamError::HandlerFailed(e.to_string()))
    }

    fn is_remote(&self) -> bool {
        false
    }
}

pub const CHANNELS_PATH: &str = "/internal/channels";
pub const DISPATCH_PATH: &str = "/internal/dispatch";

#[derive(Clone)]
struct ServiceState {
    service: Arc<IsolatedExecutionService>,
    link: Arc<ExecutionLink>,
}

/// HTTP surface for the standalone `warden execution-service` process.
///
/// Every request must carry a valid [`ExecutionLink`] signature; the body is
/// only parsed once the signature over its raw bytes has verified.
pub fn router(service: Arc<IsolatedExecutionService>, link: Arc<ExecutionLink>) -> Router {
    Router::new()
        .route(CHANNELS_PATH, post(open_channel_handler))
        .route(DISPATCH_PATH, post(dispatch_handler))
        .with_state(ServiceState { service, link })
}

async fn authenticated<T: serde::de::DeserializeOwned>(
    state: &ServiceState,
    path: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<T, UpstreamError> {
    let signature = LinkSignature::from_headers(headers);
    state
        .link
        .verify(path, signature.as_ref(), body)
        .await
        .map_err(|_| UpstreamError::LinkRejected)?;
    serde_json::from_slice(body).map_err(|e| UpstreamError::MalformedRequest(e.to_string()))
}

async fn open_channel_handler(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<OpenChannelResponse>, UpstreamError> {
    let req: OpenChannelRequest = authenticated(&state, CHANNELS_PATH, &headers, &body).await?;
    let downstream_token = state.service.open_channel(&req.identity_id).await?;
    Ok(Json(OpenChannelResponse { downstream_token }))
}

async fn dispatch_handler(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DispatchResponse>, UpstreamError> {
    let req: DispatchRequest = authenticated(&state, DISPATCH_PATH, &headers, &body).await?;
    let result = state.service.dispatch(&req.downstream_token, &req.command).await?;
    Ok(Json(DispatchResponse { result }))
}

impl IntoResponse for UpstreamError {
    fn into_response(self) -> Response {
        let status = match &self {
            UpstreamError::Unreachable(_) => StatusCode::BAD_GATEWAY,
            UpstreamError::UnauthorizedIdentity(_) => StatusCode::FORBIDDEN,
            UpstreamError::InvalidChannel => StatusCode::UNAUTHORIZED,
            UpstreamError::NoHandler(_) => StatusCode::NOT_FOUND,
            UpstreamError::HandlerFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            UpstreamError::LinkRejected => StatusCode::UNAUTHORIZED,
            UpstreamError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(self)).into_response()
    }
}
