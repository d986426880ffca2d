// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Execution Service HTTP Client
//
// Anti-Corruption Layer for a separately launched `warden execution-service`.
// Every request body is signed with the shared execution link key.
// Error bodies returned by the service are decoded back into `UpstreamError`;
// anything the client cannot decode is treated as the service being unreachable.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::command::Command;
use crate::domain::execution::{
    DispatchRequest, DispatchResponse, ExecutionBackend, OpenChannelRequest, OpenChannelResponse, UpstreamError,
};
use crate::domain::identity::IdentityId;
use crate::domain::session::DownstreamToken;
use crate::infrastructure::execution_link::ExecutionLink;
use crate::infrastructure::execution_service::{CHANNELS_PATH, DISPATCH_PATH};

pub struct HttpExecutionBackend {
    client: reqwest::Client,
    endpoint: String,
    link: Arc<ExecutionLink>,
}

impl HttpExecutionBackend {
    /// `timeout` bounds each request at the transport level; the gateway
    /// applies its own deadline on top.
    pub fn new(endpoint: impl Into<String>, timeout: Duration, link: Arc<ExecutionLink>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            link,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), path)
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, UpstreamError>
    where
        Req: serde::Serialize + ?Sized,
        Resp: serde::de::DeserializeOwned,
    {
        let payload = serde_json::to_vec(body).map_err(|e| UpstreamError::MalformedRequest(e.to_string()))?;
        let signature = self
            .link
            .sign(path, &payload)
            .await
            .map_err(|e| UpstreamError::Unreachable(format!("cannot sign request: {}", e)))?;

        let mut request = self
            .client
            .post(self.url(path))
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        for (name, value) in signature.headers() {
            request = request.header(name, value);
        }
        let response = request
            .body(payload)
            .send()
            .await
            .map_err(|e| UpstreamError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(serde_json::from_str::<UpstreamError>(&text)
                .unwrap_or_else(|_| UpstreamError::Unreachable(format!("HTTP {}: {}", status, text))));
        }

        response
            .json()
            .await
            .map_err(|e| UpstreamError::Unreachable(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl ExecutionBackend for HttpExecutionBackend {
    async fn open_channel(&self, identity_id: &IdentityId) -> Result<DownstreamToken, UpstreamError> {
        let request = OpenChannelRequest {
            identity_id: identity_id.clone(),
        };
        let response: OpenChannelResponse = self.post(CHANNELS_PATH, &request).await?;
        Ok(response.downstream_token)
    }

    async fn dispatch(&self, token: &DownstreamToken, command: &Command) -> Result<Value, UpstreamError> {
        let request = DispatchRequest {
            downstream_token: token.clone(),
            command: command.clone(),
        };
        let response: DispatchResponse = self.post(DISPATCH_PATH, &request).await?;
        Ok(response.result)
    }

    fn is_remote(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::SystemClock;
    use crate::domain::command::{Operation, Parameters};
    use crate::domain::secret_store::KeyMaterial;
    use crate::infrastructure::execution_service::{router, IsolatedExecutionService};

    async fn link(byte: u8) -> Arc<ExecutionLink> {
        Arc::new(
            ExecutionLink::from_material(
                KeyMaterial::from_bytes([byte; 32]),
                Arc::new(SystemClock),
                chrono::Duration::seconds(60),
            )
            .await
            .unwrap(),
        )
    }

    async fn spawn_service() -> String {
        let service = Arc::new(IsolatedExecutionService::acknowledging([IdentityId::new("worker-b")]));
        let app = router(service, link(1).await);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_roundtrip_against_live_service() {
        let endpoint = spawn_service().await;
        let backend = HttpExecutionBackend::new(endpoint, Duration::from_secs(5), link(1).await).unwrap();
        assert!(backend.is_remote());

        let token = backend.open_channel(&IdentityId::new("worker-b")).await.unwrap();
        let result = backend
            .dispatch(&token, &Command::new(Operation::Query, Parameters::new()))
            .await
            .unwrap();
        assert_eq!(result["operation"], "query");

        assert_eq!(
            backend.open_channel(&IdentityId::new("ghost")).await,
            Err(UpstreamError::UnauthorizedIdentity(IdentityId::new("ghost")))
        );
        assert_eq!(
            backend
                .dispatch(&DownstreamToken::generate(), &Command::new(Operation::Query, Parameters::new()))
                .await,
            Err(UpstreamError::InvalidChannel)
        );
    }

    #[tokio::test]
    async fn test_wrong_link_key_is_refused() {
        let endpoint = spawn_service().await;
        let backend = HttpExecutionBackend::new(endpoint, Duration::from_secs(5), link(2).await).unwrap();
        let err = backend.open_channel(&IdentityId::new("worker-b")).await.unwrap_err();
        assert_eq!(err, UpstreamError::LinkRejected);
        assert!(!err.is_transport());
    }

    #[tokio::test]
    async fn test_connection_refused_is_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend =
            HttpExecutionBackend::new(format!("http://{}", addr), Duration::from_secs(2), link(1).await).unwrap();
        let err = backend.open_channel(&IdentityId::new("worker-b")).await.unwrap_err();
        assert!(err.is_transport());
    }
}
