// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Composition root for the gateway.
//!
//! Every process-wide store (identity registry, secret store, session store,
//! security counters, audit log, event bus) is created here exactly once and
//! shared by `Arc`. Dropping the context tears them down.

use anyhow::Context as _;
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::credential_verifier::CredentialVerifier;
use crate::application::execution_gateway::{ExecutionGateway, GatewaySettings};
use crate::application::security_monitor::SecurityMonitor;
use crate::application::session_manager::{SessionManager, SessionSettings};
use crate::domain::clock::Clock;
use crate::domain::execution::ExecutionBackend;
use crate::domain::gateway_config::GatewayConfigManifest;
use crate::domain::identity::{IdentityId, IdentityRepository, IdentityTier};
use crate::domain::secret_store::SecretStore;
use crate::domain::security_state::SecurityState;
use crate::infrastructure::audit::AuditLog;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::execution_client::HttpExecutionBackend;
use crate::infrastructure::execution_link::ExecutionLink;
use crate::infrastructure::execution_service::IsolatedExecutionService;
use crate::infrastructure::identity_repository::InMemoryIdentityRepository;
use crate::infrastructure::secret_store::InMemorySecretStore;

pub struct GatewayContext {
    pub config: GatewayConfigManifest,
    pub clock: Arc<dyn Clock>,
    pub event_bus: EventBus,
    pub security: Arc<SecurityState>,
    pub monitor: Arc<SecurityMonitor>,
    pub identities: Arc<dyn IdentityRepository>,
    pub secrets: Arc<dyn SecretStore>,
    pub sessions: Arc<SessionManager>,
    pub audit: Arc<AuditLog>,
    pub gateway: Arc<ExecutionGateway>,
}

impl GatewayContext {
    /// Build with the backend selected by `spec.execution.endpoint`.
    pub async fn build(config: GatewayConfigManifest, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let backend: Arc<dyn ExecutionBackend> = match &config.spec.execution.endpoint {
            Some(endpoint) => {
                info!(endpoint = %endpoint, "Using remote execution service");
                let material = config
                    .spec
                    .execution
                    .resolve_service_key()?
                    .context("spec.execution.service_key is required when spec.execution.endpoint is set")?;
                let link = ExecutionLink::from_material(material, clock.clone(), config.spec.auth.freshness_window())
                    .await
                    .context("failed to provision execution link key")?;
                Arc::new(HttpExecutionBackend::new(
                    endpoint.clone(),
                    config.spec.execution.timeout(),
                    Arc::new(link),
                )?)
            }
            None => {
                info!("Using in-process execution service");
                Arc::new(IsolatedExecutionService::acknowledging(authorized_ids(&config)))
            }
        };
        Self::with_backend(config, clock, backend).await
    }

    pub async fn with_backend(
        config: GatewayConfigManifest,
        clock: Arc<dyn Clock>,
        backend: Arc<dyn ExecutionBackend>,
    ) -> anyhow::Result<Self> {
        let event_bus = EventBus::with_default_capacity();
        let security = Arc::new(SecurityState::new(config.spec.security.threat_thresholds));
        let monitor = Arc::new(SecurityMonitor::new(security.clone(), event_bus.clone(), clock.clone()));

        let identities: Arc<dyn IdentityRepository> = Arc::new(InMemoryIdentityRepository::with_identities(
            config.spec.identities.iter().map(|i| i.to_identity()),
        ));

        let secrets: Arc<dyn SecretStore> = Arc::new(InMemorySecretStore::new());
        for entry in &config.spec.identities {
            let owner = IdentityId::new(entry.id.clone());
            match entry.resolve_key()? {
                Some(material) => {
                    secrets
                        .provision_key(&owner, material)
                        .await
                        .with_context(|| format!("failed to provision key for '{}'", entry.id))?;
                }
                None => {
                    secrets.get_or_create_key(&owner).await?;
                    warn!(identity_id = %owner, "No key configured; generated one that no client holds");
                }
            }
        }

        let sessions = Arc::new(
            SessionManager::new(
                secrets.clone(),
                monitor.clone(),
                event_bus.clone(),
                clock.clone(),
                SessionSettings::from(&config.spec.auth),
            )
            .await?,
        );

        let verifier = Arc::new(CredentialVerifier::new(
            identities.clone(),
            secrets.clone(),
            monitor.clone(),
            clock.clone(),
            config.spec.auth.freshness_window(),
        ));

        let audit = Arc::new(AuditLog::new(event_bus.clone()));

        let gateway = Arc::new(ExecutionGateway::new(
            verifier,
            sessions.clone(),
            identities.clone(),
            backend,
            audit.clone(),
            monitor.clone(),
            event_bus.clone(),
            clock.clone(),
            GatewaySettings {
                timeout: config.spec.execution.timeout(),
                retry_after: config.spec.execution.retry_after(),
            },
        ));

        info!(
            identities = config.spec.identities.len(),
            gateway = %config.metadata.name,
            "Gateway context ready"
        );

        Ok(Self {
            config,
            clock,
            event_bus,
            security,
            monitor,
            identities,
            secrets,
            sessions,
            audit,
            gateway,
        })
    }
}

/// Identities the execution service accepts channels for.
pub fn authorized_ids(config: &GatewayConfigManifest) -> Vec<IdentityId> {
    config
        .spec
        .identities
        .iter()
        .filter(|i| i.tier != IdentityTier::Denied)
        .map(|i| IdentityId::new(i.id.clone()))
        .collect()
}
