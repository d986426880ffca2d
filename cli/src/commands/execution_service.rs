// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `warden execution-service`: host the isolated execution service.
//!
//! Channels are accepted for every non-denied identity in the config. The
//! gateway reaches this process through `spec.execution.endpoint` and signs
//! each request with `spec.execution.service_key`; anything else is refused.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::daemon::server::shutdown_signal;
use warden_core::application::context::authorized_ids;
use warden_core::domain::clock::SystemClock;
use warden_core::domain::gateway_config::GatewayConfigManifest;
use warden_core::infrastructure::execution_link::ExecutionLink;
use warden_core::infrastructure::execution_service::{router, IsolatedExecutionService};

pub async fn run(config_path: Option<PathBuf>, listen_port: Option<u16>) -> Result<()> {
    let config = GatewayConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    let material = config
        .spec
        .execution
        .resolve_service_key()?
        .context("spec.execution.service_key is required to run the execution service")?;
    let link = ExecutionLink::from_material(material, Arc::new(SystemClock), config.spec.auth.freshness_window())
        .await
        .context("Failed to provision execution link key")?;

    let authorized = authorized_ids(&config);
    info!(identities = authorized.len(), "Execution service accepting channels");
    let service = Arc::new(IsolatedExecutionService::acknowledging(authorized));

    let bind = format!(
        "{}:{}",
        config.spec.network.execution_service_bind_address,
        listen_port.unwrap_or(config.spec.network.execution_service_port)
    );
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("Execution service listening on {}", bind);

    axum::serve(listener, router(service, Arc::new(link)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Execution service failed")?;

    info!("Execution service stopped");
    Ok(())
}
