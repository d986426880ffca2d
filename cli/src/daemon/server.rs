// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon HTTP server implementation

use anyhow::{Context, Result};
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use warden_core::application::context::GatewayContext;
use warden_core::domain::clock::SystemClock;
use warden_core::domain::gateway_config::{GatewayConfigManifest, MetricsConfig};
use warden_core::presentation::api as gateway_api;
use warden_mesh::application::MeshContext;
use warden_mesh::presentation::api as mesh_api;

use super::{remove_pid_file, write_pid_file};

/// Gateway and messaging routes on one listener.
pub fn build_router(gateway: &GatewayContext, mesh: &MeshContext) -> Router {
    gateway_api::app(gateway.gateway.clone(), gateway.event_bus.clone())
        .merge(mesh_api::app(gateway.gateway.clone(), mesh.bus.clone()))
}

pub async fn start_daemon(config_path: Option<PathBuf>, port_override: Option<u16>) -> Result<()> {
    let pid = std::process::id();
    write_pid_file(pid)?;
    let _guard = PidFileGuard;

    info!("Warden daemon starting (PID: {})", pid);

    let config = GatewayConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    info!(
        gateway = %config.metadata.name,
        identities = config.spec.identities.len(),
        "Configuration loaded"
    );

    if let Some(metrics) = config.spec.observability.as_ref().and_then(|o| o.metrics.as_ref()) {
        install_metrics_exporter(&config.spec.network.bind_address, metrics)?;
    }

    let bind = format!(
        "{}:{}",
        config.spec.network.bind_address,
        port_override.unwrap_or(config.spec.network.port)
    );
    let sweep_interval = config.spec.auth.sweep_interval();

    let gateway = GatewayContext::build(config, Arc::new(SystemClock))
        .await
        .context("Failed to initialize gateway")?;
    let mesh = MeshContext::build(&gateway).context("Failed to initialize messaging")?;

    let cancel = CancellationToken::new();
    let sweeper = gateway.sessions.clone().spawn_sweeper(sweep_interval, cancel.clone());

    let app = build_router(&gateway, &mesh);

    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("Daemon listening on {}", bind);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed");

    cancel.cancel();
    if let Err(e) = sweeper.await {
        error!("Session sweeper task failed: {}", e);
    }
    info!(
        sessions = gateway.sessions.len(),
        messages = mesh.bus.len(),
        "Daemon shutting down"
    );

    served
}

fn install_metrics_exporter(bind_address: &str, metrics: &MetricsConfig) -> Result<()> {
    if !metrics.enabled {
        return Ok(());
    }
    let addr: SocketAddr = format!("{}:{}", bind_address, metrics.port)
        .parse()
        .with_context(|| format!("Invalid metrics listen address {}:{}", bind_address, metrics.port))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!("Prometheus metrics exposed on {}", addr);
    Ok(())
}

struct PidFileGuard;

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        let _ = remove_pid_file();
    }
}

pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
