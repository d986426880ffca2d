// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Warden CLI
//!
//! The `warden` binary hosts the gateway and its operator tooling.
//!
//! - **Daemon mode**: `warden --daemon` serves the gateway and messaging API
//!   in the foreground; `warden daemon start` re-executes itself detached
//! - **Execution service**: `warden execution-service` runs the isolated
//!   execution service the gateway dispatches to
//! - **Operator commands**: `config show|validate|generate`, `keys generate|sign`

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use warden_cli::commands::{self, ConfigCommand, DaemonCommand, KeysCommand};
use warden_cli::{daemon, logging};
use warden_core::domain::gateway_config::GatewayConfigManifest;

/// Warden - authenticated gateway and encrypted peer messaging
#[derive(Parser)]
#[command(name = "warden")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Run the gateway in the foreground as the daemon process
    #[arg(long, global = true)]
    daemon: bool,

    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, env = "WARDEN_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// HTTP API port (default: spec.network.port)
    #[arg(long, global = true, env = "WARDEN_PORT")]
    port: Option<u16>,

    /// Host used by `daemon status|stop` to reach a running daemon
    #[arg(long, global = true, env = "WARDEN_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "WARDEN_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage daemon lifecycle
    #[command(name = "daemon")]
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Run the isolated execution service
    #[command(name = "execution-service")]
    ExecutionService {
        /// Listen port (default: spec.network.execution_service_port)
        #[arg(long)]
        listen_port: Option<u16>,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Out-of-band key provisioning and request signing
    #[command(name = "keys")]
    Keys {
        #[command(subcommand)]
        command: KeysCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging format comes from the config when one is found; the flag wins for level.
    let logging_config = GatewayConfigManifest::load_or_default(cli.config.clone())
        .ok()
        .and_then(|c| c.spec.observability)
        .and_then(|o| o.logging);
    logging::init_logging(cli.log_level.as_deref(), logging_config.as_ref())?;

    if cli.daemon {
        info!("Starting Warden gateway in daemon mode");
        return daemon::start_daemon(cli.config, cli.port).await;
    }

    match cli.command {
        Some(Commands::Daemon { command }) => {
            commands::daemon::handle_command(command, cli.config, &cli.host, cli.port).await
        }
        Some(Commands::ExecutionService { listen_port }) => {
            commands::execution_service::run(cli.config, listen_port).await
        }
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        Some(Commands::Keys { command }) => commands::keys::handle_command(command, cli.config).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}
