// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use warden_core::domain::gateway_config::GatewayConfigManifest;

pub const MINIMAL_TEMPLATE: &str = include_str!("../../templates/config-minimal.yaml");
pub const ANNOTATED_TEMPLATE: &str = include_str!("../../templates/config-with-examples.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./warden-config.yaml)
        #[arg(short, long, default_value = "./warden-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = GatewayConfigManifest::load_or_default(config_override.clone()).context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. WARDEN_CONFIG_PATH: {}",
            std::env::var("WARDEN_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./warden-config.yaml");
        println!("  4. ~/.warden/config.yaml");
        println!("  5. /etc/warden/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Gateway:".bold());
    println!("  Name: {}", config.metadata.name);
    println!(
        "  Listen: {}:{}",
        config.spec.network.bind_address, config.spec.network.port
    );
    match &config.spec.execution.endpoint {
        Some(endpoint) => println!("  Execution service: {}", endpoint),
        None => println!("  Execution service: {}", "in-process".dimmed()),
    }
    println!();

    println!("{}", "Identities:".bold());
    for identity in &config.spec.identities {
        let key = match identity.key.as_deref() {
            Some(k) if k.starts_with("env:") => k.to_string(),
            Some(_) => "inline".to_string(),
            None => "generated at startup".to_string(),
        };
        println!(
            "  {} ({}, role {}) key: {}",
            identity.id.bold(),
            identity.tier,
            identity.role,
            key
        );
        if !identity.capabilities.is_empty() {
            println!("    capabilities: {}", identity.capabilities.join(", "));
        }
    }
    println!();

    let auth = &config.spec.auth;
    println!("{}", "Sessions:".bold());
    println!("  TTL: {}s", auth.session_ttl_secs);
    println!("  Freshness window: {}s", auth.freshness_window_secs);
    println!(
        "  Rotation: every {}s, grace {}s",
        auth.rotation_interval_secs, auth.rotation_grace_secs
    );
    println!();

    let messaging = &config.spec.messaging;
    println!("{}", "Messaging:".bold());
    println!("  Insight threshold: {}", messaging.insight_threshold);
    println!("  Propagation fan-out: {}", messaging.propagation_fanout);
    println!(
        "  Retention: {} messages, {} insights per inbox",
        messaging.retention.max_messages, messaging.retention.max_inbox_entries
    );
    println!(
        "  Rules: {}",
        messaging.rules_path.as_deref().unwrap_or("(embedded defaults)")
    );
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = GatewayConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    // Keys must resolve now rather than at daemon start.
    for identity in &config.spec.identities {
        identity.resolve_key()?;
    }
    config.spec.execution.resolve_service_key()?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples { ANNOTATED_TEMPLATE } else { MINIMAL_TEMPLATE };

    std::fs::write(&output, sample).with_context(|| format!("Failed to write config to {:?}", output))?;

    println!("{}", format!("✓ Configuration generated: {}", output.display()).green());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_parse_and_validate() {
        for template in [MINIMAL_TEMPLATE, ANNOTATED_TEMPLATE] {
            let config = GatewayConfigManifest::from_yaml_str(template).unwrap();
            config.validate().unwrap();
        }
    }

    #[tokio::test]
    async fn test_generate_writes_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.yaml");
        generate(path.clone(), false).await.unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, MINIMAL_TEMPLATE);
    }
}
