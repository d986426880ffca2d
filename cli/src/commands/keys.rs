// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Out-of-band key provisioning
//!
//! Commands: generate, sign

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use uuid::Uuid;

use warden_core::application::credential_verifier::{sign_challenge, AuthenticationRequest};
use warden_core::domain::gateway_config::{GatewayConfigManifest, IdentityConfig};
use warden_core::domain::identity::IdentityTier;
use warden_core::domain::secret_store::KeyMaterial;

#[derive(Subcommand)]
pub enum KeysCommand {
    /// Generate a fresh 256-bit identity key
    Generate {
        /// Identity the key is for; prints a matching environment variable line
        #[arg(long)]
        identity: Option<String>,
    },

    /// Produce a signed authentication request for `POST /v1/auth`
    Sign {
        #[arg(long)]
        identity: String,

        /// Hex key or "env:VAR" (default: the identity's key from the config)
        #[arg(long)]
        key: Option<String>,

        /// Challenge nonce (default: random UUID)
        #[arg(long)]
        nonce: Option<String>,

        /// Unix seconds (default: now)
        #[arg(long)]
        timestamp: Option<i64>,
    },
}

pub async fn handle_command(command: KeysCommand, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        KeysCommand::Generate { identity } => generate(identity),
        KeysCommand::Sign {
            identity,
            key,
            nonce,
            timestamp,
        } => sign(config_path, identity, key, nonce, timestamp),
    }
}

/// `worker-b` -> `WARDEN_KEY_WORKER_B`
pub fn env_var_for(identity_id: &str) -> String {
    let suffix: String = identity_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("WARDEN_KEY_{}", suffix)
}

fn generate(identity: Option<String>) -> Result<()> {
    let material = KeyMaterial::generate();
    match identity {
        Some(id) => {
            println!("{}={}", env_var_for(&id), material.to_hex());
            eprintln!(
                "{}",
                format!("Reference it in the config as `key: env:{}`", env_var_for(&id)).dimmed()
            );
        }
        None => println!("{}", material.to_hex()),
    }
    Ok(())
}

pub fn build_request(material: &KeyMaterial, identity_id: &str, timestamp: i64, nonce: String) -> AuthenticationRequest {
    AuthenticationRequest {
        identity_id: identity_id.to_string(),
        timestamp,
        signature: sign_challenge(material, identity_id, timestamp, &nonce),
        nonce,
    }
}

fn resolve_material(config_path: Option<PathBuf>, identity: &str, key: Option<String>) -> Result<KeyMaterial> {
    if let Some(reference) = key {
        let entry = IdentityConfig {
            id: identity.to_string(),
            tier: IdentityTier::WorkerAgent,
            role: String::new(),
            capabilities: Vec::new(),
            key: Some(reference),
        };
        return entry.resolve_key()?.context("no key given");
    }

    let config = GatewayConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    let entry = config
        .spec
        .identities
        .iter()
        .find(|i| i.id == identity)
        .with_context(|| format!("identity '{}' is not in the configuration", identity))?;
    entry
        .resolve_key()?
        .with_context(|| format!("identity '{}' has no configured key; pass --key", identity))
}

fn sign(
    config_path: Option<PathBuf>,
    identity: String,
    key: Option<String>,
    nonce: Option<String>,
    timestamp: Option<i64>,
) -> Result<()> {
    let material = resolve_material(config_path, &identity, key)?;
    let timestamp = timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp());
    let nonce = nonce.unwrap_or_else(|| Uuid::new_v4().to_string());
    let request = build_request(&material, &identity, timestamp, nonce);
    println!("{}", serde_json::to_string_pretty(&request)?);
    Ok(())
}
