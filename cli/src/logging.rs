// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Tracing subscriber setup.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use warden_core::domain::gateway_config::LoggingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "text" | "compact" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("Unknown log format '{}'. Use 'text' or 'json'", other),
        }
    }
}

/// Level precedence: `--log-level`/`WARDEN_LOG_LEVEL`, then `RUST_LOG`, then
/// the config file, then `info`.
pub fn resolve_filter(flag: Option<&str>, config: Option<&LoggingConfig>) -> Result<EnvFilter> {
    if let Some(level) = flag {
        return EnvFilter::try_new(level).with_context(|| format!("Invalid log level '{}'", level));
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level = config.map(|c| c.level.as_str()).unwrap_or("info");
    EnvFilter::try_new(level).with_context(|| format!("Invalid log level '{}'", level))
}

/// Initialize tracing subscriber for logging
pub fn init_logging(flag: Option<&str>, config: Option<&LoggingConfig>) -> Result<()> {
    let filter = resolve_filter(flag, config).context("Failed to create log filter")?;
    let format = match config {
        Some(c) => LogFormat::parse(&c.format)?,
        None => LogFormat::Text,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.compact().init(),
    }

    Ok(())
}
