// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Gateway Configuration Types
//
// Defines the configuration schema for a WARDEN gateway process, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Identity registry with out-of-band key provisioning
// - Session, execution and messaging tunables
// - Network and observability settings

use anyhow::Context;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::domain::execution::LINK_AUTHORITY;
use crate::domain::identity::{Identity, IdentityTier};
use crate::domain::secret_store::KeyMaterial;
use crate::domain::security_state::ThreatThresholds;
use crate::domain::session::SESSION_AUTHORITY;

pub const API_VERSION: &str = "warden/v1";
pub const KIND: &str = "GatewayConfig";

/// Inclusive bounds for the execution-service call timeout, in seconds.
pub const EXECUTION_TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 30..=60;

/// Top-level Kubernetes-style gateway configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfigManifest {
    /// API version (must be "warden/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "GatewayConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: GatewayConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable gateway name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfigSpec {
    /// Identities allowed to authenticate
    #[serde(default)]
    pub identities: Vec<IdentityConfig>,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub messaging: MessagingConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub id: String,

    pub tier: IdentityTier,

    /// Identity type for the mesh affinity table
    #[serde(default = "default_role")]
    pub role: String,

    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Symmetric key, hex-encoded (supports "env:VAR_NAME").
    /// When absent, a key is generated at startup and must be exported with
    /// `warden keys generate` before clients can sign.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl IdentityConfig {
    pub fn to_identity(&self) -> Identity {
        Identity::new(self.id.clone(), self.tier)
            .with_role(self.role.clone())
            .with_capabilities(self.capabilities.iter().cloned())
    }

    /// Resolve the configured key reference into key material.
    pub fn resolve_key(&self) -> anyhow::Result<Option<KeyMaterial>> {
        resolve_key_reference(&format!("identity '{}'", self.id), self.key.as_deref())
    }
}

/// Hex key material, inline or via "env:VAR_NAME".
fn resolve_key_reference(owner: &str, reference: Option<&str>) -> anyhow::Result<Option<KeyMaterial>> {
    let Some(reference) = reference else {
        return Ok(None);
    };

    let encoded = match reference.strip_prefix("env:") {
        Some(var) => {
            std::env::var(var).with_context(|| format!("key for {} references unset variable {}", owner, var))?
        }
        None => reference.to_string(),
    };

    let material = KeyMaterial::from_hex(&encoded).with_context(|| format!("invalid key for {}", owner))?;
    Ok(Some(material))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Maximum clock skew accepted on authentication timestamps
    #[serde(default = "default_freshness_window")]
    pub freshness_window_secs: u64,

    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Age after which a heartbeat rotates the session token
    #[serde(default = "default_rotation_interval")]
    pub rotation_interval_secs: u64,

    /// How long a rotated-out token keeps resolving to its successor
    #[serde(default = "default_rotation_grace")]
    pub rotation_grace_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl AuthConfig {
    pub fn freshness_window(&self) -> Duration {
        Duration::seconds(self.freshness_window_secs as i64)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::seconds(self.session_ttl_secs as i64)
    }

    pub fn rotation_interval(&self) -> Duration {
        Duration::seconds(self.rotation_interval_secs as i64)
    }

    pub fn rotation_grace(&self) -> Duration {
        Duration::seconds(self.rotation_grace_secs as i64)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: default_freshness_window(),
            session_ttl_secs: default_session_ttl(),
            rotation_interval_secs: default_rotation_interval(),
            rotation_grace_secs: default_rotation_grace(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Base URL of a separately launched execution service.
    /// When absent the service runs in-process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Hard timeout on every call to the execution service (30-60s)
    #[serde(default = "default_execution_timeout")]
    pub timeout_secs: u64,

    /// Backoff hint returned with `UpstreamUnavailable`
    #[serde(default = "default_retry_after")]
    pub retry_after_secs: u64,

    /// Shared key authenticating the gateway to a standalone execution
    /// service, hex-encoded (supports "env:VAR_NAME"). Required with `endpoint`
    /// and by `warden execution-service`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_key: Option<String>,
}

impl ExecutionConfig {
    pub fn resolve_service_key(&self) -> anyhow::Result<Option<KeyMaterial>> {
        resolve_key_reference("spec.execution.service_key", self.service_key.as_deref())
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_after(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.retry_after_secs)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_execution_timeout(),
            retry_after_secs: default_retry_after(),
            service_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Relevance score at or above which an insight artifact is derived
    #[serde(default = "default_insight_threshold")]
    pub insight_threshold: f64,

    /// Maximum number of identities an artifact is propagated to
    #[serde(default = "default_propagation_fanout")]
    pub propagation_fanout: usize,

    /// Character limit applied to externally visible content
    #[serde(default = "default_max_display_len")]
    pub max_display_len: usize,

    /// Optional YAML file overriding the embedded rule tables
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_path: Option<String>,

    #[serde(default)]
    pub retention: RetentionConfig,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            insight_threshold: default_insight_threshold(),
            propagation_fanout: default_propagation_fanout(),
            max_display_len: default_max_display_len(),
            rules_path: None,
            retention: RetentionConfig::default(),
        }
    }
}

/// Bounds on what the message store and insight inboxes keep in memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Stored messages across all recipients. Delivered messages are evicted
    /// first, then errored ones, then the oldest pending.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Seconds a delivered message stays readable after delivery
    #[serde(default = "default_delivered_ttl")]
    pub delivered_ttl_secs: u64,

    /// Artifacts kept per identity inbox, oldest dropped first
    #[serde(default = "default_max_inbox_entries")]
    pub max_inbox_entries: usize,

    /// Seconds an insight artifact stays in an inbox
    #[serde(default = "default_insight_ttl")]
    pub insight_ttl_secs: u64,
}

impl RetentionConfig {
    pub fn delivered_ttl(&self) -> Duration {
        Duration::seconds(self.delivered_ttl_secs as i64)
    }

    pub fn insight_ttl(&self) -> Duration {
        Duration::seconds(self.insight_ttl_secs as i64)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            delivered_ttl_secs: default_delivered_ttl(),
            max_inbox_entries: default_max_inbox_entries(),
            insight_ttl_secs: default_insight_ttl(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub threat_thresholds: ThreatThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network bind address (e.g. "0.0.0.0" or "127.0.0.1")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Gateway HTTP API port
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Bind address for `warden execution-service`
    #[serde(default = "default_execution_service_bind_address")]
    pub execution_service_bind_address: String,

    /// Port for `warden execution-service`
    #[serde(default = "default_execution_service_port")]
    pub execution_service_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
            execution_service_bind_address: default_execution_service_bind_address(),
            execution_service_port: default_execution_service_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prometheus exporter port
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_role() -> String {
    "generalist".to_string()
}

fn default_freshness_window() -> u64 {
    300
}

fn default_session_ttl() -> u64 {
    3600
}

fn default_rotation_interval() -> u64 {
    900
}

fn default_rotation_grace() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_execution_timeout() -> u64 {
    30
}

fn default_retry_after() -> u64 {
    5
}

fn default_insight_threshold() -> f64 {
    0.7
}

fn default_propagation_fanout() -> usize {
    3
}

fn default_max_display_len() -> usize {
    500
}

fn default_max_messages() -> usize {
    10_000
}

fn default_delivered_ttl() -> u64 {
    3600
}

fn default_max_inbox_entries() -> usize {
    256
}

fn default_insight_ttl() -> u64 {
    86_400
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_execution_service_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8400
}

fn default_execution_service_port() -> u16 {
    8401
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9400
}

impl Default for GatewayConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "warden-gateway".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: GatewayConfigSpec::default(),
        }
    }
}

impl GatewayConfigManifest {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {:?}", path))?;
        Self::from_yaml_str(&content).with_context(|| format!("failed to parse config at {:?}", path))
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. WARDEN_CONFIG_PATH environment variable
    /// 2. ./warden-config.yaml (working directory)
    /// 3. ~/.warden/config.yaml (user home)
    /// 4. /etc/warden/config.yaml (system, Unix) or C:\ProgramData\Warden\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("WARDEN_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./warden-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".warden").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/warden/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Warden\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // An explicit path must exist and parse.
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = match Self::discover_config() {
            Some(config_path) => {
                tracing::info!("Loading configuration from discovered path: {:?}", config_path);
                Self::from_yaml_file(config_path)?
            }
            None => {
                tracing::warn!("No configuration file found in standard locations. Using defaults.");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("WARDEN_EXECUTION_ENDPOINT") {
            tracing::info!("Environment override: WARDEN_EXECUTION_ENDPOINT={}", val);
            self.spec.execution.endpoint = if val.is_empty() { None } else { Some(val) };
        }

        override_u64("WARDEN_EXECUTION_TIMEOUT_SECS", &mut self.spec.execution.timeout_secs);
        override_u64("WARDEN_SESSION_TTL_SECS", &mut self.spec.auth.session_ttl_secs);
        override_u64("WARDEN_FRESHNESS_WINDOW_SECS", &mut self.spec.auth.freshness_window_secs);

        if let Ok(val) = std::env::var("WARDEN_RULES_PATH") {
            tracing::info!("Environment override: WARDEN_RULES_PATH={}", val);
            self.spec.messaging.rules_path = Some(val);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let mut seen = HashSet::new();
        for identity in &self.spec.identities {
            if identity.id.is_empty() {
                anyhow::bail!("spec.identities[].id cannot be empty");
            }
            if identity.id == SESSION_AUTHORITY || identity.id == LINK_AUTHORITY {
                anyhow::bail!("identity id '{}' is reserved", identity.id);
            }
            if !seen.insert(identity.id.as_str()) {
                anyhow::bail!("duplicate identity id: '{}'", identity.id);
            }
        }

        let auth = &self.spec.auth;
        if auth.session_ttl_secs == 0 {
            anyhow::bail!("spec.auth.session_ttl_secs must be greater than zero");
        }
        if auth.freshness_window_secs == 0 {
            anyhow::bail!("spec.auth.freshness_window_secs must be greater than zero");
        }
        if auth.rotation_interval_secs == 0 {
            anyhow::bail!("spec.auth.rotation_interval_secs must be greater than zero");
        }
        if auth.sweep_interval_secs == 0 {
            anyhow::bail!("spec.auth.sweep_interval_secs must be greater than zero");
        }

        if !EXECUTION_TIMEOUT_RANGE.contains(&self.spec.execution.timeout_secs) {
            anyhow::bail!(
                "spec.execution.timeout_secs must be between {} and {} (got {})",
                EXECUTION_TIMEOUT_RANGE.start(),
                EXECUTION_TIMEOUT_RANGE.end(),
                self.spec.execution.timeout_secs
            );
        }
        if self.spec.execution.endpoint.is_some() && self.spec.execution.service_key.is_none() {
            anyhow::bail!("spec.execution.service_key is required when spec.execution.endpoint is set");
        }

        let messaging = &self.spec.messaging;
        if messaging.propagation_fanout == 0 {
            anyhow::bail!("spec.messaging.propagation_fanout must be at least 1");
        }
        if !(0.0..=1.0).contains(&messaging.insight_threshold) {
            anyhow::bail!("spec.messaging.insight_threshold must be within [0, 1]");
        }
        if messaging.max_display_len == 0 {
            anyhow::bail!("spec.messaging.max_display_len must be greater than zero");
        }
        let retention = &messaging.retention;
        if retention.max_messages == 0 || retention.max_inbox_entries == 0 {
            anyhow::bail!("spec.messaging.retention limits must be greater than zero");
        }
        if retention.delivered_ttl_secs == 0 || retention.insight_ttl_secs == 0 {
            anyhow::bail!("spec.messaging.retention ttls must be greater than zero");
        }

        let t = &self.spec.security.threat_thresholds;
        if !(t.elevated <= t.high && t.high <= t.critical) {
            anyhow::bail!("spec.security.threat_thresholds must satisfy elevated <= high <= critical");
        }

        Ok(())
    }
}

fn override_u64(var: &str, target: &mut u64) {
    if let Ok(val) = std::env::var(var) {
        match val.parse::<u64>() {
            Ok(parsed) => {
                tracing::info!("Environment override: {}={}", var, parsed);
                *target = parsed;
            }
            Err(_) => {
                tracing::warn!("Invalid value for {}: '{}'. Expected an integer. Ignoring.", var, val);
            }
        }
    }
}
