//! Configuration for kubeplan
//!
//! The configuration file is YAML (default `~/.kubeplan/config.yaml`). Every
//! section has defaults so an absent file yields a usable dry-run setup.

pub mod profile;
pub mod request;

pub use profile::{ComputeConstants, LoadProfile, ServiceWeightTable, ServiceWeights};
pub use request::{AdvancedConfig, GpuSelection, TenantCreateRequest};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default namespace label marking resources owned by kubeplan
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY_VALUE: &str = "kubeplan";

/// Default config file location: ~/.kubeplan/config.yaml
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kubeplan")
        .join("config.yaml")
}

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to write config: {0}")]
    WriteError(String),

    #[error("Invalid path '{0}': {1}")]
    InvalidPath(String, String),
}

/// The complete configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Cluster API connection
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Image registry defaults
    #[serde(default)]
    pub images: ImageConfig,

    /// Health monitor settings
    #[serde(default)]
    pub monitor: MonitorSettings,

    /// Load-modeling constants
    #[serde(rename = "loadProfile")]
    #[serde(default)]
    pub load_profile: LoadProfile,

    /// Path of the append-only image/deployment ledger
    #[serde(rename = "ledgerPath")]
    #[serde(default = "default_ledger_path")]
    pub ledger_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            images: ImageConfig::default(),
            monitor: MonitorSettings::default(),
            load_profile: LoadProfile::default(),
            ledger_path: default_ledger_path(),
        }
    }
}

/// Cluster API connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// API server URL; when absent, commands run against an in-memory dry-run cluster
    #[serde(rename = "apiUrl")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// File holding a bearer token
    #[serde(rename = "tokenFile")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_file: Option<String>,

    /// Environment variable holding a bearer token (checked before `tokenFile`)
    #[serde(rename = "tokenEnv")]
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Skip TLS verification (development clusters only)
    #[serde(rename = "insecureSkipTlsVerify")]
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,

    /// Upper bound for a single apply call (seconds)
    #[serde(rename = "applyTimeoutSecs")]
    #[serde(default = "default_apply_timeout")]
    pub apply_timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            token_file: None,
            token_env: default_token_env(),
            insecure_skip_tls_verify: false,
            apply_timeout_secs: default_apply_timeout(),
        }
    }
}

/// Image registry defaults used when the ledger has no ready image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_registry")]
    pub registry: String,

    #[serde(rename = "defaultTag")]
    #[serde(default = "default_tag")]
    pub default_tag: String,

    #[serde(rename = "pullPolicy")]
    #[serde(default = "default_pull_policy")]
    pub pull_policy: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            registry: default_registry(),
            default_tag: default_tag(),
            pull_policy: default_pull_policy(),
        }
    }
}

/// Health monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    #[serde(rename = "intervalSecs")]
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,

    #[serde(rename = "namespaceTimeoutSecs")]
    #[serde(default = "default_namespace_timeout")]
    pub namespace_timeout_secs: u64,

    #[serde(rename = "autoRollback")]
    #[serde(default)]
    pub auto_rollback: bool,

    #[serde(rename = "metricsTtlHours")]
    #[serde(default = "default_metrics_ttl")]
    pub metrics_ttl_hours: u64,

    #[serde(rename = "rollbackMarkerTtlSecs")]
    #[serde(default = "default_marker_ttl")]
    pub rollback_marker_ttl_secs: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval(),
            namespace_timeout_secs: default_namespace_timeout(),
            auto_rollback: false,
            metrics_ttl_hours: default_metrics_ttl(),
            rollback_marker_ttl_secs: default_marker_ttl(),
        }
    }
}

fn default_token_env() -> String {
    "KUBEPLAN_CLUSTER_TOKEN".to_string()
}

fn default_apply_timeout() -> u64 {
    30
}

fn default_registry() -> String {
    "registry.local/aicc".to_string()
}

fn default_tag() -> String {
    "latest".to_string()
}

fn default_pull_policy() -> String {
    "IfNotPresent".to_string()
}

fn default_monitor_interval() -> u64 {
    30
}

fn default_namespace_timeout() -> u64 {
    10
}

fn default_metrics_ttl() -> u64 {
    24
}

fn default_marker_ttl() -> u64 {
    600
}

fn default_ledger_path() -> String {
    "~/.kubeplan/ledger.jsonl".to_string()
}

// ============================================================================
// SBIO: Pure parsing functions (no I/O)
// ============================================================================

/// Parse config from YAML string
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig =
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    if config.monitor.metrics_ttl_hours > 24 {
        return Err(ConfigError::ParseError(format!(
            "monitor.metricsTtlHours must be at most 24, got {}",
            config.monitor.metrics_ttl_hours
        )));
    }
    Ok(config)
}

/// Serialize config to YAML string
pub fn serialize_config(config: &AppConfig) -> Result<String, ConfigError> {
    serde_yaml::to_string(config).map_err(|e| ConfigError::WriteError(e.to_string()))
}

/// Expand `~` and environment variables in a configured path
pub fn expand_path(raw: &str) -> Result<PathBuf, ConfigError> {
    shellexpand::full(raw)
        .map(|p| PathBuf::from(p.as_ref()))
        .map_err(|e| ConfigError::InvalidPath(raw.to_string(), e.to_string()))
}

// ============================================================================
// SBIO: I/O wrapper
// ============================================================================

/// Load the config file.
///
/// An explicit path must exist. When no path is given, the default location is
/// used if present and built-in defaults otherwise.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let default = default_config_path();
            if !default.exists() {
                return Ok(AppConfig::default());
            }
            default
        }
    };
    let content = std::fs::read_to_string(&path)?;
    parse_config(&content)
}
