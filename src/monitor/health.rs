//! Health classification and the metrics kept per deployment

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    Unknown,
    Healthy,
    Warning,
    Critical,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Health::Unknown => "UNKNOWN",
            Health::Healthy => "HEALTHY",
            Health::Warning => "WARNING",
            Health::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Classify a deployment from its replica counts
///
/// | desired | ready       | health   |
/// |---------|-------------|----------|
/// | 0       | any         | UNKNOWN  |
/// | N       | >= N        | HEALTHY  |
/// | N       | 0 < r < N   | WARNING  |
/// | N       | 0           | CRITICAL |
pub fn classify_health(desired: u32, ready: u32) -> Health {
    if desired == 0 {
        Health::Unknown
    } else if ready >= desired {
        Health::Healthy
    } else if ready == 0 {
        Health::Critical
    } else {
        Health::Warning
    }
}

/// Last observation of one deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentMetrics {
    #[serde(rename = "tenantId")]
    pub tenant_id: String,
    pub namespace: String,
    pub service: String,
    pub desired: u32,
    pub available: u32,
    pub ready: u32,
    pub updated: u32,
    pub health: Health,
    pub image: String,
    /// Version the ledger says should run, when known
    #[serde(rename = "expectedVersion")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<String>,
    #[serde(rename = "versionMismatch")]
    pub version_mismatch: bool,
    #[serde(rename = "observedAt")]
    pub observed_at: DateTime<Utc>,
}

/// Deployment counts per health class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCounts {
    pub unknown: usize,
    pub healthy: usize,
    pub warning: usize,
    pub critical: usize,
}

impl HealthCounts {
    pub fn add(&mut self, health: Health) {
        match health {
            Health::Unknown => self.unknown += 1,
            Health::Healthy => self.healthy += 1,
            Health::Warning => self.warning += 1,
            Health::Critical => self.critical += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.unknown + self.healthy + self.warning + self.critical
    }
}

/// Snapshot served by the health endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub counts: HealthCounts,
    pub deployments: Vec<DeploymentMetrics>,
    /// Namespaces whose last check failed, with the reason
    #[serde(rename = "namespaceErrors")]
    pub namespace_errors: Vec<(String, String)>,
    #[serde(rename = "lastCycleAt")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cycle_at: Option<DateTime<Utc>>,
    #[serde(rename = "generatedAt")]
    pub generated_at: DateTime<Utc>,
}

impl HealthSummary {
    /// Overall status string: the worst observed class
    pub fn status(&self) -> &'static str {
        if self.counts.critical > 0 {
            "Critical"
        } else if self.counts.warning > 0 || !self.namespace_errors.is_empty() {
            "Degraded"
        } else if self.counts.healthy > 0 {
            "Healthy"
        } else {
            "Unknown"
        }
    }
}
