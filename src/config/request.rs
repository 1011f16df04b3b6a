//! Tenant creation request and its validation
//!
//! Requests are accepted as JSON or YAML. Validation happens here, before any
//! capacity computation: unknown keys and negative counts are rejected, never
//! clamped.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::capacity::load::{ServiceRequirement, ServiceType, MAX_SERVICE_COUNT};
use crate::capacity::tier::GpuTier;
use crate::error::ValidationError;

/// Longest tenant id that still fits a `tenant-` prefixed namespace
pub const MAX_TENANT_ID_LEN: usize = 56;

fn tenant_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("tenant id pattern is valid")
    })
}

/// Check that a tenant id can be used inside a DNS-1123 namespace name
pub fn validate_tenant_id(tenant_id: &str) -> Result<(), ValidationError> {
    if tenant_id.is_empty() || tenant_id.len() > MAX_TENANT_ID_LEN {
        return Err(ValidationError::InvalidTenantId(
            tenant_id.to_string(),
            format!("length must be 1..={}", MAX_TENANT_ID_LEN),
        ));
    }
    if !tenant_id_pattern().is_match(tenant_id) {
        return Err(ValidationError::InvalidTenantId(
            tenant_id.to_string(),
            "must be lowercase alphanumerics and '-', starting and ending alphanumeric"
                .to_string(),
        ));
    }
    Ok(())
}

/// Requested GPU class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum GpuSelection {
    /// Select the tier from load
    #[default]
    Auto,
    /// Use a fixed tier
    Fixed(GpuTier),
}

impl FromStr for GpuSelection {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(GpuSelection::Auto),
            "tier1" => Ok(GpuSelection::Fixed(GpuTier::Tier1)),
            "tier2" => Ok(GpuSelection::Fixed(GpuTier::Tier2)),
            "tier3" => Ok(GpuSelection::Fixed(GpuTier::Tier3)),
            other => Err(ValidationError::UnknownGpuType(other.to_string())),
        }
    }
}

impl TryFrom<String> for GpuSelection {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GpuSelection> for String {
    fn from(value: GpuSelection) -> Self {
        value.to_string()
    }
}

impl fmt::Display for GpuSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuSelection::Auto => write!(f, "auto"),
            GpuSelection::Fixed(tier) => write!(f, "{}", tier.key()),
        }
    }
}

/// Custom metric driving the horizontal autoscaler in addition to CPU/memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomMetric {
    /// Pods metric name (e.g. `active_sessions`)
    pub name: String,
    /// Target average value per pod, as a Kubernetes quantity
    #[serde(rename = "targetAverageValue")]
    pub target_average_value: String,
}

/// Optional manifest overrides; every field falls back to a safe default
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvancedConfig {
    #[serde(rename = "imageRegistry")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_registry: Option<String>,

    #[serde(rename = "imageTag")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,

    #[serde(rename = "minReplicas")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<u32>,

    #[serde(rename = "maxReplicas")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<u32>,

    #[serde(rename = "enableAutoscaling")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_autoscaling: Option<bool>,

    #[serde(rename = "enableVpa")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_vpa: Option<bool>,

    #[serde(rename = "customMetric")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_metric: Option<CustomMetric>,

    /// Extra labels stamped on every rendered object
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Explicit render timestamp, recorded as an annotation when present
    #[serde(rename = "renderedAt")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered_at: Option<DateTime<Utc>>,
}

impl AdvancedConfig {
    /// Whether the caller chose the image registry or tag explicitly
    pub fn pins_image(&self) -> bool {
        self.image_registry.is_some() || self.image_tag.is_some()
    }
}

/// Input accepted at the collaborator boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantCreateRequest {
    #[serde(rename = "tenantId")]
    #[serde(alias = "tenant_id")]
    pub tenant_id: String,

    #[serde(rename = "serviceRequirements")]
    #[serde(alias = "service_requirements")]
    #[serde(default)]
    pub service_requirements: BTreeMap<String, i64>,

    #[serde(rename = "gpuType")]
    #[serde(alias = "gpu_type")]
    #[serde(default)]
    pub gpu_type: GpuSelection,

    #[serde(rename = "advancedConfig")]
    #[serde(alias = "advanced_config")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advanced_config: Option<AdvancedConfig>,
}

impl TenantCreateRequest {
    /// Parse a request from JSON or YAML text (YAML is a superset of JSON)
    pub fn from_str(content: &str) -> Result<Self, ValidationError> {
        serde_yaml::from_str(content).map_err(|e| ValidationError::Parse(e.to_string()))
    }

    /// Load a request file from disk
    pub fn from_file(path: &Path) -> Result<Self, ValidationError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ValidationError::Parse(format!("{}: {}", path.display(), e)))?;
        Self::from_str(&content)
    }

    /// Validate the request, returning the typed service requirement
    pub fn validate(&self) -> Result<ServiceRequirement, ValidationError> {
        validate_tenant_id(&self.tenant_id)?;
        parse_requirements(&self.service_requirements)
    }
}

/// Convert raw `service -> count` pairs into a typed requirement
pub fn parse_requirements(
    raw: &BTreeMap<String, i64>,
) -> Result<ServiceRequirement, ValidationError> {
    let mut requirement = ServiceRequirement::default();
    for (key, &count) in raw {
        let service: ServiceType = key.parse()?;
        if count < 0 {
            return Err(ValidationError::NegativeCount(key.clone(), count));
        }
        if count as u64 > MAX_SERVICE_COUNT {
            return Err(ValidationError::CountTooLarge(
                key.clone(),
                count,
                MAX_SERVICE_COUNT,
            ));
        }
        requirement.set(service, count as u64);
    }
    Ok(requirement)
}
