//! Workload configuration shared by the generator and the orchestrator

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::capacity::{Component, ComponentPlan, ScalingPolicy};
use crate::config::request::{AdvancedConfig, CustomMetric};
use crate::error::RenderError;

/// Horizontal autoscaling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoscalingConfig {
    /// Minimum replicas
    #[serde(rename = "minReplicas")]
    #[serde(default = "default_min_replicas")]
    pub min_replicas: u32,

    /// Maximum replicas
    #[serde(rename = "maxReplicas")]
    #[serde(default = "default_max_replicas")]
    pub max_replicas: u32,

    /// Target CPU utilization percentage
    #[serde(rename = "targetCpuUtilization")]
    #[serde(default = "default_target_cpu")]
    pub target_cpu_utilization: u32,

    /// Target memory utilization percentage
    #[serde(rename = "targetMemoryUtilization")]
    #[serde(default = "default_target_memory")]
    pub target_memory_utilization: u32,

    /// Optional per-pod custom metric
    #[serde(rename = "customMetric")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_metric: Option<CustomMetric>,

    /// Scale-up/scale-down behavior
    #[serde(default)]
    pub behavior: ScalingBehavior,
}

fn default_min_replicas() -> u32 {
    1
}

fn default_max_replicas() -> u32 {
    4
}

fn default_target_cpu() -> u32 {
    70
}

fn default_target_memory() -> u32 {
    80
}

impl Default for AutoscalingConfig {
    fn default() -> Self {
        Self {
            min_replicas: default_min_replicas(),
            max_replicas: default_max_replicas(),
            target_cpu_utilization: default_target_cpu(),
            target_memory_utilization: default_target_memory(),
            custom_metric: None,
            behavior: ScalingBehavior::default(),
        }
    }
}

impl AutoscalingConfig {
    /// Check bounds; an invalid config is never rendered
    pub fn validate(&self) -> Result<(), RenderError> {
        if self.min_replicas == 0 {
            return Err(RenderError::InvalidOverride {
                field: "minReplicas".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.min_replicas > self.max_replicas {
            return Err(RenderError::InvalidOverride {
                field: "minReplicas".to_string(),
                reason: format!(
                    "{} exceeds maxReplicas {}",
                    self.min_replicas, self.max_replicas
                ),
            });
        }
        for (field, value) in [
            ("targetCpuUtilization", self.target_cpu_utilization),
            ("targetMemoryUtilization", self.target_memory_utilization),
        ] {
            if value == 0 || value > 100 {
                return Err(RenderError::InvalidOverride {
                    field: field.to_string(),
                    reason: format!("{} is outside 1..=100", value),
                });
            }
        }
        Ok(())
    }
}

/// Separate stabilization windows and step sizes for each direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingBehavior {
    #[serde(rename = "scaleUpStabilizationSeconds")]
    #[serde(default)]
    pub scale_up_stabilization_secs: u32,

    /// Max percentage added per period
    #[serde(rename = "scaleUpPercent")]
    #[serde(default = "default_scale_up_percent")]
    pub scale_up_percent: u32,

    #[serde(rename = "scaleDownStabilizationSeconds")]
    #[serde(default = "default_scale_down_window")]
    pub scale_down_stabilization_secs: u32,

    /// Max percentage removed per period
    #[serde(rename = "scaleDownPercent")]
    #[serde(default = "default_scale_down_percent")]
    pub scale_down_percent: u32,

    #[serde(rename = "periodSeconds")]
    #[serde(default = "default_period")]
    pub period_secs: u32,
}

fn default_scale_up_percent() -> u32 {
    100
}

fn default_scale_down_window() -> u32 {
    300
}

fn default_scale_down_percent() -> u32 {
    50
}

fn default_period() -> u32 {
    60
}

impl Default for ScalingBehavior {
    fn default() -> Self {
        Self {
            scale_up_stabilization_secs: 0,
            scale_up_percent: default_scale_up_percent(),
            scale_down_stabilization_secs: default_scale_down_window(),
            scale_down_percent: default_scale_down_percent(),
            period_secs: default_period(),
        }
    }
}

impl From<&ScalingPolicy> for ScalingBehavior {
    fn from(policy: &ScalingPolicy) -> Self {
        Self {
            scale_up_stabilization_secs: policy.scale_up_window_secs,
            scale_up_percent: policy.scale_up_percent,
            scale_down_stabilization_secs: policy.scale_down_window_secs,
            scale_down_percent: policy.scale_down_percent,
            period_secs: default_period(),
        }
    }
}

/// Everything needed to deploy one service into a tenant namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub component: Component,
    /// Full image reference (`registry/name:tag`)
    pub image: String,
    pub replicas: u32,
    #[serde(rename = "cpuMillis")]
    pub cpu_millis: u64,
    #[serde(rename = "memoryMib")]
    pub memory_mib: u64,
    pub gpus: u64,
    #[serde(rename = "gpuModel")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_model: Option<String>,
    pub port: u16,
    #[serde(rename = "pullPolicy")]
    pub pull_policy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<AutoscalingConfig>,
    #[serde(rename = "verticalScaling")]
    #[serde(default)]
    pub vertical_scaling: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ServiceConfig {
    /// Deployment/service name
    pub fn name(&self) -> &'static str {
        self.component.key()
    }

    /// Tag part of the image reference (`latest` when untagged)
    pub fn image_tag(&self) -> &str {
        image_tag(&self.image)
    }

    /// Build from a component plan, a preset scaling policy and optional overrides
    pub fn from_plan(
        plan: &ComponentPlan,
        image: String,
        pull_policy: &str,
        policy: &ScalingPolicy,
        advanced: Option<&AdvancedConfig>,
    ) -> Result<Self, RenderError> {
        let autoscaling_enabled = advanced
            .and_then(|a| a.enable_autoscaling)
            .unwrap_or(true);
        let (min_replicas, max_replicas) = replica_bounds(plan, policy, advanced);
        let autoscaling = AutoscalingConfig {
            min_replicas,
            max_replicas,
            target_cpu_utilization: policy.target_cpu_utilization,
            target_memory_utilization: policy.target_memory_utilization,
            custom_metric: advanced.and_then(|a| a.custom_metric.clone()),
            behavior: ScalingBehavior::from(policy),
        };
        autoscaling.validate()?;

        Ok(Self {
            component: plan.component,
            image,
            replicas: plan.replicas.clamp(min_replicas, max_replicas),
            cpu_millis: plan.cpu_millis,
            memory_mib: plan.memory_mib,
            gpus: plan.gpus_per_pod,
            gpu_model: plan.gpu_model.clone(),
            port: plan.port,
            pull_policy: pull_policy.to_string(),
            autoscaling: autoscaling_enabled.then_some(autoscaling),
            vertical_scaling: advanced.and_then(|a| a.enable_vpa).unwrap_or(false),
            labels: advanced.map(|a| a.labels.clone()).unwrap_or_default(),
        })
    }
}

/// Replica range for a component
///
/// Explicit overrides win. A missing minimum follows the plan but never
/// exceeds an explicit maximum; a missing maximum follows the preset policy.
fn replica_bounds(
    plan: &ComponentPlan,
    policy: &ScalingPolicy,
    advanced: Option<&AdvancedConfig>,
) -> (u32, u32) {
    let min_override = advanced.and_then(|a| a.min_replicas);
    let max_override = advanced.and_then(|a| a.max_replicas);
    let min_replicas = min_override.unwrap_or_else(|| {
        let planned = plan.replicas.max(1);
        match max_override {
            Some(max) => planned.min(max.max(1)),
            None => planned,
        }
    });
    let max_replicas = max_override.unwrap_or_else(|| policy.max_replicas.max(min_replicas));
    (min_replicas, max_replicas)
}

/// Compose an image reference
pub fn image_reference(registry: &str, component: Component, tag: &str) -> String {
    format!("{}/{}:{}", registry.trim_end_matches('/'), component.key(), tag)
}

/// Tag part of an image reference; digests and registry ports are handled
pub fn image_tag(image: &str) -> &str {
    let without_digest = image.split('@').next().unwrap_or(image);
    let last_segment = without_digest.rsplit('/').next().unwrap_or(without_digest);
    match last_segment.rsplit_once(':') {
        Some((_, tag)) => tag,
        None => "latest",
    }
}

/// Digest part of an image reference (`sha256:...`), if pinned
pub fn image_digest(image: &str) -> Option<&str> {
    image.split_once('@').map(|(_, digest)| digest).filter(|d| !d.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::TenantPreset;

    fn plan() -> ComponentPlan {
        ComponentPlan {
            component: Component::Nlp,
            replicas: 2,
            cpu_millis: 4000,
            memory_mib: 20480,
            gpus_per_pod: 1,
            gpu_model: Some("nvidia-t4".to_string()),
            port: 8000,
        }
    }

    #[test]
    fn test_from_plan_defaults() {
        let policy = TenantPreset::Small.scaling();
        let config =
            ServiceConfig::from_plan(&plan(), "r/nlp:v1".into(), "IfNotPresent", &policy, None)
                .unwrap();
        let hpa = config.autoscaling.as_ref().unwrap();
        assert_eq!(hpa.min_replicas, 2);
        assert_eq!(hpa.max_replicas, 4);
        assert_eq!(hpa.behavior.scale_down_stabilization_secs, 300);
        assert!(!config.vertical_scaling);
        assert_eq!(config.name(), "nlp");
    }

    #[test]
    fn test_from_plan_rejects_inverted_bounds() {
        let advanced = AdvancedConfig {
            min_replicas: Some(5),
            max_replicas: Some(2),
            ..Default::default()
        };
        let err = ServiceConfig::from_plan(
            &plan(),
            "r/nlp:v1".into(),
            "IfNotPresent",
            &TenantPreset::Small.scaling(),
            Some(&advanced),
        )
        .unwrap_err();
        assert!(matches!(err, RenderError::InvalidOverride { .. }));
    }

    #[test]
    fn test_max_only_override_below_plan_clamps_min_and_replicas() {
        let mut wide = plan();
        wide.replicas = 6;
        let advanced = AdvancedConfig {
            max_replicas: Some(3),
            ..Default::default()
        };
        let config = ServiceConfig::from_plan(
            &wide,
            "r/nlp:v1".into(),
            "IfNotPresent",
            &TenantPreset::Medium.scaling(),
            Some(&advanced),
        )
        .unwrap();
        let hpa = config.autoscaling.unwrap();
        assert_eq!((hpa.min_replicas, hpa.max_replicas), (3, 3));
        assert_eq!(config.replicas, 3);
    }

    #[test]
    fn test_min_override_raises_replicas() {
        let advanced = AdvancedConfig {
            min_replicas: Some(5),
            enable_autoscaling: Some(false),
            ..Default::default()
        };
        let config = ServiceConfig::from_plan(
            &plan(),
            "r/nlp:v1".into(),
            "IfNotPresent",
            &TenantPreset::Small.scaling(),
            Some(&advanced),
        )
        .unwrap();
        assert!(config.autoscaling.is_none());
        assert_eq!(config.replicas, 5);
    }

    #[test]
    fn test_autoscaling_can_be_disabled() {
        let advanced = AdvancedConfig {
            enable_autoscaling: Some(false),
            enable_vpa: Some(true),
            ..Default::default()
        };
        let config = ServiceConfig::from_plan(
            &plan(),
            "r/nlp:v1".into(),
            "Always",
            &TenantPreset::Micro.scaling(),
            Some(&advanced),
        )
        .unwrap();
        assert!(config.autoscaling.is_none());
        assert!(config.vertical_scaling);
    }

    #[test]
    fn test_image_tag_parsing() {
        assert_eq!(image_tag("registry.local/aicc/nlp:1.4.2"), "1.4.2");
        assert_eq!(image_tag("registry.local:5000/aicc/nlp"), "latest");
        assert_eq!(image_tag("registry.local:5000/nlp:v2@sha256:abc"), "v2");
        assert_eq!(image_digest("registry.local:5000/nlp:v2@sha256:abc"), Some("sha256:abc"));
        assert_eq!(image_digest("registry.local/nlp:v2"), None);
        assert_eq!(
            image_reference("registry.local/aicc/", Component::Tts, "v3"),
            "registry.local/aicc/tts:v3"
        );
    }
}
