//! Deterministic manifest rendering
//!
//! The same [`TenantSpec`] and overrides always produce byte-identical
//! documents. Filenames carry numeric prefixes so the map order is the apply
//! order.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::objects::{self, Manifest};
use super::workload::{image_reference, ServiceConfig};
use crate::capacity::{ComponentPlan, TenantSpec};
use crate::config::request::AdvancedConfig;
use crate::config::ImageConfig;
use crate::error::RenderError;

/// Annotation recording the load profile used for sizing
pub const PROFILE_ANNOTATION: &str = "kubeplan.io/profile-version";
/// Annotation recording an explicit render time
pub const RENDERED_AT_ANNOTATION: &str = "kubeplan.io/rendered-at";

/// Rendered documents keyed by file name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestPackage {
    pub documents: BTreeMap<String, String>,
    /// True when rendering failed and the minimal template was used
    pub degraded: bool,
}

impl ManifestPackage {
    pub fn file_names(&self) -> Vec<&str> {
        self.documents.keys().map(String::as_str).collect()
    }

    /// All documents joined into one multi-document YAML stream
    pub fn to_stream(&self) -> String {
        self.documents
            .values()
            .map(|doc| format!("---\n{}", doc))
            .collect()
    }
}

/// Renders tenant manifests
#[derive(Debug, Clone, Default)]
pub struct ManifestGenerator {
    images: ImageConfig,
}

impl ManifestGenerator {
    pub fn new(images: ImageConfig) -> Self {
        Self { images }
    }

    /// Render a package, falling back to the minimal template on failure
    pub fn render(
        &self,
        spec: &TenantSpec,
        advanced: Option<&AdvancedConfig>,
    ) -> Result<ManifestPackage, RenderError> {
        match self.try_render(spec, advanced) {
            Ok(documents) => {
                debug!(
                    tenant = %spec.tenant_id,
                    documents = documents.len(),
                    "Rendered manifests"
                );
                Ok(ManifestPackage {
                    documents,
                    degraded: false,
                })
            }
            Err(e) => {
                warn!(
                    tenant = %spec.tenant_id,
                    error = %e,
                    "Manifest rendering failed, using minimal template (degraded)"
                );
                let documents = self.fallback(spec, &e.to_string())?;
                Ok(ManifestPackage {
                    documents,
                    degraded: true,
                })
            }
        }
    }

    /// Every object of a full package, keyed by file name
    pub fn manifests(
        &self,
        spec: &TenantSpec,
        advanced: Option<&AdvancedConfig>,
    ) -> Result<BTreeMap<String, Manifest>, RenderError> {
        validate_overrides(advanced)?;

        let labels = advanced.map(|a| a.labels.clone()).unwrap_or_default();
        let ns = spec.namespace.as_str();
        let tenant = spec.tenant_id.as_str();
        let mut out = BTreeMap::new();

        out.insert(
            "00-namespace.yaml".to_string(),
            objects::namespace(ns, tenant, &labels, &annotations(spec, advanced)),
        );
        out.insert(
            "02-configmap.yaml".to_string(),
            objects::config_map(ns, tenant, &config_data(spec), &labels),
        );

        // An empty tenant gets only its namespace and configuration
        if spec.components.is_empty() {
            return Ok(out);
        }

        out.insert(
            "01-resourcequota.yaml".to_string(),
            objects::resource_quota(ns, tenant, &spec.quota()),
        );
        out.insert(
            "03-networkpolicy.yaml".to_string(),
            objects::network_policy(ns, tenant),
        );

        for plan in &spec.components {
            let config = self.service_config(spec, plan, None, advanced)?;
            let name = config.name();
            out.insert(
                format!("10-{}-deployment.yaml", name),
                objects::deployment(ns, tenant, &config),
            );
            out.insert(
                format!("10-{}-service.yaml", name),
                objects::service(ns, tenant, &config),
            );
            if let Some(scaling) = &config.autoscaling {
                out.insert(
                    format!("10-{}-hpa.yaml", name),
                    objects::horizontal_autoscaler(ns, tenant, &config, scaling),
                );
            }
            if config.vertical_scaling {
                out.insert(
                    format!("10-{}-vpa.yaml", name),
                    objects::vertical_autoscaler(ns, tenant, &config),
                );
            }
            out.insert(
                format!("90-{}-servicemonitor.yaml", name),
                objects::service_monitor(ns, tenant, name),
            );
        }
        Ok(out)
    }

    /// Deployment config for one component; `image` overrides the configured default
    pub fn service_config(
        &self,
        spec: &TenantSpec,
        plan: &ComponentPlan,
        image: Option<String>,
        advanced: Option<&AdvancedConfig>,
    ) -> Result<ServiceConfig, RenderError> {
        let image = image.unwrap_or_else(|| self.default_image(plan, advanced));
        ServiceConfig::from_plan(
            plan,
            image,
            &self.images.pull_policy,
            &spec.preset.scaling(),
            advanced,
        )
    }

    fn default_image(&self, plan: &ComponentPlan, advanced: Option<&AdvancedConfig>) -> String {
        let registry = advanced
            .and_then(|a| a.image_registry.as_deref())
            .unwrap_or(&self.images.registry);
        let tag = advanced
            .and_then(|a| a.image_tag.as_deref())
            .unwrap_or(&self.images.default_tag);
        image_reference(registry, plan.component, tag)
    }

    fn try_render(
        &self,
        spec: &TenantSpec,
        advanced: Option<&AdvancedConfig>,
    ) -> Result<BTreeMap<String, String>, RenderError> {
        self.manifests(spec, advanced)?
            .into_iter()
            .map(|(file, manifest)| {
                let doc = to_yaml(&file, &manifest)?;
                Ok((file, doc))
            })
            .collect()
    }

    fn fallback(&self, spec: &TenantSpec, reason: &str) -> Result<BTreeMap<String, String>, RenderError> {
        let no_labels = BTreeMap::new();
        let mut data = config_data(spec);
        data.insert("DEGRADED_REASON".to_string(), reason.to_string());

        let mut out = BTreeMap::new();
        let ns = objects::namespace(
            &spec.namespace,
            &spec.tenant_id,
            &no_labels,
            &annotations(spec, None),
        );
        out.insert("00-namespace.yaml".to_string(), to_yaml("00-namespace.yaml", &ns)?);
        let cm = objects::config_map(&spec.namespace, &spec.tenant_id, &data, &no_labels);
        out.insert("02-configmap.yaml".to_string(), to_yaml("02-configmap.yaml", &cm)?);
        Ok(out)
    }
}

fn validate_overrides(advanced: Option<&AdvancedConfig>) -> Result<(), RenderError> {
    let Some(advanced) = advanced else {
        return Ok(());
    };
    let invalid = |field: &str, reason: &str| RenderError::InvalidOverride {
        field: field.to_string(),
        reason: reason.to_string(),
    };
    if let Some(tag) = &advanced.image_tag {
        if tag.trim().is_empty() || tag.contains(char::is_whitespace) {
            return Err(invalid("imageTag", "must be a non-empty tag without spaces"));
        }
    }
    if let Some(registry) = &advanced.image_registry {
        if registry.trim().is_empty() {
            return Err(invalid("imageRegistry", "must not be empty"));
        }
    }
    if let (Some(min), Some(max)) = (advanced.min_replicas, advanced.max_replicas) {
        if min > max {
            return Err(invalid(
                "minReplicas",
                &format!("{} exceeds maxReplicas {}", min, max),
            ));
        }
    }
    if let Some(metric) = &advanced.custom_metric {
        if metric.name.trim().is_empty() || metric.target_average_value.trim().is_empty() {
            return Err(invalid("customMetric", "name and targetAverageValue are required"));
        }
    }
    for (key, value) in &advanced.labels {
        if !is_label_key(key) {
            return Err(invalid("labels", &format!("'{}' is not a valid label key", key)));
        }
        if !is_label_value(value) {
            return Err(invalid(
                "labels",
                &format!("'{}' is not a valid value for label '{}'", value, key),
            ));
        }
    }
    Ok(())
}

fn label_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$").expect("label name pattern is valid")
    })
}

fn label_prefix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
            .expect("label prefix pattern is valid")
    })
}

/// `[prefix/]name`: DNS subdomain prefix up to 253 chars, name up to 63
fn is_label_key(key: &str) -> bool {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };
    let prefix_ok =
        prefix.map_or(true, |p| p.len() <= 253 && label_prefix_pattern().is_match(p));
    prefix_ok && name.len() <= 63 && label_name_pattern().is_match(name)
}

/// Empty, or up to 63 alphanumerics with inner `-_.`
fn is_label_value(value: &str) -> bool {
    value.is_empty() || (value.len() <= 63 && label_name_pattern().is_match(value))
}

fn annotations(spec: &TenantSpec, advanced: Option<&AdvancedConfig>) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    annotations.insert(PROFILE_ANNOTATION.to_string(), spec.profile_version.clone());
    if let Some(at) = advanced.and_then(|a| a.rendered_at) {
        annotations.insert(RENDERED_AT_ANNOTATION.to_string(), at.to_rfc3339());
    }
    annotations
}

fn config_data(spec: &TenantSpec) -> BTreeMap<String, String> {
    let mut data = BTreeMap::new();
    data.insert("TENANT_ID".to_string(), spec.tenant_id.clone());
    data.insert("TENANT_PRESET".to_string(), spec.preset.to_string());
    data.insert("GPU_TIER".to_string(), spec.gpu_type.key().to_string());
    data.insert("GPU_MODEL".to_string(), spec.gpu_type.spec().model.to_string());
    data.insert("TOTAL_CHANNELS".to_string(), spec.total_channels.to_string());
    data.insert("TOTAL_USERS".to_string(), spec.total_users.to_string());
    data.insert("PROFILE_VERSION".to_string(), spec.profile_version.clone());
    for plan in &spec.components {
        data.insert(
            format!("{}_ENDPOINT", plan.component.key().to_ascii_uppercase()),
            format!(
                "{}.{}.svc.cluster.local:{}",
                plan.component.key(),
                spec.namespace,
                plan.port
            ),
        );
    }
    data
}

fn to_yaml(file: &str, manifest: &Manifest) -> Result<String, RenderError> {
    serde_yaml::to_string(&manifest.body).map_err(|e| RenderError::Serialize {
        document: file.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::{
        generate_tenant_specs, ResourceCalculator, ServiceRequirement, ServiceType,
    };
    use crate::config::request::GpuSelection;
    use chrono::{TimeZone, Utc};

    fn spec(pairs: &[(ServiceType, u64)]) -> TenantSpec {
        generate_tenant_specs(
            &ResourceCalculator::default(),
            "acme",
            &ServiceRequirement::from_pairs(pairs.iter().copied()),
            GpuSelection::Auto,
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_full_package_file_order() {
        let package = ManifestGenerator::default()
            .render(&spec(&[(ServiceType::Callbot, 160)]), None)
            .unwrap();
        assert!(!package.degraded);
        let files = package.file_names();
        assert_eq!(files[0], "00-namespace.yaml");
        assert_eq!(files[1], "01-resourcequota.yaml");
        assert_eq!(files[2], "02-configmap.yaml");
        assert_eq!(files[3], "03-networkpolicy.yaml");
        assert!(files.contains(&"10-nlp-deployment.yaml"));
        assert!(files.contains(&"10-tts-hpa.yaml"));
        assert!(files.contains(&"90-stt-servicemonitor.yaml"));
        assert!(!files.iter().any(|f| f.ends_with("-vpa.yaml")));
        assert!(files.last().unwrap().starts_with("90-"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let s = spec(&[(ServiceType::Chatbot, 40), (ServiceType::Ta, 5)]);
        let generator = ManifestGenerator::default();
        let first = generator.render(&s, None).unwrap();
        let second = generator.render(&s, None).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.to_stream(), second.to_stream());
    }

    #[test]
    fn test_empty_tenant_gets_namespace_and_configmap() {
        let package = ManifestGenerator::default().render(&spec(&[]), None).unwrap();
        assert!(!package.degraded);
        assert_eq!(
            package.file_names(),
            vec!["00-namespace.yaml", "02-configmap.yaml"]
        );
    }

    #[test]
    fn test_invalid_override_falls_back() {
        let advanced = AdvancedConfig {
            image_tag: Some("  ".to_string()),
            ..Default::default()
        };
        let package = ManifestGenerator::default()
            .render(&spec(&[(ServiceType::Callbot, 10)]), Some(&advanced))
            .unwrap();
        assert!(package.degraded);
        assert_eq!(
            package.file_names(),
            vec!["00-namespace.yaml", "02-configmap.yaml"]
        );
        assert!(package.documents["02-configmap.yaml"].contains("DEGRADED_REASON"));
    }

    #[test]
    fn test_invalid_label_falls_back() {
        let mut labels = BTreeMap::new();
        labels.insert("not a valid/key!".to_string(), "x y".to_string());
        let advanced = AdvancedConfig {
            labels,
            ..Default::default()
        };
        let package = ManifestGenerator::default()
            .render(&spec(&[(ServiceType::Callbot, 10)]), Some(&advanced))
            .unwrap();
        assert!(package.degraded);
        assert!(!package.documents["00-namespace.yaml"].contains("not a valid"));
    }

    #[test]
    fn test_label_syntax() {
        assert!(is_label_key("team"));
        assert!(is_label_key("kubeplan.io/cost-center"));
        assert!(!is_label_key("kubeplan.io/"));
        assert!(!is_label_key("Bad_Prefix/name"));
        assert!(!is_label_key(&"a".repeat(64)));
        assert!(is_label_value(""));
        assert!(is_label_value("v1.2_rc-3"));
        assert!(!is_label_value("x y"));
        assert!(!is_label_value("-edge"));
    }

    #[test]
    fn test_max_replicas_below_plan_still_renders() {
        let advanced = AdvancedConfig {
            max_replicas: Some(3),
            ..Default::default()
        };
        let package = ManifestGenerator::default()
            .render(&spec(&[(ServiceType::Callbot, 160)]), Some(&advanced))
            .unwrap();
        assert!(!package.degraded);
        assert!(package.documents["10-stt-hpa.yaml"].contains("maxReplicas: 3"));
    }

    #[test]
    fn test_overrides_apply() {
        let mut labels = BTreeMap::new();
        labels.insert("team".to_string(), "voice".to_string());
        let advanced = AdvancedConfig {
            image_registry: Some("ghcr.io/acme".to_string()),
            image_tag: Some("2.0.1".to_string()),
            enable_vpa: Some(true),
            labels,
            rendered_at: Some(Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()),
            ..Default::default()
        };
        let package = ManifestGenerator::default()
            .render(&spec(&[(ServiceType::Callbot, 10)]), Some(&advanced))
            .unwrap();
        let deployment = &package.documents["10-tts-deployment.yaml"];
        assert!(deployment.contains("ghcr.io/acme/tts:2.0.1"));
        assert!(deployment.contains("team: voice"));
        assert!(package.documents.contains_key("10-tts-vpa.yaml"));
        assert!(package.documents["00-namespace.yaml"].contains(RENDERED_AT_ANNOTATION));
    }

    #[test]
    fn test_configmap_lists_endpoints() {
        let package = ManifestGenerator::default()
            .render(&spec(&[(ServiceType::Callbot, 10)]), None)
            .unwrap();
        let cm = &package.documents["02-configmap.yaml"];
        assert!(cm.contains("NLP_ENDPOINT"));
        assert!(cm.contains("nlp.tenant-acme.svc.cluster.local:8000"));
        assert!(cm.contains("GPU_TIER: tier1"));
    }
}
