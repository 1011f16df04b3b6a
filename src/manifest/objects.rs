//! Kubernetes object builders shared by the generator and the orchestrator

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::workload::{AutoscalingConfig, ServiceConfig};
use crate::capacity::QuotaPolicy;
use crate::config::{MANAGED_BY_LABEL, MANAGED_BY_VALUE};

/// Label carrying the tenant id
pub const TENANT_LABEL: &str = "kubeplan.io/tenant";
/// Label carrying the component name
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/name";
/// Label carrying the deployed image tag
pub const VERSION_LABEL: &str = "app.kubernetes.io/version";
/// Namespace of the metrics collector
pub const MONITORING_NAMESPACE: &str = "monitoring";
/// Namespace of the ingress controller
pub const INGRESS_NAMESPACE: &str = "ingress-nginx";

const GPU_RESOURCE: &str = "nvidia.com/gpu";
const ACCELERATOR_LABEL: &str = "accelerator";

/// Kinds of object this crate creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Namespace,
    ResourceQuota,
    ConfigMap,
    NetworkPolicy,
    Deployment,
    Service,
    HorizontalPodAutoscaler,
    VerticalPodAutoscaler,
    ServiceMonitor,
}

impl ObjectKind {
    pub fn api_version(&self) -> &'static str {
        match self {
            ObjectKind::Namespace
            | ObjectKind::ResourceQuota
            | ObjectKind::ConfigMap
            | ObjectKind::Service => "v1",
            ObjectKind::NetworkPolicy => "networking.k8s.io/v1",
            ObjectKind::Deployment => "apps/v1",
            ObjectKind::HorizontalPodAutoscaler => "autoscaling/v2",
            ObjectKind::VerticalPodAutoscaler => "autoscaling.k8s.io/v1",
            ObjectKind::ServiceMonitor => "monitoring.coreos.com/v1",
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ObjectKind::Namespace => "Namespace",
            ObjectKind::ResourceQuota => "ResourceQuota",
            ObjectKind::ConfigMap => "ConfigMap",
            ObjectKind::NetworkPolicy => "NetworkPolicy",
            ObjectKind::Deployment => "Deployment",
            ObjectKind::Service => "Service",
            ObjectKind::HorizontalPodAutoscaler => "HorizontalPodAutoscaler",
            ObjectKind::VerticalPodAutoscaler => "VerticalPodAutoscaler",
            ObjectKind::ServiceMonitor => "ServiceMonitor",
        }
    }

    /// Resource name used in API paths
    pub fn plural(&self) -> &'static str {
        match self {
            ObjectKind::Namespace => "namespaces",
            ObjectKind::ResourceQuota => "resourcequotas",
            ObjectKind::ConfigMap => "configmaps",
            ObjectKind::NetworkPolicy => "networkpolicies",
            ObjectKind::Deployment => "deployments",
            ObjectKind::Service => "services",
            ObjectKind::HorizontalPodAutoscaler => "horizontalpodautoscalers",
            ObjectKind::VerticalPodAutoscaler => "verticalpodautoscalers",
            ObjectKind::ServiceMonitor => "servicemonitors",
        }
    }

    pub fn is_namespaced(&self) -> bool {
        !matches!(self, ObjectKind::Namespace)
    }

    /// Short suffix used in manifest file names
    pub fn file_suffix(&self) -> &'static str {
        match self {
            ObjectKind::Namespace => "namespace",
            ObjectKind::ResourceQuota => "resourcequota",
            ObjectKind::ConfigMap => "configmap",
            ObjectKind::NetworkPolicy => "networkpolicy",
            ObjectKind::Deployment => "deployment",
            ObjectKind::Service => "service",
            ObjectKind::HorizontalPodAutoscaler => "hpa",
            ObjectKind::VerticalPodAutoscaler => "vpa",
            ObjectKind::ServiceMonitor => "servicemonitor",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// A rendered object together with its identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub kind: ObjectKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    pub body: Value,
}

impl Manifest {
    fn new(kind: ObjectKind, namespace: Option<&str>, name: &str, body: Value) -> Self {
        Self {
            kind,
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
            body,
        }
    }

    /// `Kind/namespace/name` for logs and errors
    pub fn identity(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}/{}", self.kind, ns, self.name),
            None => format!("{}/{}", self.kind, self.name),
        }
    }

    /// Labels from the object's metadata
    pub fn labels(&self) -> BTreeMap<String, String> {
        labels_of(&self.body)
    }
}

/// Read `metadata.labels` from a raw object
pub fn labels_of(body: &Value) -> BTreeMap<String, String> {
    body.pointer("/metadata/labels")
        .and_then(Value::as_object)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Label selector for filtering objects
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    #[serde(rename = "matchLabels")]
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    /// Create a selector that matches a specific label
    pub fn matching(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut match_labels = BTreeMap::new();
        match_labels.insert(key.into(), value.into());
        Self { match_labels }
    }

    /// Selector for namespaces created by this tool
    pub fn managed() -> Self {
        Self::matching(MANAGED_BY_LABEL, MANAGED_BY_VALUE)
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }

    /// `k=v,k2=v2` form used in query strings
    pub fn to_query(&self) -> String {
        self.match_labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Labels stamped on every object of a tenant
pub fn tenant_labels(tenant_id: &str, extra: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut labels = extra.clone();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(TENANT_LABEL.to_string(), tenant_id.to_string());
    labels
}

fn metadata(
    name: &str,
    namespace: Option<&str>,
    labels: &BTreeMap<String, String>,
    annotations: &BTreeMap<String, String>,
) -> Value {
    let mut meta = json!({ "name": name, "labels": labels });
    if let Some(ns) = namespace {
        meta["namespace"] = json!(ns);
    }
    if !annotations.is_empty() {
        meta["annotations"] = json!(annotations);
    }
    meta
}

fn object(kind: ObjectKind, metadata: Value, spec_key: &str, spec: Value) -> Value {
    let mut body = json!({
        "apiVersion": kind.api_version(),
        "kind": kind.kind(),
        "metadata": metadata,
    });
    if !spec_key.is_empty() {
        body[spec_key] = spec;
    }
    body
}

// ============================================================================
// SBIO: Pure builders
// ============================================================================

pub fn namespace(
    namespace: &str,
    tenant_id: &str,
    labels: &BTreeMap<String, String>,
    annotations: &BTreeMap<String, String>,
) -> Manifest {
    let mut labels = tenant_labels(tenant_id, labels);
    labels.insert(
        "kubernetes.io/metadata.name".to_string(),
        namespace.to_string(),
    );
    let body = object(
        ObjectKind::Namespace,
        metadata(namespace, None, &labels, annotations),
        "",
        Value::Null,
    );
    Manifest::new(ObjectKind::Namespace, None, namespace, body)
}

pub fn resource_quota(namespace: &str, tenant_id: &str, quota: &QuotaPolicy) -> Manifest {
    let name = "tenant-quota";
    let labels = tenant_labels(tenant_id, &BTreeMap::new());
    let hard = json!({
        "requests.cpu": quota.cpu_cores.to_string(),
        "limits.cpu": quota.cpu_cores.to_string(),
        "requests.memory": format!("{}Gi", quota.memory_gb),
        "limits.memory": format!("{}Gi", quota.memory_gb),
        "requests.storage": format!("{}Gi", quota.storage_gb),
        "requests.nvidia.com/gpu": quota.gpus.to_string(),
        "pods": quota.pods.to_string(),
    });
    let body = object(
        ObjectKind::ResourceQuota,
        metadata(name, Some(namespace), &labels, &BTreeMap::new()),
        "spec",
        json!({ "hard": hard }),
    );
    Manifest::new(ObjectKind::ResourceQuota, Some(namespace), name, body)
}

/// Ingress only from the tenant itself, the metrics collector and the ingress controller
pub fn network_policy(namespace: &str, tenant_id: &str) -> Manifest {
    let name = "tenant-isolation";
    let labels = tenant_labels(tenant_id, &BTreeMap::new());
    let from_namespace = |ns: &str| {
        json!({ "namespaceSelector": { "matchLabels": { "kubernetes.io/metadata.name": ns } } })
    };
    let spec = json!({
        "podSelector": {},
        "policyTypes": ["Ingress"],
        "ingress": [{
            "from": [
                from_namespace(namespace),
                from_namespace(MONITORING_NAMESPACE),
                from_namespace(INGRESS_NAMESPACE),
            ]
        }],
    });
    let body = object(
        ObjectKind::NetworkPolicy,
        metadata(name, Some(namespace), &labels, &BTreeMap::new()),
        "spec",
        spec,
    );
    Manifest::new(ObjectKind::NetworkPolicy, Some(namespace), name, body)
}

pub fn config_map(
    namespace: &str,
    tenant_id: &str,
    data: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> Manifest {
    let name = "tenant-config";
    let labels = tenant_labels(tenant_id, labels);
    let body = object(
        ObjectKind::ConfigMap,
        metadata(name, Some(namespace), &labels, &BTreeMap::new()),
        "data",
        json!(data),
    );
    Manifest::new(ObjectKind::ConfigMap, Some(namespace), name, body)
}

fn workload_labels(tenant_id: &str, config: &ServiceConfig) -> BTreeMap<String, String> {
    let mut labels = tenant_labels(tenant_id, &config.labels);
    labels.insert(COMPONENT_LABEL.to_string(), config.name().to_string());
    labels
}

fn selector(config: &ServiceConfig) -> Value {
    json!({ COMPONENT_LABEL: config.name() })
}

pub fn deployment(namespace: &str, tenant_id: &str, config: &ServiceConfig) -> Manifest {
    let mut labels = workload_labels(tenant_id, config);
    labels.insert(VERSION_LABEL.to_string(), config.image_tag().to_string());

    let mut requests = json!({
        "cpu": format!("{}m", config.cpu_millis),
        "memory": format!("{}Mi", config.memory_mib),
    });
    let mut limits = requests.clone();
    if config.gpus > 0 {
        requests[GPU_RESOURCE] = json!(config.gpus.to_string());
        limits[GPU_RESOURCE] = json!(config.gpus.to_string());
    }

    let container = json!({
        "name": config.name(),
        "image": config.image,
        "imagePullPolicy": config.pull_policy,
        "ports": [{ "name": "serve", "containerPort": config.port }],
        "env": [
            { "name": "TENANT_ID", "value": tenant_id },
            { "name": "SERVICE_NAME", "value": config.name() },
        ],
        "envFrom": [{ "configMapRef": { "name": "tenant-config" } }],
        "resources": { "requests": requests, "limits": limits },
    });

    let mut pod_spec = json!({ "containers": [container] });
    if let Some(model) = &config.gpu_model {
        pod_spec["nodeSelector"] = json!({ ACCELERATOR_LABEL: model });
        pod_spec["tolerations"] = json!([{
            "key": GPU_RESOURCE,
            "operator": "Exists",
            "effect": "NoSchedule",
        }]);
    }

    let spec = json!({
        "replicas": config.replicas,
        "selector": { "matchLabels": selector(config) },
        "template": {
            "metadata": { "labels": labels },
            "spec": pod_spec,
        },
    });
    let body = object(
        ObjectKind::Deployment,
        metadata(config.name(), Some(namespace), &labels, &BTreeMap::new()),
        "spec",
        spec,
    );
    Manifest::new(ObjectKind::Deployment, Some(namespace), config.name(), body)
}

pub fn service(namespace: &str, tenant_id: &str, config: &ServiceConfig) -> Manifest {
    let labels = workload_labels(tenant_id, config);
    let spec = json!({
        "type": "ClusterIP",
        "selector": selector(config),
        "ports": [{ "name": "serve", "port": config.port, "targetPort": config.port }],
    });
    let body = object(
        ObjectKind::Service,
        metadata(config.name(), Some(namespace), &labels, &BTreeMap::new()),
        "spec",
        spec,
    );
    Manifest::new(ObjectKind::Service, Some(namespace), config.name(), body)
}

pub fn horizontal_autoscaler(
    namespace: &str,
    tenant_id: &str,
    config: &ServiceConfig,
    scaling: &AutoscalingConfig,
) -> Manifest {
    let labels = workload_labels(tenant_id, config);
    let utilization = |resource: &str, target: u32| {
        json!({
            "type": "Resource",
            "resource": {
                "name": resource,
                "target": { "type": "Utilization", "averageUtilization": target },
            },
        })
    };
    let mut metrics = vec![
        utilization("cpu", scaling.target_cpu_utilization),
        utilization("memory", scaling.target_memory_utilization),
    ];
    if let Some(custom) = &scaling.custom_metric {
        metrics.push(json!({
            "type": "Pods",
            "pods": {
                "metric": { "name": custom.name },
                "target": { "type": "AverageValue", "averageValue": custom.target_average_value },
            },
        }));
    }

    let b = &scaling.behavior;
    let spec = json!({
        "scaleTargetRef": {
            "apiVersion": ObjectKind::Deployment.api_version(),
            "kind": ObjectKind::Deployment.kind(),
            "name": config.name(),
        },
        "minReplicas": scaling.min_replicas,
        "maxReplicas": scaling.max_replicas,
        "metrics": metrics,
        "behavior": {
            "scaleUp": {
                "stabilizationWindowSeconds": b.scale_up_stabilization_secs,
                "policies": [{ "type": "Percent", "value": b.scale_up_percent, "periodSeconds": b.period_secs }],
            },
            "scaleDown": {
                "stabilizationWindowSeconds": b.scale_down_stabilization_secs,
                "policies": [{ "type": "Percent", "value": b.scale_down_percent, "periodSeconds": b.period_secs }],
            },
        },
    });
    let body = object(
        ObjectKind::HorizontalPodAutoscaler,
        metadata(config.name(), Some(namespace), &labels, &BTreeMap::new()),
        "spec",
        spec,
    );
    Manifest::new(
        ObjectKind::HorizontalPodAutoscaler,
        Some(namespace),
        config.name(),
        body,
    )
}

/// Recommendation-only vertical autoscaler; never fights the horizontal one
pub fn vertical_autoscaler(namespace: &str, tenant_id: &str, config: &ServiceConfig) -> Manifest {
    let labels = workload_labels(tenant_id, config);
    let spec = json!({
        "targetRef": {
            "apiVersion": ObjectKind::Deployment.api_version(),
            "kind": ObjectKind::Deployment.kind(),
            "name": config.name(),
        },
        "updatePolicy": { "updateMode": "Off" },
    });
    let body = object(
        ObjectKind::VerticalPodAutoscaler,
        metadata(config.name(), Some(namespace), &labels, &BTreeMap::new()),
        "spec",
        spec,
    );
    Manifest::new(
        ObjectKind::VerticalPodAutoscaler,
        Some(namespace),
        config.name(),
        body,
    )
}

pub fn service_monitor(namespace: &str, tenant_id: &str, component: &str) -> Manifest {
    let mut labels = tenant_labels(tenant_id, &BTreeMap::new());
    labels.insert(COMPONENT_LABEL.to_string(), component.to_string());
    let spec = json!({
        "selector": { "matchLabels": { COMPONENT_LABEL: component } },
        "namespaceSelector": { "matchNames": [namespace] },
        "endpoints": [{ "port": "serve", "path": "/metrics", "interval": "30s" }],
    });
    let body = object(
        ObjectKind::ServiceMonitor,
        metadata(component, Some(namespace), &labels, &BTreeMap::new()),
        "spec",
        spec,
    );
    Manifest::new(ObjectKind::ServiceMonitor, Some(namespace), component, body)
}
