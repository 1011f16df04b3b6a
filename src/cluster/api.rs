//! Cluster API seam
//!
//! Everything that talks to a cluster goes through [`ClusterApi`], so the
//! orchestrator and the health monitor run unchanged against a real API
//! server ([`super::RestCluster`]) or the in-memory cluster used for dry runs
//! and tests ([`super::MemoryCluster`]).

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::manifest::objects::{labels_of, LabelSelector, Manifest, ObjectKind, VERSION_LABEL};
use crate::manifest::workload::image_tag;

// ============================================================================
// Data structures (pure, no I/O)
// ============================================================================

/// A namespace as listed by the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceInfo {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl NamespaceInfo {
    pub fn from_object(body: &Value) -> Option<Self> {
        let name = body.pointer("/metadata/name")?.as_str()?.to_string();
        Some(Self {
            name,
            labels: labels_of(body),
        })
    }
}

/// Observed state of one deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentState {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Image of the first container
    pub image: String,
    #[serde(rename = "desiredReplicas")]
    pub desired_replicas: u32,
    #[serde(rename = "readyReplicas")]
    pub ready_replicas: u32,
    #[serde(rename = "availableReplicas")]
    #[serde(default)]
    pub available_replicas: u32,
    /// Replicas already running the current pod template
    #[serde(rename = "updatedReplicas")]
    #[serde(default)]
    pub updated_replicas: u32,
}

impl DeploymentState {
    pub fn from_object(body: &Value) -> Option<Self> {
        let name = body.pointer("/metadata/name")?.as_str()?.to_string();
        let image = body
            .pointer("/spec/template/spec/containers/0/image")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let count = |pointer: &str| {
            body.pointer(pointer)
                .and_then(Value::as_u64)
                .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
                .unwrap_or(0)
        };
        Some(Self {
            name,
            labels: labels_of(body),
            image,
            desired_replicas: count("/spec/replicas"),
            ready_replicas: count("/status/readyReplicas"),
            available_replicas: count("/status/availableReplicas"),
            updated_replicas: count("/status/updatedReplicas"),
        })
    }

    /// Tag the deployment is actually running
    pub fn running_tag(&self) -> &str {
        image_tag(&self.image)
    }

    /// Tag recorded in the version label, if any
    pub fn labelled_version(&self) -> Option<&str> {
        self.labels.get(VERSION_LABEL).map(String::as_str)
    }
}

/// A pod as listed by the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub phase: String,
    pub ready: bool,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl PodInfo {
    pub fn from_object(body: &Value) -> Option<Self> {
        let name = body.pointer("/metadata/name")?.as_str()?.to_string();
        let phase = body
            .pointer("/status/phase")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string();
        let ready = body
            .pointer("/status/conditions")
            .and_then(Value::as_array)
            .map(|conditions| {
                conditions.iter().any(|c| {
                    c.get("type").and_then(Value::as_str) == Some("Ready")
                        && c.get("status").and_then(Value::as_str) == Some("True")
                })
            })
            .unwrap_or(false);
        Some(Self {
            name,
            phase,
            ready,
            labels: labels_of(body),
        })
    }
}

/// Raw cluster API failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// A create/replace/delete failure against one identified object
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Failed to apply {kind} '{name}' in namespace '{namespace}': {reason}")]
pub struct ClusterApplyError {
    pub kind: ObjectKind,
    /// Owning namespace; the namespace itself for namespace objects
    pub namespace: String,
    pub name: String,
    pub reason: String,
}

impl ClusterApplyError {
    pub fn new(
        kind: ObjectKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn for_manifest(manifest: &Manifest, reason: impl Into<String>) -> Self {
        let namespace = manifest
            .namespace
            .clone()
            .unwrap_or_else(|| manifest.name.clone());
        Self::new(manifest.kind, namespace, manifest.name.clone(), reason)
    }
}

// ============================================================================
// SBIO: Trait for abstraction (allows mocking in tests)
// ============================================================================

#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create an object; fails with [`ApiError::AlreadyExists`] if present
    async fn create(&self, manifest: &Manifest) -> Result<(), ApiError>;

    /// Replace an existing object; fails with [`ApiError::NotFound`] if absent
    async fn replace(&self, manifest: &Manifest) -> Result<(), ApiError>;

    async fn get(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, ApiError>;

    async fn delete(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), ApiError>;

    async fn list_namespaces(&self, selector: &LabelSelector)
        -> Result<Vec<NamespaceInfo>, ApiError>;

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<DeploymentState>, ApiError>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodInfo>, ApiError>;
}
