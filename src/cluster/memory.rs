//! In-memory cluster for dry runs and tests
//!
//! Objects are stored as raw JSON. Deployments report all replicas ready
//! unless readiness is overridden, and faults can be injected per object.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde_json::{json, Value};
use tracing::debug;

use super::api::{ApiError, ClusterApi, DeploymentState, NamespaceInfo, PodInfo};
use crate::manifest::objects::{labels_of, LabelSelector, Manifest, ObjectKind};

type ObjectKey = (ObjectKind, String, String);

fn key(kind: ObjectKind, namespace: Option<&str>, name: &str) -> ObjectKey {
    (
        kind,
        namespace.unwrap_or_default().to_string(),
        name.to_string(),
    )
}

fn identity(kind: ObjectKind, namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{}/{}/{}", kind, ns, name),
        None => format!("{}/{}", kind, name),
    }
}

/// A cluster that lives in memory
#[derive(Default)]
pub struct MemoryCluster {
    objects: DashMap<ObjectKey, Value>,
    ready_overrides: DashMap<(String, String), u32>,
    failures: DashMap<(ObjectKind, String), String>,
    delays: DashMap<String, Duration>,
    write_delays: DashMap<String, Duration>,
    missing_kinds: DashSet<ObjectKind>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Reject kinds whose CRD is not installed (e.g. no metrics collector)
    pub fn without_kind(self, kind: ObjectKind) -> Self {
        self.missing_kinds.insert(kind);
        self
    }

    /// Fail every create/replace of `kind` named `name` with a server error
    pub fn fail_on(&self, kind: ObjectKind, name: &str, message: &str) {
        self.failures
            .insert((kind, name.to_string()), message.to_string());
    }

    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    /// Slow down reads of one namespace
    pub fn delay_namespace(&self, namespace: &str, delay: Duration) {
        self.delays.insert(namespace.to_string(), delay);
    }

    /// Slow down creates, replaces and deletes in one namespace
    pub fn delay_writes(&self, namespace: &str, delay: Duration) {
        self.write_delays.insert(namespace.to_string(), delay);
    }

    /// Pin the ready replica count of a deployment
    pub fn set_ready_replicas(&self, namespace: &str, deployment: &str, ready: u32) {
        self.ready_overrides
            .insert((namespace.to_string(), deployment.to_string()), ready);
    }

    pub fn clear_ready_override(&self, namespace: &str, deployment: &str) {
        self.ready_overrides
            .remove(&(namespace.to_string(), deployment.to_string()));
    }

    pub fn contains(&self, kind: ObjectKind, namespace: Option<&str>, name: &str) -> bool {
        self.objects.contains_key(&key(kind, namespace, name))
    }

    pub fn object(&self, kind: ObjectKind, namespace: Option<&str>, name: &str) -> Option<Value> {
        self.objects
            .get(&key(kind, namespace, name))
            .map(|entry| entry.value().clone())
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Objects of one namespace, sorted by kind then name
    pub fn objects_in(&self, namespace: &str) -> Vec<(ObjectKind, String)> {
        let mut found: Vec<_> = self
            .objects
            .iter()
            .filter(|entry| entry.key().1 == namespace)
            .map(|entry| (entry.key().0, entry.key().2.clone()))
            .collect();
        found.sort();
        found
    }

    fn check_write(&self, manifest: &Manifest) -> Result<(), ApiError> {
        if self.missing_kinds.contains(&manifest.kind) {
            return Err(ApiError::NotFound(format!(
                "resource type {}",
                manifest.kind.plural()
            )));
        }
        if let Some(message) = self.failures.get(&(manifest.kind, manifest.name.clone())) {
            return Err(ApiError::Api {
                status: 500,
                message: message.value().clone(),
            });
        }
        if let Some(ns) = &manifest.namespace {
            if !self.contains(ObjectKind::Namespace, None, ns) {
                return Err(ApiError::NotFound(format!("Namespace/{}", ns)));
            }
        }
        Ok(())
    }

    async fn maybe_delay_write(&self, namespace: Option<&str>, name: &str) {
        let delay = self
            .write_delays
            .get(namespace.unwrap_or(name))
            .map(|d| *d.value());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    async fn maybe_delay(&self, namespace: &str) {
        let delay = self.delays.get(namespace).map(|d| *d.value());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn deployment_state(&self, namespace: &str, body: &Value) -> Option<DeploymentState> {
        let mut state = DeploymentState::from_object(body)?;
        state.ready_replicas = self
            .ready_overrides
            .get(&(namespace.to_string(), state.name.clone()))
            .map(|r| *r.value())
            .unwrap_or(state.desired_replicas);
        state.available_replicas = state.ready_replicas;
        state.updated_replicas = state.desired_replicas;
        Some(state)
    }

    fn deployments(&self, namespace: &str) -> Vec<DeploymentState> {
        let mut deployments: Vec<_> = self
            .objects
            .iter()
            .filter(|e| e.key().0 == ObjectKind::Deployment && e.key().1 == namespace)
            .filter_map(|e| self.deployment_state(namespace, e.value()))
            .collect();
        deployments.sort_by(|a, b| a.name.cmp(&b.name));
        deployments
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn create(&self, manifest: &Manifest) -> Result<(), ApiError> {
        self.maybe_delay_write(manifest.namespace.as_deref(), &manifest.name)
            .await;
        self.check_write(manifest)?;
        let k = key(manifest.kind, manifest.namespace.as_deref(), &manifest.name);
        if self.objects.contains_key(&k) {
            return Err(ApiError::AlreadyExists(manifest.identity()));
        }
        debug!(object = %manifest.identity(), "Created object");
        self.objects.insert(k, manifest.body.clone());
        Ok(())
    }

    async fn replace(&self, manifest: &Manifest) -> Result<(), ApiError> {
        self.maybe_delay_write(manifest.namespace.as_deref(), &manifest.name)
            .await;
        self.check_write(manifest)?;
        let k = key(manifest.kind, manifest.namespace.as_deref(), &manifest.name);
        match self.objects.get_mut(&k) {
            Some(mut existing) => {
                *existing = manifest.body.clone();
                debug!(object = %manifest.identity(), "Replaced object");
                Ok(())
            }
            None => Err(ApiError::NotFound(manifest.identity())),
        }
    }

    async fn get(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, ApiError> {
        let mut body = self
            .object(kind, namespace, name)
            .ok_or_else(|| ApiError::NotFound(identity(kind, namespace, name)))?;
        if kind == ObjectKind::Deployment {
            if let Some(state) = self.deployment_state(namespace.unwrap_or_default(), &body) {
                body["status"] = json!({
                    "readyReplicas": state.ready_replicas,
                    "availableReplicas": state.available_replicas,
                    "updatedReplicas": state.updated_replicas,
                });
            }
        }
        Ok(body)
    }

    async fn delete(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), ApiError> {
        self.maybe_delay_write(namespace, name).await;
        if self.objects.remove(&key(kind, namespace, name)).is_none() {
            return Err(ApiError::NotFound(identity(kind, namespace, name)));
        }
        if kind == ObjectKind::Namespace {
            self.objects.retain(|k, _| k.1 != name);
            self.ready_overrides.retain(|k, _| k.0 != name);
        }
        debug!(object = %identity(kind, namespace, name), "Deleted object");
        Ok(())
    }

    async fn list_namespaces(
        &self,
        selector: &LabelSelector,
    ) -> Result<Vec<NamespaceInfo>, ApiError> {
        let mut namespaces: Vec<_> = self
            .objects
            .iter()
            .filter(|e| e.key().0 == ObjectKind::Namespace)
            .filter(|e| selector.matches(&labels_of(e.value())))
            .filter_map(|e| NamespaceInfo::from_object(e.value()))
            .collect();
        namespaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(namespaces)
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<DeploymentState>, ApiError> {
        self.maybe_delay(namespace).await;
        if !self.contains(ObjectKind::Namespace, None, namespace) {
            return Err(ApiError::NotFound(format!("Namespace/{}", namespace)));
        }
        Ok(self.deployments(namespace))
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodInfo>, ApiError> {
        self.maybe_delay(namespace).await;
        let pods = self
            .deployments(namespace)
            .into_iter()
            .flat_map(|d| {
                let labels: BTreeMap<String, String> = d.labels.clone();
                (0..d.desired_replicas).map(move |i| PodInfo {
                    name: format!("{}-{}", d.name, i),
                    phase: "Running".to_string(),
                    ready: i < d.ready_replicas,
                    labels: labels.clone(),
                })
            })
            .collect();
        Ok(pods)
    }
}
