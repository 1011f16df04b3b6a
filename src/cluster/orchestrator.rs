//! Cluster Orchestrator - idempotent tenant state transitions
//!
//! Every operation can be retried after a partial failure:
//! - "already exists" counts as success for creates
//! - deployments are created or replaced, so a changed image rolls out
//! - deleting a missing tenant succeeds
//!
//! Applies to one namespace are serialized, every API call is time-boxed, and
//! an in-flight apply stops at the next call once the cancellation token
//! fires. Partial state is left for the next idempotent re-apply.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::api::{ApiError, ClusterApi, ClusterApplyError, DeploymentState};
use crate::capacity::{tenant_namespace, QuotaPolicy, TenantPreset};
use crate::manifest::objects::{self, LabelSelector, Manifest, ObjectKind, VERSION_LABEL};
use crate::manifest::workload::{image_tag, ServiceConfig};

/// Default per-call timeout
pub const DEFAULT_APPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Observed cluster state of one tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantClusterStatus {
    pub namespace: String,
    pub deployments: Vec<DeploymentState>,
}

impl TenantClusterStatus {
    pub fn all_ready(&self) -> bool {
        self.deployments
            .iter()
            .all(|d| d.desired_replicas > 0 && d.ready_replicas >= d.desired_replicas)
    }
}

/// Applies tenant objects through a [`ClusterApi`]
pub struct ClusterOrchestrator {
    api: Arc<dyn ClusterApi>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl ClusterOrchestrator {
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self {
            api,
            locks: DashMap::new(),
            timeout: DEFAULT_APPLY_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn api(&self) -> &Arc<dyn ClusterApi> {
        &self.api
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn lock(&self, namespace: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(namespace.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Forget a namespace's lock; must be called while holding it
    ///
    /// An entry that another caller has already cloned is kept so both sides
    /// keep contending on the same mutex.
    fn release_lock(&self, namespace: &str) {
        self.locks
            .remove_if(namespace, |_, lock| Arc::strong_count(lock) <= 2);
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Run one API call under the timeout and the cancellation token
    async fn call<T, F>(&self, manifest: &Manifest, fut: F) -> Result<Result<T, ApiError>, ClusterApplyError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                Err(ClusterApplyError::for_manifest(manifest, "cancelled"))
            }
            result = tokio::time::timeout(self.timeout, fut) => match result {
                Ok(inner) => Ok(inner),
                Err(_) => Err(ClusterApplyError::for_manifest(
                    manifest,
                    format!("timed out after {:?}", self.timeout),
                )),
            },
        }
    }

    /// Create; an existing object is left as is
    async fn ensure(&self, manifest: &Manifest) -> Result<(), ClusterApplyError> {
        match self.call(manifest, self.api.create(manifest)).await? {
            Ok(()) => {
                debug!(object = %manifest.identity(), "Created");
                Ok(())
            }
            Err(ApiError::AlreadyExists(_)) => {
                debug!(object = %manifest.identity(), "Already exists");
                Ok(())
            }
            Err(e) => Err(ClusterApplyError::for_manifest(manifest, e.to_string())),
        }
    }

    /// Create, or replace when present
    async fn upsert(&self, manifest: &Manifest) -> Result<(), ClusterApplyError> {
        match self.call(manifest, self.api.create(manifest)).await? {
            Ok(()) => Ok(()),
            Err(ApiError::AlreadyExists(_)) => {
                match self.call(manifest, self.api.replace(manifest)).await? {
                    Ok(()) => {
                        debug!(object = %manifest.identity(), "Replaced");
                        Ok(())
                    }
                    Err(e) => Err(ClusterApplyError::for_manifest(manifest, e.to_string())),
                }
            }
            Err(e) => Err(ClusterApplyError::for_manifest(manifest, e.to_string())),
        }
    }

    /// Apply a single object into its namespace
    pub async fn apply(&self, manifest: &Manifest) -> Result<(), ClusterApplyError> {
        let ns = manifest
            .namespace
            .clone()
            .unwrap_or_else(|| manifest.name.clone());
        let _guard = self.lock(&ns).await;
        self.ensure(manifest).await
    }

    /// Create the tenant namespace with the preset's default quota
    pub async fn create_namespace(
        &self,
        tenant_id: &str,
        preset: TenantPreset,
    ) -> Result<(), ClusterApplyError> {
        self.create_namespace_with_quota(tenant_id, &preset.quota(), &BTreeMap::new())
            .await
    }

    /// Create the tenant namespace, quota and isolation policy
    pub async fn create_namespace_with_quota(
        &self,
        tenant_id: &str,
        quota: &QuotaPolicy,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), ClusterApplyError> {
        let ns = tenant_namespace(tenant_id);
        let _guard = self.lock(&ns).await;

        self.ensure(&objects::namespace(&ns, tenant_id, labels, &BTreeMap::new()))
            .await?;
        self.upsert(&objects::resource_quota(&ns, tenant_id, quota))
            .await?;
        self.ensure(&objects::network_policy(&ns, tenant_id)).await?;

        info!(tenant = tenant_id, namespace = %ns, "Namespace ready");
        Ok(())
    }

    /// Deploy one service: deployment, service, and its autoscalers
    pub async fn deploy_service(
        &self,
        tenant_id: &str,
        config: &ServiceConfig,
    ) -> Result<(), ClusterApplyError> {
        let ns = tenant_namespace(tenant_id);
        let _guard = self.lock(&ns).await;

        self.upsert(&objects::deployment(&ns, tenant_id, config))
            .await?;
        self.ensure(&objects::service(&ns, tenant_id, config)).await?;
        if let Some(scaling) = &config.autoscaling {
            self.upsert(&objects::horizontal_autoscaler(
                &ns, tenant_id, config, scaling,
            ))
            .await?;
        }
        if config.vertical_scaling {
            self.ensure(&objects::vertical_autoscaler(&ns, tenant_id, config))
                .await?;
        }

        info!(
            tenant = tenant_id,
            service = config.name(),
            image = %config.image,
            replicas = config.replicas,
            "Service deployed"
        );
        Ok(())
    }

    /// Point an existing deployment at another image
    pub async fn rollout_image(
        &self,
        tenant_id: &str,
        service: &str,
        image: &str,
    ) -> Result<(), ClusterApplyError> {
        let ns = tenant_namespace(tenant_id);
        let _guard = self.lock(&ns).await;

        let target = Manifest {
            kind: ObjectKind::Deployment,
            namespace: Some(ns.clone()),
            name: service.to_string(),
            body: json!({}),
        };
        let mut body = match self
            .call(&target, self.api.get(ObjectKind::Deployment, Some(&ns), service))
            .await?
        {
            Ok(body) => body,
            Err(e) => return Err(ClusterApplyError::for_manifest(&target, e.to_string())),
        };

        if let Some(obj) = body.as_object_mut() {
            obj.remove("status");
        }
        let tag = image_tag(image).to_string();
        body["spec"]["template"]["spec"]["containers"][0]["image"] = json!(image);
        body["metadata"]["labels"][VERSION_LABEL] = json!(tag);
        body["spec"]["template"]["metadata"]["labels"][VERSION_LABEL] = json!(tag);

        let manifest = Manifest { body, ..target };
        match self.call(&manifest, self.api.replace(&manifest)).await? {
            Ok(()) => {
                info!(tenant = tenant_id, service, image, "Rolled out image");
                Ok(())
            }
            Err(e) => Err(ClusterApplyError::for_manifest(&manifest, e.to_string())),
        }
    }

    /// Register a service with the metrics collector
    ///
    /// Soft failure: returns false and logs when no collector is installed.
    pub async fn configure_monitoring(&self, tenant_id: &str, service: &str) -> bool {
        let ns = tenant_namespace(tenant_id);
        let manifest = objects::service_monitor(&ns, tenant_id, service);
        let _guard = self.lock(&ns).await;
        match self.ensure(&manifest).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    tenant = tenant_id,
                    service,
                    error = %e,
                    "Monitoring registration skipped"
                );
                false
            }
        }
    }

    /// Delete the tenant namespace; returns whether it existed
    pub async fn delete_tenant(&self, tenant_id: &str) -> Result<bool, ClusterApplyError> {
        let ns = tenant_namespace(tenant_id);
        let _guard = self.lock(&ns).await;
        let manifest = Manifest {
            kind: ObjectKind::Namespace,
            namespace: None,
            name: ns.clone(),
            body: json!({}),
        };
        match self
            .call(&manifest, self.api.delete(ObjectKind::Namespace, None, &ns))
            .await?
        {
            Ok(()) => {
                self.release_lock(&ns);
                info!(tenant = tenant_id, namespace = %ns, "Tenant deleted");
                Ok(true)
            }
            Err(ApiError::NotFound(_)) => {
                self.release_lock(&ns);
                debug!(tenant = tenant_id, "Tenant namespace already absent");
                Ok(false)
            }
            Err(e) => Err(ClusterApplyError::for_manifest(&manifest, e.to_string())),
        }
    }

    /// Namespace presence plus per-deployment replica counts
    pub async fn tenant_status(
        &self,
        tenant_id: &str,
    ) -> Result<Option<TenantClusterStatus>, ClusterApplyError> {
        let ns = tenant_namespace(tenant_id);
        let target = Manifest {
            kind: ObjectKind::Namespace,
            namespace: None,
            name: ns.clone(),
            body: json!({}),
        };
        match self
            .call(&target, self.api.get(ObjectKind::Namespace, None, &ns))
            .await?
        {
            Ok(_) => {}
            Err(ApiError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(ClusterApplyError::for_manifest(&target, e.to_string())),
        }
        let deployments = match self.call(&target, self.api.list_deployments(&ns)).await? {
            Ok(d) => d,
            Err(e) => return Err(ClusterApplyError::for_manifest(&target, e.to_string())),
        };
        Ok(Some(TenantClusterStatus {
            namespace: ns,
            deployments,
        }))
    }

    /// Namespaces created by this tool
    pub async fn managed_namespaces(&self) -> Result<Vec<String>, ClusterApplyError> {
        let target = Manifest {
            kind: ObjectKind::Namespace,
            namespace: None,
            name: "*".to_string(),
            body: json!({}),
        };
        match self
            .call(&target, self.api.list_namespaces(&LabelSelector::managed()))
            .await?
        {
            Ok(list) => Ok(list.into_iter().map(|n| n.name).collect()),
            Err(e) => Err(ClusterApplyError::for_manifest(&target, e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::Component;
    use crate::cluster::MemoryCluster;
    use crate::manifest::AutoscalingConfig;

    fn config(component: Component, image: &str) -> ServiceConfig {
        ServiceConfig {
            component,
            image: image.to_string(),
            replicas: 2,
            cpu_millis: 2000,
            memory_mib: 4096,
            gpus: 0,
            gpu_model: None,
            port: component.port(),
            pull_policy: "IfNotPresent".to_string(),
            autoscaling: Some(AutoscalingConfig::default()),
            vertical_scaling: false,
            labels: BTreeMap::new(),
        }
    }

    fn setup() -> (Arc<MemoryCluster>, ClusterOrchestrator) {
        let cluster = MemoryCluster::shared();
        let orchestrator = ClusterOrchestrator::new(cluster.clone());
        (cluster, orchestrator)
    }

    #[tokio::test]
    async fn test_create_namespace_is_idempotent() {
        let (cluster, orch) = setup();
        orch.create_namespace("acme", TenantPreset::Small).await.unwrap();
        orch.create_namespace("acme", TenantPreset::Small).await.unwrap();
        assert!(cluster.contains(ObjectKind::Namespace, None, "tenant-acme"));
        assert!(cluster.contains(
            ObjectKind::ResourceQuota,
            Some("tenant-acme"),
            "tenant-quota"
        ));
        assert!(cluster.contains(
            ObjectKind::NetworkPolicy,
            Some("tenant-acme"),
            "tenant-isolation"
        ));
    }

    #[tokio::test]
    async fn test_redeploy_replaces_image() {
        let (cluster, orch) = setup();
        orch.create_namespace("acme", TenantPreset::Micro).await.unwrap();
        orch.deploy_service("acme", &config(Component::Stt, "r/stt:1.0"))
            .await
            .unwrap();
        orch.deploy_service("acme", &config(Component::Stt, "r/stt:1.1"))
            .await
            .unwrap();
        let status = orch.tenant_status("acme").await.unwrap().unwrap();
        assert_eq!(status.deployments.len(), 1);
        assert_eq!(status.deployments[0].image, "r/stt:1.1");
        assert!(status.all_ready());
        assert!(cluster.contains(
            ObjectKind::HorizontalPodAutoscaler,
            Some("tenant-acme"),
            "stt"
        ));
    }

    #[tokio::test]
    async fn test_api_error_carries_identity() {
        let (cluster, orch) = setup();
        orch.create_namespace("acme", TenantPreset::Micro).await.unwrap();
        cluster.fail_on(ObjectKind::Deployment, "tts", "admission denied");
        let err = orch
            .deploy_service("acme", &config(Component::Tts, "r/tts:1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ObjectKind::Deployment);
        assert_eq!(err.namespace, "tenant-acme");
        assert_eq!(err.name, "tts");
        assert!(err.reason.contains("admission denied"));
    }

    #[tokio::test]
    async fn test_monitoring_soft_failure() {
        let cluster = Arc::new(MemoryCluster::new().without_kind(ObjectKind::ServiceMonitor));
        let orch = ClusterOrchestrator::new(cluster);
        orch.create_namespace("acme", TenantPreset::Micro).await.unwrap();
        assert!(!orch.configure_monitoring("acme", "nlp").await);
    }

    #[tokio::test]
    async fn test_delete_missing_tenant_succeeds() {
        let (_, orch) = setup();
        assert!(!orch.delete_tenant("ghost").await.unwrap());
        orch.create_namespace("acme", TenantPreset::Micro).await.unwrap();
        assert!(orch.delete_tenant("acme").await.unwrap());
        assert!(orch.tenant_status("acme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rollout_image_updates_version_label() {
        let (_, orch) = setup();
        orch.create_namespace("acme", TenantPreset::Micro).await.unwrap();
        orch.deploy_service("acme", &config(Component::Nlp, "r/nlp:2.0"))
            .await
            .unwrap();
        orch.rollout_image("acme", "nlp", "r/nlp:1.9").await.unwrap();
        let status = orch.tenant_status("acme").await.unwrap().unwrap();
        let nlp = &status.deployments[0];
        assert_eq!(nlp.running_tag(), "1.9");
        assert_eq!(nlp.labelled_version(), Some("1.9"));
    }

    #[tokio::test]
    async fn test_cancelled_orchestrator_stops() {
        let (_, orch) = setup();
        orch.cancellation_token().cancel();
        let err = orch
            .create_namespace("acme", TenantPreset::Micro)
            .await
            .unwrap_err();
        assert_eq!(err.reason, "cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let cluster = MemoryCluster::shared();
        let orch = ClusterOrchestrator::new(cluster.clone()).with_timeout(Duration::from_secs(1));
        orch.create_namespace("acme", TenantPreset::Micro).await.unwrap();
        cluster.delay_namespace("tenant-acme", Duration::from_secs(5));
        let err = orch.tenant_status("acme").await.unwrap_err();
        assert!(err.reason.contains("timed out"));
    }

    #[tokio::test]
    async fn test_delete_releases_namespace_lock() {
        let (_, orch) = setup();
        for tenant in ["a", "b", "c"] {
            orch.create_namespace(tenant, TenantPreset::Micro).await.unwrap();
        }
        assert_eq!(orch.lock_count(), 3);
        for tenant in ["a", "b", "c"] {
            assert!(orch.delete_tenant(tenant).await.unwrap());
        }
        assert!(!orch.delete_tenant("ghost").await.unwrap());
        assert_eq!(orch.lock_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_create_and_delete_are_serialized() {
        let (cluster, orch) = setup();
        cluster.delay_writes("tenant-acme", Duration::from_secs(1));

        // create takes the lock first; delete must wait for every create step
        let (created, deleted) = tokio::join!(
            orch.create_namespace("acme", TenantPreset::Micro),
            orch.delete_tenant("acme"),
        );
        created.unwrap();
        assert!(deleted.unwrap());
        assert!(!cluster.contains(ObjectKind::Namespace, None, "tenant-acme"));
        assert!(cluster.objects_in("tenant-acme").is_empty());
        assert_eq!(orch.lock_count(), 0);
    }
}
