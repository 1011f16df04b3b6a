//! Provisioning facade
//!
//! Ties the capacity planner, manifest generator, cluster orchestrator and
//! ledger together behind the four calls an API layer needs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::capacity::{generate_tenant_specs, ResourceCalculator, ServiceRequirement, TenantSpec, TenantStatus};
use crate::clock::{Clock, SystemClock};
use crate::cluster::{ClusterOrchestrator, DeploymentState};
use crate::config::{AdvancedConfig, GpuSelection};
use crate::error::ProvisionError;
use crate::ledger::{DeploymentRecord, DeploymentStatus, ImageStatus, ImageVersionLedger};
use crate::manifest::{image_tag, ManifestGenerator};

const CONFIG_MAP_FILE: &str = "02-configmap.yaml";

/// Observed state of one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub image: String,
    #[serde(rename = "desiredReplicas")]
    pub desired_replicas: u32,
    #[serde(rename = "readyReplicas")]
    pub ready_replicas: u32,
    #[serde(rename = "availableReplicas")]
    pub available_replicas: u32,
    #[serde(rename = "updatedReplicas")]
    pub updated_replicas: u32,
    /// Latest successful or rolled-back deployment in the ledger
    #[serde(rename = "currentDeployment")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_deployment: Option<DeploymentRecord>,
}

/// Tenant status as seen by the cluster and the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantStatusReport {
    #[serde(rename = "tenantId")]
    pub tenant_id: String,
    pub namespace: String,
    pub status: TenantStatus,
    pub services: Vec<ServiceStatus>,
}

pub struct Provisioner {
    calculator: ResourceCalculator,
    generator: ManifestGenerator,
    orchestrator: Arc<ClusterOrchestrator>,
    ledger: Arc<ImageVersionLedger>,
    clock: Arc<dyn Clock>,
}

impl Provisioner {
    pub fn new(
        calculator: ResourceCalculator,
        generator: ManifestGenerator,
        orchestrator: Arc<ClusterOrchestrator>,
        ledger: Arc<ImageVersionLedger>,
    ) -> Self {
        Self {
            calculator,
            generator,
            orchestrator,
            ledger,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn orchestrator(&self) -> &Arc<ClusterOrchestrator> {
        &self.orchestrator
    }

    pub fn ledger(&self) -> &Arc<ImageVersionLedger> {
        &self.ledger
    }

    pub fn generator(&self) -> &ManifestGenerator {
        &self.generator
    }

    /// Compute the tenant plan; nothing is applied
    pub fn generate_tenant_specs(
        &self,
        tenant_id: &str,
        requirements: &ServiceRequirement,
        gpu_type: GpuSelection,
    ) -> Result<TenantSpec, ProvisionError> {
        generate_tenant_specs(
            &self.calculator,
            tenant_id,
            requirements,
            gpu_type,
            self.clock.now(),
        )
    }

    /// Apply a tenant; failures are logged and reported as `false`
    pub async fn create_tenant(&self, spec: &TenantSpec) -> bool {
        match self.provision(spec, None).await {
            Ok(_) => true,
            Err(e) => {
                error!(tenant = %spec.tenant_id, error = %e, "Tenant provisioning failed");
                false
            }
        }
    }

    /// Apply a tenant with optional overrides, returning the spec marked active
    ///
    /// Re-running after a partial failure is safe: every object is created if
    /// absent or updated in place.
    pub async fn provision(
        &self,
        spec: &TenantSpec,
        advanced: Option<&AdvancedConfig>,
    ) -> Result<TenantSpec, ProvisionError> {
        let tenant = spec.tenant_id.as_str();
        info!(
            tenant,
            preset = %spec.preset,
            components = spec.components.len(),
            "Provisioning tenant"
        );

        let manifests = self.generator.manifests(spec, advanced)?;
        let labels = advanced.map(|a| a.labels.clone()).unwrap_or_default();

        self.orchestrator
            .create_namespace_with_quota(tenant, &spec.quota(), &labels)
            .await?;
        if let Some(config_map) = manifests.get(CONFIG_MAP_FILE) {
            self.orchestrator.apply(config_map).await?;
        }

        for plan in &spec.components {
            let service = plan.component.key();
            // An explicitly chosen registry or tag wins over ledger releases
            let released = if advanced.is_some_and(AdvancedConfig::pins_image) {
                None
            } else {
                self.ledger.latest_deployable(service).await?
            };
            let config = self.generator.service_config(
                spec,
                plan,
                released.as_ref().map(|i| i.image.clone()),
                advanced,
            )?;

            if let Err(e) = self.orchestrator.deploy_service(tenant, &config).await {
                self.ledger
                    .record_deployment(
                        tenant,
                        service,
                        &config.image,
                        DeploymentStatus::Failed,
                        Some(e.to_string()),
                    )
                    .await?;
                return Err(e.into());
            }

            self.ledger
                .record_deployment(tenant, service, &config.image, DeploymentStatus::Success, None)
                .await?;
            if let Some(image) = released.filter(|i| i.status == ImageStatus::Ready) {
                self.ledger
                    .set_image_status(service, &image.version, ImageStatus::Deployed, false)
                    .await?;
            }

            if !self.orchestrator.configure_monitoring(tenant, service).await {
                warn!(tenant, service, "Service is running without metrics scraping");
            }
        }

        info!(tenant, namespace = %spec.namespace, "Tenant provisioned");
        Ok(spec.with_status(TenantStatus::Active))
    }

    /// Cluster and ledger view of a tenant; `None` when its namespace is absent
    pub async fn get_tenant_status(
        &self,
        tenant_id: &str,
    ) -> Result<Option<TenantStatusReport>, ProvisionError> {
        let Some(cluster) = self.orchestrator.tenant_status(tenant_id).await? else {
            return Ok(None);
        };

        let status = if cluster.deployments.is_empty() || cluster.all_ready() {
            TenantStatus::Active
        } else {
            TenantStatus::Provisioning
        };

        let mut services = Vec::with_capacity(cluster.deployments.len());
        for DeploymentState {
            name,
            image,
            desired_replicas,
            ready_replicas,
            available_replicas,
            updated_replicas,
            ..
        } in cluster.deployments
        {
            let current_deployment = self.ledger.current_deployment(tenant_id, &name).await?;
            services.push(ServiceStatus {
                name,
                image,
                desired_replicas,
                ready_replicas,
                available_replicas,
                updated_replicas,
                current_deployment,
            });
        }

        Ok(Some(TenantStatusReport {
            tenant_id: tenant_id.to_string(),
            namespace: cluster.namespace,
            status,
            services,
        }))
    }

    /// Delete the tenant namespace; returns whether it existed
    pub async fn delete_tenant(&self, tenant_id: &str) -> Result<bool, ProvisionError> {
        Ok(self.orchestrator.delete_tenant(tenant_id).await?)
    }

    /// Running version of each service, derived from its image tag
    pub async fn running_versions(&self, tenant_id: &str) -> Result<Vec<(String, String)>, ProvisionError> {
        Ok(self
            .get_tenant_status(tenant_id)
            .await?
            .map(|report| {
                report
                    .services
                    .into_iter()
                    .map(|s| {
                        let tag = image_tag(&s.image).to_string();
                        (s.name, tag)
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::ServiceType;
    use crate::cluster::MemoryCluster;
    use crate::manifest::ObjectKind;

    fn provisioner(cluster: Arc<MemoryCluster>) -> Provisioner {
        Provisioner::new(
            ResourceCalculator::default(),
            ManifestGenerator::default(),
            Arc::new(ClusterOrchestrator::new(cluster)),
            Arc::new(ImageVersionLedger::in_memory()),
        )
    }

    fn callbots(n: u64) -> ServiceRequirement {
        ServiceRequirement::from_pairs([(ServiceType::Callbot, n)])
    }

    #[tokio::test]
    async fn test_create_tenant_applies_everything() {
        let cluster = MemoryCluster::shared();
        let p = provisioner(cluster.clone());
        let spec = p
            .generate_tenant_specs("acme", &callbots(160), GpuSelection::Auto)
            .unwrap();

        assert!(p.create_tenant(&spec).await);

        let ns = "tenant-acme";
        assert!(cluster.contains(ObjectKind::Namespace, None, ns));
        assert!(cluster.contains(ObjectKind::ResourceQuota, Some(ns), "tenant-quota"));
        assert!(cluster.contains(ObjectKind::ConfigMap, Some(ns), "tenant-config"));
        for plan in &spec.components {
            assert!(cluster.contains(ObjectKind::Deployment, Some(ns), plan.component.key()));
            let current = p
                .ledger()
                .current_deployment("acme", plan.component.key())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(current.status, DeploymentStatus::Success);
        }
    }

    #[tokio::test]
    async fn test_create_tenant_is_idempotent() {
        let cluster = MemoryCluster::shared();
        let p = provisioner(cluster.clone());
        let spec = p
            .generate_tenant_specs("acme", &callbots(20), GpuSelection::Auto)
            .unwrap();
        assert!(p.create_tenant(&spec).await);
        let count = cluster.object_count();
        assert!(p.create_tenant(&spec).await);
        assert_eq!(cluster.object_count(), count);
    }

    #[tokio::test]
    async fn test_released_image_is_used_and_marked_deployed() {
        let cluster = MemoryCluster::shared();
        let p = provisioner(cluster.clone());
        p.ledger()
            .record_image("stt", "2.1.0", "registry.local/stt:2.1.0", ImageStatus::Ready, None)
            .await
            .unwrap();
        let spec = p
            .generate_tenant_specs("acme", &callbots(20), GpuSelection::Auto)
            .unwrap();
        assert!(p.create_tenant(&spec).await);

        let status = p.get_tenant_status("acme").await.unwrap().unwrap();
        let stt = status.services.iter().find(|s| s.name == "stt").unwrap();
        assert_eq!(stt.image, "registry.local/stt:2.1.0");
        assert_eq!(stt.available_replicas, stt.desired_replicas);
        assert_eq!(stt.updated_replicas, stt.desired_replicas);
        let image = p.ledger().image("stt", "2.1.0").await.unwrap().unwrap();
        assert_eq!(image.status, ImageStatus::Deployed);
        let current = stt.current_deployment.as_ref().unwrap();
        assert_eq!(current.namespace, "tenant-acme");
        assert_eq!(current.image_version_id, Some(image.id));
    }

    #[tokio::test]
    async fn test_explicit_image_override_beats_ledger_release() {
        let cluster = MemoryCluster::shared();
        let p = provisioner(cluster.clone());
        p.ledger()
            .record_image("nlp", "1.0", "registry.local/aicc/nlp:1.0", ImageStatus::Ready, None)
            .await
            .unwrap();
        let spec = p
            .generate_tenant_specs("acme", &callbots(20), GpuSelection::Auto)
            .unwrap();
        let advanced = AdvancedConfig {
            image_registry: Some("ghcr.io/acme".to_string()),
            image_tag: Some("2.0.0".to_string()),
            ..Default::default()
        };

        let rendered = p.generator().render(&spec, Some(&advanced)).unwrap();
        assert!(rendered.documents["10-nlp-deployment.yaml"].contains("ghcr.io/acme/nlp:2.0.0"));

        p.provision(&spec, Some(&advanced)).await.unwrap();
        let status = p.get_tenant_status("acme").await.unwrap().unwrap();
        let nlp = status.services.iter().find(|s| s.name == "nlp").unwrap();
        assert_eq!(nlp.image, "ghcr.io/acme/nlp:2.0.0");

        // the release was not rolled out, so it stays READY
        let image = p.ledger().image("nlp", "1.0").await.unwrap().unwrap();
        assert_eq!(image.status, ImageStatus::Ready);
    }

    #[tokio::test]
    async fn test_failed_deploy_is_recorded() {
        let cluster = MemoryCluster::shared();
        cluster.fail_on(ObjectKind::Deployment, "stt", "admission webhook denied");
        let p = provisioner(cluster.clone());
        let spec = p
            .generate_tenant_specs("acme", &callbots(20), GpuSelection::Auto)
            .unwrap();

        assert!(!p.create_tenant(&spec).await);
        let history = p.ledger().deployment_history("acme", "stt").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, DeploymentStatus::Failed);
        assert!(history[0]
            .reason
            .as_deref()
            .unwrap()
            .contains("admission webhook denied"));
    }

    #[tokio::test]
    async fn test_status_and_delete() {
        let cluster = MemoryCluster::shared();
        let p = provisioner(cluster.clone());
        assert!(p.get_tenant_status("ghost").await.unwrap().is_none());
        assert!(!p.delete_tenant("ghost").await.unwrap());

        let spec = p
            .generate_tenant_specs("acme", &ServiceRequirement::default(), GpuSelection::Auto)
            .unwrap();
        assert!(p.create_tenant(&spec).await);
        let status = p.get_tenant_status("acme").await.unwrap().unwrap();
        assert_eq!(status.status, TenantStatus::Active);
        assert!(status.services.is_empty());

        assert!(p.delete_tenant("acme").await.unwrap());
        assert!(p.get_tenant_status("acme").await.unwrap().is_none());
    }
}
