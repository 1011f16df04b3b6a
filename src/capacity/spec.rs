//! Tenant spec - the complete, serializable plan for one tenant

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::calculator::{ResourceCalculator, ResourceRequirement};
use super::component::{plan_components, ComponentPlan};
use super::hardware::{build_servers, HardwareServerSpec};
use super::load::ServiceRequirement;
use super::preset::{detect_preset, QuotaPolicy, TenantPreset};
use super::tier::GpuTier;
use crate::config::request::{validate_tenant_id, GpuSelection};
use crate::error::ProvisionError;

/// Prefix of every tenant namespace
pub const NAMESPACE_PREFIX: &str = "tenant-";

/// Namespace owning a tenant's resources
pub fn tenant_namespace(tenant_id: &str) -> String {
    format!("{}{}", NAMESPACE_PREFIX, tenant_id)
}

/// Lifecycle status; the only mutable part of a spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    #[default]
    Planned,
    Provisioning,
    Active,
    Failed,
    Deleting,
}

/// Full tenant plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantSpec {
    #[serde(rename = "tenantId")]
    pub tenant_id: String,
    pub namespace: String,
    pub preset: TenantPreset,
    #[serde(rename = "gpuType")]
    pub gpu_type: GpuTier,
    #[serde(rename = "gpuSelection")]
    pub gpu_selection: GpuSelection,
    #[serde(rename = "totalChannels")]
    pub total_channels: u64,
    #[serde(rename = "totalUsers")]
    pub total_users: u64,
    pub requirements: ServiceRequirement,
    pub resources: ResourceRequirement,
    pub servers: Vec<HardwareServerSpec>,
    pub components: Vec<ComponentPlan>,
    #[serde(rename = "profileVersion")]
    pub profile_version: String,
    pub status: TenantStatus,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl TenantSpec {
    /// Quota for the namespace: preset defaults raised to fit the computed need
    pub fn quota(&self) -> QuotaPolicy {
        let pods: u64 = self.components.iter().map(|c| c.replicas as u64).sum();
        let floor = QuotaPolicy {
            cpu_cores: self.resources.cpu.total
                + self.resources.gpu.total * super::hardware::CORES_PER_GPU,
            memory_gb: self.resources.memory.total,
            // room for one extra pod per component during rollouts
            pods: pods + self.components.len() as u64,
            gpus: self.resources.gpu.total,
            storage_gb: self.resources.storage.total,
        };
        self.preset.quota().at_least(floor)
    }

    /// Plan for a component, if the tenant runs it
    pub fn component(&self, component: super::component::Component) -> Option<&ComponentPlan> {
        self.components.iter().find(|c| c.component == component)
    }

    /// Copy with a new status
    pub fn with_status(&self, status: TenantStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

/// Compute a complete tenant spec
pub fn generate_tenant_specs(
    calculator: &ResourceCalculator,
    tenant_id: &str,
    requirements: &ServiceRequirement,
    gpu_selection: GpuSelection,
    created_at: DateTime<Utc>,
) -> Result<TenantSpec, ProvisionError> {
    validate_tenant_id(tenant_id)?;

    let resources: ResourceRequirement = calculator.calculate(requirements, gpu_selection)?;
    let servers = build_servers(&resources, calculator.profile())?;
    let total_channels = requirements.total_channels();
    let total_users = requirements.total_users();
    let preset = detect_preset(total_channels, total_users);
    let components = plan_components(&resources, preset);

    info!(
        tenant = tenant_id,
        %preset,
        gpu_tier = resources.gpu_tier.key(),
        gpus = resources.gpu.total,
        servers = servers.len(),
        "Generated tenant spec"
    );

    Ok(TenantSpec {
        tenant_id: tenant_id.to_string(),
        namespace: tenant_namespace(tenant_id),
        preset,
        gpu_type: resources.gpu_tier,
        gpu_selection,
        total_channels,
        total_users,
        requirements: requirements.clone(),
        resources,
        servers,
        components,
        profile_version: calculator.profile().version.clone(),
        status: TenantStatus::Planned,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::load::ServiceType;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_empty_tenant_is_micro_without_servers() {
        let spec = generate_tenant_specs(
            &ResourceCalculator::default(),
            "empty",
            &ServiceRequirement::default(),
            GpuSelection::Auto,
            at(),
        )
        .unwrap();
        assert_eq!(spec.preset, TenantPreset::Micro);
        assert!(spec.servers.is_empty());
        assert!(spec.components.is_empty());
        assert_eq!(spec.namespace, "tenant-empty");
        assert_eq!(spec.quota(), TenantPreset::Micro.quota());
    }

    #[test]
    fn test_callbot_tenant_spec() {
        let spec = generate_tenant_specs(
            &ResourceCalculator::default(),
            "acme",
            &ServiceRequirement::from_pairs([(ServiceType::Callbot, 160)]),
            GpuSelection::Auto,
            at(),
        )
        .unwrap();
        assert_eq!(spec.preset, TenantPreset::Medium);
        assert_eq!(spec.gpu_type, GpuTier::Tier1);
        assert_eq!(spec.total_channels, 160);
        assert_eq!(spec.status, TenantStatus::Planned);
        let quota = spec.quota();
        assert!(quota.gpus >= 6);
        assert!(quota.cpu_cores >= spec.resources.cpu.total);
    }

    #[test]
    fn test_invalid_tenant_id() {
        let err = generate_tenant_specs(
            &ResourceCalculator::default(),
            "Bad_Id",
            &ServiceRequirement::default(),
            GpuSelection::Auto,
            at(),
        )
        .unwrap_err();
        assert!(matches!(err, ProvisionError::Validation(_)));
    }

    #[test]
    fn test_spec_serializes_to_json() {
        let spec = generate_tenant_specs(
            &ResourceCalculator::default(),
            "acme",
            &ServiceRequirement::from_pairs([(ServiceType::Chatbot, 40)]),
            GpuSelection::Auto,
            at(),
        )
        .unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        let back: TenantSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
