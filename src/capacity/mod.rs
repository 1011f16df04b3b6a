//! # Capacity planning
//!
//! Pure, synchronous stages that turn a tenant's service counts into a
//! complete [`TenantSpec`]:
//!
//! ```text
//! ServiceRequirement ─► load::analyze ─► ResourceCalculator ─► hardware::build_servers
//!                                              │                      │
//!                                              ▼                      ▼
//!                                      preset / components      cloud::estimate_costs
//! ```
//!
//! Nothing here holds shared mutable state; every function is safe to call
//! concurrently for different tenants.

pub mod calculator;
pub mod cloud;
pub mod component;
pub mod hardware;
pub mod load;
pub mod preset;
pub mod spec;
pub mod tier;

pub use calculator::{
    scale_multiplier, CpuBreakdown, GpuBreakdown, MemoryBreakdown, ResourceCalculator,
    ResourceRequirement, StorageBreakdown,
};
pub use cloud::{estimate_costs, CloudCostReport, ProviderEstimate, CATALOG};
pub use component::{plan_components, Component, ComponentPlan};
pub use hardware::{build_servers, pack_units, HardwareServerSpec, ServerRole};
pub use load::{analyze, ServiceLoad, MAX_SERVICE_COUNT, ServiceRequirement, ServiceType, ServiceVolume};
pub use preset::{detect_preset, QuotaPolicy, ScalingPolicy, TenantPreset};
pub use spec::{generate_tenant_specs, tenant_namespace, TenantSpec, TenantStatus};
pub use tier::{select_tier, GpuTier, GpuTierSpec};
