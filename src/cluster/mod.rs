//! # Cluster access
//!
//! ```text
//!   Provisioner ──► ClusterOrchestrator ──► dyn ClusterApi
//!   HealthMonitor ───────┘                    ├─ RestCluster   (Kubernetes REST API)
//!                                             └─ MemoryCluster (dry run / tests)
//! ```
//!
//! The orchestrator owns idempotency, per-namespace serialization, timeouts
//! and cancellation. Implementations of [`ClusterApi`] only translate calls.

pub mod api;
pub mod memory;
pub mod orchestrator;
pub mod rest;

pub use api::{
    ApiError, ClusterApi, ClusterApplyError, DeploymentState, NamespaceInfo, PodInfo,
};
pub use memory::MemoryCluster;
pub use orchestrator::{ClusterOrchestrator, TenantClusterStatus, DEFAULT_APPLY_TIMEOUT};
pub use rest::RestCluster;
