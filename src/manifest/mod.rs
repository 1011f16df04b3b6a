//! Manifest rendering
//!
//! - [`objects`]: Kubernetes object builders, shared with the cluster orchestrator
//! - [`workload`]: per-service deployment and autoscaling configuration
//! - [`generator`]: deterministic, file-ordered manifest packages
//! - [`bundle`]: packaged manifests with scripts and checksums

pub mod bundle;
pub mod generator;
pub mod objects;
pub mod workload;

pub use bundle::{Bundle, BundleError, BundleFile};
pub use generator::{ManifestGenerator, ManifestPackage};
pub use objects::{LabelSelector, Manifest, ObjectKind};
pub use workload::{image_digest, image_reference, image_tag, AutoscalingConfig, ScalingBehavior, ServiceConfig};
