//! # kubeplan
//!
//! Capacity planning and Kubernetes provisioning for multi-tenant AI
//! workloads. A tenant's service counts flow through:
//!
//! ```text
//! capacity (spec) ─► manifest (render/bundle) ─► cluster (apply)
//!                                                   │
//!                         ledger ◄── monitor (health, rollback)
//! ```
//!
//! [`placement`] ranks node groups for a spec on the side and never feeds
//! back into the apply path.

pub mod capacity;
pub mod cli;
pub mod clock;
pub mod cluster;
pub mod config;
pub mod error;
pub mod ledger;
pub mod manifest;
pub mod monitor;
pub mod placement;
pub mod provisioner;

pub use error::ProvisionError;
pub use provisioner::Provisioner;
