//! Error taxonomy shared across the provisioning pipeline
//!
//! Calculation and render errors are raised synchronously; apply and
//! monitoring errors surface through logs and the health summary.

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use crate::cluster::api::ClusterApplyError;

/// Malformed tenant input, rejected before any computation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Unknown service type '{0}'")]
    UnknownService(String),

    #[error("Service '{0}' has negative count {1}")]
    NegativeCount(String, i64),

    #[error("Service '{0}' count {1} exceeds the maximum of {2}")]
    CountTooLarge(String, i64, u64),

    #[error("Invalid tenant id '{0}': {1}")]
    InvalidTenantId(String, String),

    #[error("Unknown GPU type '{0}' (expected auto, tier1, tier2 or tier3)")]
    UnknownGpuType(String),

    #[error("Failed to parse request: {0}")]
    Parse(String),
}

/// Internal invariant violation while deriving capacity
///
/// Fatal: the computation aborts instead of returning a plausible but wrong answer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapacityComputationError {
    #[error("Derived quantity '{quantity}' is invalid: {value}")]
    InvalidDerived { quantity: String, value: f64 },

    #[error("Breakdown for {resource} sums to {breakdown} but total is {total}")]
    BreakdownMismatch {
        resource: String,
        breakdown: u64,
        total: u64,
    },

    #[error("Service '{service}' count {count} exceeds the supported maximum {max}")]
    CountOutOfRange { service: String, count: u64, max: u64 },

    #[error("Derived quantity '{quantity}' overflows")]
    Overflow { quantity: String },

    #[error("Packing for {role} covers {provided} of {required} required units")]
    UnderProvisioned {
        role: String,
        required: u64,
        provided: u64,
    },
}

/// Template failure while rendering a manifest
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("Invalid override '{field}': {reason}")]
    InvalidOverride { field: String, reason: String },

    #[error("Failed to serialize {document}: {reason}")]
    Serialize { document: String, reason: String },
}

/// Aggregate error returned across the collaborator boundary
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Capacity computation error: {0}")]
    CapacityComputation(#[from] CapacityComputationError),

    #[error("Cluster apply error: {0}")]
    ClusterApply(#[from] ClusterApplyError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("No rollback candidate for {tenant}/{service} before {before}")]
    RollbackUnavailable {
        tenant: String,
        service: String,
        before: DateTime<Utc>,
    },

    #[error("Ledger error: {0}")]
    Ledger(#[from] crate::ledger::LedgerError),
}
