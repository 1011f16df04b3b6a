//! # Placement advice
//!
//! Ranks node groups from an inventory for each component of a tenant.
//! Advisory only: nothing here is fed back into manifests or the cluster.

pub mod advisor;
pub mod inventory;
pub mod scoring;

pub use advisor::{HardwarePlacementAdvisor, PlacementRecommendation, PlacementReport, RankedNodeGroup};
pub use inventory::{NodeGroup, NodeInventory, PlacementError};
pub use scoring::{
    affinity_peers, anti_affinity_peers, PlacementScore, PlacementWeights, ResourceWeights, AFFINITY,
    ANTI_AFFINITY,
};
