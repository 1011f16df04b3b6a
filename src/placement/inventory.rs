//! Node group inventory
//!
//! Loaded from YAML:
//!
//! ```yaml
//! nodeGroups:
//!   - name: gpu-a
//!     zone: zone-a
//!     nodeCount: 4
//!     cpuCores: 64
//!     memoryGb: 256
//!     gpus: 8
//!     gpuModel: nvidia-t4
//!     cpuUsagePercent: 35
//!     gpuUsagePercent: 50
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlacementError {
    #[error("Failed to read inventory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse inventory: {0}")]
    Parse(String),

    #[error("Invalid node group '{name}': {reason}")]
    InvalidGroup { name: String, reason: String },
}

/// A homogeneous set of nodes in one zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeGroup {
    pub name: String,
    pub zone: String,

    #[serde(rename = "nodeCount")]
    #[serde(default = "default_node_count")]
    pub node_count: u32,

    /// Cores per node
    #[serde(rename = "cpuCores")]
    pub cpu_cores: u64,

    /// Memory per node
    #[serde(rename = "memoryGb")]
    pub memory_gb: u64,

    /// GPUs per node
    #[serde(default)]
    pub gpus: u64,

    #[serde(rename = "gpuModel")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_model: Option<String>,

    /// Current CPU utilization across the group
    #[serde(rename = "cpuUsagePercent")]
    #[serde(default)]
    pub cpu_usage_percent: f64,

    #[serde(rename = "memoryUsagePercent")]
    #[serde(default)]
    pub memory_usage_percent: f64,

    #[serde(rename = "gpuUsagePercent")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_usage_percent: Option<f64>,
}

fn default_node_count() -> u32 {
    1
}

impl NodeGroup {
    pub fn has_gpu(&self) -> bool {
        self.gpus > 0
    }

    pub fn total_cores(&self) -> u64 {
        self.cpu_cores * self.node_count as u64
    }

    pub fn total_memory_gb(&self) -> u64 {
        self.memory_gb * self.node_count as u64
    }

    pub fn total_gpus(&self) -> u64 {
        self.gpus * self.node_count as u64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInventory {
    #[serde(rename = "nodeGroups")]
    #[serde(default)]
    pub node_groups: Vec<NodeGroup>,
}

impl NodeInventory {
    pub fn from_yaml(content: &str) -> Result<Self, PlacementError> {
        let inventory: NodeInventory =
            serde_yaml::from_str(content).map_err(|e| PlacementError::Parse(e.to_string()))?;
        inventory.validate()?;
        Ok(inventory)
    }

    pub fn from_file(path: &Path) -> Result<Self, PlacementError> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    fn validate(&self) -> Result<(), PlacementError> {
        let mut names = BTreeSet::new();
        for group in &self.node_groups {
            let invalid = |reason: &str| PlacementError::InvalidGroup {
                name: group.name.clone(),
                reason: reason.to_string(),
            };
            if !names.insert(group.name.as_str()) {
                return Err(invalid("duplicate name"));
            }
            if group.node_count == 0 || group.cpu_cores == 0 {
                return Err(invalid("nodeCount and cpuCores must be positive"));
            }
            if group.gpus > 0 && group.gpu_model.is_none() {
                return Err(invalid("gpuModel is required when gpus > 0"));
            }
            let usages = [
                Some(group.cpu_usage_percent),
                Some(group.memory_usage_percent),
                group.gpu_usage_percent,
            ];
            if usages
                .iter()
                .flatten()
                .any(|u| !(0.0..=100.0).contains(u))
            {
                return Err(invalid("usage percentages must be within 0..=100"));
            }
        }
        Ok(())
    }

    /// Distinct zones
    pub fn zones(&self) -> BTreeSet<&str> {
        self.node_groups.iter().map(|g| g.zone.as_str()).collect()
    }
}
