//! Tenant size presets
//!
//! A preset drives default quota and autoscaling policy. Raw resource counts
//! always come from the calculator, independently of the preset.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Tenant size classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantPreset {
    Micro,
    Small,
    Medium,
    Large,
}

impl fmt::Display for TenantPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TenantPreset::Micro => "micro",
            TenantPreset::Small => "small",
            TenantPreset::Medium => "medium",
            TenantPreset::Large => "large",
        };
        f.write_str(name)
    }
}

/// Classify a tenant by channels and users
pub fn detect_preset(channels: u64, users: u64) -> TenantPreset {
    if channels < 10 && users < 50 {
        TenantPreset::Micro
    } else if channels < 100 && users < 500 {
        TenantPreset::Small
    } else if channels < 500 && users < 2000 {
        TenantPreset::Medium
    } else {
        TenantPreset::Large
    }
}

/// Namespace resource quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaPolicy {
    pub cpu_cores: u64,
    pub memory_gb: u64,
    pub pods: u64,
    pub gpus: u64,
    pub storage_gb: u64,
}

impl QuotaPolicy {
    /// Raise every limit to at least `floor` (used to fit computed requirements)
    pub fn at_least(self, floor: QuotaPolicy) -> Self {
        Self {
            cpu_cores: self.cpu_cores.max(floor.cpu_cores),
            memory_gb: self.memory_gb.max(floor.memory_gb),
            pods: self.pods.max(floor.pods),
            gpus: self.gpus.max(floor.gpus),
            storage_gb: self.storage_gb.max(floor.storage_gb),
        }
    }
}

/// Default horizontal scaling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub target_cpu_utilization: u32,
    pub target_memory_utilization: u32,
    pub scale_up_window_secs: u32,
    pub scale_up_percent: u32,
    pub scale_down_window_secs: u32,
    pub scale_down_percent: u32,
}

impl TenantPreset {
    pub fn quota(&self) -> QuotaPolicy {
        match self {
            TenantPreset::Micro => QuotaPolicy {
                cpu_cores: 8,
                memory_gb: 32,
                pods: 20,
                gpus: 1,
                storage_gb: 1024,
            },
            TenantPreset::Small => QuotaPolicy {
                cpu_cores: 32,
                memory_gb: 128,
                pods: 50,
                gpus: 4,
                storage_gb: 2048,
            },
            TenantPreset::Medium => QuotaPolicy {
                cpu_cores: 128,
                memory_gb: 512,
                pods: 150,
                gpus: 16,
                storage_gb: 8192,
            },
            TenantPreset::Large => QuotaPolicy {
                cpu_cores: 512,
                memory_gb: 2048,
                pods: 500,
                gpus: 64,
                storage_gb: 32768,
            },
        }
    }

    pub fn scaling(&self) -> ScalingPolicy {
        let (min_replicas, max_replicas) = match self {
            TenantPreset::Micro => (1, 2),
            TenantPreset::Small => (1, 4),
            TenantPreset::Medium => (2, 10),
            TenantPreset::Large => (3, 30),
        };
        ScalingPolicy {
            min_replicas,
            max_replicas,
            target_cpu_utilization: 70,
            target_memory_utilization: 80,
            scale_up_window_secs: 0,
            scale_up_percent: 100,
            scale_down_window_secs: 300,
            scale_down_percent: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_thresholds() {
        assert_eq!(detect_preset(0, 0), TenantPreset::Micro);
        assert_eq!(detect_preset(9, 49), TenantPreset::Micro);
        assert_eq!(detect_preset(10, 49), TenantPreset::Small);
        assert_eq!(detect_preset(9, 50), TenantPreset::Small);
        assert_eq!(detect_preset(99, 499), TenantPreset::Small);
        assert_eq!(detect_preset(100, 10), TenantPreset::Medium);
        assert_eq!(detect_preset(499, 1999), TenantPreset::Medium);
        assert_eq!(detect_preset(500, 0), TenantPreset::Large);
        assert_eq!(detect_preset(0, 2000), TenantPreset::Large);
    }

    #[test]
    fn test_policies_grow_with_preset() {
        let presets = [
            TenantPreset::Micro,
            TenantPreset::Small,
            TenantPreset::Medium,
            TenantPreset::Large,
        ];
        for pair in presets.windows(2) {
            assert!(pair[0].quota().cpu_cores < pair[1].quota().cpu_cores);
            assert!(pair[0].scaling().max_replicas < pair[1].scaling().max_replicas);
        }
        for preset in presets {
            let s = preset.scaling();
            assert!(s.min_replicas >= 1 && s.min_replicas <= s.max_replicas);
        }
    }

    #[test]
    fn test_quota_at_least() {
        let quota = TenantPreset::Micro.quota().at_least(QuotaPolicy {
            cpu_cores: 40,
            memory_gb: 0,
            pods: 0,
            gpus: 6,
            storage_gb: 0,
        });
        assert_eq!(quota.cpu_cores, 40);
        assert_eq!(quota.gpus, 6);
        assert_eq!(quota.memory_gb, 32);
    }
}
