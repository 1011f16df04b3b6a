//! Deployable workload components and their per-tenant plans

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::calculator::ResourceRequirement;
use super::preset::TenantPreset;

/// Cores per realtime STT pod
const STT_POD_CORES: u64 = 4;
/// Cores per batch (TA/QA) pod
const BATCH_POD_CORES: u64 = 2;

/// A workload deployed into a tenant namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Stt,
    Tts,
    Nlp,
    Aicm,
    Ta,
    Qa,
    Gateway,
}

impl Component {
    pub const ALL: [Component; 7] = [
        Component::Stt,
        Component::Tts,
        Component::Nlp,
        Component::Aicm,
        Component::Ta,
        Component::Qa,
        Component::Gateway,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Component::Stt => "stt",
            Component::Tts => "tts",
            Component::Nlp => "nlp",
            Component::Aicm => "aicm",
            Component::Ta => "ta",
            Component::Qa => "qa",
            Component::Gateway => "gateway",
        }
    }

    /// Whether this component runs on GPU nodes
    pub fn is_gpu(&self) -> bool {
        matches!(self, Component::Tts | Component::Nlp | Component::Aicm)
    }

    /// Whether this component processes batches rather than live traffic
    pub fn is_batch(&self) -> bool {
        matches!(self, Component::Ta | Component::Qa)
    }

    /// Container and service port
    pub fn port(&self) -> u16 {
        match self {
            Component::Stt => 50051,
            Component::Tts => 50052,
            Component::Nlp => 8000,
            Component::Aicm => 8001,
            Component::Ta => 8100,
            Component::Qa => 8200,
            Component::Gateway => 8080,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Component {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Component::ALL
            .iter()
            .copied()
            .find(|c| c.key() == s)
            .ok_or_else(|| format!("unknown component '{}'", s))
    }
}

/// Sizing of one component's deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentPlan {
    pub component: Component,
    pub replicas: u32,
    /// CPU request per pod (millicores)
    pub cpu_millis: u64,
    /// Memory request per pod (MiB)
    pub memory_mib: u64,
    pub gpus_per_pod: u64,
    /// Accelerator node selector value, set for GPU components
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_model: Option<String>,
    pub port: u16,
}

fn replicas(count: u64) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Derive the component plans for a requirement, in [`Component::ALL`] order
pub fn plan_components(requirement: &ResourceRequirement, preset: TenantPreset) -> Vec<ComponentPlan> {
    let gpu_model = requirement.gpu_tier.spec().model.to_string();
    let gpu_mem_mib = requirement.gpu_ram_per_unit_gb * 1024;
    let mut plans = Vec::new();

    for component in Component::ALL {
        let plan = match component {
            Component::Tts | Component::Nlp | Component::Aicm => {
                let units = match component {
                    Component::Tts => requirement.gpu.tts,
                    Component::Nlp => requirement.gpu.nlp,
                    _ => requirement.gpu.aicm,
                };
                (units > 0).then(|| ComponentPlan {
                    component,
                    replicas: replicas(units),
                    cpu_millis: 4000,
                    memory_mib: gpu_mem_mib,
                    gpus_per_pod: 1,
                    gpu_model: Some(gpu_model.clone()),
                    port: component.port(),
                })
            }
            Component::Stt => (requirement.cpu.stt > 0).then(|| ComponentPlan {
                component,
                replicas: replicas(requirement.cpu.stt.div_ceil(STT_POD_CORES)),
                cpu_millis: STT_POD_CORES * 1000,
                memory_mib: STT_POD_CORES * 4 * 1024,
                gpus_per_pod: 0,
                gpu_model: None,
                port: component.port(),
            }),
            Component::Ta | Component::Qa => {
                let cores = if component == Component::Ta {
                    requirement.cpu.ta
                } else {
                    requirement.cpu.qa
                };
                (cores > 0).then(|| ComponentPlan {
                    component,
                    replicas: replicas(cores.div_ceil(BATCH_POD_CORES)),
                    cpu_millis: BATCH_POD_CORES * 1000,
                    memory_mib: BATCH_POD_CORES * 4 * 1024,
                    gpus_per_pod: 0,
                    gpu_model: None,
                    port: component.port(),
                })
            }
            Component::Gateway => (requirement.cpu.common > 0).then(|| ComponentPlan {
                component,
                replicas: preset.scaling().min_replicas,
                cpu_millis: 1000,
                memory_mib: 2048,
                gpus_per_pod: 0,
                gpu_model: None,
                port: component.port(),
            }),
        };
        if let Some(plan) = plan {
            plans.push(plan);
        }
    }
    plans
}
