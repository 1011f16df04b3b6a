//! Node group scoring for placement advice
//!
//! Each candidate node group gets three independent scores in 0..=100:
//! resource utilization, network locality and availability. The overall
//! score is their weighted sum. Higher is better.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::inventory::NodeGroup;
use crate::capacity::{Component, ComponentPlan};

/// Projected CPU utilization above which a group is penalized
pub const CPU_PRESSURE_PERCENT: f64 = 80.0;
/// Projected GPU utilization above which a group is penalized
pub const GPU_PRESSURE_PERCENT: f64 = 90.0;

/// Colocate these pairs to cut cross-node latency
pub const AFFINITY: [(Component, Component); 3] = [
    (Component::Stt, Component::Nlp),
    (Component::Nlp, Component::Aicm),
    (Component::Tts, Component::Nlp),
];

/// Keep these pairs apart; they compete for the same resources
pub const ANTI_AFFINITY: [(Component, Component); 2] = [
    (Component::Ta, Component::Stt),
    (Component::Qa, Component::Tts),
];

fn peers(rules: &[(Component, Component)], component: Component) -> Vec<Component> {
    rules
        .iter()
        .filter_map(|&(a, b)| {
            if a == component {
                Some(b)
            } else if b == component {
                Some(a)
            } else {
                None
            }
        })
        .collect()
}

pub fn affinity_peers(component: Component) -> Vec<Component> {
    peers(&AFFINITY, component)
}

pub fn anti_affinity_peers(component: Component) -> Vec<Component> {
    peers(&ANTI_AFFINITY, component)
}

/// Weight configuration for resource scoring
///
/// Weights should sum to approximately 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceWeights {
    /// Weight for CPU headroom (default: 0.35)
    pub cpu: f64,
    /// Weight for memory headroom (default: 0.25)
    pub memory: f64,
    /// Weight for GPU headroom (default: 0.40, redistributed for CPU workloads)
    pub gpu: f64,
}

impl Default for ResourceWeights {
    fn default() -> Self {
        Self {
            cpu: 0.35,
            memory: 0.25,
            gpu: 0.40,
        }
    }
}

impl ResourceWeights {
    /// Redistribute GPU weight when the workload uses no GPU
    fn redistribute_for_no_gpu(&self) -> Self {
        let redistribution = self.gpu / 2.0;
        Self {
            cpu: self.cpu + redistribution,
            memory: self.memory + redistribution,
            gpu: 0.0,
        }
    }
}

/// Blend of the three independent scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementWeights {
    pub resource: f64,
    pub network: f64,
    pub availability: f64,
}

impl Default for PlacementWeights {
    fn default() -> Self {
        Self {
            resource: 0.5,
            network: 0.25,
            availability: 0.25,
        }
    }
}

/// Resources a component would add to a group
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Demand {
    pub cpu_cores: f64,
    pub memory_gb: f64,
    pub gpus: f64,
}

impl Demand {
    pub fn of(plan: &ComponentPlan) -> Self {
        let replicas = plan.replicas as f64;
        Self {
            cpu_cores: replicas * plan.cpu_millis as f64 / 1000.0,
            memory_gb: replicas * plan.memory_mib as f64 / 1024.0,
            gpus: replicas * plan.gpus_per_pod as f64,
        }
    }
}

/// Utilization of a group after earlier recommendations
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupLoad {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub gpu_percent: f64,
}

impl GroupLoad {
    pub fn current(group: &NodeGroup) -> Self {
        Self {
            cpu_percent: group.cpu_usage_percent,
            memory_percent: group.memory_usage_percent,
            gpu_percent: group.gpu_usage_percent.unwrap_or(0.0),
        }
    }

    /// Load after adding `demand`
    pub fn with(&self, group: &NodeGroup, demand: &Demand) -> Self {
        let pct = |used: f64, capacity: u64| {
            if capacity == 0 {
                if used > 0.0 {
                    f64::INFINITY
                } else {
                    0.0
                }
            } else {
                used / capacity as f64 * 100.0
            }
        };
        Self {
            cpu_percent: self.cpu_percent + pct(demand.cpu_cores, group.total_cores()),
            memory_percent: self.memory_percent + pct(demand.memory_gb, group.total_memory_gb()),
            gpu_percent: self.gpu_percent + pct(demand.gpus, group.total_gpus()),
        }
    }
}

/// Where earlier components were recommended, used for network and availability scoring
#[derive(Debug, Clone, Default)]
pub struct PlacementContext<'a> {
    /// component -> (group name, zone)
    pub placed: BTreeMap<Component, (&'a str, &'a str)>,
}

impl<'a> PlacementContext<'a> {
    pub fn place(&mut self, component: Component, group: &'a NodeGroup) {
        self.placed
            .insert(component, (group.name.as_str(), group.zone.as_str()));
    }

    fn components_in_zone(&self, zone: &str) -> usize {
        self.placed.values().filter(|(_, z)| *z == zone).count()
    }
}

/// Breakdown of a group's score for one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementScore {
    pub total: f64,
    pub resource: f64,
    pub network: f64,
    pub availability: f64,
}

/// Score resource headroom after the component lands on the group
///
/// Projected CPU above 80% halves the score, projected GPU above 90% halves
/// it again. A GPU workload on a group without GPUs scores 0.
pub fn resource_score(
    component: Component,
    projected: &GroupLoad,
    has_gpu: bool,
    weights: &ResourceWeights,
) -> f64 {
    if component.is_gpu() && !has_gpu {
        return 0.0;
    }

    let cpu_score = (100.0 - projected.cpu_percent).max(0.0);
    let memory_score = (100.0 - projected.memory_percent).max(0.0);

    let mut total = if component.is_gpu() {
        let gpu_score = (100.0 - projected.gpu_percent).max(0.0);
        cpu_score * weights.cpu + memory_score * weights.memory + gpu_score * weights.gpu
    } else {
        let weights = weights.redistribute_for_no_gpu();
        cpu_score * weights.cpu + memory_score * weights.memory
    };

    if projected.cpu_percent > CPU_PRESSURE_PERCENT {
        total *= 0.5;
    }
    if component.is_gpu() && projected.gpu_percent > GPU_PRESSURE_PERCENT {
        total *= 0.5;
    }
    // CPU-only work parked on accelerator nodes wastes them
    if !component.is_gpu() && has_gpu {
        total *= 0.8;
    }

    total.clamp(0.0, 100.0)
}

/// Score locality: colocation with affinity peers and zone spread
///
/// Starts at 50. Each placed affinity peer adds 25 in the same group, 10 in
/// the same zone, and subtracts 10 in another zone. Each anti-affinity peer
/// in the same group subtracts 30. A group in the least crowded zone gets 15.
pub fn network_score(
    component: Component,
    group: &NodeGroup,
    zones: &[&str],
    context: &PlacementContext<'_>,
) -> f64 {
    let mut score: f64 = 50.0;

    for peer in affinity_peers(component) {
        if let Some((peer_group, peer_zone)) = context.placed.get(&peer) {
            if *peer_group == group.name {
                score += 25.0;
            } else if *peer_zone == group.zone {
                score += 10.0;
            } else {
                score -= 10.0;
            }
        }
    }

    for peer in anti_affinity_peers(component) {
        if let Some((peer_group, _)) = context.placed.get(&peer) {
            if *peer_group == group.name {
                score -= 30.0;
            }
        }
    }

    if zones.len() > 1 {
        let here = context.components_in_zone(&group.zone);
        let least = zones
            .iter()
            .map(|z| context.components_in_zone(z))
            .min()
            .unwrap_or(0);
        if here == least {
            score += 15.0;
        }
    }

    score.clamp(0.0, 100.0)
}

/// Score failure isolation: node diversity and zone diversity
///
/// Up to 60 points for enough nodes to spread the replicas one per node,
/// up to 40 for a zone not already hosting the tenant's other components.
pub fn availability_score(replicas: u32, group: &NodeGroup, context: &PlacementContext<'_>) -> f64 {
    let replicas = replicas.max(1) as f64;
    let node_share = (group.node_count as f64 / replicas).min(1.0);
    let node_score = 60.0 * node_share;

    let zone_score = if context.placed.is_empty() {
        40.0
    } else {
        let crowding = context.components_in_zone(&group.zone) as f64 / context.placed.len() as f64;
        40.0 * (1.0 - crowding)
    };

    (node_score + zone_score).clamp(0.0, 100.0)
}

pub fn combine(resource: f64, network: f64, availability: f64, weights: &PlacementWeights) -> PlacementScore {
    let total = resource * weights.resource
        + network * weights.network
        + availability * weights.availability;
    PlacementScore {
        total: total.clamp(0.0, 100.0),
        resource,
        network,
        availability,
    }
}

/// Returns `Ordering::Greater` if `a` is the better placement
pub fn compare_scores(a: &PlacementScore, b: &PlacementScore) -> Ordering {
    a.total.partial_cmp(&b.total).unwrap_or(Ordering::Equal)
}
