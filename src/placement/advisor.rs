//! Advisory placement of a tenant's components onto node groups
//!
//! The advisor never touches rendered manifests or the cluster. Its output
//! is a report for an operator.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::inventory::{NodeGroup, NodeInventory};
use super::scoring::{
    affinity_peers, anti_affinity_peers, availability_score, combine, compare_scores,
    network_score, resource_score, Demand, GroupLoad, PlacementContext, PlacementScore,
    PlacementWeights, ResourceWeights,
};
use crate::capacity::{Component, ComponentPlan, TenantSpec};

/// Components with the most affinity links are placed first so their peers
/// can follow them
const PLACEMENT_ORDER: [Component; 7] = [
    Component::Nlp,
    Component::Stt,
    Component::Tts,
    Component::Aicm,
    Component::Gateway,
    Component::Ta,
    Component::Qa,
];

/// One candidate group for a component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedNodeGroup {
    #[serde(rename = "nodeGroup")]
    pub node_group: String,
    pub zone: String,
    pub score: PlacementScore,
    /// False when the group cannot host the component at all
    pub eligible: bool,
}

/// Ranked candidates for one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementRecommendation {
    pub component: Component,
    pub replicas: u32,
    pub affinity: Vec<Component>,
    #[serde(rename = "antiAffinity")]
    pub anti_affinity: Vec<Component>,
    /// Best first
    pub ranked: Vec<RankedNodeGroup>,
}

impl PlacementRecommendation {
    /// Top eligible group
    pub fn best(&self) -> Option<&RankedNodeGroup> {
        self.ranked.iter().find(|r| r.eligible)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementReport {
    #[serde(rename = "tenantId")]
    pub tenant_id: String,
    pub recommendations: Vec<PlacementRecommendation>,
    pub warnings: Vec<String>,
    #[serde(rename = "generatedAt")]
    pub generated_at: DateTime<Utc>,
}

impl PlacementReport {
    pub fn for_component(&self, component: Component) -> Option<&PlacementRecommendation> {
        self.recommendations.iter().find(|r| r.component == component)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HardwarePlacementAdvisor {
    resource_weights: ResourceWeights,
    weights: PlacementWeights,
}

impl HardwarePlacementAdvisor {
    pub fn new(resource_weights: ResourceWeights, weights: PlacementWeights) -> Self {
        Self {
            resource_weights,
            weights,
        }
    }

    /// Rank node groups for every component the tenant runs
    ///
    /// Components are placed greedily in affinity order. Each recommendation
    /// adds its demand to the top group so later components see the
    /// projected load.
    pub fn advise(&self, spec: &TenantSpec, inventory: &NodeInventory, now: DateTime<Utc>) -> PlacementReport {
        let zones: Vec<&str> = inventory.zones().into_iter().collect();
        let mut loads: HashMap<&str, GroupLoad> = inventory
            .node_groups
            .iter()
            .map(|g| (g.name.as_str(), GroupLoad::current(g)))
            .collect();
        let mut context = PlacementContext::default();
        let mut recommendations = Vec::new();
        let mut warnings = Vec::new();

        if inventory.node_groups.is_empty() && !spec.components.is_empty() {
            warnings.push("inventory has no node groups".to_string());
        }

        for component in PLACEMENT_ORDER {
            let Some(plan) = spec.component(component) else {
                continue;
            };
            let demand = Demand::of(plan);

            let mut ranked: Vec<(RankedNodeGroup, &NodeGroup)> = inventory
                .node_groups
                .iter()
                .map(|group| {
                    let load = loads
                        .get(group.name.as_str())
                        .copied()
                        .unwrap_or_else(|| GroupLoad::current(group));
                    let projected = load.with(group, &demand);
                    let eligible = Self::eligible(plan, group);
                    let resource = if eligible {
                        resource_score(component, &projected, group.has_gpu(), &self.resource_weights)
                    } else {
                        0.0
                    };
                    let network = network_score(component, group, &zones, &context);
                    let availability = availability_score(plan.replicas, group, &context);
                    let score = combine(resource, network, availability, &self.weights);
                    debug!(
                        component = %component,
                        group = %group.name,
                        total = score.total,
                        "Scored node group"
                    );
                    (
                        RankedNodeGroup {
                            node_group: group.name.clone(),
                            zone: group.zone.clone(),
                            score,
                            eligible,
                        },
                        group,
                    )
                })
                .collect();

            ranked.sort_by(|(a, _), (b, _)| {
                b.eligible
                    .cmp(&a.eligible)
                    .then_with(|| compare_scores(&b.score, &a.score))
                    .then_with(|| a.node_group.cmp(&b.node_group))
            });

            match ranked.iter().find(|(r, _)| r.eligible) {
                Some((_, group)) => {
                    if let Some(load) = loads.get_mut(group.name.as_str()) {
                        *load = load.with(group, &demand);
                    }
                    context.place(component, group);
                }
                None => {
                    warn!(tenant = %spec.tenant_id, component = %component, "No eligible node group");
                    warnings.push(format!("no eligible node group for {}", component));
                }
            }

            recommendations.push(PlacementRecommendation {
                component,
                replicas: plan.replicas,
                affinity: affinity_peers(component),
                anti_affinity: anti_affinity_peers(component),
                ranked: ranked.into_iter().map(|(r, _)| r).collect(),
            });
        }

        info!(
            tenant = %spec.tenant_id,
            components = recommendations.len(),
            warnings = warnings.len(),
            "Generated placement advice"
        );

        PlacementReport {
            tenant_id: spec.tenant_id.clone(),
            recommendations,
            warnings,
            generated_at: now,
        }
    }

    /// Hard constraints: GPU work needs GPUs of the planned model
    fn eligible(plan: &ComponentPlan, group: &NodeGroup) -> bool {
        if plan.gpus_per_pod == 0 {
            return true;
        }
        if !group.has_gpu() {
            return false;
        }
        match (&plan.gpu_model, &group.gpu_model) {
            (Some(wanted), Some(have)) => wanted == have,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::{ResourceCalculator, ServiceRequirement, ServiceType};
    use crate::config::request::GpuSelection;
    use chrono::TimeZone;

    fn spec(callbots: u64) -> TenantSpec {
        let requirements = ServiceRequirement::from_pairs([(ServiceType::Callbot, callbots)]);
        crate::capacity::generate_tenant_specs(
            &ResourceCalculator::default(),
            "acme",
            &requirements,
            GpuSelection::Auto,
            Utc.timestamp_opt(0, 0).unwrap(),
        )
        .unwrap()
    }

    fn inventory(gpu_model: &str) -> NodeInventory {
        NodeInventory::from_yaml(&format!(
            r#"
nodeGroups:
  - {{name: gpu-a, zone: zone-a, nodeCount: 3, cpuCores: 64, memoryGb: 512, gpus: 8, gpuModel: {m}}}
  - {{name: gpu-b, zone: zone-b, nodeCount: 3, cpuCores: 64, memoryGb: 512, gpus: 8, gpuModel: {m}, gpuUsagePercent: 95}}
  - {{name: cpu-a, zone: zone-a, nodeCount: 4, cpuCores: 64, memoryGb: 256}}
  - {{name: cpu-b, zone: zone-b, nodeCount: 4, cpuCores: 64, memoryGb: 256}}
"#,
            m = gpu_model
        ))
        .unwrap()
    }

    #[test]
    fn test_gpu_components_land_on_gpu_groups() {
        let spec = spec(160);
        let model = spec.gpu_type.spec().model.to_string();
        let report = HardwarePlacementAdvisor::default().advise(&spec, &inventory(&model), Utc::now());

        let nlp = report.for_component(Component::Nlp).unwrap();
        let best = nlp.best().unwrap();
        // gpu-b is above the GPU pressure threshold
        assert_eq!(best.node_group, "gpu-a");
        assert!(nlp
            .ranked
            .iter()
            .filter(|r| r.node_group.starts_with("cpu"))
            .all(|r| !r.eligible));
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_affinity_raises_network_score_near_nlp() {
        let spec = spec(160);
        let model = spec.gpu_type.spec().model.to_string();
        let report = HardwarePlacementAdvisor::default().advise(&spec, &inventory(&model), Utc::now());

        let stt = report.for_component(Component::Stt).unwrap();
        assert_eq!(stt.affinity, vec![Component::Nlp]);
        assert_eq!(stt.anti_affinity, vec![Component::Ta]);
        let network = |name: &str| {
            stt.ranked
                .iter()
                .find(|r| r.node_group == name)
                .map(|r| r.score.network)
                .unwrap()
        };
        // nlp was recommended onto gpu-a in zone-a
        assert_eq!(network("gpu-a"), 75.0);
        assert_eq!(network("cpu-a"), 60.0);
        // another zone loses the affinity bonus but gains the spread bonus
        assert_eq!(network("cpu-b"), 55.0);
        assert!(stt.ranked.iter().all(|r| r.eligible));
    }

    #[test]
    fn test_wrong_gpu_model_is_ineligible() {
        let spec = spec(160);
        let report =
            HardwarePlacementAdvisor::default().advise(&spec, &inventory("some-other-gpu"), Utc::now());
        assert!(report.for_component(Component::Nlp).unwrap().best().is_none());
        assert!(report.warnings.iter().any(|w| w.contains("nlp")));
    }

    #[test]
    fn test_empty_tenant_yields_empty_report() {
        let spec = spec(0);
        let report = HardwarePlacementAdvisor::default().advise(&spec, &inventory("x"), Utc::now());
        assert!(report.recommendations.is_empty());
        assert!(report.warnings.is_empty());
    }
}
