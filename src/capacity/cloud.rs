//! Cloud instance mapping
//!
//! Informational only: maps each server class to the cheapest catalog
//! instance meeting its floor and sums a monthly estimate per provider.
//! Nothing in the apply path depends on this output.

use serde::{Deserialize, Serialize};

use super::hardware::{HardwareServerSpec, ServerRole};

/// Billing hours per month
pub const HOURS_PER_MONTH: f64 = 730.0;

/// One purchasable instance type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogInstance {
    pub provider: &'static str,
    pub instance_type: &'static str,
    pub vcpu: u64,
    pub ram_gb: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_model: Option<&'static str>,
    pub gpu_count: u64,
    pub hourly_usd: f64,
}

const fn cpu(provider: &'static str, instance_type: &'static str, vcpu: u64, ram_gb: u64, hourly_usd: f64) -> CatalogInstance {
    CatalogInstance {
        provider,
        instance_type,
        vcpu,
        ram_gb,
        gpu_model: None,
        gpu_count: 0,
        hourly_usd,
    }
}

#[allow(clippy::too_many_arguments)]
const fn gpu(
    provider: &'static str,
    instance_type: &'static str,
    vcpu: u64,
    ram_gb: u64,
    model: &'static str,
    gpu_count: u64,
    hourly_usd: f64,
) -> CatalogInstance {
    CatalogInstance {
        provider,
        instance_type,
        vcpu,
        ram_gb,
        gpu_model: Some(model),
        gpu_count,
        hourly_usd,
    }
}

/// Built-in on-demand catalog (list prices, USD)
pub const CATALOG: &[CatalogInstance] = &[
    gpu("aws", "g4dn.2xlarge", 8, 32, "nvidia-t4", 1, 0.752),
    gpu("aws", "g4dn.12xlarge", 48, 192, "nvidia-t4", 4, 3.912),
    gpu("aws", "g4dn.metal", 96, 384, "nvidia-t4", 8, 7.824),
    gpu("aws", "g5.2xlarge", 8, 32, "nvidia-a10g", 1, 1.212),
    gpu("aws", "g5.12xlarge", 48, 192, "nvidia-a10g", 4, 5.672),
    gpu("aws", "g5.48xlarge", 192, 768, "nvidia-a10g", 8, 16.288),
    gpu("aws", "p4d.24xlarge", 96, 1152, "nvidia-a100", 8, 32.773),
    cpu("aws", "m6i.2xlarge", 8, 32, 0.384),
    cpu("aws", "m6i.4xlarge", 16, 64, 0.768),
    cpu("aws", "m6i.8xlarge", 32, 128, 1.536),
    cpu("aws", "m6i.16xlarge", 64, 256, 3.072),
    cpu("aws", "r6i.4xlarge", 16, 128, 1.008),
    gpu("gcp", "n1-standard-8+1xT4", 8, 30, "nvidia-t4", 1, 0.73),
    gpu("gcp", "n1-standard-32+4xT4", 32, 120, "nvidia-t4", 4, 2.92),
    gpu("gcp", "a2-highgpu-1g", 12, 85, "nvidia-a100", 1, 3.673),
    gpu("gcp", "a2-highgpu-4g", 48, 340, "nvidia-a100", 4, 14.694),
    gpu("gcp", "a2-highgpu-8g", 96, 680, "nvidia-a100", 8, 29.387),
    cpu("gcp", "n2-standard-8", 8, 32, 0.388),
    cpu("gcp", "n2-standard-16", 16, 64, 0.777),
    cpu("gcp", "n2-standard-32", 32, 128, 1.554),
    cpu("gcp", "n2-standard-64", 64, 256, 3.108),
    gpu("azure", "Standard_NC8as_T4_v3", 8, 56, "nvidia-t4", 1, 0.752),
    gpu("azure", "Standard_NC64as_T4_v3", 64, 440, "nvidia-t4", 4, 4.352),
    gpu("azure", "Standard_NC24ads_A100_v4", 24, 220, "nvidia-a100", 1, 3.673),
    gpu("azure", "Standard_NC96ads_A100_v4", 96, 880, "nvidia-a100", 4, 14.692),
    gpu("azure", "Standard_ND96asr_v4", 96, 900, "nvidia-a100", 8, 27.197),
    cpu("azure", "Standard_D8s_v5", 8, 32, 0.384),
    cpu("azure", "Standard_D16s_v5", 16, 64, 0.768),
    cpu("azure", "Standard_D32s_v5", 32, 128, 1.536),
    cpu("azure", "Standard_D64s_v5", 64, 256, 3.072),
];

/// Providers in report order
pub const PROVIDERS: [&str; 3] = ["aws", "gcp", "azure"];

/// A server class matched to an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceMatch {
    pub role: ServerRole,
    pub purpose: String,
    pub instance_type: String,
    pub quantity: u64,
    pub hourly_usd: f64,
    pub monthly_usd: f64,
}

/// Cost estimate for one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEstimate {
    pub provider: String,
    pub matches: Vec<InstanceMatch>,
    /// Purposes of server classes with no qualifying instance
    pub unmatched: Vec<String>,
    pub monthly_total_usd: f64,
}

/// Per-provider cost report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudCostReport {
    pub providers: Vec<ProviderEstimate>,
}

impl CloudCostReport {
    /// Cheapest provider that matched every server class
    pub fn cheapest_complete(&self) -> Option<&ProviderEstimate> {
        self.providers
            .iter()
            .filter(|p| p.unmatched.is_empty())
            .min_by(|a, b| {
                a.monthly_total_usd
                    .partial_cmp(&b.monthly_total_usd)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

fn satisfies(instance: &CatalogInstance, server: &HardwareServerSpec) -> bool {
    if instance.vcpu < server.cores || instance.ram_gb < server.ram_gb {
        return false;
    }
    match (server.role, server.gpu_type) {
        (ServerRole::Gpu, Some(tier)) => {
            instance.gpu_model == Some(tier.spec().model) && instance.gpu_count >= server.gpu_count
        }
        (ServerRole::Gpu, None) => false,
        _ => instance.gpu_model.is_none(),
    }
}

/// Cheapest instance of `provider` meeting the server floor
pub fn cheapest_instance<'a>(
    catalog: &'a [CatalogInstance],
    provider: &str,
    server: &HardwareServerSpec,
) -> Option<&'a CatalogInstance> {
    catalog
        .iter()
        .filter(|i| i.provider == provider && satisfies(i, server))
        .min_by(|a, b| {
            a.hourly_usd
                .partial_cmp(&b.hourly_usd)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

/// Map a server list onto every provider in a catalog
pub fn estimate_costs(catalog: &[CatalogInstance], servers: &[HardwareServerSpec]) -> CloudCostReport {
    let providers = PROVIDERS
        .iter()
        .map(|provider| {
            let mut matches = Vec::new();
            let mut unmatched = Vec::new();
            for server in servers {
                match cheapest_instance(catalog, provider, server) {
                    Some(instance) => {
                        let hourly = instance.hourly_usd * server.quantity as f64;
                        matches.push(InstanceMatch {
                            role: server.role,
                            purpose: server.purpose.clone(),
                            instance_type: instance.instance_type.to_string(),
                            quantity: server.quantity,
                            hourly_usd: hourly,
                            monthly_usd: hourly * HOURS_PER_MONTH,
                        });
                    }
                    None => unmatched.push(server.purpose.clone()),
                }
            }
            let monthly_total_usd = matches.iter().map(|m| m.monthly_usd).sum();
            ProviderEstimate {
                provider: provider.to_string(),
                matches,
                unmatched,
                monthly_total_usd,
            }
        })
        .collect();
    CloudCostReport { providers }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::tier::GpuTier;

    fn gpu_server(tier: GpuTier, gpus: u64, quantity: u64) -> HardwareServerSpec {
        HardwareServerSpec {
            role: ServerRole::Gpu,
            cores: gpus * 8,
            ram_gb: gpus * 20,
            gpu_type: Some(tier),
            gpu_count: gpus,
            storage_gb: 500,
            quantity,
            purpose: "NLP".to_string(),
        }
    }

    fn cpu_server(cores: u64) -> HardwareServerSpec {
        HardwareServerSpec {
            role: ServerRole::Processing,
            cores,
            ram_gb: cores * 4,
            gpu_type: None,
            gpu_count: 0,
            storage_gb: 500,
            quantity: 1,
            purpose: "STT".to_string(),
        }
    }

    #[test]
    fn test_cheapest_cpu_instance() {
        let instance = cheapest_instance(CATALOG, "aws", &cpu_server(16)).unwrap();
        assert_eq!(instance.instance_type, "m6i.4xlarge");
    }

    #[test]
    fn test_gpu_instance_requires_model() {
        let instance = cheapest_instance(CATALOG, "aws", &gpu_server(GpuTier::Tier1, 1, 1)).unwrap();
        assert_eq!(instance.instance_type, "g4dn.2xlarge");
        assert!(cheapest_instance(CATALOG, "gcp", &gpu_server(GpuTier::Tier2, 1, 1)).is_none());
    }

    #[test]
    fn test_report_lists_unmatched() {
        let servers = vec![gpu_server(GpuTier::Tier2, 4, 2), cpu_server(32)];
        let report = estimate_costs(CATALOG, &servers);
        let gcp = report.providers.iter().find(|p| p.provider == "gcp").unwrap();
        assert_eq!(gcp.unmatched, vec!["NLP".to_string()]);
        assert_eq!(gcp.matches.len(), 1);

        let aws = report.providers.iter().find(|p| p.provider == "aws").unwrap();
        assert!(aws.unmatched.is_empty());
        let expected = (5.672 * 2.0 + 1.536) * HOURS_PER_MONTH;
        assert!((aws.monthly_total_usd - expected).abs() < 1e-6);
        assert_eq!(report.cheapest_complete().unwrap().provider, "aws");
    }

    #[test]
    fn test_empty_server_list() {
        let report = estimate_costs(CATALOG, &[]);
        assert_eq!(report.providers.len(), 3);
        assert!(report.providers.iter().all(|p| p.monthly_total_usd == 0.0));
    }
}
