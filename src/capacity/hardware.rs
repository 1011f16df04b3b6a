//! Hardware spec builder
//!
//! Bin-packs unit counts into concrete server definitions. For every role the
//! candidate sizes are tried largest first; the first size whose rounded-up
//! total stays within 150% of the requirement wins. When no single size
//! qualifies, a greedy multi-size packing is used instead.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::calculator::ResourceRequirement;
use super::tier::GpuTier;
use crate::config::LoadProfile;
use crate::error::CapacityComputationError;

/// GPUs per GPU server
pub const GPU_SERVER_SIZES: [u64; 4] = [8, 4, 2, 1];
/// Cores per processing server
pub const PROCESSING_SERVER_SIZES: [u64; 4] = [64, 32, 16, 8];
/// Cores per common-services server
pub const COMMON_SERVER_SIZES: [u64; 3] = [32, 16, 8];
/// Host cores provisioned per GPU
pub const CORES_PER_GPU: u64 = 8;

/// Server category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerRole {
    /// GPU inference (TTS, NLP, AICM)
    Gpu,
    /// CPU-bound realtime and batch processing (STT, TA, QA)
    Processing,
    /// Gateway, database, monitoring
    Common,
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerRole::Gpu => write!(f, "gpu"),
            ServerRole::Processing => write!(f, "processing"),
            ServerRole::Common => write!(f, "common"),
        }
    }
}

/// One server class in the hardware plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareServerSpec {
    pub role: ServerRole,
    pub cores: u64,
    pub ram_gb: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_type: Option<GpuTier>,
    pub gpu_count: u64,
    pub storage_gb: u64,
    pub quantity: u64,
    /// Upstream services that drove this sizing
    pub purpose: String,
}

impl HardwareServerSpec {
    /// Packing units one server provides (GPUs for GPU servers, cores otherwise)
    pub fn capacity(&self) -> u64 {
        match self.role {
            ServerRole::Gpu => self.gpu_count,
            ServerRole::Processing | ServerRole::Common => self.cores,
        }
    }

    /// Packing units provided by all servers of this class
    pub fn total_capacity(&self) -> u64 {
        self.capacity() * self.quantity
    }
}

/// Pack `required` units into `(size, count)` pairs
///
/// Guarantees `Σ size × count ≥ required`.
pub fn pack_units(required: u64, candidates: &[u64]) -> Vec<(u64, u64)> {
    if required == 0 || candidates.is_empty() {
        return Vec::new();
    }
    let mut sizes: Vec<u64> = candidates.iter().copied().filter(|s| *s > 0).collect();
    sizes.sort_unstable_by(|a, b| b.cmp(a));
    sizes.dedup();
    if sizes.is_empty() {
        return Vec::new();
    }

    for &size in &sizes {
        let count = required.div_ceil(size);
        // count * size <= 1.5 * required
        if 2 * u128::from(count) * u128::from(size) <= 3 * u128::from(required) {
            return vec![(size, count)];
        }
    }

    greedy_pack(required, &sizes)
}

/// Fill with the largest size, then cover the remainder with the smallest size that fits
fn greedy_pack(required: u64, sizes_desc: &[u64]) -> Vec<(u64, u64)> {
    let largest = sizes_desc[0];
    let mut packed = Vec::new();
    let mut remaining = required;

    if remaining >= largest {
        let count = remaining / largest;
        packed.push((largest, count));
        remaining -= count * largest;
    }
    if remaining > 0 {
        let size = sizes_desc
            .iter()
            .rev()
            .copied()
            .find(|s| *s >= remaining)
            .unwrap_or(largest);
        match packed.iter_mut().find(|(s, _)| *s == size) {
            Some(entry) => entry.1 += 1,
            None => packed.push((size, 1)),
        }
    }
    packed
}

fn describe(parts: &[(&str, u64, &str)]) -> String {
    parts
        .iter()
        .filter(|(_, n, _)| *n > 0)
        .map(|(name, n, unit)| format!("{} {}{}", name, n, unit))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the server list for a resource requirement
pub fn build_servers(
    requirement: &ResourceRequirement,
    profile: &LoadProfile,
) -> Result<Vec<HardwareServerSpec>, CapacityComputationError> {
    let c = &profile.compute;
    let mut servers = Vec::new();

    let gpu = &requirement.gpu;
    if gpu.total > 0 {
        let tier = requirement.gpu_tier;
        let purpose = format!(
            "{} on {}",
            describe(&[
                ("TTS", gpu.tts, " GPU"),
                ("NLP", gpu.nlp, " GPU"),
                ("AICM", gpu.aicm, " GPU"),
            ]),
            tier.spec().model
        );
        for (size, count) in pack_units(gpu.total, &GPU_SERVER_SIZES) {
            servers.push(HardwareServerSpec {
                role: ServerRole::Gpu,
                cores: size * CORES_PER_GPU,
                ram_gb: size * requirement.gpu_ram_per_unit_gb,
                gpu_type: Some(tier),
                gpu_count: size,
                storage_gb: c.storage_per_server_gb,
                quantity: count,
                purpose: purpose.clone(),
            });
        }
    }

    let cpu = &requirement.cpu;
    if cpu.processing() > 0 {
        let purpose = describe(&[
            ("STT", cpu.stt, " cores"),
            ("TA", cpu.ta, " cores"),
            ("QA", cpu.qa, " cores"),
        ]);
        for (size, count) in pack_units(cpu.processing(), &PROCESSING_SERVER_SIZES) {
            servers.push(HardwareServerSpec {
                role: ServerRole::Processing,
                cores: size,
                ram_gb: size * c.memory_per_core_gb,
                gpu_type: None,
                gpu_count: 0,
                storage_gb: c.storage_per_server_gb,
                quantity: count,
                purpose: purpose.clone(),
            });
        }
    }

    if cpu.common > 0 {
        let stateful = requirement.storage.stateful;
        let purpose = format!(
            "API gateway, database, monitoring for {} users (stateful {}GB)",
            requirement.load.total_users, stateful
        );
        for (size, count) in pack_units(cpu.common, &COMMON_SERVER_SIZES) {
            servers.push(HardwareServerSpec {
                role: ServerRole::Common,
                cores: size,
                ram_gb: (size * c.memory_per_core_gb).max(c.common_memory_gb),
                gpu_type: None,
                gpu_count: 0,
                storage_gb: c.storage_per_server_gb + stateful,
                quantity: count,
                purpose: purpose.clone(),
            });
        }
    }

    verify_capacity(&servers, ServerRole::Gpu, gpu.total)?;
    verify_capacity(&servers, ServerRole::Processing, cpu.processing())?;
    verify_capacity(&servers, ServerRole::Common, cpu.common)?;
    Ok(servers)
}

fn verify_capacity(
    servers: &[HardwareServerSpec],
    role: ServerRole,
    required: u64,
) -> Result<(), CapacityComputationError> {
    let provided: u64 = servers
        .iter()
        .filter(|s| s.role == role)
        .map(|s| s.total_capacity())
        .sum();
    if provided < required {
        return Err(CapacityComputationError::UnderProvisioned {
            role: role.to_string(),
            required,
            provided,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::calculator::ResourceCalculator;
    use crate::capacity::load::{ServiceRequirement, ServiceType};
    use crate::config::request::GpuSelection;

    fn total(packed: &[(u64, u64)]) -> u64 {
        packed.iter().map(|(s, c)| s * c).sum()
    }

    #[test]
    fn test_pack_units_near_integer_limit() {
        let packed = pack_units(u64::MAX - 1, &PROCESSING_SERVER_SIZES);
        assert_eq!(packed, vec![(64, u64::MAX / 64 + 1)]);
    }

    #[test]
    fn test_pack_prefers_largest_within_bound() {
        assert_eq!(pack_units(6, &GPU_SERVER_SIZES), vec![(8, 1)]);
        assert_eq!(pack_units(16, &GPU_SERVER_SIZES), vec![(8, 2)]);
        // 8 * 2 = 16 > 13.5, 4 * 3 = 12 <= 13.5
        assert_eq!(pack_units(9, &GPU_SERVER_SIZES), vec![(4, 3)]);
        assert_eq!(pack_units(1, &GPU_SERVER_SIZES), vec![(1, 1)]);
    }

    #[test]
    fn test_pack_falls_back_to_greedy() {
        // no single size fits 5 cores within 7.5
        assert_eq!(pack_units(5, &PROCESSING_SERVER_SIZES), vec![(8, 1)]);
        // 70 cores: 64 * 2 = 128 > 105, 32 * 3 = 96 <= 105
        assert_eq!(pack_units(70, &PROCESSING_SERVER_SIZES), vec![(32, 3)]);
        let packed = greedy_pack(70, &[64, 32, 16, 8]);
        assert_eq!(packed, vec![(64, 1), (8, 1)]);
    }

    #[test]
    fn test_pack_zero() {
        assert!(pack_units(0, &GPU_SERVER_SIZES).is_empty());
    }

    #[test]
    fn test_pack_capacity_invariant() {
        for required in 0..400u64 {
            for sizes in [&GPU_SERVER_SIZES[..], &PROCESSING_SERVER_SIZES[..], &COMMON_SERVER_SIZES[..]] {
                let packed = pack_units(required, sizes);
                assert!(total(&packed) >= required, "required {}", required);
            }
        }
    }

    #[test]
    fn test_build_servers_for_callbot_tenant() {
        let profile = LoadProfile::v1();
        let calc = ResourceCalculator::new(profile.clone());
        let requirement = calc
            .calculate(
                &ServiceRequirement::from_pairs([(ServiceType::Callbot, 160)]),
                GpuSelection::Auto,
            )
            .unwrap();
        let servers = build_servers(&requirement, &profile).unwrap();

        let gpu: Vec<_> = servers.iter().filter(|s| s.role == ServerRole::Gpu).collect();
        assert_eq!(gpu.len(), 1);
        assert_eq!(gpu[0].gpu_count, 8);
        assert_eq!(gpu[0].gpu_type, Some(GpuTier::Tier1));
        assert!(gpu[0].purpose.contains("TTS 4 GPU"));
        assert!(gpu[0].purpose.contains("nvidia-t4"));

        let processing: Vec<_> = servers
            .iter()
            .filter(|s| s.role == ServerRole::Processing)
            .collect();
        assert!(processing.iter().map(|s| s.total_capacity()).sum::<u64>() >= 25);
        assert!(processing[0].purpose.contains("STT 25 cores"));

        let common: Vec<_> = servers.iter().filter(|s| s.role == ServerRole::Common).collect();
        assert_eq!(common[0].storage_gb, 500 + 1024);
    }

    #[test]
    fn test_empty_requirement_has_no_servers() {
        let profile = LoadProfile::v1();
        let requirement = ResourceCalculator::new(profile.clone())
            .calculate(&ServiceRequirement::default(), GpuSelection::Auto)
            .unwrap();
        assert!(build_servers(&requirement, &profile).unwrap().is_empty());
    }
}
