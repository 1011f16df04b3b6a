//! Resource calculator
//!
//! Turns processing volumes into GPU/CPU/memory/storage unit counts. The GPU
//! computation is split into three pure stages so each can be tested alone:
//!
//! 1. [`ResourceCalculator::estimate_raw_units`] against the cheapest tier
//! 2. [`select_tier`] from total channels and raw units
//! 3. [`ResourceCalculator::compute_gpu_units`] once with the chosen tier
//!
//! Every count rounds up. Capacity is never under-estimated to save a unit.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::load::{analyze, ceil_units, ServiceLoad, ServiceRequirement};
use super::tier::{select_tier, GpuTier};
use crate::config::request::GpuSelection;
use crate::config::LoadProfile;
use crate::error::CapacityComputationError;

/// Channel thresholds for the NLP/AICM demand multiplier
const MEDIUM_CHANNEL_TIER: u64 = 100;
const LARGE_CHANNEL_TIER: u64 = 500;

/// Normalisers for workload intensity
const INTENSITY_TTS_CHANNELS: f64 = 100.0;
const INTENSITY_NLP_DAILY: f64 = 500_000.0;
const INTENSITY_AICM_DAILY: f64 = 300_000.0;
const INTENSITY_WEIGHT: f64 = 0.5;
const MIN_RAM_MULTIPLIER: f64 = 1.25;

/// GPU units per service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuBreakdown {
    pub tts: u64,
    pub nlp: u64,
    pub aicm: u64,
    pub total: u64,
}

impl GpuBreakdown {
    fn new(tts: u64, nlp: u64, aicm: u64) -> Self {
        Self {
            tts,
            nlp,
            aicm,
            total: tts + nlp + aicm,
        }
    }
}

/// CPU cores per service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuBreakdown {
    pub stt: u64,
    pub ta: u64,
    pub qa: u64,
    /// Gateway, database, monitoring
    pub common: u64,
    pub total: u64,
}

impl CpuBreakdown {
    /// Cores that land on processing (non-common) servers
    pub fn processing(&self) -> u64 {
        self.stt + self.ta + self.qa
    }
}

/// Memory per consumer in GB
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBreakdown {
    pub stt: u64,
    pub ta: u64,
    pub qa: u64,
    pub common: u64,
    /// Host RAM backing GPU workers
    pub gpu_host: u64,
    pub total: u64,
}

/// Storage in GB
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageBreakdown {
    /// Baseline per logical server
    pub system: u64,
    /// Database and recordings
    pub stateful: u64,
    pub total: u64,
}

/// Computed resource need for a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    pub gpu_tier: GpuTier,
    /// Whether the tier came from auto selection
    pub tier_auto_selected: bool,
    /// NLP/AICM demand multiplier from the channel tier
    pub scale_multiplier: f64,
    /// NLP + AICM units against the cheapest tier (tier-selection input)
    pub raw_gpu_units: u64,
    pub gpu: GpuBreakdown,
    /// Host RAM per GPU unit (GB)
    pub gpu_ram_per_unit_gb: u64,
    pub cpu: CpuBreakdown,
    pub memory: MemoryBreakdown,
    pub storage: StorageBreakdown,
    pub load: ServiceLoad,
}

impl ResourceRequirement {
    /// Check that every total equals the sum of its breakdown
    pub fn verify_totals(&self) -> Result<(), CapacityComputationError> {
        check_sum(
            "gpu",
            self.gpu.tts + self.gpu.nlp + self.gpu.aicm,
            self.gpu.total,
        )?;
        check_sum(
            "cpu",
            self.cpu.stt + self.cpu.ta + self.cpu.qa + self.cpu.common,
            self.cpu.total,
        )?;
        check_sum(
            "memory",
            self.memory.stt
                + self.memory.ta
                + self.memory.qa
                + self.memory.common
                + self.memory.gpu_host,
            self.memory.total,
        )?;
        check_sum(
            "storage",
            self.storage.system + self.storage.stateful,
            self.storage.total,
        )
    }

    /// Number of logical server roles this requirement needs
    pub fn logical_servers(&self) -> u64 {
        [
            self.gpu.total > 0,
            self.cpu.processing() > 0,
            self.cpu.common > 0,
        ]
        .iter()
        .filter(|present| **present)
        .count() as u64
    }
}

fn check_sum(resource: &str, breakdown: u64, total: u64) -> Result<(), CapacityComputationError> {
    if breakdown != total {
        return Err(CapacityComputationError::BreakdownMismatch {
            resource: resource.to_string(),
            breakdown,
            total,
        });
    }
    Ok(())
}

/// Reject negative or non-finite intermediates instead of clamping them
fn checked(quantity: &str, value: f64) -> Result<f64, CapacityComputationError> {
    if !value.is_finite() || value < 0.0 {
        return Err(CapacityComputationError::InvalidDerived {
            quantity: quantity.to_string(),
            value,
        });
    }
    Ok(value)
}

/// NLP/AICM demand multiplier by channel tier
pub fn scale_multiplier(total_channels: u64) -> f64 {
    if total_channels <= MEDIUM_CHANNEL_TIER {
        1.0
    } else if total_channels <= LARGE_CHANNEL_TIER {
        1.5
    } else {
        2.5
    }
}

/// Stateless calculator bound to a load profile
#[derive(Debug, Clone, Default)]
pub struct ResourceCalculator {
    profile: LoadProfile,
}

impl ResourceCalculator {
    pub fn new(profile: LoadProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &LoadProfile {
        &self.profile
    }

    /// Stage 1: NLP + AICM units against the cheapest tier
    pub fn estimate_raw_units(&self, load: &ServiceLoad) -> Result<u64, CapacityComputationError> {
        let gpu = self.compute_gpu_units(load, GpuTier::cheapest())?;
        Ok(gpu.nlp + gpu.aicm)
    }

    /// Stage 3: GPU units for a given tier
    pub fn compute_gpu_units(
        &self,
        load: &ServiceLoad,
        tier: GpuTier,
    ) -> Result<GpuBreakdown, CapacityComputationError> {
        let spec = tier.spec();
        let multiplier = scale_multiplier(load.total_channels);

        let tts = checked(
            "tts_gpu",
            load.totals.tts_channels as f64 / spec.tts_capacity as f64,
        )?;
        let nlp_qps = ServiceLoad::qps(load.totals.nlp_daily_queries, &self.profile);
        let aicm_qps = ServiceLoad::qps(load.totals.aicm_daily_queries, &self.profile);
        let nlp = checked("nlp_gpu", nlp_qps * multiplier / spec.nlp_qps)?;
        let aicm = checked("aicm_gpu", aicm_qps * multiplier / spec.aicm_qps)?;

        Ok(GpuBreakdown::new(
            ceil_units(tts),
            ceil_units(nlp),
            ceil_units(aicm),
        ))
    }

    /// CPU cores per service
    pub fn compute_cpu(&self, load: &ServiceLoad) -> Result<CpuBreakdown, CapacityComputationError> {
        let c = &self.profile.compute;
        let stt = checked(
            "stt_cores",
            load.totals.stt_channels as f64 / c.stt_channels_per_core,
        )?;
        let ta_naive = checked(
            "ta_naive_cores",
            load.totals.ta_batch_volume as f64 / c.ta_docs_per_core_daily,
        )?;
        let ta = checked(
            "ta_cores",
            ta_naive * c.ta_batch_factor * c.ta_idle_utilization,
        )?;
        let qa = checked(
            "qa_cores",
            load.totals.qa_channels as f64 * c.qa_concurrency / c.qa_queries_per_core,
        )?;
        let common = if load.total_users > 0 { c.common_cores } else { 0 };

        let stt = ceil_units(stt);
        let ta = ceil_units(ta);
        let qa = ceil_units(qa);
        Ok(CpuBreakdown {
            stt,
            ta,
            qa,
            common,
            total: stt + ta + qa + common,
        })
    }

    /// Host RAM per GPU unit, scaled by workload intensity
    pub fn gpu_ram_per_unit(
        &self,
        load: &ServiceLoad,
        tier: GpuTier,
    ) -> Result<u64, CapacityComputationError> {
        let spec = tier.spec();
        let intensity = [
            load.totals.tts_channels as f64 / INTENSITY_TTS_CHANNELS,
            load.totals.nlp_daily_queries as f64 / INTENSITY_NLP_DAILY,
            load.totals.aicm_daily_queries as f64 / INTENSITY_AICM_DAILY,
        ]
        .iter()
        .map(|v| v.min(1.0))
        .sum::<f64>()
            / 3.0;

        let max_multiplier = spec.ram_ceiling_gb as f64 / spec.base_ram_gb as f64;
        let multiplier = checked(
            "gpu_ram_multiplier",
            MIN_RAM_MULTIPLIER + INTENSITY_WEIGHT * intensity * (max_multiplier - MIN_RAM_MULTIPLIER),
        )?
        .clamp(MIN_RAM_MULTIPLIER, max_multiplier.max(MIN_RAM_MULTIPLIER));

        let ram = ceil_units(spec.base_ram_gb as f64 * multiplier);
        Ok(ram.min(self.profile.compute.gpu_ram_hard_ceiling_gb))
    }

    fn compute_memory(&self, cpu: &CpuBreakdown, gpu: &GpuBreakdown, gpu_ram: u64) -> MemoryBreakdown {
        let c = &self.profile.compute;
        let stt = cpu.stt * c.memory_per_core_gb;
        let ta = cpu.ta * c.memory_per_core_gb;
        let qa = cpu.qa * c.memory_per_core_gb;
        let common = if cpu.common > 0 { c.common_memory_gb } else { 0 };
        let gpu_host = gpu.total * gpu_ram;
        MemoryBreakdown {
            stt,
            ta,
            qa,
            common,
            gpu_host,
            total: stt + ta + qa + common + gpu_host,
        }
    }

    fn compute_storage(&self, logical_servers: u64, users: u64) -> StorageBreakdown {
        let c = &self.profile.compute;
        let system = logical_servers * c.storage_per_server_gb;
        let stateful = if users > 0 {
            (users * c.stateful_storage_per_user_gb).max(c.stateful_storage_floor_gb)
        } else {
            0
        };
        StorageBreakdown {
            system,
            stateful,
            total: system + stateful,
        }
    }

    /// Compute the full resource requirement for a tenant ask
    pub fn calculate(
        &self,
        requirement: &ServiceRequirement,
        selection: GpuSelection,
    ) -> Result<ResourceRequirement, CapacityComputationError> {
        let load = analyze(requirement, &self.profile)?;
        self.calculate_for_load(load, selection)
    }

    /// Compute the resource requirement from an analyzed load
    pub fn calculate_for_load(
        &self,
        load: ServiceLoad,
        selection: GpuSelection,
    ) -> Result<ResourceRequirement, CapacityComputationError> {
        let raw_gpu_units = self.estimate_raw_units(&load)?;
        let (gpu_tier, tier_auto_selected) = match selection {
            GpuSelection::Auto => (select_tier(load.total_channels, raw_gpu_units), true),
            GpuSelection::Fixed(tier) => (tier, false),
        };
        let gpu = self.compute_gpu_units(&load, gpu_tier)?;
        let gpu_ram_per_unit_gb = self.gpu_ram_per_unit(&load, gpu_tier)?;
        let cpu = self.compute_cpu(&load)?;
        let memory = self.compute_memory(&cpu, &gpu, gpu_ram_per_unit_gb);

        let mut requirement = ResourceRequirement {
            gpu_tier,
            tier_auto_selected,
            scale_multiplier: scale_multiplier(load.total_channels),
            raw_gpu_units,
            gpu,
            gpu_ram_per_unit_gb,
            cpu,
            memory,
            storage: StorageBreakdown::default(),
            load,
        };
        requirement.storage =
            self.compute_storage(requirement.logical_servers(), requirement.load.total_users);
        requirement.verify_totals()?;

        debug!(
            tier = gpu_tier.key(),
            raw_gpu_units,
            gpus = requirement.gpu.total,
            cores = requirement.cpu.total,
            "Computed resource requirement"
        );
        Ok(requirement)
    }
}
