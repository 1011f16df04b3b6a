//! GPU tier catalog and tier selection
//!
//! Tier choice is a pure function of `(total_channels, raw_gpu_units)`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Channel count at or below which the cheapest tier is always used
pub const SMALL_TENANT_CHANNELS: u64 = 100;

/// Raw unit thresholds for auto selection
pub const TIER1_MAX_RAW_UNITS: u64 = 2;
pub const TIER2_MAX_RAW_UNITS: u64 = 8;

/// A fixed GPU hardware class
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuTier {
    Tier1,
    Tier2,
    Tier3,
}

/// Per-unit capacity and RAM envelope of a tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GpuTierSpec {
    /// Accelerator model, also used as node selector value
    pub model: &'static str,
    pub vram_gb: u64,
    /// TTS channels one GPU serves
    pub tts_capacity: u64,
    /// NLP queries per second one GPU serves
    pub nlp_qps: f64,
    /// AICM queries per second one GPU serves
    pub aicm_qps: f64,
    /// Host RAM per GPU before workload scaling (GB)
    pub base_ram_gb: u64,
    /// Host RAM per GPU ceiling for this tier (GB)
    pub ram_ceiling_gb: u64,
}

impl GpuTier {
    pub const ALL: [GpuTier; 3] = [GpuTier::Tier1, GpuTier::Tier2, GpuTier::Tier3];

    /// The cheapest tier
    pub fn cheapest() -> Self {
        GpuTier::Tier1
    }

    pub fn key(&self) -> &'static str {
        match self {
            GpuTier::Tier1 => "tier1",
            GpuTier::Tier2 => "tier2",
            GpuTier::Tier3 => "tier3",
        }
    }

    pub fn spec(&self) -> GpuTierSpec {
        match self {
            GpuTier::Tier1 => GpuTierSpec {
                model: "nvidia-t4",
                vram_gb: 16,
                tts_capacity: 50,
                nlp_qps: 150.0,
                aicm_qps: 100.0,
                base_ram_gb: 16,
                ram_ceiling_gb: 32,
            },
            GpuTier::Tier2 => GpuTierSpec {
                model: "nvidia-a10g",
                vram_gb: 24,
                tts_capacity: 100,
                nlp_qps: 300.0,
                aicm_qps: 200.0,
                base_ram_gb: 24,
                ram_ceiling_gb: 48,
            },
            GpuTier::Tier3 => GpuTierSpec {
                model: "nvidia-a100",
                vram_gb: 80,
                tts_capacity: 250,
                nlp_qps: 800.0,
                aicm_qps: 500.0,
                base_ram_gb: 40,
                ram_ceiling_gb: 80,
            },
        }
    }
}

impl fmt::Display for GpuTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.key(), self.spec().model)
    }
}

/// Select a tier from total channels and raw (default-tier) GPU units
pub fn select_tier(total_channels: u64, raw_gpu_units: u64) -> GpuTier {
    if total_channels <= SMALL_TENANT_CHANNELS {
        return GpuTier::cheapest();
    }
    if raw_gpu_units <= TIER1_MAX_RAW_UNITS {
        GpuTier::Tier1
    } else if raw_gpu_units <= TIER2_MAX_RAW_UNITS {
        GpuTier::Tier2
    } else {
        GpuTier::Tier3
    }
}
