//! Versioned load-modeling constants
//!
//! Every weight used by the service load analyzer and the CPU model lives here
//! so a deployment can pin a known profile version. The batch-efficiency
//! factors (TA/QA) are empirical and should be reviewed by a domain expert
//! before being changed; new values go into a new profile version.

use serde::{Deserialize, Serialize};

/// Identifier of the built-in profile
pub const DEFAULT_PROFILE_VERSION: &str = "v1";

/// Per-unit load contributed by one instance of a service type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServiceWeights {
    /// Concurrent speech-to-text channels per unit
    #[serde(default)]
    pub stt_channels: u64,
    /// Concurrent text-to-speech channels per unit
    #[serde(default)]
    pub tts_channels: u64,
    /// NLP queries per day per unit
    #[serde(default)]
    pub nlp_daily: u64,
    /// AICM (AI contact-center model) queries per day per unit
    #[serde(default)]
    pub aicm_daily: u64,
    /// Batch documents per day per unit (TA transcripts, QA evaluations)
    #[serde(default)]
    pub batch_daily: u64,
}

impl ServiceWeights {
    const fn zero() -> Self {
        Self {
            stt_channels: 0,
            tts_channels: 0,
            nlp_daily: 0,
            aicm_daily: 0,
            batch_daily: 0,
        }
    }
}

/// Weights for every service type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceWeightTable {
    pub callbot: ServiceWeights,
    pub chatbot: ServiceWeights,
    pub advisor: ServiceWeights,
    pub stt: ServiceWeights,
    pub tts: ServiceWeights,
    pub ta: ServiceWeights,
    pub qa: ServiceWeights,
}

/// CPU/memory/storage model constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeConstants {
    /// STT channels served by one CPU core
    pub stt_channels_per_core: f64,
    /// TA transcripts one core processes per day (naive, no batching)
    pub ta_docs_per_core_daily: f64,
    /// TA batch efficiency factor
    pub ta_batch_factor: f64,
    /// TA idle-utilization factor
    pub ta_idle_utilization: f64,
    /// Fraction of QA channels evaluated concurrently
    pub qa_concurrency: f64,
    /// Concurrent QA queries one core sustains
    pub qa_queries_per_core: f64,
    /// Fraction of NLP volume TA re-analysis adds
    pub ta_nlp_reanalysis: f64,
    /// Business hours the daily volume is spread over
    pub business_hours: f64,
    /// Cores reserved for gateway, database and monitoring
    pub common_cores: u64,
    /// Memory reserved for common services (GB)
    pub common_memory_gb: u64,
    /// Memory per processing core (GB)
    pub memory_per_core_gb: u64,
    /// Baseline storage per logical server (GB)
    pub storage_per_server_gb: u64,
    /// Floor for stateful storage (GB)
    pub stateful_storage_floor_gb: u64,
    /// Stateful storage growth per user (GB)
    pub stateful_storage_per_user_gb: u64,
    /// Hard cap on per-GPU host RAM (GB)
    pub gpu_ram_hard_ceiling_gb: u64,
}

/// A complete, versioned set of load-modeling constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadProfile {
    pub version: String,
    pub weights: ServiceWeightTable,
    pub compute: ComputeConstants,
}

impl LoadProfile {
    /// The built-in `v1` profile
    pub fn v1() -> Self {
        Self {
            version: DEFAULT_PROFILE_VERSION.to_string(),
            weights: ServiceWeightTable {
                // 160 calls/day x 20 turns, 3 NLP queries per turn
                callbot: ServiceWeights {
                    stt_channels: 1,
                    tts_channels: 1,
                    nlp_daily: 3200,
                    aicm_daily: 480,
                    ..ServiceWeights::zero()
                },
                chatbot: ServiceWeights {
                    nlp_daily: 288,
                    aicm_daily: 24,
                    ..ServiceWeights::zero()
                },
                // agent + customer legs
                advisor: ServiceWeights {
                    stt_channels: 2,
                    nlp_daily: 2400,
                    aicm_daily: 1360,
                    ..ServiceWeights::zero()
                },
                stt: ServiceWeights {
                    stt_channels: 1,
                    ..ServiceWeights::zero()
                },
                tts: ServiceWeights {
                    tts_channels: 1,
                    ..ServiceWeights::zero()
                },
                ta: ServiceWeights {
                    batch_daily: 160,
                    ..ServiceWeights::zero()
                },
                qa: ServiceWeights {
                    batch_daily: 160,
                    ..ServiceWeights::zero()
                },
            },
            compute: ComputeConstants {
                stt_channels_per_core: 6.5,
                ta_docs_per_core_daily: 900.0,
                ta_batch_factor: 0.3,
                ta_idle_utilization: 0.67,
                qa_concurrency: 0.2,
                qa_queries_per_core: 10.0,
                ta_nlp_reanalysis: 0.3,
                business_hours: 9.0,
                common_cores: 8,
                common_memory_gb: 32,
                memory_per_core_gb: 4,
                storage_per_server_gb: 500,
                stateful_storage_floor_gb: 1024,
                stateful_storage_per_user_gb: 2,
                gpu_ram_hard_ceiling_gb: 80,
            },
        }
    }

    /// Seconds of business time per day used to convert daily volume to QPS
    pub fn business_seconds(&self) -> f64 {
        self.compute.business_hours * 3600.0
    }
}

impl Default for LoadProfile {
    fn default() -> Self {
        Self::v1()
    }
}
