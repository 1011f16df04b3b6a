//! Service load analysis
//!
//! Converts tenant-facing service counts (how many callbots, chatbots, ...)
//! into processing volumes: concurrent speech channels and daily query counts.
//! Pure and side-effect free; all weights come from a [`LoadProfile`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::profile::{LoadProfile, ServiceWeights};
use crate::error::{CapacityComputationError, ValidationError};

/// Largest unit count accepted for a single service type
pub const MAX_SERVICE_COUNT: u64 = 1_000_000;

/// Tenant-facing service types
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// Voice bot: STT + TTS + NLP
    Callbot,
    /// Text-only bot
    Chatbot,
    /// Agent assist: transcribes both call legs
    Advisor,
    /// Standalone speech-to-text channel
    Stt,
    /// Standalone text-to-speech channel
    Tts,
    /// Text analytics over transcripts (batch)
    Ta,
    /// Quality assurance evaluation (batch)
    Qa,
}

impl ServiceType {
    /// All service types in canonical order
    pub const ALL: [ServiceType; 7] = [
        ServiceType::Callbot,
        ServiceType::Chatbot,
        ServiceType::Advisor,
        ServiceType::Stt,
        ServiceType::Tts,
        ServiceType::Ta,
        ServiceType::Qa,
    ];

    /// Request key for this service type
    pub fn key(&self) -> &'static str {
        match self {
            ServiceType::Callbot => "callbot",
            ServiceType::Chatbot => "chatbot",
            ServiceType::Advisor => "advisor",
            ServiceType::Stt => "stt",
            ServiceType::Tts => "tts",
            ServiceType::Ta => "ta",
            ServiceType::Qa => "qa",
        }
    }

    /// Whether one unit of this service occupies a concurrent voice channel
    pub fn is_voice(&self) -> bool {
        matches!(
            self,
            ServiceType::Callbot | ServiceType::Advisor | ServiceType::Stt | ServiceType::Tts
        )
    }

    fn weights<'a>(&self, profile: &'a LoadProfile) -> &'a ServiceWeights {
        let table = &profile.weights;
        match self {
            ServiceType::Callbot => &table.callbot,
            ServiceType::Chatbot => &table.chatbot,
            ServiceType::Advisor => &table.advisor,
            ServiceType::Stt => &table.stt,
            ServiceType::Tts => &table.tts,
            ServiceType::Ta => &table.ta,
            ServiceType::Qa => &table.qa,
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ServiceType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceType::ALL
            .iter()
            .copied()
            .find(|t| t.key() == s)
            .ok_or_else(|| ValidationError::UnknownService(s.to_string()))
    }
}

/// Validated tenant ask: service type to unit count
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequirement {
    counts: BTreeMap<ServiceType, u64>,
}

impl ServiceRequirement {
    /// Build from typed pairs
    pub fn from_pairs(pairs: impl IntoIterator<Item = (ServiceType, u64)>) -> Self {
        let mut requirement = Self::default();
        for (service, count) in pairs {
            requirement.set(service, count);
        }
        requirement
    }

    /// Set the count for a service; zero counts are not stored
    pub fn set(&mut self, service: ServiceType, count: u64) {
        if count == 0 {
            self.counts.remove(&service);
        } else {
            self.counts.insert(service, count);
        }
    }

    /// Count for a service (zero when absent)
    pub fn count(&self, service: ServiceType) -> u64 {
        self.counts.get(&service).copied().unwrap_or(0)
    }

    /// Iterate non-zero entries in canonical order
    pub fn iter(&self) -> impl Iterator<Item = (ServiceType, u64)> + '_ {
        self.counts.iter().map(|(s, c)| (*s, *c))
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Concurrent voice channels (callbot + advisor + stt + tts units)
    pub fn total_channels(&self) -> u64 {
        self.iter()
            .filter(|(s, _)| s.is_voice())
            .fold(0, |acc, (_, c)| acc.saturating_add(c))
    }

    /// Total seats across all services
    pub fn total_users(&self) -> u64 {
        self.counts.values().fold(0, |acc, c| acc.saturating_add(*c))
    }
}

/// Processing volume attributable to one service type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceVolume {
    pub stt_channels: u64,
    pub tts_channels: u64,
    pub nlp_daily_queries: u64,
    pub aicm_daily_queries: u64,
    pub ta_batch_volume: u64,
    pub qa_batch_volume: u64,
    /// Channels whose calls are QA-evaluated
    pub qa_channels: u64,
}

fn mul(quantity: &str, weight: u64, count: u64) -> Result<u64, CapacityComputationError> {
    weight
        .checked_mul(count)
        .ok_or_else(|| CapacityComputationError::Overflow {
            quantity: quantity.to_string(),
        })
}

fn add(quantity: &str, a: u64, b: u64) -> Result<u64, CapacityComputationError> {
    a.checked_add(b)
        .ok_or_else(|| CapacityComputationError::Overflow {
            quantity: quantity.to_string(),
        })
}

impl ServiceVolume {
    fn scaled(weights: &ServiceWeights, count: u64) -> Result<Self, CapacityComputationError> {
        Ok(Self {
            stt_channels: mul("stt_channels", weights.stt_channels, count)?,
            tts_channels: mul("tts_channels", weights.tts_channels, count)?,
            nlp_daily_queries: mul("nlp_daily_queries", weights.nlp_daily, count)?,
            aicm_daily_queries: mul("aicm_daily_queries", weights.aicm_daily, count)?,
            ..Self::default()
        })
    }

    fn add(&mut self, other: &ServiceVolume) -> Result<(), CapacityComputationError> {
        self.stt_channels = add("stt_channels", self.stt_channels, other.stt_channels)?;
        self.tts_channels = add("tts_channels", self.tts_channels, other.tts_channels)?;
        self.nlp_daily_queries =
            add("nlp_daily_queries", self.nlp_daily_queries, other.nlp_daily_queries)?;
        self.aicm_daily_queries =
            add("aicm_daily_queries", self.aicm_daily_queries, other.aicm_daily_queries)?;
        self.ta_batch_volume = add("ta_batch_volume", self.ta_batch_volume, other.ta_batch_volume)?;
        self.qa_batch_volume = add("qa_batch_volume", self.qa_batch_volume, other.qa_batch_volume)?;
        self.qa_channels = add("qa_channels", self.qa_channels, other.qa_channels)?;
        Ok(())
    }
}

/// Aggregate processing volume plus per-service breakdown
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceLoad {
    /// Totals; always the sum of `breakdown`
    pub totals: ServiceVolume,
    pub breakdown: BTreeMap<ServiceType, ServiceVolume>,
    pub total_channels: u64,
    pub total_users: u64,
}

impl ServiceLoad {
    /// Convert a daily query count into queries per business-hour second
    pub fn qps(daily: u64, profile: &LoadProfile) -> f64 {
        daily as f64 / profile.business_seconds()
    }
}

/// Round a non-negative quantity up, tolerating float noise just above an integer
pub(crate) fn ceil_units(value: f64) -> u64 {
    if value <= 0.0 {
        return 0;
    }
    (value - 1e-9).ceil().max(0.0) as u64
}

/// Analyze a service requirement into processing volumes
///
/// Counts above [`MAX_SERVICE_COUNT`] are rejected so every derived
/// quantity downstream stays far from integer limits.
pub fn analyze(
    requirement: &ServiceRequirement,
    profile: &LoadProfile,
) -> Result<ServiceLoad, CapacityComputationError> {
    if let Some((service, count)) = requirement.iter().find(|(_, c)| *c > MAX_SERVICE_COUNT) {
        return Err(CapacityComputationError::CountOutOfRange {
            service: service.to_string(),
            count,
            max: MAX_SERVICE_COUNT,
        });
    }

    let mut breakdown = BTreeMap::new();

    for (service, count) in requirement.iter() {
        let weights = service.weights(profile);
        let volume = match service {
            // TA volume depends on everything else; handled below
            ServiceType::Ta => continue,
            ServiceType::Qa => ServiceVolume {
                qa_batch_volume: mul("qa_batch_volume", weights.batch_daily, count)?,
                qa_channels: count,
                ..ServiceVolume::scaled(weights, count)?
            },
            _ => ServiceVolume::scaled(weights, count)?,
        };
        breakdown.insert(service, volume);
    }

    let ta_count = requirement.count(ServiceType::Ta);
    if ta_count > 0 {
        let existing_nlp = breakdown
            .values()
            .try_fold(0u64, |acc, v| add("nlp_daily_queries", acc, v.nlp_daily_queries))?;
        let weights = ServiceType::Ta.weights(profile);
        let volume = ServiceVolume {
            ta_batch_volume: mul("ta_batch_volume", weights.batch_daily, ta_count)?,
            nlp_daily_queries: ceil_units(
                existing_nlp as f64 * profile.compute.ta_nlp_reanalysis,
            ),
            ..ServiceVolume::scaled(weights, ta_count)?
        };
        breakdown.insert(ServiceType::Ta, volume);
    }

    let mut totals = ServiceVolume::default();
    for volume in breakdown.values() {
        totals.add(volume)?;
    }

    Ok(ServiceLoad {
        totals,
        breakdown,
        total_channels: requirement.total_channels(),
        total_users: requirement.total_users(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(pairs: &[(ServiceType, u64)]) -> ServiceRequirement {
        ServiceRequirement::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn test_callbot_160_volumes() {
        let load = analyze(&req(&[(ServiceType::Callbot, 160)]), &LoadProfile::v1()).unwrap();
        assert_eq!(load.totals.stt_channels, 160);
        assert_eq!(load.totals.tts_channels, 160);
        assert_eq!(load.totals.nlp_daily_queries, 512_000);
        assert_eq!(load.totals.aicm_daily_queries, 76_800);
        assert_eq!(load.total_channels, 160);
    }

    #[test]
    fn test_chatbot_is_text_only() {
        let load = analyze(&req(&[(ServiceType::Chatbot, 100)]), &LoadProfile::v1()).unwrap();
        assert_eq!(load.totals.stt_channels, 0);
        assert_eq!(load.totals.tts_channels, 0);
        assert_eq!(load.totals.nlp_daily_queries, 28_800);
        assert_eq!(load.totals.aicm_daily_queries, 2_400);
        assert_eq!(load.total_channels, 0);
        assert_eq!(load.total_users, 100);
    }

    #[test]
    fn test_advisor_uses_two_stt_channels() {
        let load = analyze(&req(&[(ServiceType::Advisor, 10)]), &LoadProfile::v1()).unwrap();
        assert_eq!(load.totals.stt_channels, 20);
        assert_eq!(load.totals.tts_channels, 0);
        assert_eq!(load.totals.nlp_daily_queries, 24_000);
        assert_eq!(load.totals.aicm_daily_queries, 13_600);
    }

    #[test]
    fn test_ta_adds_thirty_percent_nlp() {
        let load = analyze(
            &req(&[(ServiceType::Callbot, 160), (ServiceType::Ta, 10)]),
            &LoadProfile::v1(),
        )
        .unwrap();
        let ta = load.breakdown[&ServiceType::Ta];
        assert_eq!(ta.nlp_daily_queries, 153_600);
        assert_eq!(ta.ta_batch_volume, 1_600);
        assert_eq!(load.totals.nlp_daily_queries, 512_000 + 153_600);
    }

    #[test]
    fn test_ta_alone_adds_no_nlp() {
        let load = analyze(&req(&[(ServiceType::Ta, 5)]), &LoadProfile::v1()).unwrap();
        assert_eq!(load.totals.nlp_daily_queries, 0);
        assert_eq!(load.totals.ta_batch_volume, 800);
    }

    #[test]
    fn test_totals_equal_breakdown_sum() {
        let load = analyze(
            &req(&[
                (ServiceType::Callbot, 37),
                (ServiceType::Chatbot, 11),
                (ServiceType::Advisor, 3),
                (ServiceType::Qa, 9),
                (ServiceType::Ta, 2),
            ]),
            &LoadProfile::v1(),
        )
        .unwrap();
        let nlp: u64 = load.breakdown.values().map(|v| v.nlp_daily_queries).sum();
        let stt: u64 = load.breakdown.values().map(|v| v.stt_channels).sum();
        assert_eq!(nlp, load.totals.nlp_daily_queries);
        assert_eq!(stt, load.totals.stt_channels);
        assert_eq!(load.totals.qa_channels, 9);
    }

    #[test]
    fn test_empty_requirement() {
        let load = analyze(&ServiceRequirement::default(), &LoadProfile::v1()).unwrap();
        assert_eq!(load.totals, ServiceVolume::default());
        assert!(load.breakdown.is_empty());
    }

    #[test]
    fn test_service_type_parse() {
        assert_eq!("qa".parse::<ServiceType>().unwrap(), ServiceType::Qa);
        assert!("QA".parse::<ServiceType>().is_err());
    }

    #[test]
    fn test_huge_count_is_rejected_not_overflowed() {
        let huge = req(&[(ServiceType::Callbot, u64::MAX)]);
        assert!(matches!(
            analyze(&huge, &LoadProfile::v1()),
            Err(CapacityComputationError::CountOutOfRange { count: u64::MAX, .. })
        ));

        let at_limit = req(&[(ServiceType::Callbot, MAX_SERVICE_COUNT), (ServiceType::Ta, 1)]);
        let load = analyze(&at_limit, &LoadProfile::v1()).unwrap();
        assert_eq!(load.totals.stt_channels, MAX_SERVICE_COUNT);
    }

    #[test]
    fn test_totals_saturate() {
        let huge = req(&[(ServiceType::Stt, u64::MAX), (ServiceType::Tts, u64::MAX)]);
        assert_eq!(huge.total_channels(), u64::MAX);
        assert_eq!(huge.total_users(), u64::MAX);
    }

    #[test]
    fn test_ceil_units_tolerates_float_noise() {
        assert_eq!(ceil_units(0.0), 0);
        assert_eq!(ceil_units(1.000_000_000_01), 1);
        assert_eq!(ceil_units(1.2), 2);
        assert_eq!(ceil_units(-3.0), 0);
    }
}
