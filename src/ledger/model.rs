//! Ledger records

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a built image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageStatus {
    Building,
    Ready,
    Deployed,
    Failed,
    Deprecated,
}

impl ImageStatus {
    /// Whether `self -> next` is allowed
    ///
    /// DEPRECATED and FAILED images may only be DEPLOYED again as the start of
    /// a new deployment cycle.
    pub fn can_transition_to(self, next: ImageStatus, new_cycle: bool) -> bool {
        use ImageStatus::*;
        match (self, next) {
            (a, b) if a == b => true,
            (_, Failed) => true,
            (Building, Ready) => true,
            (Ready, Deployed) => true,
            (Ready | Deployed, Deprecated) => true,
            (Deprecated | Failed, Deployed) => new_cycle,
            _ => false,
        }
    }

    /// Usable as a deployment source
    pub fn is_deployable(self) -> bool {
        matches!(self, ImageStatus::Ready | ImageStatus::Deployed)
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImageStatus::Building => "BUILDING",
            ImageStatus::Ready => "READY",
            ImageStatus::Deployed => "DEPLOYED",
            ImageStatus::Failed => "FAILED",
            ImageStatus::Deprecated => "DEPRECATED",
        };
        f.write_str(s)
    }
}

impl FromStr for ImageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUILDING" => Ok(ImageStatus::Building),
            "READY" => Ok(ImageStatus::Ready),
            "DEPLOYED" => Ok(ImageStatus::Deployed),
            "FAILED" => Ok(ImageStatus::Failed),
            "DEPRECATED" => Ok(ImageStatus::Deprecated),
            other => Err(format!("unknown image status '{}'", other)),
        }
    }
}

/// One snapshot of an image version; the latest snapshot wins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageVersion {
    pub id: Uuid,
    pub service: String,
    pub version: String,
    /// Full image reference
    pub image: String,
    pub status: ImageStatus,
    /// Content digest when the reference is pinned (`sha256:...`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(rename = "gitCommit")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
    #[serde(rename = "recordedAt")]
    pub recorded_at: DateTime<Utc>,
}

/// Outcome of one deployment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Pending,
    Success,
    Failed,
    RolledBack,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentStatus::Pending => "PENDING",
            DeploymentStatus::Success => "SUCCESS",
            DeploymentStatus::Failed => "FAILED",
            DeploymentStatus::RolledBack => "ROLLED_BACK",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: Uuid,
    #[serde(rename = "tenantId")]
    pub tenant_id: String,
    #[serde(default)]
    pub namespace: String,
    pub service: String,
    pub image: String,
    pub version: String,
    /// Ledger image this deployment rolled out, when it was recorded
    #[serde(rename = "imageVersionId")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_version_id: Option<Uuid>,
    pub status: DeploymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Record this one rolled back from
    #[serde(rename = "rolledBackFrom")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back_from: Option<Uuid>,
    #[serde(rename = "recordedAt")]
    pub recorded_at: DateTime<Utc>,
}

/// One line of the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEntry {
    Image(ImageVersion),
    Deployment(DeploymentRecord),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ImageStatus::*;

    #[test]
    fn test_forward_transitions() {
        assert!(Building.can_transition_to(Ready, false));
        assert!(Ready.can_transition_to(Deployed, false));
        assert!(Deployed.can_transition_to(Deprecated, false));
        assert!(Ready.can_transition_to(Deprecated, false));
        assert!(Building.can_transition_to(Failed, false));
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!Building.can_transition_to(Deployed, false));
        assert!(!Deployed.can_transition_to(Ready, false));
        assert!(!Building.can_transition_to(Deprecated, false));
        assert!(!Failed.can_transition_to(Ready, true));
    }

    #[test]
    fn test_redeploy_requires_new_cycle() {
        assert!(!Deprecated.can_transition_to(Deployed, false));
        assert!(Deprecated.can_transition_to(Deployed, true));
        assert!(!Failed.can_transition_to(Deployed, false));
        assert!(Failed.can_transition_to(Deployed, true));
    }

    #[test]
    fn test_entry_is_tagged() {
        let record = DeploymentRecord {
            id: Uuid::nil(),
            tenant_id: "acme".into(),
            namespace: "tenant-acme".into(),
            service: "nlp".into(),
            image: "r/nlp:1".into(),
            version: "1".into(),
            image_version_id: None,
            status: DeploymentStatus::RolledBack,
            reason: None,
            rolled_back_from: None,
            recorded_at: Utc.timestamp_opt(0, 0).unwrap(),
        };
        let line = serde_json::to_string(&LedgerEntry::Deployment(record)).unwrap();
        assert!(line.starts_with(r#"{"type":"deployment""#));
        assert!(line.contains(r#""status":"ROLLED_BACK""#));
    }
}
