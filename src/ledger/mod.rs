//! # Image version ledger
//!
//! Append-only history of built images and deployment attempts. Nothing is
//! ever rewritten: a status change appends a new snapshot and the latest
//! snapshot wins. Rollback decisions read from here.

pub mod model;
pub mod store;

pub use model::{DeploymentRecord, DeploymentStatus, ImageStatus, ImageVersion, LedgerEntry};
pub use store::{JsonlLedgerStore, LedgerStore, MemoryLedgerStore};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::capacity::tenant_namespace;
use crate::clock::{Clock, SystemClock};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize ledger entry: {0}")]
    Serialize(String),

    #[error("Corrupt ledger entry at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("Image {service}:{version} is not recorded")]
    UnknownImage { service: String, version: String },

    #[error("Image {service}:{version} is already recorded")]
    DuplicateImage { service: String, version: String },

    #[error("Image {service}:{version} cannot move from {from} to {to}")]
    InvalidTransition {
        service: String,
        version: String,
        from: ImageStatus,
        to: ImageStatus,
    },
}

/// Query and append facade over a [`LedgerStore`]
pub struct ImageVersionLedger {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    writer: Mutex<()>,
}

impl ImageVersionLedger {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            writer: Mutex::new(()),
        }
    }

    /// In-memory ledger on the system clock
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryLedgerStore::new()), Arc::new(SystemClock))
    }

    async fn images(&self) -> Result<Vec<ImageVersion>, LedgerError> {
        Ok(self
            .store
            .entries()
            .await?
            .into_iter()
            .filter_map(|e| match e {
                LedgerEntry::Image(image) => Some(image),
                LedgerEntry::Deployment(_) => None,
            })
            .collect())
    }

    async fn deployments(&self) -> Result<Vec<DeploymentRecord>, LedgerError> {
        Ok(self
            .store
            .entries()
            .await?
            .into_iter()
            .filter_map(|e| match e {
                LedgerEntry::Deployment(record) => Some(record),
                LedgerEntry::Image(_) => None,
            })
            .collect())
    }

    /// Current snapshot of one image version
    pub async fn image(&self, service: &str, version: &str) -> Result<Option<ImageVersion>, LedgerError> {
        Ok(self
            .images()
            .await?
            .into_iter()
            .filter(|i| i.service == service && i.version == version)
            .last())
    }

    /// Record a newly built image, as BUILDING or READY
    pub async fn record_image(
        &self,
        service: &str,
        version: &str,
        image: &str,
        status: ImageStatus,
        git_commit: Option<String>,
    ) -> Result<ImageVersion, LedgerError> {
        if !matches!(status, ImageStatus::Building | ImageStatus::Ready) {
            return Err(LedgerError::InvalidTransition {
                service: service.to_string(),
                version: version.to_string(),
                from: ImageStatus::Building,
                to: status,
            });
        }

        let _guard = self.writer.lock().await;
        if self.image(service, version).await?.is_some() {
            return Err(LedgerError::DuplicateImage {
                service: service.to_string(),
                version: version.to_string(),
            });
        }
        let record = ImageVersion {
            id: Uuid::new_v4(),
            service: service.to_string(),
            version: version.to_string(),
            image: image.to_string(),
            status,
            digest: crate::manifest::image_digest(image).map(str::to_string),
            git_commit,
            recorded_at: self.clock.now(),
        };
        self.store.append(&LedgerEntry::Image(record.clone())).await?;
        info!(service, version, %status, "Recorded image");
        Ok(record)
    }

    /// Move an image to another status, validating the transition
    pub async fn set_image_status(
        &self,
        service: &str,
        version: &str,
        status: ImageStatus,
        new_cycle: bool,
    ) -> Result<ImageVersion, LedgerError> {
        let _guard = self.writer.lock().await;
        let current = self
            .image(service, version)
            .await?
            .ok_or_else(|| LedgerError::UnknownImage {
                service: service.to_string(),
                version: version.to_string(),
            })?;

        if !current.status.can_transition_to(status, new_cycle) {
            return Err(LedgerError::InvalidTransition {
                service: service.to_string(),
                version: version.to_string(),
                from: current.status,
                to: status,
            });
        }
        if current.status == status {
            return Ok(current);
        }

        let snapshot = ImageVersion {
            status,
            recorded_at: self.clock.now(),
            ..current
        };
        self.store.append(&LedgerEntry::Image(snapshot.clone())).await?;
        debug!(service, version, %status, "Image status changed");
        Ok(snapshot)
    }

    /// Latest `n` versions of a service, newest first, at their current status
    pub async fn latest_versions(&self, service: &str, n: usize) -> Result<Vec<ImageVersion>, LedgerError> {
        // first appearance fixes the ordering, later snapshots update the status
        let mut order: Vec<String> = Vec::new();
        let mut current: HashMap<String, ImageVersion> = HashMap::new();
        for image in self.images().await?.into_iter().filter(|i| i.service == service) {
            if !current.contains_key(&image.version) {
                order.push(image.version.clone());
            }
            current.insert(image.version.clone(), image);
        }
        Ok(order
            .iter()
            .rev()
            .filter_map(|v| current.remove(v))
            .take(n)
            .collect())
    }

    /// Newest version that can be deployed (READY or DEPLOYED)
    pub async fn latest_deployable(&self, service: &str) -> Result<Option<ImageVersion>, LedgerError> {
        Ok(self
            .latest_versions(service, usize::MAX)
            .await?
            .into_iter()
            .find(|i| i.status.is_deployable()))
    }

    /// Append a deployment attempt
    pub async fn record_deployment(
        &self,
        tenant_id: &str,
        service: &str,
        image: &str,
        status: DeploymentStatus,
        reason: Option<String>,
    ) -> Result<DeploymentRecord, LedgerError> {
        self.append_deployment(tenant_id, service, image, status, reason, None)
            .await
    }

    /// Append a ROLLED_BACK record pointing at the failed record
    pub async fn record_rollback(
        &self,
        failed: &DeploymentRecord,
        target: &DeploymentRecord,
        reason: String,
    ) -> Result<DeploymentRecord, LedgerError> {
        self.append_deployment(
            &failed.tenant_id,
            &failed.service,
            &target.image,
            DeploymentStatus::RolledBack,
            Some(reason),
            Some(failed.id),
        )
        .await
    }

    async fn append_deployment(
        &self,
        tenant_id: &str,
        service: &str,
        image: &str,
        status: DeploymentStatus,
        reason: Option<String>,
        rolled_back_from: Option<Uuid>,
    ) -> Result<DeploymentRecord, LedgerError> {
        let image_version_id = self
            .images()
            .await?
            .into_iter()
            .rev()
            .find(|i| i.service == service && i.image == image)
            .map(|i| i.id);
        let record = DeploymentRecord {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            namespace: tenant_namespace(tenant_id),
            service: service.to_string(),
            image: image.to_string(),
            version: crate::manifest::image_tag(image).to_string(),
            image_version_id,
            status,
            reason,
            rolled_back_from,
            recorded_at: self.clock.now(),
        };
        let _guard = self.writer.lock().await;
        self.store
            .append(&LedgerEntry::Deployment(record.clone()))
            .await?;
        debug!(tenant = tenant_id, service, %status, image, "Recorded deployment");
        Ok(record)
    }

    /// All deployment records of a (tenant, service), oldest first
    pub async fn deployment_history(
        &self,
        tenant_id: &str,
        service: &str,
    ) -> Result<Vec<DeploymentRecord>, LedgerError> {
        Ok(self
            .deployments()
            .await?
            .into_iter()
            .filter(|d| d.tenant_id == tenant_id && d.service == service)
            .collect())
    }

    /// Deployment records of a tenant across all services, oldest first
    pub async fn tenant_history(&self, tenant_id: &str) -> Result<Vec<DeploymentRecord>, LedgerError> {
        Ok(self
            .deployments()
            .await?
            .into_iter()
            .filter(|d| d.tenant_id == tenant_id)
            .collect())
    }

    /// What should be running: the latest SUCCESS or ROLLED_BACK record
    pub async fn current_deployment(
        &self,
        tenant_id: &str,
        service: &str,
    ) -> Result<Option<DeploymentRecord>, LedgerError> {
        Ok(self
            .deployment_history(tenant_id, service)
            .await?
            .into_iter()
            .rev()
            .find(|d| {
                matches!(
                    d.status,
                    DeploymentStatus::Success | DeploymentStatus::RolledBack
                )
            }))
    }

    /// Latest SUCCESS recorded strictly before `before`, never `excluding`
    pub async fn rollback_candidate(
        &self,
        tenant_id: &str,
        service: &str,
        before: DateTime<Utc>,
        excluding: Option<Uuid>,
    ) -> Result<Option<DeploymentRecord>, LedgerError> {
        Ok(self
            .deployment_history(tenant_id, service)
            .await?
            .into_iter()
            .rev()
            .find(|d| {
                d.status == DeploymentStatus::Success
                    && d.recorded_at < before
                    && Some(d.id) != excluding
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone};

    fn ledger() -> (Arc<ManualClock>, ImageVersionLedger) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap(),
        ));
        let ledger = ImageVersionLedger::new(Arc::new(MemoryLedgerStore::new()), clock.clone());
        (clock, ledger)
    }

    #[tokio::test]
    async fn test_latest_versions_newest_first() {
        let (clock, ledger) = ledger();
        for v in ["1.0", "1.1", "1.2"] {
            ledger
                .record_image("nlp", v, &format!("r/nlp:{}", v), ImageStatus::Ready, None)
                .await
                .unwrap();
            clock.advance(Duration::minutes(1));
        }
        ledger
            .set_image_status("nlp", "1.0", ImageStatus::Deprecated, false)
            .await
            .unwrap();

        let latest = ledger.latest_versions("nlp", 2).await.unwrap();
        let versions: Vec<_> = latest.iter().map(|i| i.version.as_str()).collect();
        assert_eq!(versions, vec!["1.2", "1.1"]);

        let all = ledger.latest_versions("nlp", 10).await.unwrap();
        assert_eq!(all[2].status, ImageStatus::Deprecated);
        assert!(ledger.latest_versions("tts", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_transition_rejected() {
        let (_, ledger) = ledger();
        ledger
            .record_image("tts", "2.0", "r/tts:2.0", ImageStatus::Building, None)
            .await
            .unwrap();
        let err = ledger
            .set_image_status("tts", "2.0", ImageStatus::Deployed, false)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));

        let missing = ledger
            .set_image_status("tts", "9.9", ImageStatus::Ready, false)
            .await
            .unwrap_err();
        assert!(matches!(missing, LedgerError::UnknownImage { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_image_rejected() {
        let (_, ledger) = ledger();
        ledger
            .record_image("stt", "1", "r/stt:1", ImageStatus::Ready, None)
            .await
            .unwrap();
        let err = ledger
            .record_image("stt", "1", "r/stt:1", ImageStatus::Ready, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateImage { .. }));
    }

    #[tokio::test]
    async fn test_latest_deployable_skips_building() {
        let (clock, ledger) = ledger();
        ledger
            .record_image("nlp", "1.0", "r/nlp:1.0", ImageStatus::Ready, None)
            .await
            .unwrap();
        clock.advance(Duration::minutes(1));
        ledger
            .record_image("nlp", "1.1", "r/nlp:1.1", ImageStatus::Building, None)
            .await
            .unwrap();
        let image = ledger.latest_deployable("nlp").await.unwrap().unwrap();
        assert_eq!(image.version, "1.0");
    }

    #[tokio::test]
    async fn test_rollback_candidate_selection() {
        let (clock, ledger) = ledger();
        let v1 = ledger
            .record_deployment("acme", "nlp", "r/nlp:1.0", DeploymentStatus::Success, None)
            .await
            .unwrap();
        clock.advance(Duration::minutes(10));
        ledger
            .record_deployment("acme", "nlp", "r/nlp:1.1", DeploymentStatus::Failed, None)
            .await
            .unwrap();
        clock.advance(Duration::minutes(10));
        let v2 = ledger
            .record_deployment("acme", "nlp", "r/nlp:1.2", DeploymentStatus::Success, None)
            .await
            .unwrap();

        // the failing record itself is never a candidate
        let candidate = ledger
            .rollback_candidate("acme", "nlp", clock.now() + Duration::seconds(1), Some(v2.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(candidate.id, v1.id);

        let none = ledger
            .rollback_candidate("acme", "nlp", v1.recorded_at, None)
            .await
            .unwrap();
        assert!(none.is_none());

        let current = ledger.current_deployment("acme", "nlp").await.unwrap().unwrap();
        assert_eq!(current.version, "1.2");
    }

    #[tokio::test]
    async fn test_rollback_becomes_current() {
        let (clock, ledger) = ledger();
        let good = ledger
            .record_deployment("acme", "tts", "r/tts:1", DeploymentStatus::Success, None)
            .await
            .unwrap();
        clock.advance(Duration::minutes(5));
        let bad = ledger
            .record_deployment("acme", "tts", "r/tts:2", DeploymentStatus::Success, None)
            .await
            .unwrap();
        clock.advance(Duration::minutes(5));
        let rolled = ledger
            .record_rollback(&bad, &good, "critical health".to_string())
            .await
            .unwrap();
        assert_eq!(rolled.rolled_back_from, Some(bad.id));
        let current = ledger.current_deployment("acme", "tts").await.unwrap().unwrap();
        assert_eq!(current.status, DeploymentStatus::RolledBack);
        assert_eq!(current.image, "r/tts:1");
        assert_eq!(ledger.deployment_history("acme", "tts").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_records_carry_namespace_digest_and_image_reference() {
        let (clock, ledger) = ledger();
        let pinned = "r/nlp:1.0@sha256:4f2a";
        let image = ledger
            .record_image("nlp", "1.0", pinned, ImageStatus::Ready, None)
            .await
            .unwrap();
        assert_eq!(image.digest.as_deref(), Some("sha256:4f2a"));
        clock.advance(Duration::minutes(1));

        let deployed = ledger
            .record_deployment("acme", "nlp", pinned, DeploymentStatus::Success, None)
            .await
            .unwrap();
        assert_eq!(deployed.namespace, "tenant-acme");
        assert_eq!(deployed.image_version_id, Some(image.id));

        let unknown = ledger
            .record_deployment("acme", "nlp", "r/nlp:9.9", DeploymentStatus::Failed, None)
            .await
            .unwrap();
        assert_eq!(unknown.image_version_id, None);
        assert!(ledger.image("nlp", "1.0").await.unwrap().unwrap().digest.is_some());
    }
}
