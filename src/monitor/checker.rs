//! Deployment health monitor
//!
//! One cycle lists managed namespaces and checks them concurrently, each
//! under its own timeout, so a slow or failing namespace never blocks the
//! others. Observations land in a TTL-bounded metrics cache.
//!
//! Auto-rollback is off by default. When on, a CRITICAL deployment is rolled
//! back to the latest earlier SUCCESS recorded in the ledger. A per
//! (tenant, service) marker with a TTL keeps rollbacks from stacking while
//! the previous one is still coming up.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::health::{classify_health, DeploymentMetrics, Health, HealthCounts, HealthSummary};
use crate::capacity::spec::NAMESPACE_PREFIX;
use crate::clock::Clock;
use crate::cluster::{ApiError, ClusterOrchestrator, DeploymentState};
use crate::config::MonitorSettings;
use crate::error::ProvisionError;
use crate::ledger::{DeploymentRecord, ImageVersionLedger};

/// Owner tag written into rollback markers
pub fn instance_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{}-{}", host, std::process::id())
}

/// Claim on an in-progress rollback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackMarker {
    pub owner: String,
    #[serde(rename = "acquiredAt")]
    pub acquired_at: DateTime<Utc>,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
}

/// Outcome of one monitoring cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub namespaces: usize,
    pub deployments: usize,
    #[serde(rename = "failedNamespaces")]
    pub failed_namespaces: usize,
    pub rollbacks: usize,
    pub evicted: usize,
}

/// What a namespace check produced
#[derive(Default)]
struct NamespaceOutcome {
    deployments: usize,
    rollbacks: usize,
    failed: bool,
}

pub struct DeploymentHealthMonitor {
    orchestrator: Arc<ClusterOrchestrator>,
    ledger: Arc<ImageVersionLedger>,
    clock: Arc<dyn Clock>,
    settings: MonitorSettings,
    owner: String,
    metrics: DashMap<(String, String), DeploymentMetrics>,
    markers: DashMap<(String, String), RollbackMarker>,
    namespace_errors: DashMap<String, String>,
    last_cycle_at: RwLock<Option<DateTime<Utc>>>,
}

impl DeploymentHealthMonitor {
    pub fn new(
        orchestrator: Arc<ClusterOrchestrator>,
        ledger: Arc<ImageVersionLedger>,
        clock: Arc<dyn Clock>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            orchestrator,
            ledger,
            clock,
            settings,
            owner: instance_id(),
            metrics: DashMap::new(),
            markers: DashMap::new(),
            namespace_errors: DashMap::new(),
            last_cycle_at: RwLock::new(None),
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.settings.interval_secs.max(1))
    }

    fn metrics_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.settings.metrics_ttl_hours.min(24) as i64)
    }

    fn marker_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.settings.rollback_marker_ttl_secs as i64)
    }

    /// Check every managed namespace once
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let namespaces = match self.orchestrator.managed_namespaces().await {
            Ok(ns) => ns,
            Err(e) => {
                warn!(error = %e, "Failed to list managed namespaces");
                return report;
            }
        };
        report.namespaces = namespaces.len();

        let outcomes = join_all(namespaces.iter().map(|ns| self.check_namespace(ns))).await;
        for outcome in outcomes {
            report.deployments += outcome.deployments;
            report.rollbacks += outcome.rollbacks;
            if outcome.failed {
                report.failed_namespaces += 1;
            }
        }

        report.evicted = self.evict_expired();
        *self.last_cycle_at.write().await = Some(self.clock.now());

        debug!(
            namespaces = report.namespaces,
            deployments = report.deployments,
            failed = report.failed_namespaces,
            rollbacks = report.rollbacks,
            "Monitor cycle complete"
        );
        report
    }

    async fn check_namespace(&self, namespace: &str) -> NamespaceOutcome {
        let timeout = Duration::from_secs(self.settings.namespace_timeout_secs.max(1));

        let reason = match tokio::time::timeout(timeout, self.scan_namespace(namespace)).await {
            Ok(Ok(outcome)) => {
                self.namespace_errors.remove(namespace);
                return outcome;
            }
            Ok(Err(e)) => {
                warn!(namespace, error = %e, "Namespace check failed");
                e.to_string()
            }
            Err(_) => {
                warn!(namespace, timeout = ?timeout, "Namespace check timed out");
                format!("timed out after {:?}", timeout)
            }
        };
        self.namespace_errors.insert(namespace.to_string(), reason);
        NamespaceOutcome {
            failed: true,
            ..Default::default()
        }
    }

    /// List, observe and roll back within one namespace
    async fn scan_namespace(&self, namespace: &str) -> Result<NamespaceOutcome, ApiError> {
        let deployments = self.orchestrator.api().list_deployments(namespace).await?;

        let tenant_id = namespace
            .strip_prefix(NAMESPACE_PREFIX)
            .unwrap_or(namespace)
            .to_string();

        let mut outcome = NamespaceOutcome {
            deployments: deployments.len(),
            ..Default::default()
        };
        for deployment in &deployments {
            if self.observe(namespace, &tenant_id, deployment).await {
                outcome.rollbacks += 1;
            }
        }
        Ok(outcome)
    }

    /// Record one deployment; returns true if it was rolled back
    async fn observe(&self, namespace: &str, tenant_id: &str, deployment: &DeploymentState) -> bool {
        let health = classify_health(deployment.desired_replicas, deployment.ready_replicas);

        let current = match self
            .ledger
            .current_deployment(tenant_id, &deployment.name)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!(tenant = tenant_id, service = %deployment.name, error = %e, "Ledger read failed");
                None
            }
        };

        let expected_version = current.as_ref().map(|c| c.version.clone());
        let version_mismatch = expected_version
            .as_deref()
            .is_some_and(|v| v != deployment.running_tag());
        if version_mismatch {
            warn!(
                tenant = tenant_id,
                service = %deployment.name,
                expected = expected_version.as_deref().unwrap_or_default(),
                running = deployment.running_tag(),
                "Version drift detected"
            );
        }

        self.metrics.insert(
            (namespace.to_string(), deployment.name.clone()),
            DeploymentMetrics {
                tenant_id: tenant_id.to_string(),
                namespace: namespace.to_string(),
                service: deployment.name.clone(),
                desired: deployment.desired_replicas,
                available: deployment.available_replicas,
                ready: deployment.ready_replicas,
                updated: deployment.updated_replicas,
                health,
                image: deployment.image.clone(),
                expected_version,
                version_mismatch,
                observed_at: self.clock.now(),
            },
        );

        if health != Health::Critical {
            return false;
        }
        warn!(
            tenant = tenant_id,
            service = %deployment.name,
            ready = deployment.ready_replicas,
            desired = deployment.desired_replicas,
            "Deployment is CRITICAL"
        );
        if !self.settings.auto_rollback {
            return false;
        }
        match current {
            Some(failing) => self.try_rollback(&failing, deployment).await,
            None => {
                warn!(
                    tenant = tenant_id,
                    service = %deployment.name,
                    "No ledger record for deployment, rollback skipped"
                );
                false
            }
        }
    }

    /// Take the per-(tenant, service) marker unless a live one exists
    fn acquire_marker(&self, tenant_id: &str, service: &str) -> bool {
        let now = self.clock.now();
        let fresh = RollbackMarker {
            owner: self.owner.clone(),
            acquired_at: now,
            expires_at: now + self.marker_ttl(),
        };
        match self.markers.entry((tenant_id.to_string(), service.to_string())) {
            Entry::Occupied(mut held) => {
                if held.get().expires_at > now {
                    return false;
                }
                held.insert(fresh);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                true
            }
        }
    }

    fn release_marker(&self, tenant_id: &str, service: &str) {
        self.markers
            .remove(&(tenant_id.to_string(), service.to_string()));
    }

    async fn try_rollback(&self, failing: &DeploymentRecord, deployment: &DeploymentState) -> bool {
        let tenant_id = failing.tenant_id.as_str();
        let service = failing.service.as_str();

        if !self.acquire_marker(tenant_id, service) {
            debug!(tenant = tenant_id, service, "Rollback already in progress");
            return false;
        }

        let candidate = match self
            .ledger
            .rollback_candidate(tenant_id, service, failing.recorded_at, Some(failing.id))
            .await
        {
            Ok(c) => c,
            Err(e) => {
                error!(tenant = tenant_id, service, error = %e, "Ledger read failed");
                self.release_marker(tenant_id, service);
                return false;
            }
        };

        let Some(target) = candidate else {
            let unavailable = ProvisionError::RollbackUnavailable {
                tenant: tenant_id.to_string(),
                service: service.to_string(),
                before: failing.recorded_at,
            };
            warn!(error = %unavailable, "Rollback skipped");
            self.release_marker(tenant_id, service);
            return false;
        };

        info!(
            tenant = tenant_id,
            service,
            from = %failing.image,
            to = %target.image,
            "Rolling back"
        );
        if let Err(e) = self
            .orchestrator
            .rollout_image(tenant_id, service, &target.image)
            .await
        {
            error!(tenant = tenant_id, service, error = %e, "Rollback failed");
            self.release_marker(tenant_id, service);
            return false;
        }

        let reason = format!(
            "health CRITICAL ({}/{} ready) on {}",
            deployment.ready_replicas, deployment.desired_replicas, failing.image
        );
        if let Err(e) = self.ledger.record_rollback(failing, &target, reason).await {
            error!(tenant = tenant_id, service, error = %e, "Failed to record rollback");
        }
        true
    }

    /// Drop metrics older than the TTL; returns how many were dropped
    fn evict_expired(&self) -> usize {
        let cutoff = self.clock.now() - self.metrics_ttl();
        let before = self.metrics.len();
        self.metrics.retain(|_, m| m.observed_at >= cutoff);
        let now = self.clock.now();
        self.markers.retain(|_, marker| marker.expires_at > now);
        before - self.metrics.len()
    }

    /// Live rollback markers
    pub fn active_rollbacks(&self) -> Vec<((String, String), RollbackMarker)> {
        let now = self.clock.now();
        let mut markers: Vec<_> = self
            .markers
            .iter()
            .filter(|m| m.value().expires_at > now)
            .map(|m| (m.key().clone(), m.value().clone()))
            .collect();
        markers.sort_by(|a, b| a.0.cmp(&b.0));
        markers
    }

    pub fn metrics_for(&self, namespace: &str, service: &str) -> Option<DeploymentMetrics> {
        self.metrics
            .get(&(namespace.to_string(), service.to_string()))
            .map(|m| m.value().clone())
    }

    /// Counts by health plus per-deployment metrics
    pub async fn health_summary(&self) -> HealthSummary {
        let mut deployments: Vec<DeploymentMetrics> =
            self.metrics.iter().map(|m| m.value().clone()).collect();
        deployments.sort_by(|a, b| (&a.namespace, &a.service).cmp(&(&b.namespace, &b.service)));

        let mut counts = HealthCounts::default();
        for d in &deployments {
            counts.add(d.health);
        }

        let mut namespace_errors: Vec<(String, String)> = self
            .namespace_errors
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        namespace_errors.sort();

        HealthSummary {
            counts,
            deployments,
            namespace_errors,
            last_cycle_at: *self.last_cycle_at.read().await,
            generated_at: self.clock.now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::{Component, TenantPreset};
    use crate::clock::ManualClock;
    use crate::cluster::MemoryCluster;
    use crate::ledger::{DeploymentStatus, MemoryLedgerStore};
    use crate::manifest::ServiceConfig;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    struct Fixture {
        cluster: Arc<MemoryCluster>,
        orchestrator: Arc<ClusterOrchestrator>,
        ledger: Arc<ImageVersionLedger>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let cluster = MemoryCluster::shared();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap(),
        ));
        Fixture {
            orchestrator: Arc::new(ClusterOrchestrator::new(cluster.clone())),
            ledger: Arc::new(ImageVersionLedger::new(
                Arc::new(MemoryLedgerStore::new()),
                clock.clone(),
            )),
            cluster,
            clock,
        }
    }

    fn monitor(f: &Fixture, auto_rollback: bool) -> DeploymentHealthMonitor {
        let settings = MonitorSettings {
            auto_rollback,
            ..Default::default()
        };
        DeploymentHealthMonitor::new(
            f.orchestrator.clone(),
            f.ledger.clone(),
            f.clock.clone(),
            settings,
        )
        .with_owner("test-instance")
    }

    fn nlp(image: &str) -> ServiceConfig {
        ServiceConfig {
            component: Component::Nlp,
            image: image.to_string(),
            replicas: 2,
            cpu_millis: 4000,
            memory_mib: 16384,
            gpus: 1,
            gpu_model: Some("nvidia-t4".to_string()),
            port: 8000,
            pull_policy: "IfNotPresent".to_string(),
            autoscaling: None,
            vertical_scaling: false,
            labels: BTreeMap::new(),
        }
    }

    async fn deploy(f: &Fixture, image: &str) {
        f.orchestrator.deploy_service("acme", &nlp(image)).await.unwrap();
        f.ledger
            .record_deployment("acme", "nlp", image, DeploymentStatus::Success, None)
            .await
            .unwrap();
        f.clock.advance(chrono::Duration::minutes(5));
    }

    #[tokio::test]
    async fn test_cycle_classifies_deployments() {
        let f = fixture();
        f.orchestrator
            .create_namespace("acme", TenantPreset::Small)
            .await
            .unwrap();
        deploy(&f, "r/nlp:1.0").await;

        let m = monitor(&f, false);
        let report = m.run_cycle().await;
        assert_eq!(report.namespaces, 1);
        assert_eq!(report.deployments, 1);

        f.cluster.set_ready_replicas("tenant-acme", "nlp", 1);
        m.run_cycle().await;
        let summary = m.health_summary().await;
        assert_eq!(summary.counts.warning, 1);
        assert_eq!(summary.status(), "Degraded");
        let nlp = m.metrics_for("tenant-acme", "nlp").unwrap();
        assert_eq!((nlp.desired, nlp.available, nlp.ready, nlp.updated), (2, 1, 1, 2));
        assert!(summary.last_cycle_at.is_some());
    }

    #[tokio::test]
    async fn test_critical_without_auto_rollback_does_nothing() {
        let f = fixture();
        f.orchestrator
            .create_namespace("acme", TenantPreset::Small)
            .await
            .unwrap();
        deploy(&f, "r/nlp:1.0").await;
        deploy(&f, "r/nlp:1.1").await;
        f.cluster.set_ready_replicas("tenant-acme", "nlp", 0);

        let m = monitor(&f, false);
        let report = m.run_cycle().await;
        assert_eq!(report.rollbacks, 0);
        let metrics = m.metrics_for("tenant-acme", "nlp").unwrap();
        assert_eq!(metrics.health, Health::Critical);
        assert_eq!(metrics.image, "r/nlp:1.1");
    }

    #[tokio::test]
    async fn test_auto_rollback_restores_previous_success() {
        let f = fixture();
        f.orchestrator
            .create_namespace("acme", TenantPreset::Small)
            .await
            .unwrap();
        deploy(&f, "r/nlp:1.0").await;
        deploy(&f, "r/nlp:1.1").await;
        f.cluster.set_ready_replicas("tenant-acme", "nlp", 0);

        let m = monitor(&f, true);
        let report = m.run_cycle().await;
        assert_eq!(report.rollbacks, 1);

        let status = f.orchestrator.tenant_status("acme").await.unwrap().unwrap();
        assert_eq!(status.deployments[0].image, "r/nlp:1.0");

        let current = f.ledger.current_deployment("acme", "nlp").await.unwrap().unwrap();
        assert_eq!(current.status, DeploymentStatus::RolledBack);
        assert_eq!(current.version, "1.0");
        assert!(current.reason.unwrap().contains("CRITICAL"));

        // marker blocks a second rollback while the first is coming up
        let again = m.run_cycle().await;
        assert_eq!(again.rollbacks, 0);
        assert_eq!(m.active_rollbacks().len(), 1);
        assert_eq!(m.active_rollbacks()[0].1.owner, "test-instance");
    }

    #[tokio::test]
    async fn test_rollback_unavailable_without_earlier_success() {
        let f = fixture();
        f.orchestrator
            .create_namespace("acme", TenantPreset::Small)
            .await
            .unwrap();
        deploy(&f, "r/nlp:1.0").await;
        f.cluster.set_ready_replicas("tenant-acme", "nlp", 0);

        let m = monitor(&f, true);
        let report = m.run_cycle().await;
        assert_eq!(report.rollbacks, 0);
        assert!(m.active_rollbacks().is_empty());
        let history = f.ledger.deployment_history("acme", "nlp").await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_version_drift_flagged() {
        let f = fixture();
        f.orchestrator
            .create_namespace("acme", TenantPreset::Small)
            .await
            .unwrap();
        deploy(&f, "r/nlp:1.0").await;
        f.orchestrator
            .rollout_image("acme", "nlp", "r/nlp:hotfix")
            .await
            .unwrap();

        let m = monitor(&f, false);
        m.run_cycle().await;
        let metrics = m.metrics_for("tenant-acme", "nlp").unwrap();
        assert!(metrics.version_mismatch);
        assert_eq!(metrics.expected_version.as_deref(), Some("1.0"));
        assert_eq!(metrics.health, Health::Healthy);
    }

    #[tokio::test]
    async fn test_metrics_expire_after_ttl() {
        let f = fixture();
        f.orchestrator
            .create_namespace("acme", TenantPreset::Small)
            .await
            .unwrap();
        deploy(&f, "r/nlp:1.0").await;
        let m = monitor(&f, false);
        m.run_cycle().await;

        f.orchestrator.delete_tenant("acme").await.unwrap();
        f.clock.advance(chrono::Duration::hours(25));
        let report = m.run_cycle().await;
        assert_eq!(report.evicted, 1);
        assert!(m.health_summary().await.deployments.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_namespace_does_not_block_others() {
        let f = fixture();
        for tenant in ["fast", "slow"] {
            f.orchestrator
                .create_namespace(tenant, TenantPreset::Micro)
                .await
                .unwrap();
            f.orchestrator
                .deploy_service(tenant, &nlp("r/nlp:1.0"))
                .await
                .unwrap();
        }
        f.cluster
            .delay_namespace("tenant-slow", Duration::from_secs(60));

        let m = monitor(&f, false);
        let report = m.run_cycle().await;
        assert_eq!(report.namespaces, 2);
        assert_eq!(report.failed_namespaces, 1);
        assert_eq!(report.deployments, 1);
        let summary = m.health_summary().await;
        assert_eq!(summary.namespace_errors[0].0, "tenant-slow");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_rollback_counts_against_namespace_timeout() {
        let f = fixture();
        for tenant in ["fast", "slow"] {
            f.orchestrator
                .create_namespace(tenant, TenantPreset::Micro)
                .await
                .unwrap();
        }
        f.orchestrator
            .deploy_service("fast", &nlp("r/nlp:1.0"))
            .await
            .unwrap();
        f.orchestrator
            .deploy_service("slow", &nlp("r/nlp:1.0"))
            .await
            .unwrap();
        f.ledger
            .record_deployment("slow", "nlp", "r/nlp:1.0", DeploymentStatus::Success, None)
            .await
            .unwrap();
        f.clock.advance(chrono::Duration::minutes(5));
        f.orchestrator
            .deploy_service("slow", &nlp("r/nlp:1.1"))
            .await
            .unwrap();
        f.ledger
            .record_deployment("slow", "nlp", "r/nlp:1.1", DeploymentStatus::Success, None)
            .await
            .unwrap();
        f.cluster.set_ready_replicas("tenant-slow", "nlp", 0);
        // listing stays fast, the rollback write hangs
        f.cluster
            .delay_writes("tenant-slow", Duration::from_secs(600));

        let m = monitor(&f, true);
        let report = m.run_cycle().await;
        assert_eq!(report.namespaces, 2);
        assert_eq!(report.failed_namespaces, 1);
        assert_eq!(report.rollbacks, 0);
        let summary = m.health_summary().await;
        assert_eq!(m.metrics_for("tenant-fast", "nlp").unwrap().health, Health::Healthy);
        assert_eq!(summary.namespace_errors.len(), 1);
        assert_eq!(summary.namespace_errors[0].0, "tenant-slow");
        assert!(summary.namespace_errors[0].1.contains("timed out"));
    }

    #[tokio::test]
    async fn test_rollback_to_same_image_is_allowed() {
        let f = fixture();
        f.orchestrator
            .create_namespace("acme", TenantPreset::Small)
            .await
            .unwrap();
        // 1.0 succeeded, a later redeploy of the same image went CRITICAL
        deploy(&f, "r/nlp:1.0").await;
        deploy(&f, "r/nlp:1.0").await;
        f.cluster.set_ready_replicas("tenant-acme", "nlp", 0);

        let m = monitor(&f, true);
        let report = m.run_cycle().await;
        assert_eq!(report.rollbacks, 1);
        let current = f.ledger.current_deployment("acme", "nlp").await.unwrap().unwrap();
        assert_eq!(current.status, DeploymentStatus::RolledBack);
        assert_eq!(current.image, "r/nlp:1.0");
    }
}
