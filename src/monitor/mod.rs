//! Deployment health monitoring
//!
//! [`DeploymentHealthMonitor::run_cycle`] is driven by a [`PeriodicJob`];
//! the latest observations are served read-only by [`http`].

pub mod checker;
pub mod health;
pub mod http;
pub mod job;

pub use checker::{instance_id, CycleReport, DeploymentHealthMonitor, RollbackMarker};
pub use health::{classify_health, DeploymentMetrics, Health, HealthCounts, HealthSummary};
pub use http::{create_health_router, HealthApiState};
pub use job::PeriodicJob;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Run the monitor on its configured interval until `cancel` fires
pub fn spawn_monitor(monitor: Arc<DeploymentHealthMonitor>, cancel: CancellationToken) -> PeriodicJob {
    let period = monitor.interval();
    PeriodicJob::spawn("health-monitor", period, cancel, move || {
        let monitor = monitor.clone();
        async move {
            monitor.run_cycle().await;
        }
    })
}
