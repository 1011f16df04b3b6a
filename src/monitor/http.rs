//! Read-only HTTP view of the health summary

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use tokio_util::sync::CancellationToken;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::checker::DeploymentHealthMonitor;

const MAX_CONCURRENT_REQUESTS: usize = 64;

/// Shared state for the health endpoints
#[derive(Clone)]
pub struct HealthApiState {
    pub monitor: Arc<DeploymentHealthMonitor>,
}

/// Create the health router
pub fn create_health_router(state: HealthApiState) -> Router {
    Router::new()
        .route("/health", get(liveness))
        .route("/v1/health", get(health_summary))
        .route("/v1/health/{namespace}", get(namespace_health))
        .route("/v1/rollbacks", get(active_rollbacks))
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
        .layer(TraceLayer::new_for_http())
        // dashboards read the summary cross-origin
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn liveness() -> impl IntoResponse {
    StatusCode::OK
}

async fn health_summary(State(state): State<HealthApiState>) -> impl IntoResponse {
    Json(state.monitor.health_summary().await)
}

async fn namespace_health(
    State(state): State<HealthApiState>,
    axum::extract::Path(namespace): axum::extract::Path<String>,
) -> impl IntoResponse {
    let summary = state.monitor.health_summary().await;
    let deployments: Vec<_> = summary
        .deployments
        .into_iter()
        .filter(|d| d.namespace == namespace)
        .collect();
    if deployments.is_empty() {
        (StatusCode::NOT_FOUND, Json(deployments))
    } else {
        (StatusCode::OK, Json(deployments))
    }
}

async fn active_rollbacks(State(state): State<HealthApiState>) -> impl IntoResponse {
    let markers: Vec<_> = state
        .monitor
        .active_rollbacks()
        .into_iter()
        .map(|((tenant, service), marker)| {
            serde_json::json!({ "tenant": tenant, "service": service, "marker": marker })
        })
        .collect();
    Json(markers)
}

/// Serve the health router until the token is cancelled
pub async fn serve(
    addr: SocketAddr,
    monitor: Arc<DeploymentHealthMonitor>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Health endpoint listening on http://{}", addr);
    let app = create_health_router(HealthApiState { monitor });
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::TenantPreset;
    use crate::clock::SystemClock;
    use crate::cluster::{ClusterOrchestrator, MemoryCluster};
    use crate::config::MonitorSettings;
    use crate::ledger::ImageVersionLedger;
    use crate::monitor::HealthSummary;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    async fn create_test_app() -> Router {
        let orchestrator = Arc::new(ClusterOrchestrator::new(MemoryCluster::shared()));
        orchestrator
            .create_namespace("acme", TenantPreset::Micro)
            .await
            .unwrap();
        let monitor = Arc::new(DeploymentHealthMonitor::new(
            orchestrator,
            Arc::new(ImageVersionLedger::in_memory()),
            Arc::new(SystemClock),
            MonitorSettings::default(),
        ));
        monitor.run_cycle().await;
        create_health_router(HealthApiState { monitor })
    }

    #[tokio::test]
    async fn test_liveness() {
        let app = create_test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_summary_is_json() {
        let app = create_test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let summary: HealthSummary = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(summary.counts.total(), 0);
        assert!(summary.last_cycle_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_namespace_is_404() {
        let app = create_test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/health/tenant-ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
