// Library crate for the flowforge pipeline service
// Exports modules for use by the server and worker binaries and tests

pub mod config;
pub mod error;
pub mod handlers;
pub mod pipeline;
pub mod probe;
pub mod queue;
pub mod state;
pub mod workers;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers::{
    all_queue_stats, create_workflow, liveness, monitoring_alerts, monitoring_dashboard,
    monitoring_health, monitoring_metrics, monitoring_results, queue_stats, run_probe,
    workflow_status,
};
use crate::state::AppState;

/// Build the application router with the given state
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "flowforge" }))
        .route("/health", get(liveness))
        // Workflow pipeline routes
        .route("/api/workflows/generate", post(create_workflow))
        .route("/api/workflows/status/{job_id}", get(workflow_status))
        // Queue observability routes
        .route("/api/jobs/stats", get(all_queue_stats))
        .route("/api/jobs/stats/{queue}", get(queue_stats))
        // Monitoring routes
        .route("/monitoring/health", get(monitoring_health))
        .route("/monitoring/dashboard", get(monitoring_dashboard))
        .route("/monitoring/metrics", get(monitoring_metrics))
        .route("/monitoring/alerts", get(monitoring_alerts))
        .route("/monitoring/results", get(monitoring_results))
        .route("/monitoring/test/run/{kind}", post(run_probe))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
