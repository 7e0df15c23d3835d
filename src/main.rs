use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use flowforge::build_router;
use flowforge::config::Config;
use flowforge::handlers::{
    self, AlertListResponse, AllStatsResponse, DashboardResponse, EnqueuedWorkflowResponse,
    GenerateWorkflowRequest, JobStatusResponse, LivenessResponse, MonitoringHealthResponse,
    QueueStatsResponse, ReportListResponse, RunProbeResponse,
};
use flowforge::probe::{Alert, EndpointResult, Metrics, ProbeKind, ProbeReport, ProbeSummary};
use flowforge::queue::QueueStats;
use flowforge::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::monitoring::liveness,
        handlers::workflow::create_workflow,
        handlers::workflow::workflow_status,
        handlers::job::all_queue_stats,
        handlers::job::queue_stats,
        handlers::monitoring::monitoring_health,
        handlers::monitoring::monitoring_dashboard,
        handlers::monitoring::monitoring_metrics,
        handlers::monitoring::monitoring_alerts,
        handlers::monitoring::monitoring_results,
        handlers::monitoring::run_probe,
    ),
    components(schemas(
        GenerateWorkflowRequest,
        EnqueuedWorkflowResponse,
        JobStatusResponse,
        AllStatsResponse,
        QueueStatsResponse,
        QueueStats,
        LivenessResponse,
        MonitoringHealthResponse,
        DashboardResponse,
        AlertListResponse,
        ReportListResponse,
        RunProbeResponse,
        Metrics,
        Alert,
        ProbeReport,
        ProbeSummary,
        EndpointResult,
        ProbeKind,
    )),
    tags(
        (name = "Health", description = "Liveness endpoints"),
        (name = "Workflows", description = "Workflow generation pipeline"),
        (name = "Jobs", description = "Queue statistics"),
        (name = "Monitoring", description = "Self-test metrics, alerts and manual probes")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    let addr = config.server_addr();

    // Initialize application state
    tracing::info!("Connecting to job store...");
    let state = AppState::new(config).await?;
    tracing::info!("Job store connection established");

    // Build the main application router
    let app = build_router(state)
        // Add Swagger UI
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server started on http://{}", addr);
    tracing::info!("Swagger UI: http://{}/swagger-ui/", addr);
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
