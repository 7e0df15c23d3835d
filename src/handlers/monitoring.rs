use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};

use crate::error::AppResult;
use crate::probe::{health_status, Alert, Metrics, ProbeKind, ProbeReport};
use crate::queue::QueueStats;
use crate::state::AppState;

/// Window in which alerts count against the derived health status
const ALERT_WINDOW_HOURS: i64 = 24;

// ============ Request/Response DTOs ============

#[derive(Debug, Deserialize, IntoParams)]
pub struct LimitParams {
    #[param(default = 20, minimum = 1, maximum = 100)]
    pub limit: Option<usize>,
}

/// Liveness body for the public health endpoint
#[derive(Debug, Serialize, ToSchema)]
pub struct LivenessResponse {
    pub status: String,
}

/// Derived service health from prober metrics
#[derive(Debug, Serialize, ToSchema)]
pub struct MonitoringHealthResponse {
    pub status: String,
    pub uptime: f64,
    pub avg_response_time_ms: f64,
    pub total_tests: u64,
    pub total_failures: u64,
    /// Alerts raised within the last 24 hours
    pub recent_alerts: usize,
    #[schema(value_type = Option<String>)]
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_test_at: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AlertListResponse {
    pub data: Vec<Alert>,
    pub total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReportListResponse {
    pub data: Vec<ProbeReport>,
    pub total: usize,
}

/// Everything a monitoring dashboard needs in one call
#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardResponse {
    pub status: String,
    pub metrics: Metrics,
    pub queues: HashMap<String, QueueStats>,
    pub recent_reports: Vec<ProbeReport>,
    pub recent_alerts: Vec<Alert>,
}

/// Acknowledgement for a manually triggered probe
#[derive(Debug, Serialize, ToSchema)]
pub struct RunProbeResponse {
    pub kind: String,
    pub message: String,
}

async fn alerts_in_window(state: &AppState) -> AppResult<Vec<Alert>> {
    let cutoff = OffsetDateTime::now_utc() - time::Duration::hours(ALERT_WINDOW_HOURS);
    let alerts = state
        .monitor
        .recent_alerts(crate::probe::store::MAX_RECENT_ALERTS)
        .await?;
    Ok(alerts.into_iter().filter(|a| a.at >= cutoff).collect())
}

// ============ Handlers ============

/// Process liveness; also the prober's critical-path target
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = LivenessResponse)
    ),
    tag = "Health"
)]
pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "ok".to_string(),
    })
}

/// Service health derived from the rolling self-test metrics
#[utoipa::path(
    get,
    path = "/monitoring/health",
    responses(
        (status = 200, description = "Derived health status", body = MonitoringHealthResponse)
    ),
    tag = "Monitoring"
)]
pub async fn monitoring_health(
    State(state): State<AppState>,
) -> AppResult<Json<MonitoringHealthResponse>> {
    let metrics = state.monitor.metrics().await?;
    let recent_alerts = alerts_in_window(&state).await?.len();
    let status = health_status(&metrics, recent_alerts);

    Ok(Json(MonitoringHealthResponse {
        status: status.as_str().to_string(),
        uptime: metrics.uptime,
        avg_response_time_ms: metrics.avg_response_time_ms,
        total_tests: metrics.total_tests,
        total_failures: metrics.total_failures,
        recent_alerts,
        last_test_at: metrics.last_test_at,
    }))
}

/// The rolling self-test metrics aggregate
#[utoipa::path(
    get,
    path = "/monitoring/metrics",
    responses(
        (status = 200, description = "Rolling metrics", body = Metrics)
    ),
    tag = "Monitoring"
)]
pub async fn monitoring_metrics(State(state): State<AppState>) -> AppResult<Json<Metrics>> {
    Ok(Json(state.monitor.metrics().await?))
}

/// Recent alerts, newest first
#[utoipa::path(
    get,
    path = "/monitoring/alerts",
    params(LimitParams),
    responses(
        (status = 200, description = "Recent alerts", body = AlertListResponse)
    ),
    tag = "Monitoring"
)]
pub async fn monitoring_alerts(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> AppResult<Json<AlertListResponse>> {
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let data = state.monitor.recent_alerts(limit).await?;
    let total = data.len();
    Ok(Json(AlertListResponse { data, total }))
}

/// Recent probe reports, newest first
#[utoipa::path(
    get,
    path = "/monitoring/results",
    params(LimitParams),
    responses(
        (status = 200, description = "Recent probe reports", body = ReportListResponse)
    ),
    tag = "Monitoring"
)]
pub async fn monitoring_results(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> AppResult<Json<ReportListResponse>> {
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let data = state.monitor.recent_reports(limit).await?;
    let total = data.len();
    Ok(Json(ReportListResponse { data, total }))
}

/// Aggregated monitoring dashboard
#[utoipa::path(
    get,
    path = "/monitoring/dashboard",
    responses(
        (status = 200, description = "Dashboard aggregate", body = DashboardResponse)
    ),
    tag = "Monitoring"
)]
pub async fn monitoring_dashboard(
    State(state): State<AppState>,
) -> AppResult<Json<DashboardResponse>> {
    let metrics = state.monitor.metrics().await?;
    let recent_alerts_24h = alerts_in_window(&state).await?.len();
    let status = health_status(&metrics, recent_alerts_24h);

    let queues = state
        .store
        .all_stats()
        .await?
        .into_iter()
        .map(|(queue, counts)| (queue.as_str().to_string(), counts))
        .collect();

    Ok(Json(DashboardResponse {
        status: status.as_str().to_string(),
        metrics,
        queues,
        recent_reports: state.monitor.recent_reports(10).await?,
        recent_alerts: state.monitor.recent_alerts(10).await?,
    }))
}

/// Manually trigger one probe kind; runs in the background
#[utoipa::path(
    post,
    path = "/monitoring/test/run/{kind}",
    params(
        ("kind" = String, Path, description = "health_check | endpoint_test | performance_test")
    ),
    responses(
        (status = 202, description = "Probe started", body = RunProbeResponse),
        (status = 400, description = "Unknown test kind")
    ),
    tag = "Monitoring"
)]
pub async fn run_probe(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> AppResult<(StatusCode, Json<RunProbeResponse>)> {
    let kind: ProbeKind = kind.parse()?;

    let runner = state.probe_runner.clone();
    tokio::spawn(async move {
        let report = runner.run(kind).await;
        tracing::info!(
            kind = kind.as_str(),
            passed = report.summary.passed,
            failed = report.summary.failed,
            "Manual probe finished"
        );
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(RunProbeResponse {
            kind: kind.as_str().to_string(),
            message: "Probe started".to_string(),
        }),
    ))
}
