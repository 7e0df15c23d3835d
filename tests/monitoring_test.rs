mod common;

use axum::http::StatusCode;
use time::OffsetDateTime;

use common::TestApp;
use flowforge::probe::{
    Alert, AlertKind, EndpointResult, MonitorStore, ProbeKind, ProbeReport, Severity,
};

fn sweep_report(total: usize, failed: usize, avg_ms: i64) -> ProbeReport {
    let endpoints = (0..total)
        .map(|i| EndpointResult {
            path: format!("/endpoint/{}", i),
            method: "GET".to_string(),
            success: i >= failed,
            status_code: Some(if i >= failed { 200 } else { 503 }),
            response_time_ms: avg_ms,
            critical: false,
            error: None,
        })
        .collect();
    ProbeReport::new(ProbeKind::EndpointTest, OffsetDateTime::now_utc(), endpoints, 1000)
}

fn alert() -> Alert {
    Alert::new(
        AlertKind::HighErrorRate,
        Severity::Warning,
        "2 of 20 probes failed".to_string(),
        serde_json::Value::Null,
    )
}

#[tokio::test]
async fn test_liveness_endpoint() {
    let app = TestApp::new();

    let response = app.server.get("/health").await;
    response.assert_status(StatusCode::OK);

    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_health_is_healthy_with_no_history() {
    let app = TestApp::new();

    let response = app.server.get("/monitoring/health").await;
    response.assert_status(StatusCode::OK);

    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["total_tests"], 0);
    assert_eq!(body["recent_alerts"], 0);
}

#[tokio::test]
async fn test_health_degrades_with_failures() {
    let app = TestApp::new();

    // 7% lifetime failure rate: below healthy, above unhealthy
    app.state
        .monitor
        .record_report(sweep_report(100, 7, 50))
        .await
        .unwrap();

    let body: serde_json::Value = app.server.get("/monitoring/health").await.json();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["total_tests"], 100);
    assert_eq!(body["total_failures"], 7);
}

#[tokio::test]
async fn test_alert_volume_forces_unhealthy() {
    let app = TestApp::new();

    // Perfect uptime, but six alerts inside the 24h window
    app.state
        .monitor
        .record_report(sweep_report(100, 0, 50))
        .await
        .unwrap();
    for _ in 0..6 {
        app.state.monitor.record_alert(alert()).await.unwrap();
    }

    let body: serde_json::Value = app.server.get("/monitoring/health").await.json();
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["recent_alerts"], 6);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_aggregate() {
    let app = TestApp::new();

    app.state
        .monitor
        .record_report(sweep_report(10, 1, 200))
        .await
        .unwrap();

    let body: serde_json::Value = app.server.get("/monitoring/metrics").await.json();
    assert_eq!(body["total_tests"], 10);
    assert_eq!(body["total_failures"], 1);
    assert!((body["uptime"].as_f64().unwrap() - 0.9).abs() < 1e-9);
    assert!((body["avg_response_time_ms"].as_f64().unwrap() - 200.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_alerts_endpoint_pages_newest_first() {
    let app = TestApp::new();

    for _ in 0..5 {
        app.state.monitor.record_alert(alert()).await.unwrap();
    }

    let body: serde_json::Value = app
        .server
        .get("/monitoring/alerts")
        .add_query_param("limit", "3")
        .await
        .json();
    assert_eq!(body["total"], 3);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);
    assert_eq!(body["data"][0]["kind"], "high_error_rate");
    assert_eq!(body["data"][0]["severity"], "warning");
}

#[tokio::test]
async fn test_results_endpoint_returns_reports() {
    let app = TestApp::new();

    app.state
        .monitor
        .record_report(sweep_report(5, 0, 120))
        .await
        .unwrap();

    let body: serde_json::Value = app.server.get("/monitoring/results").await.json();
    assert_eq!(body["total"], 1);
    assert_eq!(body["data"][0]["kind"], "endpoint_test");
    assert_eq!(body["data"][0]["summary"]["total"], 5);
}

#[tokio::test]
async fn test_dashboard_aggregates_everything() {
    let app = TestApp::new();

    app.state
        .monitor
        .record_report(sweep_report(20, 0, 80))
        .await
        .unwrap();
    app.state.monitor.record_alert(alert()).await.unwrap();

    let response = app.server.get("/monitoring/dashboard").await;
    response.assert_status(StatusCode::OK);

    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["metrics"]["total_tests"], 20);
    assert_eq!(body["queues"].as_object().unwrap().len(), 6);
    assert_eq!(body["recent_reports"].as_array().unwrap().len(), 1);
    assert_eq!(body["recent_alerts"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_manual_probe_trigger_is_accepted() {
    let app = TestApp::new();

    for kind in ["health_check", "endpoint_test", "performance_test"] {
        let response = app
            .server
            .post(&format!("/monitoring/test/run/{}", kind))
            .await;
        response.assert_status(StatusCode::ACCEPTED);

        let body: serde_json::Value = response.json();
        assert_eq!(body["kind"], kind);
    }
}

#[tokio::test]
async fn test_unknown_probe_kind_is_rejected() {
    let app = TestApp::new();

    let response = app.server.post("/monitoring/test/run/load_test").await;
    response.assert_status(StatusCode::BAD_REQUEST);
}
