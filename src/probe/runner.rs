use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, Method};
use serde_json::json;
use time::OffsetDateTime;

use crate::error::{AppError, AppResult};
use crate::probe::report::{
    Alert, AlertKind, EndpointResult, EndpointSpec, ProbeKind, ProbeReport, Severity,
};
use crate::probe::store::MonitorStore;

/// Sweep error rate above which `high_error_rate` fires (strictly greater)
const ERROR_RATE_THRESHOLD: f64 = 0.05;
/// Sweep average response time above which `slow_response` fires
const SLOW_RESPONSE_THRESHOLD_MS: f64 = 5000.0;

/// The fixed endpoint list swept every cycle. Paths are relative to the
/// probed service's base URL.
pub fn default_endpoints() -> Vec<EndpointSpec> {
    vec![
        EndpointSpec::get("/health", true),
        EndpointSpec::get("/", false),
        EndpointSpec::get("/api/jobs/stats", true),
        EndpointSpec::get("/monitoring/metrics", false),
        EndpointSpec::get("/monitoring/alerts", false),
    ]
}

/// Tunables for probe execution
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Hard timeout per outbound probe request
    pub request_timeout: Duration,
    /// Spacing between sweep requests, to avoid self-inflicted load
    pub inter_request_delay: Duration,
    /// Parallelism of the performance burst
    pub burst_size: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            inter_request_delay: Duration::from_millis(250),
            burst_size: 5,
        }
    }
}

/// Issues synthetic requests against the service's own endpoints and records
/// the outcomes. Probe failures are data, not errors: the runner always
/// produces a report, and store-write failures are logged and swallowed.
pub struct ProbeRunner {
    client: Client,
    base_url: String,
    endpoints: Vec<EndpointSpec>,
    monitor: Arc<dyn MonitorStore>,
    config: RunnerConfig,
}

impl ProbeRunner {
    pub fn new(
        base_url: impl Into<String>,
        monitor: Arc<dyn MonitorStore>,
        config: RunnerConfig,
    ) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            endpoints: default_endpoints(),
            monitor,
            config,
        })
    }

    pub fn with_endpoints(mut self, endpoints: Vec<EndpointSpec>) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Run one probe of the given kind and return its report
    pub async fn run(&self, kind: ProbeKind) -> ProbeReport {
        match kind {
            ProbeKind::HealthCheck => self.health_check().await,
            ProbeKind::EndpointTest => self.full_sweep().await,
            ProbeKind::PerformanceTest => self.performance_burst().await,
        }
    }

    /// Single critical-path probe. A failure raises `critical_failure`
    /// immediately, without waiting for the next sweep.
    pub async fn health_check(&self) -> ProbeReport {
        let started_at = OffsetDateTime::now_utc();
        let start = Instant::now();

        let target = self
            .endpoints
            .iter()
            .find(|e| e.critical)
            .cloned()
            .unwrap_or(EndpointSpec::get("/health", true));
        let result = self.probe_endpoint(&target).await;

        if !result.success {
            self.raise(Alert::new(
                AlertKind::CriticalFailure,
                Severity::High,
                format!("Critical endpoint {} failed health check", result.path),
                json!({ "endpoint": result }),
            ))
            .await;
        }

        let report = ProbeReport::new(
            ProbeKind::HealthCheck,
            started_at,
            vec![result],
            start.elapsed().as_millis() as i64,
        );
        self.record(&report).await;
        report
    }

    /// Sequential sweep of the whole endpoint list, followed by alert rule
    /// evaluation against the sweep summary
    pub async fn full_sweep(&self) -> ProbeReport {
        let started_at = OffsetDateTime::now_utc();
        let start = Instant::now();

        let mut results = Vec::with_capacity(self.endpoints.len());
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.inter_request_delay).await;
            }
            results.push(self.probe_endpoint(endpoint).await);
        }

        let report = ProbeReport::new(
            ProbeKind::EndpointTest,
            started_at,
            results,
            start.elapsed().as_millis() as i64,
        );

        for alert in evaluate_sweep(&report) {
            self.raise(alert).await;
        }
        self.record(&report).await;
        report
    }

    /// Concurrent burst against the lightest endpoint, measuring behavior
    /// under parallel load
    pub async fn performance_burst(&self) -> ProbeReport {
        let started_at = OffsetDateTime::now_utc();
        let start = Instant::now();

        let target = self
            .endpoints
            .first()
            .cloned()
            .unwrap_or(EndpointSpec::get("/health", true));

        let probes = (0..self.config.burst_size).map(|_| self.probe_endpoint(&target));
        let results = futures::future::join_all(probes).await;

        let report = ProbeReport::new(
            ProbeKind::PerformanceTest,
            started_at,
            results,
            start.elapsed().as_millis() as i64,
        );
        self.record(&report).await;
        report
    }

    /// Issue one probe request. Any response below 500 counts as available;
    /// 4xx is a soft success for uptime purposes.
    async fn probe_endpoint(&self, endpoint: &EndpointSpec) -> EndpointResult {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), endpoint.path);
        let method = Method::from_bytes(endpoint.method.as_bytes()).unwrap_or(Method::GET);

        let start = Instant::now();
        let outcome = self.client.request(method, &url).send().await;
        let response_time_ms = start.elapsed().as_millis() as i64;

        match outcome {
            Ok(response) => {
                let status = response.status().as_u16();
                EndpointResult {
                    path: endpoint.path.to_string(),
                    method: endpoint.method.to_string(),
                    success: status < 500,
                    status_code: Some(status),
                    response_time_ms,
                    critical: endpoint.critical,
                    error: None,
                }
            }
            Err(e) => EndpointResult {
                path: endpoint.path.to_string(),
                method: endpoint.method.to_string(),
                success: false,
                status_code: None,
                response_time_ms,
                critical: endpoint.critical,
                error: Some(e.to_string()),
            },
        }
    }

    async fn record(&self, report: &ProbeReport) {
        if let Err(e) = self.monitor.record_report(report.clone()).await {
            tracing::warn!(kind = report.kind.as_str(), error = %e, "Failed to persist probe report");
        }
    }

    async fn raise(&self, alert: Alert) {
        tracing::warn!(
            kind = ?alert.kind,
            severity = ?alert.severity,
            message = %alert.message,
            "Alert raised"
        );
        if let Err(e) = self.monitor.record_alert(alert).await {
            tracing::warn!(error = %e, "Failed to persist alert");
        }
    }
}

/// Alert rules evaluated against one full-sweep report
pub fn evaluate_sweep(report: &ProbeReport) -> Vec<Alert> {
    let mut alerts = Vec::new();
    let summary = &report.summary;

    if summary.error_rate() > ERROR_RATE_THRESHOLD {
        alerts.push(Alert::new(
            AlertKind::HighErrorRate,
            Severity::Warning,
            format!(
                "{} of {} probes failed ({:.1}% error rate)",
                summary.failed,
                summary.total,
                summary.error_rate() * 100.0
            ),
            json!({ "report_id": report.id, "failed": summary.failed, "total": summary.total }),
        ));
    }

    if summary.avg_response_time_ms > SLOW_RESPONSE_THRESHOLD_MS {
        alerts.push(Alert::new(
            AlertKind::SlowResponse,
            Severity::Warning,
            format!(
                "Average response time {:.0}ms exceeds {:.0}ms",
                summary.avg_response_time_ms, SLOW_RESPONSE_THRESHOLD_MS
            ),
            json!({ "report_id": report.id, "avg_response_time_ms": summary.avg_response_time_ms }),
        ));
    }

    let failed_critical: Vec<&EndpointResult> = report
        .endpoints
        .iter()
        .filter(|e| e.critical && !e.success)
        .collect();
    if !failed_critical.is_empty() {
        let paths: Vec<&str> = failed_critical.iter().map(|e| e.path.as_str()).collect();
        alerts.push(Alert::new(
            AlertKind::CriticalFailure,
            Severity::High,
            format!("Critical endpoints failed: {}", paths.join(", ")),
            json!({ "report_id": report.id, "endpoints": failed_critical }),
        ));
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep_report(total: usize, failed: usize, avg_ms: i64, critical_failed: bool) -> ProbeReport {
        let endpoints: Vec<EndpointResult> = (0..total)
            .map(|i| {
                let success = i >= failed;
                EndpointResult {
                    path: format!("/endpoint/{}", i),
                    method: "GET".to_string(),
                    success,
                    status_code: if success { Some(200) } else { None },
                    response_time_ms: avg_ms,
                    critical: critical_failed && i == 0,
                    error: if success { None } else { Some("timeout".to_string()) },
                }
            })
            .collect();
        ProbeReport::new(ProbeKind::EndpointTest, OffsetDateTime::now_utc(), endpoints, 0)
    }

    #[test]
    fn test_ten_percent_error_rate_alerts() {
        let report = sweep_report(20, 2, 100, false);
        let alerts = evaluate_sweep(&report);
        assert!(alerts.iter().any(|a| a.kind == AlertKind::HighErrorRate));
    }

    #[test]
    fn test_exactly_five_percent_does_not_alert() {
        // 1 failure in 20 sits exactly on the threshold; only strictly
        // greater rates alert
        let report = sweep_report(20, 1, 100, false);
        let alerts = evaluate_sweep(&report);
        assert!(alerts.iter().all(|a| a.kind != AlertKind::HighErrorRate));
    }

    #[test]
    fn test_slow_sweep_alerts() {
        let report = sweep_report(10, 0, 6000, false);
        let alerts = evaluate_sweep(&report);
        assert!(alerts.iter().any(|a| a.kind == AlertKind::SlowResponse));

        let fast = sweep_report(10, 0, 4999, false);
        assert!(evaluate_sweep(&fast).iter().all(|a| a.kind != AlertKind::SlowResponse));
    }

    #[test]
    fn test_critical_endpoint_failure_is_high_severity() {
        let report = sweep_report(20, 1, 100, true);
        let alerts = evaluate_sweep(&report);

        let critical = alerts
            .iter()
            .find(|a| a.kind == AlertKind::CriticalFailure)
            .expect("critical failure alert");
        assert_eq!(critical.severity, Severity::High);
        assert!(critical.message.contains("/endpoint/0"));
    }

    #[test]
    fn test_clean_sweep_raises_nothing() {
        let report = sweep_report(20, 0, 100, false);
        assert!(evaluate_sweep(&report).is_empty());
    }
}
