pub mod metrics;
pub mod report;
pub mod runner;
pub mod store;

pub use metrics::{health_status, HealthStatus, Metrics};
pub use report::{Alert, AlertKind, EndpointResult, EndpointSpec, ProbeKind, ProbeReport, ProbeSummary, Severity};
pub use runner::{default_endpoints, evaluate_sweep, ProbeRunner, RunnerConfig};
pub use store::{InMemoryMonitorStore, MonitorStore, RedisMonitorStore};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Cadences of the four independent probe timers
#[derive(Debug, Clone)]
pub struct ProbeSchedule {
    pub health: Duration,
    pub sweep: Duration,
    pub performance: Duration,
    pub snapshot: Duration,
}

impl Default for ProbeSchedule {
    fn default() -> Self {
        Self {
            health: Duration::from_secs(120),
            sweep: Duration::from_secs(900),
            performance: Duration::from_secs(3600),
            snapshot: Duration::from_secs(21600),
        }
    }
}

impl ProbeSchedule {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            health: Duration::from_secs(config.probe_health_interval_secs),
            sweep: Duration::from_secs(config.probe_sweep_interval_secs),
            performance: Duration::from_secs(config.probe_perf_interval_secs),
            snapshot: Duration::from_secs(config.probe_snapshot_interval_secs),
        }
    }
}

/// The periodic self-testing service.
///
/// Explicitly constructed and owned by the worker's composition root; no
/// module-level globals. `start` spawns four independent timer tasks, `stop`
/// aborts them. Individual probe outcomes never stop the schedule.
pub struct ProbeService {
    runner: Arc<ProbeRunner>,
    monitor: Arc<dyn MonitorStore>,
    schedule: ProbeSchedule,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ProbeService {
    pub fn new(
        runner: Arc<ProbeRunner>,
        monitor: Arc<dyn MonitorStore>,
        schedule: ProbeSchedule,
    ) -> Self {
        Self {
            runner,
            monitor,
            schedule,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the four probe timers. Calling `start` twice without `stop` is
    /// a no-op.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            tracing::warn!("Probe service already running");
            return;
        }

        tracing::info!(
            health_secs = self.schedule.health.as_secs(),
            sweep_secs = self.schedule.sweep.as_secs(),
            performance_secs = self.schedule.performance.as_secs(),
            snapshot_secs = self.schedule.snapshot.as_secs(),
            "Probe service started"
        );

        for (period, kind) in [
            (self.schedule.health, ProbeKind::HealthCheck),
            (self.schedule.sweep, ProbeKind::EndpointTest),
            (self.schedule.performance, ProbeKind::PerformanceTest),
        ] {
            let runner = self.runner.clone();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick resolves immediately; skip it so the probe
                // fires one full period after start
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let report = runner.run(kind).await;
                    tracing::debug!(
                        kind = kind.as_str(),
                        passed = report.summary.passed,
                        failed = report.summary.failed,
                        "Probe cycle finished"
                    );
                }
            }));
        }

        let monitor = self.monitor.clone();
        let period = self.schedule.snapshot;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match monitor.snapshot_metrics().await {
                    Ok(snapshot) => tracing::info!(
                        total_tests = snapshot.total_tests,
                        uptime = snapshot.uptime,
                        "Metrics snapshot persisted"
                    ),
                    Err(e) => tracing::warn!(error = %e, "Failed to persist metrics snapshot"),
                }
            }
        }));
    }

    /// Abort all probe timers
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        tracing::info!("Probe service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;

    /// Bind a throwaway target service on a random port
    async fn spawn_target(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn healthy_router() -> Router {
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/", get(|| async { "ok" }))
    }

    fn quick_runner(base_url: String, monitor: Arc<InMemoryMonitorStore>) -> ProbeRunner {
        ProbeRunner::new(
            base_url,
            monitor,
            RunnerConfig {
                request_timeout: Duration::from_secs(2),
                inter_request_delay: Duration::from_millis(1),
                burst_size: 5,
            },
        )
        .unwrap()
        .with_endpoints(vec![
            EndpointSpec::get("/health", true),
            EndpointSpec::get("/", false),
        ])
    }

    #[tokio::test]
    async fn test_health_check_against_live_target() {
        let base_url = spawn_target(healthy_router()).await;
        let monitor = Arc::new(InMemoryMonitorStore::new());
        let runner = quick_runner(base_url, monitor.clone());

        let report = runner.health_check().await;
        assert_eq!(report.summary.failed, 0);
        assert_eq!(report.endpoints[0].status_code, Some(200));

        let metrics = monitor.metrics().await.unwrap();
        assert_eq!(metrics.total_tests, 1);
        assert!(monitor.recent_alerts(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_with_failing_critical_endpoint() {
        // /health answers 500: a hard failure on a critical endpoint
        let router = Router::new()
            .route(
                "/health",
                get(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "down") }),
            )
            .route("/", get(|| async { "ok" }));
        let base_url = spawn_target(router).await;
        let monitor = Arc::new(InMemoryMonitorStore::new());
        let runner = quick_runner(base_url, monitor.clone());

        let report = runner.full_sweep().await;
        assert_eq!(report.summary.failed, 1);

        let alerts = monitor.recent_alerts(10).await.unwrap();
        assert!(alerts.iter().any(|a| a.kind == AlertKind::CriticalFailure));
        // 1 failure out of 2 probes also breaches the error-rate threshold
        assert!(alerts.iter().any(|a| a.kind == AlertKind::HighErrorRate));

        // Uptime 0.5 puts derived health below the degraded band
        let metrics = monitor.metrics().await.unwrap();
        assert_eq!(health_status(&metrics, alerts.len()), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_unreachable_target_is_recorded_not_thrown() {
        // Nothing listens here; probes fail at the transport layer
        let monitor = Arc::new(InMemoryMonitorStore::new());
        let runner = quick_runner("http://127.0.0.1:9".to_string(), monitor.clone());

        let report = runner.health_check().await;
        assert_eq!(report.summary.failed, 1);
        assert!(report.endpoints[0].error.is_some());
        assert_eq!(report.endpoints[0].status_code, None);

        let alerts = monitor.recent_alerts(10).await.unwrap();
        assert!(alerts.iter().any(|a| a.kind == AlertKind::CriticalFailure));
    }

    #[tokio::test]
    async fn test_four_xx_is_soft_success() {
        let router = Router::new()
            .route(
                "/health",
                get(|| async { (axum::http::StatusCode::NOT_FOUND, "gone") }),
            )
            .route("/", get(|| async { "ok" }));
        let base_url = spawn_target(router).await;
        let monitor = Arc::new(InMemoryMonitorStore::new());
        let runner = quick_runner(base_url, monitor.clone());

        let report = runner.health_check().await;
        assert_eq!(report.summary.failed, 0);
        assert_eq!(report.endpoints[0].status_code, Some(404));
    }

    #[tokio::test]
    async fn test_performance_burst_issues_parallel_probes() {
        let base_url = spawn_target(healthy_router()).await;
        let monitor = Arc::new(InMemoryMonitorStore::new());
        let runner = quick_runner(base_url, monitor.clone());

        let report = runner.performance_burst().await;
        assert_eq!(report.kind, ProbeKind::PerformanceTest);
        assert_eq!(report.summary.total, 5);
        assert_eq!(report.summary.failed, 0);
    }

    #[tokio::test]
    async fn test_service_runs_on_schedule_and_stops() {
        let base_url = spawn_target(healthy_router()).await;
        let monitor = Arc::new(InMemoryMonitorStore::new());
        let runner = Arc::new(quick_runner(base_url, monitor.clone()));

        let service = ProbeService::new(
            runner,
            monitor.clone(),
            ProbeSchedule {
                health: Duration::from_millis(30),
                sweep: Duration::from_secs(3600),
                performance: Duration::from_secs(3600),
                snapshot: Duration::from_secs(3600),
            },
        );

        service.start().await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        service.stop().await;

        let reports = monitor.recent_reports(50).await.unwrap();
        assert!(!reports.is_empty(), "no probe reports recorded");
        let count_after_stop = reports.len();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let reports = monitor.recent_reports(50).await.unwrap();
        assert_eq!(reports.len(), count_after_stop, "probes kept firing after stop");
    }
}
