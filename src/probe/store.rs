use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager as RedisConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::error::AppResult;
use crate::probe::metrics::Metrics;
use crate::probe::report::{Alert, ProbeReport};

/// Bounded retention for dashboard paging
pub const MAX_RECENT_REPORTS: usize = 100;
pub const MAX_RECENT_ALERTS: usize = 50;

/// TTLs on the redis backend
const REPORT_TTL_SECS: i64 = 7 * 24 * 3600;
const ALERT_TTL_SECS: i64 = 7 * 24 * 3600;
const METRICS_TTL_SECS: i64 = 30 * 24 * 3600;

/// Redis key layout:
/// - flowforge:monitor:results   - List of recent probe reports (JSON)
/// - flowforge:monitor:alerts    - List of recent alerts (JSON)
/// - flowforge:monitor:metrics   - String holding the rolling aggregate
/// - flowforge:monitor:snapshots - List of periodic metrics snapshots
const RESULTS_KEY: &str = "flowforge:monitor:results";
const ALERTS_KEY: &str = "flowforge:monitor:alerts";
const METRICS_KEY: &str = "flowforge:monitor:metrics";
const SNAPSHOTS_KEY: &str = "flowforge:monitor:snapshots";

/// Store for prober observability state: recent reports, recent alerts and
/// the single rolling metrics aggregate.
#[async_trait]
pub trait MonitorStore: Send + Sync {
    /// Persist a report and fold its summary into the rolling metrics
    async fn record_report(&self, report: ProbeReport) -> AppResult<()>;

    async fn record_alert(&self, alert: Alert) -> AppResult<()>;

    /// Most recent reports, newest first
    async fn recent_reports(&self, limit: usize) -> AppResult<Vec<ProbeReport>>;

    /// Most recent alerts, newest first
    async fn recent_alerts(&self, limit: usize) -> AppResult<Vec<Alert>>;

    async fn metrics(&self) -> AppResult<Metrics>;

    /// Persist a point-in-time copy of the rolling metrics
    async fn snapshot_metrics(&self) -> AppResult<Metrics>;

    /// Operator action; the aggregate is never reset otherwise
    async fn reset_metrics(&self) -> AppResult<()>;
}

/// In-memory monitor store for tests and local development
pub struct InMemoryMonitorStore {
    inner: Arc<Mutex<MonitorInner>>,
}

#[derive(Default)]
struct MonitorInner {
    reports: VecDeque<ProbeReport>,
    alerts: VecDeque<Alert>,
    metrics: Metrics,
    snapshots: Vec<Metrics>,
}

impl InMemoryMonitorStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MonitorInner::default())),
        }
    }
}

impl Default for InMemoryMonitorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MonitorStore for InMemoryMonitorStore {
    async fn record_report(&self, report: ProbeReport) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        // One mutation in flight at a time keeps the aggregate consistent
        inner.metrics.absorb(&report.summary, report.started_at);
        inner.reports.push_front(report);
        inner.reports.truncate(MAX_RECENT_REPORTS);
        Ok(())
    }

    async fn record_alert(&self, alert: Alert) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        inner.alerts.push_front(alert);
        inner.alerts.truncate(MAX_RECENT_ALERTS);
        Ok(())
    }

    async fn recent_reports(&self, limit: usize) -> AppResult<Vec<ProbeReport>> {
        let inner = self.inner.lock().await;
        Ok(inner.reports.iter().take(limit).cloned().collect())
    }

    async fn recent_alerts(&self, limit: usize) -> AppResult<Vec<Alert>> {
        let inner = self.inner.lock().await;
        Ok(inner.alerts.iter().take(limit).cloned().collect())
    }

    async fn metrics(&self) -> AppResult<Metrics> {
        let inner = self.inner.lock().await;
        Ok(inner.metrics.clone())
    }

    async fn snapshot_metrics(&self) -> AppResult<Metrics> {
        let mut inner = self.inner.lock().await;
        let snapshot = inner.metrics.clone();
        inner.snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn reset_metrics(&self) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        inner.metrics = Metrics::default();
        Ok(())
    }
}

/// Redis-backed monitor store
pub struct RedisMonitorStore {
    conn: RedisConnectionManager,
    /// Serializes metrics read-modify-write cycles (single-writer rule)
    metrics_lock: Arc<Mutex<()>>,
}

impl RedisMonitorStore {
    pub fn new(conn: RedisConnectionManager) -> Self {
        Self {
            conn,
            metrics_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_metrics(&self) -> AppResult<Metrics> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(METRICS_KEY).await?;
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Metrics::default()),
        }
    }

    async fn save_metrics(&self, metrics: &Metrics) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(metrics)?;
        let _: () = conn.set(METRICS_KEY, &json).await?;
        let _: () = conn.expire(METRICS_KEY, METRICS_TTL_SECS).await?;
        Ok(())
    }

    async fn push_bounded<T: serde::Serialize>(
        &self,
        key: &str,
        value: &T,
        max: usize,
        ttl_secs: i64,
    ) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(value)?;
        let _: () = conn.lpush(key, &json).await?;
        let _: () = conn.ltrim(key, 0, max as isize - 1).await?;
        let _: () = conn.expire(key, ttl_secs).await?;
        Ok(())
    }

    async fn read_recent<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
        limit: usize,
    ) -> AppResult<Vec<T>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(key, 0, limit as isize - 1).await?;
        let mut items = Vec::with_capacity(raw.len());
        for json in raw {
            items.push(serde_json::from_str(&json)?);
        }
        Ok(items)
    }
}

#[async_trait]
impl MonitorStore for RedisMonitorStore {
    async fn record_report(&self, report: ProbeReport) -> AppResult<()> {
        self.push_bounded(RESULTS_KEY, &report, MAX_RECENT_REPORTS, REPORT_TTL_SECS)
            .await?;

        let _guard = self.metrics_lock.lock().await;
        let mut metrics = self.load_metrics().await?;
        metrics.absorb(&report.summary, report.started_at);
        self.save_metrics(&metrics).await
    }

    async fn record_alert(&self, alert: Alert) -> AppResult<()> {
        self.push_bounded(ALERTS_KEY, &alert, MAX_RECENT_ALERTS, ALERT_TTL_SECS)
            .await
    }

    async fn recent_reports(&self, limit: usize) -> AppResult<Vec<ProbeReport>> {
        self.read_recent(RESULTS_KEY, limit.min(MAX_RECENT_REPORTS)).await
    }

    async fn recent_alerts(&self, limit: usize) -> AppResult<Vec<Alert>> {
        self.read_recent(ALERTS_KEY, limit.min(MAX_RECENT_ALERTS)).await
    }

    async fn metrics(&self) -> AppResult<Metrics> {
        self.load_metrics().await
    }

    async fn snapshot_metrics(&self) -> AppResult<Metrics> {
        let _guard = self.metrics_lock.lock().await;
        let metrics = self.load_metrics().await?;
        self.push_bounded(SNAPSHOTS_KEY, &metrics, MAX_RECENT_REPORTS, METRICS_TTL_SECS)
            .await?;
        Ok(metrics)
    }

    async fn reset_metrics(&self) -> AppResult<()> {
        let _guard = self.metrics_lock.lock().await;
        self.save_metrics(&Metrics::default()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::report::{AlertKind, ProbeKind, Severity};
    use time::OffsetDateTime;

    fn report(failed: usize) -> ProbeReport {
        use crate::probe::report::EndpointResult;
        let endpoints = (0..5)
            .map(|i| EndpointResult {
                path: format!("/endpoint/{}", i),
                method: "GET".to_string(),
                success: i >= failed,
                status_code: Some(if i >= failed { 200 } else { 503 }),
                response_time_ms: 100,
                critical: false,
                error: None,
            })
            .collect();
        ProbeReport::new(ProbeKind::EndpointTest, OffsetDateTime::now_utc(), endpoints, 500)
    }

    #[tokio::test]
    async fn test_reports_are_bounded_newest_first() {
        let store = InMemoryMonitorStore::new();
        for _ in 0..(MAX_RECENT_REPORTS + 20) {
            store.record_report(report(0)).await.unwrap();
        }

        let recent = store.recent_reports(1000).await.unwrap();
        assert_eq!(recent.len(), MAX_RECENT_REPORTS);
    }

    #[tokio::test]
    async fn test_alerts_are_bounded() {
        let store = InMemoryMonitorStore::new();
        for i in 0..(MAX_RECENT_ALERTS + 10) {
            store
                .record_alert(Alert::new(
                    AlertKind::SlowResponse,
                    Severity::Warning,
                    format!("alert {}", i),
                    serde_json::Value::Null,
                ))
                .await
                .unwrap();
        }

        let recent = store.recent_alerts(1000).await.unwrap();
        assert_eq!(recent.len(), MAX_RECENT_ALERTS);
        assert!(recent[0].message.contains(&format!("{}", MAX_RECENT_ALERTS + 9)));
    }

    #[tokio::test]
    async fn test_record_report_updates_metrics() {
        let store = InMemoryMonitorStore::new();
        store.record_report(report(1)).await.unwrap();

        let metrics = store.metrics().await.unwrap();
        assert_eq!(metrics.total_tests, 5);
        assert_eq!(metrics.total_failures, 1);
        assert!((metrics.uptime - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_reset_metrics_is_explicit_only() {
        let store = InMemoryMonitorStore::new();
        store.record_report(report(0)).await.unwrap();
        assert_eq!(store.metrics().await.unwrap().total_tests, 5);

        store.reset_metrics().await.unwrap();
        assert_eq!(store.metrics().await.unwrap().total_tests, 0);
    }

    #[tokio::test]
    async fn test_snapshot_returns_current_aggregate() {
        let store = InMemoryMonitorStore::new();
        store.record_report(report(0)).await.unwrap();

        let snapshot = store.snapshot_metrics().await.unwrap();
        assert_eq!(snapshot.total_tests, 5);
    }
}
