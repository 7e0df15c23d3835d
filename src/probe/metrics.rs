use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::probe::report::ProbeSummary;

/// The rolling self-test aggregate. One logical value, updated after every
/// probe report; single-writer discipline is enforced by the monitor store.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Metrics {
    /// Individual endpoint probes recorded over the service lifetime
    pub total_tests: u64,
    pub total_failures: u64,
    /// Weighted running mean over all recorded probes
    pub avg_response_time_ms: f64,
    /// Lifetime success ratio, not time-windowed
    pub uptime: f64,
    #[schema(value_type = Option<String>)]
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_test_at: Option<OffsetDateTime>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            total_tests: 0,
            total_failures: 0,
            avg_response_time_ms: 0.0,
            uptime: 1.0,
            last_test_at: None,
        }
    }
}

impl Metrics {
    /// Fold a probe run into the aggregate.
    ///
    /// The mean is weighted by probe count so sweeps of different sizes
    /// contribute proportionally, instead of averaging per-sweep averages.
    pub fn absorb(&mut self, summary: &ProbeSummary, at: OffsetDateTime) {
        if summary.total > 0 {
            let prior = self.total_tests as f64;
            let added = summary.total as f64;
            let run_sum = summary.avg_response_time_ms * added;
            self.avg_response_time_ms =
                (self.avg_response_time_ms * prior + run_sum) / (prior + added);

            self.total_tests += summary.total as u64;
            self.total_failures += summary.failed as u64;
        }

        self.uptime = if self.total_tests == 0 {
            1.0
        } else {
            (self.total_tests - self.total_failures) as f64 / self.total_tests as f64
        };
        self.last_test_at = Some(at);
    }
}

/// Coarse service status derived from the rolling metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

/// Uptime bands, with an override when alerts pile up faster than the
/// lifetime ratio can reflect
pub fn health_status(metrics: &Metrics, alerts_last_24h: usize) -> HealthStatus {
    if alerts_last_24h > 5 {
        return HealthStatus::Unhealthy;
    }
    let uptime = if metrics.total_tests == 0 {
        1.0
    } else {
        metrics.uptime
    };

    if uptime >= 0.95 {
        HealthStatus::Healthy
    } else if uptime >= 0.90 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    }
}
