use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;

/// The three synthetic test kinds the prober runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// Single critical-path probe, every couple of minutes
    HealthCheck,
    /// Sequential sweep of the full endpoint list
    EndpointTest,
    /// Concurrent burst against the lightest endpoint
    PerformanceTest,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HealthCheck => "health_check",
            Self::EndpointTest => "endpoint_test",
            Self::PerformanceTest => "performance_test",
        }
    }
}

impl std::str::FromStr for ProbeKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "health_check" => Ok(Self::HealthCheck),
            "endpoint_test" => Ok(Self::EndpointTest),
            "performance_test" => Ok(Self::PerformanceTest),
            other => Err(AppError::Validation(format!("Unknown test kind: {}", other))),
        }
    }
}

/// One entry in the fixed probe target list
#[derive(Debug, Clone)]
pub struct EndpointSpec {
    pub path: &'static str,
    pub method: &'static str,
    /// A failure here raises a critical alert regardless of sweep rate
    pub critical: bool,
}

impl EndpointSpec {
    pub const fn get(path: &'static str, critical: bool) -> Self {
        Self {
            path,
            method: "GET",
            critical,
        }
    }
}

/// Outcome of probing a single endpoint
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EndpointResult {
    pub path: String,
    pub method: String,
    pub success: bool,
    pub status_code: Option<u16>,
    pub response_time_ms: i64,
    pub critical: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate over one probe run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema)]
pub struct ProbeSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub avg_response_time_ms: f64,
}

impl ProbeSummary {
    pub fn error_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failed as f64 / self.total as f64
        }
    }
}

/// One recorded prober run
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProbeReport {
    pub id: Uuid,
    pub kind: ProbeKind,
    #[schema(value_type = String)]
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub endpoints: Vec<EndpointResult>,
    pub summary: ProbeSummary,
    pub duration_ms: i64,
}

impl ProbeReport {
    pub fn new(kind: ProbeKind, started_at: OffsetDateTime, endpoints: Vec<EndpointResult>, duration_ms: i64) -> Self {
        let summary = summarize(&endpoints);
        Self {
            id: Uuid::new_v4(),
            kind,
            started_at,
            endpoints,
            summary,
            duration_ms,
        }
    }
}

fn summarize(endpoints: &[EndpointResult]) -> ProbeSummary {
    let total = endpoints.len();
    let passed = endpoints.iter().filter(|e| e.success).count();
    let failed = total - passed;
    let avg_response_time_ms = if total > 0 {
        endpoints.iter().map(|e| e.response_time_ms as f64).sum::<f64>() / total as f64
    } else {
        0.0
    };

    ProbeSummary {
        total,
        passed,
        failed,
        avg_response_time_ms,
    }
}

/// Threshold-breach categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HighErrorRate,
    SlowResponse,
    CriticalFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    High,
}

/// A recorded threshold breach derived from a probe run
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Alert {
    pub id: Uuid,
    pub kind: AlertKind,
    pub message: String,
    pub severity: Severity,
    #[schema(value_type = String)]
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    #[schema(value_type = Object)]
    pub detail: serde_json::Value,
}

impl Alert {
    pub fn new(kind: AlertKind, severity: Severity, message: String, detail: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            message,
            severity,
            at: OffsetDateTime::now_utc(),
            detail,
        }
    }
}
