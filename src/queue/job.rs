use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;

/// The closed set of pipeline queues. Each queue has its own worker
/// concurrency ceiling, sized to the rate-limit sensitivity of the external
/// systems its handlers talk to (publishing is quota-limited, analytics is
/// not).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Generation,
    Testing,
    ContentCreation,
    Publishing,
    Notifications,
    Analytics,
}

impl QueueName {
    pub const ALL: [QueueName; 6] = [
        Self::Generation,
        Self::Testing,
        Self::ContentCreation,
        Self::Publishing,
        Self::Notifications,
        Self::Analytics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Testing => "testing",
            Self::ContentCreation => "content_creation",
            Self::Publishing => "publishing",
            Self::Notifications => "notifications",
            Self::Analytics => "analytics",
        }
    }

    /// Worker pool concurrency ceiling for this queue
    pub fn concurrency(&self) -> usize {
        match self {
            Self::Generation => 5,
            Self::Testing => 3,
            Self::ContentCreation => 2,
            Self::Publishing => 1,
            Self::Notifications => 10,
            Self::Analytics => 20,
        }
    }
}

impl std::str::FromStr for QueueName {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generation" => Ok(Self::Generation),
            "testing" => Ok(Self::Testing),
            "content_creation" => Ok(Self::ContentCreation),
            "publishing" => Ok(Self::Publishing),
            "notifications" => Ok(Self::Notifications),
            "analytics" => Ok(Self::Analytics),
            other => Err(AppError::Validation(format!("Unknown queue: {}", other))),
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Eligible for claiming
    Waiting,
    /// Ineligible until `delay_until` has passed
    Delayed,
    /// Claimed by a worker, handler in flight
    Active,
    /// Handler returned successfully
    Completed,
    /// Attempts exhausted
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Delayed => "delayed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Rule computing the delay before a failed job's next retry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum BackoffPolicy {
    Fixed { delay_ms: u64 },
    Exponential { base_delay_ms: u64, cap_ms: u64 },
}

impl BackoffPolicy {
    /// Delay before the next execution, given the number of attempts made so
    /// far (1-based: after the first failure `attempt` is 1).
    pub fn delay_for(&self, attempt: u32) -> std::time::Duration {
        let ms = match self {
            Self::Fixed { delay_ms } => *delay_ms,
            Self::Exponential {
                base_delay_ms,
                cap_ms,
            } => {
                let shift = attempt.saturating_sub(1).min(32);
                base_delay_ms
                    .saturating_mul(1u64 << shift)
                    .min(*cap_ms)
            }
        };
        std::time::Duration::from_millis(ms)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::Exponential {
            base_delay_ms: 2000,
            cap_ms: 300_000,
        }
    }
}

/// Enqueue-time scheduling options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueOptions {
    /// Lower value = higher priority; ties broken by insertion order
    pub priority: i32,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    /// Admit as delayed, eligible only after this many milliseconds
    pub delay_ms: Option<u64>,
}

impl EnqueueOptions {
    pub const DEFAULT_PRIORITY: i32 = 10;
    /// Priority assigned to customer-approved and paid requests
    pub const PAID_PRIORITY: i32 = 1;

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: Self::DEFAULT_PRIORITY,
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            delay_ms: None,
        }
    }
}

/// One unit of queued work: payload plus lifecycle state, attempt counter
/// and timing metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub queue: QueueName,

    /// Handler selector within the queue
    pub kind: String,

    /// Opaque, job-kind-specific payload
    pub payload: serde_json::Value,

    pub priority: i32,
    pub attempts: u32,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,

    #[serde(with = "time::serde::rfc3339::option")]
    pub delay_until: Option<OffsetDateTime>,

    pub state: JobState,

    /// Handler-reported, 0-100, monotone best-effort
    pub progress: u8,

    pub result: Option<serde_json::Value>,
    pub error: Option<String>,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub processed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,

    /// Last observed liveness signal while active; feeds stalled detection
    #[serde(with = "time::serde::rfc3339::option")]
    pub heartbeat_at: Option<OffsetDateTime>,
}

impl Job {
    pub fn new(
        queue: QueueName,
        kind: impl Into<String>,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        let delay_until = options
            .delay_ms
            .map(|ms| now + time::Duration::milliseconds(ms as i64));

        Self {
            id: Uuid::new_v4(),
            queue,
            kind: kind.into(),
            payload,
            priority: options.priority,
            attempts: 0,
            max_attempts: options.max_attempts,
            backoff: options.backoff,
            delay_until,
            state: if delay_until.is_some() {
                JobState::Delayed
            } else {
                JobState::Waiting
            },
            progress: 0,
            result: None,
            error: None,
            created_at: now,
            processed_at: None,
            finished_at: None,
            heartbeat_at: None,
        }
    }

    /// True once the job may leave the delayed state
    pub fn is_due(&self, now: OffsetDateTime) -> bool {
        match self.delay_until {
            Some(until) => until <= now,
            None => true,
        }
    }
}

/// Per-queue job counts bucketed by state
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema)]
pub struct QueueStats {
    pub waiting: u64,
    pub delayed: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    /// Active jobs with a lapsed heartbeat (observability only)
    pub stalled: u64,
}
