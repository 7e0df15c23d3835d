pub mod events;
pub mod job;
pub mod memory_store;
pub mod redis_store;

pub use events::{EventBus, EventKind, QueueEvent};
pub use job::{BackoffPolicy, EnqueueOptions, Job, JobState, QueueName, QueueStats};
pub use memory_store::InMemoryStore;
pub use redis_store::RedisStore;

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppResult;

/// Job store trait for abstracting queue backends.
///
/// The store is the single source of truth for job state; all transitions go
/// through it. `claim_next` is the concurrency-critical operation: however
/// many workers race on one queue, a given job is handed to at most one of
/// them.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Admit a job into a queue, waiting or delayed depending on options
    async fn enqueue(
        &self,
        queue: QueueName,
        kind: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> AppResult<Uuid>;

    /// Claim the highest-priority, earliest-eligible waiting job, marking it
    /// active. Returns `None` when nothing is eligible.
    async fn claim_next(&self, queue: QueueName) -> AppResult<Option<Job>>;

    /// Terminal success: store the result and stamp `finished_at`
    async fn complete(&self, job_id: Uuid, result: serde_json::Value) -> AppResult<()>;

    /// Record a failed attempt. Reschedules with backoff while attempts
    /// remain, otherwise marks the job terminally failed.
    async fn fail(&self, job_id: Uuid, error: &str) -> AppResult<()>;

    /// Handler-reported progress, clamped to 0-100 and never decreasing
    async fn update_progress(&self, job_id: Uuid, progress: u8) -> AppResult<()>;

    /// Idempotent snapshot of a job
    async fn get_job(&self, job_id: Uuid) -> AppResult<Option<Job>>;

    /// Per-state counts for one queue
    async fn stats(&self, queue: QueueName) -> AppResult<QueueStats>;

    /// Active jobs whose liveness heartbeat lapsed. Observability only;
    /// nothing is requeued.
    async fn stalled_jobs(&self, queue: QueueName) -> AppResult<Vec<Job>>;

    /// Counts for every queue in the closed set
    async fn all_stats(&self) -> AppResult<HashMap<QueueName, QueueStats>> {
        let mut stats = HashMap::new();
        for queue in QueueName::ALL {
            stats.insert(queue, self.stats(queue).await?);
        }
        Ok(stats)
    }

    /// Drop terminal jobs beyond the retention counts, oldest first.
    /// Returns the number of jobs removed.
    async fn prune(
        &self,
        queue: QueueName,
        keep_completed: usize,
        keep_failed: usize,
    ) -> AppResult<u64>;
}
