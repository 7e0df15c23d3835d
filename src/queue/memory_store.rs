use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::queue::{
    EnqueueOptions, EventBus, EventKind, Job, JobState, JobStore, QueueName, QueueStats,
};

/// In-memory job store for tests and local development.
///
/// A single mutex over all jobs makes every transition atomic, which is what
/// gives `claim_next` its at-most-one-claimer guarantee here.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
    events: EventBus,
    stalled_after: time::Duration,
}

struct Inner {
    jobs: HashMap<Uuid, Job>,
}

impl InMemoryStore {
    pub fn new(events: EventBus) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                jobs: HashMap::new(),
            })),
            events,
            stalled_after: time::Duration::seconds(300),
        }
    }

    pub fn with_stalled_after(mut self, stalled_after: time::Duration) -> Self {
        self.stalled_after = stalled_after;
        self
    }

    fn is_stalled(&self, job: &Job, now: OffsetDateTime) -> bool {
        job.state == JobState::Active
            && job
                .heartbeat_at
                .map(|seen| now - seen > self.stalled_after)
                .unwrap_or(false)
    }

}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn enqueue(
        &self,
        queue: QueueName,
        kind: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> AppResult<Uuid> {
        let job = Job::new(queue, kind, payload, options);
        let job_id = job.id;
        let waiting = job.state == JobState::Waiting;

        let mut inner = self.inner.lock().await;
        inner.jobs.insert(job_id, job);
        drop(inner);

        if waiting {
            self.events.emit(queue, job_id, EventKind::Ready);
        }
        tracing::info!(job_id = %job_id, queue = %queue, kind = %kind, "Job enqueued");
        Ok(job_id)
    }

    async fn claim_next(&self, queue: QueueName) -> AppResult<Option<Job>> {
        let now = OffsetDateTime::now_utc();
        let mut inner = self.inner.lock().await;

        // Promote due delayed jobs before selecting
        let due: Vec<Uuid> = inner
            .jobs
            .values()
            .filter(|j| j.queue == queue && j.state == JobState::Delayed && j.is_due(now))
            .map(|j| j.id)
            .collect();
        for job_id in due {
            if let Some(job) = inner.jobs.get_mut(&job_id) {
                job.state = JobState::Waiting;
            }
            self.events.emit(queue, job_id, EventKind::Ready);
        }

        // Priority ascending, then insertion order
        let next = inner
            .jobs
            .values()
            .filter(|j| j.queue == queue && j.state == JobState::Waiting)
            .min_by_key(|j| (j.priority, j.created_at, j.id))
            .map(|j| j.id);

        let Some(job_id) = next else {
            return Ok(None);
        };

        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::NotFound("Job".to_string()))?;
        job.state = JobState::Active;
        job.processed_at = Some(now);
        job.heartbeat_at = Some(now);
        let claimed = job.clone();
        drop(inner);

        self.events.emit(queue, job_id, EventKind::Active);
        Ok(Some(claimed))
    }

    async fn complete(&self, job_id: Uuid, result: serde_json::Value) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::NotFound("Job".to_string()))?;

        job.state = JobState::Completed;
        job.progress = 100;
        job.result = Some(result);
        job.finished_at = Some(OffsetDateTime::now_utc());
        let queue = job.queue;
        drop(inner);

        self.events.emit(queue, job_id, EventKind::Completed);
        tracing::info!(job_id = %job_id, queue = %queue, "Job completed");
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> AppResult<()> {
        let now = OffsetDateTime::now_utc();
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::NotFound("Job".to_string()))?;

        job.attempts += 1;
        job.error = Some(error.to_string());
        let queue = job.queue;

        if job.attempts < job.max_attempts {
            let delay = job.backoff.delay_for(job.attempts);
            if delay.is_zero() {
                job.delay_until = None;
                job.state = JobState::Waiting;
            } else {
                job.delay_until = Some(now + delay);
                job.state = JobState::Delayed;
            }
            let attempts = job.attempts;
            drop(inner);

            self.events.emit(queue, job_id, EventKind::Retried);
            tracing::warn!(
                job_id = %job_id,
                queue = %queue,
                attempts = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Job attempt failed, retry scheduled"
            );
        } else {
            job.state = JobState::Failed;
            job.finished_at = Some(now);
            let attempts = job.attempts;
            drop(inner);

            self.events.emit(queue, job_id, EventKind::Failed);
            tracing::warn!(
                job_id = %job_id,
                queue = %queue,
                attempts = attempts,
                error = %error,
                "Job failed permanently"
            );
        }

        Ok(())
    }

    async fn update_progress(&self, job_id: Uuid, progress: u8) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::NotFound("Job".to_string()))?;

        // Monotone best-effort: never walk progress backwards
        job.progress = job.progress.max(progress.min(100));
        job.heartbeat_at = Some(OffsetDateTime::now_utc());
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> AppResult<Option<Job>> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.get(&job_id).cloned())
    }

    async fn stalled_jobs(&self, queue: QueueName) -> AppResult<Vec<Job>> {
        let now = OffsetDateTime::now_utc();
        let inner = self.inner.lock().await;
        Ok(inner
            .jobs
            .values()
            .filter(|j| j.queue == queue && self.is_stalled(j, now))
            .cloned()
            .collect())
    }

    async fn stats(&self, queue: QueueName) -> AppResult<QueueStats> {
        let now = OffsetDateTime::now_utc();
        let inner = self.inner.lock().await;
        let mut stats = QueueStats::default();

        for job in inner.jobs.values().filter(|j| j.queue == queue) {
            match job.state {
                JobState::Waiting => stats.waiting += 1,
                JobState::Delayed => stats.delayed += 1,
                JobState::Active => stats.active += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
            }
            if self.is_stalled(job, now) {
                stats.stalled += 1;
            }
        }

        Ok(stats)
    }

    async fn prune(
        &self,
        queue: QueueName,
        keep_completed: usize,
        keep_failed: usize,
    ) -> AppResult<u64> {
        let mut inner = self.inner.lock().await;
        let mut removed = 0u64;

        for (state, keep) in [
            (JobState::Completed, keep_completed),
            (JobState::Failed, keep_failed),
        ] {
            let mut terminal: Vec<(Option<OffsetDateTime>, Uuid)> = inner
                .jobs
                .values()
                .filter(|j| j.queue == queue && j.state == state)
                .map(|j| (j.finished_at, j.id))
                .collect();
            // Newest first; everything past the retention count goes
            terminal.sort_by(|a, b| b.0.cmp(&a.0));
            for (_, job_id) in terminal.into_iter().skip(keep) {
                inner.jobs.remove(&job_id);
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(queue = %queue, removed = removed, "Pruned terminal jobs");
        }
        Ok(removed)
    }
}
