use async_trait::async_trait;
use redis::aio::ConnectionManager as RedisConnectionManager;
use redis::AsyncCommands;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::queue::{
    EnqueueOptions, EventBus, EventKind, Job, JobState, JobStore, QueueName, QueueStats,
};

/// Redis key layout:
/// - flowforge:job:{id}                    - String for job data (JSON)
/// - flowforge:queue:{name}:ready          - Zset of waiting job ids, scored
///   by priority band + created-at ms so ZPOPMIN yields priority order with
///   FIFO inside a band
/// - flowforge:queue:{name}:delayed        - Zset of delayed job ids scored
///   by their eligibility time in ms
/// - flowforge:queue:{name}:active         - Set of claimed job ids
/// - flowforge:queue:{name}:completed      - Zset of terminal ids scored by
///   finish time (prune trims oldest-first)
/// - flowforge:queue:{name}:failed         - Same, for exhausted jobs
const JOB_PREFIX: &str = "flowforge:job:";
const QUEUE_PREFIX: &str = "flowforge:queue:";

/// Multiplier separating priority bands in the ready zset score. Leaves room
/// for millisecond timestamps (~1.7e12) inside each band.
const PRIORITY_BAND: f64 = 1e13;

/// How many due delayed jobs one claim call will promote at most
const PROMOTE_BATCH: isize = 100;

/// Redis-backed job store implementation.
///
/// The claim contract rests on ZPOPMIN being atomic: concurrent claimers on
/// one queue each pop a distinct member or nothing.
#[derive(Clone)]
pub struct RedisStore {
    conn: RedisConnectionManager,
    events: EventBus,
    stalled_after: time::Duration,
}

impl RedisStore {
    pub fn new(conn: RedisConnectionManager, events: EventBus) -> Self {
        Self {
            conn,
            events,
            stalled_after: time::Duration::seconds(300),
        }
    }

    pub fn with_stalled_after(mut self, stalled_after: time::Duration) -> Self {
        self.stalled_after = stalled_after;
        self
    }

    fn job_key(id: Uuid) -> String {
        format!("{}{}", JOB_PREFIX, id)
    }

    fn ready_key(queue: QueueName) -> String {
        format!("{}{}:ready", QUEUE_PREFIX, queue.as_str())
    }

    fn delayed_key(queue: QueueName) -> String {
        format!("{}{}:delayed", QUEUE_PREFIX, queue.as_str())
    }

    fn active_key(queue: QueueName) -> String {
        format!("{}{}:active", QUEUE_PREFIX, queue.as_str())
    }

    fn terminal_key(queue: QueueName, state: JobState) -> String {
        format!("{}{}:{}", QUEUE_PREFIX, queue.as_str(), state.as_str())
    }

    fn epoch_ms(at: OffsetDateTime) -> f64 {
        (at.unix_timestamp_nanos() / 1_000_000) as f64
    }

    fn ready_score(job: &Job) -> f64 {
        job.priority as f64 * PRIORITY_BAND + Self::epoch_ms(job.created_at)
    }

    async fn save_job(&self, job: &Job) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let job_json = serde_json::to_string(job)?;
        let _: () = conn.set(Self::job_key(job.id), &job_json).await?;
        Ok(())
    }

    async fn load_job(&self, job_id: Uuid) -> AppResult<Option<Job>> {
        let mut conn = self.conn.clone();
        let job_json: Option<String> = conn.get(Self::job_key(job_id)).await?;
        match job_json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn require_job(&self, job_id: Uuid) -> AppResult<Job> {
        self.load_job(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Job".to_string()))
    }

    /// Move due delayed jobs into the ready zset. The guarded ZREM makes the
    /// promotion race-safe: only the caller that removed the member may
    /// re-admit it.
    async fn promote_due(&self, queue: QueueName, now: OffsetDateTime) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let due: Vec<String> = conn
            .zrangebyscore_limit(
                Self::delayed_key(queue),
                "-inf",
                Self::epoch_ms(now),
                0,
                PROMOTE_BATCH,
            )
            .await?;

        for id_str in due {
            let removed: i64 = conn.zrem(Self::delayed_key(queue), &id_str).await?;
            if removed == 0 {
                continue;
            }
            let job_id = parse_job_id(&id_str)?;
            if let Some(mut job) = self.load_job(job_id).await? {
                job.state = JobState::Waiting;
                self.save_job(&job).await?;
                let _: () = conn
                    .zadd(Self::ready_key(queue), &id_str, Self::ready_score(&job))
                    .await?;
                self.events.emit(queue, job_id, EventKind::Ready);
            }
        }
        Ok(())
    }
}

fn parse_job_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| AppError::Internal(format!("Invalid job id: {}", e)))
}

#[async_trait]
impl JobStore for RedisStore {
    async fn enqueue(
        &self,
        queue: QueueName,
        kind: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> AppResult<Uuid> {
        let job = Job::new(queue, kind, payload, options);
        let job_id = job.id;
        self.save_job(&job).await?;

        let mut conn = self.conn.clone();
        match job.state {
            JobState::Delayed => {
                let eligible = Self::epoch_ms(job.delay_until.unwrap_or(job.created_at));
                let _: () = conn
                    .zadd(Self::delayed_key(queue), job_id.to_string(), eligible)
                    .await?;
            }
            _ => {
                let _: () = conn
                    .zadd(
                        Self::ready_key(queue),
                        job_id.to_string(),
                        Self::ready_score(&job),
                    )
                    .await?;
                self.events.emit(queue, job_id, EventKind::Ready);
            }
        }

        tracing::info!(job_id = %job_id, queue = %queue, kind = %kind, "Job enqueued");
        Ok(job_id)
    }

    async fn claim_next(&self, queue: QueueName) -> AppResult<Option<Job>> {
        let now = OffsetDateTime::now_utc();
        self.promote_due(queue, now).await?;

        let mut conn = self.conn.clone();
        let popped: Vec<(String, f64)> = conn.zpopmin(Self::ready_key(queue), 1).await?;
        let Some((id_str, _score)) = popped.into_iter().next() else {
            return Ok(None);
        };

        let job_id = parse_job_id(&id_str)?;
        let mut job = self.require_job(job_id).await?;
        job.state = JobState::Active;
        job.processed_at = Some(now);
        job.heartbeat_at = Some(now);
        self.save_job(&job).await?;

        let _: () = conn.sadd(Self::active_key(queue), &id_str).await?;

        self.events.emit(queue, job_id, EventKind::Active);
        tracing::debug!(job_id = %job_id, queue = %queue, "Job claimed");
        Ok(Some(job))
    }

    async fn complete(&self, job_id: Uuid, result: serde_json::Value) -> AppResult<()> {
        let now = OffsetDateTime::now_utc();
        let mut job = self.require_job(job_id).await?;
        let queue = job.queue;

        job.state = JobState::Completed;
        job.progress = 100;
        job.result = Some(result);
        job.finished_at = Some(now);
        self.save_job(&job).await?;

        let mut conn = self.conn.clone();
        let _: () = conn
            .srem(Self::active_key(queue), job_id.to_string())
            .await?;
        let _: () = conn
            .zadd(
                Self::terminal_key(queue, JobState::Completed),
                job_id.to_string(),
                Self::epoch_ms(now),
            )
            .await?;

        self.events.emit(queue, job_id, EventKind::Completed);
        tracing::info!(job_id = %job_id, queue = %queue, "Job completed");
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> AppResult<()> {
        let now = OffsetDateTime::now_utc();
        let mut job = self.require_job(job_id).await?;
        let queue = job.queue;

        job.attempts += 1;
        job.error = Some(error.to_string());

        let mut conn = self.conn.clone();
        let _: () = conn
            .srem(Self::active_key(queue), job_id.to_string())
            .await?;

        if job.attempts < job.max_attempts {
            let delay = job.backoff.delay_for(job.attempts);
            if delay.is_zero() {
                job.delay_until = None;
                job.state = JobState::Waiting;
                self.save_job(&job).await?;
                let _: () = conn
                    .zadd(
                        Self::ready_key(queue),
                        job_id.to_string(),
                        Self::ready_score(&job),
                    )
                    .await?;
            } else {
                let until = now + delay;
                job.delay_until = Some(until);
                job.state = JobState::Delayed;
                self.save_job(&job).await?;
                let _: () = conn
                    .zadd(
                        Self::delayed_key(queue),
                        job_id.to_string(),
                        Self::epoch_ms(until),
                    )
                    .await?;
            }

            self.events.emit(queue, job_id, EventKind::Retried);
            tracing::warn!(
                job_id = %job_id,
                queue = %queue,
                attempts = job.attempts,
                error = %error,
                "Job attempt failed, retry scheduled"
            );
        } else {
            job.state = JobState::Failed;
            job.finished_at = Some(now);
            self.save_job(&job).await?;
            let _: () = conn
                .zadd(
                    Self::terminal_key(queue, JobState::Failed),
                    job_id.to_string(),
                    Self::epoch_ms(now),
                )
                .await?;

            self.events.emit(queue, job_id, EventKind::Failed);
            tracing::warn!(
                job_id = %job_id,
                queue = %queue,
                attempts = job.attempts,
                error = %error,
                "Job failed permanently"
            );
        }

        Ok(())
    }

    async fn update_progress(&self, job_id: Uuid, progress: u8) -> AppResult<()> {
        let mut job = self.require_job(job_id).await?;
        job.progress = job.progress.max(progress.min(100));
        job.heartbeat_at = Some(OffsetDateTime::now_utc());
        self.save_job(&job).await
    }

    async fn get_job(&self, job_id: Uuid) -> AppResult<Option<Job>> {
        self.load_job(job_id).await
    }

    async fn stalled_jobs(&self, queue: QueueName) -> AppResult<Vec<Job>> {
        let now = OffsetDateTime::now_utc();
        let mut conn = self.conn.clone();
        let active_ids: Vec<String> = conn.smembers(Self::active_key(queue)).await?;

        let mut stalled = Vec::new();
        for id_str in active_ids {
            let job_id = parse_job_id(&id_str)?;
            if let Some(job) = self.load_job(job_id).await? {
                let lapsed = job
                    .heartbeat_at
                    .map(|seen| now - seen > self.stalled_after)
                    .unwrap_or(false);
                if job.state == JobState::Active && lapsed {
                    stalled.push(job);
                }
            }
        }
        Ok(stalled)
    }

    async fn stats(&self, queue: QueueName) -> AppResult<QueueStats> {
        let mut conn = self.conn.clone();
        let waiting: u64 = conn.zcard(Self::ready_key(queue)).await?;
        let delayed: u64 = conn.zcard(Self::delayed_key(queue)).await?;
        let active: u64 = conn.scard(Self::active_key(queue)).await?;
        let completed: u64 = conn
            .zcard(Self::terminal_key(queue, JobState::Completed))
            .await?;
        let failed: u64 = conn
            .zcard(Self::terminal_key(queue, JobState::Failed))
            .await?;
        let stalled = self.stalled_jobs(queue).await?.len() as u64;

        Ok(QueueStats {
            waiting,
            delayed,
            active,
            completed,
            failed,
            stalled,
        })
    }

    async fn prune(
        &self,
        queue: QueueName,
        keep_completed: usize,
        keep_failed: usize,
    ) -> AppResult<u64> {
        let mut conn = self.conn.clone();
        let mut removed = 0u64;

        for (state, keep) in [
            (JobState::Completed, keep_completed),
            (JobState::Failed, keep_failed),
        ] {
            let key = Self::terminal_key(queue, state);
            let total: i64 = conn.zcard(&key).await?;
            let excess = total - keep as i64;
            if excess <= 0 {
                continue;
            }

            // Scores are finish times, so rank 0..excess is the oldest slice
            let last = (excess - 1) as isize;
            let old_ids: Vec<String> = conn.zrange(&key, 0, last).await?;
            for id_str in &old_ids {
                let job_id = parse_job_id(id_str)?;
                let _: () = conn.del(Self::job_key(job_id)).await?;
            }
            let _: () = conn.zremrangebyrank(&key, 0, last).await?;
            removed += old_ids.len() as u64;
        }

        if removed > 0 {
            tracing::debug!(queue = %queue, removed = removed, "Pruned terminal jobs");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_score_orders_priority_before_age() {
        let urgent = Job::new(
            QueueName::Generation,
            "generate_workflow",
            serde_json::json!({}),
            EnqueueOptions::default().with_priority(1),
        );
        let older_but_lazy = Job::new(
            QueueName::Generation,
            "generate_workflow",
            serde_json::json!({}),
            EnqueueOptions::default().with_priority(10),
        );

        // A priority-1 job always scores below a priority-10 job regardless
        // of creation order
        assert!(RedisStore::ready_score(&urgent) < RedisStore::ready_score(&older_but_lazy));
    }

    #[test]
    fn test_ready_score_is_fifo_within_band() {
        let first = Job::new(
            QueueName::Testing,
            "test_workflow",
            serde_json::json!({}),
            EnqueueOptions::default(),
        );
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = Job::new(
            QueueName::Testing,
            "test_workflow",
            serde_json::json!({}),
            EnqueueOptions::default(),
        );

        assert!(RedisStore::ready_score(&first) < RedisStore::ready_score(&second));
    }

    #[test]
    fn test_key_layout() {
        let id = Uuid::new_v4();
        assert_eq!(RedisStore::job_key(id), format!("flowforge:job:{}", id));
        assert_eq!(
            RedisStore::ready_key(QueueName::ContentCreation),
            "flowforge:queue:content_creation:ready"
        );
        assert_eq!(
            RedisStore::terminal_key(QueueName::Publishing, JobState::Failed),
            "flowforge:queue:publishing:failed"
        );
    }
}
