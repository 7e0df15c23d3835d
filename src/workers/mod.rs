use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{watch, Semaphore};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::queue::{Job, JobStore, QueueName};

/// A unit-of-work implementation for one (queue, kind) pair. The returned
/// value becomes the job's `result`; a returned error is routed through the
/// retry policy.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: &Job, progress: ProgressHandle) -> AppResult<serde_json::Value>;
}

/// Progress-reporting capability handed to handlers. Failures to write
/// progress are observability losses, not job failures.
#[derive(Clone)]
pub struct ProgressHandle {
    store: Arc<dyn JobStore>,
    job_id: Uuid,
}

impl ProgressHandle {
    pub fn new(store: Arc<dyn JobStore>, job_id: Uuid) -> Self {
        Self { store, job_id }
    }

    pub async fn report(&self, progress: u8) {
        if let Err(e) = self.store.update_progress(self.job_id, progress).await {
            tracing::warn!(job_id = %self.job_id, error = %e, "Failed to report progress");
        }
    }
}

/// Typed handler registry keyed by (queue, job kind).
///
/// Registration happens once at worker startup; `validate` then checks the
/// full expected set so a missing handler is a startup configuration error,
/// never a surprise at dispatch time.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(QueueName, String), Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        queue: QueueName,
        kind: &str,
        handler: Arc<dyn JobHandler>,
    ) -> AppResult<()> {
        let key = (queue, kind.to_string());
        if self.handlers.contains_key(&key) {
            return Err(AppError::Config(format!(
                "Handler already registered for {}/{}",
                queue, kind
            )));
        }
        self.handlers.insert(key, handler);
        Ok(())
    }

    pub fn get(&self, queue: QueueName, kind: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&(queue, kind.to_string())).cloned()
    }

    /// Fail fast if any expected (queue, kind) pair has no handler
    pub fn validate(&self, expected: &[(QueueName, &str)]) -> AppResult<()> {
        let missing: Vec<String> = expected
            .iter()
            .filter(|(queue, kind)| !self.handlers.contains_key(&(*queue, kind.to_string())))
            .map(|(queue, kind)| format!("{}/{}", queue, kind))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::Config(format!(
                "Missing job handlers: {}",
                missing.join(", ")
            )))
        }
    }
}

/// Configuration for one queue's worker pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum concurrent handler invocations
    pub concurrency: usize,
    /// Sleep between claim attempts when the queue is empty
    pub poll_interval: Duration,
}

impl PoolConfig {
    pub fn for_queue(queue: QueueName, poll_interval_ms: u64) -> Self {
        Self {
            concurrency: queue.concurrency(),
            poll_interval: Duration::from_millis(poll_interval_ms),
        }
    }
}

/// Handle for stopping a running worker pool
pub struct PoolHandle {
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl PoolHandle {
    /// Signal shutdown and wait for in-flight handlers to drain
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

/// Per-queue worker pool: claims eligible jobs and runs their handlers with
/// bounded concurrency. Handler errors and panics are captured into `fail`;
/// the claim loop itself never dies.
pub struct WorkerPool;

impl WorkerPool {
    pub fn start(
        queue: QueueName,
        store: Arc<dyn JobStore>,
        registry: Arc<HandlerRegistry>,
        config: PoolConfig,
    ) -> PoolHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_pool(queue, store, registry, config, shutdown_rx));

        PoolHandle {
            shutdown: shutdown_tx,
            handle,
        }
    }
}

async fn run_pool(
    queue: QueueName,
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    config: PoolConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let semaphore = Arc::new(Semaphore::new(config.concurrency));

    tracing::info!(
        queue = %queue,
        concurrency = config.concurrency,
        "Worker pool started"
    );

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // Hold a permit before claiming so claims never outrun the ceiling
        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown_rx.changed() => continue,
        };

        match store.claim_next(queue).await {
            Ok(Some(job)) => {
                let store = store.clone();
                let registry = registry.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    execute_one(store, registry, job).await;
                });
            }
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    _ = tokio::time::sleep(config.poll_interval) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
            Err(e) => {
                drop(permit);
                tracing::error!(queue = %queue, error = %e, "Error claiming job");
                // Brief sleep on store errors to prevent a tight loop
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
        }
    }

    // Wait for in-flight handlers to finish before reporting shutdown
    let _ = semaphore.acquire_many(config.concurrency as u32).await;
    tracing::info!(queue = %queue, "Worker pool stopped");
}

async fn execute_one(store: Arc<dyn JobStore>, registry: Arc<HandlerRegistry>, job: Job) {
    let job_id = job.id;
    let queue = job.queue;

    let Some(handler) = registry.get(queue, &job.kind) else {
        // Startup validation makes this unreachable in a correctly wired
        // worker; an unknown kind from a foreign producer lands here
        let msg = format!("No handler registered for {}/{}", queue, job.kind);
        tracing::error!(job_id = %job_id, queue = %queue, kind = %job.kind, "{}", msg);
        if let Err(e) = store.fail(job_id, &msg).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to mark job as failed");
        }
        return;
    };

    let progress = ProgressHandle::new(store.clone(), job_id);
    tracing::info!(job_id = %job_id, queue = %queue, kind = %job.kind, "Processing job");

    let outcome = AssertUnwindSafe(handler.run(&job, progress)).catch_unwind().await;

    match outcome {
        Ok(Ok(result)) => {
            if let Err(e) = store.complete(job_id, result).await {
                tracing::error!(job_id = %job_id, error = %e, "Failed to mark job as complete");
            }
        }
        Ok(Err(err)) => {
            if let Err(e) = store.fail(job_id, &err.to_string()).await {
                tracing::error!(job_id = %job_id, error = %e, "Failed to mark job as failed");
            }
        }
        Err(_) => {
            if let Err(e) = store.fail(job_id, "Handler panicked").await {
                tracing::error!(job_id = %job_id, error = %e, "Failed to mark job as failed");
            }
        }
    }
}
