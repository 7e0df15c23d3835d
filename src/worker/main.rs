use std::sync::Arc;
use std::time::Duration;

use tokio::signal;

use flowforge::config::Config;
use flowforge::pipeline::{self, RemoteEngine};
use flowforge::probe::{ProbeSchedule, ProbeService};
use flowforge::queue::{EventBus, EventKind, JobStore, QueueName};
use flowforge::state::AppState;
use flowforge::workers::{PoolConfig, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting flowforge worker...");

    // Load configuration
    let config = Config::from_env()?;

    // Initialize application state
    tracing::info!("Connecting to job store...");
    let state = AppState::new(config.clone()).await?;
    tracing::info!("Job store connection established");

    // Wire the pipeline against the workflow engine collaborator and fail
    // fast if any (queue, kind) pair is missing its handler
    let engine = Arc::new(RemoteEngine::new(
        &config.engine_base_url,
        Duration::from_secs(config.engine_timeout_secs),
    )?);
    let registry = Arc::new(pipeline::build_registry(engine, state.store.clone())?);

    // Queue lifecycle events feed the worker log
    spawn_event_logger(state.events.clone());

    // One pool per queue, each with its own concurrency ceiling
    let mut pools = Vec::new();
    for queue in QueueName::ALL {
        pools.push(WorkerPool::start(
            queue,
            state.store.clone(),
            registry.clone(),
            PoolConfig::for_queue(queue, config.worker_poll_interval_ms),
        ));
    }

    // The prober self-tests the deployed HTTP surface on its own timers
    let probe = ProbeService::new(
        state.probe_runner.clone(),
        state.monitor.clone(),
        ProbeSchedule::from_config(&config),
    );
    probe.start().await;

    // Periodic retention pruning and stalled-job reporting
    let maintenance = tokio::spawn(maintenance_loop(
        state.store.clone(),
        state.events.clone(),
        config.clone(),
    ));

    tracing::info!("Worker started, waiting for jobs...");
    shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping worker...");

    probe.stop().await;
    maintenance.abort();
    for pool in pools {
        pool.shutdown().await;
    }

    tracing::info!("Worker shutdown complete");
    Ok(())
}

/// Log every queue lifecycle event at debug level
fn spawn_event_logger(events: EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    tracing::debug!(
                        queue = %event.queue,
                        job_id = %event.job_id,
                        kind = event.kind.as_str(),
                        "Queue event"
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped = skipped, "Event logger lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Prune terminal jobs past their retention counts and surface stalled jobs
async fn maintenance_loop(store: Arc<dyn JobStore>, events: EventBus, config: Config) {
    let mut ticker = tokio::time::interval(Duration::from_secs(config.prune_interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        for queue in QueueName::ALL {
            if let Err(e) = store
                .prune(queue, config.keep_completed, config.keep_failed)
                .await
            {
                tracing::warn!(queue = %queue, error = %e, "Prune failed");
            }

            match store.stalled_jobs(queue).await {
                Ok(stalled) => {
                    for job in stalled {
                        events.emit(queue, job.id, EventKind::Stalled);
                        tracing::warn!(
                            queue = %queue,
                            job_id = %job.id,
                            kind = %job.kind,
                            "Job appears stalled"
                        );
                    }
                }
                Err(e) => tracing::warn!(queue = %queue, error = %e, "Stalled check failed"),
            }
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
