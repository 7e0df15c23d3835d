use std::sync::Arc;

use redis::aio::ConnectionManager as RedisConnectionManager;

use crate::config::Config;
use crate::probe::{MonitorStore, ProbeRunner, RedisMonitorStore, RunnerConfig};
use crate::queue::{EventBus, JobStore, RedisStore};

/// Application state shared across all handlers and worker tasks.
///
/// This is the composition root's wiring: stores, event bus and prober are
/// constructed here and injected everywhere else; nothing lives in
/// module-level globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn JobStore>,
    pub monitor: Arc<dyn MonitorStore>,
    pub events: EventBus,
    pub probe_runner: Arc<ProbeRunner>,
}

impl AppState {
    /// Create an AppState backed by Redis
    pub async fn new(config: Config) -> Result<Self, AppStateError> {
        let redis_client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| AppStateError::Redis(e.to_string()))?;
        let conn = RedisConnectionManager::new(redis_client)
            .await
            .map_err(|e| AppStateError::Redis(e.to_string()))?;

        let events = EventBus::default();
        let store: Arc<dyn JobStore> = Arc::new(
            RedisStore::new(conn.clone(), events.clone())
                .with_stalled_after(time::Duration::seconds(config.stalled_after_secs)),
        );
        let monitor: Arc<dyn MonitorStore> = Arc::new(RedisMonitorStore::new(conn));

        Self::assemble(config, store, monitor, events)
    }

    /// Create an AppState with injected stores (used by tests and anywhere
    /// a Redis instance is undesirable)
    pub fn with_stores(
        config: Config,
        store: Arc<dyn JobStore>,
        monitor: Arc<dyn MonitorStore>,
        events: EventBus,
    ) -> Result<Self, AppStateError> {
        Self::assemble(config, store, monitor, events)
    }

    fn assemble(
        config: Config,
        store: Arc<dyn JobStore>,
        monitor: Arc<dyn MonitorStore>,
        events: EventBus,
    ) -> Result<Self, AppStateError> {
        let probe_runner = Arc::new(
            ProbeRunner::new(config.probe_target(), monitor.clone(), RunnerConfig::default())
                .map_err(|e| AppStateError::Probe(e.to_string()))?,
        );

        Ok(Self {
            config,
            store,
            monitor,
            events,
            probe_runner,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppStateError {
    #[error("Redis connection error: {0}")]
    Redis(String),

    #[error("Probe runner error: {0}")]
    Probe(String),
}
