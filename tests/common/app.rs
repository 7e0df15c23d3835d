use std::sync::Arc;

use axum_test::TestServer;
use flowforge::build_router;
use flowforge::config::Config;
use flowforge::probe::InMemoryMonitorStore;
use flowforge::queue::{EventBus, InMemoryStore};
use flowforge::state::AppState;

/// Test configuration; no external services are touched
pub fn test_config() -> Config {
    Config {
        redis_url: "redis://localhost:6379".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        engine_base_url: "http://localhost:9000".to_string(),
        engine_timeout_secs: 5,
        worker_poll_interval_ms: 10,
        stalled_after_secs: 300,
        keep_completed: 100,
        keep_failed: 500,
        prune_interval_secs: 3600,
        probe_base_url: None,
        probe_health_interval_secs: 120,
        probe_sweep_interval_secs: 900,
        probe_perf_interval_secs: 3600,
        probe_snapshot_interval_secs: 21600,
    }
}

/// Test application wrapper
pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
}

impl TestApp {
    /// Create a new test application backed by in-memory stores
    pub fn new() -> Self {
        let config = test_config();

        let events = EventBus::default();
        let store = Arc::new(InMemoryStore::new(events.clone()));
        let monitor = Arc::new(InMemoryMonitorStore::new());

        let state = AppState::with_stores(config, store, monitor, events)
            .expect("Failed to create test app state");

        let router = build_router(state.clone());
        let server = TestServer::new(router).expect("Failed to create test server");

        Self { server, state }
    }
}
