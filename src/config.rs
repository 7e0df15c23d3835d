use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    // Job store
    pub redis_url: String,

    // Server
    pub host: String,
    pub port: u16,

    // Workflow engine collaborator
    pub engine_base_url: String,
    pub engine_timeout_secs: u64,

    // Worker pools
    pub worker_poll_interval_ms: u64,
    pub stalled_after_secs: i64,

    // Terminal job retention (pruned periodically by the worker)
    pub keep_completed: usize,
    pub keep_failed: usize,
    pub prune_interval_secs: u64,

    // Prober
    pub probe_base_url: Option<String>,
    pub probe_health_interval_secs: u64,
    pub probe_sweep_interval_secs: u64,
    pub probe_perf_interval_secs: u64,
    pub probe_snapshot_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if exists

        Ok(Self {
            redis_url: env::var("REDIS_URL").map_err(|_| ConfigError::Missing("REDIS_URL"))?,

            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_var("PORT", 3000)?,

            engine_base_url: env::var("ENGINE_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:9000".to_string()),
            engine_timeout_secs: parse_var("ENGINE_TIMEOUT_SECS", 120)?,

            worker_poll_interval_ms: parse_var("WORKER_POLL_INTERVAL_MS", 500)?,
            stalled_after_secs: parse_var("STALLED_AFTER_SECS", 300)?,

            keep_completed: parse_var("KEEP_COMPLETED_JOBS", 100)?,
            keep_failed: parse_var("KEEP_FAILED_JOBS", 500)?,
            prune_interval_secs: parse_var("PRUNE_INTERVAL_SECS", 3600)?,

            probe_base_url: env::var("PROBE_BASE_URL").ok(),
            probe_health_interval_secs: parse_var("PROBE_HEALTH_INTERVAL_SECS", 120)?,
            probe_sweep_interval_secs: parse_var("PROBE_SWEEP_INTERVAL_SECS", 900)?,
            probe_perf_interval_secs: parse_var("PROBE_PERF_INTERVAL_SECS", 3600)?,
            probe_snapshot_interval_secs: parse_var("PROBE_SNAPSHOT_INTERVAL_SECS", 21600)?,
        })
    }

    /// Get server address as "host:port"
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL the prober targets; defaults to the service's own address
    pub fn probe_target(&self) -> String {
        self.probe_base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid environment variable: {0}")]
    Invalid(&'static str),
}
