//! Environment-driven configuration for the dispatcher and worker binaries.
//!
//! Every tunable has a documented default so both processes start with no
//! environment at all. Values are read once at startup; there is no reload.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Settings for the coordinator process.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub listen_addr: SocketAddr,
    pub db_path: PathBuf,
    pub monitor_tick: Duration,
    pub worker_dead_after: Duration,
    pub default_lease_duration: Duration,
}

impl DispatcherConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let listen_addr = env_string("DISPATCHER_ADDR", "0.0.0.0:5000")
            .parse::<SocketAddr>()
            .map_err(|e| anyhow::anyhow!("Invalid DISPATCHER_ADDR: {}", e))?;

        Ok(Self {
            listen_addr,
            db_path: PathBuf::from(env_string("DB_PATH", "queue.db")),
            monitor_tick: Duration::from_secs(env_u64("MONITOR_TICK_SECS", 1)),
            worker_dead_after: Duration::from_secs(env_u64("WORKER_DEAD_AFTER_SECS", 60)),
            default_lease_duration: Duration::from_secs(env_u64("DEFAULT_LEASE_SECS", 120)),
        })
    }
}

/// Settings for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub dispatcher_url: String,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub cache_retry_interval: Duration,
    pub cache_ttl: Duration,
    pub cache_dir: PathBuf,
}

impl WorkerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let worker_id = std::env::var("WORKER_ID")
            .unwrap_or_else(|_| format!("worker_{}", uuid::Uuid::new_v4()));

        if worker_id.trim().is_empty() {
            anyhow::bail!("WORKER_ID must not be empty");
        }

        let dispatcher_url = env_string("DISPATCHER_URL", "http://localhost:5000");
        let dispatcher_url = dispatcher_url.trim_end_matches('/').to_string();

        Ok(Self {
            worker_id,
            dispatcher_url,
            poll_interval: Duration::from_secs(env_u64("POLL_INTERVAL_SECS", 5)),
            heartbeat_interval: Duration::from_secs(env_u64("HEARTBEAT_INTERVAL_SECS", 30)),
            cache_retry_interval: Duration::from_secs(env_u64("CACHE_RETRY_INTERVAL_SECS", 20)),
            cache_ttl: Duration::from_secs(env_u64("CACHE_TTL_SECS", 3600)),
            cache_dir: PathBuf::from(env_string("CACHE_DIR", "cache")),
        })
    }
}
