/// Worker and relay tuning
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// How long a single broker poll waits before re-checking the shutdown flag
    pub poll_timeout_ms: u64,
    /// Transient failures tolerated per message before dead-lettering
    pub max_retries: u32,
    /// Outbox relay poll interval when the table is drained or publish failed
    pub outbox_poll_interval_ms: u64,
    /// Outbox rows fetched per relay pass
    pub outbox_batch_size: i64,
}

impl WorkerConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            poll_timeout_ms: std::env::var("WORKER_POLL_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            max_retries: std::env::var("WORKER_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            outbox_poll_interval_ms: std::env::var("OUTBOX_POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2000),
            outbox_batch_size: std::env::var("OUTBOX_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
        }
    }
}
