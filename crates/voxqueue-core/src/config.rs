//! Environment-driven configuration: `QueueConfig` and `WorkerConfig`
//! structs, each with a `from_env()` constructor reading named variables
//! with sane defaults.

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Queue-level defaults: retry/backoff tuning and the default enqueue batch
/// size. Individual `Queue::retry` calls may override `max_attempts` and
/// `visibility_timeout` per call (the retry worker does, via `WorkerConfig`).
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub database_url: String,
    pub max_attempts: u32,
    pub visibility_timeout_secs: u64,
    pub retry_backoff_multiplier: f64,
    pub retry_base_delay_secs: f64,
    pub max_retry_delay_secs: f64,
    pub batch_size: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/queue.db".to_string(),
            max_attempts: 3,
            visibility_timeout_secs: 3600,
            retry_backoff_multiplier: 2.0,
            retry_base_delay_secs: 60.0,
            max_retry_delay_secs: 3600.0,
            batch_size: 100,
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            database_url: env_string_or("QUEUE_DATABASE_URL", &default.database_url),
            max_attempts: env_or("QUEUE_MAX_ATTEMPTS", default.max_attempts),
            visibility_timeout_secs: env_or(
                "QUEUE_VISIBILITY_TIMEOUT",
                default.visibility_timeout_secs,
            ),
            retry_backoff_multiplier: env_or(
                "QUEUE_RETRY_BACKOFF_MULTIPLIER",
                default.retry_backoff_multiplier,
            ),
            retry_base_delay_secs: env_or("QUEUE_RETRY_BASE_DELAY", default.retry_base_delay_secs),
            max_retry_delay_secs: env_or("QUEUE_MAX_RETRY_DELAY", default.max_retry_delay_secs),
            batch_size: env_or("QUEUE_BATCH_SIZE", default.batch_size),
        }
    }
}

/// Tuning for the two worker loops.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub worker_poll_delay_secs: u64,
    pub worker_batch_size: u32,

    pub retry_worker_poll_delay_secs: u64,
    pub retry_worker_batch_size: u32,
    pub retry_worker_visibility_timeout_secs: u64,
    pub retry_worker_max_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_poll_delay_secs: 5,
            worker_batch_size: 5,
            retry_worker_poll_delay_secs: 30,
            retry_worker_batch_size: 5,
            retry_worker_visibility_timeout_secs: 3600,
            retry_worker_max_attempts: 3,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            worker_poll_delay_secs: env_or("WORKER_POLL_DELAY", default.worker_poll_delay_secs),
            worker_batch_size: env_or("WORKER_BATCH_SIZE", default.worker_batch_size),
            retry_worker_poll_delay_secs: env_or(
                "RETRY_WORKER_POLL_DELAY",
                default.retry_worker_poll_delay_secs,
            ),
            retry_worker_batch_size: env_or(
                "RETRY_WORKER_BATCH_SIZE",
                default.retry_worker_batch_size,
            ),
            retry_worker_visibility_timeout_secs: env_or(
                "RETRY_WORKER_VISIBILITY_TIMEOUT",
                default.retry_worker_visibility_timeout_secs,
            ),
            retry_worker_max_attempts: env_or(
                "RETRY_WORKER_MAX_ATTEMPTS",
                default.retry_worker_max_attempts,
            ),
        }
    }
}

/// Infrastructure-error backoff shared by both worker loops, so a database
/// blip doesn't turn into a tight error loop.
pub const WORKER_ERROR_BACKOFF_SECS: u64 = 5;

/// Per-item synthesis deadline.
pub const SYNTHESIS_ITEM_DEADLINE_SECS: u64 = 30;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_reference_values() {
        let qc = QueueConfig::default();
        assert_eq!(qc.max_attempts, 3);
        assert_eq!(qc.visibility_timeout_secs, 3600);
        assert_eq!(qc.retry_base_delay_secs, 60.0);
        assert_eq!(qc.retry_backoff_multiplier, 2.0);
        assert_eq!(qc.max_retry_delay_secs, 3600.0);

        let wc = WorkerConfig::default();
        assert_eq!(wc.worker_poll_delay_secs, 5);
        assert_eq!(wc.worker_batch_size, 5);
        assert_eq!(wc.retry_worker_poll_delay_secs, 30);
    }
}
