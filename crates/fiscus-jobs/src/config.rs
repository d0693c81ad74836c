//! Job queue configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the job queue system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Redis connection configuration.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Worker pool configuration.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Queue retention configuration.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Lenient producer fallback: missing queues and unreachable stores
    /// log and return null instead of failing the caller.
    #[serde(default)]
    pub test_mode: bool,
}

impl JobsConfig {
    /// Build a config from defaults plus recognized environment variables:
    /// `REDIS_URL`, `FISCUS_TEST_MODE`, and `QUEUE_{NAME}_CONCURRENCY`
    /// (read lazily at worker registration via [`WorkerConfig::concurrency_for`]).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("REDIS_URL") {
            config.redis.url = url;
        }
        if let Ok(test_mode) = std::env::var("FISCUS_TEST_MODE") {
            config.test_mode = matches!(test_mode.as_str(), "1" | "true" | "yes");
        }
        config
    }
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Key prefix for all job-related keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_key_prefix() -> String {
    "fiscus:jobs".to_string()
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Default number of concurrent processors per queue.
    #[serde(default = "default_concurrency")]
    pub default_concurrency: usize,

    /// Polling interval in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Stall window in seconds: an active job whose lease is older than
    /// this is re-offered to another worker.
    #[serde(default = "default_stall_window")]
    pub stall_window_secs: u64,

    /// Shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            default_concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval(),
            stall_window_secs: default_stall_window(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl WorkerConfig {
    /// Concurrency for one queue, resolved from `QUEUE_{NAME}_CONCURRENCY`
    /// where `{NAME}` is the upper-cased queue name with hyphens replaced
    /// by underscores. Falls back to the configured default.
    pub fn concurrency_for(&self, queue_name: &str) -> usize {
        let env_key = format!(
            "QUEUE_{}_CONCURRENCY",
            queue_name.to_uppercase().replace('-', "_")
        );
        std::env::var(&env_key)
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n >= 1)
            .unwrap_or(self.default_concurrency)
    }

    /// Returns poll interval as Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the stall window as Duration.
    pub fn stall_window(&self) -> Duration {
        Duration::from_secs(self.stall_window_secs)
    }

    /// Returns shutdown timeout as Duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn default_concurrency() -> usize {
    5
}

fn default_poll_interval() -> u64 {
    100
}

fn default_stall_window() -> u64 {
    30
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// Queue retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Completed-history entries retained per queue (FIFO eviction).
    #[serde(default = "default_remove_on_complete")]
    pub remove_on_complete_window: usize,

    /// Failed-history entries retained per queue (FIFO eviction).
    #[serde(default = "default_remove_on_fail")]
    pub remove_on_fail_window: usize,

    /// Default DLQ prune horizon in days.
    #[serde(default = "default_dlq_prune_days")]
    pub dlq_prune_days: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            remove_on_complete_window: default_remove_on_complete(),
            remove_on_fail_window: default_remove_on_fail(),
            dlq_prune_days: default_dlq_prune_days(),
        }
    }
}

fn default_remove_on_complete() -> usize {
    100
}

fn default_remove_on_fail() -> usize {
    50
}

fn default_dlq_prune_days() -> u32 {
    30
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Enable the scheduler loop.
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,

    /// Tick poll interval in milliseconds.
    #[serde(default = "default_scheduler_poll")]
    pub poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            poll_interval_ms: default_scheduler_poll(),
        }
    }
}

impl SchedulerConfig {
    /// Returns poll interval as Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_scheduler_poll() -> u64 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = JobsConfig::default();
        assert_eq!(config.redis.url, "redis://localhost:6379");
        assert_eq!(config.redis.key_prefix, "fiscus:jobs");
        assert_eq!(config.worker.default_concurrency, 5);
        assert_eq!(config.queue.remove_on_complete_window, 100);
        assert_eq!(config.queue.remove_on_fail_window, 50);
        assert!(!config.test_mode);
    }

    #[test]
    fn test_concurrency_env_key_resolution() {
        let worker = WorkerConfig::default();

        std::env::set_var("QUEUE_SYNC_TRANSACTIONS_CONCURRENCY", "9");
        assert_eq!(worker.concurrency_for("sync-transactions"), 9);
        std::env::remove_var("QUEUE_SYNC_TRANSACTIONS_CONCURRENCY");

        // Unset and garbage values fall back to the default.
        assert_eq!(worker.concurrency_for("sync-transactions"), 5);
        std::env::set_var("QUEUE_ESG_UPDATES_CONCURRENCY", "zero");
        assert_eq!(worker.concurrency_for("esg-updates"), 5);
        std::env::remove_var("QUEUE_ESG_UPDATES_CONCURRENCY");
    }
}
