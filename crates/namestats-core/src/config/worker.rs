//! Background worker configuration.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// How the delay before the next attempt grows with the attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    /// The same delay before every retry.
    Fixed,
    /// Base delay doubled for every attempt already made.
    #[default]
    Exponential,
}

/// Background job worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WorkerConfig {
    /// Whether the worker pool is started by the server binary.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Number of concurrent workers polling the queue.
    #[serde(default = "default_concurrency")]
    #[validate(range(min = 1, max = 64))]
    pub concurrency: usize,
    /// Sleep between polls when the queue is empty, in milliseconds.
    #[serde(default = "default_poll_interval")]
    #[validate(range(min = 10))]
    pub poll_interval_ms: u64,
    /// Prefix for worker identifiers written to `locked_by`.
    #[serde(default = "default_worker_id_prefix")]
    #[validate(length(min = 1, max = 64))]
    pub worker_id_prefix: String,
    /// Attempts granted to newly enqueued jobs.
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 100))]
    pub max_attempts: i32,
    /// Backoff strategy between attempts.
    #[serde(default)]
    pub retry_strategy: RetryStrategy,
    /// Base retry delay in seconds.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_seconds: u64,
    /// Upper bound on the retry delay in seconds.
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_seconds: u64,
    /// Running jobs locked longer than this are released back to the queue at startup.
    #[serde(default = "default_stale_lock")]
    pub stale_lock_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval(),
            worker_id_prefix: default_worker_id_prefix(),
            max_attempts: default_max_attempts(),
            retry_strategy: RetryStrategy::default(),
            retry_base_delay_seconds: default_retry_base_delay(),
            retry_max_delay_seconds: default_retry_max_delay(),
            stale_lock_seconds: default_stale_lock(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_worker_id_prefix() -> String {
    "namestats-worker".to_string()
}

fn default_max_attempts() -> i32 {
    3
}

fn default_retry_base_delay() -> u64 {
    30
}

fn default_retry_max_delay() -> u64 {
    3600
}

fn default_stale_lock() -> u64 {
    1800
}
