//! Retry delay computation.

use std::time::Duration;

use chrono::{DateTime, Utc};

use namestats_core::config::{RetryStrategy, WorkerConfig};

/// Backoff between attempts of the same job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    strategy: RetryStrategy,
    base: Duration,
    max: Duration,
}

impl RetryPolicy {
    /// Create a policy.
    pub fn new(strategy: RetryStrategy, base: Duration, max: Duration) -> Self {
        Self {
            strategy,
            base,
            max: max.max(base),
        }
    }

    /// Policy from the worker section of the configuration.
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            config.retry_strategy,
            Duration::from_secs(config.retry_base_delay_seconds),
            Duration::from_secs(config.retry_max_delay_seconds),
        )
    }

    /// Delay after `attempts` attempts have been made (1-based).
    pub fn delay(&self, attempts: i32) -> Duration {
        match self.strategy {
            RetryStrategy::Fixed => self.base,
            RetryStrategy::Exponential => {
                let exp = attempts.saturating_sub(1).clamp(0, 30) as u32;
                self.base
                    .checked_mul(1u32 << exp)
                    .map_or(self.max, |d| d.min(self.max))
            }
        }
    }

    /// When a job that has made `attempts` attempts may run again.
    pub fn next_retry_at(&self, now: DateTime<Utc>, attempts: i32) -> DateTime<Utc> {
        chrono::Duration::from_std(self.delay(attempts))
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_doubles_and_caps() {
        let policy = RetryPolicy::new(
            RetryStrategy::Exponential,
            Duration::from_secs(30),
            Duration::from_secs(100),
        );
        assert_eq!(policy.delay(1), Duration::from_secs(30));
        assert_eq!(policy.delay(2), Duration::from_secs(60));
        assert_eq!(policy.delay(3), Duration::from_secs(100));
        assert_eq!(policy.delay(90), Duration::from_secs(100));
    }

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy::new(
            RetryStrategy::Fixed,
            Duration::from_secs(5),
            Duration::from_secs(60),
        );
        assert_eq!(policy.delay(1), policy.delay(7));

        let now = Utc::now();
        assert_eq!(policy.next_retry_at(now, 2), now + chrono::Duration::seconds(5));
    }
}
