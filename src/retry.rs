//! Retry policies for transient broker conditions.
//!
//! The producer and consumer cores never sleep: a transient failure records
//! *when* the next attempt may happen and the poll loop picks it up once that
//! instant has passed. Delays come from `backon`'s exponential builder, so
//! every policy has jitter and a bounded ceiling.
//!
//! # Available Policies
//!
//! | Policy | Min Delay | Max Delay | Retries | Use Case |
//! |--------|-----------|-----------|---------|----------|
//! | [`RetryPolicy::produce`] | `retry.backoff.ms` | `retry.backoff.max.ms` | `message.send.max.retries` | Produce batches |
//! | [`RetryPolicy::fetch`] | `retry.backoff.ms` | `retry.backoff.max.ms` | unbounded | Fetch errors |
//! | [`RetryPolicy::coordinator`] | 50ms | 5s | 10 | Group coordinator calls |
//! | [`RetryPolicy::fast`] | 5ms | 100ms | 3 | Synchronous commits |

use std::time::{Duration, Instant};

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};

use crate::config::ClientConfig;

/// A named, configurable backoff policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    builder: ExponentialBuilder,
    max_retries: usize,
}

impl RetryPolicy {
    /// Build a policy with explicit bounds.
    pub fn new(min_delay: Duration, max_delay: Duration, max_retries: usize) -> Self {
        let builder = ExponentialBuilder::default()
            .with_min_delay(min_delay)
            .with_max_delay(max_delay.max(min_delay))
            .with_max_times(max_retries)
            .with_jitter();
        Self {
            builder,
            max_retries,
        }
    }

    /// Policy for produce batches.
    pub fn produce(config: &ClientConfig) -> Self {
        Self::new(
            config.retry_backoff,
            config.retry_backoff_max,
            config.message_send_max_retries as usize,
        )
    }

    /// Policy for fetch errors; retried until the partition is revoked.
    pub fn fetch(config: &ClientConfig) -> Self {
        Self::new(config.retry_backoff, config.retry_backoff_max, usize::MAX)
    }

    /// Policy for group coordinator operations (join, heartbeat).
    pub fn coordinator() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_secs(5), 10)
    }

    /// Policy for short synchronous retries.
    pub fn fast() -> Self {
        Self::new(Duration::from_millis(5), Duration::from_millis(100), 3)
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Start a fresh retry sequence.
    pub fn start(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            delays: self.builder.clone().build(),
            attempts: 0,
            retry_at: None,
        }
    }
}

/// Progress through one retry sequence.
pub struct Backoff {
    policy: RetryPolicy,
    delays: ExponentialBackoff,
    attempts: usize,
    retry_at: Option<Instant>,
}

impl std::fmt::Debug for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backoff")
            .field("attempts", &self.attempts)
            .field("retry_at", &self.retry_at)
            .finish()
    }
}

impl Backoff {
    /// Record a failure and schedule the next attempt.
    ///
    /// Returns `false` once the retry budget is exhausted.
    pub fn fail(&mut self) -> bool {
        match self.delays.next() {
            Some(delay) => {
                self.attempts += 1;
                self.retry_at = Some(Instant::now() + delay);
                true
            }
            None => {
                self.retry_at = None;
                false
            }
        }
    }

    /// Clear the failure history after a success.
    pub fn reset(&mut self) {
        self.delays = self.policy.builder.clone().build();
        self.attempts = 0;
        self.retry_at = None;
    }

    /// Whether an attempt may be made now.
    pub fn ready(&self) -> bool {
        self.retry_at.is_none_or(|at| Instant::now() >= at)
    }

    /// Instant of the next permitted attempt, if one is scheduled.
    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Failures recorded since the last success.
    pub fn attempts(&self) -> usize {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_budget_is_enforced() {
        let policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(2), 2);
        let mut backoff = policy.start();
        assert!(backoff.fail());
        assert!(backoff.fail());
        assert!(!backoff.fail());
        assert_eq!(backoff.attempts(), 2);
    }

    #[test]
    fn test_backoff_schedules_future_attempt() {
        let policy = RetryPolicy::new(Duration::from_secs(10), Duration::from_secs(20), 5);
        let mut backoff = policy.start();
        assert!(backoff.ready());
        assert!(backoff.fail());
        assert!(!backoff.ready());
        assert!(backoff.retry_at().unwrap() > Instant::now());
    }

    #[test]
    fn test_backoff_reset_restores_budget() {
        let policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(1), 1);
        let mut backoff = policy.start();
        assert!(backoff.fail());
        assert!(!backoff.fail());
        backoff.reset();
        assert!(backoff.ready());
        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.fail());
    }

    #[test]
    fn test_policy_from_config() {
        let mut config = ClientConfig::new();
        config.set("retries", "7").unwrap();
        assert_eq!(RetryPolicy::produce(&config).max_retries(), 7);
        assert_eq!(RetryPolicy::fetch(&config).max_retries(), usize::MAX);
        assert_eq!(RetryPolicy::coordinator().max_retries(), 10);
        assert_eq!(RetryPolicy::fast().max_retries(), 3);
    }
}
