//! Session tuning: log size, I/O timeouts, and reconnect backoff.

use std::time::Duration;

use rand::Rng;

use crate::output_log::DEFAULT_LOG_CAPACITY;

/// Reconnect backoff policy.
///
/// The delay before attempt `n + 1` is `initial * 2^(n - 1)`, capped at `max`.
/// With `jitter`, up to a quarter of the delay is added at random.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    /// Consecutive failed connections before the session stops retrying.
    /// A connection that drops before `reset_after` still counts as failed.
    pub max_attempts: u32,
    pub jitter: bool,
    /// How long a connection must stay up before the attempt count resets.
    pub reset_after: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(8),
            max_attempts: 5,
            jitter: true,
            reset_after: Duration::from_secs(5),
        }
    }
}

impl BackoffConfig {
    /// Delay to wait after `failed_attempts` consecutive failures (1-indexed).
    pub fn delay(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16);
        let base = self
            .initial
            .saturating_mul(1u32 << exponent)
            .min(self.max);

        if !self.jitter || base.is_zero() {
            return base;
        }
        let jitter_ms = (base.as_millis() as u64 / 4).max(1);
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    /// Whether another attempt is allowed after `failed_attempts` failures.
    pub fn should_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts < self.max_attempts
    }
}

/// Configuration for a `SessionManager`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Lines kept in the output log.
    pub log_capacity: usize,
    /// Upper bound on a single transport open.
    pub connect_timeout: Duration,
    /// Upper bound on a single command write.
    pub write_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            log_capacity: DEFAULT_LOG_CAPACITY,
            connect_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            backoff: BackoffConfig::default(),
        }
    }
}
