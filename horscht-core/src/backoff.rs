// ABOUTME: Exponential backoff between reconnect attempts (broker health check, chat sync loop).
// ABOUTME: Delays go 2s, 4s, 8s... capped at 60s; a success resets the sequence.

use std::time::Duration;
use tokio::time::Instant;

/// Backoff configuration for reconnect attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Multiplier applied after each failure
    pub multiplier: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 2,
        }
    }
}

/// Tracks consecutive failures and when the next attempt is allowed.
#[derive(Debug, Clone)]
pub struct BackoffState {
    config: BackoffConfig,
    consecutive_failures: u32,
    current_delay: Duration,
    retry_after: Option<Instant>,
}

impl BackoffState {
    pub fn new(config: BackoffConfig) -> Self {
        let current_delay = config.initial_delay;
        Self {
            config,
            consecutive_failures: 0,
            current_delay,
            retry_after: None,
        }
    }

    /// Record a successful attempt (resets backoff)
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.current_delay = self.config.initial_delay;
        self.retry_after = None;
    }

    /// Record a failure at `now` and return the delay before the next attempt.
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        let delay = self.current_delay;
        self.current_delay = std::cmp::min(
            self.current_delay.saturating_mul(self.config.multiplier),
            self.config.max_delay,
        );
        self.retry_after = Some(now + delay);
        delay
    }

    /// Whether an attempt may be made at `now`
    pub fn ready(&self, now: Instant) -> bool {
        self.retry_after.is_none_or(|at| now >= at)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Delay that the next failure would return
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
