use std::cmp::min;
use tokio::time::Duration;

use crate::config::Config;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(120),
            exponential_base: 2.0,
        }
    }
}

impl From<&Config> for RetryConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            ..Self::default()
        }
    }
}

impl RetryConfig {
    /// Pause before retry number `attempt` (1-based).
    pub fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.base_delay.as_millis() as f64
            * self.exponential_base.powi(attempt.saturating_sub(1) as i32);

        let delay = Duration::from_millis(delay_ms.min(u64::MAX as f64) as u64);
        min(delay, self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { after: Duration },
    GiveUp,
}

/// Consecutive failures of the group currently in flight
#[derive(Debug, Default, Clone)]
pub struct RetryState {
    consecutive_failures: u32,
}

impl RetryState {
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Count a failed attempt. Past the ceiling the state resets and the
    /// group is to be abandoned.
    pub fn record_failure(&mut self, config: &RetryConfig) -> RetryDecision {
        self.consecutive_failures += 1;

        if self.consecutive_failures > config.max_retries {
            self.consecutive_failures = 0;
            return RetryDecision::GiveUp;
        }

        RetryDecision::Retry {
            after: config.calculate_backoff_delay(self.consecutive_failures),
        }
    }
}
