//! Bounded retry with linear backoff.
//!
//! Only transport timeouts, connect failures and 5xx responses are retried.
//! 4xx codes are never retried blindly: 409/422 need the caller's merge
//! logic and 429 is surfaced as `RateLimitExceeded` straight away.

use std::time::Duration;

use aowl_core::config::RemoteConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl From<&RemoteConfig> for RetryPolicy {
    fn from(cfg: &RemoteConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.base_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    (500..=599).contains(&status)
}

pub fn is_retryable_transport(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}
