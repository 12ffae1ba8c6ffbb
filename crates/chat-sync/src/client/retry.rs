//! Reconnect backoff and failure counting for the event stream.

use crate::protocol::defaults;
use std::time::Duration;

/// Configuration for stream reconnect behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Consecutive failures after which the stream gives up and asks for
    /// REST polling.
    pub failure_threshold: u32,
    /// Delay before the first reconnect.
    pub initial_backoff: Duration,
    /// Upper bound for the reconnect delay.
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            failure_threshold: defaults::FAILURE_THRESHOLD,
            initial_backoff: Duration::from_millis(defaults::RECONNECT_INITIAL_MS),
            max_backoff: Duration::from_millis(defaults::RECONNECT_MAX_MS),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    #[must_use]
    pub fn with_initial_backoff(mut self, duration: Duration) -> Self {
        self.initial_backoff = duration;
        self
    }

    #[must_use]
    pub fn with_max_backoff(mut self, duration: Duration) -> Self {
        self.max_backoff = duration;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reconnect after the given delay.
    Retry(Duration),
    /// Threshold reached: stop and hand over to polling.
    Fallback,
}

#[derive(Debug, Clone)]
pub struct RetryState {
    pub consecutive_failures: u32,
    pub current_backoff: Duration,
    config: RetryConfig,
}

impl RetryState {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            consecutive_failures: 0,
            current_backoff: config.initial_backoff,
            config,
        }
    }

    pub fn record_failure(&mut self) -> RetryDecision {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.config.failure_threshold {
            return RetryDecision::Fallback;
        }

        let wait = self.current_backoff;
        self.current_backoff = std::cmp::min(
            self.current_backoff + Duration::from_secs(1),
            self.config.max_backoff,
        );
        RetryDecision::Retry(wait)
    }

    /// Called on every successful connect.
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.current_backoff = self.config.initial_backoff;
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}
