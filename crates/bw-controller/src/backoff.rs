//! Exponential backoff for provisioning retries

use std::time::Duration;

use bw_core::config::BackoffConfig;

/// Exponential backoff with jitter, tracking how many delays it has handed out
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay returned by the next call, before jitter
    current: Duration,
    /// Maximum delay
    max: Duration,
    /// Multiplier
    multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter: f64,
    /// Delays handed out so far
    attempts: u32,
}

impl ExponentialBackoff {
    /// Create a new backoff from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial_ms, config.max, config.multiplier, config.jitter)
    }

    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            current: std::cmp::min(initial, max),
            max,
            multiplier,
            jitter,
            attempts: 0,
        }
    }

    /// Get the next delay and advance the backoff
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.attempts = self.attempts.saturating_add(1);

        let next = Duration::from_secs_f64(self.current.as_secs_f64() * self.multiplier);
        self.current = std::cmp::min(next, self.max);

        let jitter_amount = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        std::cmp::min(delay + Duration::from_secs_f64(jitter_amount), self.max)
    }

    /// Number of delays handed out since creation
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
