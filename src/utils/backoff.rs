// src/utils/backoff.rs
//! Bounded exponential backoff for transport retries

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy shared by the job feed and the share submitter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor applied after each failed attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Attempts allowed before the failure is reported as persistent
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_attempts() -> u32 {
    6
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Tracks the state of one retry sequence
///
/// Each failure asks for the next delay; `None` means the attempt budget is
/// spent. A success should call [`Backoff::reset`].
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    attempts: u32,
    delay_ms: u64,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Backoff {
            delay_ms: config.initial_delay_ms,
            config,
            attempts: 0,
        }
    }

    /// Delay to wait before the next attempt, or `None` once exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.config.max_attempts {
            return None;
        }
        self.attempts += 1;

        let current = self.delay_ms.min(self.config.max_delay_ms);
        let grown = (self.delay_ms as f64 * self.config.multiplier.max(1.0)) as u64;
        self.delay_ms = grown.min(self.config.max_delay_ms);
        Some(Duration::from_millis(current))
    }

    /// The ceiling delay, used when retrying past exhaustion
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.config.max_delay_ms)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.delay_ms = self.config.initial_delay_ms;
    }
}
