//! Retry policy for dispatch attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::queue::retry::calculate_backoff;

/// Retry configuration for failed deliveries.
///
/// A failed attempt is retried while the number of attempts made is below
/// `max_attempts`. Each retry waits `base * 2^(attempt - 1)` milliseconds,
/// capped at `max_retry_delay_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts a unit gets, including the first.
    ///
    /// Default: 3 attempts
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff (in milliseconds).
    ///
    /// Default: 1000 ms
    #[serde(default = "defaults::base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,

    /// Maximum retry delay (in milliseconds).
    ///
    /// Default: 3600000 ms (1 hour)
    #[serde(default = "defaults::max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Jitter factor for randomizing retry delays, within ±`jitter_factor`.
    ///
    /// Default: 0.0 (no jitter)
    #[serde(default = "defaults::retry_jitter_factor")]
    pub retry_jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_retry_delay_ms: defaults::base_retry_delay_ms(),
            max_retry_delay_ms: defaults::max_retry_delay_ms(),
            retry_jitter_factor: defaults::retry_jitter_factor(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a unit that has made `attempts_made` attempts gets another.
    #[must_use]
    pub const fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay before the retry following attempt number `attempts_made`.
    #[must_use]
    pub fn backoff(&self, attempts_made: u32) -> Duration {
        calculate_backoff(
            attempts_made,
            self.base_retry_delay_ms,
            self.max_retry_delay_ms,
            self.retry_jitter_factor,
        )
    }

    /// Attempts left after `attempts_made`.
    #[must_use]
    pub const fn remaining_attempts(&self, attempts_made: u32) -> u32 {
        self.max_attempts.saturating_sub(attempts_made)
    }

    /// Whether the attempt about to be made is the last one.
    #[must_use]
    pub const fn is_final_attempt(&self, attempts_made: u32) -> bool {
        attempts_made.saturating_add(1) >= self.max_attempts
    }
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        3
    }

    pub const fn base_retry_delay_ms() -> u64 {
        1000
    }

    pub const fn max_retry_delay_ms() -> u64 {
        60 * 60 * 1000
    }

    pub const fn retry_jitter_factor() -> f64 {
        0.0
    }
}
