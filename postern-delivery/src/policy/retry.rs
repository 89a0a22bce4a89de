//! Retry policy for relay sends.
//!
//! A delivery intent gets one initial attempt plus up to `max_retries`
//! retries, separated by exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy configuration for relay sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt of an intent.
    ///
    /// Default: 3, so at most 4 attempts in total
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff (in milliseconds).
    ///
    /// The delay before retry `n` is `base * 2^(n - 1)`.
    ///
    /// Default: 500 milliseconds
    #[serde(default = "defaults::base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum delay between attempts (in milliseconds).
    ///
    /// Default: 30000 milliseconds
    #[serde(default = "defaults::max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter factor for randomizing retry delays.
    ///
    /// The delay is randomized within ±`jitter_factor`, so workers that hit
    /// the same relay outage do not retry in lockstep.
    ///
    /// Default: 0.2 (±20%)
    #[serde(default = "defaults::jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::max_retries(),
            base_delay_ms: defaults::base_delay_ms(),
            max_delay_ms: defaults::max_delay_ms(),
            jitter_factor: defaults::jitter_factor(),
        }
    }
}

impl RetryPolicy {
    /// Total attempts an intent may make.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    #[must_use]
    pub const fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts()
    }

    /// Attempts left after `attempts_made`, `0` once exhausted.
    #[must_use]
    pub const fn remaining_attempts(&self, attempts_made: u32) -> u32 {
        self.max_attempts().saturating_sub(attempts_made)
    }

    /// Delay to wait before retry number `retry` (1-indexed).
    ///
    /// # Formula
    /// `delay = min(base * 2^(retry - 1), max_delay) * (1 ± jitter)`
    #[must_use]
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let delay = if exponent >= 63 {
            self.max_delay_ms
        } else {
            let multiplier = 1u64 << exponent;
            self.base_delay_ms
                .saturating_mul(multiplier)
                .min(self.max_delay_ms)
        };

        if self.jitter_factor <= 0.0 {
            return Duration::from_millis(delay);
        }

        // Intentional precision loss and casting for randomization
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let jittered = {
            let jitter_range = (delay as f64) * self.jitter_factor;
            let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
            ((delay as f64) + jitter).max(0.0) as u64
        };

        Duration::from_millis(jittered)
    }
}

mod defaults {
    pub const fn max_retries() -> u32 {
        3
    }

    pub const fn base_delay_ms() -> u64 {
        500
    }

    pub const fn max_delay_ms() -> u64 {
        30_000
    }

    pub const fn jitter_factor() -> f64 {
        0.2 // ±20%
    }
}
