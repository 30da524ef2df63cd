//! Retry configuration: exponential backoff with jitter and an optional
//! attempt budget, consumed by [`crate::stages::retry`].

use std::time::Duration;

use rand::RngExt;

/// Backoff policy for error-triggered upstream restarts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry. Doubles per attempt.
    pub min_backoff: Duration,
    /// Hard cap on the pre-jitter delay.
    pub max_backoff: Duration,
    /// Jitter fraction in `[0, 1]`: the computed delay is stretched by up to
    /// `base * random_factor`.
    pub random_factor: f64,
    /// Maximum number of retries; `None` retries indefinitely.
    pub max_retries: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            random_factor: 0.5,
            max_retries: None,
        }
    }
}

impl RetryConfig {
    pub fn new(min_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            min_backoff,
            max_backoff,
            ..Self::default()
        }
    }

    pub fn with_random_factor(mut self, random_factor: f64) -> Self {
        self.random_factor = random_factor;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Delay before retry number `attempt` (0-indexed), or `None` once the
    /// budget is spent.
    ///
    /// The pre-jitter delay is `min(max_backoff, min_backoff * 2^attempt)`;
    /// `2^attempt` is computed with a checked shift so large attempt counts
    /// saturate instead of overflowing.
    pub fn next_backoff(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_retries
            && attempt >= max
        {
            return None;
        }

        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let base = self
            .min_backoff
            .checked_mul(multiplier)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff);

        if self.random_factor <= 0.0 {
            return Some(base);
        }

        let jitter = base.mul_f64(self.random_factor * rand::rng().random_range(0.0..1.0));
        Some(base + jitter)
    }
}
