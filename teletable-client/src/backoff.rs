//! Reconnect backoff.

use crate::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter for reconnect attempts.
pub(crate) struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current: config.initial,
            config,
        }
    }

    /// The delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        let next = self
            .current
            .checked_mul(self.config.factor)
            .unwrap_or(self.config.max);
        self.current = next.min(self.config.max);
        jittered(base, self.config.jitter)
    }

    /// Restores the initial delay after a successful connect.
    pub fn reset(&mut self) {
        self.current = self.config.initial;
    }
}

fn jittered(base: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return base;
    }
    let spread = rand::rng().random_range(-jitter..=jitter);
    base.mul_f64(1.0 + spread)
}
