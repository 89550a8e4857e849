//! Reconnect backoff schedule
//!
//! Delay for failure `n` (zero-based) is `floor * factor^n`, capped at
//! `ceiling`. No jitter: observers are few and reconnect storms are not a
//! concern at this scale.

use std::time::Duration;

/// Exponential backoff with a floor, a ceiling and an attempt budget
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    factor: f64,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration, factor: f64, max_attempts: u32) -> Self {
        Self {
            floor,
            ceiling: ceiling.max(floor),
            factor: factor.max(1.0),
            max_attempts,
            attempt: 0,
        }
    }

    /// Delay for a zero-based attempt index
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.floor.as_secs_f64() * self.factor.powi(exp);
        if !secs.is_finite() || secs >= self.ceiling.as_secs_f64() {
            self.ceiling
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Record a failure and return how long to wait, or `None` once the
    /// attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let delay = self.delay_for(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    /// Back to the floor after a successful connection
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Consecutive failures since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}
