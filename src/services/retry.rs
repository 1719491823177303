//! Retry and backoff policies shared by capture retries and approval polling.

use std::time::Duration;

/// How the delay grows between successive attempts or polls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed,
    Exponential { factor: f64, max_delay: Duration },
}

impl Backoff {
    /// `factor <= 1.0` means a fixed delay.
    pub fn from_factor(factor: f64, max_delay: Duration) -> Self {
        if factor > 1.0 {
            Self::Exponential { factor, max_delay }
        } else {
            Self::Fixed
        }
    }

    /// Delay to use after `step` previous delays (0-based).
    pub fn delay(&self, base: Duration, step: u32) -> Duration {
        match *self {
            Self::Fixed => base,
            Self::Exponential { factor, max_delay } => {
                let exp = i32::try_from(step).unwrap_or(i32::MAX);
                let scaled = base.as_secs_f64() * factor.powi(exp);
                if !scaled.is_finite() || scaled >= max_delay.as_secs_f64() {
                    max_delay
                } else {
                    Duration::from_secs_f64(scaled).max(base.min(max_delay))
                }
            }
        }
    }
}

/// Bounded retry configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Delay before `attempt` (1-based). The first attempt never waits.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::ZERO
        } else {
            self.backoff.delay(self.delay, attempt - 2)
        }
    }
}
