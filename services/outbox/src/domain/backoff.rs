use std::time::Duration;

use rand::RngExt;

/// Longest delay the dispatcher will ever schedule, `retry_after` included.
pub const MAX_DELAY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Upper bound of the jitter added on top of a capped delay, as a fraction of it.
pub const JITTER_FRACTION: f64 = 0.2;

/// Retry and backoff knobs applied by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

/// What to do with an entry after a retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Exhausted,
}

impl RetryPolicy {
    /// `base * 2^attempt`, capped at `max` and [`MAX_DELAY`]. No jitter.
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max).min(MAX_DELAY)
    }

    /// Capped delay plus `[0, JITTER_FRACTION)` of it.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let fraction = rand::rng().random_range(0.0..1.0);
        with_jitter(self.capped_delay(attempt), fraction)
    }

    /// Decide the next step once `attempt_count` attempts have failed retryably.
    ///
    /// `retry_after` is a floor on the delay, never a replacement for the
    /// backoff. The floor itself is capped at [`MAX_DELAY`].
    pub fn decide(&self, attempt_count: u32, retry_after: Option<Duration>) -> RetryDecision {
        if attempt_count >= self.max_attempts {
            return RetryDecision::Exhausted;
        }
        let delay = self.backoff(attempt_count);
        RetryDecision::Retry {
            delay: retry_after.map_or(delay, |floor| delay.max(floor.min(MAX_DELAY))),
        }
    }
}

fn with_jitter(delay: Duration, fraction: f64) -> Duration {
    delay + delay.mul_f64(JITTER_FRACTION * fraction.clamp(0.0, 1.0))
}
