//! Exponential backoff between polls and between retry attempts.
//!
//! The wait grows as `2^(attempt / 5) * min`, so it doubles roughly every five
//! attempts, and is clamped to `max`. Attempt `0` waits exactly `min`.

use std::time::Duration;

/// Default lower bound between run polls.
pub const POLL_BACKOFF_MIN: Duration = Duration::from_millis(1000);

/// Default upper bound between run polls.
pub const POLL_BACKOFF_MAX: Duration = Duration::from_millis(3000);

/// Default lower bound between failed attempts.
pub const RETRY_BACKOFF_MIN: Duration = Duration::from_secs(1);

/// Default upper bound between failed attempts.
pub const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Compute the wait before `attempt`, bounded by `max`.
#[must_use]
pub fn backoff(min: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 2f64.powf(f64::from(attempt) / 5.0);
    let secs = min.as_secs_f64() * factor;
    if !secs.is_finite() || secs >= max.as_secs_f64() {
        return max;
    }
    Duration::from_secs_f64(secs)
}

/// A (min, max) pair tuned for one kind of wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub min: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    /// Tuning for the run poller.
    pub fn poll() -> Self {
        Self::new(POLL_BACKOFF_MIN, POLL_BACKOFF_MAX)
    }

    /// Tuning for the retry loop, in whole seconds as the caller configures it.
    pub fn retry_secs(min_secs: u64, max_secs: u64) -> Self {
        Self::new(Duration::from_secs(min_secs), Duration::from_secs(max_secs))
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        backoff(self.min, self.max, attempt)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(RETRY_BACKOFF_MIN, RETRY_BACKOFF_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_attempt_zero_waits_min() {
        assert_eq!(backoff(secs(1), secs(30), 0), secs(1));
    }

    #[test]
    fn test_doubles_every_five_attempts() {
        let d = backoff(secs(1), secs(30), 5);
        assert!((d.as_secs_f64() - 2.0).abs() < 1e-9);
        let d = backoff(secs(1), secs(30), 10);
        assert!((d.as_secs_f64() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_clamped_to_max() {
        assert_eq!(backoff(secs(1), secs(30), 50), secs(30));
        assert_eq!(backoff(secs(1), secs(30), u32::MAX), secs(30));
    }

    #[test]
    fn test_never_exceeds_max_and_never_decreases() {
        let min = Duration::from_millis(250);
        let max = Duration::from_millis(4000);
        let mut previous = Duration::ZERO;
        for attempt in 0..200 {
            let d = backoff(min, max, attempt);
            assert!(d <= max, "attempt {attempt} exceeded max: {d:?}");
            assert!(d >= previous, "attempt {attempt} decreased: {d:?} < {previous:?}");
            previous = d;
        }
    }

    #[test]
    fn test_min_above_max_yields_max() {
        assert_eq!(backoff(secs(10), secs(5), 0), secs(5));
    }

    #[test]
    fn test_zero_min_stays_zero() {
        assert_eq!(backoff(Duration::ZERO, secs(5), 40), Duration::ZERO);
    }

    #[test]
    fn test_backoff_presets() {
        let poll = Backoff::poll();
        assert_eq!(poll.delay(0), Duration::from_millis(1000));
        assert_eq!(poll.delay(100), Duration::from_millis(3000));

        let retry = Backoff::retry_secs(1, 30);
        assert_eq!(retry, Backoff::default());
        assert_eq!(retry.delay(2), backoff(secs(1), secs(30), 2));
    }
}
