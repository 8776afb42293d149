//! The retry delay policy applied to failed jobs.
//!
//! Delays grow exponentially with the attempt count and are deliberately
//! uncapped and jitter free: the delay before attempt `n` becomes eligible
//! again is `base^n` seconds. Callers needing bounded growth should cap the
//! number of retries rather than the delay.
//!
//! # Example
//!
//! ```
//! # use cmdqueue::backoff::BackoffStrategy;
//! # use chrono::TimeDelta;
//! let strategy = BackoffStrategy::exponential(TimeDelta::seconds(2));
//!
//! assert_eq!(strategy.delay(1), TimeDelta::seconds(2));
//! assert_eq!(strategy.delay(2), TimeDelta::seconds(4));
//! assert_eq!(strategy.delay(3), TimeDelta::seconds(8));
//! ```

use chrono::{DateTime, TimeDelta, Utc};

/// Exponential backoff with a configurable base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffStrategy {
    base: TimeDelta,
}

impl BackoffStrategy {
    /// Creates an exponential strategy whose delay for attempt `n` is
    /// `base^n` seconds.
    pub const fn exponential(base: TimeDelta) -> Self {
        Self { base }
    }

    /// The delay to wait after the given (1-based) attempt.
    pub fn delay(&self, attempt: u32) -> TimeDelta {
        self.base
            .num_seconds()
            .checked_pow(attempt)
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }

    /// The instant at which a job that has just failed its `attempt`-th
    /// execution becomes ready again.
    ///
    /// Saturates at the latest representable instant when the delay would
    /// push the timestamp out of range.
    pub fn next_retry_at(&self, attempt: u32) -> DateTime<Utc> {
        Utc::now()
            .checked_add_signed(self.delay(attempt))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_with_the_attempt() {
        let strategy = BackoffStrategy::exponential(TimeDelta::seconds(3));

        assert_eq!(strategy.delay(1), TimeDelta::seconds(3));
        assert_eq!(strategy.delay(2), TimeDelta::seconds(9));
        assert_eq!(strategy.delay(3), TimeDelta::seconds(27));
    }

    #[test]
    fn delay_saturates_instead_of_overflowing() {
        let strategy = BackoffStrategy::exponential(TimeDelta::seconds(10));

        assert_eq!(strategy.delay(30), TimeDelta::MAX);
    }

    #[test]
    fn next_retry_at_saturates_for_delays_out_of_range() {
        let strategy = BackoffStrategy::exponential(TimeDelta::seconds(1000));

        assert_eq!(strategy.next_retry_at(7), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn next_retry_at_is_in_the_future() {
        let strategy = BackoffStrategy::exponential(TimeDelta::seconds(2));
        let before = Utc::now();

        let at = strategy.next_retry_at(1);

        assert!(at >= before + TimeDelta::seconds(2));
        assert!(at <= Utc::now() + TimeDelta::seconds(2));
    }
}
