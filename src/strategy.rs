//! # Retry backoff for envelope control-channel operations.
//!
//! [`BackoffStrategy`] shapes the delays an envelope inserts between
//! retries of transient control-channel failures (the `retry` half of
//! [`EnvelopeOptions`](crate::envelope::EnvelopeOptions)). The supervisor
//! hands every envelope the default strategy.

use std::time::Duration;

/// Exponential backoff parameters: first delay, cap, and growth factor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffStrategy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Upper bound on any delay.
    pub max: Duration,
    /// Multiplier applied to the previous delay.
    pub factor: f64,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl BackoffStrategy {
    /// The delay to use after `prev`, or the first delay when `prev` is
    /// `None`.
    pub fn next(&self, prev: Option<Duration>) -> Duration {
        match prev {
            None => self.first,
            Some(d) => {
                let next = (d.as_secs_f64() * self.factor).min(self.max.as_secs_f64());
                Duration::from_secs_f64(next)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_to_cap() {
        let s = BackoffStrategy {
            first: Duration::from_secs(1),
            max: Duration::from_secs(4),
            factor: 2.0,
        };
        let d1 = s.next(None);
        let d2 = s.next(Some(d1));
        let d3 = s.next(Some(d2));
        let d4 = s.next(Some(d3));
        assert_eq!(d1, Duration::from_secs(1));
        assert_eq!(d2, Duration::from_secs(2));
        assert_eq!(d3, Duration::from_secs(4));
        assert_eq!(d4, Duration::from_secs(4));
    }
}
