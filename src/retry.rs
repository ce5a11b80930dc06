//! Retry policy: a pure decision procedure mapping a close cause and an
//! attempt counter to an optional backoff delay.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng as _;

use crate::close::{CloseCode, CloseReason};

/// Predicate that vetoes reconnection for specific close causes.
pub type RetryFilter = Arc<dyn Fn(CloseCode, &CloseReason) -> bool + Send + Sync>;

/// Backoff family used to space reconnection attempts.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Delay grows linearly: `scale * attempt` seconds.
    Linear {
        /// Seconds added per attempt.
        scale: f64,
    },
    /// Every attempt waits the same interval.
    Equal {
        /// Fixed delay between attempts.
        interval: Duration,
    },
    /// Delay drawn uniformly from `[min, max]` for every attempt.
    Random {
        /// Lower bound.
        min: Duration,
        /// Upper bound.
        max: Duration,
    },
    /// Delay grows geometrically: `scale * base^attempt` seconds.
    Exponential {
        /// Growth factor per attempt.
        base: f64,
        /// Seconds multiplier.
        scale: f64,
    },
}

impl Backoff {
    fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Linear { scale } => secs(scale * f64::from(attempt)),
            Backoff::Equal { interval } => interval,
            Backoff::Random { min, max } => {
                if max <= min {
                    return min;
                }
                let span = rand::rng().random_range(min.as_secs_f64()..=max.as_secs_f64());
                secs(span)
            }
            Backoff::Exponential { base, scale } => secs(scale * base.powf(f64::from(attempt))),
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

/// Decides whether (and after which delay) a dropped connection is reopened.
///
/// `limits` counts attempts inclusively: attempt `limits + 1` is refused.
/// The optional filter runs first and vetoes retrying when it returns `true`.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use ws_warden::{Backoff, CloseCode, CloseReason, RetryPolicy};
///
/// let policy = RetryPolicy::new(Backoff::Linear { scale: 0.5 }, 3)
///     .with_filter(|code, _| code.raw_value() > 4000);
///
/// let reason = CloseReason::Server(Vec::new());
/// assert_eq!(
///     policy.retry(CloseCode::AbnormalClosure, &reason, 1),
///     Some(Duration::from_millis(500)),
/// );
/// assert_eq!(policy.retry(CloseCode::Application(4500), &reason, 1), None);
/// ```
#[derive(Clone)]
pub struct RetryPolicy {
    backoff: Backoff,
    limits: u32,
    filter: Option<RetryFilter>,
}

impl RetryPolicy {
    /// Create a policy allowing up to `limits` attempts spaced by `backoff`.
    #[must_use]
    pub fn new(backoff: Backoff, limits: u32) -> Self {
        Self {
            backoff,
            limits,
            filter: None,
        }
    }

    /// Veto retrying for close causes matched by `filter`.
    #[must_use]
    pub fn with_filter(
        mut self,
        filter: impl Fn(CloseCode, &CloseReason) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// The configured attempt ceiling.
    #[must_use]
    pub fn limits(&self) -> u32 {
        self.limits
    }

    /// Decide on attempt number `attempt` (starting at 1) for a close with
    /// the given code and cause. `None` means "do not retry".
    #[must_use]
    pub fn retry(&self, code: CloseCode, reason: &CloseReason, attempt: u32) -> Option<Duration> {
        if let Some(filter) = &self.filter
            && filter(code, reason)
        {
            return None;
        }
        if attempt > self.limits {
            return None;
        }
        Some(self.backoff.delay(attempt))
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("backoff", &self.backoff)
            .field("limits", &self.limits)
            .field("filter", &self.filter.as_ref().map(|_| "<filter>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_reason() -> CloseReason {
        CloseReason::Server(Vec::new())
    }

    #[test]
    fn linear_backoff_until_limit() {
        let policy = RetryPolicy::new(Backoff::Linear { scale: 0.5 }, 3);
        let reason = server_reason();

        let delays: Vec<_> = (1..=4)
            .map(|attempt| policy.retry(CloseCode::AbnormalClosure, &reason, attempt))
            .collect();

        assert_eq!(
            delays,
            vec![
                Some(Duration::from_millis(500)),
                Some(Duration::from_secs(1)),
                Some(Duration::from_millis(1500)),
                None,
            ]
        );
    }

    #[test]
    fn exponential_backoff_sequence() {
        let policy = RetryPolicy::new(
            Backoff::Exponential {
                base: 2.0,
                scale: 0.25,
            },
            5,
        );
        let reason = server_reason();

        let delays: Vec<_> = (1..=5)
            .map(|attempt| {
                policy
                    .retry(CloseCode::AbnormalClosure, &reason, attempt)
                    .unwrap()
                    .as_secs_f64()
            })
            .collect();

        assert_eq!(delays, vec![0.5, 1.0, 2.0, 4.0, 8.0]);
    }

    #[test]
    fn equal_backoff_is_constant() {
        let policy = RetryPolicy::new(
            Backoff::Equal {
                interval: Duration::from_secs(2),
            },
            10,
        );
        let reason = server_reason();

        for attempt in 1..=10 {
            assert_eq!(
                policy.retry(CloseCode::GoingAway, &reason, attempt),
                Some(Duration::from_secs(2)),
            );
        }
    }

    #[test]
    fn random_backoff_stays_in_bounds() {
        let min = Duration::from_millis(100);
        let max = Duration::from_millis(400);
        let policy = RetryPolicy::new(Backoff::Random { min, max }, 100);
        let reason = server_reason();

        for attempt in 1..=100 {
            let delay = policy
                .retry(CloseCode::AbnormalClosure, &reason, attempt)
                .unwrap();
            assert!(delay >= min && delay <= max, "delay {delay:?} out of bounds");
        }
    }

    #[test]
    fn random_backoff_degenerate_range() {
        let min = Duration::from_millis(250);
        let policy = RetryPolicy::new(Backoff::Random { min, max: min }, 1);
        assert_eq!(
            policy.retry(CloseCode::AbnormalClosure, &server_reason(), 1),
            Some(min),
        );
    }

    #[test]
    fn filter_rejects_application_close() {
        let policy = RetryPolicy::new(
            Backoff::Equal {
                interval: Duration::from_secs(1),
            },
            5,
        )
        .with_filter(|code, _| code.raw_value() > 4000);

        let reason = server_reason();
        assert_eq!(policy.retry(CloseCode::Application(4500), &reason, 1), None);
        assert!(
            policy
                .retry(CloseCode::Application(4000), &reason, 1)
                .is_some()
        );
    }

    #[test]
    fn filter_sees_the_close_reason() {
        let policy = RetryPolicy::new(
            Backoff::Equal {
                interval: Duration::from_secs(1),
            },
            5,
        )
        .with_filter(|_, reason| matches!(reason, CloseReason::Pinging));

        assert_eq!(
            policy.retry(CloseCode::Invalid, &CloseReason::Pinging, 1),
            None
        );
        assert!(
            policy
                .retry(CloseCode::Invalid, &CloseReason::Monitor, 1)
                .is_some()
        );
    }

    #[test]
    fn attempts_beyond_limit_are_refused() {
        let policy = RetryPolicy::new(Backoff::Linear { scale: 1.0 }, 0);
        assert_eq!(
            policy.retry(CloseCode::AbnormalClosure, &server_reason(), 1),
            None
        );
    }
}
