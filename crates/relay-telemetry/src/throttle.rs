//! Rate limiter for noisy log sites.
//!
//! A mass disconnect (network partition, load balancer restart) produces one
//! log line per connection. [`LogThrottle`] lets a burst of lines through,
//! then one line per `window / burst`, and counts the rest so the next
//! admitted line can report how many were dropped.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

/// Result of asking to log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Log this event. `suppressed` lines were dropped since the last one
    /// that got through.
    Allowed {
        /// Lines dropped since the previous admitted line.
        suppressed: u64,
    },
    /// Drop this event.
    Suppressed,
}

type Limiter<C> = RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Thread-safe log limiter.
pub struct LogThrottle<C: Clock = DefaultClock> {
    limiter: Limiter<C>,
    suppressed: AtomicU64,
}

impl LogThrottle {
    /// Allow `burst` lines per `window`.
    pub fn new(burst: u32, window: Duration) -> Self {
        Self::with_clock(burst, window, &DefaultClock::default())
    }
}

impl<C: Clock> LogThrottle<C> {
    /// Allow `burst` lines per `window`, timed by `clock`.
    pub fn with_clock(burst: u32, window: Duration, clock: &C) -> Self {
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(window / burst.get())
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst);
        Self {
            limiter: RateLimiter::direct_with_clock(quota, clock),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Ask to log one line now.
    pub fn admit(&self) -> Admission {
        if self.limiter.check().is_ok() {
            let suppressed = self.suppressed.swap(0, Ordering::Relaxed);
            Admission::Allowed { suppressed }
        } else {
            let _ = self.suppressed.fetch_add(1, Ordering::Relaxed);
            Admission::Suppressed
        }
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new(50, Duration::from_secs(10))
    }
}

#[cfg(test)]
mod tests {
    use governor::clock::FakeRelativeClock;

    use super::*;

    #[test]
    fn burst_passes_then_suppresses() {
        let clock = FakeRelativeClock::default();
        let throttle = LogThrottle::with_clock(3, Duration::from_secs(10), &clock);
        for _ in 0..3 {
            assert_eq!(throttle.admit(), Admission::Allowed { suppressed: 0 });
        }
        assert_eq!(throttle.admit(), Admission::Suppressed);
        assert_eq!(throttle.admit(), Admission::Suppressed);
    }

    #[test]
    fn suppressed_count_is_reported_once() {
        let clock = FakeRelativeClock::default();
        let throttle = LogThrottle::with_clock(1, Duration::from_secs(10), &clock);
        assert_eq!(throttle.admit(), Admission::Allowed { suppressed: 0 });
        for _ in 0..4 {
            assert_eq!(throttle.admit(), Admission::Suppressed);
        }

        clock.advance(Duration::from_secs(11));
        assert_eq!(throttle.admit(), Admission::Allowed { suppressed: 4 });
        assert_eq!(throttle.admit(), Admission::Suppressed);

        clock.advance(Duration::from_secs(10));
        assert_eq!(throttle.admit(), Admission::Allowed { suppressed: 1 });
    }

    #[test]
    fn capacity_refills_at_window_over_burst() {
        let clock = FakeRelativeClock::default();
        let throttle = LogThrottle::with_clock(5, Duration::from_secs(10), &clock);
        for _ in 0..5 {
            assert!(matches!(throttle.admit(), Admission::Allowed { .. }));
        }
        assert_eq!(throttle.admit(), Admission::Suppressed);

        clock.advance(Duration::from_secs(2));
        assert_eq!(throttle.admit(), Admission::Allowed { suppressed: 1 });
        assert_eq!(throttle.admit(), Admission::Suppressed);
    }

    #[test]
    fn zero_burst_still_admits_one() {
        let clock = FakeRelativeClock::default();
        let throttle = LogThrottle::with_clock(0, Duration::from_secs(1), &clock);
        assert!(matches!(throttle.admit(), Admission::Allowed { .. }));
        assert_eq!(throttle.admit(), Admission::Suppressed);
    }

    #[test]
    fn default_allows_fifty_at_once() {
        let throttle = LogThrottle::default();
        let allowed = (0..60)
            .filter(|_| matches!(throttle.admit(), Admission::Allowed { .. }))
            .count();
        assert_eq!(allowed, 50);
    }
}
