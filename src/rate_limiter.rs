//! Outbound admission control.
//!
//! A sliding one-hour window: the limiter remembers when each of the last
//! `limit` grants happened, so no one-hour interval ever contains more than
//! `limit` grants. When full, it reports how long until the oldest grant
//! leaves the window instead of blocking.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::clock::{delta, Clock, SystemClock};

const WINDOW: Duration = Duration::from_secs(3600);

/// Outcome of [`RateLimiter::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A send slot was taken.
    Granted,
    /// No slot is free; one frees up after this long.
    Wait(Duration),
}

impl Admission {
    pub const fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Snapshot of the limiter for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStats {
    pub limit: u32,
    /// Grants in the current window.
    pub used: u32,
    pub remaining: u32,
}

#[derive(Debug)]
struct Window {
    limit: u32,
    grants: VecDeque<DateTime<Utc>>,
}

impl Window {
    fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = now - delta(WINDOW);
        while self.grants.front().is_some_and(|&t| t <= horizon) {
            self.grants.pop_front();
        }
    }
}

/// Process-wide send limiter shared by every worker.
#[derive(Debug)]
pub struct RateLimiter {
    window: Mutex<Window>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Allow `limit_per_hour` sends in any rolling hour.
    pub fn new(limit_per_hour: u32) -> Self {
        Self::with_clock(limit_per_hour, Arc::new(SystemClock))
    }

    pub fn with_clock(limit_per_hour: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            window: Mutex::new(Window {
                limit: limit_per_hour,
                grants: VecDeque::with_capacity(limit_per_hour.min(4096) as usize),
            }),
            clock,
        }
    }

    /// Take a send slot, or learn how long until one frees up.
    ///
    /// ```
    /// use courier::{Admission, RateLimiter};
    ///
    /// let limiter = RateLimiter::new(1);
    /// assert_eq!(limiter.acquire(), Admission::Granted);
    /// assert!(matches!(limiter.acquire(), Admission::Wait(_)));
    /// ```
    pub fn acquire(&self) -> Admission {
        let now = self.clock.now();
        let mut window = self.window.lock();
        window.prune(now);

        let used = window.grants.len();
        let limit = window.limit as usize;
        if used < limit {
            window.grants.push_back(now);
            return Admission::Granted;
        }

        // After a limit decrease more than one grant may have to expire.
        let blocking = window.grants.get(used - limit).copied().unwrap_or(now);
        drop(window);

        let wait = (blocking + delta(WINDOW) - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .max(Duration::from_millis(1));
        tracing::debug!(
            limit,
            wait_seconds = wait.as_secs_f64(),
            "Rate limit reached, deferring send"
        );
        Admission::Wait(wait)
    }

    /// Change the hourly limit. Grants already made stay in the window.
    pub fn set_limit(&self, limit_per_hour: u32) {
        let mut window = self.window.lock();
        if window.limit != limit_per_hour {
            tracing::info!(
                old = window.limit,
                new = limit_per_hour,
                "Rate limit changed"
            );
            window.limit = limit_per_hour;
        }
    }

    pub fn stats(&self) -> RateLimitStats {
        let now = self.clock.now();
        let mut window = self.window.lock();
        window.prune(now);
        let used = u32::try_from(window.grants.len()).unwrap_or(u32::MAX);
        RateLimitStats {
            limit: window.limit,
            used,
            remaining: window.limit.saturating_sub(used),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(limit: u32) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (RateLimiter::with_clock(limit, clock.clone()), clock)
    }

    #[test]
    fn test_grants_up_to_limit() {
        let (limiter, _) = limiter(3);
        for _ in 0..3 {
            assert!(limiter.acquire().is_granted());
        }
        assert_eq!(limiter.acquire(), Admission::Wait(WINDOW));
        assert_eq!(
            limiter.stats(),
            RateLimitStats {
                limit: 3,
                used: 3,
                remaining: 0
            }
        );
    }

    #[test]
    fn test_wait_tracks_oldest_grant() {
        let (limiter, clock) = limiter(2);
        assert!(limiter.acquire().is_granted());
        clock.advance(Duration::from_secs(600));
        assert!(limiter.acquire().is_granted());

        clock.advance(Duration::from_secs(60));
        assert_eq!(limiter.acquire(), Admission::Wait(Duration::from_secs(2940)));

        clock.advance(Duration::from_secs(2940));
        assert!(limiter.acquire().is_granted());
        assert!(!limiter.acquire().is_granted());
    }

    #[test]
    fn test_no_hour_exceeds_limit() {
        let (limiter, clock) = limiter(5);
        let mut granted = Vec::new();
        let start = clock.now();
        for _ in 0..200 {
            if limiter.acquire().is_granted() {
                granted.push(clock.now());
            }
            clock.advance(Duration::from_secs(97));
        }
        for (i, &t) in granted.iter().enumerate() {
            let in_window = granted[i..]
                .iter()
                .take_while(|&&u| u < t + delta(WINDOW))
                .count();
            assert!(in_window <= 5, "window starting {:?} had {in_window}", t - start);
        }
        assert!(granted.len() > 5);
    }

    #[test]
    fn test_lowering_limit() {
        let (limiter, clock) = limiter(3);
        for _ in 0..3 {
            limiter.acquire();
            clock.advance(Duration::from_secs(60));
        }
        limiter.set_limit(1);
        // All three grants must expire; the last was at t=120s.
        assert_eq!(
            limiter.acquire(),
            Admission::Wait(Duration::from_secs(3600 + 120 - 180))
        );

        limiter.set_limit(10);
        assert!(limiter.acquire().is_granted());
    }
}
