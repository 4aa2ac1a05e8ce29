//! Sliding-window rate limiter behaviour over simulated time.

use std::sync::Arc;
use std::time::Duration;

use courier::{Admission, ManualClock, RateLimiter};

#[test]
fn no_hour_ever_exceeds_the_limit() {
    let clock = Arc::new(ManualClock::default());
    let limiter = RateLimiter::with_clock(10, clock.clone());
    let mut granted_at = Vec::new();

    // One attempt every 90 seconds for five hours.
    for step in 0..200u64 {
        if limiter.acquire().is_granted() {
            granted_at.push(step * 90);
        }
        clock.advance(Duration::from_secs(90));
    }

    for (i, start) in granted_at.iter().enumerate() {
        let in_window = granted_at[i..]
            .iter()
            .take_while(|t| **t < start + 3600)
            .count();
        assert!(in_window <= 10, "window starting at {start}s had {in_window} grants");
    }
    assert!(granted_at.len() >= 50);
}

#[test]
fn wait_points_at_the_oldest_grant_expiry() {
    let clock = Arc::new(ManualClock::default());
    let limiter = RateLimiter::with_clock(2, clock.clone());

    assert!(limiter.acquire().is_granted());
    clock.advance(Duration::from_secs(600));
    assert!(limiter.acquire().is_granted());

    assert_eq!(limiter.acquire(), Admission::Wait(Duration::from_secs(3000)));

    clock.advance(Duration::from_secs(3000));
    assert!(limiter.acquire().is_granted());
    assert!(!limiter.acquire().is_granted());
}

#[test]
fn denied_attempts_do_not_consume_capacity() {
    let clock = Arc::new(ManualClock::default());
    let limiter = RateLimiter::with_clock(1, clock.clone());

    assert!(limiter.acquire().is_granted());
    for _ in 0..5 {
        assert!(!limiter.acquire().is_granted());
    }
    assert_eq!(limiter.stats().used, 1);

    clock.advance(Duration::from_secs(3600));
    assert!(limiter.acquire().is_granted());
}

#[test]
fn raising_the_limit_admits_immediately() {
    let clock = Arc::new(ManualClock::default());
    let limiter = RateLimiter::with_clock(1, clock);

    assert!(limiter.acquire().is_granted());
    assert!(!limiter.acquire().is_granted());

    limiter.set_limit(2);
    assert!(limiter.acquire().is_granted());
    assert_eq!(limiter.stats().remaining, 0);
}
