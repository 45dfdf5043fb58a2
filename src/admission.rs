//! Admission control for new connections
//!
//! Two gates, checked in order: an active-connection cap and a sliding-window
//! rate limiter over recent admission timestamps.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::RateLimitConfig;
use crate::error::AdmissionRejected;

/// Sliding-window counter of admitted connections
#[derive(Debug)]
pub struct RateLimiter {
    max_admissions: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_admissions: usize, window: Duration) -> Self {
        Self {
            max_admissions,
            window,
            admitted: Mutex::new(VecDeque::with_capacity(max_admissions)),
        }
    }

    /// Check an attempt happening at `now`
    ///
    /// Prunes timestamps that have left the window, then admits only if the
    /// remainder is below the maximum. An admitted attempt records `now`.
    pub fn allow_at(&self, now: Instant) -> bool {
        let mut admitted = self.admitted.lock();
        while let Some(&oldest) = admitted.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                admitted.pop_front();
            } else {
                break;
            }
        }

        if admitted.len() < self.max_admissions {
            admitted.push_back(now);
            true
        } else {
            false
        }
    }

    /// Admissions currently inside the window (as of the last check)
    pub fn in_window(&self) -> usize {
        self.admitted.lock().len()
    }
}

/// Capacity cap plus rate limiter
#[derive(Debug)]
pub struct AdmissionController {
    max_connections: usize,
    limiter: RateLimiter,
}

impl AdmissionController {
    pub fn new(max_connections: usize, rate_limit: &RateLimitConfig) -> Self {
        Self {
            max_connections,
            limiter: RateLimiter::new(rate_limit.max_admissions, rate_limit.window),
        }
    }

    /// Gate one accepted socket given the current active count
    ///
    /// The rate limiter is only consulted (and only records a timestamp)
    /// when the capacity gate passes.
    pub fn check(&self, active: usize) -> Result<(), AdmissionRejected> {
        self.check_at(active, Instant::now())
    }

    pub fn check_at(&self, active: usize, now: Instant) -> Result<(), AdmissionRejected> {
        if active >= self.max_connections {
            return Err(AdmissionRejected::AtCapacity);
        }
        if !self.limiter.allow_at(now) {
            return Err(AdmissionRejected::RateLimited);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eleventh_attempt_in_window_rejected() {
        let limiter = RateLimiter::new(10, Duration::from_millis(1000));
        let start = Instant::now();

        for i in 0..10 {
            assert!(limiter.allow_at(start + Duration::from_millis(i * 50)));
        }
        assert!(!limiter.allow_at(start + Duration::from_millis(900)));
        assert_eq!(limiter.in_window(), 10);
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new(10, Duration::from_millis(1000));
        let start = Instant::now();

        for _ in 0..10 {
            assert!(limiter.allow_at(start));
        }
        assert!(!limiter.allow_at(start + Duration::from_millis(999)));
        assert!(limiter.allow_at(start + Duration::from_millis(1000)));
        assert_eq!(limiter.in_window(), 1);
    }

    #[test]
    fn test_rejected_attempts_are_not_recorded() {
        let limiter = RateLimiter::new(2, Duration::from_millis(100));
        let start = Instant::now();

        assert!(limiter.allow_at(start));
        assert!(limiter.allow_at(start + Duration::from_millis(10)));
        for ms in 20..90 {
            assert!(!limiter.allow_at(start + Duration::from_millis(ms)));
        }
        // First admission leaves the window at 100ms.
        assert!(limiter.allow_at(start + Duration::from_millis(100)));
    }

    #[test]
    fn test_capacity_checked_first() {
        let controller = AdmissionController::new(
            2,
            &RateLimitConfig {
                max_admissions: 1,
                window: Duration::from_secs(1),
            },
        );
        let now = Instant::now();

        assert_eq!(controller.check_at(2, now), Err(AdmissionRejected::AtCapacity));
        assert_eq!(controller.check_at(0, now), Ok(()));
        assert_eq!(controller.check_at(1, now), Err(AdmissionRejected::RateLimited));
    }
}
