#![forbid(unsafe_code)]
#![deny(
    dead_code,
    unused_imports,
    unused_mut,
    missing_docs,
    missing_debug_implementations
)]

//! Local sliding windows rate limiting algorithm implementation.

/// Client identification for `axum` requests.
#[cfg(feature = "axum")]
pub mod extract;

use dashmap::DashMap;
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Structure of a limiter.
#[derive(Debug)]
pub struct RateLimiter {
    /// The number of requests a single key can perform in one window.
    maximum_request: usize,
    /// Window duration.
    time: Duration,
    /// Entries. Each entry has its own rate-limit.
    buckets: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// # Example
    /// ```rust
    /// use civiceye_limits::RateLimiter;
    /// use std::time::Duration;
    ///
    /// // 100 requests every 15 minutes.
    /// let limiter = RateLimiter::new(100, Duration::from_secs(15 * 60));
    /// assert!(limiter.check("127.0.0.1"));
    /// ```
    pub fn new(maximum_request: usize, time: Duration) -> Self {
        RateLimiter {
            maximum_request,
            time,
            buckets: DashMap::new(),
        }
    }

    /// Window duration.
    pub fn window(&self) -> Duration {
        self.time
    }

    /// Checks if a new request exceeds the limit. If not, increments the counter.
    pub fn check<T>(&self, key: T) -> bool
    where
        T: ToString,
    {
        let now = Instant::now();
        let mut entries = self.buckets.entry(key.to_string()).or_default();

        // Clean old requests.
        while let Some(time) = entries.front() {
            if now.duration_since(*time) > self.time {
                entries.pop_front();
            } else {
                break;
            }
        }

        if entries.len() >= self.maximum_request {
            false
        } else {
            entries.push_back(now);
            true
        }
    }

    /// Drop every key whose last request left the window.
    ///
    /// Returns how many keys are still tracked.
    pub fn purge(&self) -> usize {
        let now = Instant::now();
        self.buckets.retain(|_, entries| {
            entries
                .back()
                .is_some_and(|last| now.duration_since(*last) <= self.time)
        });
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::RateLimiter;
    use std::{thread::sleep, time::Duration};

    const IP: &str = "0.0.0.0";
    const OTHER_IP: &str = "1.1.1.1";

    #[test]
    fn test_duration() {
        let limiter = RateLimiter::new(2, Duration::from_secs(2));

        assert!(limiter.check(IP));

        sleep(Duration::from_secs(1));
        assert!(limiter.check(IP));
        assert!(!limiter.check(IP)); // This request exceed limit.

        // only the first entry left the window.
        sleep(Duration::from_millis(1_500));
        assert!(limiter.check(IP));
        assert!(!limiter.check(IP));
    }

    #[test]
    fn test_multiple_entries() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1));

        assert!(limiter.check(IP));
        assert!(limiter.check(OTHER_IP));
        assert!(limiter.check(IP));
        assert!(!limiter.check(IP)); // ip is limited.
        assert!(limiter.check(OTHER_IP));
    }

    #[test]
    fn test_purge() {
        let limiter = RateLimiter::new(5, Duration::from_millis(200));

        assert!(limiter.check(IP));
        assert_eq!(limiter.purge(), 1);

        sleep(Duration::from_millis(300));
        assert!(limiter.check(OTHER_IP));
        assert_eq!(limiter.purge(), 1);
    }
}
