//! Fixed-window connection rate limiter keyed by source address.
//!
//! Each address gets a counter that resets when its window elapses. Expired
//! records are purged inline once the map grows past a housekeeping threshold,
//! so no background task is needed.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Connection may proceed.
    Allowed,
    /// Connection must be refused; retry after the given number of seconds.
    Denied { retry_after_seconds: u64 },
}

#[derive(Debug, Clone, Copy)]
struct RateLimitRecord {
    count: u32,
    window_reset_at: Instant,
}

/// Per-address fixed-window connection counter.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_connections: u32,
    cleanup_threshold: usize,
    records: HashMap<String, RateLimitRecord>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(window: Duration, max_connections: u32, cleanup_threshold: usize) -> Self {
        Self {
            window,
            max_connections,
            cleanup_threshold,
            records: HashMap::new(),
        }
    }

    /// Check and record a connection attempt from `address` at the current time.
    pub fn check_and_record(&mut self, address: &str) -> RateDecision {
        self.check_and_record_at(address, Instant::now())
    }

    /// Check and record a connection attempt from `address` at `now`.
    pub fn check_and_record_at(&mut self, address: &str, now: Instant) -> RateDecision {
        if self.records.len() > self.cleanup_threshold {
            self.purge_expired(now);
        }

        match self.records.get_mut(address) {
            Some(record) if now < record.window_reset_at => {
                if record.count < self.max_connections {
                    record.count += 1;
                    RateDecision::Allowed
                } else {
                    let remaining = record.window_reset_at.saturating_duration_since(now);
                    RateDecision::Denied {
                        retry_after_seconds: ceil_seconds(remaining),
                    }
                }
            }
            _ => {
                self.records.insert(
                    address.to_string(),
                    RateLimitRecord {
                        count: 1,
                        window_reset_at: now + self.window,
                    },
                );
                RateDecision::Allowed
            }
        }
    }

    /// Number of tracked addresses.
    #[must_use]
    pub fn tracked_addresses(&self) -> usize {
        self.records.len()
    }

    fn purge_expired(&mut self, now: Instant) {
        let before = self.records.len();
        self.records.retain(|_, record| now < record.window_reset_at);
        debug!(
            target: "queue.rate_limit",
            purged = before - self.records.len(),
            remaining = self.records.len(),
            "Purged expired rate limit records"
        );
    }
}

/// Whole seconds rounded up, never less than one.
fn ceil_seconds(remaining: Duration) -> u64 {
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    secs.max(1)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_max_then_denies() {
        let mut limiter = RateLimiter::new(Duration::from_secs(10), 3, 1000);
        let now = Instant::now();

        for _ in 0..3 {
            assert_eq!(
                limiter.check_and_record_at("10.0.0.1", now),
                RateDecision::Allowed
            );
        }

        assert_eq!(
            limiter.check_and_record_at("10.0.0.1", now),
            RateDecision::Denied {
                retry_after_seconds: 10
            }
        );
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let mut limiter = RateLimiter::new(Duration::from_secs(10), 1, 1000);
        let start = Instant::now();

        assert_eq!(
            limiter.check_and_record_at("10.0.0.1", start),
            RateDecision::Allowed
        );

        let later = start + Duration::from_millis(6_500);
        assert_eq!(
            limiter.check_and_record_at("10.0.0.1", later),
            RateDecision::Denied {
                retry_after_seconds: 4
            }
        );
    }

    #[test]
    fn test_new_window_after_boundary_is_allowed() {
        let mut limiter = RateLimiter::new(Duration::from_secs(10), 2, 1000);
        let start = Instant::now();

        assert_eq!(limiter.check_and_record_at("a", start), RateDecision::Allowed);
        assert_eq!(limiter.check_and_record_at("a", start), RateDecision::Allowed);
        assert!(matches!(
            limiter.check_and_record_at("a", start + Duration::from_secs(9)),
            RateDecision::Denied { .. }
        ));

        let next_window = start + Duration::from_secs(10);
        assert_eq!(
            limiter.check_and_record_at("a", next_window),
            RateDecision::Allowed
        );
        assert_eq!(
            limiter.check_and_record_at("a", next_window),
            RateDecision::Allowed
        );
    }

    #[test]
    fn test_addresses_are_independent() {
        let mut limiter = RateLimiter::new(Duration::from_secs(10), 1, 1000);
        let now = Instant::now();

        assert_eq!(limiter.check_and_record_at("a", now), RateDecision::Allowed);
        assert!(matches!(
            limiter.check_and_record_at("a", now),
            RateDecision::Denied { .. }
        ));
        assert_eq!(limiter.check_and_record_at("b", now), RateDecision::Allowed);
    }

    #[test]
    fn test_expired_records_purged_past_threshold() {
        let mut limiter = RateLimiter::new(Duration::from_secs(10), 5, 3);
        let start = Instant::now();

        for addr in ["a", "b", "c", "d"] {
            limiter.check_and_record_at(addr, start);
        }
        assert_eq!(limiter.tracked_addresses(), 4);

        // Past the window and over the threshold: stale records go, the new one stays.
        limiter.check_and_record_at("e", start + Duration::from_secs(11));
        assert_eq!(limiter.tracked_addresses(), 1);
    }

    #[test]
    fn test_no_purge_below_threshold() {
        let mut limiter = RateLimiter::new(Duration::from_secs(10), 5, 100);
        let start = Instant::now();

        limiter.check_and_record_at("a", start);
        limiter.check_and_record_at("b", start + Duration::from_secs(30));
        assert_eq!(limiter.tracked_addresses(), 2);
    }

    #[test]
    fn test_ceil_seconds() {
        assert_eq!(ceil_seconds(Duration::from_secs(3)), 3);
        assert_eq!(ceil_seconds(Duration::from_millis(3_001)), 4);
        assert_eq!(ceil_seconds(Duration::ZERO), 1);
    }
}
