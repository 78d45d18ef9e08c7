//! Per-IP sliding window request limiting.
//!
//! Unlike a fixed window that resets at fixed intervals, each caller's
//! request timestamps are tracked individually and only those inside the
//! sliding window count. This prevents bursting across a window boundary.

use crate::error::ApiError;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Most timestamps kept per caller, and so the largest usable `max_requests`.
pub const MAX_BUCKET_ENTRIES: usize = 10_000;
const PRUNE_THRESHOLD: usize = 4096;

/// A `(window, max-requests)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Length of the sliding window.
    pub window: Duration,
    /// Requests allowed inside one window.
    pub max_requests: u32,
}

impl RateLimit {
    /// Creates a limit of `max_requests` per `window`.
    #[must_use]
    pub const fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
        }
    }
}

/// Endpoint class a request is charged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Read-mostly endpoints (`/list`, `/route`).
    General,
    /// Mutating endpoints (`/register`, `/update-servers`).
    Sensitive,
}

/// Sliding window of request timestamps for one caller.
#[derive(Debug, Default)]
struct SlidingWindow {
    hits: VecDeque<Instant>,
}

impl SlidingWindow {
    fn expire_old_entries(&mut self, now: Instant, window: Duration) {
        while let Some(ts) = self.hits.front() {
            if now.duration_since(*ts) >= window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    /// Returns `true` and records the hit if it fits in the window.
    fn check_and_record(&mut self, now: Instant, limit: RateLimit) -> bool {
        self.expire_old_entries(now, limit.window);

        let count: u32 = self.hits.len().try_into().unwrap_or(u32::MAX);
        if count >= limit.max_requests {
            return false;
        }

        self.hits.push_back(now);
        if self.hits.len() > MAX_BUCKET_ENTRIES {
            self.hits.pop_front();
        }
        true
    }

    fn is_idle(&self, now: Instant, window: Duration) -> bool {
        self.hits
            .back()
            .map_or(true, |last| now.duration_since(*last) >= window)
    }
}

/// Concurrent per-IP limiter with a general and a sensitive tier.
#[derive(Debug)]
pub struct IpRateLimiter {
    general: RateLimit,
    sensitive: RateLimit,
    buckets: DashMap<(IpAddr, Tier), SlidingWindow>,
}

impl IpRateLimiter {
    /// Creates a limiter with the given tier limits.
    #[must_use]
    pub fn new(general: RateLimit, sensitive: RateLimit) -> Self {
        Self {
            general,
            sensitive,
            buckets: DashMap::new(),
        }
    }

    fn limit_for(&self, tier: Tier) -> RateLimit {
        match tier {
            Tier::General => self.general,
            Tier::Sensitive => self.sensitive,
        }
    }

    /// Charges one request from `ip` against `tier`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::RateLimited`] if the caller is over budget.
    pub fn check(&self, ip: IpAddr, tier: Tier) -> Result<(), ApiError> {
        let now = Instant::now();
        let limit = self.limit_for(tier);

        if self.buckets.len() > PRUNE_THRESHOLD {
            self.prune(now);
        }

        let allowed = self
            .buckets
            .entry((ip, tier))
            .or_default()
            .check_and_record(now, limit);

        if allowed {
            Ok(())
        } else {
            tracing::debug!(ip = %ip, ?tier, "rate limit exceeded");
            Err(ApiError::RateLimited)
        }
    }

    /// Drops buckets with no hits inside their window.
    pub fn prune(&self, now: Instant) {
        self.buckets
            .retain(|(_, tier), bucket| !bucket.is_idle(now, self.limit_for(*tier).window));
    }

    /// Number of tracked `(ip, tier)` buckets.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(max: u32) -> RateLimit {
        RateLimit::new(Duration::from_secs(60), max)
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[test]
    fn window_allows_up_to_max() {
        let mut w = SlidingWindow::default();
        let now = Instant::now();
        assert!(w.check_and_record(now, limit(2)));
        assert!(w.check_and_record(now, limit(2)));
        assert!(!w.check_and_record(now, limit(2)));
        assert_eq!(w.hits.len(), 2);
    }

    #[test]
    fn old_entries_expire_after_window() {
        let mut w = SlidingWindow::default();
        let now = Instant::now();
        w.hits.push_back(now - Duration::from_secs(61));
        w.hits.push_back(now - Duration::from_secs(10));

        assert!(w.check_and_record(now, limit(2)));
        assert_eq!(w.hits.len(), 2);
    }

    #[test]
    fn sliding_window_prevents_clock_edge_burst() {
        let mut w = SlidingWindow::default();
        let now = Instant::now();
        for i in 0..5 {
            w.hits
                .push_back(now - Duration::from_secs(59) + Duration::from_millis(i * 10));
        }
        assert!(!w.check_and_record(now, limit(5)));
    }

    #[test]
    fn tiers_are_charged_independently() {
        let limiter = IpRateLimiter::new(limit(1), limit(1));
        assert!(limiter.check(ip(1), Tier::General).is_ok());
        assert!(limiter.check(ip(1), Tier::Sensitive).is_ok());
        assert!(matches!(
            limiter.check(ip(1), Tier::General),
            Err(ApiError::RateLimited)
        ));
    }

    #[test]
    fn callers_are_charged_independently() {
        let limiter = IpRateLimiter::new(limit(1), limit(1));
        assert!(limiter.check(ip(1), Tier::General).is_ok());
        assert!(limiter.check(ip(2), Tier::General).is_ok());
        assert!(limiter.check(ip(1), Tier::General).is_err());
    }

    #[test]
    fn prune_drops_idle_buckets() {
        let limiter = IpRateLimiter::new(limit(10), limit(10));
        limiter.check(ip(1), Tier::General).unwrap();
        assert_eq!(limiter.tracked(), 1);

        limiter.prune(Instant::now() + Duration::from_secs(61));
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn max_entries_prevents_unbounded_growth() {
        let mut w = SlidingWindow::default();
        let now = Instant::now();
        for _ in 0..MAX_BUCKET_ENTRIES + 100 {
            w.check_and_record(now, limit(u32::MAX));
        }
        assert!(w.hits.len() <= MAX_BUCKET_ENTRIES);
    }
}
