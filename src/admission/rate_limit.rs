//! Sliding-window rate limiting.
//!
//! Each key keeps the timestamps of its accepted requests inside the trailing
//! window. A check prunes timestamps at least `window` old, rejects when the
//! remainder has reached the limit and records `now` otherwise. There is no
//! smoothing: exactly `limit` requests pass in any rolling window.
//!
//! Memory is bounded two ways: `sweep` drops keys whose windows are empty, and
//! inserting a new key into a full table evicts the least recently seen key.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateLimitDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

#[derive(Debug)]
struct Window {
    hits: VecDeque<Instant>,
    last_seen: Instant,
}

impl Window {
    fn prune(&mut self, now: Instant, window: Duration) {
        while self
            .hits
            .front()
            .is_some_and(|hit| now.saturating_duration_since(*hit) >= window)
        {
            self.hits.pop_front();
        }
    }
}

#[derive(Debug)]
pub struct SlidingWindowLimiter {
    limit: u32,
    window: Duration,
    max_keys: usize,
    windows: RwLock<HashMap<String, Window>>,
}

impl SlidingWindowLimiter {
    #[must_use]
    pub fn new(limit: u32, window: Duration, max_keys: usize) -> Self {
        Self {
            limit,
            window,
            max_keys: max_keys.max(1),
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// Check `key` against the default limit.
    pub async fn check(&self, key: &str) -> RateLimitDecision {
        self.check_with_limit(key, self.limit).await
    }

    /// Check `key` against an explicit limit, e.g. a per-API-key quota.
    pub async fn check_with_limit(&self, key: &str, limit: u32) -> RateLimitDecision {
        let now = Instant::now();
        let mut windows = self.windows.write().await;

        if !windows.contains_key(key) && windows.len() >= self.max_keys {
            Self::evict(&mut windows, now, self.window);
        }

        let entry = windows.entry(key.to_string()).or_insert_with(|| Window {
            hits: VecDeque::new(),
            last_seen: now,
        });
        entry.last_seen = now;
        entry.prune(now, self.window);

        let used = u32::try_from(entry.hits.len()).unwrap_or(u32::MAX);
        if used >= limit {
            let retry_after = entry
                .hits
                .front()
                .map_or(self.window, |oldest| {
                    self.window
                        .saturating_sub(now.saturating_duration_since(*oldest))
                });
            return RateLimitDecision::Limited { retry_after };
        }

        entry.hits.push_back(now);
        RateLimitDecision::Allowed {
            remaining: limit - used - 1,
        }
    }

    fn evict(windows: &mut HashMap<String, Window>, now: Instant, window: Duration) {
        windows.retain(|_, entry| {
            entry.prune(now, window);
            !entry.hits.is_empty()
        });
        if windows.is_empty() {
            return;
        }
        let oldest = windows
            .iter()
            .min_by_key(|(_, entry)| entry.last_seen)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            debug!("rate limiter full, evicting least recently seen key");
            windows.remove(&key);
        }
    }

    /// Drop keys with no hits left in the window. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.write().await;
        let before = windows.len();
        windows.retain(|_, entry| {
            entry.prune(now, self.window);
            !entry.hits.is_empty()
        });
        before - windows.len()
    }

    /// Number of tracked keys.
    pub async fn tracked_keys(&self) -> usize {
        self.windows.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn exactly_limit_requests_pass() {
        let limiter = SlidingWindowLimiter::new(5, Duration::from_secs(60), 100);
        for expected_remaining in (0..5).rev() {
            assert_eq!(
                limiter.check("client").await,
                RateLimitDecision::Allowed {
                    remaining: expected_remaining
                }
            );
        }
        assert_eq!(
            limiter.check("client").await,
            RateLimitDecision::Limited {
                retry_after: Duration::from_secs(60)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(10), 100);
        assert!(limiter.check("c").await.is_allowed());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(limiter.check("c").await.is_allowed());
        assert_eq!(
            limiter.check("c").await,
            RateLimitDecision::Limited {
                retry_after: Duration::from_secs(4)
            }
        );

        // First hit ages out; one slot opens, not two.
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(limiter.check("c").await.is_allowed());
        assert!(!limiter.check("c").await.is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_requests_are_not_counted() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(10), 100);
        assert!(limiter.check("c").await.is_allowed());
        for _ in 0..5 {
            assert!(!limiter.check("c").await.is_allowed());
        }
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(limiter.check("c").await.is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(10), 100);
        assert!(limiter.check("a").await.is_allowed());
        assert!(limiter.check("b").await.is_allowed());
        assert!(!limiter.check("a").await.is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_limit_overrides_default() {
        let limiter = SlidingWindowLimiter::new(100, Duration::from_secs(10), 100);
        assert!(limiter.check_with_limit("key", 1).await.is_allowed());
        assert!(!limiter.check_with_limit("key", 1).await.is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_idle_keys() {
        let limiter = SlidingWindowLimiter::new(5, Duration::from_secs(10), 100);
        limiter.check("old").await;
        tokio::time::advance(Duration::from_secs(8)).await;
        limiter.check("new").await;
        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(limiter.sweep().await, 1);
        assert_eq!(limiter.tracked_keys().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn full_table_evicts_least_recent() {
        let limiter = SlidingWindowLimiter::new(5, Duration::from_secs(60), 2);
        limiter.check("a").await;
        tokio::time::advance(Duration::from_secs(1)).await;
        limiter.check("b").await;
        tokio::time::advance(Duration::from_secs(1)).await;
        limiter.check("c").await;
        assert_eq!(limiter.tracked_keys().await, 2);

        // "a" was evicted, so it starts from a fresh window.
        for _ in 0..4 {
            limiter.check("a").await;
        }
        assert!(limiter.check("a").await.is_allowed());
    }
}
