//! Per-origin brute-force lockout.
//!
//! Flow Overview:
//! 1) `check` rejects an origin while its ban is active.
//! 2) `record_failure` counts consecutive authentication failures. Reaching the
//!    threshold bans the origin for the lockout window.
//! 3) `record_success` clears the origin. A ban or a stale counter also resets
//!    once the lockout window has elapsed.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
struct BanRecord {
    failures: u32,
    first_failure: Instant,
    banned_until: Option<Instant>,
}

impl BanRecord {
    fn is_stale(&self, now: Instant, lockout: Duration) -> bool {
        match self.banned_until {
            Some(until) => now >= until,
            None => now.saturating_duration_since(self.first_failure) >= lockout,
        }
    }
}

#[derive(Debug)]
pub struct BruteForceGuard {
    threshold: u32,
    lockout: Duration,
    records: RwLock<HashMap<String, BanRecord>>,
}

impl BruteForceGuard {
    #[must_use]
    pub fn new(threshold: u32, lockout: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            lockout,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Remaining ban time for `origin`, if banned.
    pub async fn check(&self, origin: &str) -> Option<Duration> {
        let now = Instant::now();
        let records = self.records.read().await;
        records
            .get(origin)
            .and_then(|record| record.banned_until)
            .filter(|until| *until > now)
            .map(|until| until.saturating_duration_since(now))
    }

    /// Count a failed authentication. Returns the ban length when this failure
    /// triggers a ban.
    pub async fn record_failure(&self, origin: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut records = self.records.write().await;
        let record = records.entry(origin.to_string()).or_insert(BanRecord {
            failures: 0,
            first_failure: now,
            banned_until: None,
        });

        if record.is_stale(now, self.lockout) {
            *record = BanRecord {
                failures: 0,
                first_failure: now,
                banned_until: None,
            };
        }
        if record.banned_until.is_some() {
            return None;
        }

        record.failures += 1;
        if record.failures >= self.threshold {
            record.banned_until = Some(now + self.lockout);
            warn!(
                origin,
                failures = record.failures,
                lockout_secs = self.lockout.as_secs(),
                "origin banned after repeated authentication failures"
            );
            return Some(self.lockout);
        }
        None
    }

    /// Clear the counter and any ban for `origin`.
    pub async fn record_success(&self, origin: &str) {
        let mut records = self.records.write().await;
        records.remove(origin);
    }

    /// Drop expired bans and stale counters. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_stale(now, self.lockout));
        before - records.len()
    }

    pub async fn tracked_origins(&self) -> usize {
        self.records.read().await.len()
    }
}
