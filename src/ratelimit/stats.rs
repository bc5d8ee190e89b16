//! Process-wide admission statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::trace;

use super::store::EvictionListener;

/// Monotonic counters shared by the admission path and the store's eviction hook.
///
/// All counters only ever increase. Occupancy and uptime are computed when a snapshot is taken.
#[derive(Debug)]
pub struct Stats {
    size: usize,
    evicted: AtomicU64,
    created: AtomicU64,
    renewed: AtomicU64,
    passed: AtomicU64,
    throttled: AtomicU64,
    started_at: DateTime<Utc>,
    started: Instant,
}

/// A point-in-time view of [`Stats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Store capacity
    pub size: usize,
    /// Keys currently held
    pub keys: usize,
    pub evicted: u64,
    pub created: u64,
    pub renewed: u64,
    pub passed: u64,
    pub throttled: u64,
    /// Seconds since start
    pub uptime: f64,
    pub started: DateTime<Utc>,
}

impl Stats {
    /// Create a collector for a store of capacity `size`.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            evicted: AtomicU64::new(0),
            created: AtomicU64::new(0),
            renewed: AtomicU64::new(0),
            passed: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_renewed(&self) {
        self.renewed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_passed(&self) {
        self.passed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_throttled(&self) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters. `keys` is the store's current occupancy.
    pub fn snapshot(&self, keys: usize) -> StatsSnapshot {
        StatsSnapshot {
            size: self.size,
            keys,
            evicted: self.evicted.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            renewed: self.renewed.load(Ordering::Relaxed),
            passed: self.passed.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            uptime: self.started.elapsed().as_secs_f64(),
            started: self.started_at,
        }
    }
}

impl EvictionListener for Stats {
    fn on_evict(&self, key: &str) {
        trace!(key = %key, "Counting eviction");
        self.record_evicted();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_counters_start_at_zero() {
        let stats = Stats::new(100);
        let snapshot = stats.snapshot(0);

        assert_eq!(snapshot.size, 100);
        assert_eq!(snapshot.keys, 0);
        assert_eq!(snapshot.created, 0);
        assert_eq!(snapshot.passed, 0);
        assert_eq!(snapshot.throttled, 0);
        assert_eq!(snapshot.evicted, 0);
    }

    #[test]
    fn test_eviction_listener_counts() {
        let stats = Stats::new(1);
        stats.on_evict("a");
        stats.on_evict("b");
        assert_eq!(stats.snapshot(1).evicted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_does_not_mutate() {
        let stats = Stats::new(10);
        stats.record_created();
        stats.record_passed();
        stats.record_throttled();

        let first = stats.snapshot(1);
        tokio::time::advance(Duration::from_secs(3)).await;
        let second = stats.snapshot(1);

        assert_eq!(first.created, second.created);
        assert_eq!(first.passed, second.passed);
        assert_eq!(first.throttled, second.throttled);
        assert_eq!(first.started, second.started);
        assert!(second.uptime - first.uptime >= 3.0);
    }

    #[test]
    fn test_concurrent_updates() {
        let stats = Arc::new(Stats::new(10));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_passed();
                        stats.record_throttled();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = stats.snapshot(0);
        assert_eq!(snapshot.passed, 4000);
        assert_eq!(snapshot.throttled, 4000);
    }

    #[test]
    fn test_snapshot_serializes_flat() {
        let stats = Stats::new(5);
        let json = serde_json::to_value(stats.snapshot(2)).unwrap();

        for field in [
            "size", "keys", "evicted", "created", "renewed", "passed", "throttled", "uptime",
            "started",
        ] {
            assert!(json.get(field).is_some(), "missing field {}", field);
        }
        assert_eq!(json["size"], 5);
        assert_eq!(json["keys"], 2);
    }
}
