//! Per-key limiter state.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::bucket::{Limit, TokenBucket};

/// A limiter entry shared between the store and in-flight decisions.
///
/// The mutex provides per-key exclusion: callers for different keys never contend on it.
pub type SharedEntry = Arc<Mutex<LimiterEntry>>;

/// A token bucket bound to a key and the limit it was configured with.
#[derive(Debug)]
pub struct LimiterEntry {
    key: String,
    bucket: TokenBucket,
}

impl LimiterEntry {
    /// Create an entry on behalf of the request that establishes it.
    ///
    /// That request's token is taken before the entry is visible to anyone else.
    pub fn new(key: impl Into<String>, limit: Limit, now: Instant) -> Self {
        Self {
            key: key.into(),
            bucket: TokenBucket::establish(limit, now),
        }
    }

    /// Like [`LimiterEntry::new`], wrapped for sharing.
    pub fn shared(key: impl Into<String>, limit: Limit, now: Instant) -> SharedEntry {
        Arc::new(Mutex::new(Self::new(key, limit, now)))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The limit this entry was created with.
    pub fn limit(&self) -> Limit {
        self.bucket.limit()
    }

    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.bucket.try_acquire(now)
    }

    pub fn time_until_acquire(&self, now: Instant) -> Duration {
        self.bucket.time_until_acquire(now)
    }

    #[cfg(test)]
    pub fn available(&self, now: Instant) -> f64 {
        self.bucket.available(now)
    }
}

/// A token claimed ahead of time by a blocking waiter.
///
/// The token becomes usable at [`Reservation::ready_at`]. Dropping a reservation without
/// redeeming it hands the token back to the entry it was taken from.
#[derive(Debug)]
#[must_use = "dropping a reservation releases its token"]
pub struct Reservation {
    entry: SharedEntry,
    ready_at: Instant,
    redeemed: bool,
}

impl Reservation {
    /// Claim a token from `entry` if one is available within `max_wait`.
    ///
    /// The per-key lock is held only for the duration of the claim.
    pub fn reserve(entry: &SharedEntry, now: Instant, max_wait: Duration) -> Option<Self> {
        let wait = entry.lock().bucket.reserve(now, max_wait)?;
        Some(Self {
            entry: Arc::clone(entry),
            ready_at: now + wait,
            redeemed: false,
        })
    }

    pub fn ready_at(&self) -> Instant {
        self.ready_at
    }

    /// The remaining wait from `now`.
    pub fn delay_from(&self, now: Instant) -> Duration {
        self.ready_at.saturating_duration_since(now)
    }

    /// Use the token. Callers wait until [`Reservation::ready_at`] first.
    pub fn redeem(mut self) {
        self.redeemed = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.redeemed {
            self.entry.lock().bucket.release(Instant::now());
        }
    }
}
