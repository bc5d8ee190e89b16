//! Admission decisions against the limiter store.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::bucket::Limit;
use super::entry::{Reservation, SharedEntry};
use super::stats::{Stats, StatsSnapshot};
use super::store::{LimiterStore, Lookup};
use crate::error::{Result, ThrottledError};

/// Upper bound on how long a blocking decision may wait for a token.
pub const MAX_WAIT: Duration = Duration::from_secs(10);

/// How a decision treats an empty bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Deny straight away
    Immediate,
    /// Wait for a token for up to `timeout`, capped at the controller's wait budget
    Blocking { timeout: Duration },
}

impl Mode {
    /// Blocking mode with the full wait budget.
    pub fn blocking() -> Self {
        Mode::Blocking { timeout: MAX_WAIT }
    }
}

/// The result of an admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// First request for the key; the limiter was established and the request admitted
    Created,
    /// The key's limit changed; the limiter was replaced and the request admitted
    Renewed,
    /// Admitted by an existing limiter
    Admitted,
    /// Rejected, either immediately or after the wait budget ran out
    Denied,
}

impl Outcome {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Outcome::Denied)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Created => "created",
            Outcome::Renewed => "renewed",
            Outcome::Admitted => "admitted",
            Outcome::Denied => "denied",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for admission backends served over the transport layer.
#[async_trait]
pub trait Decider: Send + Sync {
    /// Decide whether to admit one operation for `key` under the given `rate` and `burst`.
    async fn decide(&self, key: &str, rate: &str, burst: &str, mode: Mode) -> Result<Outcome>;

    /// Current statistics.
    fn stats(&self) -> StatsSnapshot;
}

/// Owns the limiter store and statistics and runs each request's decision against them.
///
/// Construct one at startup and share it (e.g. behind an `Arc`) between request handlers.
pub struct AdmissionController {
    store: LimiterStore,
    stats: Arc<Stats>,
    max_wait: Duration,
}

impl AdmissionController {
    /// Create a controller whose store holds at most `capacity` keys.
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_max_wait(capacity, MAX_WAIT)
    }

    /// Create a controller with a custom wait budget.
    pub fn with_max_wait(capacity: usize, max_wait: Duration) -> Result<Self> {
        let stats = Arc::new(Stats::new(capacity));
        let store = LimiterStore::new(capacity, stats.clone())?;
        debug!(capacity = store.capacity(), max_wait = ?max_wait, "Admission controller created");
        Ok(Self {
            store,
            stats,
            max_wait,
        })
    }

    /// Take a statistics snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot(self.store.len())
    }

    /// Decide whether to admit one operation for `key`.
    ///
    /// Malformed parameters yield [`ThrottledError::InvalidRequest`] without touching the store
    /// or the statistics.
    pub async fn decide(&self, key: &str, rate: &str, burst: &str, mode: Mode) -> Result<Outcome> {
        self.decide_with_cancel(key, rate, burst, mode, std::future::pending())
            .await
    }

    /// Like [`AdmissionController::decide`], but a blocking wait ends with
    /// [`Outcome::Denied`] as soon as `cancel` resolves. The reserved token is returned.
    pub async fn decide_with_cancel<F>(
        &self,
        key: &str,
        rate: &str,
        burst: &str,
        mode: Mode,
        cancel: F,
    ) -> Result<Outcome>
    where
        F: Future<Output = ()> + Send,
    {
        if key.is_empty() {
            return Err(ThrottledError::InvalidRequest("key is required".to_string()));
        }
        let limit = Limit::parse(rate, burst)?;

        let now = Instant::now();
        let (entry, lookup) = self.store.get_or_create(key, limit, now)?;

        let outcome = match lookup {
            // The store took this request's token before publishing the entry
            Lookup::Created => {
                self.stats.record_created();
                Outcome::Created
            }
            Lookup::Renewed => {
                self.stats.record_renewed();
                Outcome::Renewed
            }
            Lookup::Existing => {
                let admitted = match mode {
                    Mode::Immediate => entry.lock().try_acquire(now),
                    Mode::Blocking { timeout } => {
                        self.wait(key, &entry, now, timeout.min(self.max_wait), cancel)
                            .await
                    }
                };
                if admitted {
                    Outcome::Admitted
                } else {
                    Outcome::Denied
                }
            }
        };

        if outcome.is_admitted() {
            self.stats.record_passed();
        } else {
            self.stats.record_throttled();
        }

        debug!(key = %key, limit = %limit, mode = ?mode, outcome = %outcome, "Admission decision");
        Ok(outcome)
    }

    /// Wait for a token, holding a reservation so concurrent waiters queue behind each other.
    ///
    /// No lock is held while sleeping.
    async fn wait<F>(
        &self,
        key: &str,
        entry: &SharedEntry,
        now: Instant,
        budget: Duration,
        cancel: F,
    ) -> bool
    where
        F: Future<Output = ()> + Send,
    {
        let reservation = match Reservation::reserve(entry, now, budget) {
            Some(reservation) => reservation,
            None => {
                let needed = entry.lock().time_until_acquire(now);
                debug!(key = %key, needed = ?needed, budget = ?budget, "Wait exceeds budget");
                return false;
            }
        };

        trace!(key = %key, delay = ?reservation.delay_from(now), "Waiting for token");

        tokio::select! {
            _ = tokio::time::sleep_until(reservation.ready_at()) => {
                reservation.redeem();
                true
            }
            _ = cancel => {
                debug!(key = %key, "Wait cancelled");
                false
            }
        }
    }
}

#[async_trait]
impl Decider for AdmissionController {
    async fn decide(&self, key: &str, rate: &str, burst: &str, mode: Mode) -> Result<Outcome> {
        AdmissionController::decide(self, key, rate, burst, mode).await
    }

    fn stats(&self) -> StatsSnapshot {
        self.snapshot()
    }
}
