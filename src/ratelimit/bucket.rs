//! Token bucket implementation.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Result, ThrottledError};

/// The configuration a limiter is created with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limit {
    /// Tokens replenished per second
    pub rate: f64,
    /// Maximum number of tokens the bucket holds
    pub burst: u32,
}

impl Limit {
    /// Create a limit, rejecting non-positive or non-finite values.
    pub fn new(rate: f64, burst: u32) -> Result<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ThrottledError::InvalidRequest(format!(
                "rate must be a positive number, got {}",
                rate
            )));
        }
        if burst == 0 {
            return Err(ThrottledError::InvalidRequest(
                "burst must be a positive integer".to_string(),
            ));
        }
        Ok(Self { rate, burst })
    }

    /// Parse a limit from the raw `rate` and `burst` request parameters.
    pub fn parse(rate: &str, burst: &str) -> Result<Self> {
        let rate: f64 = rate
            .parse()
            .map_err(|_| ThrottledError::InvalidRequest(format!("invalid rate {:?}", rate)))?;
        let burst: u32 = burst
            .parse()
            .map_err(|_| ThrottledError::InvalidRequest(format!("invalid burst {:?}", burst)))?;
        Self::new(rate, burst)
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/s burst {}", self.rate, self.burst)
    }
}

/// A token bucket.
///
/// The bucket starts full and refills continuously at `rate` tokens per second up to `burst`.
/// It has no internal synchronization; callers serialize access (see [`super::LimiterEntry`]).
///
/// `tokens` drops below zero only while blocking waiters hold reservations: each reservation
/// is a token borrowed from the future, which keeps waiters on one key paced at `1 / rate`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    limit: Limit,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(limit: Limit, now: Instant) -> Self {
        Self {
            limit,
            tokens: limit.burst as f64,
            last_refill: now,
        }
    }

    /// Create a bucket whose first token has gone to the request that established it.
    pub fn establish(limit: Limit, now: Instant) -> Self {
        let mut bucket = Self::new(limit, now);
        bucket.tokens -= 1.0;
        bucket
    }

    /// Take one token if the refilled balance allows it.
    ///
    /// Returns `true` if the token was taken. A denial leaves the bucket untouched.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        let tokens = self.projected_tokens(now);
        if tokens >= 1.0 {
            self.commit(tokens - 1.0, now);
            true
        } else {
            false
        }
    }

    /// How long until at least one token is available. Does not mutate the bucket.
    pub fn time_until_acquire(&self, now: Instant) -> Duration {
        let tokens = self.projected_tokens(now);
        if tokens >= 1.0 {
            Duration::ZERO
        } else {
            duration_from_secs((1.0 - tokens) / self.limit.rate)
        }
    }

    /// Take one token now or in the future.
    ///
    /// If a token is available within `max_wait`, it is claimed immediately (possibly driving the
    /// balance negative) and the time until it becomes usable is returned. Otherwise nothing is
    /// consumed and `None` is returned.
    pub fn reserve(&mut self, now: Instant, max_wait: Duration) -> Option<Duration> {
        let wait = self.time_until_acquire(now);
        if wait > max_wait {
            return None;
        }

        self.commit(self.projected_tokens(now) - 1.0, now);
        Some(wait)
    }

    /// Return a token claimed by [`TokenBucket::reserve`] but never used.
    pub fn release(&mut self, now: Instant) {
        let tokens = (self.projected_tokens(now) + 1.0).min(self.limit.burst as f64);
        self.commit(tokens, now);
    }

    /// Tokens available at `now`, without mutating the bucket.
    pub fn available(&self, now: Instant) -> f64 {
        self.projected_tokens(now)
    }

    pub fn limit(&self) -> Limit {
        self.limit
    }

    pub fn rate(&self) -> f64 {
        self.limit.rate
    }

    pub fn burst(&self) -> u32 {
        self.limit.burst
    }

    fn projected_tokens(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * self.limit.rate).min(self.limit.burst as f64)
    }

    fn commit(&mut self, tokens: f64, now: Instant) {
        self.tokens = tokens;
        // Callers may sample `now` before taking the entry lock, so it can trail last_refill.
        if now > self.last_refill {
            self.last_refill = now;
        }
    }
}

fn duration_from_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
