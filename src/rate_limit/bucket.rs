//! The token bucket algorithm.
//!
//! Refill is lazy: a bucket catches up on elapsed time whenever it is touched,
//! so there is no timer per key. Tokens are real-valued; only withdrawal is
//! integral (one token per admitted request).

use std::time::Duration;

use crate::rate_limit::Decision;
use crate::ConfigError;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Validated capacity and refill rate shared by every bucket in a store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketLimits {
    capacity: f64,
    refill_rate: f64,
}

impl BucketLimits {
    /// Create limits, rejecting non-positive or non-finite values.
    ///
    /// # Examples
    /// ```
    /// use tollgate::BucketLimits;
    /// let limits = BucketLimits::new(5.0, 2.0).unwrap();
    /// assert_eq!(limits.capacity(), 5.0);
    /// assert!(BucketLimits::new(0.0, 2.0).is_err());
    /// ```
    pub fn new(capacity: f64, refill_rate: f64) -> Result<Self, ConfigError> {
        if !(capacity.is_finite() && capacity > 0.0) {
            return Err(ConfigError::InvalidCapacity(capacity));
        }
        if !(refill_rate.is_finite() && refill_rate > 0.0) {
            return Err(ConfigError::InvalidRefillRate(refill_rate));
        }
        Ok(Self { capacity, refill_rate })
    }

    /// Maximum tokens a bucket can hold.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Time an empty bucket needs to refill completely.
    ///
    /// A bucket idle for at least this long is indistinguishable from a new one.
    pub fn full_refill(&self) -> Duration {
        saturating_secs(self.capacity / self.refill_rate)
    }
}

/// Per-key token bucket state.
///
/// Timestamps are nanoseconds on the owning store's [`Clock`](crate::Clock).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: u64,
}

impl TokenBucket {
    /// Create a full bucket without validating its parameters.
    ///
    /// Prefer [`TokenBucket::full`]; this exists for callers that want a
    /// non-refilling bucket (`refill_rate == 0.0`).
    pub fn new(capacity: f64, refill_rate: f64, now: u64) -> Self {
        Self { capacity, refill_rate, tokens: capacity, last_refill: now }
    }

    /// Create a full bucket from validated limits.
    pub fn full(limits: BucketLimits, now: u64) -> Self {
        Self::new(limits.capacity, limits.refill_rate, now)
    }

    /// Current token count as of the last refill.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Maximum tokens this bucket can hold.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Timestamp of the last refill computation.
    pub fn last_refill_nanos(&self) -> u64 {
        self.last_refill
    }

    /// Time since the bucket was last touched; zero if `now` is behind it.
    pub fn idle_for(&self, now: u64) -> Duration {
        Duration::from_nanos(now.saturating_sub(self.last_refill))
    }

    /// Add the tokens earned since the last refill and move the refill mark to `now`.
    ///
    /// A clock that moved backwards earns nothing.
    pub fn refill(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.last_refill) as f64 / NANOS_PER_SEC;
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Refill, then try to withdraw one token.
    ///
    /// The threshold is inclusive: exactly one token left is enough.
    pub fn admit(&mut self, now: u64) -> Decision {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Decision::Admitted { remaining: self.tokens }
        } else {
            Decision::Rejected { remaining: self.tokens, retry_after: self.retry_after() }
        }
    }

    /// Value-returning form of [`TokenBucket::admit`].
    pub fn admitted(mut self, now: u64) -> (Decision, Self) {
        let decision = self.admit(now);
        (decision, self)
    }

    /// Time until at least one token is available, as of the last refill.
    ///
    /// Saturates to `Duration::MAX` for a bucket that never refills.
    pub fn retry_after(&self) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        saturating_secs((1.0 - self.tokens) / self.refill_rate)
    }
}

fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
