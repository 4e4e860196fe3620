//! Rate limiting primitives.
//!
//! This module provides the building blocks for per-client admission control:
//! - [`TokenBucket`]: the per-key algorithm (lazy refill, one token per request).
//! - [`BucketStore`]: concurrent `ClientKey → TokenBucket` map with idle eviction.
//! - [`RateLimitLayer`]: Tower middleware that answers `429 Too Many Requests`.
//! - [`Decision`]: the result of an admission check.
//! - [`RateLimiter`]: owns a store and its evictor for the life of a server.
//!
//! # Architecture
//!
//! - **Middleware**: `RateLimitLayer` wraps your service. It extracts a
//!   [`ClientKey`] from each request and asks the store for a decision.
//! - **Logic**: `TokenBucket` (in `bucket` module) handles the math.
//! - **Storage**: `BucketStore` (in `store` module) owns every bucket and
//!   serializes access per key.
//! - **Maintenance**: `spawn_evictor` (in `eviction` module) drops buckets that
//!   have been idle long enough.

use std::time::Duration;

pub mod bucket;
pub mod eviction;
pub mod key;
pub mod limiter;
pub mod middleware;
pub mod store;

pub use bucket::{BucketLimits, TokenBucket};
pub use eviction::{spawn_evictor, EvictionConfig, EvictorHandle};
pub use key::{ClientKey, KeyExtractor, KeyStrategy, MissingKeyPolicy, Principal};
pub use limiter::RateLimiter;
pub use middleware::{too_many_requests, RateLimitLayer, RateLimitService};
pub use store::{BucketHandle, BucketStore};

/// The decision returned by an admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// The request may proceed; one token was withdrawn.
    Admitted {
        /// Tokens left after the withdrawal.
        remaining: f64,
    },
    /// The request is rejected; no token was withdrawn.
    Rejected {
        /// Tokens in the bucket after refill (always < 1).
        remaining: f64,
        /// Time until at least one token is available.
        /// Useful for `Retry-After` headers.
        retry_after: Duration,
    },
}

impl Decision {
    /// Helper to check if admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted { .. })
    }

    /// Tokens left in the bucket after this decision.
    pub fn remaining(&self) -> f64 {
        match self {
            Decision::Admitted { remaining } | Decision::Rejected { remaining, .. } => *remaining,
        }
    }

    /// Retry hint for rejected requests.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Decision::Admitted { .. } => None,
            Decision::Rejected { retry_after, .. } => Some(*retry_after),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_accessors() {
        let admitted = Decision::Admitted { remaining: 2.0 };
        assert!(admitted.is_admitted());
        assert_eq!(admitted.remaining(), 2.0);
        assert_eq!(admitted.retry_after(), None);

        let rejected =
            Decision::Rejected { remaining: 0.25, retry_after: Duration::from_millis(375) };
        assert!(!rejected.is_admitted());
        assert_eq!(rejected.remaining(), 0.25);
        assert_eq!(rejected.retry_after(), Some(Duration::from_millis(375)));
    }
}
