//! Error types for rate limiter setup.
//!
//! Admission rejections are not errors: they are ordinary [`Decision`](crate::Decision)s
//! that the middleware turns into 429 responses. Everything here is raised while
//! building the limiter and is fatal to starting it.

use std::time::Duration;

/// Invalid rate limiter configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Capacity must be finite and > 0.
    #[error("capacity must be a positive, finite number of tokens (got {0})")]
    InvalidCapacity(f64),
    /// Refill rate must be finite and > 0.
    #[error("refill_rate must be a positive, finite number of tokens per second (got {0})")]
    InvalidRefillRate(f64),
    /// Header-based key extraction was given a name that is not a valid header.
    #[error("invalid header name for key extraction: {name:?}")]
    InvalidHeaderName {
        /// Name provided by caller.
        name: String,
    },
    /// Eviction sweep interval must be > 0.
    #[error("eviction interval must be > 0 (got {0:?})")]
    InvalidEvictionInterval(Duration),
    /// Idle threshold must be > 0.
    #[error("idle threshold must be > 0 (got {0:?})")]
    InvalidIdleThreshold(Duration),
    /// Only one of the eviction interval and idle threshold was given.
    #[error("eviction needs both an interval and an idle threshold (missing {missing})")]
    IncompleteEviction {
        /// The setting that was left out.
        missing: &'static str,
    },
    /// Background eviction was started outside a tokio runtime.
    #[error("idle eviction must be started from within a tokio runtime")]
    NoRuntime,
}
