#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # tollgate
//!
//! Per-client token-bucket admission control for Tower services.
//!
//! Every client key gets its own bucket holding up to `capacity` tokens and
//! refilling at `refill_rate` tokens per second. Each admitted request costs
//! one token; a request arriving at an empty bucket gets
//! `429 Too Many Requests` with a `Retry-After` hint.
//!
//! ## Features
//!
//! - **Lazy refill**: no timers per key, O(1) work per request
//! - **Per-key exclusion**: concurrent requests for one key never over-admit,
//!   different keys do not contend
//! - **Idle eviction** on a background task, bounding memory
//! - **Pluggable key extraction**: peer address, header, or authenticated principal
//! - **Telemetry** side channel for admission decisions
//!
//! ## Quick Start
//!
//! ```rust
//! use tollgate::{RateLimitConfig, RateLimiter};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RateLimitConfig::builder()
//!         .capacity(5.0)
//!         .refill_rate(2.0)
//!         .evict_idle(Duration::from_secs(30), Duration::from_secs(60))
//!         .build()
//!         .unwrap();
//!
//!     let limiter = RateLimiter::start(config).unwrap();
//!
//!     // Wrap your HTTP service: `ServiceBuilder::new().layer(limiter.layer()).service(app)`
//!     let _layer = limiter.layer();
//!
//!     limiter.shutdown().await;
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod prelude;
pub mod rate_limit;
pub mod telemetry;

// Re-exports
pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use config::{RateLimitConfig, RateLimitConfigBuilder};
#[cfg(feature = "serde")]
pub use config::RateLimitSettings;
pub use error::ConfigError;
pub use rate_limit::{
    spawn_evictor, too_many_requests, BucketHandle, BucketLimits, BucketStore, ClientKey,
    Decision, EvictionConfig, EvictorHandle, KeyExtractor, KeyStrategy, MissingKeyPolicy,
    Principal, RateLimitLayer, RateLimitService, RateLimiter, TokenBucket,
};
