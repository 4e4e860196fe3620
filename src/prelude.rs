//! Convenient re-exports for common tollgate types.
pub use crate::{
    clock::{Clock, ManualClock, MonotonicClock},
    config::RateLimitConfig,
    rate_limit::{
        BucketLimits, BucketStore, ClientKey, Decision, KeyExtractor, KeyStrategy,
        MissingKeyPolicy, Principal, RateLimitLayer, RateLimiter,
    },
    telemetry::{AdmissionEvent, LogSink, MemorySink, TelemetrySink},
    ConfigError,
};
