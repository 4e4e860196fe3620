//! Telemetry for admission decisions.
//!
//! The middleware reports what it decided as [`AdmissionEvent`]s. Events flow
//! through `TelemetrySink` implementations, which are plain
//! `tower::Service<AdmissionEvent>`s, so they can log, aggregate, or forward
//! events to external systems.
//!
//! Telemetry is a side channel: emission is best-effort and never changes a
//! decision. Per-request bucket state is also logged at `trace` level under
//! the `tollgate::store` target regardless of which sink is installed.
//!
//! ```rust
//! use tollgate::telemetry::{AdmissionEvent, MemorySink};
//! use std::time::Duration;
//!
//! let sink = MemorySink::with_capacity(128);
//! let event = AdmissionEvent::Rejected {
//!     key: "10.0.0.7".into(),
//!     remaining: 0.0,
//!     retry_after: Duration::from_millis(500),
//! };
//! assert!(event.to_string().contains("Rejected"));
//! assert!(sink.is_empty());
//! ```

pub mod events;
pub mod sinks;

pub use events::{event_to_json, AdmissionEvent};
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, TelemetrySink};
