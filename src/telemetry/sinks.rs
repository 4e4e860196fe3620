//! Destinations for [`AdmissionEvent`]s.
//!
//! Any cloneable `tower::Service<AdmissionEvent, Response = ()>` with a
//! `Send` future is a [`TelemetrySink`]; the types here cover the common
//! cases of discarding, logging, and recording events for assertions.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use futures::future::{ready, Ready};
use tower::{Service, ServiceExt};
use tracing::info;

use super::events::AdmissionEvent;

/// Receiver of admission events, installed with
/// [`RateLimitLayer::with_sink`](crate::RateLimitLayer::with_sink).
///
/// Implemented for every service of the right shape, so custom sinks only
/// need a `Service` impl.
pub trait TelemetrySink:
    Service<AdmissionEvent, Response = (), Error = Self::SinkError, Future = Self::SinkFuture>
    + Clone
    + Send
    + 'static
{
    /// The sink's error type.
    type SinkError: std::error::Error + Send + 'static;
    /// The sink's response future.
    type SinkFuture: std::future::Future<Output = Result<(), Self::SinkError>> + Send + 'static;
}

impl<S> TelemetrySink for S
where
    S: Service<AdmissionEvent, Response = ()> + Clone + Send + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    type SinkError = S::Error;
    type SinkFuture = S::Future;
}

/// Deliver `event` to `sink`, dropping it if the sink is unavailable or fails.
pub async fn emit_best_effort<S: TelemetrySink>(sink: S, event: AdmissionEvent) {
    if let Ok(mut sink) = sink.ready_oneshot().await {
        let _ = sink.call(event).await;
    }
}

/// Discards every event. The middleware's default.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl Service<AdmissionEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: AdmissionEvent) -> Self::Future {
        ready(Ok(()))
    }
}

/// Logs each event at `info` under the `tollgate::telemetry` target, with the
/// event's fields as structured `tracing` fields.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl Service<AdmissionEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: AdmissionEvent) -> Self::Future {
        match &event {
            AdmissionEvent::BucketCreated { key } => {
                info!(target: "tollgate::telemetry", key = %key, "bucket created");
            }
            AdmissionEvent::Admitted { key, remaining } => {
                info!(target: "tollgate::telemetry", key = %key, remaining, "admitted");
            }
            AdmissionEvent::Rejected { key, remaining, retry_after } => {
                info!(
                    target: "tollgate::telemetry",
                    key = %key,
                    remaining,
                    retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                    "rejected"
                );
            }
            AdmissionEvent::KeyMissing { policy } => {
                info!(target: "tollgate::telemetry", policy = ?policy, "key missing");
            }
        }
        ready(Ok(()))
    }
}

const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

/// Keeps the most recent events in memory, for tests and debugging endpoints.
///
/// Clones share one buffer. Once `capacity` events are held, each new event
/// displaces the oldest one.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<AdmissionEvent>>>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl MemorySink {
    /// A sink holding up to 10 000 events.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }

    /// A sink holding up to `capacity` events (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Recorded events, oldest first.
    pub fn events(&self) -> Vec<AdmissionEvent> {
        self.buffer().iter().cloned().collect()
    }

    /// Forget all recorded events. The dropped count is kept.
    pub fn clear(&self) {
        self.buffer().clear();
    }

    /// Number of events currently held.
    pub fn len(&self) -> usize {
        self.buffer().len()
    }

    /// Whether no events are held.
    pub fn is_empty(&self) -> bool {
        self.buffer().is_empty()
    }

    /// Events displaced because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn buffer(&self) -> MutexGuard<'_, VecDeque<AdmissionEvent>> {
        // Every critical section is a single push/pop, so a poisoned buffer is still whole.
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<AdmissionEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: AdmissionEvent) -> Self::Future {
        let mut buffer = self.buffer();
        if buffer.len() == self.capacity {
            buffer.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        buffer.push_back(event);
        ready(Ok(()))
    }
}
