use futures::future::BoxFuture;
use http::header::{self, HeaderValue};
use http::{Request, Response, StatusCode};
use serde_json::json;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower_layer::Layer;
use tower_service::Service;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::rate_limit::key::{KeyExtractor, KeyStrategy, MissingKeyPolicy};
use crate::rate_limit::store::BucketStore;
use crate::rate_limit::Decision;
use crate::telemetry::{emit_best_effort, AdmissionEvent, NullSink, TelemetrySink};

/// Build the `429 Too Many Requests` response sent to rejected clients.
///
/// The body is `{"error":"Too Many Requests"}`. With a retry hint, a
/// `Retry-After` header carries it in whole seconds, rounded up so clients
/// never retry before a token exists.
pub fn too_many_requests<B: From<String>>(retry_after: Option<Duration>) -> Response<B> {
    let body = json!({ "error": "Too Many Requests" }).to_string();
    let mut response = Response::new(B::from(body));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(wait) = retry_after {
        response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(ceil_secs(wait)));
    }
    response
}

fn ceil_secs(wait: Duration) -> u64 {
    wait.as_secs().saturating_add(u64::from(wait.subsec_nanos() > 0))
}

/// A layer that enforces per-client rate limits using a shared [`BucketStore`].
#[derive(Clone, Debug)]
pub struct RateLimitLayer<K = KeyStrategy, T = NullSink> {
    store: Arc<BucketStore>,
    extractor: Arc<K>,
    missing_key: MissingKeyPolicy,
    retry_after_header: bool,
    sink: T,
}

impl RateLimitLayer {
    /// Create a layer keyed on peer address, failing open, with `Retry-After` enabled.
    pub fn new(store: Arc<BucketStore>) -> Self {
        Self {
            store,
            extractor: Arc::new(KeyStrategy::default()),
            missing_key: MissingKeyPolicy::default(),
            retry_after_header: true,
            sink: NullSink,
        }
    }

    /// Create a layer using the key strategy and response settings of `config`.
    ///
    /// `store` should have been built with `config.limits()`.
    pub fn from_config(store: Arc<BucketStore>, config: &RateLimitConfig) -> Self {
        Self::new(store)
            .with_extractor(config.key_strategy().clone())
            .with_missing_key_policy(config.missing_key())
            .with_retry_after_header(config.retry_after_header())
    }
}

impl<K, T> RateLimitLayer<K, T> {
    /// Use a custom key extractor.
    pub fn with_extractor<K2: KeyExtractor>(self, extractor: K2) -> RateLimitLayer<K2, T> {
        RateLimitLayer {
            store: self.store,
            extractor: Arc::new(extractor),
            missing_key: self.missing_key,
            retry_after_header: self.retry_after_header,
            sink: self.sink,
        }
    }

    /// Choose what happens to requests without a key.
    pub fn with_missing_key_policy(mut self, policy: MissingKeyPolicy) -> Self {
        self.missing_key = policy;
        self
    }

    /// Toggle the `Retry-After` header on rejections.
    pub fn with_retry_after_header(mut self, enabled: bool) -> Self {
        self.retry_after_header = enabled;
        self
    }

    /// Report admission events to `sink`.
    pub fn with_sink<T2: TelemetrySink>(self, sink: T2) -> RateLimitLayer<K, T2> {
        RateLimitLayer {
            store: self.store,
            extractor: self.extractor,
            missing_key: self.missing_key,
            retry_after_header: self.retry_after_header,
            sink,
        }
    }

    /// The store this layer charges requests against.
    pub fn store(&self) -> &Arc<BucketStore> {
        &self.store
    }
}

impl<S, K, T: Clone> Layer<S> for RateLimitLayer<K, T> {
    type Service = RateLimitService<S, K, T>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService {
            inner: service,
            store: self.store.clone(),
            extractor: self.extractor.clone(),
            missing_key: self.missing_key,
            retry_after_header: self.retry_after_header,
            sink: self.sink.clone(),
        }
    }
}

/// Middleware service that admits or rejects each request before it reaches `S`.
#[derive(Clone, Debug)]
pub struct RateLimitService<S, K = KeyStrategy, T = NullSink> {
    inner: S,
    store: Arc<BucketStore>,
    extractor: Arc<K>,
    missing_key: MissingKeyPolicy,
    retry_after_header: bool,
    sink: T,
}

impl<S, K, T, ReqB, ResB> Service<Request<ReqB>> for RateLimitService<S, K, T>
where
    S: Service<Request<ReqB>, Response = Response<ResB>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    K: KeyExtractor,
    T: TelemetrySink,
    ReqB: Send + 'static,
    ResB: From<String> + Send + 'static,
{
    type Response = Response<ResB>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqB>) -> Self::Future {
        // Call the instance that was driven to readiness, leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let sink = self.sink.clone();

        let Some(key) = self.extractor.extract(&req) else {
            let policy = self.missing_key;
            warn!(
                target: "tollgate::middleware",
                policy = ?policy,
                "no client key in request; check the key extraction strategy"
            );
            return Box::pin(async move {
                emit_best_effort(sink, AdmissionEvent::KeyMissing { policy }).await;
                match policy {
                    MissingKeyPolicy::FailOpen => inner.call(req).await,
                    MissingKeyPolicy::FailClosed => Ok(too_many_requests(None)),
                }
            });
        };

        // The bucket lock is released before anything is awaited.
        let (decision, created) = {
            let mut bucket = self.store.get_or_create(&key);
            let created = bucket.is_new();
            (self.store.admit(&mut bucket), created)
        };
        let retry_after_header = self.retry_after_header;

        Box::pin(async move {
            if created {
                emit_best_effort(sink.clone(), AdmissionEvent::BucketCreated { key: key.clone() })
                    .await;
            }
            match decision {
                Decision::Admitted { remaining } => {
                    emit_best_effort(sink, AdmissionEvent::Admitted { key, remaining }).await;
                    inner.call(req).await
                }
                Decision::Rejected { remaining, retry_after } => {
                    debug!(
                        target: "tollgate::middleware",
                        key = %key,
                        retry_after = ?retry_after,
                        "rate limit exceeded"
                    );
                    emit_best_effort(sink, AdmissionEvent::Rejected { key, remaining, retry_after })
                        .await;
                    Ok(too_many_requests(retry_after_header.then_some(retry_after)))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rate_limit::bucket::BucketLimits;
    use crate::telemetry::MemorySink;
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn store(capacity: f64, rate: f64) -> (Arc<BucketStore>, ManualClock) {
        let clock = ManualClock::new();
        let store =
            BucketStore::new(BucketLimits::new(capacity, rate).unwrap()).with_clock(clock.clone());
        (Arc::new(store), clock)
    }

    fn request_from(addr: &str) -> Request<()> {
        let mut req = Request::builder().uri("/").body(()).unwrap();
        req.extensions_mut().insert::<SocketAddr>(addr.parse().unwrap());
        req
    }

    #[derive(Clone)]
    struct Hello {
        calls: Arc<AtomicUsize>,
    }

    impl Service<Request<()>> for Hello {
        type Response = Response<String>;
        type Error = Infallible;
        type Future = futures::future::Ready<Result<Response<String>, Infallible>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: Request<()>) -> Self::Future {
            self.calls.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(Response::new(String::from("hello"))))
        }
    }

    fn counting_service(calls: Arc<AtomicUsize>) -> Hello {
        Hello { calls }
    }

    #[test]
    fn retry_after_rounds_up() {
        assert_eq!(ceil_secs(Duration::from_millis(500)), 1);
        assert_eq!(ceil_secs(Duration::from_secs(2)), 2);
        assert_eq!(ceil_secs(Duration::from_millis(2001)), 3);
        assert_eq!(ceil_secs(Duration::MAX), u64::MAX);
    }

    #[test]
    fn rejection_response_shape() {
        let response: Response<String> = too_many_requests(Some(Duration::from_millis(500)));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        let body: serde_json::Value = serde_json::from_str(response.body()).unwrap();
        assert_eq!(body, json!({ "error": "Too Many Requests" }));

        let response: Response<String> = too_many_requests(None);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[tokio::test]
    async fn forwards_until_exhausted() {
        let (store, _clock) = store(2.0, 1.0);
        let calls = Arc::new(AtomicUsize::new(0));
        let svc = RateLimitLayer::new(store).layer(counting_service(calls.clone()));

        for _ in 0..2 {
            let response = svc.clone().oneshot(request_from("10.0.0.1:4000")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.body(), "hello");
        }
        let response = svc.clone().oneshot(request_from("10.0.0.1:4001")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(calls.load(Ordering::SeqCst), 2, "rejected request must not reach the handler");
    }

    #[tokio::test]
    async fn retry_after_header_can_be_disabled() {
        let (store, _clock) = store(1.0, 1.0);
        let calls = Arc::new(AtomicUsize::new(0));
        let svc = RateLimitLayer::new(store)
            .with_retry_after_header(false)
            .layer(counting_service(calls));

        svc.clone().oneshot(request_from("10.0.0.1:1")).await.unwrap();
        let response = svc.oneshot(request_from("10.0.0.1:1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[tokio::test]
    async fn missing_key_fail_open_forwards() {
        let (store, _clock) = store(1.0, 1.0);
        let calls = Arc::new(AtomicUsize::new(0));
        let svc = RateLimitLayer::new(store.clone()).layer(counting_service(calls.clone()));

        for _ in 0..3 {
            let req = Request::builder().body(()).unwrap();
            let response = svc.clone().oneshot(req).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(store.is_empty(), "unkeyed requests must not create buckets");
    }

    #[tokio::test]
    async fn missing_key_fail_closed_rejects_without_hint() {
        let (store, _clock) = store(1.0, 1.0);
        let calls = Arc::new(AtomicUsize::new(0));
        let svc = RateLimitLayer::new(store)
            .with_missing_key_policy(MissingKeyPolicy::FailClosed)
            .layer(counting_service(calls.clone()));

        let response = svc.oneshot(Request::builder().body(()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn emits_admission_events() {
        let (store, _clock) = store(1.0, 2.0);
        let sink = MemorySink::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let svc = RateLimitLayer::new(store)
            .with_sink(sink.clone())
            .layer(counting_service(calls));

        svc.clone().oneshot(request_from("10.0.0.9:1")).await.unwrap();
        svc.oneshot(request_from("10.0.0.9:1")).await.unwrap();

        let key = crate::rate_limit::ClientKey::from("10.0.0.9");
        assert_eq!(
            sink.events(),
            vec![
                AdmissionEvent::BucketCreated { key: key.clone() },
                AdmissionEvent::Admitted { key: key.clone(), remaining: 0.0 },
                AdmissionEvent::Rejected {
                    key,
                    remaining: 0.0,
                    retry_after: Duration::from_millis(500)
                },
            ]
        );
    }
}
