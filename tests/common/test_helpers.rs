use http::{Request, Response};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tollgate::{BucketLimits, BucketStore, ManualClock};
use tower::Service;

/// Store on a manual clock starting at zero.
pub fn manual_store(capacity: f64, refill_rate: f64) -> (Arc<BucketStore>, ManualClock) {
    let clock = ManualClock::new();
    let limits = BucketLimits::new(capacity, refill_rate).expect("valid limits");
    (Arc::new(BucketStore::new(limits).with_clock(clock.clone())), clock)
}

/// Request carrying a peer address extension, as a server would insert it.
pub fn request_from(addr: &str) -> Request<()> {
    let mut req = Request::builder().uri("/").body(()).expect("valid request");
    req.extensions_mut().insert::<SocketAddr>(addr.parse().expect("valid socket address"));
    req
}

/// Downstream handler that counts how often it is reached.
#[derive(Clone, Default)]
pub struct HelloService {
    pub calls: Arc<AtomicUsize>,
}

impl HelloService {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<B> Service<Request<B>> for HelloService {
    type Response = Response<String>;
    type Error = Infallible;
    type Future = futures::future::Ready<Result<Response<String>, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: Request<B>) -> Self::Future {
        self.calls.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(Ok(Response::new(r#"{"message":"Hello world!"}"#.to_string())))
    }
}
