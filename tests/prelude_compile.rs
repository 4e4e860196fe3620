//! Compile-time prelude coverage test.
use std::time::Duration;
use tollgate::prelude::*;
use tower::service_fn;
use tower_layer::Layer;
use tower::ServiceExt;

#[tokio::test]
async fn prelude_reexports_core_types() {
    let config = RateLimitConfig::builder()
        .capacity(2.0)
        .refill_rate(1.0)
        .evict_idle(Duration::from_secs(30), Duration::from_secs(60))
        .build()
        .expect("valid config");
    let limiter = RateLimiter::with_clock(config, ManualClock::new());
    let _decision: Decision = limiter.check(&ClientKey::from("k"));

    let layer = limiter.layer().with_sink(LogSink);
    let svc = layer.layer(service_fn(|_req: http::Request<()>| async {
        Ok::<_, std::io::Error>(http::Response::new(String::new()))
    }));
    let mut req = http::Request::new(());
    req.extensions_mut().insert::<std::net::SocketAddr>("127.0.0.1:9".parse().unwrap());
    let response = svc.oneshot(req).await.expect("service call failed");
    assert_eq!(response.status(), http::StatusCode::OK);

    limiter.shutdown().await;
}
