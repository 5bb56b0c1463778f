use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::{routing::get, Router};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::net::SocketAddr;
use std::sync::Arc;
use throttler::{Threshold, ThrottleLayer, ThrottleOptions};
use tokio::runtime::Runtime;
use tower::ServiceExt;

fn app(rt: &Runtime, options: ThrottleOptions) -> Router {
    // The notifier worker has to be spawned on the runtime the bench drives.
    let layer = rt.block_on(async { ThrottleLayer::new(options).unwrap() });
    Router::new()
        .route("/", get(|| async { "OK" }))
        .layer(layer)
}

async fn make_request(router: &Router, addr: SocketAddr) {
    let req = Request::builder()
        .uri("/")
        .extension(ConnectInfo(addr))
        .body(Body::empty())
        .unwrap();

    let _response = router.clone().oneshot(req).await.unwrap();
}

fn quiet_logger() -> Arc<dyn throttler::ThrottleLogger> {
    Arc::new(|_: &str| {})
}

fn benchmark_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission");
    let rt = Runtime::new().unwrap();
    let addr: SocketAddr = "10.0.0.1:4000".parse().unwrap();

    let raw = Router::new().route("/", get(|| async { "OK" }));
    let unlimited = app(&rt, ThrottleOptions::unlimited());
    let counting = app(&rt, ThrottleOptions::new(u64::MAX).with_verbose(false));

    group.bench_function("raw_axum", |b| {
        b.iter(|| rt.block_on(make_request(black_box(&raw), addr)));
    });

    group.bench_function("unlimited", |b| {
        b.iter(|| rt.block_on(make_request(black_box(&unlimited), addr)));
    });

    group.bench_function("counting", |b| {
        b.iter(|| rt.block_on(make_request(black_box(&counting), addr)));
    });

    group.finish();
}

fn benchmark_throttling(c: &mut Criterion) {
    let mut group = c.benchmark_group("throttling");
    let rt = Runtime::new().unwrap();
    let addr: SocketAddr = "10.0.0.1:4000".parse().unwrap();

    let quiet = app(&rt, ThrottleOptions::new(1u64).with_verbose(false));
    let verbose = app(
        &rt,
        ThrottleOptions::new(1u64)
            .with_verbose(true)
            .with_logger(quiet_logger()),
    );

    group.bench_function("rejected_quiet", |b| {
        b.iter(|| rt.block_on(make_request(black_box(&quiet), addr)));
    });

    group.bench_function("rejected_verbose", |b| {
        b.iter(|| rt.block_on(make_request(black_box(&verbose), addr)));
    });

    group.finish();
}

fn benchmark_range_overrides(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_overrides");
    let rt = Runtime::new().unwrap();
    let addr: SocketAddr = "10.1.2.3:4000".parse().unwrap();

    let mut options = ThrottleOptions::new(u64::MAX).with_verbose(false);
    for octet in 0..=255u8 {
        let subnet = format!("172.{}.0.0/16", octet).parse().unwrap();
        options = options.with_range_override(subnet, Threshold::Limit(u64::MAX));
    }
    let options = options.with_range_override("10.1.0.0/16".parse().unwrap(), Threshold::Unlimited);
    let overridden = app(&rt, options);

    group.bench_function("256_ranges", |b| {
        b.iter(|| rt.block_on(make_request(black_box(&overridden), addr)));
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_admission,
    benchmark_throttling,
    benchmark_range_overrides
);
criterion_main!(benches);
