use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use quota_gate::config::AppConfig;
use quota_gate::rate_limit::{
    client_identifier, DistributedRateLimiter, LocalRateLimiter, RateLimitEngine, RequestInfo,
};
use quota_gate::store::MemoryStore;
use axum::http::{HeaderMap, HeaderValue};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn benchmark_local_admission(c: &mut Criterion) {
    let rt = Runtime::new().expect("Failed to build runtime");
    let limiter = LocalRateLimiter::new();
    rt.block_on(limiter.update_configuration("/api/bench", u32::MAX, 3600, true))
        .expect("Failed to configure limiter");

    let request = RequestInfo::new("/api/bench", "1.2.3.4", "req-bench");

    c.bench_function("local_admission", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(limiter.is_request_allowed(&request).await) })
    });
}

fn benchmark_distributed_admission(c: &mut Criterion) {
    let rt = Runtime::new().expect("Failed to build runtime");
    let engine = DistributedRateLimiter::from_store(Arc::new(MemoryStore::new()));
    rt.block_on(engine.update_configuration("/api/bench", u32::MAX, 3600, true))
        .expect("Failed to configure engine");

    let mut group = c.benchmark_group("distributed_admission");
    for clients in [1usize, 16, 256] {
        let requests: Vec<RequestInfo> = (0..clients)
            .map(|i| RequestInfo::new("/api/bench", format!("10.0.{}.{}", i / 256, i % 256), "req"))
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(clients), &requests, |b, requests| {
            let mut next = 0usize;
            b.to_async(&rt).iter(|| {
                let request = &requests[next % requests.len()];
                next += 1;
                let engine = &engine;
                async move { black_box(engine.is_request_allowed(request).await) }
            })
        });
    }
    group.finish();
}

fn benchmark_unconfigured_endpoint(c: &mut Criterion) {
    let rt = Runtime::new().expect("Failed to build runtime");
    let engine = DistributedRateLimiter::from_store(Arc::new(MemoryStore::new()));
    let request = RequestInfo::new("/api/free", "1.2.3.4", "req-bench");

    c.bench_function("unconfigured_endpoint", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(engine.is_request_allowed(&request).await) })
    });
}

fn benchmark_client_identifier(c: &mut Criterion) {
    let mut headers = HeaderMap::new();
    headers.insert(
        "x-forwarded-for",
        HeaderValue::from_static("203.0.113.7, 10.0.0.1, 10.0.0.2"),
    );

    c.bench_function("client_identifier", |b| {
        b.iter(|| black_box(client_identifier(black_box(&headers), None)))
    });
}

fn benchmark_config_parsing(c: &mut Criterion) {
    let yaml = r#"
server:
  host: "0.0.0.0"
  port: 8080
store:
  url: "redis://127.0.0.1:6379"
rate_limiting:
  defaults:
    - endpoint: "/api/health"
      max_requests: 5
      time_window_seconds: 60
"#;

    c.bench_function("config_parsing", |b| {
        b.iter(|| AppConfig::from_yaml(black_box(yaml)).expect("valid config"))
    });
}

criterion_group!(
    benches,
    benchmark_local_admission,
    benchmark_distributed_admission,
    benchmark_unconfigured_endpoint,
    benchmark_client_identifier,
    benchmark_config_parsing
);
criterion_main!(benches);
