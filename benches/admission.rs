//! Benchmarks for the per-call admission path
//!
//! This benchmark measures:
//! - Rate limiter permit acquisition (enabled and disabled)
//! - Vendor client cache hits
//! - A full call rejected at validation, before any network I/O

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;

use llm_relay::cache::ClientCache;
use llm_relay::resilience::{RateLimitSettings, RateLimiter};
use llm_relay::telemetry::NoopSink;
use llm_relay::{ApiStyle, ProviderConfig, RelayClient, RelayConfig, RequestOptions};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn provider() -> ProviderConfig {
    ProviderConfig::new(ApiStyle::OpenAi, "gpt-4o-mini")
        .with_api_key("sk-bench-key")
        .with_endpoint("http://127.0.0.1:9")
}

fn bench_rate_limiter(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_limiter");

    let limiter = RateLimiter::new();
    let settings = Some(RateLimitSettings::new(u32::MAX, Duration::from_secs(3600)));
    group.bench_function("try_acquire_enabled", |b| {
        b.iter(|| black_box(limiter.try_acquire(black_box(settings))))
    });

    let disabled = RateLimiter::new();
    group.bench_function("try_acquire_disabled", |b| {
        b.iter(|| black_box(disabled.try_acquire(black_box(None))))
    });

    group.finish();
}

fn bench_client_cache(c: &mut Criterion) {
    let cache: ClientCache<String> = ClientCache::new();
    let config = provider();
    let _ = cache.get_or_create(&config, |_| Ok(String::from("client")));

    c.bench_function("client_cache_hit", |b| {
        b.iter(|| {
            let client = cache.get_or_create(black_box(&config), |_| Ok(String::from("miss")));
            black_box(client)
        })
    });
}

fn bench_rejected_call(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let client = runtime.block_on(async {
        RelayClient::builder()
            .config(RelayConfig::new().with_provider("openai", provider()))
            .expect("valid config")
            .event_sink(Arc::new(NoopSink))
            .build()
            .expect("client")
    });
    let options = RequestOptions::new();
    let cancel = CancellationToken::new();

    c.bench_function("chat_rejected_empty_messages", |b| {
        b.to_async(&runtime).iter(|| async {
            let outcome = client.chat("openai", Vec::new(), &options, &cancel).await;
            black_box(outcome.is_err())
        })
    });
}

criterion_group!(benches, bench_rate_limiter, bench_client_cache, bench_rejected_call);
criterion_main!(benches);
