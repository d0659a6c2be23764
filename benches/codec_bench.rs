//! # 编解码与引擎读写基准测试

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;

use market_cache::cache::codec::{CompressMode, Encoding, ValueCodec};
use market_cache::cache::{CompressionFilter, MemoryStore};
use market_cache::config::CacheConfig;
use market_cache::{CacheEngine, SetOptions};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tick {
    symbol: String,
    price: f64,
    volume: u64,
    exchange: String,
}

fn ticks(count: usize) -> Vec<Tick> {
    (0..count)
        .map(|i| Tick {
            symbol: format!("SYM{i:04}"),
            price: 100.0 + i as f64 * 0.01,
            volume: 1_000 + i as u64,
            exchange: "NASDAQ".to_string(),
        })
        .collect()
}

fn codec_benchmark(c: &mut Criterion) {
    let codec = ValueCodec::new(CompressionFilter::new(true, 1024, 10 * 1024 * 1024));
    let mut group = c.benchmark_group("codec");

    for (label, size) in [("small", 1), ("large", 2_000)] {
        let payload = ticks(size);
        for encoding in [Encoding::Json, Encoding::MsgPack] {
            let id = format!("{label}/{}", encoding.as_str());

            group.bench_with_input(BenchmarkId::new("serialize", &id), &payload, |b, payload| {
                b.iter(|| {
                    codec
                        .serialize(black_box(payload), encoding, CompressMode::Auto)
                        .unwrap()
                });
            });

            let raw = codec
                .serialize(&payload, encoding, CompressMode::Auto)
                .unwrap();
            group.bench_with_input(BenchmarkId::new("deserialize", &id), &raw, |b, raw| {
                b.iter(|| {
                    codec
                        .deserialize::<Vec<Tick>>(black_box(raw), encoding)
                        .unwrap()
                });
            });
        }
    }

    group.finish();
}

fn engine_benchmark(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let engine = CacheEngine::new(CacheConfig::default(), Arc::new(MemoryStore::new())).unwrap();
    let payload = ticks(10);

    rt.block_on(async {
        engine
            .set("bench:hot", &payload, SetOptions::default())
            .await
            .unwrap();
    });

    c.bench_function("engine_set", |b| {
        b.to_async(&rt).iter(|| async {
            engine
                .set(black_box("bench:write"), black_box(&payload), SetOptions::default())
                .await
                .unwrap();
        });
    });

    c.bench_function("engine_get_hit", |b| {
        b.to_async(&rt).iter(|| async {
            let cached: Option<Vec<Tick>> = engine.get(black_box("bench:hot")).await.unwrap();
            black_box(cached)
        });
    });
}

criterion_group!(benches, codec_benchmark, engine_benchmark);
criterion_main!(benches);
