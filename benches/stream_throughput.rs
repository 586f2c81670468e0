//! Benchmarks for the stream write and relay paths
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use netloom::adapters::{MemorySink, MemorySource, Transform};
use netloom::config::{EngineConfig, TraversalMode};
use netloom::stream::{Engine, FilterOptions};

fn engine(traversal: TraversalMode) -> Engine {
    Engine::with_config(EngineConfig {
        traversal,
        ..EngineConfig::default()
    })
}

fn bench_filtered_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("filtered_writes");

    for size in [64usize, 1024, 16 * 1024].iter() {
        let payload = vec![b'a'; *size];
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("upper", size), &payload, |b, payload| {
            let engine = Engine::new();
            let sink = engine.stream(MemorySink::new());
            let filter = engine.stream(Transform::preset("upper").expect("preset"));
            sink.add_filter_upstream(&filter, FilterOptions::default());
            b.iter(|| black_box(sink.write(payload)));
        });
    }

    group.finish();
}

fn bench_direct_relay(c: &mut Criterion) {
    let mut group = c.benchmark_group("direct_relay");
    let data = vec![7u8; 64 * 1024];
    group.throughput(Throughput::Bytes(data.len() as u64));

    for mode in [TraversalMode::Recursive, TraversalMode::Worklist] {
        group.bench_function(format!("{mode:?}"), |b| {
            let engine = engine(mode);
            b.iter(|| {
                let source = engine.stream(MemorySource::new(data.clone()));
                let sink = engine.stream(MemorySink::new());
                sink.write_from(&source, None, true);
                black_box(sink.queued_bytes())
            });
        });
    }

    group.finish();
}

fn bench_read_path_relay(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_path_relay");
    let data = vec![7u8; 64 * 1024];
    group.throughput(Throughput::Bytes(data.len() as u64));

    for chunk in [256usize, 4096].iter() {
        group.bench_with_input(BenchmarkId::new("chunk", chunk), chunk, |b, &chunk| {
            let engine = Engine::new();
            b.iter(|| {
                let source = engine.stream(MemorySource::new(data.clone()).with_chunk_size(chunk));
                // An observer keeps the relay off the direct path.
                source.on_data(|_, buf| {
                    black_box(buf.len());
                });
                let sink = engine.stream(MemorySink::new());
                sink.write_from(&source, None, true);
                black_box(sink.queued_bytes())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_filtered_writes,
    bench_direct_relay,
    bench_read_path_relay
);
criterion_main!(benches);
