//! Benchmarks for C1's `batch_update` and C2's buffered flush throughput.
//!
//! ```bash
//! cargo bench --bench trust_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use retro_core::TrustBufferConfig;
use retro_trust::{TrustTracker, TrustUpdateBuffer};
use std::sync::Arc;

const BENCH_SEED: u64 = 0xDEADBEEF_CAFEBABE;

fn updates_for(n: usize) -> Vec<(String, bool, f64)> {
    let mut state = BENCH_SEED;
    (0..n)
        .map(|i| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let key = format!("rule_{}", i % 64);
            let succeeded = state % 2 == 0;
            (key, succeeded, 1.0)
        })
        .collect()
}

fn batch_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("c1_batch_update");
    for size in [8usize, 64, 512, 4096] {
        let updates = updates_for(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &updates, |b, updates| {
            let tracker = TrustTracker::new();
            b.iter(|| tracker.batch_update(black_box(updates)));
        });
    }
    group.finish();
}

fn buffer_flush_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("c2_buffer_flush");
    for size in [8usize, 64, 512, 4096] {
        let updates = updates_for(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &updates, |b, updates| {
            let tracker = Arc::new(TrustTracker::new());
            let buffer = TrustUpdateBuffer::new(
                tracker.clone(),
                TrustBufferConfig { max_buffer_size: usize::MAX, flush_threshold: usize::MAX, auto_flush_interval_sec: 1.0e9 },
            );
            b.iter(|| {
                buffer.add_updates_batch(black_box(updates));
                buffer.flush();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, batch_update, buffer_flush_throughput);
criterion_main!(benches);
