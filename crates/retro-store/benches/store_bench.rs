//! Benchmarks for C5's `store`/`retrieve` paths.
//!
//! ```bash
//! cargo bench --bench store_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use retro_core::DataStoreConfig;
use retro_store::DataStore;
use serde::Serialize;
use tempfile::TempDir;

#[derive(Serialize)]
struct Payload {
    name: String,
    values: Vec<f64>,
}

fn payload_of_size(n: usize) -> Payload {
    Payload { name: "bench".to_string(), values: vec![1.0; n] }
}

fn open_store() -> (TempDir, DataStore) {
    let dir = TempDir::new().unwrap();
    let store = DataStore::open(DataStoreConfig {
        storage_root: dir.path().to_string_lossy().to_string(),
        ..DataStoreConfig::default()
    })
    .unwrap();
    (dir, store)
}

fn store_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("c5_store");
    for size in [16usize, 256, 4096] {
        let payload = payload_of_size(size);
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            let (_dir, store) = open_store();
            b.iter(|| store.store(black_box(payload), None).unwrap());
        });
    }
    group.finish();
}

fn retrieve_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("c5_retrieve");
    for size in [16usize, 256, 4096] {
        let payload = payload_of_size(size);
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            let (_dir, store) = open_store();
            let id = store.store(payload, None).unwrap();
            b.iter(|| {
                let fetched: Option<serde_json::Value> = store.retrieve(black_box(&id), None);
                fetched
            });
        });
    }
    group.finish();
}

criterion_group!(benches, store_throughput, retrieve_throughput);
criterion_main!(benches);
