//! Storage backend benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use jsondb_storage::{FileBackend, InMemoryBackend, StorageBackend};

/// A chunk-sized JSON document of roughly `size` bytes.
fn chunk_bytes(size: usize) -> Vec<u8> {
    let records: serde_json::Map<String, serde_json::Value> = (0..size / 64)
        .map(|i| {
            (
                i.to_string(),
                serde_json::json!({ "id": i, "name": format!("user{i}"), "age": 30 }),
            )
        })
        .collect();
    serde_json::to_vec(&serde_json::json!({ "records": records })).unwrap()
}

fn bench_write(c: &mut Criterion, name: &str, backend: &dyn StorageBackend) {
    let mut group = c.benchmark_group(name);

    for size in [1024, 16 * 1024, 256 * 1024].iter() {
        let data = chunk_bytes(*size);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::new("write_atomic", size), &data, |b, data| {
            b.iter(|| backend.write_atomic("data/User/chunk_0.json", black_box(data)).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("read", size), &data, |b, _| {
            b.iter(|| black_box(backend.read("data/User/chunk_0.json").unwrap()));
        });
    }
    group.finish();
}

fn bench_memory(c: &mut Criterion) {
    bench_write(c, "memory_backend", &InMemoryBackend::new());
}

fn bench_file(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let backend = FileBackend::open(dir.path()).unwrap();
    bench_write(c, "file_backend", &backend);
}

criterion_group!(benches, bench_memory, bench_file);
criterion_main!(benches);
