// Write-path benchmarks.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use siltdb::{Options, DB};
use std::hint::black_box;
use tempfile::TempDir;

fn benchmark_sequential_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_write");

    for size in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let temp_dir = TempDir::new().unwrap();
                let db = DB::open(temp_dir.path(), Options::default()).unwrap();

                for i in 0..size {
                    let key = format!("key{:08}", i);
                    let value = format!("value{:08}", i);
                    db.put(key.as_bytes(), value.as_bytes());
                }

                black_box(&db);
            });
        });
    }

    group.finish();
}

fn benchmark_random_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("random_write");

    for size in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let temp_dir = TempDir::new().unwrap();
                let db = DB::open(temp_dir.path(), Options::default()).unwrap();

                use rand::Rng;
                let mut rng = rand::rng();

                for _ in 0..size {
                    let key_num: u32 = rng.random();
                    let key = format!("key{:08}", key_num);
                    let value = format!("value{:08}", key_num);
                    db.put(key.as_bytes(), value.as_bytes());
                }

                black_box(&db);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_sequential_write, benchmark_random_write);
criterion_main!(benches);
