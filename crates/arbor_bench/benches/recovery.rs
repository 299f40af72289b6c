//! Recovery and checkpoint benchmarks.

use arbor_bench::{create_items, generate_rows};
use arbor_core::recovery::dry_replay;
use arbor_core::{Config, Database};
use arbor_storage::InMemoryBackend;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};

/// Data, WAL and shadow backends holding `transactions` commits of 100
/// rows each, not yet checkpointed.
fn logged_database(transactions: usize) -> [InMemoryBackend; 3] {
    let files = [InMemoryBackend::new(), InMemoryBackend::new(), InMemoryBackend::new()];
    let db = open(&files, Config::default().auto_checkpoint(false));
    let items = db.transaction(create_items).unwrap();
    for i in 0..transactions {
        let rows = generate_rows((i * 100) as i64, 100, 32);
        db.transaction(|txn| txn.insert_nodes(items, &rows)).unwrap();
    }
    files
}

fn open(files: &[InMemoryBackend; 3], config: Config) -> Database {
    Database::open_with_backends(
        config,
        Box::new(files[0].clone()),
        Box::new(files[1].clone()),
        Box::new(files[2].clone()),
    )
    .unwrap()
}

/// Benchmark the validating scan of the WAL.
fn bench_dry_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("dry_replay");

    for transactions in [10, 100].iter() {
        let files = logged_database(*transactions);
        group.throughput(Throughput::Bytes(files[1].data().len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(transactions),
            &files,
            |b, files| {
                b.iter(|| dry_replay(black_box(&files[1])).unwrap());
            },
        );
    }
    group.finish();
}

/// Benchmark opening a database that replays its WAL.
fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");
    group.sample_size(20);

    for transactions in [10, 100].iter() {
        let files = logged_database(*transactions);
        group.throughput(Throughput::Elements((*transactions * 100) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(transactions),
            &files,
            |b, files| {
                // Replay leaves a committed log as it found it.
                b.iter(|| open(files, Config::default().auto_checkpoint(false)));
            },
        );
    }
    group.finish();
}

/// Benchmark checkpointing a replayed database.
fn bench_checkpoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("checkpoint");
    group.sample_size(10);

    for transactions in [10, 100].iter() {
        let files = logged_database(*transactions);
        group.bench_with_input(
            BenchmarkId::from_parameter(transactions),
            &files,
            |b, files| {
                b.iter_batched(
                    || {
                        let copy = [
                            InMemoryBackend::with_data(files[0].data()),
                            InMemoryBackend::with_data(files[1].data()),
                            InMemoryBackend::with_data(files[2].data()),
                        ];
                        open(&copy, Config::default().auto_checkpoint(false))
                    },
                    |db| db.checkpoint().unwrap(),
                    BatchSize::PerIteration,
                );
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_dry_replay, bench_replay, bench_checkpoint);
criterion_main!(benches);
