//! Benchmarks for row channel throughput
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rowflow::pipeline::{RowChannel, StopSignal};
use rowflow::row::{Column, Row, Schema, ValueType};
use std::sync::Arc;
use std::thread;

fn sample_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Column::new("id", ValueType::Integer),
        Column::new("name", ValueType::String),
        Column::new("score", ValueType::Number),
    ]))
}

fn sample_row(n: i64) -> Row {
    Row::builder()
        .integer(n)
        .string("sample")
        .number(n as f64 * 0.5)
        .build()
}

fn bench_put_get_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_single_thread");
    group.throughput(Throughput::Elements(1));

    group.bench_function("put_then_get", |b| {
        let channel = RowChannel::new(1024, StopSignal::new());
        let schema = sample_schema();
        let row = sample_row(1);
        b.iter(|| {
            channel.put(Arc::clone(&schema), row.clone());
            black_box(channel.try_get());
        });
    });

    group.finish();
}

fn bench_producer_consumer(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_producer_consumer");

    for &batch in &[1_000usize, 10_000] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_function(format!("pipe_{batch}_rows"), |b| {
            b.iter(|| {
                let channel = RowChannel::new(256, StopSignal::new());
                let schema = sample_schema();
                let producer = {
                    let channel = channel.clone();
                    let schema = Arc::clone(&schema);
                    thread::spawn(move || {
                        for n in 0..batch {
                            channel.put(Arc::clone(&schema), sample_row(n as i64));
                        }
                        channel.finished();
                    })
                };
                let mut received = 0usize;
                while channel.get().is_some() {
                    received += 1;
                }
                producer.join().unwrap();
                assert_eq!(received, batch);
            });
        });
    }

    group.finish();
}

fn bench_row_clone(c: &mut Criterion) {
    let mut group = c.benchmark_group("row_clone");
    group.throughput(Throughput::Elements(1));

    group.bench_function("arc_backed_clone", |b| {
        let row = sample_row(42);
        b.iter(|| black_box(row.clone()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_put_get_single_thread,
    bench_producer_consumer,
    bench_row_clone
);
criterion_main!(benches);
