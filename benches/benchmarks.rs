//! Benchmarks for dbclient

use criterion::{criterion_group, criterion_main, Criterion};
use dbclient::ConnectionDescriptor;
use std::hint::black_box;

fn bench_connection_string(c: &mut Criterion) {
    let descriptor = ConnectionDescriptor::new("db.internal", "svc user", "p'w", "orders", 5432);
    c.bench_function("connection_string", |b| {
        b.iter(|| black_box(&descriptor).connection_string());
    });
}

fn bench_parse_descriptor(c: &mut Criterion) {
    let text = "host=db.internal user=svc password=secret dbname=orders port=5432 sslmode=disable";
    c.bench_function("parse_descriptor", |b| {
        b.iter(|| black_box(text).parse::<ConnectionDescriptor>());
    });
}

criterion_group!(benches, bench_connection_string, bench_parse_descriptor);
criterion_main!(benches);
