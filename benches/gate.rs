//! Performance benchmarks for amq-shadow
//!
//! Run with: cargo bench

use amq_shadow::{PermissionGate, Permissions};
use criterion::{criterion_group, criterion_main, Criterion};

fn perms(configure: &str, write: &str, read: &str) -> Permissions {
    Permissions {
        user: "guest".to_string(),
        vhost: "/".to_string(),
        configure: configure.to_string(),
        write: write.to_string(),
        read: read.to_string(),
    }
}

fn bench_gate_compile(c: &mut Criterion) {
    let record = perms(".*", "^(orders|payments)\\..*", "^telemetry\\..*");
    c.bench_function("PermissionGate::compile", |b| {
        b.iter(|| PermissionGate::compile(&record).unwrap());
    });
}

fn bench_gate_checks(c: &mut Criterion) {
    let gate = PermissionGate::compile(&perms(".*", "^(orders|payments)\\..*", ".*")).unwrap();

    c.bench_function("write_allows match", |b| {
        b.iter(|| gate.write_allows("orders.eu.created"));
    });

    c.bench_function("write_allows reject", |b| {
        b.iter(|| gate.write_allows("telemetry.cpu"));
    });

    c.bench_function("write_allows default exchange", |b| {
        b.iter(|| gate.write_allows(""));
    });
}

criterion_group!(benches, bench_gate_compile, bench_gate_checks);
criterion_main!(benches);
