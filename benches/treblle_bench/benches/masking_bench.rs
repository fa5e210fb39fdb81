//! Masking benchmarks
//!
//! Measures recursive redaction over payloads of increasing size and depth.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Value};
use treblle_core::{Masker, SensitiveFields};

fn user(i: usize) -> Value {
    json!({
        "id": i,
        "email": format!("user{i}@example.com"),
        "password": "hunter2",
        "profile": {
            "name": "Jane",
            "card_number": "4111111111111111",
            "tags": ["a", "b", "c"]
        }
    })
}

fn nested(depth: usize) -> Value {
    (0..depth).fold(json!({"secret": "s", "value": 1}), |inner, _| {
        json!({"password": "p", "child": inner})
    })
}

fn bench_mask_flat(c: &mut Criterion) {
    let masker = Masker::new(SensitiveFields::defaults());
    let mut group = c.benchmark_group("mask_users");

    for count in [1usize, 10, 100, 1000] {
        let payload = Value::Array((0..count).map(user).collect());
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &payload, |b, payload| {
            b.iter(|| masker.mask(black_box(payload.clone())))
        });
    }

    group.finish();
}

fn bench_mask_deep(c: &mut Criterion) {
    let masker = Masker::new(SensitiveFields::defaults());
    let mut group = c.benchmark_group("mask_depth");

    for depth in [4usize, 16, 64] {
        let payload = nested(depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &payload, |b, payload| {
            b.iter(|| masker.mask(black_box(payload.clone())))
        });
    }

    group.finish();
}

fn bench_field_lookup(c: &mut Criterion) {
    let mut fields = SensitiveFields::defaults();
    fields.extend((0..50).map(|i| format!("custom_field_{i}")));
    let mut group = c.benchmark_group("field_lookup");

    group.bench_function("hit", |b| b.iter(|| fields.contains(black_box("Password"))));
    group.bench_function("prefixed_hit", |b| {
        b.iter(|| fields.contains(black_box("X-Secret")))
    });
    group.bench_function("miss", |b| b.iter(|| fields.contains(black_box("content-type"))));

    group.finish();
}

criterion_group!(benches, bench_mask_flat, bench_mask_deep, bench_field_lookup);
criterion_main!(benches);
