//! Identity map and push benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use keel_bench::people;
use keel_testkit::{attrs, payloads, TestStore};

/// Benchmark pushing one payload into a store of growing size.
fn bench_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("push");

    group.bench_function("new_identity", |b| {
        let t = TestStore::blog();
        let mut next = 0u64;
        b.iter(|| {
            next += 1;
            let handle = t
                .push(payloads::person(&next.to_string(), "someone"))
                .unwrap();
            black_box(handle);
        });
    });

    group.bench_function("existing_identity", |b| {
        let t = TestStore::blog();
        t.push(payloads::person("1", "someone")).unwrap();
        b.iter(|| {
            let handle = t.push(black_box(payloads::person("1", "someone else"))).unwrap();
            black_box(handle);
        });
    });

    group.finish();
}

/// Benchmark batched pushes.
fn bench_push_many(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_many");

    for size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let batch = people(size);
            b.iter(|| {
                let t = TestStore::blog();
                let handles = t.push_many(black_box(batch.clone())).unwrap();
                black_box(handles);
            });
        });
    }
    group.finish();
}

/// Benchmark local edits and rollback.
fn bench_edits(c: &mut Criterion) {
    let mut group = c.benchmark_group("edit");

    group.bench_function("set_attribute", |b| {
        let t = TestStore::blog();
        let record = t.create_record("person", attrs([("name", "Tom")])).unwrap();
        let mut flip = false;
        b.iter(|| {
            flip = !flip;
            let name = if flip { "Tomster" } else { "Tom" };
            t.set(record, "name", black_box(name)).unwrap();
        });
    });

    group.bench_function("set_and_rollback", |b| {
        let t = TestStore::blog();
        let record = t.push(payloads::person("1", "Dale")).unwrap();
        b.iter(|| {
            t.set(record, "name", "Scumbag Dale").unwrap();
            t.rollback(record).unwrap();
        });
    });

    group.bench_function("flush", |b| {
        let t = TestStore::blog();
        let record = t.push(payloads::person("1", "Dale")).unwrap();
        let _events = t.subscribe();
        let mut flip = false;
        b.iter(|| {
            flip = !flip;
            let name = if flip { "Scumbag Dale" } else { "Dale" };
            t.set(record, "name", name).unwrap();
            black_box(t.flush());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_push, bench_push_many, bench_edits);
criterion_main!(benches);
