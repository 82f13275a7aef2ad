//! Commit benchmarks against the in-memory collaborator.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use keel_core::{CommitScope, StoreConfig};
use keel_testkit::{attrs, blog_schema, TestStore};
use tokio::runtime::Runtime;

/// Benchmark committing freshly created records.
fn bench_commit_creates(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("commit_creates");

    for size in [10, 100].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        for bulk in [false, true] {
            let name = if bulk { "bulk" } else { "per_record" };
            group.bench_with_input(BenchmarkId::new(name, size), size, |b, &size| {
                b.to_async(&runtime).iter(|| async move {
                    let config = StoreConfig::new().bulk_commit(bulk);
                    let t = TestStore::with_config(blog_schema(), config);
                    t.adapter.set_bulk(bulk);
                    for i in 0..size {
                        t.create_record("person", attrs([("name", format!("person {i}"))]))
                            .unwrap();
                    }
                    let report = t.commit(CommitScope::AllDirty).await.unwrap();
                    black_box(report.saved());
                });
            });
        }
    }
    group.finish();
}

/// Benchmark committing a parent and its children, which runs in levels.
fn bench_commit_levels(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("commit_levels");

    for size in [10, 100].iter() {
        group.throughput(Throughput::Elements(*size as u64 + 1));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.to_async(&runtime).iter(|| async move {
                let t = TestStore::blog();
                let post = t.create_record("post", attrs([("title", "parent")])).unwrap();
                for i in 0..size {
                    t.create_record_on(post, "comments", attrs([("body", format!("child {i}"))]))
                        .unwrap();
                }
                let report = t.commit(CommitScope::AllDirty).await.unwrap();
                black_box(report.saved());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_commit_creates, bench_commit_levels);
criterion_main!(benches);
