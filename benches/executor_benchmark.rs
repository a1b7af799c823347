//! Benchmarks for the hot paths named in the design notes: union-find
//! `unite`/`find` at scale, cross-class `link_fields` validation, and
//! multi-worker executor throughput on a wide fan-out graph.

use crd_dag::{
    Executor, ExecutorConfig, GraphBuilder, IterableUnionFind, Step, TrustLevel, Usage,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::error::Error as StdError;
use std::sync::Arc;

struct Noop;
impl Step for Noop {
    fn execute(&self) -> Result<(), Box<dyn StdError + Send + Sync>> {
        Ok(())
    }
}

fn bench_union_find(c: &mut Criterion) {
    let mut group = c.benchmark_group("union_find");

    for &n in &[1_000usize, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::new("chain_unite", n), &n, |b, &n| {
            b.iter(|| {
                let mut uf = IterableUnionFind::with_capacity(n);
                let elems: Vec<usize> = (0..n).map(|_| uf.make_set().unwrap()).collect();
                for w in elems.windows(2) {
                    uf.unite(w[0], w[1]).unwrap();
                }
                black_box(uf.class_size(elems[0]).unwrap())
            })
        });

        group.bench_with_input(BenchmarkId::new("find_after_compression", n), &n, |b, &n| {
            let mut uf = IterableUnionFind::with_capacity(n);
            let elems: Vec<usize> = (0..n).map(|_| uf.make_set().unwrap()).collect();
            for w in elems.windows(2) {
                uf.unite(w[0], w[1]).unwrap();
            }
            b.iter(|| {
                for &e in &elems {
                    black_box(uf.find(e).unwrap());
                }
            })
        });
    }

    group.finish();
}

/// Builds a star-shaped data class: one Create field, `fan_out` Read
/// fields, all in one step-per-field graph, and links them all together.
/// Exercises `link_fields`' O(class_size) cross-class enumeration as the
/// class grows.
fn bench_link_fields_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("link_fields_fan_out");

    for &fan_out in &[10usize, 100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(fan_out), &fan_out, |b, &fan_out| {
            b.iter(|| {
                let mut builder = GraphBuilder::new(false);
                let producer = builder.add_step(Noop).unwrap();
                let create_field = builder.add_field::<i32>(producer, Usage::Create).unwrap();
                for _ in 0..fan_out {
                    let consumer = builder.add_step(Noop).unwrap();
                    let read_field = builder.add_field::<i32>(consumer, Usage::Read).unwrap();
                    builder
                        .link_fields(create_field, read_field, TrustLevel::High)
                        .unwrap();
                }
                black_box(builder.core().field_count())
            })
        });
    }

    group.finish();
}

/// A producer step, `width` independent consumer steps each with their own
/// data object, executed through the multi-worker executor.
fn bench_executor_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("executor_fan_out");

    for &width in &[4usize, 64, 512] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            b.iter(|| {
                let mut builder = GraphBuilder::new(false);
                for _ in 0..width {
                    builder.add_step(Noop).unwrap();
                }
                let graph = Arc::new(builder.build().unwrap());
                let executor = Executor::new(ExecutorConfig {
                    thread_count: 0,
                    collect_timing: false,
                    abort_on_failure: false,
                });
                black_box(executor.execute(graph).success)
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_union_find,
    bench_link_fields_fan_out,
    bench_executor_fan_out
);
criterion_main!(benches);
