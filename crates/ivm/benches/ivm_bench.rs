//! Benchmarks for the eddy-ivm operator graph.
//!
//! Target: single row-level push through a two-operator graph < 100μs.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use eddy_core::{DataType, Order, Row, SchemaBuilder, Value};
use eddy_ivm::{
    Change, ChildJoin, Distinct, FetchRequest, MemorySource, Node, Operator, Output,
};
use std::rc::Rc;

fn events_schema() -> eddy_core::Schema {
    SchemaBuilder::new("events")
        .unwrap()
        .column("id", DataType::Int)
        .unwrap()
        .column("bucket", DataType::Int)
        .unwrap()
        .primary_key(&["id"])
        .build()
        .unwrap()
}

fn event(id: i64, bucket: i64) -> Row {
    Row::new(vec![Value::Int(id), Value::Int(bucket)])
}

struct Sink;
impl Output for Sink {
    fn push(&self, change: Change) -> eddy_ivm::Result<()> {
        black_box(&change);
        Ok(())
    }
}

fn bench_source_fetch(c: &mut Criterion) {
    let mut group = c.benchmark_group("source");

    for size in [100, 1_000, 10_000] {
        let rows: Vec<Row> = (0..size).map(|i| event(i, i % 16)).collect();
        let source = MemorySource::with_rows(events_schema(), rows);

        group.bench_with_input(BenchmarkId::new("fetch", size), &size, |b, _| {
            b.iter(|| {
                let n = source.clone().fetch(FetchRequest::all()).count();
                black_box(n)
            })
        });
    }

    group.finish();
}

fn bench_distinct(c: &mut Criterion) {
    let mut group = c.benchmark_group("distinct");

    for size in [100, 1_000, 10_000] {
        let rows: Vec<Row> = (0..size).map(|i| event(i, i % 16)).collect();
        let source = MemorySource::with_rows(events_schema(), rows);
        let distinct = Distinct::new(source.clone() as Rc<dyn Operator>, &["bucket"]).unwrap();
        source.set_output(distinct.clone());
        distinct.set_output(Rc::new(Sink));

        group.bench_with_input(BenchmarkId::new("fetch", size), &size, |b, _| {
            b.iter(|| {
                let n = distinct.clone().fetch(FetchRequest::all()).count();
                black_box(n)
            })
        });
    }

    // Single-row push through dedup into a sink.
    let source = MemorySource::with_rows(events_schema(), Vec::new());
    let distinct = Distinct::new(source.clone() as Rc<dyn Operator>, &["bucket"]).unwrap();
    source.set_output(distinct.clone());
    distinct.set_output(Rc::new(Sink));
    let mut next_id = 1_000_000i64;
    group.bench_function("push_add", |b| {
        b.iter(|| {
            next_id += 1;
            distinct
                .push(Change::add(Node::leaf(event(next_id, next_id))))
                .unwrap();
        })
    });

    group.finish();
}

fn bench_child_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("child_join");

    let parents_schema = SchemaBuilder::new("owners")
        .unwrap()
        .column("id", DataType::Int)
        .unwrap()
        .column("bucket", DataType::Int)
        .unwrap()
        .primary_key(&["id"])
        .build()
        .unwrap();
    let tracks_schema = SchemaBuilder::new("items")
        .unwrap()
        .column("id", DataType::Int)
        .unwrap()
        .column("bucket", DataType::Int)
        .unwrap()
        .column("rank", DataType::Int)
        .unwrap()
        .primary_key(&["id"])
        .order_by("rank", Order::Asc)
        .build()
        .unwrap();

    for size in [100, 1_000] {
        let parents: Vec<Row> = (0..16).map(|i| event(i, i)).collect();
        let children: Vec<Row> = (0..size)
            .map(|i| Row::new(vec![Value::Int(i), Value::Int(i % 16), Value::Int(i / 16)]))
            .collect();
        let parent = MemorySource::with_rows(parents_schema.clone(), parents);
        let child = MemorySource::with_rows(tracks_schema.clone(), children);
        let join = ChildJoin::new(
            parent.clone() as Rc<dyn Operator>,
            child.clone() as Rc<dyn Operator>,
            &["bucket"],
            &["bucket"],
            "owners",
            false,
        )
        .unwrap();
        join.connect();
        join.set_output(Rc::new(Sink));

        group.bench_with_input(BenchmarkId::new("fetch", size), &size, |b, _| {
            b.iter(|| {
                let n = join.clone().fetch(FetchRequest::all()).count();
                black_box(n)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_source_fetch, bench_distinct, bench_child_join);
criterion_main!(benches);
