//! Benchmarks for observable writes, bound list splices and expression
//! evaluation.
//!
//! Run with: cargo bench -p blocks-core --bench observable_bench

use blocks_core::{Context, Observable, Runtime, RuntimeConfig, Value, evaluate};
use blocks_dom::Document;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

fn bound_page(markup: &str, model: Value) -> (Document, Runtime) {
    let document = Document::new();
    document.set_inner_html(document.body(), markup);
    let runtime = Runtime::new(document.clone(), RuntimeConfig::default());
    // A failed bind leaves nothing to measure; the benches below only use
    // markup the runtime accepts.
    let _ = runtime.query(model, None);
    (document, runtime)
}

fn bench_plain_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("observable/set");
    for dependents in [0usize, 8, 64] {
        let source = Observable::new(0);
        let computed: Vec<Observable> = (0..dependents)
            .map(|_| {
                let source = source.clone();
                Observable::computed(move || Value::from(source.get().to_number() + 1.0))
            })
            .collect();
        for observable in &computed {
            black_box(observable.get());
        }
        group.bench_with_input(BenchmarkId::new("dependents", dependents), &(), |b, _| {
            let mut n = 0;
            b.iter(|| {
                n += 1;
                source.set(n);
            });
        });
    }
    group.finish();
}

fn bench_bound_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("observable/bound_text");
    let name = Observable::new("a");
    let (_document, _runtime) = bound_page(
        "<p>{{name}}</p><p title=\"{{name}}\">{{name}}!</p>",
        Value::object([("name", Value::from(name.clone()))]),
    );
    group.bench_function("set", |b| {
        let mut flip = false;
        b.iter(|| {
            flip = !flip;
            name.set(if flip { "short" } else { "a longer value" });
        });
    });
    group.finish();
}

fn bench_list_splices(c: &mut Criterion) {
    let mut group = c.benchmark_group("each/splice");
    for len in [16usize, 256] {
        let items = Observable::new(Value::array((0..len).map(Value::from).collect()));
        let (_document, _runtime) = bound_page(
            r#"<ul data-query="each(items)"><li>{{$this}}</li></ul>"#,
            Value::object([("items", Value::from(items.clone()))]),
        );
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("push_pop", len), &(), |b, _| {
            b.iter(|| {
                items.push(len);
                black_box(items.pop());
            });
        });
        group.bench_with_input(BenchmarkId::new("insert_remove_middle", len), &(), |b, _| {
            b.iter(|| {
                items.add(-1, Some(len / 2));
                black_box(items.remove_at(len / 2));
            });
        });
    }
    group.finish();
}

fn bench_expressions(c: &mut Criterion) {
    let mut group = c.benchmark_group("expression/evaluate");
    let context = Context::root(Value::object([
        ("a", Value::from(3)),
        ("b", Value::from(4)),
        ("user", Value::object([("name", Value::from("Ann"))])),
    ]));
    for source in ["a + b * 2", "user.name + '!'", "a > b ? 'yes' : 'no'"] {
        group.bench_with_input(BenchmarkId::from_parameter(source), &source, |b, source| {
            b.iter(|| black_box(evaluate(source, &context)));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_plain_writes,
    bench_bound_writes,
    bench_list_splices,
    bench_expressions
);
criterion_main!(benches);
