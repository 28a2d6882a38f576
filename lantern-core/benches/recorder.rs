//! Recorder throughput benchmarks.
//!
//! Measures span start/update/end cost with an in-memory exporter.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use lantern_core::{InMemoryExporter, SpanRecorder, SpanUpdate};

fn bench_span_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("span_lifecycle");
    group.throughput(Throughput::Elements(1));

    let exporter = Arc::new(InMemoryExporter::new());
    let recorder = SpanRecorder::builder().exporter(exporter.clone()).build();

    group.bench_function("root_start_end", |b| {
        b.iter(|| {
            let span = recorder.start_span(black_box("root"), None);
            span.end();
        });
        exporter.clear();
    });

    let root = recorder.start_span("parent", None);
    group.bench_function("child_update_end", |b| {
        b.iter(|| {
            let child = root.start_span("child", None).unwrap();
            child.update(
                SpanUpdate::new()
                    .output(black_box("done"))
                    .metadata("doc_count", 3usize),
            );
            child.end();
        });
        exporter.clear();
    });

    group.finish();
}

fn bench_tree_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_fanout");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    for children in [1usize, 8, 64] {
        group.throughput(Throughput::Elements(children as u64 + 1));
        group.bench_with_input(BenchmarkId::new("build_and_flush", children), &children, |b, &n| {
            let exporter = Arc::new(InMemoryExporter::new());
            let recorder = SpanRecorder::builder().exporter(exporter.clone()).build();
            b.iter(|| {
                let root = recorder.start_span("pipeline", None);
                for i in 0..n {
                    let child = root.start_span(format!("step_{i}"), None).unwrap();
                    child.end();
                }
                root.end();
                black_box(runtime.block_on(recorder.flush()));
                exporter.clear();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_span_lifecycle, bench_tree_fanout);
criterion_main!(benches);
