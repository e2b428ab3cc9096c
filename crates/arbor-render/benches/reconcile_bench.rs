//! Benchmarks for host child-list reconciliation.
//!
//! Run with: cargo bench -p arbor-render --bench reconcile_bench

use std::hint::black_box;
use std::rc::Rc;

use arbor_reactive::ArrayDataSource;
use arbor_render::{
    ElementDescriptor, HeadlessBackend, HostNode, RenderBackend, RenderConfig, RenderContext,
    Renderable, reconcile,
};
use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};

fn populated(len: usize) -> (HeadlessBackend, HostNode, Vec<HostNode>) {
    let backend = HeadlessBackend::new();
    let parent = backend.create_element("ul");
    let nodes: Vec<HostNode> = (0..len)
        .map(|i| backend.create_text(&i.to_string()))
        .collect();
    reconcile(&backend, parent, &nodes).expect("initial reconcile");
    backend.clear_mutations();
    (backend, parent, nodes)
}

// =============================================================================
// Raw reconcile
// =============================================================================

fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile/raw");

    for len in [16usize, 256, 1024] {
        group.bench_with_input(BenchmarkId::new("unchanged", len), &len, |b, &len| {
            let (backend, parent, nodes) = populated(len);
            b.iter(|| black_box(reconcile(&backend, parent, black_box(&nodes)).expect("reconcile")))
        });

        group.bench_with_input(BenchmarkId::new("reverse", len), &len, |b, &len| {
            b.iter_batched(
                || {
                    let (backend, parent, mut nodes) = populated(len);
                    nodes.reverse();
                    (backend, parent, nodes)
                },
                |(backend, parent, nodes)| {
                    black_box(reconcile(&backend, parent, &nodes).expect("reconcile"))
                },
                BatchSize::SmallInput,
            )
        });

        group.bench_with_input(BenchmarkId::new("insert_middle", len), &len, |b, &len| {
            b.iter_batched(
                || {
                    let (backend, parent, mut nodes) = populated(len);
                    let extra = backend.create_text("new");
                    nodes.insert(len / 2, extra);
                    (backend, parent, nodes)
                },
                |(backend, parent, nodes)| {
                    black_box(reconcile(&backend, parent, &nodes).expect("reconcile"))
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

// =============================================================================
// Collection-driven element updates
// =============================================================================

fn bench_collection_updates(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile/collection");

    group.bench_function("push_256", |b| {
        b.iter_batched(
            || {
                let backend = HeadlessBackend::new();
                let ctx = RenderContext::new(Rc::new(backend), RenderConfig::default());
                let items: ArrayDataSource<Renderable> = ArrayDataSource::default();
                let list = ctx
                    .create_element(ElementDescriptor::new("ul").child(items.clone()), None)
                    .expect("list element");
                (list, items)
            },
            |(list, items)| {
                for i in 0..256 {
                    items
                        .push(ElementDescriptor::new("li").child(i.to_string()).into())
                        .expect("push");
                }
                black_box(list.child_nodes().len())
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("swap_ends_256", |b| {
        let backend = HeadlessBackend::new();
        let ctx = RenderContext::new(Rc::new(backend), RenderConfig::default());
        let items: ArrayDataSource<Renderable> =
            ArrayDataSource::new((0..256).map(|i| Renderable::Text(i.to_string())).collect());
        let _list = ctx
            .create_element(ElementDescriptor::new("ul").child(items.clone()), None)
            .expect("list element");
        b.iter(|| items.swap(0, 255).expect("swap"))
    });

    group.finish();
}

criterion_group!(benches, bench_reconcile, bench_collection_updates);
criterion_main!(benches);
