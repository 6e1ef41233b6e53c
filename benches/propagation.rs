use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use healthgraph::{Graph, HealthEvaluation, HealthRegistry, Importance, Node};

/// Layered graph: `width` nodes per layer, each depending on every node of
/// the next layer. Returns the graph and one flippable leaf.
fn layered(layers: usize, width: usize) -> (Graph, Node, Arc<AtomicBool>) {
    let registry = HealthRegistry::new();
    let up = Arc::new(AtomicBool::new(true));

    let probe = Arc::clone(&up);
    let leaf = registry
        .check_node("leaf", move || {
            if probe.load(Ordering::Relaxed) {
                HealthEvaluation::healthy()
            } else {
                HealthEvaluation::unhealthy("flapping")
            }
        })
        .unwrap();

    let mut below = vec![leaf.clone()];
    for layer in 0..layers {
        let current: Vec<Node> = (0..width)
            .map(|i| registry.aggregation_node(format!("n-{layer}-{i}")).unwrap())
            .collect();
        for node in &current {
            for dep in &below {
                node.depends_on(dep, Importance::Required).unwrap();
            }
        }
        below = current;
    }

    let root = registry.aggregation_node("root").unwrap();
    for dep in &below {
        root.depends_on(dep, Importance::Important).unwrap();
    }

    (Graph::new(&[root]).unwrap(), leaf, up)
}

fn bench_leaf_refresh(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/leaf_refresh");
    for (layers, width) in [(4, 4), (8, 8), (16, 8)] {
        let (graph, leaf, up) = layered(layers, width);
        group.throughput(Throughput::Elements(graph.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{layers}x{width}")),
            &(),
            |b, _| {
                b.iter(|| {
                    up.fetch_xor(true, Ordering::Relaxed);
                    leaf.refresh().unwrap();
                });
            },
        );
    }
    group.finish();
}

fn bench_refresh_all(c: &mut Criterion) {
    let (graph, _leaf, _up) = layered(8, 8);
    c.bench_function("propagation/refresh_all_8x8", |b| {
        b.iter(|| graph.refresh_all().unwrap());
    });
}

fn bench_report_read(c: &mut Criterion) {
    let (graph, _leaf, _up) = layered(8, 8);
    c.bench_function("propagation/create_report", |b| {
        b.iter(|| graph.create_report());
    });
}

criterion_group!(benches, bench_leaf_refresh, bench_refresh_all, bench_report_read);
criterion_main!(benches);
