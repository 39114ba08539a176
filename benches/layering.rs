use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use pixelgraph_rs::graph::{NodeGraph, NodeId};
use pixelgraph_rs::processing::{build_layers, collect_upstream};
use std::collections::HashSet;

fn chain(n: usize) -> NodeGraph {
    let mut graph = NodeGraph::new("chain");
    let ids: Vec<NodeId> = (0..n)
        .map(|i| graph.add_node(format!("n{i}"), "s.rhai"))
        .collect();
    for pair in ids.windows(2) {
        graph.connect(pair[0], "out", pair[1], "in").unwrap();
    }
    graph
}

/// Wide graph: one source fanning out to many parallel branches that all
/// feed one sink.
fn fan(branches: usize) -> NodeGraph {
    let mut graph = NodeGraph::new("fan");
    let source = graph.add_node("source", "s.rhai");
    let sink = graph.add_node("sink", "s.rhai");
    for i in 0..branches {
        let mid = graph.add_node(format!("b{i}"), "s.rhai");
        graph.connect(source, "out", mid, "in").unwrap();
        graph.connect(mid, "out", sink, &format!("in_{i}")).unwrap();
    }
    graph
}

fn all_nodes(graph: &NodeGraph) -> HashSet<NodeId> {
    graph.node_ids().into_iter().collect()
}

fn bench_build_layers(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_layers");
    for size in [50, 200, 1000] {
        let graph = chain(size);
        let subset = all_nodes(&graph);
        group.bench_with_input(BenchmarkId::new("chain", size), &size, |b, _| {
            b.iter(|| build_layers(&graph, &subset))
        });

        let graph = fan(size);
        let subset = all_nodes(&graph);
        group.bench_with_input(BenchmarkId::new("fan", size), &size, |b, _| {
            b.iter(|| build_layers(&graph, &subset))
        });
    }
    group.finish();
}

fn bench_collect_upstream(c: &mut Criterion) {
    let graph = chain(1000);
    let last = *graph.node_ids().last().unwrap();
    c.bench_function("collect_upstream/chain_1000", |b| {
        b.iter(|| collect_upstream(&graph, &[last]))
    });
}

criterion_group!(benches, bench_build_layers, bench_collect_upstream);
criterion_main!(benches);
