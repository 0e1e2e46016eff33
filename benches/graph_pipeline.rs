use ab_delta::extent::Extent;
use ab_delta::graph::{build_edges, find_components, topological_order, BlockOwnership};
use ab_delta::{CutPolicy, CycleBreaker, DeltaGenerator, Graph, GeneratorConfig, Operation};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Single-block MOVEs realising a random permutation of `n` blocks
fn permutation(n: usize) -> Vec<Operation> {
    let mut targets: Vec<u64> = (0..n as u64).collect();
    targets.shuffle(&mut StdRng::seed_from_u64(n as u64));
    targets
        .into_iter()
        .enumerate()
        .filter(|&(src, dst)| src as u64 != dst)
        .map(|(src, dst)| {
            Operation::moved(vec![Extent::new(src as u64, 1)], vec![Extent::new(dst, 1)])
        })
        .collect()
}

fn graph_for(n: usize) -> Graph {
    let ops = permutation(n);
    let ownership = BlockOwnership::from_operations(n as u64, &ops).unwrap();
    let mut graph = Graph::from_operations(ops);
    build_edges(&mut graph, &ownership);
    graph
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_build");

    for size in [1_000, 10_000, 100_000].iter() {
        let ops = permutation(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let ownership = BlockOwnership::from_operations(size as u64, &ops).unwrap();
                let mut graph = Graph::from_operations(ops.clone());
                build_edges(&mut graph, &ownership);
                black_box(graph.edge_count())
            });
        });
    }

    group.finish();
}

fn bench_detect(c: &mut Criterion) {
    let mut group = c.benchmark_group("tarjan");

    for size in [1_000, 10_000, 100_000].iter() {
        let graph = graph_for(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut graph = graph.clone();
                black_box(find_components(&mut graph).len())
            });
        });
    }

    group.finish();
}

fn bench_break_and_schedule(c: &mut Criterion) {
    let mut group = c.benchmark_group("break_and_schedule");

    for size in [1_000, 10_000, 100_000].iter() {
        let graph = graph_for(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let mut graph = graph.clone();
                let mut breaker = CycleBreaker::new(size as u64, CutPolicy::HeaviestEdge);
                breaker.break_cycles(&mut graph).unwrap();
                black_box(topological_order(&graph).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_generate(c: &mut Criterion) {
    let block_size = 4096usize;
    let blocks = 2048usize;
    let mut rng = StdRng::seed_from_u64(7);

    let old: Vec<u8> = (0..blocks)
        .flat_map(|i| vec![(i % 251) as u8; block_size])
        .collect();
    let mut chunks: Vec<&[u8]> = old.chunks(block_size).collect();
    chunks.shuffle(&mut rng);
    let new = chunks.concat();

    let generator = DeltaGenerator::new(GeneratorConfig::default()).unwrap();
    c.bench_function("generate_8mib_shuffle", |b| {
        b.iter(|| black_box(generator.generate(&old, &new, None).unwrap().report.operations))
    });
}

criterion_group!(
    benches,
    bench_build,
    bench_detect,
    bench_break_and_schedule,
    bench_generate
);
criterion_main!(benches);
