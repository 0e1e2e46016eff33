//! Property-based tests for graph ordering and generate-then-apply
//!
//! Uses proptest to check that cycle breaking always yields a schedule that,
//! replayed on a block model, produces the intended image.

mod common;

use ab_delta::extent::{self, Extent};
use ab_delta::graph::{build_edges, find_components, topological_order, BlockOwnership};
use ab_delta::{CutPolicy, CycleBreaker, Graph, MemoryPrefs, Operation, PatchEngine};
use common::*;
use proptest::prelude::*;
use std::collections::HashMap;

/// Apply MOVEs to a block-to-content map, reading every source first
fn replay(ops: &[Operation], blocks: &mut HashMap<u64, u64>) {
    for op in ops {
        let values: Vec<u64> = extent::expand(&op.src_extents)
            .into_iter()
            .map(|block| blocks[&block])
            .collect();
        for (block, value) in extent::expand(&op.dst_extents).into_iter().zip(values) {
            blocks.insert(block, value);
        }
    }
}

fn permutation_ops(targets: &[usize]) -> Vec<Operation> {
    targets
        .iter()
        .enumerate()
        .filter(|(src, dst)| src != *dst)
        .map(|(src, &dst)| {
            Operation::moved(
                vec![Extent::new(src as u64, 1)],
                vec![Extent::new(dst as u64, 1)],
            )
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_permutation_schedule_is_correct(
        targets in (1usize..40).prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle()),
        lightest in any::<bool>(),
    ) {
        let n = targets.len() as u64;
        let ops = permutation_ops(&targets);
        let ownership = BlockOwnership::from_operations(n, &ops).unwrap();
        let mut graph = Graph::from_operations(ops);
        build_edges(&mut graph, &ownership);

        let policy = if lightest { CutPolicy::LightestEdge } else { CutPolicy::HeaviestEdge };
        let mut breaker = CycleBreaker::new(n, policy);
        breaker.break_cycles(&mut graph).unwrap();

        prop_assert!(find_components(&mut graph).iter().all(|c| !c.cyclic));
        graph.check_single_writer().unwrap();

        let order = topological_order(&graph).unwrap();
        prop_assert_eq!(order.len(), graph.valid_count());

        // Every edge target is scheduled before its source
        let position: HashMap<usize, usize> =
            order.iter().enumerate().map(|(i, &v)| (v, i)).collect();
        for &from in &order {
            for &to in graph.vertex(from).out_edges.keys() {
                prop_assert!(position[&to] < position[&from]);
            }
        }

        let mut blocks: HashMap<u64, u64> = (0..n).map(|b| (b, b)).collect();
        replay(&graph.operations_in(&order), &mut blocks);
        for (src, &dst) in targets.iter().enumerate() {
            prop_assert_eq!(blocks[&(dst as u64)], src as u64);
        }
    }

    #[test]
    fn prop_scratch_bounded_by_cut_weight(
        targets in (2usize..30).prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle()),
    ) {
        let n = targets.len() as u64;
        let ops = permutation_ops(&targets);
        let moves = ops.len();
        let ownership = BlockOwnership::from_operations(n, &ops).unwrap();
        let mut graph = Graph::from_operations(ops);
        build_edges(&mut graph, &ownership);

        let mut breaker = CycleBreaker::new(n, CutPolicy::HeaviestEdge);
        let stats = breaker.break_cycles(&mut graph).unwrap();

        // Each cut adds exactly one scratch MOVE of the cut edge's blocks
        prop_assert_eq!(graph.valid_count(), moves + stats.edges_cut);
        prop_assert_eq!(stats.scratch_blocks, stats.edges_cut as u64);
        prop_assert_eq!(breaker.allocator().used_blocks(), stats.scratch_blocks);
    }

    #[test]
    fn prop_generate_then_apply(
        seed in any::<u64>(),
        blocks in 1usize..24,
        alphabet in 2u8..8,
    ) {
        let old = random_image(seed, blocks, alphabet);
        let new = evolve(&old, seed.wrapping_add(1));
        let generated = generate(&old, &new);

        let target = target_for(&old, &new);
        let prefs = MemoryPrefs::new();
        let mut engine = PatchEngine::new(
            context(&target, &prefs, &generated),
            plan(&generated.payload),
        )
        .unwrap();
        for chunk in generated.payload.bytes.chunks(700) {
            engine.write(chunk).unwrap();
        }
        engine.finish().unwrap();
        prop_assert_eq!(target.contents(), new);
    }
}
