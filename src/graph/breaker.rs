//! Cycle breaking through scratch copies
//!
//! Cutting an edge `W -> R` that carries hazard blocks `E`:
//!
//! ```text
//! X = MOVE(E -> T)          T freshly allocated scratch blocks
//! R.src[E] := T             R now reads the copy
//! W -> X  read_before E     X must copy E before W overwrites it
//! R -> X  write_before T    X must fill T before R reads it
//! ```
//!
//! `X` never gains an outgoing edge back into the component because nothing
//! else writes `E` (single writer) and nothing else reads `T`.

use crate::error::{DeltaError, Result};
use crate::extent::{self, Extent};
use crate::graph::{find_components, find_components_within, EdgeProperties, Graph, VertexIndex};
use crate::operation::Operation;
use crate::scratch::ScratchAllocator;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

/// Which edge of a cyclic component gets cut first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutPolicy {
    /// Cut the edge carrying the most hazard blocks
    #[default]
    HeaviestEdge,
    /// Cut the edge carrying the fewest hazard blocks
    LightestEdge,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleBreakStats {
    /// Cyclic components found on the first detection pass
    pub cycles_broken: usize,
    pub edges_cut: usize,
    /// Scratch blocks handed to inserted MOVE operations
    pub scratch_blocks: u64,
}

#[derive(Debug)]
pub struct CycleBreaker {
    allocator: ScratchAllocator,
    policy: CutPolicy,
}

impl CycleBreaker {
    pub fn new(max_scratch_blocks: u64, policy: CutPolicy) -> Self {
        CycleBreaker {
            allocator: ScratchAllocator::new(max_scratch_blocks),
            policy,
        }
    }

    pub fn allocator(&self) -> &ScratchAllocator {
        &self.allocator
    }

    pub fn policy(&self) -> CutPolicy {
        self.policy
    }

    /// Rewrite every cyclic component until the graph is acyclic.
    ///
    /// The graph is re-checked afterwards; a component that survives is a
    /// `ResidualCycle`.
    pub fn break_cycles(&mut self, graph: &mut Graph) -> Result<CycleBreakStats> {
        self.reserve_existing(graph)?;

        let mut stats = CycleBreakStats::default();
        let cyclic: Vec<Vec<VertexIndex>> = find_components(graph)
            .into_iter()
            .filter(|c| c.cyclic)
            .map(|c| c.members)
            .collect();
        stats.cycles_broken = cyclic.len();

        for members in cyclic {
            loop {
                let remaining: Vec<Vec<VertexIndex>> = find_components_within(graph, &members)
                    .into_iter()
                    .filter(|c| c.cyclic)
                    .map(|c| c.members)
                    .collect();
                if remaining.is_empty() {
                    break;
                }
                for component in remaining {
                    let (from, to) = self.select_edge(graph, &component)?;
                    stats.scratch_blocks += self.cut_edge(graph, from, to)?;
                    stats.edges_cut += 1;
                }
            }
        }

        let residual: usize = find_components(graph)
            .iter()
            .filter(|c| c.cyclic)
            .map(|c| c.len())
            .sum();
        if residual > 0 {
            return Err(DeltaError::ResidualCycle {
                remaining: residual,
            });
        }
        graph.check_single_writer()?;

        info!(
            "Broke {} cycles: {} edges cut, {} scratch blocks",
            stats.cycles_broken, stats.edges_cut, stats.scratch_blocks
        );
        Ok(stats)
    }

    fn reserve_existing(&mut self, graph: &Graph) -> Result<()> {
        for index in graph.valid_indices() {
            for extent in graph.vertex(index).op.dst_extents.iter().filter(|e| e.is_temp()) {
                self.allocator.reserve(extent)?;
            }
        }
        Ok(())
    }

    /// Pick the edge to cut inside one cyclic component
    fn select_edge(
        &self,
        graph: &Graph,
        component: &[VertexIndex],
    ) -> Result<(VertexIndex, VertexIndex)> {
        let inside: HashSet<VertexIndex> = component.iter().copied().collect();
        let mut best: Option<(u64, VertexIndex, VertexIndex)> = None;

        for &from in component {
            for (&to, props) in &graph.vertex(from).out_edges {
                let weight = props.weight();
                if !inside.contains(&to) || weight == 0 {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((best_weight, _, _)) => match self.policy {
                        CutPolicy::HeaviestEdge => weight > best_weight,
                        CutPolicy::LightestEdge => weight < best_weight,
                    },
                };
                if better {
                    best = Some((weight, from, to));
                }
            }
        }

        // Members and out_edges are both ascending, so ties keep the
        // smallest (from, to) pair.
        best.map(|(_, from, to)| (from, to))
            .ok_or(DeltaError::UncuttableCycle {
                vertex: component.first().copied().unwrap_or_default(),
            })
    }

    /// Cut `writer -> reader`, returning the scratch blocks used
    fn cut_edge(&mut self, graph: &mut Graph, writer: VertexIndex, reader: VertexIndex) -> Result<u64> {
        let props = graph
            .remove_edge(writer, reader)
            .ok_or(DeltaError::UncuttableCycle { vertex: writer })?;
        let hazard = props.read_before;
        let blocks = extent::block_count(&hazard);
        let temp: Vec<Extent> = self.allocator.allocate(blocks)?;

        let reader_op = &mut graph.vertex_mut(reader).op;
        reader_op.src_extents = extent::substitute(&reader_op.src_extents, &hazard, &temp)?;

        let copy = graph.add_vertex(Operation::moved(hazard.clone(), temp.clone()));
        graph.add_edge(writer, copy, EdgeProperties::read_before(hazard));
        graph.add_edge(reader, copy, EdgeProperties::write_before(temp));
        if !props.write_before.is_empty() {
            graph.add_edge(writer, reader, EdgeProperties::write_before(props.write_before));
        }

        debug!(
            "Cut edge {} -> {}: {} blocks copied to scratch by vertex {}",
            writer, reader, blocks, copy
        );
        Ok(blocks)
    }
}
