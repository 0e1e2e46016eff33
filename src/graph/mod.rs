//! Operation dependency graph
//!
//! Vertices live in an append-only arena and are addressed by index. An edge
//! `writer -> reader` means the reader must finish before the writer runs.
//! Deleting a vertex only clears its `valid` flag so that indices held
//! elsewhere stay meaningful.
//!
//! The pipeline is:
//!
//! ```text
//! BlockOwnership -> builder -> cycles (detect) -> breaker -> scheduler
//! ```

pub mod breaker;
pub mod builder;
pub mod cycles;
pub mod ownership;
pub mod scheduler;

use crate::error::{DeltaError, Result};
use crate::extent::{self, Extent};
use crate::operation::Operation;
use std::collections::{BTreeMap, HashMap};

pub use breaker::{CutPolicy, CycleBreaker, CycleBreakStats};
pub use builder::build_edges;
pub use cycles::{find_components, find_components_within, Component};
pub use ownership::{BlockOwner, BlockOwnership};
pub use scheduler::{relinearize_blobs, topological_order};

pub type VertexIndex = usize;

/// Blocks motivating an edge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeProperties {
    /// Blocks the reader must consume before the writer overwrites them
    pub read_before: Vec<Extent>,
    /// Blocks the target writes before the source may read them
    pub write_before: Vec<Extent>,
}

impl EdgeProperties {
    pub fn read_before(extents: Vec<Extent>) -> Self {
        EdgeProperties {
            read_before: extents,
            write_before: Vec::new(),
        }
    }

    pub fn write_before(extents: Vec<Extent>) -> Self {
        EdgeProperties {
            read_before: Vec::new(),
            write_before: extents,
        }
    }

    /// Blocks that would need a scratch copy if this edge were cut
    pub fn weight(&self) -> u64 {
        extent::block_count(&self.read_before)
    }

    pub fn is_empty(&self) -> bool {
        self.read_before.is_empty() && self.write_before.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Vertex {
    pub op: Operation,
    /// Destination vertex -> edge properties, ordered for determinism
    pub out_edges: BTreeMap<VertexIndex, EdgeProperties>,
    pub valid: bool,
    /// Tarjan scratch
    pub discovery_index: Option<usize>,
    /// Tarjan scratch
    pub lowlink: usize,
}

impl Vertex {
    pub fn new(op: Operation) -> Self {
        Vertex {
            op,
            out_edges: BTreeMap::new(),
            valid: true,
            discovery_index: None,
            lowlink: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    vertices: Vec<Vertex>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    /// One vertex per operation, in order
    pub fn from_operations(ops: impl IntoIterator<Item = Operation>) -> Self {
        Graph {
            vertices: ops.into_iter().map(Vertex::new).collect(),
        }
    }

    /// Append a vertex and return its index
    pub fn add_vertex(&mut self, op: Operation) -> VertexIndex {
        self.vertices.push(Vertex::new(op));
        self.vertices.len() - 1
    }

    /// Number of vertices ever added, including invalidated ones
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn valid_count(&self) -> usize {
        self.vertices.iter().filter(|v| v.valid).count()
    }

    pub fn vertex(&self, index: VertexIndex) -> &Vertex {
        &self.vertices[index]
    }

    pub fn vertex_mut(&mut self, index: VertexIndex) -> &mut Vertex {
        &mut self.vertices[index]
    }

    /// Indices of valid vertices in ascending order
    pub fn valid_indices(&self) -> impl Iterator<Item = VertexIndex> + '_ {
        self.vertices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.valid)
            .map(|(i, _)| i)
    }

    /// Tombstone a vertex and drop every edge that touches it
    pub fn invalidate(&mut self, index: VertexIndex) {
        self.vertices[index].valid = false;
        self.vertices[index].out_edges.clear();
        for vertex in &mut self.vertices {
            vertex.out_edges.remove(&index);
        }
    }

    pub fn edge(&self, from: VertexIndex, to: VertexIndex) -> Option<&EdgeProperties> {
        self.vertices[from].out_edges.get(&to)
    }

    /// Add `props` to the edge `from -> to`, creating it if needed
    pub fn add_edge(&mut self, from: VertexIndex, to: VertexIndex, props: EdgeProperties) {
        let edge = self.vertices[from].out_edges.entry(to).or_default();
        for extent in props.read_before {
            extent::append_extent(&mut edge.read_before, extent);
        }
        for extent in props.write_before {
            extent::append_extent(&mut edge.write_before, extent);
        }
    }

    pub fn remove_edge(&mut self, from: VertexIndex, to: VertexIndex) -> Option<EdgeProperties> {
        self.vertices[from].out_edges.remove(&to)
    }

    /// Total number of edges between valid vertices
    pub fn edge_count(&self) -> usize {
        self.vertices
            .iter()
            .filter(|v| v.valid)
            .map(|v| {
                v.out_edges
                    .keys()
                    .filter(|&&to| self.vertices[to].valid)
                    .count()
            })
            .sum()
    }

    /// Check that no block is written by two valid operations
    pub fn check_single_writer(&self) -> Result<()> {
        let mut writers: HashMap<u64, VertexIndex> = HashMap::new();
        for index in self.valid_indices() {
            for extent in &self.vertices[index].op.dst_extents {
                if extent.is_hole() {
                    return Err(DeltaError::InvalidExtent(format!(
                        "operation {} writes to a sparse hole",
                        index
                    )));
                }
                for block in extent.blocks() {
                    if let Some(first) = writers.insert(block, index) {
                        if first != index {
                            return Err(DeltaError::DoubleWriter {
                                block,
                                first,
                                second: index,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Operations of valid vertices in the given order
    pub fn operations_in(&self, order: &[VertexIndex]) -> Vec<Operation> {
        order
            .iter()
            .map(|&index| self.vertices[index].op.clone())
            .collect()
    }
}
