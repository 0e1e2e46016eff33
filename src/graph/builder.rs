//! Hazard edge construction
//!
//! For every block that has both a writer and a reader, the writer gets an
//! edge to the reader carrying that block in `read_before`. An operation that
//! reads and writes the same block gets no self edge; the applier buffers its
//! whole source before writing.

use crate::extent::Extent;
use crate::graph::{BlockOwnership, EdgeProperties, Graph};
use tracing::debug;

/// Populate read-before edges from block ownership
pub fn build_edges(graph: &mut Graph, ownership: &BlockOwnership) {
    let mut created = 0usize;
    for (block, owner) in ownership.iter() {
        let Some(writer) = owner.writer else {
            continue;
        };
        if !graph.vertex(writer).valid {
            continue;
        }
        for &reader in &owner.readers {
            if reader == writer || !graph.vertex(reader).valid {
                continue;
            }
            if graph.edge(writer, reader).is_none() {
                created += 1;
            }
            graph.add_edge(
                writer,
                reader,
                EdgeProperties::read_before(vec![Extent::new(block, 1)]),
            );
        }
    }
    debug!(
        "Built {} hazard edges over {} vertices",
        created,
        graph.valid_count()
    );
}
