//! Topological ordering and blob relinearization

use crate::error::{DeltaError, Result};
use crate::graph::{Graph, VertexIndex};
use crate::operation::Operation;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::debug;

/// Order valid vertices so that every edge target runs before its source.
///
/// Ready vertices are emitted lowest index first. Vertices left over once no
/// vertex is ready sit on a cycle and produce `ResidualCycle`.
pub fn topological_order(graph: &Graph) -> Result<Vec<VertexIndex>> {
    let mut pending = vec![0usize; graph.len()];
    let mut dependents: Vec<Vec<VertexIndex>> = vec![Vec::new(); graph.len()];

    for index in graph.valid_indices() {
        for &target in graph.vertex(index).out_edges.keys() {
            if graph.vertex(target).valid {
                pending[index] += 1;
                dependents[target].push(index);
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<VertexIndex>> = graph
        .valid_indices()
        .filter(|&index| pending[index] == 0)
        .map(Reverse)
        .collect();

    let mut order = Vec::with_capacity(graph.valid_count());
    while let Some(Reverse(index)) = ready.pop() {
        order.push(index);
        for &dependent in &dependents[index] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    let total = graph.valid_count();
    if order.len() != total {
        return Err(DeltaError::ResidualCycle {
            remaining: total - order.len(),
        });
    }
    debug!("Scheduled {} operations", order.len());
    Ok(order)
}

/// Rebuild the blob section so blobs appear in operation order.
///
/// `blobs` is addressed by the current `data_offset` of each operation; on
/// return every offset points into the new buffer, which is returned.
pub fn relinearize_blobs(ops: &mut [Operation], blobs: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(blobs.len());
    for (index, op) in ops.iter_mut().enumerate() {
        if !op.kind.has_data() {
            op.data_offset = 0;
            op.data_length = 0;
            continue;
        }
        let start = op.data_offset as usize;
        let end = start
            .checked_add(op.data_length as usize)
            .filter(|&end| end <= blobs.len())
            .ok_or_else(|| {
                DeltaError::ManifestValidation(format!(
                    "operation {} blob {}+{} exceeds {} bytes of data",
                    index,
                    op.data_offset,
                    op.data_length,
                    blobs.len()
                ))
            })?;
        op.data_offset = out.len() as u64;
        out.extend_from_slice(&blobs[start..end]);
    }
    Ok(out)
}
