//! Block ownership index
//!
//! One entry per partition block, recording which operations read the block
//! and which single operation writes it. A second writer is rejected here,
//! before any edge is built.

use crate::error::{DeltaError, Result};
use crate::graph::VertexIndex;
use crate::operation::Operation;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockOwner {
    /// Operations whose source extents include the block
    pub readers: Vec<VertexIndex>,
    /// The operation whose destination extents include the block
    pub writer: Option<VertexIndex>,
}

#[derive(Debug, Clone)]
pub struct BlockOwnership {
    blocks: Vec<BlockOwner>,
}

impl BlockOwnership {
    pub fn new(total_blocks: u64) -> Self {
        BlockOwnership {
            blocks: vec![BlockOwner::default(); total_blocks as usize],
        }
    }

    /// Build the index from operations, vertex `i` being `ops[i]`
    pub fn from_operations(total_blocks: u64, ops: &[Operation]) -> Result<Self> {
        let mut ownership = Self::new(total_blocks);
        for (index, op) in ops.iter().enumerate() {
            ownership.register(index, op)?;
        }
        Ok(ownership)
    }

    pub fn total_blocks(&self) -> u64 {
        self.blocks.len() as u64
    }

    pub fn owner(&self, block: u64) -> Option<&BlockOwner> {
        self.blocks.get(block as usize)
    }

    /// Blocks in ascending order with their owners
    pub fn iter(&self) -> impl Iterator<Item = (u64, &BlockOwner)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(block, owner)| (block as u64, owner))
    }

    /// Record the reads and writes of one operation
    pub fn register(&mut self, index: VertexIndex, op: &Operation) -> Result<()> {
        for extent in op.src_extents.iter().filter(|e| !e.is_hole()) {
            for block in extent.blocks() {
                let owner = self.slot(block)?;
                if !owner.readers.contains(&index) {
                    owner.readers.push(index);
                }
            }
        }

        for extent in &op.dst_extents {
            if extent.is_hole() {
                return Err(DeltaError::InvalidExtent(format!(
                    "operation {} writes to a sparse hole",
                    index
                )));
            }
            for block in extent.blocks() {
                let owner = self.slot(block)?;
                match owner.writer {
                    Some(first) if first != index => {
                        return Err(DeltaError::DoubleWriter {
                            block,
                            first,
                            second: index,
                        });
                    }
                    _ => owner.writer = Some(index),
                }
            }
        }
        Ok(())
    }

    fn slot(&mut self, block: u64) -> Result<&mut BlockOwner> {
        let total_blocks = self.blocks.len() as u64;
        self.blocks
            .get_mut(block as usize)
            .ok_or(DeltaError::BlockOutOfRange {
                block,
                total_blocks,
            })
    }
}
