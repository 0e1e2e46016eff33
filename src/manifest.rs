//! Delta payload manifest
//!
//! The manifest follows the header and tells the applier everything it needs
//! before the first blob arrives: the block size, the operations in their
//! final order, where the signature message sits, and what the partitions
//! should hash to before and after the update.
//!
//! Blob offsets are relative to the start of the data section, which begins
//! right after the manifest. Blobs are laid out in operation order, so a
//! streaming reader never seeks.

use crate::error::{DeltaError, Result};
use crate::diff::MAX_PATCH_OUTPUT;
use crate::extent::{self, MAX_BLOCK_SIZE, TEMP_BLOCK_BASE};
use crate::header::MAX_MANIFEST_SIZE;
use crate::operation::{Operation, OperationKind};
use bincode::Options;
use serde::{Deserialize, Serialize};

/// Size and SHA-256 of a partition image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub size: u64,
    pub hash: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaManifest {
    /// Block size in bytes, a power of two
    pub block_size: u32,

    /// Operations in application order
    pub operations: Vec<Operation>,

    /// Expected source partition, when the generator knew it
    pub old_partition: Option<PartitionInfo>,

    /// Expected target partition after the last operation
    pub new_partition: Option<PartitionInfo>,

    /// Scratch blocks the operations reference above `TEMP_BLOCK_BASE`
    pub scratch_blocks: u64,

    /// Offset of the signature message in the data section
    pub signatures_offset: Option<u64>,

    /// Length of the signature message
    pub signatures_size: u64,
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_MANIFEST_SIZE)
}

/// Power of two between 512 bytes and [`MAX_BLOCK_SIZE`]
pub fn valid_block_size(block_size: u32) -> bool {
    (512..=MAX_BLOCK_SIZE).contains(&block_size) && block_size.is_power_of_two()
}

impl DeltaManifest {
    pub fn new(block_size: u32, operations: Vec<Operation>) -> Self {
        DeltaManifest {
            block_size,
            operations,
            old_partition: None,
            new_partition: None,
            scratch_blocks: 0,
            signatures_offset: None,
            signatures_size: 0,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(codec().serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(codec().deserialize(bytes)?)
    }

    /// Length of the blob section excluding the signature message
    pub fn data_length(&self) -> u64 {
        self.operations.iter().map(|op| op.data_length).sum()
    }

    /// Check structural consistency.
    ///
    /// # Errors
    ///
    /// `InvalidBlockSize` for a block size that is not a power of two between
    /// 512 bytes and 1 MiB, `ManifestValidation` for anything else:
    /// operations with mismatched extents, data on a `MOVE`, blobs out of
    /// sequence, scratch references beyond `scratch_blocks`, or a signature
    /// message that overlaps the blobs.
    pub fn validate(&self) -> Result<()> {
        if !valid_block_size(self.block_size) {
            return Err(DeltaError::InvalidBlockSize(self.block_size));
        }
        let block_size = self.block_size as u64;
        let partition_blocks = self
            .new_partition
            .map(|p| p.size.div_ceil(block_size));

        // Every scratch byte address has to fit in a u64
        let scratch_end = TEMP_BLOCK_BASE
            .checked_add(self.scratch_blocks)
            .filter(|end| end.checked_mul(block_size).is_some())
            .ok_or_else(|| {
                DeltaError::ManifestValidation(format!(
                    "{} scratch blocks exceed the addressable range",
                    self.scratch_blocks
                ))
            })?;
        let max_hole_blocks = MAX_PATCH_OUTPUT / block_size;

        let mut next_offset = 0u64;
        for (index, op) in self.operations.iter().enumerate() {
            let invalid = |reason: &str| {
                DeltaError::ManifestValidation(format!(
                    "operation {} ({}): {}",
                    index,
                    op.kind.as_str(),
                    reason
                ))
            };

            if op.dst_extents.is_empty() {
                return Err(invalid("no destination extents"));
            }
            for extent in op.src_extents.iter().chain(&op.dst_extents) {
                if extent.length == 0 {
                    return Err(invalid("zero-length extent"));
                }
                if extent.is_hole() {
                    if extent.length > max_hole_blocks {
                        return Err(invalid("sparse hole too long"));
                    }
                    continue;
                }
                let limit = if extent.is_temp() {
                    scratch_end
                } else {
                    TEMP_BLOCK_BASE
                };
                match extent.start.checked_add(extent.length) {
                    Some(end) if end <= limit => {}
                    _ if extent.is_temp() => {
                        return Err(invalid("scratch extent beyond declared scratch space"))
                    }
                    _ => return Err(invalid("extent crosses into scratch space")),
                }
            }
            for extent in &op.dst_extents {
                if extent.is_hole() {
                    return Err(invalid("destination is a sparse hole"));
                }
                if let Some(total) = partition_blocks {
                    if !extent.is_temp() && extent.end() > total {
                        return Err(invalid("destination beyond the target partition"));
                    }
                }
            }

            if !op.kind.reads_source() && !op.src_extents.is_empty() {
                return Err(invalid("replace reads source extents"));
            }
            let src_bytes = extent::checked_block_count(&op.src_extents)
                .and_then(|blocks| blocks.checked_mul(block_size))
                .ok_or_else(|| invalid("source extents overflow"))?;
            let dst_bytes = extent::checked_block_count(&op.dst_extents)
                .and_then(|blocks| blocks.checked_mul(block_size))
                .ok_or_else(|| invalid("destination extents overflow"))?;
            match op.kind {
                OperationKind::Move => {
                    if op.data_length != 0 {
                        return Err(invalid("MOVE carries data"));
                    }
                    if src_bytes != dst_bytes {
                        return Err(invalid("source and destination lengths differ"));
                    }
                }
                OperationKind::Replace | OperationKind::ReplaceCompressed => {}
                OperationKind::BinaryDiff => {
                    if op.src_length > src_bytes {
                        return Err(invalid("source length exceeds source extents"));
                    }
                    if op.dst_length > dst_bytes {
                        return Err(invalid("destination length exceeds destination extents"));
                    }
                }
            }

            if op.kind == OperationKind::Replace && op.data_length != dst_bytes {
                return Err(invalid("data length does not fill destination"));
            }
            if op.kind.has_data() {
                if op.data_offset != next_offset {
                    return Err(invalid("blob out of sequence"));
                }
                next_offset = next_offset
                    .checked_add(op.data_length)
                    .ok_or_else(|| invalid("blob length overflows"))?;
            }
        }

        if let Some(offset) = self.signatures_offset {
            if offset < next_offset {
                return Err(DeltaError::ManifestValidation(format!(
                    "signature message at {} overlaps blobs ending at {}",
                    offset, next_offset
                )));
            }
        }

        Ok(())
    }

    /// Blocks written outside scratch space
    pub fn destination_blocks(&self) -> u64 {
        self.operations
            .iter()
            .flat_map(|op| op.dst_extents.iter())
            .filter(|e| !e.is_temp())
            .map(|e| e.length)
            .sum()
    }

    /// Highest non-scratch block referenced by any operation, plus one
    pub fn required_blocks(&self) -> u64 {
        self.operations
            .iter()
            .flat_map(|op| op.src_extents.iter().chain(op.dst_extents.iter()))
            .filter(|e| !e.is_hole() && !e.is_temp())
            .map(|e| e.end())
            .max()
            .unwrap_or(0)
    }

    /// Number of operations that touch scratch space
    pub fn scratch_operations(&self) -> usize {
        self.operations.iter().filter(|op| op.uses_scratch()).count()
    }

    /// Total blocks copied by MOVE operations
    pub fn moved_blocks(&self) -> u64 {
        self.operations
            .iter()
            .filter(|op| op.kind == OperationKind::Move)
            .map(|op| extent::block_count(&op.dst_extents))
            .sum()
    }
}
