//! Install operations
//!
//! The four operation kinds form a closed set; the engine matches on them
//! exhaustively.

use crate::extent::{self, Extent};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Write the blob verbatim
    Replace,
    /// Decompress the blob, then write it
    ReplaceCompressed,
    /// Copy source blocks to destination blocks, no blob
    Move,
    /// Patch the source content with the blob, write the result
    BinaryDiff,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Replace => "REPLACE",
            OperationKind::ReplaceCompressed => "REPLACE_COMPRESSED",
            OperationKind::Move => "MOVE",
            OperationKind::BinaryDiff => "BINARY_DIFF",
        }
    }

    /// Whether operations of this kind carry a data blob
    pub fn has_data(self) -> bool {
        !matches!(self, OperationKind::Move)
    }

    /// Whether operations of this kind read existing partition blocks
    pub fn reads_source(self) -> bool {
        matches!(self, OperationKind::Move | OperationKind::BinaryDiff)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,
    pub src_extents: Vec<Extent>,
    pub dst_extents: Vec<Extent>,
    /// Logical source length in bytes (binary diff only)
    pub src_length: u64,
    /// Logical destination length in bytes (binary diff only)
    pub dst_length: u64,
    /// Blob offset relative to the start of the data section
    pub data_offset: u64,
    pub data_length: u64,
    /// SHA-256 of the blob
    pub data_hash: Option<[u8; 32]>,
}

impl Operation {
    fn base(kind: OperationKind, src_extents: Vec<Extent>, dst_extents: Vec<Extent>) -> Self {
        Operation {
            kind,
            src_extents,
            dst_extents,
            src_length: 0,
            dst_length: 0,
            data_offset: 0,
            data_length: 0,
            data_hash: None,
        }
    }

    pub fn replace(dst_extents: Vec<Extent>) -> Self {
        Self::base(OperationKind::Replace, Vec::new(), dst_extents)
    }

    pub fn replace_compressed(dst_extents: Vec<Extent>) -> Self {
        Self::base(OperationKind::ReplaceCompressed, Vec::new(), dst_extents)
    }

    pub fn moved(src_extents: Vec<Extent>, dst_extents: Vec<Extent>) -> Self {
        Self::base(OperationKind::Move, src_extents, dst_extents)
    }

    pub fn binary_diff(
        src_extents: Vec<Extent>,
        dst_extents: Vec<Extent>,
        src_length: u64,
        dst_length: u64,
    ) -> Self {
        let mut op = Self::base(OperationKind::BinaryDiff, src_extents, dst_extents);
        op.src_length = src_length;
        op.dst_length = dst_length;
        op
    }

    /// Attach a blob's location and digest
    pub fn set_data(&mut self, offset: u64, data: &[u8]) {
        self.data_offset = offset;
        self.data_length = data.len() as u64;
        self.data_hash = Some(Sha256::digest(data).into());
    }

    pub fn src_blocks(&self) -> u64 {
        extent::block_count(&self.src_extents)
    }

    pub fn dst_blocks(&self) -> u64 {
        extent::block_count(&self.dst_extents)
    }

    /// Whether any extent touches scratch space
    pub fn uses_scratch(&self) -> bool {
        self.src_extents
            .iter()
            .chain(self.dst_extents.iter())
            .any(|e| e.is_temp())
    }
}
