//! Extent/block model
//!
//! An extent is a contiguous run of blocks, or a sparse hole that reads as
//! zeros and has no backing storage. Block numbers at or above
//! [`TEMP_BLOCK_BASE`] belong to scratch space created by cycle breaking and
//! never land in the final partition layout.

use crate::error::{DeltaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

/// Start value marking a sparse hole
pub const SPARSE_HOLE: u64 = u64::MAX;

/// First block number of the scratch range.
///
/// Low enough that `TEMP_BLOCK_BASE * MAX_BLOCK_SIZE` still fits a byte
/// offset, so scratch blocks can appear in position strings.
pub const TEMP_BLOCK_BASE: u64 = 1 << 40;

/// Largest supported block size in bytes
pub const MAX_BLOCK_SIZE: u32 = 1 << 20;

/// An extent representing a contiguous range of blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent {
    /// Starting block, or [`SPARSE_HOLE`]
    pub start: u64,
    /// Number of blocks
    pub length: u64,
}

impl Extent {
    pub fn new(start: u64, length: u64) -> Self {
        Extent { start, length }
    }

    /// A zero-filled extent with no backing blocks
    pub fn hole(length: u64) -> Self {
        Extent {
            start: SPARSE_HOLE,
            length,
        }
    }

    pub fn is_hole(&self) -> bool {
        self.start == SPARSE_HOLE
    }

    /// True for extents inside the scratch range
    pub fn is_temp(&self) -> bool {
        !self.is_hole() && self.start >= TEMP_BLOCK_BASE
    }

    /// One past the last block
    pub fn end(&self) -> u64 {
        self.start + self.length
    }

    /// Check if this extent contains a block ID
    pub fn contains(&self, block_id: u64) -> bool {
        !self.is_hole() && block_id >= self.start && block_id < self.end()
    }

    /// Check if `other` starts right where this extent ends
    pub fn is_followed_by(&self, other: &Extent) -> bool {
        if self.is_hole() || other.is_hole() {
            return self.is_hole() && other.is_hole();
        }
        self.end() == other.start
    }

    /// Coalesce `other` onto the end of this extent
    pub fn coalesce(&self, other: &Extent) -> Option<Extent> {
        if !self.is_followed_by(other) {
            return None;
        }
        Some(Extent {
            start: self.start,
            length: self.length + other.length,
        })
    }

    /// Iterate the block numbers of a non-hole extent
    pub fn blocks(&self) -> impl Iterator<Item = u64> {
        let (start, end) = if self.is_hole() {
            (0, 0)
        } else {
            (self.start, self.end())
        };
        start..end
    }
}

/// Append one block, extending the last extent when contiguous
pub fn append_block(extents: &mut Vec<Extent>, block: u64) {
    if let Some(last) = extents.last_mut() {
        let contiguous = if block == SPARSE_HOLE {
            last.is_hole()
        } else {
            !last.is_hole() && last.end() == block
        };
        if contiguous {
            last.length += 1;
            return;
        }
    }
    extents.push(Extent::new(block, 1));
}

/// Total number of blocks covered, holes included
pub fn block_count(extents: &[Extent]) -> u64 {
    extents.iter().map(|e| e.length).sum()
}

/// [`block_count`] for untrusted extent lists; `None` on overflow
pub fn checked_block_count(extents: &[Extent]) -> Option<u64> {
    extents
        .iter()
        .try_fold(0u64, |total, e| total.checked_add(e.length))
}

/// Expand extents into one entry per block; hole blocks become [`SPARSE_HOLE`]
pub fn expand(extents: &[Extent]) -> Vec<u64> {
    let mut blocks = Vec::with_capacity(block_count(extents) as usize);
    for extent in extents {
        if extent.is_hole() {
            blocks.extend(std::iter::repeat(SPARSE_HOLE).take(extent.length as usize));
        } else {
            blocks.extend(extent.blocks());
        }
    }
    blocks
}

/// Rebuild the shortest extent list for an ordered block sequence
pub fn compress(blocks: &[u64]) -> Vec<Extent> {
    let mut extents = Vec::new();
    for &block in blocks {
        append_block(&mut extents, block);
    }
    extents
}

/// Append an extent, merging it into the last one when contiguous
pub fn append_extent(extents: &mut Vec<Extent>, extent: Extent) {
    if extent.length == 0 {
        return;
    }
    match extents.last_mut() {
        Some(last) if last.is_followed_by(&extent) => last.length += extent.length,
        _ => extents.push(extent),
    }
}

/// Replace every occurrence of the blocks in `from` with the block at the
/// same position in `to`.
///
/// `from` and `to` must cover the same number of blocks. The result keeps the
/// order and total length of `extents`, splitting extents wherever a
/// substituted run begins or ends.
pub fn substitute(extents: &[Extent], from: &[Extent], to: &[Extent]) -> Result<Vec<Extent>> {
    let from_blocks = expand(from);
    let to_blocks = expand(to);
    if from_blocks.len() != to_blocks.len() {
        return Err(DeltaError::ExtentLengthMismatch {
            expected: from_blocks.len() as u64,
            actual: to_blocks.len() as u64,
        });
    }
    if from_blocks.contains(&SPARSE_HOLE) {
        return Err(DeltaError::InvalidExtent(
            "cannot substitute sparse hole blocks".to_string(),
        ));
    }

    let mapping: HashMap<u64, u64> = from_blocks.into_iter().zip(to_blocks).collect();
    let rewritten: Vec<u64> = expand(extents)
        .into_iter()
        .map(|block| {
            if block == SPARSE_HOLE {
                block
            } else {
                mapping.get(&block).copied().unwrap_or(block)
            }
        })
        .collect();
    Ok(compress(&rewritten))
}

/// Byte range decoded from a position string. `offset` is `None` for holes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: Option<u64>,
    pub length: u64,
}

/// Encode extents as `"<byte-offset>:<byte-length>"` pairs.
///
/// Holes encode as offset `-1`. Ranges stop once `full_length` bytes are
/// covered, and the last one is truncated to land exactly on it.
pub fn to_position_string(extents: &[Extent], block_size: u64, full_length: u64) -> String {
    let mut out = String::new();
    let mut remaining = full_length;
    for extent in extents {
        if remaining == 0 {
            break;
        }
        let bytes = (extent.length * block_size).min(remaining);
        if !out.is_empty() {
            out.push(',');
        }
        if extent.is_hole() {
            let _ = write!(out, "-1:{}", bytes);
        } else {
            let _ = write!(out, "{}:{}", extent.start * block_size, bytes);
        }
        remaining -= bytes;
    }
    out
}

/// Decode a position string produced by [`to_position_string`]
pub fn parse_position_string(s: &str) -> Result<Vec<ByteRange>> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    s.split(',')
        .map(|pair| {
            let (offset, length) = pair
                .split_once(':')
                .ok_or_else(|| DeltaError::PositionString(format!("missing ':' in {pair:?}")))?;
            let length: u64 = length
                .parse()
                .map_err(|_| DeltaError::PositionString(format!("bad length in {pair:?}")))?;
            let offset = if offset == "-1" {
                None
            } else {
                Some(
                    offset
                        .parse::<u64>()
                        .map_err(|_| DeltaError::PositionString(format!("bad offset in {pair:?}")))?,
                )
            };
            Ok(ByteRange { offset, length })
        })
        .collect()
}

/// Union of block ranges, answering overlap queries
///
/// Ranges are kept disjoint and non-adjacent; holes are ignored.
#[derive(Debug, Clone, Default)]
pub struct ExtentSet {
    /// start block -> end block (exclusive)
    ranges: BTreeMap<u64, u64>,
}

impl ExtentSet {
    pub fn new() -> Self {
        ExtentSet::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    pub fn insert(&mut self, extent: &Extent) {
        if extent.is_hole() || extent.length == 0 {
            return;
        }
        let mut start = extent.start;
        let mut end = extent.end();

        if let Some((&prev_start, &prev_end)) = self.ranges.range(..=start).next_back() {
            if prev_end >= start {
                start = prev_start;
                end = end.max(prev_end);
                self.ranges.remove(&prev_start);
            }
        }
        let absorbed: Vec<u64> = self.ranges.range(start..=end).map(|(&s, _)| s).collect();
        for next_start in absorbed {
            if let Some(next_end) = self.ranges.remove(&next_start) {
                end = end.max(next_end);
            }
        }
        self.ranges.insert(start, end);
    }

    pub fn extend(&mut self, extents: &[Extent]) {
        for extent in extents {
            self.insert(extent);
        }
    }

    pub fn overlaps(&self, extent: &Extent) -> bool {
        if extent.is_hole() || extent.length == 0 {
            return false;
        }
        self.ranges
            .range(..extent.end())
            .next_back()
            .is_some_and(|(_, &end)| end > extent.start)
    }

    pub fn overlaps_any(&self, extents: &[Extent]) -> bool {
        extents.iter().any(|e| self.overlaps(e))
    }
}
