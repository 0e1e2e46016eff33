//! Scratch-space allocator for cycle breaking
//!
//! Hands out block runs from the range starting at [`TEMP_BLOCK_BASE`].
//! Free space is tracked as extents keyed by start block, best-fit first,
//! falling back to several smaller extents when no single run is big enough.

use crate::error::{DeltaError, Result};
use crate::extent::{Extent, TEMP_BLOCK_BASE};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct ScratchAllocator {
    /// Free extents indexed by absolute start block
    free_extents: BTreeMap<u64, Extent>,

    /// Total number of scratch blocks
    capacity: u64,

    /// Number of free blocks available
    free_blocks: u64,
}

impl ScratchAllocator {
    /// Create an allocator over `capacity` scratch blocks
    pub fn new(capacity: u64) -> Self {
        let mut free_extents = BTreeMap::new();
        if capacity > 0 {
            free_extents.insert(TEMP_BLOCK_BASE, Extent::new(TEMP_BLOCK_BASE, capacity));
        }
        ScratchAllocator {
            free_extents,
            capacity,
            free_blocks: capacity,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn free_blocks(&self) -> u64 {
        self.free_blocks
    }

    /// Blocks handed out or reserved so far
    pub fn used_blocks(&self) -> u64 {
        self.capacity - self.free_blocks
    }

    /// Highest allocated block + 1, relative to [`TEMP_BLOCK_BASE`]
    pub fn high_water_mark(&self) -> u64 {
        let mut mark = self.capacity;
        if let Some((_, last)) = self.free_extents.iter().next_back() {
            if last.end() == TEMP_BLOCK_BASE + self.capacity {
                mark = last.start - TEMP_BLOCK_BASE;
            }
        }
        mark
    }

    /// Number of free extents (fragmentation indicator)
    pub fn extent_count(&self) -> usize {
        self.free_extents.len()
    }

    /// Allocate `num_blocks` scratch blocks.
    ///
    /// Uses the smallest free extent that fits; otherwise takes free extents
    /// in ascending order until the request is covered.
    pub fn allocate(&mut self, num_blocks: u64) -> Result<Vec<Extent>> {
        if num_blocks == 0 {
            return Ok(Vec::new());
        }
        if num_blocks > self.free_blocks {
            return Err(DeltaError::InsufficientScratch {
                requested: num_blocks,
                available: self.free_blocks,
            });
        }

        let best_fit = self
            .free_extents
            .values()
            .filter(|extent| extent.length >= num_blocks)
            .min_by_key(|extent| extent.length)
            .copied();

        let allocated = match best_fit {
            Some(extent) => vec![self.take_from(extent, num_blocks)],
            None => {
                let mut remaining = num_blocks;
                let mut pieces = Vec::new();
                while remaining > 0 {
                    let extent = match self.free_extents.values().next() {
                        Some(extent) => *extent,
                        None => break,
                    };
                    let take = extent.length.min(remaining);
                    pieces.push(self.take_from(extent, take));
                    remaining -= take;
                }
                pieces
            }
        };

        Ok(allocated)
    }

    /// Mark scratch blocks that are already claimed as destinations
    pub fn reserve(&mut self, extent: &Extent) -> Result<()> {
        if !extent.is_temp() || extent.end() > TEMP_BLOCK_BASE + self.capacity {
            return Err(DeltaError::InvalidExtent(format!(
                "extent {}+{} is outside scratch space",
                extent.start, extent.length
            )));
        }

        let holder = self
            .free_extents
            .range(..=extent.start)
            .next_back()
            .map(|(_, e)| *e)
            .filter(|e| e.end() >= extent.end());
        let holder = holder.ok_or_else(|| {
            DeltaError::InvalidExtent(format!(
                "scratch extent {}+{} is already claimed",
                extent.start, extent.length
            ))
        })?;

        self.free_extents.remove(&holder.start);
        if extent.start > holder.start {
            self.free_extents.insert(
                holder.start,
                Extent::new(holder.start, extent.start - holder.start),
            );
        }
        if holder.end() > extent.end() {
            self.free_extents.insert(
                extent.end(),
                Extent::new(extent.end(), holder.end() - extent.end()),
            );
        }
        self.free_blocks -= extent.length;
        Ok(())
    }

    /// Split `num_blocks` off the front of a free extent
    fn take_from(&mut self, extent: Extent, num_blocks: u64) -> Extent {
        self.free_extents.remove(&extent.start);
        let remaining_length = extent.length - num_blocks;
        if remaining_length > 0 {
            let remaining_start = extent.start + num_blocks;
            self.free_extents.insert(
                remaining_start,
                Extent::new(remaining_start, remaining_length),
            );
        }
        self.free_blocks -= num_blocks;
        Extent::new(extent.start, num_blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_is_contiguous_and_above_base() {
        let mut alloc = ScratchAllocator::new(100);
        let extents = alloc.allocate(10).unwrap();
        assert_eq!(extents, vec![Extent::new(TEMP_BLOCK_BASE, 10)]);
        assert!(extents[0].is_temp());
        assert_eq!(alloc.free_blocks(), 90);

        let next = alloc.allocate(5).unwrap();
        assert_eq!(next, vec![Extent::new(TEMP_BLOCK_BASE + 10, 5)]);
        assert_eq!(alloc.high_water_mark(), 15);
    }

    #[test]
    fn test_out_of_scratch() {
        let mut alloc = ScratchAllocator::new(4);
        alloc.allocate(4).unwrap();
        let result = alloc.allocate(1);
        assert!(matches!(
            result,
            Err(DeltaError::InsufficientScratch {
                requested: 1,
                available: 0
            })
        ));
    }

    #[test]
    fn test_zero_capacity() {
        let mut alloc = ScratchAllocator::new(0);
        assert!(alloc.allocate(0).unwrap().is_empty());
        assert!(alloc.allocate(1).is_err());
    }

    #[test]
    fn test_reserve_splits_free_extent() {
        let mut alloc = ScratchAllocator::new(20);
        alloc
            .reserve(&Extent::new(TEMP_BLOCK_BASE + 5, 5))
            .unwrap();
        assert_eq!(alloc.extent_count(), 2);
        assert_eq!(alloc.free_blocks(), 15);

        // Double claim is rejected
        assert!(alloc.reserve(&Extent::new(TEMP_BLOCK_BASE + 6, 1)).is_err());

        // Best fit takes the 5-block gap at the front
        let extents = alloc.allocate(5).unwrap();
        assert_eq!(extents, vec![Extent::new(TEMP_BLOCK_BASE, 5)]);
    }

    #[test]
    fn test_fragmented_allocation_spans_extents() {
        let mut alloc = ScratchAllocator::new(10);
        alloc.reserve(&Extent::new(TEMP_BLOCK_BASE + 4, 2)).unwrap();
        let extents = alloc.allocate(7).unwrap();
        assert_eq!(
            extents,
            vec![
                Extent::new(TEMP_BLOCK_BASE, 4),
                Extent::new(TEMP_BLOCK_BASE + 6, 3)
            ]
        );
        assert_eq!(alloc.free_blocks(), 1);
    }

    #[test]
    fn test_reserve_rejects_real_blocks() {
        let mut alloc = ScratchAllocator::new(10);
        assert!(alloc.reserve(&Extent::new(3, 1)).is_err());
    }
}
