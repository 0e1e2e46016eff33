//! Payload generation from an old and a new partition image
//!
//! Blocks are compared one by one. Unchanged blocks are skipped, blocks
//! whose content already exists in the old image become `MOVE`s, and the
//! rest are shipped as data. The operations then go through the dependency
//! graph so that none of them reads a block after another has overwritten it.

use crate::compression::{self, CompressionConfig};
use crate::config::GeneratorConfig;
use crate::diff::{PatchCodec, XorDeltaCodec};
use crate::error::Result;
use crate::extent::Extent;
use crate::graph::{
    build_edges, relinearize_blobs, topological_order, BlockOwnership, CycleBreakStats,
    CycleBreaker, Graph,
};
use crate::manifest::{DeltaManifest, PartitionInfo};
use crate::operation::{Operation, OperationKind};
use crate::payload::{Payload, PayloadWriter};
use crate::signature::PayloadSigner;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{debug, info};

/// Summary of one generation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub replace_ops: usize,
    pub compressed_ops: usize,
    pub diff_ops: usize,
    /// `MOVE`s found by content, before cycle breaking
    pub move_ops: usize,
    pub unchanged_blocks: u64,
    pub cycles: CycleBreakStats,
    /// Operations in the final schedule
    pub operations: usize,
    pub scratch_blocks: u64,
    pub data_bytes: u64,
    pub payload_size: u64,
}

#[derive(Debug, Clone)]
pub struct GeneratedPayload {
    pub payload: Payload,
    pub report: GenerationReport,
}

impl GeneratedPayload {
    pub fn manifest(&self) -> &DeltaManifest {
        &self.payload.manifest
    }
}

/// What the new image needs at one block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockPlan {
    Unchanged,
    Move(u64),
    Data,
}

pub struct DeltaGenerator {
    config: GeneratorConfig,
    codec: Box<dyn PatchCodec>,
}

impl DeltaGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        config.validate()?;
        Ok(DeltaGenerator {
            config,
            codec: Box::new(XorDeltaCodec),
        })
    }

    pub fn with_codec(mut self, codec: Box<dyn PatchCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Build a payload that turns `old` into `new` in place
    pub fn generate(
        &self,
        old: &[u8],
        new: &[u8],
        signer: Option<&PayloadSigner>,
    ) -> Result<GeneratedPayload> {
        let block_size = self.config.block_size as u64;
        let old_blocks = (old.len() as u64).div_ceil(block_size);
        let new_blocks = (new.len() as u64).div_ceil(block_size);

        let mut report = GenerationReport::default();
        let plans = self.plan_blocks(old, new, &mut report);

        let mut ops = Vec::new();
        let mut blobs = Vec::new();
        let mut start = 0usize;
        while start < plans.len() {
            let len = self.run_length(&plans, start);
            match plans[start] {
                BlockPlan::Unchanged => {}
                BlockPlan::Move(src) => {
                    ops.push(Operation::moved(
                        vec![Extent::new(src, len as u64)],
                        vec![Extent::new(start as u64, len as u64)],
                    ));
                    report.move_ops += 1;
                }
                BlockPlan::Data => {
                    let op = self.data_operation(
                        old,
                        new,
                        start as u64,
                        len as u64,
                        &mut blobs,
                        &mut report,
                    )?;
                    ops.push(op);
                }
            }
            start += len;
        }
        info!(
            "Diffed {} blocks: {} operations, {} unchanged",
            new_blocks,
            ops.len(),
            report.unchanged_blocks
        );

        let total_blocks = old_blocks.max(new_blocks);
        let ownership = BlockOwnership::from_operations(total_blocks, &ops)?;
        let mut graph = Graph::from_operations(ops);
        build_edges(&mut graph, &ownership);
        info!(
            "Dependency graph built: {} vertices, {} edges",
            graph.valid_count(),
            graph.edge_count()
        );

        let mut breaker = CycleBreaker::new(self.config.max_scratch_blocks, self.config.cut_policy);
        report.cycles = breaker.break_cycles(&mut graph)?;
        let order = topological_order(&graph)?;
        let mut ops = graph.operations_in(&order);
        let blobs = relinearize_blobs(&mut ops, &blobs)?;

        let mut manifest = DeltaManifest::new(self.config.block_size, ops);
        manifest.scratch_blocks = breaker.allocator().high_water_mark();
        manifest.old_partition = Some(partition_info(old));
        manifest.new_partition = Some(partition_info(new));

        report.operations = manifest.operations.len();
        report.scratch_blocks = manifest.scratch_blocks;
        report.data_bytes = blobs.len() as u64;

        let payload = PayloadWriter::new(manifest, blobs)?.finish(signer)?;
        report.payload_size = payload.size();

        info!(
            "Payload generated: {} operations, {} scratch blocks, {} bytes",
            report.operations, report.scratch_blocks, report.payload_size
        );
        Ok(GeneratedPayload { payload, report })
    }

    fn plan_blocks(&self, old: &[u8], new: &[u8], report: &mut GenerationReport) -> Vec<BlockPlan> {
        let block_size = self.config.block_size as usize;
        let old_digests: Vec<[u8; 32]> = old
            .chunks(block_size)
            .map(|chunk| block_digest(chunk, block_size))
            .collect();

        // First occurrence of each old block's content
        let mut index: HashMap<[u8; 32], u64> = HashMap::new();
        for (block, digest) in old_digests.iter().enumerate() {
            index.entry(*digest).or_insert(block as u64);
        }

        new.chunks(block_size)
            .enumerate()
            .map(|(block, chunk)| {
                let digest = block_digest(chunk, block_size);
                if old_digests.get(block) == Some(&digest) {
                    report.unchanged_blocks += 1;
                    BlockPlan::Unchanged
                } else if let Some(&src) = index.get(&digest) {
                    BlockPlan::Move(src)
                } else {
                    BlockPlan::Data
                }
            })
            .collect()
    }

    /// Blocks from `start` that one operation can cover
    fn run_length(&self, plans: &[BlockPlan], start: usize) -> usize {
        let limit = self.config.chunk_blocks as usize;
        let mut len = 1;
        while start + len < plans.len() && len < limit {
            let continues = match (plans[start], plans[start + len]) {
                (BlockPlan::Unchanged, BlockPlan::Unchanged) => true,
                (BlockPlan::Data, BlockPlan::Data) => true,
                (BlockPlan::Move(first), BlockPlan::Move(next)) => next == first + len as u64,
                _ => false,
            };
            if !continues {
                break;
            }
            len += 1;
        }
        len
    }

    /// Cheapest data-carrying operation for new blocks `start..start + len`
    fn data_operation(
        &self,
        old: &[u8],
        new: &[u8],
        start: u64,
        len: u64,
        blobs: &mut Vec<u8>,
        report: &mut GenerationReport,
    ) -> Result<Operation> {
        let block_size = self.config.block_size as u64;
        let dst = vec![Extent::new(start, len)];
        let begin = (start * block_size) as usize;
        let new_end = ((start + len) * block_size).min(new.len() as u64) as usize;
        let target = &new[begin..new_end];

        let mut literal = target.to_vec();
        literal.resize((len * block_size) as usize, 0);

        let compression = CompressionConfig::for_method(self.config.compression);
        let compressed = compression::encode_if_beneficial(&literal, &compression)?;
        let literal_size = compressed.as_ref().map_or(literal.len(), Vec::len);

        let old_end = ((start + len) * block_size).min(old.len() as u64) as usize;
        if self.config.enable_binary_diff && old_end > begin {
            let source = &old[begin..old_end];
            let patch = self.codec.diff(source, target)?;
            if patch.len() < literal_size {
                let src_blocks = (source.len() as u64).div_ceil(block_size);
                let mut op = Operation::binary_diff(
                    vec![Extent::new(start, src_blocks)],
                    dst,
                    source.len() as u64,
                    target.len() as u64,
                );
                op.set_data(blobs.len() as u64, &patch);
                blobs.extend_from_slice(&patch);
                report.diff_ops += 1;
                debug!("Blocks {}+{}: binary diff of {} bytes", start, len, patch.len());
                return Ok(op);
            }
        }

        let (mut op, blob) = match compressed {
            Some(blob) => {
                report.compressed_ops += 1;
                (Operation::replace_compressed(dst), blob)
            }
            None => {
                report.replace_ops += 1;
                (Operation::replace(dst), literal)
            }
        };
        debug!(
            "Blocks {}+{}: {} of {} bytes",
            start,
            len,
            op.kind.as_str(),
            blob.len()
        );
        op.set_data(blobs.len() as u64, &blob);
        blobs.extend_from_slice(&blob);
        Ok(op)
    }
}

/// Digest of a block with its tail zero-padded to `block_size`
fn block_digest(chunk: &[u8], block_size: usize) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(chunk);
    if chunk.len() < block_size {
        hasher.update(vec![0u8; block_size - chunk.len()]);
    }
    hasher.finalize().into()
}

fn partition_info(image: &[u8]) -> PartitionInfo {
    PartitionInfo {
        size: image.len() as u64,
        hash: Sha256::digest(image).into(),
    }
}

/// Count operations of each kind in a schedule
pub fn operation_histogram(ops: &[Operation]) -> HashMap<OperationKind, usize> {
    let mut counts = HashMap::new();
    for op in ops {
        *counts.entry(op.kind).or_insert(0) += 1;
    }
    counts
}
