//! Patch application engine
//!
//! Consumes a payload as a byte stream and replays its operations against
//! the target device, strictly in order and one at a time.
//!
//! ```text
//! AwaitingManifest -> ApplyingOperations -> Verifying -> Done
//!         \                  |                  |
//!          +-----------------+------------------+--> Failed
//! ```
//!
//! Every operation is fully buffered and hash-checked before it touches the
//! device, and MOVE and BINARY_DIFF read their whole source before writing.
//! Progress is checkpointed at operation boundaries so an interrupted
//! attempt resumes without re-applying committed operations.
//!
//! # Resuming
//!
//! When a resumable checkpoint exists for the plan's payload identity, the
//! caller feeds the payload metadata (`payload[..metadata_size]`) again and
//! then continues from [`PatchEngine::resume_offset`]. The metadata is parsed
//! but not hashed a second time.

use crate::checkpoint::{self, Checkpoint};
use crate::compression;
use crate::config::EngineConfig;
use crate::diff::{PatchCodec, XorDeltaCodec};
use crate::error::{ContextFlags, DeltaError, ErrorCode, Result};
use crate::extent::{self, Extent, ExtentSet, TEMP_BLOCK_BASE};
use crate::hash::PayloadHasher;
use crate::io::{self, BlockDevice};
use crate::manifest::DeltaManifest;
use crate::operation::{Operation, OperationKind};
use crate::payload;
use crate::prefs::PrefsStore;
use crate::signature::{self, Ed25519Verifier, SignatureVerifier, Signatures};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    AwaitingManifest,
    ApplyingOperations,
    Verifying,
    Done,
    Failed,
}

impl EngineState {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineState::AwaitingManifest => "AwaitingManifest",
            EngineState::ApplyingOperations => "ApplyingOperations",
            EngineState::Verifying => "Verifying",
            EngineState::Done => "Done",
            EngineState::Failed => "Failed",
        }
    }
}

/// What the caller knows about the payload before the first byte arrives
#[derive(Debug, Clone)]
pub struct InstallPlan {
    /// Declared total payload size
    pub payload_size: u64,
    /// Declared SHA-256 of the whole payload
    pub payload_hash: [u8; 32],
    /// Identity checkpoints are bound to
    pub payload_identity: String,
    /// Public key for signature verification; `None` skips it
    pub public_key_path: Option<PathBuf>,
    pub flags: ContextFlags,
}

/// Shared flag polled at operation boundaries
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        CancelHandle::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Operations committed, counting those from earlier attempts
    pub operations_applied: usize,
    pub total_operations: usize,
    /// Data-section bytes consumed
    pub bytes_consumed: u64,
}

/// Callback after each committed operation
pub trait ProgressObserver: Send {
    fn operation_applied(&mut self, progress: &Progress);
}

/// Outcome of an attempt for the outer control loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptReport {
    pub state: EngineState,
    pub error: Option<ErrorCode>,
    pub flags: ContextFlags,
    /// Operations applied by this attempt
    pub operations_applied: usize,
    pub next_operation: usize,
    pub total_operations: usize,
}

/// Everything the engine owns while an update runs
pub struct EngineContext {
    pub target: Box<dyn BlockDevice>,
    /// Backing store for blocks at or above `TEMP_BLOCK_BASE`
    pub scratch: Option<Box<dyn BlockDevice>>,
    pub prefs: Box<dyn PrefsStore>,
    pub verifier: Box<dyn SignatureVerifier>,
    pub codec: Box<dyn PatchCodec>,
    pub config: EngineConfig,
    pub observer: Option<Box<dyn ProgressObserver>>,
    pub cancel: CancelHandle,
}

impl EngineContext {
    pub fn new(target: Box<dyn BlockDevice>, prefs: Box<dyn PrefsStore>) -> Self {
        EngineContext {
            target,
            scratch: None,
            prefs,
            verifier: Box::new(Ed25519Verifier),
            codec: Box::new(XorDeltaCodec),
            config: EngineConfig::default(),
            observer: None,
            cancel: CancelHandle::new(),
        }
    }

    pub fn with_scratch(mut self, scratch: Box<dyn BlockDevice>) -> Self {
        self.scratch = Some(scratch);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Share an existing cancel flag
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_verifier(mut self, verifier: Box<dyn SignatureVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_codec(mut self, codec: Box<dyn PatchCodec>) -> Self {
        self.codec = codec;
        self
    }
}

pub struct PatchEngine {
    ctx: EngineContext,
    plan: InstallPlan,
    public_key: Option<[u8; 32]>,
    state: EngineState,
    error: Option<ErrorCode>,
    flags: ContextFlags,

    hasher: PayloadHasher,
    /// Received bytes not yet consumed
    pending: Vec<u8>,
    manifest: Option<DeltaManifest>,
    metadata_size: u64,
    block_size: u64,

    next_operation: usize,
    /// Data-section bytes consumed
    buffer_offset: u64,
    resume: Option<Checkpoint>,
    resume_count: u32,

    signatures_consumed: bool,
    signed_hash: Option<[u8; 32]>,
    signatures: Option<Signatures>,

    ops_since_checkpoint: u64,
    bytes_since_checkpoint: u64,
    /// Sources read by operations applied since the last checkpoint
    read_since_checkpoint: ExtentSet,
    operations_applied: usize,
}

impl PatchEngine {
    /// Prepare an attempt, picking up a resumable checkpoint if one exists
    pub fn new(ctx: EngineContext, plan: InstallPlan) -> Result<Self> {
        ctx.config.validate()?;
        let public_key = plan
            .public_key_path
            .as_deref()
            .map(signature::load_public_key)
            .transpose()?;

        let mut flags = plan.flags;
        let resume = checkpoint::resumable_checkpoint(
            ctx.prefs.as_ref(),
            &plan.payload_identity,
            ctx.config.max_resume_failures,
        )?;

        let mut engine = PatchEngine {
            ctx,
            plan,
            public_key,
            state: EngineState::AwaitingManifest,
            error: None,
            flags,
            hasher: PayloadHasher::new(),
            pending: Vec::new(),
            manifest: None,
            metadata_size: 0,
            block_size: 0,
            next_operation: 0,
            buffer_offset: 0,
            resume: None,
            resume_count: 0,
            signatures_consumed: false,
            signed_hash: None,
            signatures: None,
            ops_since_checkpoint: 0,
            bytes_since_checkpoint: 0,
            read_since_checkpoint: ExtentSet::new(),
            operations_applied: 0,
        };

        match resume {
            Some(mut saved) => {
                engine.hasher = PayloadHasher::from_state(saved.hash_state.clone())?;
                engine.next_operation = saved.next_operation_index;
                engine.buffer_offset = saved.buffer_offset;
                engine.metadata_size = saved.metadata_size;

                // Count the resume before doing any work so that a payload
                // which crashes the applier runs out of attempts.
                saved.resume_count += 1;
                saved.save(engine.ctx.prefs.as_ref())?;
                engine.resume_count = saved.resume_count;

                flags.resumed = true;
                engine.flags = flags;
                info!(
                    "Resuming update at operation {} (attempt {})",
                    saved.next_operation_index, saved.resume_count
                );
                engine.resume = Some(saved);
            }
            None => {
                checkpoint::start_fresh(engine.ctx.prefs.as_ref(), &engine.plan.payload_identity)?;
                info!("Starting update from the beginning");
            }
        }

        Ok(engine)
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn flags(&self) -> ContextFlags {
        self.flags
    }

    pub fn is_resumed(&self) -> bool {
        self.resume.is_some()
    }

    pub fn next_operation(&self) -> usize {
        self.next_operation
    }

    pub fn manifest(&self) -> Option<&DeltaManifest> {
        self.manifest.as_ref()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.ctx.cancel.clone()
    }

    /// Payload offset to continue the download from after the metadata
    pub fn resume_offset(&self) -> u64 {
        match &self.resume {
            Some(saved) => saved.resume_offset(),
            None => 0,
        }
    }

    pub fn report(&self) -> AttemptReport {
        AttemptReport {
            state: self.state,
            error: self.error,
            flags: self.flags,
            operations_applied: self.operations_applied,
            next_operation: self.next_operation,
            total_operations: self.manifest.as_ref().map_or(0, |m| m.operations.len()),
        }
    }

    /// Feed the next chunk of the payload stream
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        match self.state {
            EngineState::AwaitingManifest | EngineState::ApplyingOperations => {}
            other => {
                return Err(DeltaError::InvalidState {
                    expected: "ApplyingOperations",
                    actual: other.as_str(),
                })
            }
        }
        self.pending.extend_from_slice(data);
        self.process().map_err(|e| self.fail(e))
    }

    /// Verify the completed payload and the target partition
    pub fn finish(&mut self) -> Result<()> {
        if self.state != EngineState::ApplyingOperations {
            return Err(DeltaError::InvalidState {
                expected: "ApplyingOperations",
                actual: self.state.as_str(),
            });
        }
        self.verify().map_err(|e| self.fail(e))?;

        self.state = EngineState::Done;
        checkpoint::clear(self.ctx.prefs.as_ref())?;
        info!(
            "Update complete: {} operations applied this attempt",
            self.operations_applied
        );
        Ok(())
    }

    fn process(&mut self) -> Result<()> {
        loop {
            match self.state {
                EngineState::AwaitingManifest => {
                    if !self.parse_metadata()? {
                        return Ok(());
                    }
                }
                EngineState::ApplyingOperations => {
                    if self.ctx.cancel.is_cancelled() {
                        return Err(DeltaError::Cancelled {
                            next_operation: self.next_operation,
                        });
                    }
                    if self.next_operation < self.total_operations() {
                        if !self.apply_next()? {
                            return Ok(());
                        }
                    } else {
                        self.consume_signatures()?;
                        return Ok(());
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn total_operations(&self) -> usize {
        self.manifest.as_ref().map_or(0, |m| m.operations.len())
    }

    fn manifest_ref(&self) -> Result<&DeltaManifest> {
        self.manifest.as_ref().ok_or(DeltaError::InvalidState {
            expected: "ApplyingOperations",
            actual: self.state.as_str(),
        })
    }

    fn parse_metadata(&mut self) -> Result<bool> {
        let Some((header, manifest)) = payload::read_metadata(&self.pending)? else {
            return Ok(false);
        };
        manifest.validate()?;
        if let Some(expected) = self.ctx.config.expected_block_size {
            if manifest.block_size != expected {
                return Err(DeltaError::InvalidBlockSize(manifest.block_size));
            }
        }
        self.check_devices(&manifest)?;

        let metadata_size = header.metadata_size();
        let metadata: Vec<u8> = self.pending.drain(..metadata_size as usize).collect();

        match &self.resume {
            Some(saved) => {
                if saved.metadata_size != metadata_size {
                    return Err(DeltaError::InvalidCheckpoint(format!(
                        "checkpoint metadata size {} differs from payload {}",
                        saved.metadata_size, metadata_size
                    )));
                }
                let ops = manifest.operations.get(..saved.next_operation_index).ok_or_else(|| {
                    DeltaError::InvalidCheckpoint(format!(
                        "checkpoint at operation {} beyond {} operations",
                        saved.next_operation_index,
                        manifest.operations.len()
                    ))
                })?;
                let consumed: u64 = ops.iter().map(|op| op.data_length).sum();
                if consumed != saved.buffer_offset {
                    return Err(DeltaError::InvalidCheckpoint(format!(
                        "checkpoint data offset {} does not match operation {}",
                        saved.buffer_offset, saved.next_operation_index
                    )));
                }
            }
            None => self.hasher.update(&metadata),
        }

        self.metadata_size = metadata_size;
        self.block_size = manifest.block_size as u64;
        info!(
            "Manifest parsed: {} operations writing {} blocks ({} moved), block size {}",
            manifest.operations.len(),
            manifest.destination_blocks(),
            manifest.moved_blocks(),
            manifest.block_size
        );
        debug!(
            "{} operations use {} scratch blocks",
            manifest.scratch_operations(),
            manifest.scratch_blocks
        );

        if self.resume.is_none() && self.ctx.config.verify_source_partition {
            if let Some(old) = manifest.old_partition {
                let actual = io::hash_device(self.ctx.target.as_mut(), old.size)?;
                if actual != old.hash {
                    return Err(DeltaError::PartitionHashMismatch { partition: "source" });
                }
                debug!("Source partition hash verified");
            }
        }

        self.manifest = Some(manifest);
        self.state = EngineState::ApplyingOperations;
        Ok(true)
    }

    fn check_devices(&self, manifest: &DeltaManifest) -> Result<()> {
        let block_size = manifest.block_size as u64;
        let mut required = manifest
            .required_blocks()
            .checked_mul(block_size)
            .ok_or_else(|| DeltaError::ManifestValidation("partition size overflows".to_string()))?;
        if let Some(new) = manifest.new_partition {
            required = required.max(new.size);
        }
        if let Some(old) = manifest.old_partition {
            required = required.max(old.size);
        }
        let available = self.ctx.target.size();
        if required > available {
            return Err(DeltaError::DeviceTooSmall {
                required,
                available,
            });
        }

        if manifest.scratch_blocks > 0 {
            let scratch = self
                .ctx
                .scratch
                .as_ref()
                .ok_or(DeltaError::ScratchUnavailable {
                    blocks: manifest.scratch_blocks,
                })?;
            let required = manifest
                .scratch_blocks
                .checked_mul(block_size)
                .ok_or_else(|| {
                    DeltaError::ManifestValidation("scratch size overflows".to_string())
                })?;
            if scratch.size() < required {
                return Err(DeltaError::DeviceTooSmall {
                    required,
                    available: scratch.size(),
                });
            }
        }
        Ok(())
    }

    /// Apply the next operation if its blob has arrived
    fn apply_next(&mut self) -> Result<bool> {
        let index = self.next_operation;
        let op = self.manifest_ref()?.operations[index].clone();

        let blob = if op.kind.has_data() {
            if op.data_offset != self.buffer_offset {
                return Err(DeltaError::DataOffsetMismatch {
                    index,
                    expected: op.data_offset,
                    actual: self.buffer_offset,
                });
            }
            let len = op.data_length as usize;
            if self.pending.len() < len {
                return Ok(false);
            }
            let blob: Vec<u8> = self.pending.drain(..len).collect();
            let expected = op
                .data_hash
                .ok_or(DeltaError::OperationHashMissing { index })?;
            let actual: [u8; 32] = Sha256::digest(&blob).into();
            if actual != expected {
                return Err(DeltaError::OperationHashMismatch { index });
            }
            blob
        } else {
            Vec::new()
        };

        // Operations after the last checkpoint are replayed after a crash, so
        // none of them may overwrite what an earlier one in that window read.
        if self.ops_since_checkpoint > 0
            && self.read_since_checkpoint.overlaps_any(&op.dst_extents)
        {
            debug!("Checkpoint forced before operation {}", index);
            self.checkpoint()?;
        }

        self.apply_operation(index, &op, &blob)?;

        self.read_since_checkpoint.extend(&op.src_extents);
        // Only this operation's own sources can overlap here
        let in_place = self.read_since_checkpoint.overlaps_any(&op.dst_extents);

        self.hasher.update(&blob);
        self.buffer_offset += blob.len() as u64;
        self.next_operation += 1;
        self.operations_applied += 1;
        self.ops_since_checkpoint += 1;
        self.bytes_since_checkpoint += blob.len() as u64;

        // A restart without a checkpoint re-verifies the source, which the
        // first write already changed
        let first_write = self.next_operation == 1 && self.ctx.config.verify_source_partition;

        if in_place
            || first_write
            || self.ops_since_checkpoint >= self.ctx.config.checkpoint_interval_ops
            || self.bytes_since_checkpoint >= self.ctx.config.checkpoint_interval_bytes
        {
            self.checkpoint()?;
        }

        let progress = Progress {
            operations_applied: self.next_operation,
            total_operations: self.total_operations(),
            bytes_consumed: self.buffer_offset,
        };
        if let Some(observer) = self.ctx.observer.as_mut() {
            observer.operation_applied(&progress);
        }
        Ok(true)
    }

    fn apply_operation(&mut self, index: usize, op: &Operation, blob: &[u8]) -> Result<()> {
        let dst_bytes = op.dst_blocks() * self.block_size;
        let data = match op.kind {
            OperationKind::Replace => blob.to_vec(),
            OperationKind::ReplaceCompressed => {
                let mut data = compression::decode_blob(blob, dst_bytes as usize)?;
                data.resize(dst_bytes as usize, 0);
                data
            }
            OperationKind::Move => self.read_extents(&op.src_extents)?,
            OperationKind::BinaryDiff => {
                let source = self.read_source(op)?;
                let mut data = self.ctx.codec.apply(&source, blob)?;
                if data.len() as u64 != op.dst_length {
                    return Err(DeltaError::OperationExecution {
                        index,
                        reason: format!(
                            "patch produced {} bytes, expected {}",
                            data.len(),
                            op.dst_length
                        ),
                    });
                }
                // Zero the tail of the last destination block
                data.resize(dst_bytes as usize, 0);
                data
            }
        };

        if data.len() as u64 != dst_bytes {
            return Err(DeltaError::OperationExecution {
                index,
                reason: format!(
                    "{} bytes for {} destination bytes",
                    data.len(),
                    dst_bytes
                ),
            });
        }
        self.write_extents(&op.dst_extents, &data)?;
        debug!(
            "Applied operation {} ({}): {} blocks",
            index,
            op.kind.as_str(),
            op.dst_blocks()
        );
        Ok(())
    }

    /// Source bytes of a binary diff, read through its position string
    fn read_source(&mut self, op: &Operation) -> Result<Vec<u8>> {
        let positions = extent::to_position_string(&op.src_extents, self.block_size, op.src_length);
        let ranges = extent::parse_position_string(&positions)?;

        let mut source = Vec::with_capacity(op.src_length as usize);
        for range in ranges {
            let start = source.len();
            source.resize(start + range.length as usize, 0);
            if let Some(offset) = range.offset {
                self.read_bytes(offset, &mut source[start..])?;
            }
        }
        Ok(source)
    }

    fn read_extents(&mut self, extents: &[Extent]) -> Result<Vec<u8>> {
        let mut data = vec![0u8; (extent::block_count(extents) * self.block_size) as usize];
        let mut cursor = 0usize;
        for extent in extents {
            let len = (extent.length * self.block_size) as usize;
            if !extent.is_hole() {
                self.read_bytes(extent.start * self.block_size, &mut data[cursor..cursor + len])?;
            }
            cursor += len;
        }
        Ok(data)
    }

    fn write_extents(&mut self, extents: &[Extent], data: &[u8]) -> Result<()> {
        let mut cursor = 0usize;
        for extent in extents {
            let len = (extent.length * self.block_size) as usize;
            let (device, offset) = self.device_for(extent.start * self.block_size)?;
            device.write_at(offset, &data[cursor..cursor + len])?;
            cursor += len;
        }
        Ok(())
    }

    fn read_bytes(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let (device, offset) = self.device_for(offset)?;
        device.read_at(offset, buf)
    }

    /// Map a byte address onto the target or scratch device
    fn device_for(&mut self, offset: u64) -> Result<(&mut Box<dyn BlockDevice>, u64)> {
        let scratch_base = TEMP_BLOCK_BASE * self.block_size;
        if offset < scratch_base {
            return Ok((&mut self.ctx.target, offset));
        }
        let blocks = self.manifest.as_ref().map_or(0, |m| m.scratch_blocks);
        match self.ctx.scratch.as_mut() {
            Some(scratch) => Ok((scratch, offset - scratch_base)),
            None => Err(DeltaError::ScratchUnavailable { blocks }),
        }
    }

    fn consume_signatures(&mut self) -> Result<()> {
        if self.signatures_consumed {
            return Ok(());
        }
        let (offset, size) = {
            let manifest = self.manifest_ref()?;
            (manifest.signatures_offset, manifest.signatures_size)
        };
        let Some(offset) = offset else {
            self.signatures_consumed = true;
            return Ok(());
        };
        if offset != self.buffer_offset {
            return Err(DeltaError::DataOffsetMismatch {
                index: self.total_operations(),
                expected: offset,
                actual: self.buffer_offset,
            });
        }
        if (self.pending.len() as u64) < size {
            return Ok(());
        }

        let message: Vec<u8> = self.pending.drain(..size as usize).collect();
        self.signed_hash = Some(self.hasher.finalize());
        self.hasher.update(&message);
        self.buffer_offset += size;
        self.signatures = Some(Signatures::from_bytes(&message)?);
        self.signatures_consumed = true;
        debug!("Signature message received ({} bytes)", size);
        Ok(())
    }

    fn verify(&mut self) -> Result<()> {
        let received = self.metadata_size + self.buffer_offset + self.pending.len() as u64;
        if self.next_operation < self.total_operations()
            || !self.signatures_consumed
            || !self.pending.is_empty()
        {
            return Err(DeltaError::PayloadSizeMismatch {
                expected: self.plan.payload_size,
                actual: received,
            });
        }

        self.state = EngineState::Verifying;
        info!("Verifying payload");

        if received != self.plan.payload_size {
            return Err(DeltaError::PayloadSizeMismatch {
                expected: self.plan.payload_size,
                actual: received,
            });
        }
        if self.hasher.finalize() != self.plan.payload_hash {
            return Err(DeltaError::PayloadHashMismatch);
        }

        match (self.public_key, self.signatures.as_ref()) {
            (Some(key), Some(signatures)) => {
                let signed_hash = self.signed_hash.ok_or(DeltaError::SignatureMissing)?;
                signature::verify_signatures(
                    self.ctx.verifier.as_ref(),
                    &key,
                    &signed_hash,
                    signatures,
                )?;
                debug!("Payload signature verified");
            }
            (Some(_), None) => return Err(DeltaError::SignatureMissing),
            (None, Some(_)) => warn!("Payload is signed but no public key is configured"),
            (None, None) => {}
        }

        let new_partition = self.manifest_ref()?.new_partition;
        if self.ctx.config.verify_target_partition {
            if let Some(new) = new_partition {
                let actual = io::hash_device(self.ctx.target.as_mut(), new.size)?;
                if actual != new.hash {
                    return Err(DeltaError::PartitionHashMismatch { partition: "target" });
                }
                debug!("Target partition hash verified");
            }
        }
        Ok(())
    }

    /// Persist progress after making applied operations durable
    fn checkpoint(&mut self) -> Result<()> {
        self.ctx.target.sync()?;
        if let Some(scratch) = self.ctx.scratch.as_mut() {
            scratch.sync()?;
        }
        Checkpoint {
            next_operation_index: self.next_operation,
            buffer_offset: self.buffer_offset,
            hash_state: self.hasher.state().clone(),
            metadata_size: self.metadata_size,
            resume_count: self.resume_count,
        }
        .save(self.ctx.prefs.as_ref())?;
        self.ops_since_checkpoint = 0;
        self.bytes_since_checkpoint = 0;
        self.read_since_checkpoint.clear();
        Ok(())
    }

    /// Record the failure and leave a checkpoint at the last committed
    /// operation where one makes sense
    fn fail(&mut self, err: DeltaError) -> DeltaError {
        let previous = self.state;
        self.state = EngineState::Failed;
        self.error = Some(err.code());

        match &err {
            DeltaError::Cancelled { .. } => {
                info!("Update cancelled at operation {}", self.next_operation)
            }
            _ => error!("Update failed in {}: {}", previous.as_str(), err),
        }

        let outcome = match (&err, previous) {
            (DeltaError::InvalidCheckpoint(_), _) | (_, EngineState::Verifying) => {
                checkpoint::clear(self.ctx.prefs.as_ref())
            }
            (_, EngineState::ApplyingOperations) if self.next_operation > 0 => self.checkpoint(),
            _ => Ok(()),
        };
        if let Err(e) = outcome {
            warn!("Could not record progress after failure: {}", e);
        }
        err
    }
}
