//! Shared helpers for the integration tests

#![allow(dead_code)]

use ab_delta::{
    CancelHandle, ContextFlags, DeltaGenerator, EngineContext, GeneratedPayload, GeneratorConfig,
    InstallPlan, MemoryBlockDevice, MemoryPrefs, Payload, Progress, ProgressObserver,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const BS: usize = 512;

/// Image made of one fill byte per block
pub fn image(blocks: &[u8]) -> Vec<u8> {
    blocks.iter().flat_map(|&fill| vec![fill; BS]).collect()
}

/// Image of `blocks` random blocks drawn from `alphabet` distinct contents
pub fn random_image(seed: u64, blocks: usize, alphabet: u8) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(blocks * BS);
    for _ in 0..blocks {
        let fill: u8 = rng.gen_range(0..alphabet);
        let mut block = vec![fill; BS];
        // A unique tail byte keeps some blocks from matching anything
        if rng.gen_bool(0.3) {
            block[BS - 1] = rng.gen();
        }
        out.extend(block);
    }
    out
}

/// Shuffle and lightly mutate an image, keeping most content movable
pub fn evolve(old: &[u8], seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut blocks: Vec<Vec<u8>> = old.chunks(BS).map(|c| c.to_vec()).collect();
    for i in (1..blocks.len()).rev() {
        if rng.gen_bool(0.5) {
            let j = rng.gen_range(0..=i);
            blocks.swap(i, j);
        }
    }
    for block in blocks.iter_mut() {
        if rng.gen_bool(0.2) {
            let at = rng.gen_range(0..BS);
            block[at] = block[at].wrapping_add(1);
        }
    }
    blocks.concat()
}

pub fn generate(old: &[u8], new: &[u8]) -> GeneratedPayload {
    DeltaGenerator::new(GeneratorConfig::for_testing(BS as u32))
        .unwrap()
        .generate(old, new, None)
        .unwrap()
}

pub fn plan(payload: &Payload) -> InstallPlan {
    InstallPlan {
        payload_size: payload.size(),
        payload_hash: payload.hash,
        payload_identity: hex::encode(payload.hash),
        public_key_path: None,
        flags: ContextFlags::default(),
    }
}

/// Target device holding `old`, large enough for both images
pub fn target_for(old: &[u8], new: &[u8]) -> MemoryBlockDevice {
    let size = old.len().max(new.len()).div_ceil(BS) * BS;
    let mut bytes = old.to_vec();
    bytes.resize(size, 0);
    MemoryBlockDevice::from_bytes(bytes)
}

pub fn scratch_for(generated: &GeneratedPayload) -> MemoryBlockDevice {
    MemoryBlockDevice::new(generated.manifest().scratch_blocks as usize * BS)
}

/// Context over a fresh scratch device
pub fn context(
    target: &MemoryBlockDevice,
    prefs: &MemoryPrefs,
    generated: &GeneratedPayload,
) -> EngineContext {
    context_with(target, &scratch_for(generated), prefs)
}

/// Context whose devices and store outlive the engine
pub fn context_with(
    target: &MemoryBlockDevice,
    scratch: &MemoryBlockDevice,
    prefs: &MemoryPrefs,
) -> EngineContext {
    EngineContext::new(Box::new(target.clone()), Box::new(prefs.clone()))
        .with_scratch(Box::new(scratch.clone()))
}

/// Strip trailing padding before comparing with an image
pub fn device_image(device: &MemoryBlockDevice, len: usize) -> Vec<u8> {
    device.contents()[..len].to_vec()
}

/// Cancels the update once a given number of operations has committed
pub struct CancelAfter {
    pub operations: usize,
    pub cancel: CancelHandle,
}

impl ProgressObserver for CancelAfter {
    fn operation_applied(&mut self, progress: &Progress) {
        if progress.operations_applied == self.operations {
            self.cancel.cancel();
        }
    }
}
