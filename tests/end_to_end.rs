//! Generate-then-apply tests over whole images

mod common;

use ab_delta::{
    BlockDevice, DeltaGenerator, DeltaManifest, EngineState, Extent, FileBlockDevice, FilePrefs,
    GeneratorConfig, MemoryBlockDevice, MemoryPrefs, Operation, OperationKind, PatchCodec,
    PatchEngine, PayloadWriter, Progress, ProgressObserver, XorDeltaCodec, TEMP_BLOCK_BASE,
};
use common::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn apply_all(old: &[u8], new: &[u8], chunk: usize) -> MemoryBlockDevice {
    let generated = generate(old, new);
    let target = target_for(old, new);
    let prefs = MemoryPrefs::new();

    let ctx = context(&target, &prefs, &generated);
    let mut engine = PatchEngine::new(ctx, plan(&generated.payload)).unwrap();
    for piece in generated.payload.bytes.chunks(chunk) {
        engine.write(piece).unwrap();
    }
    engine.finish().unwrap();
    assert_eq!(engine.state(), EngineState::Done);
    assert!(prefs.is_empty());
    target
}

#[test]
fn test_two_block_swap() {
    let old = image(&[0xaa, 0xbb]);
    let new = image(&[0xbb, 0xaa]);

    let generated = generate(&old, &new);
    let ops = &generated.manifest().operations;
    assert_eq!(ops.len(), 3);
    assert_eq!(ops[0].dst_extents, vec![Extent::new(TEMP_BLOCK_BASE, 1)]);
    assert_eq!(generated.manifest().scratch_blocks, 1);

    let target = apply_all(&old, &new, 4096);
    assert_eq!(target.contents(), new);
}

#[test]
fn test_three_block_rotation() {
    let old = image(&[1, 2, 3]);
    let new = image(&[3, 1, 2]);
    let target = apply_all(&old, &new, 100);
    assert_eq!(target.contents(), new);
}

#[test]
fn test_mixed_changes() {
    let old = image(&[1, 2, 3, 4, 5, 6, 7, 8]);
    // Moves, a rotation, unchanged blocks and new content
    let new = image(&[2, 3, 1, 4, 9, 9, 8, 10]);
    let target = apply_all(&old, &new, 333);
    assert_eq!(target.contents(), new);
}

#[test]
fn test_growing_and_shrinking_images() {
    let old = image(&[1, 2, 3]);
    let new = image(&[3, 1, 2, 4, 5]);
    let target = apply_all(&old, &new, 512);
    assert_eq!(target.contents(), new);

    let old = image(&[1, 2, 3, 4, 5]);
    let new = image(&[5, 4]);
    let target = apply_all(&old, &new, 512);
    assert_eq!(device_image(&target, new.len()), new);
}

#[test]
fn test_unaligned_image_tail() {
    let old: Vec<u8> = (0..3 * BS + 100).map(|i| (i % 7) as u8).collect();
    let mut new = old.clone();
    new.truncate(2 * BS + 37);
    new[BS + 3] = 0xee;
    let target = apply_all(&old, &new, 1000);
    assert_eq!(device_image(&target, new.len()), new);
}

#[test]
fn test_random_images_with_default_codecs() {
    for seed in 0..8u64 {
        let old = random_image(seed, 48, 6);
        let new = evolve(&old, seed + 100);

        let generated = ab_delta::DeltaGenerator::new(ab_delta::GeneratorConfig {
            block_size: BS as u32,
            chunk_blocks: 8,
            ..Default::default()
        })
        .unwrap()
        .generate(&old, &new, None)
        .unwrap();

        let target = target_for(&old, &new);
        let prefs = MemoryPrefs::new();
        let ctx = context(&target, &prefs, &generated);
        let mut engine = PatchEngine::new(ctx, plan(&generated.payload)).unwrap();
        engine.write(&generated.payload.bytes).unwrap();
        engine.finish().unwrap();
        assert_eq!(target.contents(), new, "seed {}", seed);
    }
}

fn apply_manifest(device: &MemoryBlockDevice, ops: Vec<Operation>) {
    let manifest = DeltaManifest::new(BS as u32, ops);
    let payload = PayloadWriter::new(manifest, Vec::new())
        .unwrap()
        .finish(None)
        .unwrap();
    let ctx = ab_delta::EngineContext::new(Box::new(device.clone()), Box::new(MemoryPrefs::new()));
    let mut engine = PatchEngine::new(ctx, plan(&payload)).unwrap();
    engine.write(&payload.bytes).unwrap();
    engine.finish().unwrap();
}

#[test]
fn test_overlapping_move_forward() {
    let device = MemoryBlockDevice::from_bytes(image(&[1, 2, 3, 4, 0, 0]));
    apply_manifest(
        &device,
        vec![Operation::moved(vec![Extent::new(0, 4)], vec![Extent::new(2, 4)])],
    );
    assert_eq!(device.contents(), image(&[1, 2, 1, 2, 3, 4]));
}

#[test]
fn test_overlapping_move_backward() {
    let device = MemoryBlockDevice::from_bytes(image(&[0, 0, 1, 2, 3, 4]));
    apply_manifest(
        &device,
        vec![Operation::moved(vec![Extent::new(2, 4)], vec![Extent::new(0, 4)])],
    );
    assert_eq!(device.contents(), image(&[1, 2, 3, 4, 3, 4]));
}

#[test]
fn test_identical_move() {
    let device = MemoryBlockDevice::from_bytes(image(&[5, 6, 7]));
    apply_manifest(
        &device,
        vec![Operation::moved(vec![Extent::new(1, 2)], vec![Extent::new(1, 2)])],
    );
    assert_eq!(device.contents(), image(&[5, 6, 7]));
}

#[test]
fn test_fragmented_move() {
    let device = MemoryBlockDevice::from_bytes(image(&[1, 2, 3, 4, 5, 6]));
    apply_manifest(
        &device,
        vec![Operation::moved(
            vec![Extent::new(4, 1), Extent::new(0, 2)],
            vec![Extent::new(1, 1), Extent::new(5, 1), Extent::new(3, 1)],
        )],
    );
    assert_eq!(device.contents(), image(&[1, 5, 3, 2, 5, 1]));
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<Progress>>>);

impl ProgressObserver for Recorder {
    fn operation_applied(&mut self, progress: &Progress) {
        self.0.lock().unwrap().push(*progress);
    }
}

#[test]
fn test_progress_reported_per_operation() {
    let old = image(&[1, 2, 3]);
    let new = image(&[3, 9, 1]);
    let generated = generate(&old, &new);
    let total = generated.manifest().operations.len();

    let target = target_for(&old, &new);
    let prefs = MemoryPrefs::new();
    let recorder = Recorder::default();
    let ctx = context(&target, &prefs, &generated).with_observer(Box::new(recorder.clone()));
    let mut engine = PatchEngine::new(ctx, plan(&generated.payload)).unwrap();
    engine.write(&generated.payload.bytes).unwrap();
    engine.finish().unwrap();

    let seen = recorder.0.lock().unwrap();
    assert_eq!(seen.len(), total);
    assert!(seen
        .iter()
        .enumerate()
        .all(|(i, p)| p.operations_applied == i + 1 && p.total_operations == total));
    assert_eq!(seen.last().unwrap().bytes_consumed, generated.report.data_bytes);
    assert_eq!(engine.report().operations_applied, total);
}

#[test]
fn test_file_backed_update() {
    let dir = tempfile::tempdir().unwrap();
    let old = image(&[1, 2, 3, 4]);
    let new = image(&[4, 3, 2, 1]);
    let generated = generate(&old, &new);
    assert!(generated
        .manifest()
        .operations
        .iter()
        .any(|op| op.kind == OperationKind::Move && op.uses_scratch()));

    let mut target =
        FileBlockDevice::create(dir.path().join("system_b.img"), old.len() as u64).unwrap();
    target.write_at(0, &old).unwrap();
    let scratch_size = generated.manifest().scratch_blocks * BS as u64;
    let scratch = FileBlockDevice::create(dir.path().join("scratch.img"), scratch_size).unwrap();
    let prefs = FilePrefs::open(dir.path().join("prefs")).unwrap();

    let ctx = ab_delta::EngineContext::new(Box::new(target), Box::new(prefs))
        .with_scratch(Box::new(scratch));
    let mut engine = PatchEngine::new(ctx, plan(&generated.payload)).unwrap();
    engine.write(&generated.payload.bytes).unwrap();
    engine.finish().unwrap();
    drop(engine);

    let written = std::fs::read(dir.path().join("system_b.img")).unwrap();
    assert_eq!(written, new);
}

/// XOR codec that counts how often each side runs
#[derive(Clone, Default)]
struct CountingCodec {
    diffs: Arc<AtomicUsize>,
    applies: Arc<AtomicUsize>,
}

impl PatchCodec for CountingCodec {
    fn diff(&self, old: &[u8], new: &[u8]) -> ab_delta::Result<Vec<u8>> {
        self.diffs.fetch_add(1, Ordering::SeqCst);
        XorDeltaCodec.diff(old, new)
    }

    fn apply(&self, old: &[u8], patch: &[u8]) -> ab_delta::Result<Vec<u8>> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        XorDeltaCodec.apply(old, patch)
    }
}

#[test]
fn test_custom_patch_codec() {
    let old = image(&[1, 2, 3]);
    let mut new = old.clone();
    new[BS + 7] = 0xee;

    let codec = CountingCodec::default();
    let config = GeneratorConfig {
        enable_binary_diff: true,
        ..GeneratorConfig::for_testing(BS as u32)
    };
    let generated = DeltaGenerator::new(config)
        .unwrap()
        .with_codec(Box::new(codec.clone()))
        .generate(&old, &new, None)
        .unwrap();
    assert_eq!(generated.report.diff_ops, 1);
    assert!(codec.diffs.load(Ordering::SeqCst) >= 1);

    let target = target_for(&old, &new);
    let prefs = MemoryPrefs::new();
    let ctx = context(&target, &prefs, &generated).with_codec(Box::new(codec.clone()));
    let mut engine = PatchEngine::new(ctx, plan(&generated.payload)).unwrap();
    engine.write(&generated.payload.bytes).unwrap();
    engine.finish().unwrap();

    assert_eq!(codec.applies.load(Ordering::SeqCst), 1);
    assert_eq!(target.contents(), new);
}
