//! Interrupted updates and checkpoint resume

mod common;

use ab_delta::checkpoint::{self, KEY_CHECKPOINT, KEY_PAYLOAD_IDENTITY};
use ab_delta::{
    can_resume_update, CancelHandle, Checkpoint, DeltaError, EngineConfig, EngineContext,
    EngineState, ErrorCode, FileBlockDevice, FilePrefs, GeneratedPayload, MemoryBlockDevice,
    MemoryPrefs, PatchEngine, PrefsStore,
};
use common::*;

/// Devices and store shared by successive attempts
struct Rig {
    target: MemoryBlockDevice,
    scratch: MemoryBlockDevice,
    prefs: MemoryPrefs,
}

impl Rig {
    fn new(old: &[u8], new: &[u8], generated: &GeneratedPayload) -> Self {
        Rig {
            target: target_for(old, new),
            scratch: scratch_for(generated),
            prefs: MemoryPrefs::new(),
        }
    }

    fn context(&self) -> EngineContext {
        context_with(&self.target, &self.scratch, &self.prefs)
    }
}

/// Run until `k` operations have committed, then cancel
fn interrupt_after(rig: &Rig, generated: &GeneratedPayload, k: usize) {
    let cancel = CancelHandle::new();
    let ctx = rig
        .context()
        .with_cancel(cancel.clone())
        .with_observer(Box::new(CancelAfter {
            operations: k,
            cancel,
        }));
    let mut engine = PatchEngine::new(ctx, plan(&generated.payload)).unwrap();
    let err = engine.write(&generated.payload.bytes).unwrap_err();
    assert!(matches!(err, DeltaError::Cancelled { next_operation } if next_operation == k));
    let report = engine.report();
    assert_eq!(report.state, EngineState::Failed);
    assert_eq!(report.error, Some(ErrorCode::Cancelled));
}

/// Feed the metadata and the rest of the payload from the resume offset
fn resume(engine: &mut PatchEngine, generated: &GeneratedPayload) {
    let bytes = &generated.payload.bytes;
    let metadata = generated.payload.metadata_size as usize;
    engine.write(&bytes[..metadata]).unwrap();
    engine.write(&bytes[engine.resume_offset() as usize..]).unwrap();
    engine.finish().unwrap();
}

#[test]
fn test_resume_at_every_operation_boundary() {
    let old = image(&[1, 2, 3, 4, 5, 6]);
    let new = image(&[2, 1, 7, 6, 4, 8]);
    let generated = generate(&old, &new);
    let total = generated.manifest().operations.len();
    assert!(total >= 4);

    for k in 1..=total {
        let rig = Rig::new(&old, &new, &generated);
        interrupt_after(&rig, &generated, k);

        let saved = Checkpoint::load(&rig.prefs).unwrap().unwrap();
        assert_eq!(saved.next_operation_index, k);

        let mut engine = PatchEngine::new(rig.context(), plan(&generated.payload)).unwrap();
        assert!(engine.is_resumed());
        assert!(engine.flags().resumed);
        assert_eq!(engine.resume_offset(), saved.resume_offset());

        resume(&mut engine, &generated);
        assert_eq!(engine.state(), EngineState::Done);
        assert_eq!(engine.report().operations_applied, total - k);
        assert_eq!(rig.target.contents(), new, "interrupted after {} operations", k);
        assert!(rig.prefs.is_empty());
    }
}

#[test]
fn test_resume_after_crash_mid_blob() {
    let old = image(&[1, 2, 3, 4]);
    let new = image(&[9, 2, 8, 4]);
    let generated = generate(&old, &new);
    let bytes = &generated.payload.bytes;

    let rig = Rig::new(&old, &new, &generated);
    {
        let mut engine = PatchEngine::new(rig.context(), plan(&generated.payload)).unwrap();
        // Stop half way through the second blob, as if power were lost
        let cut = generated.payload.metadata_size as usize + BS + BS / 2;
        engine.write(&bytes[..cut]).unwrap();
        assert_eq!(engine.next_operation(), 1);
    }

    assert!(can_resume_update(&rig.prefs, &hex::encode(generated.payload.hash), 10).unwrap());
    let mut engine = PatchEngine::new(rig.context(), plan(&generated.payload)).unwrap();
    assert_eq!(engine.resume_offset(), generated.payload.metadata_size + BS as u64);
    resume(&mut engine, &generated);
    assert_eq!(rig.target.contents(), new);
}

#[test]
fn test_resume_count_is_bounded() {
    let old = image(&[1, 2, 3]);
    let new = image(&[3, 2, 1]);
    let generated = generate(&old, &new);
    let identity = hex::encode(generated.payload.hash);
    let config = EngineConfig {
        max_resume_failures: 2,
        ..EngineConfig::default()
    };

    let rig = Rig::new(&old, &new, &generated);
    interrupt_after(&rig, &generated, 1);

    // Two attempts that resume and then die before applying anything
    for attempt in 1..=2 {
        let ctx = rig.context().with_config(config.clone());
        let engine = PatchEngine::new(ctx, plan(&generated.payload)).unwrap();
        assert!(engine.is_resumed());
        assert_eq!(Checkpoint::load(&rig.prefs).unwrap().unwrap().resume_count, attempt);
    }

    assert!(!can_resume_update(&rig.prefs, &identity, 2).unwrap());
    let ctx = rig.context().with_config(config);
    let engine = PatchEngine::new(ctx, plan(&generated.payload)).unwrap();
    assert!(!engine.is_resumed());
    assert!(Checkpoint::load(&rig.prefs).unwrap().is_none());
}

#[test]
fn test_other_payload_starts_fresh() {
    let old = image(&[1, 2, 3]);
    let new = image(&[3, 2, 1]);
    let generated = generate(&old, &new);
    let rig = Rig::new(&old, &new, &generated);
    interrupt_after(&rig, &generated, 1);

    let mut other_plan = plan(&generated.payload);
    other_plan.payload_identity = "a-different-payload".to_string();
    let engine = PatchEngine::new(rig.context(), other_plan).unwrap();
    assert!(!engine.is_resumed());
    assert_eq!(engine.resume_offset(), 0);
    assert!(Checkpoint::load(&rig.prefs).unwrap().is_none());
    assert_eq!(
        rig.prefs.get_string(KEY_PAYLOAD_IDENTITY).unwrap().as_deref(),
        Some("a-different-payload")
    );
}

#[test]
fn test_inconsistent_checkpoint_is_discarded() {
    let old = image(&[1, 2, 3]);
    let new = image(&[3, 2, 1]);
    let generated = generate(&old, &new);
    let rig = Rig::new(&old, &new, &generated);
    interrupt_after(&rig, &generated, 1);

    let mut saved = Checkpoint::load(&rig.prefs).unwrap().unwrap();
    saved.metadata_size += 1;
    saved.save(&rig.prefs).unwrap();

    let mut engine = PatchEngine::new(rig.context(), plan(&generated.payload)).unwrap();
    let metadata = generated.payload.metadata_size as usize;
    assert!(matches!(
        engine.write(&generated.payload.bytes[..metadata]),
        Err(DeltaError::InvalidCheckpoint(_))
    ));
    assert!(rig.prefs.get_string(KEY_CHECKPOINT).unwrap().is_none());
}

#[test]
fn test_checkpoint_interval() {
    let old = image(&[1, 2, 3, 4, 5, 6]);
    let new = image(&[7, 8, 9, 10, 11, 12]);
    let mut config = ab_delta::GeneratorConfig::for_testing(BS as u32);
    config.chunk_blocks = 1;
    let generated = ab_delta::DeltaGenerator::new(config)
        .unwrap()
        .generate(&old, &new, None)
        .unwrap();

    let target = target_for(&old, &new);
    let prefs = MemoryPrefs::new();
    let ctx = context(&target, &prefs, &generated).with_config(EngineConfig {
        checkpoint_interval_ops: 4,
        ..EngineConfig::default()
    });
    let mut engine = PatchEngine::new(ctx, plan(&generated.payload)).unwrap();
    let metadata = generated.payload.metadata_size as usize;
    engine
        .write(&generated.payload.bytes[..metadata + 5 * BS])
        .unwrap();
    assert_eq!(engine.next_operation(), 5);
    assert_eq!(Checkpoint::load(&prefs).unwrap().unwrap().next_operation_index, 4);
}

#[test]
fn test_resume_across_restart_with_files() {
    let dir = tempfile::tempdir().unwrap();
    let old = image(&[1, 2, 3, 4]);
    let new = image(&[4, 3, 2, 1]);
    let generated = generate(&old, &new);
    let scratch_size = generated.manifest().scratch_blocks * BS as u64;
    let target_path = dir.path().join("system_b.img");
    let scratch_path = dir.path().join("scratch.img");
    let prefs_path = dir.path().join("prefs");

    std::fs::write(&target_path, &old).unwrap();
    FileBlockDevice::create(&scratch_path, scratch_size).unwrap();

    let open = || {
        EngineContext::new(
            Box::new(FileBlockDevice::open(&target_path).unwrap()),
            Box::new(FilePrefs::open(&prefs_path).unwrap()),
        )
        .with_scratch(Box::new(FileBlockDevice::open(&scratch_path).unwrap()))
    };

    {
        let cancel = CancelHandle::new();
        let ctx = open().with_cancel(cancel.clone()).with_observer(Box::new(CancelAfter {
            operations: 2,
            cancel,
        }));
        let mut engine = PatchEngine::new(ctx, plan(&generated.payload)).unwrap();
        assert!(engine.write(&generated.payload.bytes).is_err());
    }

    let prefs = FilePrefs::open(&prefs_path).unwrap();
    let identity = hex::encode(generated.payload.hash);
    assert!(can_resume_update(&prefs, &identity, 10).unwrap());

    let mut engine = PatchEngine::new(open(), plan(&generated.payload)).unwrap();
    assert!(engine.is_resumed());
    resume(&mut engine, &generated);
    drop(engine);

    assert_eq!(std::fs::read(&target_path).unwrap(), new);
    assert!(!can_resume_update(&prefs, &identity, 10).unwrap());
    assert!(checkpoint::Checkpoint::load(&prefs).unwrap().is_none());
}

/// Drop the engine at `cut` bytes without cancelling, then recover with a
/// second engine that uses the same sparse checkpoint cadence
fn crash_and_recover(old: &[u8], new: &[u8], generated: &GeneratedPayload, cut: usize) {
    let config = EngineConfig {
        checkpoint_interval_ops: 8,
        ..EngineConfig::default()
    };
    let rig = Rig::new(old, new, generated);

    let mut engine =
        PatchEngine::new(rig.context().with_config(config.clone()), plan(&generated.payload))
            .unwrap();
    engine.write(&generated.payload.bytes[..cut]).unwrap();
    drop(engine);

    let mut engine =
        PatchEngine::new(rig.context().with_config(config), plan(&generated.payload)).unwrap();
    if engine.is_resumed() {
        resume(&mut engine, generated);
    } else {
        engine.write(&generated.payload.bytes).unwrap();
        engine.finish().unwrap();
    }
    assert_eq!(device_image(&rig.target, new.len()), new, "cut at {}", cut);
}

#[test]
fn test_crash_after_in_place_move() {
    let old = image(&[1, 2, 3]);
    let new = image(&[2, 3, 9]);
    let generated = generate(&old, &new);
    let metadata = generated.payload.metadata_size as usize;
    for cut in metadata..=generated.payload.bytes.len() {
        crash_and_recover(&old, &new, &generated, cut);
    }
}

#[test]
fn test_crash_anywhere_with_sparse_checkpoints() {
    for seed in 0..4 {
        let old = random_image(seed, 24, 6);
        let new = evolve(&old, seed + 100);
        let generated = generate(&old, &new);
        let len = generated.payload.bytes.len();
        let metadata = generated.payload.metadata_size as usize;
        for cut in (metadata..len).step_by(BS / 4).chain([len]) {
            crash_and_recover(&old, &new, &generated, cut);
        }
    }
}
