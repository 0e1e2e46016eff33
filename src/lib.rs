//! # ab-delta - Block-Level A/B Image Updates
//!
//! `ab-delta` turns a pair of partition images into a delta payload and
//! applies that payload in place on a device, one operation at a time, with
//! checkpoints that let an interrupted update resume where it stopped.
//!
//! - **Generation**: block diffing into `MOVE`, `REPLACE`,
//!   `REPLACE_COMPRESSED` and `BINARY_DIFF` operations
//! - **Ordering**: a dependency graph over block hazards, Tarjan cycle
//!   detection, and cycle breaking through scratch blocks
//! - **Application**: a streaming state machine that verifies every blob,
//!   the whole payload, its signature and the resulting partition
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ab_delta::{
//!     DeltaGenerator, EngineContext, GeneratorConfig, InstallPlan, MemoryBlockDevice,
//!     MemoryPrefs, PatchEngine, Result,
//! };
//!
//! # fn main() -> Result<()> {
//! let old = vec![1u8; 8192];
//! let mut new = old.clone();
//! new[..4096].fill(2);
//!
//! let generated = DeltaGenerator::new(GeneratorConfig::default())?.generate(&old, &new, None)?;
//! let payload = &generated.payload;
//!
//! let device = MemoryBlockDevice::from_bytes(old);
//! let ctx = EngineContext::new(Box::new(device.clone()), Box::new(MemoryPrefs::new()));
//! let plan = InstallPlan {
//!     payload_size: payload.size(),
//!     payload_hash: payload.hash,
//!     payload_identity: hex::encode(payload.hash),
//!     public_key_path: None,
//!     flags: Default::default(),
//! };
//!
//! let mut engine = PatchEngine::new(ctx, plan)?;
//! for chunk in payload.bytes.chunks(1024) {
//!     engine.write(chunk)?;
//! }
//! engine.finish()?;
//! assert_eq!(device.contents(), new);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod compression;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod extent;
pub mod generator;
pub mod graph;
pub mod hash;
pub mod header;
pub mod io;
pub mod manifest;
pub mod operation;
pub mod payload;
pub mod prefs;
pub mod scratch;
pub mod signature;

pub use checkpoint::{can_resume_update, payload_identity, Checkpoint};
pub use compression::CompressionMethod;
pub use config::{DeltaConfig, EngineConfig, GeneratorConfig};
pub use diff::{PatchCodec, XorDeltaCodec};
pub use engine::{
    AttemptReport, CancelHandle, EngineContext, EngineState, InstallPlan, PatchEngine, Progress,
    ProgressObserver,
};
pub use error::{ContextFlags, DeltaError, ErrorCategory, ErrorCode, Result};
pub use extent::{Extent, SPARSE_HOLE, TEMP_BLOCK_BASE};
pub use generator::{DeltaGenerator, GeneratedPayload, GenerationReport};
pub use graph::{CutPolicy, CycleBreakStats, CycleBreaker, Graph};
pub use io::{BlockDevice, FileBlockDevice, MemoryBlockDevice};
pub use manifest::{DeltaManifest, PartitionInfo};
pub use operation::{Operation, OperationKind};
pub use payload::{Payload, PayloadWriter};
pub use prefs::{FilePrefs, MemoryPrefs, PrefsStore};
pub use signature::{Ed25519Verifier, PayloadSigner, SignatureVerifier};
