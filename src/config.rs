//! Generator and engine configuration
//!
//! Both structs load from TOML; missing fields take their defaults.
//!
//! ```toml
//! [generator]
//! block_size = 4096
//! compression = "zstd"
//! cut_policy = "heaviest_edge"
//!
//! [engine]
//! checkpoint_interval_ops = 8
//! verify_source_partition = true
//! ```

use crate::compression::CompressionMethod;
use crate::error::{DeltaError, Result};
use crate::graph::CutPolicy;
use crate::manifest::valid_block_size;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Payload generation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Block size in bytes (power of two, 512 bytes to 1 MiB)
    pub block_size: u32,

    /// Longest run of blocks a single operation covers
    pub chunk_blocks: u64,

    /// Codec for `REPLACE_COMPRESSED` blobs
    pub compression: CompressionMethod,

    /// Try binary patches against the old block before falling back to
    /// full replacement
    pub enable_binary_diff: bool,

    /// Scratch blocks the cycle breaker may allocate
    pub max_scratch_blocks: u64,

    pub cut_policy: CutPolicy,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            block_size: 4096,
            chunk_blocks: 256,
            compression: CompressionMethod::Zstd,
            enable_binary_diff: true,
            max_scratch_blocks: 1 << 20,
            cut_policy: CutPolicy::HeaviestEdge,
        }
    }
}

impl GeneratorConfig {
    /// Small blocks and no compression, for tests and tiny images
    pub fn for_testing(block_size: u32) -> Self {
        GeneratorConfig {
            block_size,
            compression: CompressionMethod::None,
            enable_binary_diff: false,
            ..GeneratorConfig::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !valid_block_size(self.block_size) {
            return Err(DeltaError::InvalidBlockSize(self.block_size));
        }
        if self.chunk_blocks == 0 {
            return Err(DeltaError::Config("chunk_blocks must be positive".into()));
        }
        Ok(())
    }
}

/// Patch application settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Checkpoint after this many operations. The engine checkpoints
    /// earlier whenever replaying the pending operations would read blocks
    /// they have since overwritten.
    pub checkpoint_interval_ops: u64,

    /// Checkpoint after this many data bytes, whichever comes first
    pub checkpoint_interval_bytes: u64,

    /// Resumes from one checkpoint before it is discarded
    pub max_resume_failures: u32,

    /// Hash the source partition before the first operation of a fresh
    /// attempt
    pub verify_source_partition: bool,

    /// Hash the target partition after the last operation
    pub verify_target_partition: bool,

    /// Reject payloads built for a different block size
    pub expected_block_size: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            checkpoint_interval_ops: 1,
            checkpoint_interval_bytes: 1024 * 1024,
            max_resume_failures: 10,
            verify_source_partition: false,
            verify_target_partition: true,
            expected_block_size: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.checkpoint_interval_ops == 0 || self.checkpoint_interval_bytes == 0 {
            return Err(DeltaError::Config(
                "checkpoint intervals must be positive".into(),
            ));
        }
        if let Some(block_size) = self.expected_block_size {
            if !valid_block_size(block_size) {
                return Err(DeltaError::InvalidBlockSize(block_size));
            }
        }
        Ok(())
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaConfig {
    pub generator: GeneratorConfig,
    pub engine: EngineConfig,
}

impl DeltaConfig {
    /// Parse and validate TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: DeltaConfig = toml::from_str(text)?;
        config.generator.validate()?;
        config.engine.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }
}
