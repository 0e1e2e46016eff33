//! Error types for delta generation and patch application
//!
//! `DeltaError` carries the detail of a failure. `ErrorCode` is the flat,
//! stable kind that callers log and persist, and `ContextFlags` travels next
//! to it instead of being packed into the code.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeltaError {
    #[error("Block {block} is written by both operation {first} and operation {second}")]
    DoubleWriter {
        block: u64,
        first: usize,
        second: usize,
    },

    #[error("Block {block} is outside the partition ({total_blocks} blocks)")]
    BlockOutOfRange { block: u64, total_blocks: u64 },

    #[error("Invalid extent: {0}")]
    InvalidExtent(String),

    #[error("Extent length mismatch: expected {expected} blocks, got {actual}")]
    ExtentLengthMismatch { expected: u64, actual: u64 },

    #[error("Residual cycle: {remaining} vertices could not be ordered")]
    ResidualCycle { remaining: usize },

    #[error("Cycle through vertex {vertex} has no cuttable read-before edge")]
    UncuttableCycle { vertex: usize },

    #[error("Insufficient scratch space: requested {requested} blocks, {available} available")]
    InsufficientScratch { requested: u64, available: u64 },

    #[error("Invalid magic number in payload header")]
    InvalidMagic,

    #[error("Unsupported payload format version: {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("Invalid block size: {0}")]
    InvalidBlockSize(u32),

    #[error("Manifest too large: {size} bytes (limit {limit})")]
    ManifestTooLarge { size: u64, limit: u64 },

    #[error("Manifest checksum verification failed")]
    ManifestChecksumMismatch,

    #[error("Manifest validation failed: {0}")]
    ManifestValidation(String),

    #[error("Operation {index} expects data at offset {expected}, stream is at {actual}")]
    DataOffsetMismatch {
        index: usize,
        expected: u64,
        actual: u64,
    },

    #[error("Operation {index} data hash mismatch")]
    OperationHashMismatch { index: usize },

    #[error("Operation {index} carries data but no hash")]
    OperationHashMissing { index: usize },

    #[error("Operation {index} failed: {reason}")]
    OperationExecution { index: usize, reason: String },

    #[error("Invalid position string: {0}")]
    PositionString(String),

    #[error("Decompression failed: {0}")]
    Decompression(String),

    #[error("Compression failed: {0}")]
    Compression(String),

    #[error("Binary patch failed: {0}")]
    Patch(String),

    #[error("Payload size mismatch: expected {expected} bytes, received {actual}")]
    PayloadSizeMismatch { expected: u64, actual: u64 },

    #[error("Payload hash mismatch")]
    PayloadHashMismatch,

    #[error("Payload is signed but no signature verified against the public key")]
    SignatureMismatch,

    #[error("A public key was supplied but the payload carries no signature")]
    SignatureMissing,

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("{partition} partition hash mismatch")]
    PartitionHashMismatch { partition: &'static str },

    #[error("Scratch device required for {blocks} temp blocks")]
    ScratchUnavailable { blocks: u64 },

    #[error("Device too small: need {required} bytes, device has {available}")]
    DeviceTooSmall { required: u64, available: u64 },

    #[error("Checkpoint store error: {0}")]
    Prefs(String),

    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    #[error("Invalid engine state: expected {expected}, engine is {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Update cancelled at operation boundary {next_operation}")]
    Cancelled { next_operation: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Manifest encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, DeltaError>;

/// Flat error kind reported to the outer control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    GraphInvariant,
    ResidualCycle,
    InsufficientScratch,
    PayloadFormat,
    ManifestInvalid,
    DataOffsetMismatch,
    OperationHashMismatch,
    OperationHashMissing,
    OperationExecution,
    PayloadSizeMismatch,
    PayloadHashMismatch,
    SignatureVerification,
    PartitionHashMismatch,
    DeviceIo,
    CheckpointStore,
    InvalidState,
    Cancelled,
    Config,
}

/// Broad failure class, see the retry notes on each variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Generator defect. Never retried.
    BuildInvariant,
    /// Data did not match its declared digest or signature.
    Integrity,
    /// Device or store could not be read or written.
    Resource,
    /// Payload bytes could not be decoded.
    Format,
    /// Misuse, cancellation or bad configuration.
    Control,
}

impl DeltaError {
    /// Error kind for reporting
    pub fn code(&self) -> ErrorCode {
        match self {
            DeltaError::DoubleWriter { .. }
            | DeltaError::BlockOutOfRange { .. }
            | DeltaError::InvalidExtent(_)
            | DeltaError::ExtentLengthMismatch { .. }
            | DeltaError::UncuttableCycle { .. } => ErrorCode::GraphInvariant,
            DeltaError::ResidualCycle { .. } => ErrorCode::ResidualCycle,
            DeltaError::InsufficientScratch { .. } => ErrorCode::InsufficientScratch,
            DeltaError::InvalidMagic
            | DeltaError::UnsupportedVersion { .. }
            | DeltaError::InvalidBlockSize(_)
            | DeltaError::ManifestTooLarge { .. }
            | DeltaError::ManifestChecksumMismatch
            | DeltaError::PositionString(_)
            | DeltaError::Encoding(_) => ErrorCode::PayloadFormat,
            DeltaError::ManifestValidation(_) => ErrorCode::ManifestInvalid,
            DeltaError::DataOffsetMismatch { .. } => ErrorCode::DataOffsetMismatch,
            DeltaError::OperationHashMismatch { .. } => ErrorCode::OperationHashMismatch,
            DeltaError::OperationHashMissing { .. } => ErrorCode::OperationHashMissing,
            DeltaError::OperationExecution { .. }
            | DeltaError::Decompression(_)
            | DeltaError::Compression(_)
            | DeltaError::Patch(_) => ErrorCode::OperationExecution,
            DeltaError::PayloadSizeMismatch { .. } => ErrorCode::PayloadSizeMismatch,
            DeltaError::PayloadHashMismatch => ErrorCode::PayloadHashMismatch,
            DeltaError::SignatureMismatch
            | DeltaError::SignatureMissing
            | DeltaError::InvalidPublicKey(_) => ErrorCode::SignatureVerification,
            DeltaError::PartitionHashMismatch { .. } => ErrorCode::PartitionHashMismatch,
            DeltaError::ScratchUnavailable { .. }
            | DeltaError::DeviceTooSmall { .. }
            | DeltaError::Io(_) => ErrorCode::DeviceIo,
            DeltaError::Prefs(_)
            | DeltaError::InvalidCheckpoint(_)
            | DeltaError::Serialization(_) => ErrorCode::CheckpointStore,
            DeltaError::InvalidState { .. } => ErrorCode::InvalidState,
            DeltaError::Cancelled { .. } => ErrorCode::Cancelled,
            DeltaError::Config(_) | DeltaError::ConfigParse(_) => ErrorCode::Config,
        }
    }

    /// Failure class of this error
    pub fn category(&self) -> ErrorCategory {
        self.code().category()
    }
}

impl ErrorCode {
    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorCode::GraphInvariant | ErrorCode::ResidualCycle | ErrorCode::InsufficientScratch => {
                ErrorCategory::BuildInvariant
            }
            ErrorCode::OperationHashMismatch
            | ErrorCode::OperationHashMissing
            | ErrorCode::PayloadSizeMismatch
            | ErrorCode::PayloadHashMismatch
            | ErrorCode::SignatureVerification
            | ErrorCode::PartitionHashMismatch => ErrorCategory::Integrity,
            ErrorCode::DeviceIo | ErrorCode::CheckpointStore => ErrorCategory::Resource,
            ErrorCode::PayloadFormat
            | ErrorCode::ManifestInvalid
            | ErrorCode::DataOffsetMismatch
            | ErrorCode::OperationExecution => ErrorCategory::Format,
            ErrorCode::InvalidState | ErrorCode::Cancelled | ErrorCode::Config => {
                ErrorCategory::Control
            }
        }
    }
}

/// Attempt context reported next to an [`ErrorCode`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFlags {
    /// The attempt continued from a checkpoint
    pub resumed: bool,
    /// The device runs in developer mode
    pub dev_mode: bool,
    /// The payload targets a test image
    pub test_image: bool,
}
