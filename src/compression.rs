//! Compression for `REPLACE_COMPRESSED` blobs and diff patches
//!
//! **Format**: `[method: u8][compressed_data]`. The method byte lets the
//! applier decode blobs produced with either codec.
//! Compression is skipped below a size threshold and when the achieved ratio
//! is worse than `min_ratio`; the caller then emits a plain `REPLACE`.

use crate::error::{DeltaError, Result};
use serde::{Deserialize, Serialize};

/// Compression method for blob data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CompressionMethod {
    /// No compression
    None = 0,
    /// LZ4 compression (fast, moderate ratio)
    Lz4 = 1,
    /// Zstd compression (slower, better ratio)
    Zstd = 2,
}

impl CompressionMethod {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CompressionMethod::None),
            1 => Some(CompressionMethod::Lz4),
            2 => Some(CompressionMethod::Zstd),
            _ => None,
        }
    }
}

/// Compression configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Compression method to use
    pub method: CompressionMethod,

    /// Minimum size to compress (bytes)
    pub threshold: usize,

    /// Minimum compression ratio (compressed_size / original_size)
    /// If ratio is worse than this, store uncompressed
    pub min_ratio: f32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        CompressionConfig::zstd()
    }
}

impl CompressionConfig {
    /// Create config with no compression
    pub fn none() -> Self {
        CompressionConfig {
            method: CompressionMethod::None,
            threshold: usize::MAX,
            min_ratio: 0.0,
        }
    }

    /// Create config with LZ4 compression
    pub fn lz4() -> Self {
        CompressionConfig {
            method: CompressionMethod::Lz4,
            threshold: 512,
            min_ratio: 0.9,
        }
    }

    /// Create config with Zstd compression
    pub fn zstd() -> Self {
        CompressionConfig {
            method: CompressionMethod::Zstd,
            threshold: 512,
            min_ratio: 0.9,
        }
    }

    pub fn for_method(method: CompressionMethod) -> Self {
        match method {
            CompressionMethod::None => Self::none(),
            CompressionMethod::Lz4 => Self::lz4(),
            CompressionMethod::Zstd => Self::zstd(),
        }
    }
}

/// Compress data using the specified method (no framing)
pub fn compress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionMethod::Zstd => zstd::bulk::compress(data, 3)
            .map_err(|e| DeltaError::Compression(format!("Zstd compression failed: {}", e))),
    }
}

/// Decompress data produced by [`compress`], refusing output over `max_size`
pub fn decompress(data: &[u8], method: CompressionMethod, max_size: usize) -> Result<Vec<u8>> {
    let decompressed = match method {
        CompressionMethod::None => data.to_vec(),
        CompressionMethod::Lz4 => {
            let declared = lz4_declared_size(data)?;
            if declared > max_size {
                return Err(DeltaError::Decompression(format!(
                    "LZ4 block declares {} bytes, limit is {}",
                    declared, max_size
                )));
            }
            lz4_flex::decompress_size_prepended(data)
                .map_err(|e| DeltaError::Decompression(format!("LZ4 decompression failed: {}", e)))?
        }
        CompressionMethod::Zstd => zstd::bulk::decompress(data, max_size)
            .map_err(|e| DeltaError::Decompression(format!("Zstd decompression failed: {}", e)))?,
    };
    if decompressed.len() > max_size {
        return Err(DeltaError::Decompression(format!(
            "output of {} bytes exceeds limit of {}",
            decompressed.len(),
            max_size
        )));
    }
    Ok(decompressed)
}

/// Little-endian u32 output size at the front of an LZ4 block
fn lz4_declared_size(data: &[u8]) -> Result<usize> {
    let prefix: [u8; 4] = data
        .get(..4)
        .and_then(|p| p.try_into().ok())
        .ok_or_else(|| DeltaError::Decompression("LZ4 block missing size prefix".to_string()))?;
    Ok(u32::from_le_bytes(prefix) as usize)
}

/// Compress and prepend the method byte
pub fn encode_blob(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    let compressed = compress(data, method)?;
    let mut blob = Vec::with_capacity(compressed.len() + 1);
    blob.push(method as u8);
    blob.extend_from_slice(&compressed);
    Ok(blob)
}

/// Read the method byte and decompress the rest
pub fn decode_blob(blob: &[u8], max_size: usize) -> Result<Vec<u8>> {
    let (&method, body) = blob
        .split_first()
        .ok_or_else(|| DeltaError::Decompression("empty compressed blob".to_string()))?;
    let method = CompressionMethod::from_u8(method).ok_or_else(|| {
        DeltaError::Decompression(format!("unknown compression method {}", method))
    })?;
    decompress(body, method, max_size)
}

/// Framed blob if compression pays off, `None` otherwise
pub fn encode_if_beneficial(data: &[u8], config: &CompressionConfig) -> Result<Option<Vec<u8>>> {
    if data.len() < config.threshold || matches!(config.method, CompressionMethod::None) {
        return Ok(None);
    }

    let blob = encode_blob(data, config.method)?;
    let ratio = blob.len() as f32 / data.len() as f32;
    if ratio < config.min_ratio {
        Ok(Some(blob))
    } else {
        Ok(None)
    }
}
