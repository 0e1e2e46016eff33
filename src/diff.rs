//! Binary patch primitive for `BINARY_DIFF` operations
//!
//! The engine hands the codec the source bytes read through the operation's
//! position string and writes whatever the codec returns. [`XorDeltaCodec`]
//! is the built-in codec:
//!
//! ```text
//! [new_len: u64 LE][zstd(old' XOR new)]
//! ```
//!
//! where `old'` is the source truncated or zero-padded to `new_len`. Blocks
//! that change in a few places XOR to long zero runs, which compress to
//! almost nothing.
//!
//! XOR only sees changes at the same offset. Content that shifts inside a
//! block XORs to noise and the generator falls back to a REPLACE blob.

use crate::compression::{self, CompressionMethod};
use crate::error::{DeltaError, Result};

/// Upper bound on a single patched output
pub const MAX_PATCH_OUTPUT: u64 = 1 << 32;

/// Produces and applies binary patches
///
/// Production payloads are expected to plug in a bsdiff-class codec here,
/// which copes with inserted and shifted content. The generator and the
/// engine must be given the same codec.
pub trait PatchCodec: Send + Sync {
    /// Patch turning `old` into `new`
    fn diff(&self, old: &[u8], new: &[u8]) -> Result<Vec<u8>>;

    /// Apply `patch` to `old`
    fn apply(&self, old: &[u8], patch: &[u8]) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct XorDeltaCodec;

impl PatchCodec for XorDeltaCodec {
    fn diff(&self, old: &[u8], new: &[u8]) -> Result<Vec<u8>> {
        let mut delta = new.to_vec();
        xor_into(&mut delta, old);

        let body = compression::compress(&delta, CompressionMethod::Zstd)?;
        let mut patch = Vec::with_capacity(body.len() + 8);
        patch.extend_from_slice(&(new.len() as u64).to_le_bytes());
        patch.extend_from_slice(&body);
        Ok(patch)
    }

    fn apply(&self, old: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
        if patch.len() < 8 {
            return Err(DeltaError::Patch(format!(
                "patch of {} bytes has no length prefix",
                patch.len()
            )));
        }
        let (len_bytes, body) = patch.split_at(8);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(len_bytes);
        let new_len = u64::from_le_bytes(prefix);
        if new_len > MAX_PATCH_OUTPUT {
            return Err(DeltaError::Patch(format!(
                "patched output of {} bytes exceeds limit",
                new_len
            )));
        }

        let mut output = compression::decompress(body, CompressionMethod::Zstd, new_len as usize)
            .map_err(|e| DeltaError::Patch(e.to_string()))?;
        if output.len() as u64 != new_len {
            return Err(DeltaError::Patch(format!(
                "patch body decodes to {} bytes, header says {}",
                output.len(),
                new_len
            )));
        }
        xor_into(&mut output, old);
        Ok(output)
    }
}

/// XOR `src` into `dest` over their common prefix
fn xor_into(dest: &mut [u8], src: &[u8]) {
    for (d, s) in dest.iter_mut().zip(src) {
        *d ^= s;
    }
}
