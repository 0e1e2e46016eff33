//! Resumable SHA-256 over the payload stream
//!
//! A checkpoint has to carry the running payload hash so that a resumed
//! attempt can finish hashing without re-reading what it already consumed.
//! `HashState` is the raw SHA-256 context (chaining words, the partial
//! block, and the byte count), so it serializes into a checkpoint and picks
//! up exactly where it stopped.

use crate::error::{DeltaError, Result};
use serde::{Deserialize, Serialize};
use sha2::digest::consts::U64;
use sha2::digest::generic_array::GenericArray;

const BLOCK_LEN: usize = 64;

const INITIAL_STATE: [u32; 8] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19,
];

/// Serializable SHA-256 context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashState {
    pub state: [u32; 8],
    /// Bytes not yet compressed, always shorter than one block
    pub pending: Vec<u8>,
    /// Total bytes absorbed
    pub length: u64,
}

impl Default for HashState {
    fn default() -> Self {
        HashState {
            state: INITIAL_STATE,
            pending: Vec::new(),
            length: 0,
        }
    }
}

impl HashState {
    /// True before any byte has been absorbed
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct PayloadHasher {
    inner: HashState,
}

impl PayloadHasher {
    pub fn new() -> Self {
        PayloadHasher::default()
    }

    /// Continue from a checkpointed state
    pub fn from_state(state: HashState) -> Result<Self> {
        let expected_pending = (state.length % BLOCK_LEN as u64) as usize;
        if state.pending.len() != expected_pending {
            return Err(DeltaError::InvalidCheckpoint(format!(
                "hash state holds {} pending bytes, length implies {}",
                state.pending.len(),
                expected_pending
            )));
        }
        Ok(PayloadHasher { inner: state })
    }

    pub fn state(&self) -> &HashState {
        &self.inner
    }

    pub fn bytes_hashed(&self) -> u64 {
        self.inner.length
    }

    pub fn update(&mut self, mut data: &[u8]) {
        self.inner.length += data.len() as u64;

        if !self.inner.pending.is_empty() {
            let take = (BLOCK_LEN - self.inner.pending.len()).min(data.len());
            self.inner.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.inner.pending.len() < BLOCK_LEN {
                return;
            }
            let block = GenericArray::<u8, U64>::clone_from_slice(&self.inner.pending);
            sha2::compress256(&mut self.inner.state, &[block]);
            self.inner.pending.clear();
        }

        let mut chunks = data.chunks_exact(BLOCK_LEN);
        let blocks: Vec<GenericArray<u8, U64>> = chunks
            .by_ref()
            .map(GenericArray::<u8, U64>::clone_from_slice)
            .collect();
        if !blocks.is_empty() {
            sha2::compress256(&mut self.inner.state, &blocks);
        }
        self.inner.pending.extend_from_slice(chunks.remainder());
    }

    /// Digest of everything absorbed so far; the hasher stays usable
    pub fn finalize(&self) -> [u8; 32] {
        let mut state = self.inner.state;
        let mut tail = self.inner.pending.clone();
        tail.push(0x80);
        while tail.len() % BLOCK_LEN != 56 {
            tail.push(0);
        }
        tail.extend_from_slice(&(self.inner.length.wrapping_mul(8)).to_be_bytes());

        let blocks: Vec<GenericArray<u8, U64>> = tail
            .chunks_exact(BLOCK_LEN)
            .map(GenericArray::<u8, U64>::clone_from_slice)
            .collect();
        sha2::compress256(&mut state, &blocks);

        let mut digest = [0u8; 32];
        for (out, word) in digest.chunks_exact_mut(4).zip(state) {
            out.copy_from_slice(&word.to_be_bytes());
        }
        digest
    }
}
