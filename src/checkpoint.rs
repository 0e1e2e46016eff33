//! Checkpoint persistence and the resume decision
//!
//! Three prefs keys are involved. The payload identity is written when an
//! attempt starts from scratch, after any older checkpoint has been deleted,
//! so a checkpoint on disk always belongs to the identity stored next to it.

use crate::error::{DeltaError, Result};
use crate::hash::HashState;
use crate::prefs::PrefsStore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

pub const KEY_CHECKPOINT: &str = "update-checkpoint";
pub const KEY_PAYLOAD_IDENTITY: &str = "update-payload-identity";

/// Progress record written at operation boundaries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// First operation not yet applied
    pub next_operation_index: usize,
    /// Bytes of the data section consumed so far
    pub buffer_offset: u64,
    /// Running payload hash after `metadata_size + buffer_offset` bytes
    pub hash_state: HashState,
    /// Header plus manifest length of the payload
    pub metadata_size: u64,
    /// Times this checkpoint has been resumed from
    pub resume_count: u32,
}

impl Checkpoint {
    /// Stored checkpoint, if one exists
    pub fn load(prefs: &dyn PrefsStore) -> Result<Option<Self>> {
        match prefs.get_string(KEY_CHECKPOINT)? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| DeltaError::InvalidCheckpoint(e.to_string())),
            None => Ok(None),
        }
    }

    pub fn save(&self, prefs: &dyn PrefsStore) -> Result<()> {
        let json = serde_json::to_string(self)?;
        prefs.set_string(KEY_CHECKPOINT, &json)?;
        debug!(
            "Checkpoint at operation {} (data offset {})",
            self.next_operation_index, self.buffer_offset
        );
        Ok(())
    }

    /// Payload byte offset the transport should resume from
    pub fn resume_offset(&self) -> u64 {
        self.metadata_size + self.buffer_offset
    }
}

/// Identity of a payload, derived from its response metadata
pub fn payload_identity(metadata: &[u8]) -> String {
    hex::encode(Sha256::digest(metadata))
}

/// Drop any checkpoint and bind the store to a new payload
pub fn start_fresh(prefs: &dyn PrefsStore, identity: &str) -> Result<()> {
    prefs.delete(KEY_CHECKPOINT)?;
    prefs.set_string(KEY_PAYLOAD_IDENTITY, identity)
}

/// Forget all update progress
pub fn clear(prefs: &dyn PrefsStore) -> Result<()> {
    prefs.delete(KEY_CHECKPOINT)?;
    prefs.delete(KEY_PAYLOAD_IDENTITY)
}

/// The stored checkpoint, if it may be resumed for payload `identity`.
///
/// A checkpoint is resumable when it belongs to the same payload, has made
/// progress, carries a hash state and metadata size, and has been resumed
/// fewer than `max_resume_failures` times. A corrupt record counts as absent.
pub fn resumable_checkpoint(
    prefs: &dyn PrefsStore,
    identity: &str,
    max_resume_failures: u32,
) -> Result<Option<Checkpoint>> {
    let stored_identity = prefs.get_string(KEY_PAYLOAD_IDENTITY)?;
    if stored_identity.as_deref() != Some(identity) {
        if stored_identity.is_some() {
            warn!("Checkpoint belongs to a different payload");
        }
        return Ok(None);
    }

    let checkpoint = match Checkpoint::load(prefs) {
        Ok(Some(checkpoint)) => checkpoint,
        Ok(None) => return Ok(None),
        Err(DeltaError::InvalidCheckpoint(reason)) => {
            warn!("Ignoring unreadable checkpoint: {}", reason);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    if checkpoint.next_operation_index == 0 {
        return Ok(None);
    }
    if checkpoint.hash_state.is_empty() || checkpoint.metadata_size == 0 {
        warn!("Checkpoint is missing hash state or metadata size");
        return Ok(None);
    }
    if checkpoint.resume_count >= max_resume_failures {
        warn!(
            "Checkpoint resumed {} times, limit is {}",
            checkpoint.resume_count, max_resume_failures
        );
        return Ok(None);
    }
    Ok(Some(checkpoint))
}

/// Whether an interrupted update of payload `identity` can be resumed
pub fn can_resume_update(
    prefs: &dyn PrefsStore,
    identity: &str,
    max_resume_failures: u32,
) -> Result<bool> {
    Ok(resumable_checkpoint(prefs, identity, max_resume_failures)?.is_some())
}
