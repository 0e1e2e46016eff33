//! Payload signatures
//!
//! The signed message is the SHA-256 of every payload byte in front of the
//! signature message. The signature message itself is a bincode list of
//! versioned signature entries so that a payload can carry signatures for
//! more than one key during a key rotation.

use crate::error::{DeltaError, Result};
use crate::manifest::DeltaManifest;
use bincode::Options;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const SIGNATURE_VERSION: u32 = 1;

const MAX_SIGNATURES_SIZE: u64 = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEntry {
    pub version: u32,
    pub data: Vec<u8>,
}

/// Trailing signature message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signatures {
    pub signatures: Vec<SignatureEntry>,
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_SIGNATURES_SIZE)
}

impl Signatures {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(codec().serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(codec().deserialize(bytes)?)
    }
}

/// Verification primitive used by the engine
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, public_key: &[u8; 32], message: &[u8], signature: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, public_key: &[u8; 32], message: &[u8], signature: &[u8]) -> Result<()> {
        let key = VerifyingKey::from_bytes(public_key)
            .map_err(|e| DeltaError::InvalidPublicKey(e.to_string()))?;
        let sig = Signature::from_slice(signature).map_err(|_| DeltaError::SignatureMismatch)?;
        key.verify(message, &sig)
            .map_err(|_| DeltaError::SignatureMismatch)
    }
}

/// Read a public key file holding either 32 raw bytes or 64 hex digits
pub fn load_public_key(path: &Path) -> Result<[u8; 32]> {
    let bytes = std::fs::read(path)?;
    let raw = if bytes.len() == 32 {
        bytes
    } else {
        let text = String::from_utf8_lossy(&bytes);
        hex::decode(text.trim()).map_err(|e| DeltaError::InvalidPublicKey(e.to_string()))?
    };
    raw.as_slice()
        .try_into()
        .map_err(|_| DeltaError::InvalidPublicKey(format!("expected 32 bytes, got {}", raw.len())))
}

/// Accept the payload if any entry verifies `signed_hash` under `public_key`
pub fn verify_signatures(
    verifier: &dyn SignatureVerifier,
    public_key: &[u8; 32],
    signed_hash: &[u8; 32],
    signatures: &Signatures,
) -> Result<()> {
    if signatures.signatures.is_empty() {
        return Err(DeltaError::SignatureMissing);
    }
    let verified = signatures
        .signatures
        .iter()
        .filter(|entry| entry.version == SIGNATURE_VERSION)
        .any(|entry| verifier.verify(public_key, signed_hash, &entry.data).is_ok());
    if verified {
        Ok(())
    } else {
        Err(DeltaError::SignatureMismatch)
    }
}

/// Size of the signature message a single Ed25519 signature produces
pub fn signatures_size() -> Result<u64> {
    let placeholder = Signatures {
        signatures: vec![SignatureEntry {
            version: SIGNATURE_VERSION,
            data: vec![0; 64],
        }],
    };
    Ok(placeholder.to_bytes()?.len() as u64)
}

/// Signs payload hashes at generation time
pub struct PayloadSigner {
    key: SigningKey,
}

impl PayloadSigner {
    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        PayloadSigner {
            key: SigningKey::from_bytes(secret),
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    pub fn sign(&self, signed_hash: &[u8; 32]) -> SignatureEntry {
        SignatureEntry {
            version: SIGNATURE_VERSION,
            data: self.key.sign(signed_hash).to_bytes().to_vec(),
        }
    }

    /// Reserve room for the signature message in `manifest`
    pub fn reserve(&self, manifest: &mut DeltaManifest) -> Result<()> {
        manifest.signatures_offset = Some(manifest.data_length());
        manifest.signatures_size = signatures_size()?;
        Ok(())
    }
}

impl std::fmt::Debug for PayloadSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadSigner")
            .field("public_key", &hex::encode(self.public_key()))
            .finish()
    }
}
