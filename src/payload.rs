//! Payload layout
//!
//! ```text
//! +--------+----------+-------------------------+-------------------+
//! | header | manifest | blobs in operation order| signature message |
//! +--------+----------+-------------------------+-------------------+
//!  24 B     bincode    data section              optional, bincode
//! ```
//!
//! The signature message signs the SHA-256 of every byte in front of it.

use crate::error::{DeltaError, Result};
use crate::header::{Header, HEADER_SIZE};
use crate::manifest::DeltaManifest;
use crate::signature::{PayloadSigner, Signatures};
use sha2::{Digest, Sha256};
use tracing::info;

/// A complete payload and the values an install plan needs
#[derive(Debug, Clone)]
pub struct Payload {
    pub bytes: Vec<u8>,
    /// Header plus manifest length
    pub metadata_size: u64,
    /// SHA-256 of all bytes
    pub hash: [u8; 32],
    /// SHA-256 of the bytes covered by the signature
    pub signed_hash: [u8; 32],
    /// Manifest as written, including the signature slot
    pub manifest: DeltaManifest,
}

impl Payload {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Assembles header, manifest, blobs and signature
#[derive(Debug)]
pub struct PayloadWriter {
    manifest: DeltaManifest,
    blobs: Vec<u8>,
}

impl PayloadWriter {
    /// `blobs` must be laid out to match the manifest's data offsets
    pub fn new(manifest: DeltaManifest, blobs: Vec<u8>) -> Result<Self> {
        if blobs.len() as u64 != manifest.data_length() {
            return Err(DeltaError::ManifestValidation(format!(
                "manifest describes {} data bytes, {} supplied",
                manifest.data_length(),
                blobs.len()
            )));
        }
        Ok(PayloadWriter { manifest, blobs })
    }

    pub fn manifest(&self) -> &DeltaManifest {
        &self.manifest
    }

    pub fn finish(mut self, signer: Option<&PayloadSigner>) -> Result<Payload> {
        if let Some(signer) = signer {
            signer.reserve(&mut self.manifest)?;
        }
        self.manifest.validate()?;

        let manifest_bytes = self.manifest.to_bytes()?;
        let header = Header::new(&manifest_bytes);
        header.validate()?;

        let mut bytes =
            Vec::with_capacity(HEADER_SIZE + manifest_bytes.len() + self.blobs.len() + 128);
        bytes.extend_from_slice(&header.to_bytes());
        bytes.extend_from_slice(&manifest_bytes);
        bytes.extend_from_slice(&self.blobs);

        let signed_hash: [u8; 32] = Sha256::digest(&bytes).into();
        if let Some(signer) = signer {
            let message = Signatures {
                signatures: vec![signer.sign(&signed_hash)],
            }
            .to_bytes()?;
            if message.len() as u64 != self.manifest.signatures_size {
                return Err(DeltaError::ManifestValidation(format!(
                    "signature message is {} bytes, {} reserved",
                    message.len(),
                    self.manifest.signatures_size
                )));
            }
            bytes.extend_from_slice(&message);
        }

        let hash: [u8; 32] = Sha256::digest(&bytes).into();
        info!(
            "Payload written: {} bytes, {} operations, signed: {}",
            bytes.len(),
            self.manifest.operations.len(),
            signer.is_some()
        );

        Ok(Payload {
            bytes,
            metadata_size: header.metadata_size(),
            hash,
            signed_hash,
            manifest: self.manifest,
        })
    }
}

/// Decode header and manifest from the front of `bytes`.
///
/// Returns `None` while `bytes` is too short to hold both.
pub fn read_metadata(bytes: &[u8]) -> Result<Option<(Header, DeltaManifest)>> {
    if bytes.len() < HEADER_SIZE {
        return Ok(None);
    }
    let header = Header::from_bytes(&bytes[..HEADER_SIZE])?;
    let end = header.metadata_size() as usize;
    if bytes.len() < end {
        return Ok(None);
    }
    let manifest_bytes = &bytes[HEADER_SIZE..end];
    header.verify_manifest(manifest_bytes)?;
    let manifest = DeltaManifest::from_bytes(manifest_bytes)?;
    Ok(Some((header, manifest)))
}
