use crate::error::{DeltaError, Result};

pub const MAGIC: [u8; 8] = *b"ABDL\x00\x01\x00\x00";
pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 0;
pub const HEADER_SIZE: usize = 24;

/// Upper bound on the encoded manifest
pub const MAX_MANIFEST_SIZE: u64 = 64 * 1024 * 1024;

/// Payload header
///
/// Fixed-size preamble in front of the manifest. The manifest checksum lets
/// the engine reject a corrupted manifest before decoding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Magic number: "ABDL\x00\x01\x00\x00"
    pub magic: [u8; 8],

    /// Format version (major)
    pub version_major: u16,

    /// Format version (minor)
    pub version_minor: u16,

    /// Encoded manifest length in bytes
    pub manifest_size: u64,

    /// CRC32 of the encoded manifest
    pub manifest_checksum: u32,
}

impl Header {
    pub fn new(manifest: &[u8]) -> Self {
        Header {
            magic: MAGIC,
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            manifest_size: manifest.len() as u64,
            manifest_checksum: crc32fast::hash(manifest),
        }
    }

    /// Validate the header magic, version and manifest size
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(DeltaError::InvalidMagic);
        }

        // Minor versions are additive
        if self.version_major != VERSION_MAJOR || self.version_minor > VERSION_MINOR {
            return Err(DeltaError::UnsupportedVersion {
                major: self.version_major,
                minor: self.version_minor,
            });
        }

        if self.manifest_size > MAX_MANIFEST_SIZE {
            return Err(DeltaError::ManifestTooLarge {
                size: self.manifest_size,
                limit: MAX_MANIFEST_SIZE,
            });
        }

        Ok(())
    }

    /// Check `manifest` against the recorded checksum
    pub fn verify_manifest(&self, manifest: &[u8]) -> Result<()> {
        if manifest.len() as u64 != self.manifest_size
            || crc32fast::hash(manifest) != self.manifest_checksum
        {
            return Err(DeltaError::ManifestChecksumMismatch);
        }
        Ok(())
    }

    /// Bytes from the start of the payload to the first blob
    pub fn metadata_size(&self) -> u64 {
        HEADER_SIZE as u64 + self.manifest_size
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE);

        bytes.extend_from_slice(&self.magic);
        bytes.extend_from_slice(&self.version_major.to_le_bytes());
        bytes.extend_from_slice(&self.version_minor.to_le_bytes());
        bytes.extend_from_slice(&self.manifest_size.to_le_bytes());
        bytes.extend_from_slice(&self.manifest_checksum.to_le_bytes());

        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(DeltaError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Insufficient bytes for header",
            )));
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[0..8]);
        let version_major = u16::from_le_bytes([bytes[8], bytes[9]]);
        let version_minor = u16::from_le_bytes([bytes[10], bytes[11]]);
        let mut size = [0u8; 8];
        size.copy_from_slice(&bytes[12..20]);
        let manifest_checksum = u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);

        let header = Header {
            magic,
            version_major,
            version_minor,
            manifest_size: u64::from_le_bytes(size),
            manifest_checksum,
        };
        header.validate()?;

        Ok(header)
    }
}
