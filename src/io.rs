//! Block device access for patch application

use crate::error::{DeltaError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Byte-addressed device the engine patches in place
pub trait BlockDevice: Send {
    /// Device size in bytes
    fn size(&self) -> u64;

    /// Fill `buf` from `offset`
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Make every completed write durable
    fn sync(&mut self) -> Result<()>;
}

fn check_range(offset: u64, len: usize, size: u64) -> Result<()> {
    let end = offset.saturating_add(len as u64);
    if end > size {
        return Err(DeltaError::DeviceTooSmall {
            required: end,
            available: size,
        });
    }
    Ok(())
}

/// Disk-backed partition or image file
pub struct FileBlockDevice {
    file: File,
    path: PathBuf,
    size: u64,
}

impl FileBlockDevice {
    /// Create (or truncate) a file of `size` zero bytes
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(size)?;

        Ok(FileBlockDevice {
            file,
            path: path.as_ref().to_path_buf(),
            size,
        })
    }

    /// Open an existing file read-write
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let size = file.metadata()?.len();

        Ok(FileBlockDevice {
            file,
            path: path.as_ref().to_path_buf(),
            size,
        })
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockDevice for FileBlockDevice {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.size)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        check_range(offset, data.len(), self.size)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

/// In-memory device; clones share the same bytes
#[derive(Debug, Clone, Default)]
pub struct MemoryBlockDevice {
    data: Arc<Mutex<Vec<u8>>>,
}

impl MemoryBlockDevice {
    pub fn new(size: usize) -> Self {
        Self::from_bytes(vec![0; size])
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        MemoryBlockDevice {
            data: Arc::new(Mutex::new(bytes)),
        }
    }

    /// Copy of the current contents
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl BlockDevice for MemoryBlockDevice {
    fn size(&self) -> u64 {
        self.data.lock().len() as u64
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let data = self.data.lock();
        check_range(offset, buf.len(), data.len() as u64)?;
        let start = offset as usize;
        buf.copy_from_slice(&data[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut data = self.data.lock();
        check_range(offset, bytes.len(), data.len() as u64)?;
        let start = offset as usize;
        data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

/// SHA-256 of the first `size` bytes of a device
pub fn hash_device(device: &mut dyn BlockDevice, size: u64) -> Result<[u8; 32]> {
    use sha2::{Digest, Sha256};

    const CHUNK: u64 = 1 << 20;
    check_range(size, 0, device.size())?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK as usize];
    let mut offset = 0u64;
    while offset < size {
        let len = (size - offset).min(CHUNK) as usize;
        device.read_at(offset, &mut buffer[..len])?;
        hasher.update(&buffer[..len]);
        offset += len as u64;
    }
    Ok(hasher.finalize().into())
}
