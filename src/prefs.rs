//! Durable key/value preference store
//!
//! The engine keeps its checkpoint here. Implementations must make a
//! completed `set_string` survive a crash; a torn write may lose the new
//! value but must never leave a mix of old and new.

use crate::error::{DeltaError, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub trait PrefsStore: Send {
    fn get_string(&self, key: &str) -> Result<Option<String>>;

    fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`; removing a missing key succeeds
    fn delete(&self, key: &str) -> Result<()>;
}

fn validate_key(key: &str) -> Result<()> {
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !key.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(DeltaError::Prefs(format!("invalid key {:?}", key)))
    }
}

/// Store kept in memory; clones share the same map
#[derive(Debug, Clone, Default)]
pub struct MemoryPrefs {
    values: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryPrefs {
    pub fn new() -> Self {
        MemoryPrefs::default()
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

impl PrefsStore for MemoryPrefs {
    fn get_string(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        Ok(self.values.lock().get(key).cloned())
    }

    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.values.lock().remove(key);
        Ok(())
    }
}

/// One file per key under a directory, replaced atomically via rename
#[derive(Debug, Clone)]
pub struct FilePrefs {
    root: PathBuf,
}

impl FilePrefs {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        fs::create_dir_all(&root)?;
        Ok(FilePrefs {
            root: root.as_ref().to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

impl PrefsStore for FilePrefs {
    fn get_string(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path(key)?) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path(key)?;
        let tmp = self.root.join(format!(".{}.tmp", key));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        if let Ok(dir) = File::open(&self.root) {
            // Persist the rename itself; not every platform allows this
            let _ = dir.sync_all();
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
