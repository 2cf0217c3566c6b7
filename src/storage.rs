//! Persisted key/value slots backing the pending queue and the id state.
//!
//! A slot is a named string value that survives process restarts. Keys are
//! fixed, versioned names (`feedback_pending_queue_v1`, ...) so a format
//! change gets a fresh slot instead of misreading an older one.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;

/// Errors raised by slot stores.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Underlying I/O failed for the given slot
    #[error("storage I/O failed for slot '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },

    /// The store refused the write (quota, read-only medium, ...)
    #[error("storage unavailable for slot '{key}': {reason}")]
    Unavailable { key: String, reason: String },
}

/// Durable key/value storage for small serialized values.
///
/// Implementations are synchronous so that a read-modify-write of a slot
/// never spans an await point.
pub trait SlotStore: Send + Sync {
    /// Read a slot. `Ok(None)` when the slot has never been written.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Replace the contents of a slot.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Slot store keeping one `<key>.json` file per slot in a directory.
///
/// Writes go to a temporary sibling file which is then renamed over the
/// slot, so a crash mid-write leaves the previous contents intact.
#[derive(Debug, Clone)]
pub struct FileSlotStore {
    dir: PathBuf,
}

impl FileSlotStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
            key: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Directory holding the slot files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn slot_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl SlotStore for FileSlotStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.slot_path(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.slot_path(key);
        let tmp = self.dir.join(format!(".{}.json.tmp", key));

        let io_err = |source| StorageError::Io {
            key: key.to_string(),
            source,
        };

        fs::write(&tmp, value).map_err(io_err)?;
        fs::rename(&tmp, &path).map_err(io_err)?;

        debug!(slot = key, bytes = value.len(), "Slot written");
        Ok(())
    }
}

/// In-process slot store. Clones share the same slots, which lets tests
/// simulate a restart by building fresh components over the same store.
#[derive(Debug, Clone, Default)]
pub struct MemorySlotStore {
    slots: Arc<Mutex<HashMap<String, String>>>,
}

impl MemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SlotStore for MemorySlotStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let slots = self.slots.lock().map_err(|_| StorageError::Unavailable {
            key: key.to_string(),
            reason: "slot map poisoned".to_string(),
        })?;
        Ok(slots.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut slots = self.slots.lock().map_err(|_| StorageError::Unavailable {
            key: key.to_string(),
            reason: "slot map poisoned".to_string(),
        })?;
        slots.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
