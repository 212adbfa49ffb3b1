//! Session persistence backends
//!
//! The session lives in exactly three slots: access token, refresh token and
//! the serialized user record. Backends are injected into the session manager.

use crate::error::{ClientError, Result};
use papaya::HashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Named slot of the persisted session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StorageSlot {
    AccessToken,
    RefreshToken,
    User,
}

impl StorageSlot {
    pub const ALL: [StorageSlot; 3] = [Self::AccessToken, Self::RefreshToken, Self::User];

    /// Stable key used by persistent backends
    pub fn key(self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::User => "user",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|slot| slot.key() == key)
    }
}

/// Key/value persistence for the session slots
pub trait SessionStorage: Send + Sync {
    fn get(&self, slot: StorageSlot) -> Option<String>;

    fn set(&self, slot: StorageSlot, value: &str) -> Result<()>;

    fn remove(&self, slot: StorageSlot) -> Result<()>;

    /// Remove every slot, attempting all of them even if one fails
    fn clear(&self) -> Result<()> {
        let mut first_error = None;
        for slot in StorageSlot::ALL {
            if let Err(e) = self.remove(slot) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// In-memory storage
///
/// Clones share the same underlying map.
#[derive(Clone)]
pub struct MemoryStorage {
    slots: Arc<HashMap<StorageSlot, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(HashMap::new()),
        }
    }

    pub fn contains(&self, slot: StorageSlot) -> bool {
        self.slots.pin().contains_key(&slot)
    }

    fn snapshot(&self) -> BTreeMap<String, String> {
        self.slots
            .pin()
            .iter()
            .map(|(slot, value)| (slot.key().to_string(), value.clone()))
            .collect()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, slot: StorageSlot) -> Option<String> {
        self.slots.pin().get(&slot).cloned()
    }

    fn set(&self, slot: StorageSlot, value: &str) -> Result<()> {
        self.slots.pin().insert(slot, value.to_string());
        Ok(())
    }

    fn remove(&self, slot: StorageSlot) -> Result<()> {
        self.slots.pin().remove(&slot);
        Ok(())
    }
}

/// Storage for contexts without a persistent store: reads are empty, writes are dropped
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStorage;

impl SessionStorage for NoopStorage {
    fn get(&self, _slot: StorageSlot) -> Option<String> {
        None
    }

    fn set(&self, _slot: StorageSlot, _value: &str) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _slot: StorageSlot) -> Result<()> {
        Ok(())
    }
}

/// File-backed storage
///
/// Keeps the slots as a JSON object on disk, mirrored in memory. Every
/// mutation rewrites the file through a temporary file and a rename.
pub struct FileStorage {
    path: PathBuf,
    cache: MemoryStorage,
    write_lock: Mutex<()>,
}

impl FileStorage {
    /// Open the session file, starting empty if it is missing or unreadable
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cache = MemoryStorage::new();

        match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<BTreeMap<String, String>>(&contents) {
                Ok(entries) => {
                    for (key, value) in entries {
                        if let Some(slot) = StorageSlot::from_key(&key) {
                            cache.set(slot, &value)?;
                        }
                    }
                    debug!(path = %path.display(), "Loaded session file");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Session file is corrupt, starting empty");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ClientError::Storage(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        }

        Ok(Self {
            path,
            cache,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| ClientError::Storage("session file lock poisoned".to_string()))?;

        let contents = serde_json::to_string_pretty(&self.cache.snapshot())?;
        let tmp_path = self.path.with_extension("tmp");

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ClientError::Storage(format!("failed to create {}: {e}", parent.display())))?;
        }
        std::fs::write(&tmp_path, contents)
            .map_err(|e| ClientError::Storage(format!("failed to write {}: {e}", tmp_path.display())))?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| ClientError::Storage(format!("failed to replace {}: {e}", self.path.display())))?;

        Ok(())
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, slot: StorageSlot) -> Option<String> {
        self.cache.get(slot)
    }

    fn set(&self, slot: StorageSlot, value: &str) -> Result<()> {
        self.cache.set(slot, value)?;
        self.flush()
    }

    fn remove(&self, slot: StorageSlot) -> Result<()> {
        if !self.cache.contains(slot) {
            return Ok(());
        }
        self.cache.remove(slot)?;
        self.flush()
    }
}
