//! Persistent key-value settings storage
//!
//! The fallback purchased list survives process restarts through this trait.
//! The file-backed implementation holds an exclusive file lock across the
//! write so concurrent processes cannot interleave partial updates.

use crate::{ProductId, Result, StoreError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Simple settings storage: a list of product identifiers under a fixed key
pub trait SettingsStore: Send + Sync {
    fn read_ids(&self, key: &str) -> Result<Vec<ProductId>>;
    fn write_ids(&self, key: &str, ids: &[ProductId]) -> Result<()>;
}

/// In-memory settings store for tests and ephemeral hosts
pub struct MemorySettingsStore {
    entries: Mutex<HashMap<String, Vec<ProductId>>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn read_ids(&self, key: &str) -> Result<Vec<ProductId>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned().unwrap_or_default())
    }

    fn write_ids(&self, key: &str, ids: &[ProductId]) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), ids.to_vec());
        Ok(())
    }
}

impl Default for MemorySettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

/// File-based settings store
///
/// Each key maps to `<base>/<key>.json` holding a JSON array of identifiers.
pub struct FileSettingsStore {
    base_path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path)
            .map_err(|e| StoreError::Storage(format!("cannot create {:?}: {}", base_path, e)))?;
        Ok(Self { base_path })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", key))
    }
}

impl SettingsStore for FileSettingsStore {
    fn read_ids(&self, key: &str) -> Result<Vec<ProductId>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let json = std::fs::read_to_string(&path)
            .map_err(|e| StoreError::Storage(format!("cannot read {:?}: {}", path, e)))?;
        let ids: Vec<ProductId> = serde_json::from_str(&json)?;
        Ok(ids)
    }

    fn write_ids(&self, key: &str, ids: &[ProductId]) -> Result<()> {
        use fs2::FileExt;
        use std::fs::OpenOptions;

        let path = self.entry_path(key);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StoreError::Storage(format!("cannot open {:?}: {}", path, e)))?;

        // Exclusive lock for the read-modify-write; released before returning
        file.lock_exclusive()
            .map_err(|e| StoreError::Storage(format!("cannot lock {:?}: {}", path, e)))?;

        let json = serde_json::to_string_pretty(ids)?;
        let write_result = std::fs::write(&path, json);

        file.unlock()
            .map_err(|e| StoreError::Storage(format!("cannot unlock {:?}: {}", path, e)))?;

        write_result.map_err(|e| StoreError::Storage(format!("cannot write {:?}: {}", path, e)))?;
        Ok(())
    }
}
