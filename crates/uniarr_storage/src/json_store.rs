//! Generic persistent key-value store kept in a single JSON file.

use crate::error::StorageResult;
use crate::fsutil::write_atomic;
use crate::kv::KeyValueStore;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A key-value store persisted as one JSON object.
///
/// Slower than [`crate::LogStore`] (every mutation rewrites the whole file)
/// but it needs nothing beyond a writable file, which makes it the fallback
/// when the log store cannot be used.
///
/// The file is not touched until the first operation, so constructing a
/// store never fails.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<Option<BTreeMap<String, String>>>,
}

impl JsonFileStore {
    /// Creates a store backed by the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(None),
        }
    }

    /// Returns the path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read<T>(&self, f: impl FnOnce(&BTreeMap<String, String>) -> T) -> StorageResult<T> {
        let mut guard = self.entries.lock();
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        Ok(f(guard.get_or_insert_with(BTreeMap::new)))
    }

    /// Applies `f` to a copy of the entries. When `f` reports a change, the
    /// copy is persisted and only then replaces the cached entries.
    fn update(&self, f: impl FnOnce(&mut BTreeMap<String, String>) -> bool) -> StorageResult<()> {
        let mut guard = self.entries.lock();
        if guard.is_none() {
            *guard = Some(self.load()?);
        }

        let mut next = guard.clone().unwrap_or_default();
        if f(&mut next) {
            let data = serde_json::to_vec(&next)?;
            write_atomic(&self.path, &data)?;
            *guard = Some(next);
        }
        Ok(())
    }

    fn load(&self) -> StorageResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let data = std::fs::read(&self.path)?;
        if data.is_empty() {
            return Ok(BTreeMap::new());
        }

        let entries: BTreeMap<String, String> = serde_json::from_slice(&data)?;
        debug!(path = %self.path.display(), entries = entries.len(), "loaded JSON store");
        Ok(entries)
    }
}

impl KeyValueStore for JsonFileStore {
    fn name(&self) -> &'static str {
        "json-file"
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.read(|entries| entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.update(|entries| {
            if entries.get(key).map(String::as_str) == Some(value) {
                return false;
            }
            entries.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.update(|entries| entries.remove(key).is_some())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.read(|entries| entries.keys().cloned().collect())
    }

    fn clear(&self) -> StorageResult<()> {
        self.update(|entries| {
            let dirty = !entries.is_empty();
            entries.clear();
            dirty
        })
    }
}
