//! Keychain-style credential stores.

use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Default per-item size limit in bytes.
///
/// Mirrors the limit mobile keychains impose on a single entry.
pub const DEFAULT_ITEM_LIMIT: usize = 2048;

/// A credential store with a per-item size limit.
///
/// Implementations hold secrets such as API keys and passwords. Values
/// larger than [`SecretStore::item_limit`] are rejected with
/// [`StorageError::ItemTooLarge`] instead of being truncated.
pub trait SecretStore: Send + Sync {
    /// Returns the secret stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get_secret(&self, key: &str) -> StorageResult<Option<String>>;

    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ItemTooLarge`] if `value` exceeds the item
    /// limit, or an error if the write cannot be persisted.
    fn set_secret(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Deletes the secret under `key`. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion cannot be persisted.
    fn delete_secret(&self, key: &str) -> StorageResult<()>;

    /// Maximum size of one value in bytes.
    fn item_limit(&self) -> usize;
}

pub(crate) fn check_item_size(key: &str, value: &str, limit: usize) -> StorageResult<()> {
    if value.len() > limit {
        return Err(StorageError::ItemTooLarge {
            key: key.to_string(),
            size: value.len(),
            limit,
        });
    }
    Ok(())
}

/// An in-memory credential store.
#[derive(Debug)]
pub struct MemorySecretStore {
    items: RwLock<HashMap<String, String>>,
    item_limit: usize,
}

impl MemorySecretStore {
    /// Creates a store with the default item limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_item_limit(DEFAULT_ITEM_LIMIT)
    }

    /// Creates a store with a custom item limit.
    #[must_use]
    pub fn with_item_limit(item_limit: usize) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            item_limit,
        }
    }

    /// Returns the number of stored secrets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Returns true if no secrets are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl Default for MemorySecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for MemorySecretStore {
    fn get_secret(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.items.read().get(key).cloned())
    }

    fn set_secret(&self, key: &str, value: &str) -> StorageResult<()> {
        check_item_size(key, value, self.item_limit)?;
        self.items
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete_secret(&self, key: &str) -> StorageResult<()> {
        self.items.write().remove(key);
        Ok(())
    }

    fn item_limit(&self) -> usize {
        self.item_limit
    }
}
