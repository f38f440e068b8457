//! The key-value contract shared by every persistent store.

use crate::error::StorageResult;

/// A string key-value store.
///
/// Both the fast [`crate::LogStore`] and the generic
/// [`crate::JsonFileStore`] implement this contract, so callers never branch
/// on which backend is active.
///
/// Methods take `&self`; implementations lock internally so a store can be
/// shared behind an `Arc`.
pub trait KeyValueStore: Send + Sync {
    /// Short backend name used in logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Returns the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be persisted.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Removes `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be persisted.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Returns every key currently stored, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// Removes every key.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be persisted.
    fn clear(&self) -> StorageResult<()>;
}
