//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// The storage file is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// A log record failed its checksum.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the record in the log.
        offset: u64,
        /// Checksum stored with the record.
        expected: u32,
        /// Checksum computed over the record.
        actual: u32,
    },

    /// The store is held by another process.
    #[error("store locked: {0}")]
    Locked(String),

    /// The storage is closed.
    #[error("storage is closed")]
    Closed,

    /// A value exceeds the per-item limit of a credential store.
    #[error("item '{key}' is {size} bytes, limit is {limit}")]
    ItemTooLarge {
        /// Key of the rejected item.
        key: String,
        /// Size of the rejected value in bytes.
        size: usize,
        /// The store's per-item limit in bytes.
        limit: usize,
    },

    /// A persisted document could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Encryption or decryption failed.
    #[error("encryption error: {0}")]
    Encryption(String),
}
