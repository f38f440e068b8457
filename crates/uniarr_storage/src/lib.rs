//! # UniArr Storage
//!
//! Persistence primitives for UniArr.
//!
//! This crate is the lowest layer of the workspace. It knows nothing about
//! services, backups or settings; it only stores strings and bytes.
//!
//! ## Layers
//!
//! - [`StorageBackend`] - append-only byte stores ([`FileBackend`],
//!   [`InMemoryBackend`])
//! - [`KeyValueStore`] - the contract every key-value backend satisfies:
//!   - [`LogStore`] - fast log-structured store over a byte store
//!   - [`JsonFileStore`] - generic fallback, one JSON file
//!   - [`MemoryStore`] - in-process map
//! - [`SecretStore`] - keychain-style credential storage with a per-item
//!   size limit ([`MemorySecretStore`], [`FileSecretStore`])
//!
//! ## Example
//!
//! ```rust
//! use uniarr_storage::{InMemoryBackend, KeyValueStore, LogStore};
//!
//! let store = LogStore::open(InMemoryBackend::new()).unwrap();
//! store.set("SettingsStore:v1", "{}").unwrap();
//! assert_eq!(store.keys().unwrap(), vec!["SettingsStore:v1"]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod crc;
mod encrypted;
mod error;
mod file;
mod fsutil;
mod json_store;
mod kv;
mod log_store;
mod memory;
mod secret;

pub use backend::StorageBackend;
pub use crc::crc32;
pub use encrypted::{FileSecretStore, MasterKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use json_store::JsonFileStore;
pub use kv::KeyValueStore;
pub use log_store::{LogStore, DEFAULT_COMPACTION_MIN_BYTES};
pub use memory::{InMemoryBackend, MemoryStore};
pub use secret::{MemorySecretStore, SecretStore, DEFAULT_ITEM_LIMIT};
