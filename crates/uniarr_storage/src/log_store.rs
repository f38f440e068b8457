//! Log-structured key-value store.
//!
//! This is the fast native backend. Every mutation is appended to a byte
//! store as one record; the full map lives in memory and is rebuilt by
//! replaying the log on open.
//!
//! ## Record Format
//!
//! ```text
//! | op (1) | key_len (4) | value_len (4) | key | value | crc32 (4) |
//! ```
//!
//! Integers are little-endian. The CRC covers every byte before it.
//!
//! ## Recovery Policy
//!
//! - A record cut short at the tail (crash mid-append) is discarded and the
//!   log is truncated to the last complete record.
//! - A CRC mismatch or an unknown op byte is fatal: the store refuses to open.
//!
//! ## Compaction
//!
//! Overwritten and removed entries leave dead bytes behind. Once dead bytes
//! exceed half of the log (and the log is past a minimum size), the live
//! entries are rewritten through [`StorageBackend::replace`].

use crate::backend::StorageBackend;
use crate::crc::crc32;
use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use crate::kv::KeyValueStore;
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::Path;
use tracing::{debug, warn};

const HEADER_SIZE: usize = 1 + 4 + 4;
const CRC_SIZE: usize = 4;

/// Default minimum log size before compaction is considered (64 KiB).
pub const DEFAULT_COMPACTION_MIN_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Op {
    Put = 1,
    Delete = 2,
}

impl Op {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Op::Put),
            2 => Some(Op::Delete),
            _ => None,
        }
    }
}

fn encode_record(op: Op, key: &str, value: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + key.len() + value.len() + CRC_SIZE);
    buf.push(op as u8);
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(value.as_bytes());
    let crc = crc32(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

fn record_len(key: &str, value: &str) -> u64 {
    (HEADER_SIZE + key.len() + value.len() + CRC_SIZE) as u64
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Outcome of replaying a log buffer.
struct Replay {
    index: BTreeMap<String, String>,
    /// Offset just past the last complete record.
    valid_len: u64,
}

fn replay(data: &[u8]) -> StorageResult<Replay> {
    let mut index = BTreeMap::new();
    let mut offset = 0usize;

    while offset < data.len() {
        if data.len() - offset < HEADER_SIZE {
            break;
        }

        let header = &data[offset..offset + HEADER_SIZE];
        let op = Op::from_byte(header[0]).ok_or_else(|| {
            StorageError::Corrupted(format!("unknown op {} at offset {offset}", header[0]))
        })?;
        let key_len = read_u32(&header[1..5]) as usize;
        let value_len = read_u32(&header[5..9]) as usize;

        let body_end = offset + HEADER_SIZE + key_len + value_len;
        let record_end = body_end + CRC_SIZE;
        if record_end > data.len() {
            break;
        }

        let expected = read_u32(&data[body_end..record_end]);
        let actual = crc32(&data[offset..body_end]);
        if expected != actual {
            return Err(StorageError::ChecksumMismatch {
                offset: offset as u64,
                expected,
                actual,
            });
        }

        let key_start = offset + HEADER_SIZE;
        let key = std::str::from_utf8(&data[key_start..key_start + key_len])
            .map_err(|e| StorageError::Corrupted(format!("key at offset {offset}: {e}")))?;
        let value = std::str::from_utf8(&data[key_start + key_len..body_end])
            .map_err(|e| StorageError::Corrupted(format!("value at offset {offset}: {e}")))?;

        match op {
            Op::Put => {
                index.insert(key.to_string(), value.to_string());
            }
            Op::Delete => {
                index.remove(key);
            }
        }

        offset = record_end;
    }

    Ok(Replay {
        index,
        valid_len: offset as u64,
    })
}

struct LogState<B> {
    backend: B,
    index: BTreeMap<String, String>,
    /// Bytes occupied by the records that produced the current index.
    live_bytes: u64,
}

/// A log-structured key-value store over any [`StorageBackend`].
///
/// # Example
///
/// ```rust
/// use uniarr_storage::{InMemoryBackend, KeyValueStore, LogStore};
///
/// let store = LogStore::open(InMemoryBackend::new()).unwrap();
/// store.set("theme", "dark").unwrap();
/// assert_eq!(store.get("theme").unwrap().as_deref(), Some("dark"));
/// ```
pub struct LogStore<B: StorageBackend> {
    state: Mutex<LogState<B>>,
    compaction_min_bytes: u64,
    _lock_file: Option<File>,
}

impl<B: StorageBackend> LogStore<B> {
    /// Opens a store by replaying `backend`.
    ///
    /// # Errors
    ///
    /// Returns an error if the log is corrupted or cannot be read.
    pub fn open(backend: B) -> StorageResult<Self> {
        Self::open_inner(backend, None)
    }

    fn open_inner(mut backend: B, lock_file: Option<File>) -> StorageResult<Self> {
        let size = backend.size()?;
        let data = backend.read_at(0, size as usize)?;
        let replayed = replay(&data)?;

        if replayed.valid_len < size {
            warn!(
                discarded = size - replayed.valid_len,
                "discarding torn record at end of key-value log"
            );
            backend.truncate(replayed.valid_len)?;
        }

        let live_bytes = replayed
            .index
            .iter()
            .map(|(k, v)| record_len(k, v))
            .sum();

        debug!(
            entries = replayed.index.len(),
            log_bytes = replayed.valid_len,
            "key-value log replayed"
        );

        Ok(Self {
            state: Mutex::new(LogState {
                backend,
                index: replayed.index,
                live_bytes,
            }),
            compaction_min_bytes: DEFAULT_COMPACTION_MIN_BYTES,
            _lock_file: lock_file,
        })
    }

    /// Sets the minimum log size before compaction is considered.
    #[must_use]
    pub fn with_compaction_min_bytes(mut self, bytes: u64) -> Self {
        self.compaction_min_bytes = bytes;
        self
    }

    /// Returns the current log size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn log_size(&self) -> StorageResult<u64> {
        self.state.lock().backend.size()
    }

    /// Rewrites the log so that it only holds live entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the new log cannot be written.
    pub fn compact(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        Self::compact_locked(&mut state)
    }

    /// Syncs the log to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&self) -> StorageResult<()> {
        self.state.lock().backend.sync()
    }

    fn compact_locked(state: &mut LogState<B>) -> StorageResult<()> {
        let before = state.backend.size()?;
        let mut buf = Vec::with_capacity(state.live_bytes as usize);
        for (key, value) in &state.index {
            buf.extend_from_slice(&encode_record(Op::Put, key, value));
        }
        state.backend.replace(&buf)?;
        state.live_bytes = buf.len() as u64;
        debug!(before, after = buf.len(), "key-value log compacted");
        Ok(())
    }

    fn append_locked(state: &mut LogState<B>, record: &[u8]) -> StorageResult<()> {
        state.backend.append(record)?;
        state.backend.flush()
    }

    /// Compacts once the index reflects the latest record.
    fn maybe_compact_locked(&self, state: &mut LogState<B>) -> StorageResult<()> {
        let size = state.backend.size()?;
        let dead = size.saturating_sub(state.live_bytes);
        if size >= self.compaction_min_bytes && dead > size / 2 {
            Self::compact_locked(state)?;
        }
        Ok(())
    }
}

impl LogStore<FileBackend> {
    /// Opens a file-backed store at `path`.
    ///
    /// Holds an exclusive advisory lock on `<path>.lock` for the lifetime of
    /// the store, so two processes never append to the same log.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the log, or
    /// an error if the log cannot be opened or replayed.
    pub fn open_file(path: &Path) -> StorageResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path)?;

        let mut lock_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(lock_path.display().to_string()));
        }

        Self::open_inner(backend, Some(lock_file))
    }
}

impl<B: StorageBackend> KeyValueStore for LogStore<B> {
    fn name(&self) -> &'static str {
        "log"
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.state.lock().index.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let record = encode_record(Op::Put, key, value);
        let mut state = self.state.lock();
        Self::append_locked(&mut state, &record)?;

        if let Some(old) = state.index.insert(key.to_string(), value.to_string()) {
            state.live_bytes -= record_len(key, &old);
        }
        state.live_bytes += record.len() as u64;
        self.maybe_compact_locked(&mut state)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut state = self.state.lock();
        if !state.index.contains_key(key) {
            return Ok(());
        }

        let record = encode_record(Op::Delete, key, "");
        Self::append_locked(&mut state, &record)?;
        if let Some(old) = state.index.remove(key) {
            state.live_bytes -= record_len(key, &old);
        }
        self.maybe_compact_locked(&mut state)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.state.lock().index.keys().cloned().collect())
    }

    fn clear(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.backend.replace(&[])?;
        state.index.clear();
        state.live_bytes = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn reopen(store: LogStore<InMemoryBackend>) -> LogStore<InMemoryBackend> {
        let data = store.state.into_inner().backend.data();
        LogStore::open(InMemoryBackend::with_data(data)).unwrap()
    }

    #[test]
    fn set_get_remove() {
        let store = LogStore::open(InMemoryBackend::new()).unwrap();
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        store.remove("a").unwrap();
        store.remove("missing").unwrap();

        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.get("b").unwrap().as_deref(), Some("2"));
        assert_eq!(store.keys().unwrap(), vec!["b"]);
    }

    #[test]
    fn replay_restores_state() {
        let store = LogStore::open(InMemoryBackend::new()).unwrap();
        store.set("SettingsStore:v1", r#"{"state":{}}"#).unwrap();
        store.set("download-store", "x").unwrap();
        store.set("download-store", "y").unwrap();
        store.remove("SettingsStore:v1").unwrap();

        let store = reopen(store);
        assert_eq!(store.keys().unwrap(), vec!["download-store"]);
        assert_eq!(store.get("download-store").unwrap().as_deref(), Some("y"));
    }

    #[test]
    fn torn_tail_is_discarded() {
        let mut data = encode_record(Op::Put, "kept", "value");
        let torn = encode_record(Op::Put, "lost", "value");
        data.extend_from_slice(&torn[..torn.len() - 3]);

        let store = LogStore::open(InMemoryBackend::with_data(data)).unwrap();
        assert_eq!(store.keys().unwrap(), vec!["kept"]);
        assert_eq!(store.log_size().unwrap(), record_len("kept", "value"));
    }

    #[test]
    fn checksum_mismatch_is_fatal() {
        let mut data = encode_record(Op::Put, "key", "value");
        data[HEADER_SIZE] ^= 0xFF;

        let result = LogStore::open(InMemoryBackend::with_data(data));
        assert!(matches!(result, Err(StorageError::ChecksumMismatch { .. })));
    }

    #[test]
    fn unknown_op_is_fatal() {
        for op in [3, 9] {
            let mut data = encode_record(Op::Put, "key", "value");
            data[0] = op;

            let result = LogStore::open(InMemoryBackend::with_data(data));
            assert!(matches!(result, Err(StorageError::Corrupted(_))));
        }
    }

    #[test]
    fn overwrites_trigger_compaction() {
        let store = LogStore::open(InMemoryBackend::new())
            .unwrap()
            .with_compaction_min_bytes(256);

        for i in 0..100 {
            store.set("counter", &i.to_string()).unwrap();
        }

        assert!(store.log_size().unwrap() < 256);
        let store = reopen(store);
        assert_eq!(store.get("counter").unwrap().as_deref(), Some("99"));
    }

    #[test]
    fn clear_empties_log() {
        let store = LogStore::open(InMemoryBackend::new()).unwrap();
        store.set("a", "1").unwrap();
        store.clear().unwrap();

        assert_eq!(store.log_size().unwrap(), 0);
        assert!(reopen(store).keys().unwrap().is_empty());
    }

    #[test]
    fn file_store_is_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.log");

        let store = LogStore::open_file(&path).unwrap();
        store.set("k", "v").unwrap();

        assert!(matches!(
            LogStore::open_file(&path),
            Err(StorageError::Locked(_))
        ));

        drop(store);
        let store = LogStore::open_file(&path).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    #[derive(Debug, Clone)]
    enum Action {
        Set(String, String),
        Remove(String),
    }

    fn action() -> impl Strategy<Value = Action> {
        let key = "[a-d]{1,2}";
        prop_oneof![
            (key, ".{0,12}").prop_map(|(k, v)| Action::Set(k, v)),
            key.prop_map(Action::Remove),
        ]
    }

    proptest! {
        #[test]
        fn replay_matches_model(actions in proptest::collection::vec(action(), 0..60)) {
            let store = LogStore::open(InMemoryBackend::new())
                .unwrap()
                .with_compaction_min_bytes(128);
            let mut model = BTreeMap::new();

            for action in actions {
                match action {
                    Action::Set(k, v) => {
                        store.set(&k, &v).unwrap();
                        model.insert(k, v);
                    }
                    Action::Remove(k) => {
                        store.remove(&k).unwrap();
                        model.remove(&k);
                    }
                }
            }

            let store = reopen(store);
            let replayed: BTreeMap<_, _> = store
                .keys()
                .unwrap()
                .into_iter()
                .map(|k| {
                    let v = store.get(&k).unwrap().unwrap();
                    (k, v)
                })
                .collect();
            prop_assert_eq!(replayed, model);
        }
    }
}
