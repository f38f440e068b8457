//! File-backed credential store sealed with AES-256-GCM.
//!
//! ## Security Model
//!
//! - The whole credential map is serialized and sealed as one blob
//! - File layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`
//! - A fresh random nonce is used for every write
//! - The AEAD key is derived from a 32-byte master key with HKDF-SHA256,
//!   so the master key itself never touches the cipher
//! - Key material is zeroized on drop

use crate::error::{StorageError, StorageResult};
use crate::fsutil::write_atomic;
use crate::secret::{check_item_size, SecretStore, DEFAULT_ITEM_LIMIT};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use parking_lot::RwLock;
use rand::RngCore;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the master key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

const HKDF_INFO: &[u8] = b"uniarr-secret-store-v1";

/// Master key protecting a [`FileSecretStore`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    /// Generates a new random master key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(StorageError::Encryption(format!(
                "invalid key size: expected {KEY_SIZE}, got {}",
                bytes.len()
            )));
        }
        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Loads the key file at `path`, creating it with a fresh key if missing.
    ///
    /// On Unix the file is created with mode `0600`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, written, or has the
    /// wrong length.
    pub fn load_or_create(path: &Path) -> StorageResult<Self> {
        if path.exists() {
            let mut bytes = std::fs::read(path)?;
            let key = Self::from_bytes(&bytes);
            bytes.zeroize();
            return key;
        }

        let key = Self::generate();
        write_key_file(path, &key.bytes)?;
        info!(path = %path.display(), "created credential store master key");
        Ok(key)
    }

    fn derive_cipher(&self) -> StorageResult<Aes256Gcm> {
        let hk = Hkdf::<Sha256>::new(None, &self.bytes);
        let mut okm = [0u8; KEY_SIZE];
        hk.expand(HKDF_INFO, &mut okm)
            .map_err(|_| StorageError::Encryption("HKDF expand failed".to_string()))?;
        let cipher = Aes256Gcm::new_from_slice(&okm)
            .map_err(|_| StorageError::Encryption("invalid AES key".to_string()));
        okm.zeroize();
        cipher
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[cfg(unix)]
fn write_key_file(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn write_key_file(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    write_atomic(path, bytes)
}

/// A credential store persisted to an encrypted file.
///
/// # Example
///
/// ```no_run
/// use uniarr_storage::{FileSecretStore, MasterKey, SecretStore};
/// use std::path::Path;
///
/// let key = MasterKey::load_or_create(Path::new("master.key")).unwrap();
/// let store = FileSecretStore::open(Path::new("secrets.bin"), &key).unwrap();
/// store.set_secret("SecureStorage_service_radarr_creds", "{}").unwrap();
/// ```
pub struct FileSecretStore {
    path: PathBuf,
    cipher: Aes256Gcm,
    items: RwLock<BTreeMap<String, String>>,
    item_limit: usize,
}

impl FileSecretStore {
    /// Opens the store at `path`, decrypting any existing contents.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Encryption`] if the file was sealed with a
    /// different key or has been tampered with.
    pub fn open(path: &Path, key: &MasterKey) -> StorageResult<Self> {
        let cipher = key.derive_cipher()?;

        let items = if path.exists() {
            let sealed = std::fs::read(path)?;
            if sealed.is_empty() {
                BTreeMap::new()
            } else {
                let mut plaintext = open_sealed(&cipher, &sealed)?;
                let items = serde_json::from_slice(&plaintext);
                plaintext.zeroize();
                items?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            cipher,
            items: RwLock::new(items),
            item_limit: DEFAULT_ITEM_LIMIT,
        })
    }

    /// Sets the per-item size limit.
    #[must_use]
    pub fn with_item_limit(mut self, item_limit: usize) -> Self {
        self.item_limit = item_limit;
        self
    }

    fn persist(&self, items: &BTreeMap<String, String>) -> StorageResult<()> {
        let mut plaintext = serde_json::to_vec(items)?;
        let sealed = seal(&self.cipher, &plaintext);
        plaintext.zeroize();
        write_atomic(&self.path, &sealed?)
    }
}

fn seal(cipher: &Aes256Gcm, plaintext: &[u8]) -> StorageResult<Vec<u8>> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| StorageError::Encryption("encryption error".to_string()))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend(ciphertext);
    Ok(result)
}

fn open_sealed(cipher: &Aes256Gcm, sealed: &[u8]) -> StorageResult<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(StorageError::Encryption("ciphertext too short".to_string()));
    }

    let nonce = Nonce::from_slice(&sealed[..NONCE_SIZE]);
    cipher
        .decrypt(nonce, &sealed[NONCE_SIZE..])
        .map_err(|_| StorageError::Encryption("authentication failed".to_string()))
}

impl SecretStore for FileSecretStore {
    fn get_secret(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.items.read().get(key).cloned())
    }

    fn set_secret(&self, key: &str, value: &str) -> StorageResult<()> {
        check_item_size(key, value, self.item_limit)?;
        let mut items = self.items.write();
        items.insert(key.to_string(), value.to_string());
        self.persist(&items)
    }

    fn delete_secret(&self, key: &str) -> StorageResult<()> {
        let mut items = self.items.write();
        if items.remove(key).is_some() {
            self.persist(&items)?;
        }
        Ok(())
    }

    fn item_limit(&self) -> usize {
        self.item_limit
    }
}

impl std::fmt::Debug for FileSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSecretStore")
            .field("path", &self.path)
            .field("items", &self.items.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn secrets_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("secrets.bin");
        let key = MasterKey::generate();

        let store = FileSecretStore::open(&path, &key).unwrap();
        store.set_secret("s3_secret", "abc").unwrap();
        drop(store);

        let store = FileSecretStore::open(&path, &key).unwrap();
        assert_eq!(store.get_secret("s3_secret").unwrap().as_deref(), Some("abc"));
    }

    #[test]
    fn file_does_not_contain_plaintext() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("secrets.bin");

        let store = FileSecretStore::open(&path, &MasterKey::generate()).unwrap();
        store.set_secret("api", "very-secret-token").unwrap();

        let raw = std::fs::read(&path).unwrap();
        let needle = b"very-secret-token";
        assert!(!raw.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn wrong_key_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("secrets.bin");

        let store = FileSecretStore::open(&path, &MasterKey::generate()).unwrap();
        store.set_secret("api", "token").unwrap();

        let result = FileSecretStore::open(&path, &MasterKey::generate());
        assert!(matches!(result, Err(StorageError::Encryption(_))));
    }

    #[test]
    fn item_limit_enforced() {
        let dir = tempdir().unwrap();
        let store = FileSecretStore::open(&dir.path().join("s.bin"), &MasterKey::generate())
            .unwrap()
            .with_item_limit(4);

        assert!(matches!(
            store.set_secret("k", "12345"),
            Err(StorageError::ItemTooLarge { .. })
        ));
    }

    #[test]
    fn master_key_file_is_reused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys").join("master.key");

        let first = MasterKey::load_or_create(&path).unwrap();
        let second = MasterKey::load_or_create(&path).unwrap();
        assert_eq!(first.bytes, second.bytes);
        assert!(MasterKey::from_bytes(&[0u8; 16]).is_err());
    }
}
