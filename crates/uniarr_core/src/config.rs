//! Application configuration.

use std::path::{Path, PathBuf};

/// Environment variable consulted by [`HostRuntime::detect`].
pub const HOST_RUNTIME_ENV: &str = "UNIARR_HOST_RUNTIME";

/// The kind of process hosting UniArr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostRuntime {
    /// A regular host where the fast log-structured store is available.
    #[default]
    Native,
    /// A constrained host (preview sandbox, read-mostly filesystem) where
    /// only the generic store may be used.
    Sandboxed,
}

impl HostRuntime {
    /// Detects the runtime from the `UNIARR_HOST_RUNTIME` environment variable.
    ///
    /// `sandboxed` (case-insensitive) selects [`HostRuntime::Sandboxed`];
    /// anything else, including an unset variable, is native.
    #[must_use]
    pub fn detect() -> Self {
        match std::env::var(HOST_RUNTIME_ENV) {
            Ok(value) => Self::from_name(&value),
            Err(_) => Self::Native,
        }
    }

    fn from_name(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("sandboxed") {
            Self::Sandboxed
        } else {
            Self::Native
        }
    }
}

/// Configuration shared by every UniArr service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory holding the stores and credential files.
    pub data_dir: PathBuf,

    /// Directory where backup files are written.
    pub backup_dir: PathBuf,

    /// Host runtime used for backend selection.
    pub host_runtime: HostRuntime,

    /// Number of keys copied per migration batch.
    pub migration_batch_size: usize,

    /// Maximum number of network scan history entries kept.
    pub scan_history_cap: usize,

    /// Maximum number of recent IP entries kept.
    pub recent_ip_cap: usize,

    /// Serialized credential length (chars) above which a warning is logged.
    pub credential_warn_threshold: usize,

    /// Per-item byte limit of the credential store.
    pub secret_item_limit: usize,

    /// PBKDF2 iterations used when encrypting backups.
    pub kdf_iterations: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new("uniarr-data")
    }
}

impl AppConfig {
    /// Creates a configuration rooted at `data_dir` with default values.
    ///
    /// Backups go to `<data_dir>/backups`.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            backup_dir: data_dir.join("backups"),
            data_dir,
            host_runtime: HostRuntime::Native,
            migration_batch_size: 100,
            scan_history_cap: 20,
            recent_ip_cap: 10,
            credential_warn_threshold: 1800,
            secret_item_limit: uniarr_storage::DEFAULT_ITEM_LIMIT,
            kdf_iterations: 100_000,
        }
    }

    /// Sets the backup directory.
    #[must_use]
    pub fn backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = dir.into();
        self
    }

    /// Sets the host runtime.
    #[must_use]
    pub const fn host_runtime(mut self, runtime: HostRuntime) -> Self {
        self.host_runtime = runtime;
        self
    }

    /// Sets the migration batch size.
    #[must_use]
    pub const fn migration_batch_size(mut self, size: usize) -> Self {
        self.migration_batch_size = size;
        self
    }

    /// Sets the network scan history cap.
    #[must_use]
    pub const fn scan_history_cap(mut self, cap: usize) -> Self {
        self.scan_history_cap = cap;
        self
    }

    /// Sets the recent IP cap.
    #[must_use]
    pub const fn recent_ip_cap(mut self, cap: usize) -> Self {
        self.recent_ip_cap = cap;
        self
    }

    /// Sets the credential store item limit.
    #[must_use]
    pub const fn secret_item_limit(mut self, limit: usize) -> Self {
        self.secret_item_limit = limit;
        self
    }

    /// Sets the PBKDF2 iteration count for backup encryption.
    #[must_use]
    pub const fn kdf_iterations(mut self, iterations: u32) -> Self {
        self.kdf_iterations = iterations;
        self
    }

    /// Path of the fast log-structured store.
    #[must_use]
    pub fn fast_store_path(&self) -> PathBuf {
        self.data_dir.join("uniarr.log")
    }

    /// Path of the generic JSON store.
    #[must_use]
    pub fn generic_store_path(&self) -> PathBuf {
        self.data_dir.join("storage.json")
    }

    /// Path of the encrypted credential file.
    #[must_use]
    pub fn secrets_path(&self) -> PathBuf {
        self.data_dir.join("secrets.bin")
    }

    /// Path of the credential store master key.
    #[must_use]
    pub fn master_key_path(&self) -> PathBuf {
        self.data_dir.join("master.key")
    }

    /// Returns the data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = AppConfig::new("/tmp/uniarr");
        assert_eq!(config.backup_dir, PathBuf::from("/tmp/uniarr/backups"));
        assert_eq!(config.migration_batch_size, 100);
        assert_eq!(config.scan_history_cap, 20);
        assert_eq!(config.recent_ip_cap, 10);
        assert_eq!(config.secret_item_limit, 2048);
        assert_eq!(config.host_runtime, HostRuntime::Native);
    }

    #[test]
    fn builder_pattern() {
        let config = AppConfig::new("data")
            .host_runtime(HostRuntime::Sandboxed)
            .kdf_iterations(1_000)
            .recent_ip_cap(3);

        assert_eq!(config.host_runtime, HostRuntime::Sandboxed);
        assert_eq!(config.kdf_iterations, 1_000);
        assert_eq!(config.recent_ip_cap, 3);
    }

    #[test]
    fn runtime_names() {
        assert_eq!(HostRuntime::from_name("sandboxed"), HostRuntime::Sandboxed);
        assert_eq!(HostRuntime::from_name(" Sandboxed "), HostRuntime::Sandboxed);
        assert_eq!(HostRuntime::from_name("native"), HostRuntime::Native);
        assert_eq!(HostRuntime::from_name(""), HostRuntime::Native);
    }
}
