//! One-time copy of the generic store into the fast backend.
//!
//! The migration runs at most once per data directory: completion is
//! recorded by [`MIGRATION_FLAG_KEY`] in the fast store, and the flag is set
//! even when individual keys fail so a bad entry cannot keep the migration
//! running on every start. The generic store is left untouched until
//! [`StorageMigrator::cleanup_generic`] is called explicitly.

use crate::backend_manager::{StorageBackendManager, PROBE_KEY};
use crate::error::CoreResult;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uniarr_storage::KeyValueStore;

/// Flag key written to the fast store once the migration has run.
pub const MIGRATION_FLAG_KEY: &str = "__storage_migration_complete__";

/// Default number of keys copied per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// A key that could not be copied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFailure {
    /// The key.
    pub key: String,
    /// Error message.
    pub message: String,
}

/// Outcome of [`StorageMigrator::perform`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// True if no key failed.
    pub success: bool,
    /// Keys copied.
    pub items_migrated: usize,
    /// Keys found in the generic store.
    pub total_keys: usize,
    /// Keys that failed.
    pub errors: Vec<MigrationFailure>,
    /// True if nothing was attempted (fast backend inactive or already done).
    pub skipped: bool,
}

impl MigrationReport {
    fn skipped() -> Self {
        Self {
            success: true,
            skipped: true,
            ..Self::default()
        }
    }
}

/// Migration state as recorded in the fast store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    /// The flag is absent, or the fast backend is inactive.
    NotStarted,
    /// The flag is set.
    Done,
}

/// Copies keys from the generic store into the fast store.
#[derive(Debug)]
pub struct StorageMigrator {
    manager: Arc<StorageBackendManager>,
    batch_size: usize,
}

impl StorageMigrator {
    /// Creates a migrator with the default batch size.
    #[must_use]
    pub fn new(manager: Arc<StorageBackendManager>) -> Self {
        Self {
            manager,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Sets the batch size. Zero is treated as one.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Returns the recorded state.
    ///
    /// # Errors
    ///
    /// Returns an error if the flag cannot be read.
    pub fn status(&self) -> CoreResult<MigrationStatus> {
        let Some(fast) = self.manager.fast_handle() else {
            return Ok(MigrationStatus::NotStarted);
        };
        Ok(if fast.get(MIGRATION_FLAG_KEY)?.is_some() {
            MigrationStatus::Done
        } else {
            MigrationStatus::NotStarted
        })
    }

    /// Copies every generic key into the fast store and sets the flag.
    ///
    /// A no-op when the fast backend is inactive or the flag is already
    /// set. Per-key failures are collected, not raised.
    ///
    /// # Errors
    ///
    /// Returns an error if the generic keys cannot be listed or the flag
    /// cannot be read or written.
    pub fn perform(&self) -> CoreResult<MigrationReport> {
        let Some(fast) = self.manager.fast_handle() else {
            debug!("fast backend inactive, skipping storage migration");
            return Ok(MigrationReport::skipped());
        };
        if fast.get(MIGRATION_FLAG_KEY)?.is_some() {
            debug!("storage migration already complete");
            return Ok(MigrationReport::skipped());
        }

        let generic = self.manager.generic_store();
        let keys: Vec<String> = generic
            .keys()?
            .into_iter()
            .filter(|k| k != MIGRATION_FLAG_KEY && k != PROBE_KEY)
            .collect();

        let mut report = MigrationReport {
            total_keys: keys.len(),
            ..MigrationReport::default()
        };

        for (index, batch) in keys.chunks(self.batch_size).enumerate() {
            for key in batch {
                match copy_key(generic.as_ref(), fast.as_ref(), key) {
                    Ok(true) => report.items_migrated += 1,
                    Ok(false) => {}
                    Err(message) => {
                        warn!(key, error = %message, "failed to migrate key");
                        report.errors.push(MigrationFailure {
                            key: key.clone(),
                            message,
                        });
                    }
                }
            }
            debug!(batch = index, size = batch.len(), "migrated batch");
        }

        fast.set(MIGRATION_FLAG_KEY, "true")?;
        report.success = report.errors.is_empty();

        info!(
            migrated = report.items_migrated,
            total = report.total_keys,
            failed = report.errors.len(),
            "storage migration finished"
        );
        Ok(report)
    }

    /// Removes every key from the generic store and returns how many there
    /// were.
    ///
    /// # Errors
    ///
    /// Returns an error if the generic store cannot be listed or cleared.
    pub fn cleanup_generic(&self) -> CoreResult<usize> {
        let generic = self.manager.generic_store();
        let count = generic.keys()?.len();
        generic.clear()?;
        info!(removed = count, "generic storage cleared");
        Ok(count)
    }

    /// Deletes the completion flag so the next [`Self::perform`] runs again.
    ///
    /// # Errors
    ///
    /// Returns an error if the flag cannot be removed.
    pub fn reset_flag(&self) -> CoreResult<()> {
        if let Some(fast) = self.manager.fast_handle() {
            fast.remove(MIGRATION_FLAG_KEY)?;
            debug!("storage migration flag reset");
        }
        Ok(())
    }
}

/// Returns `Ok(false)` if the key vanished before it could be read.
fn copy_key(from: &dyn KeyValueStore, to: &dyn KeyValueStore, key: &str) -> Result<bool, String> {
    let value = from.get(key).map_err(|e| e.to_string())?;
    let Some(value) = value else {
        return Ok(false);
    };
    to.set(key, &value).map_err(|e| e.to_string())?;
    Ok(true)
}
