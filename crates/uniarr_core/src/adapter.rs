//! A key-value façade usable before backend detection completes.

use crate::backend_manager::{BackendKind, StorageBackendManager};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;
use uniarr_storage::{KeyValueStore, StorageResult};

/// Routes every call to the active backend.
///
/// Until the manager is initialized, calls go to the generic store and a
/// single warning is logged.
#[derive(Debug)]
pub struct StorageAdapter {
    manager: Arc<StorageBackendManager>,
    warned: AtomicBool,
}

impl StorageAdapter {
    /// Creates an adapter over `manager`.
    #[must_use]
    pub fn new(manager: Arc<StorageBackendManager>) -> Self {
        Self {
            manager,
            warned: AtomicBool::new(false),
        }
    }

    fn store(&self) -> Arc<dyn KeyValueStore> {
        if let Ok(store) = self.manager.adapter() {
            return store;
        }
        if !self.warned.swap(true, Ordering::Relaxed) {
            warn!("storage used before backend initialization, using generic backend");
        }
        self.manager.generic_store()
    }

    /// Returns the active backend kind.
    #[must_use]
    pub fn backend_type(&self) -> BackendKind {
        self.manager.backend()
    }

    /// Returns true if the fast backend is active.
    #[must_use]
    pub fn is_using_fast(&self) -> bool {
        self.manager.is_fast()
    }

    /// Returns the underlying manager.
    #[must_use]
    pub fn manager(&self) -> &Arc<StorageBackendManager> {
        &self.manager
    }
}

impl KeyValueStore for StorageAdapter {
    fn name(&self) -> &'static str {
        self.store().name()
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.store().get(key)
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.store().set(key, value)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.store().remove(key)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.store().keys()
    }

    fn clear(&self) -> StorageResult<()> {
        self.store().clear()
    }
}
