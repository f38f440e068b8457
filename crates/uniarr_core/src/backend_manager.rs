//! Selection of the active key-value backend.
//!
//! The manager probes the fast log-structured store once at startup and
//! falls back to the generic JSON store when the host is sandboxed or the
//! probe fails. A fast store held by another process is an error, not a
//! reason to fall back: writes to the generic store would be invisible once
//! the fast store is free again. Callers only ever see a [`KeyValueStore`].

use crate::config::{AppConfig, HostRuntime};
use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uniarr_storage::{FileBackend, JsonFileStore, KeyValueStore, LogStore};

/// Key written and deleted by the startup self-test.
pub const PROBE_KEY: &str = "__storage_probe__";

/// Builds the fast backend. Invoked at most once per initialization.
pub type FastStoreFactory = Box<dyn Fn() -> CoreResult<Arc<dyn KeyValueStore>> + Send + Sync>;

/// Which backend is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// The fast log-structured store.
    Fast,
    /// The generic JSON-file store.
    Generic,
}

impl BackendKind {
    /// Short name for diagnostics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Default)]
struct BackendState {
    initialized: bool,
    fast: Option<Arc<dyn KeyValueStore>>,
}

/// Single source of truth for the active key-value backend.
pub struct StorageBackendManager {
    runtime: HostRuntime,
    generic: Arc<dyn KeyValueStore>,
    fast_factory: FastStoreFactory,
    state: RwLock<BackendState>,
}

impl StorageBackendManager {
    /// Creates a manager with an explicit generic store and fast factory.
    pub fn new(
        runtime: HostRuntime,
        generic: Arc<dyn KeyValueStore>,
        fast_factory: FastStoreFactory,
    ) -> Self {
        Self {
            runtime,
            generic,
            fast_factory,
            state: RwLock::new(BackendState::default()),
        }
    }

    /// Creates a manager over the stores under `config.data_dir`.
    ///
    /// The fast store is a [`LogStore`] on `uniarr.log`; the generic store is
    /// a [`JsonFileStore`] on `storage.json`.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        let fast_path = config.fast_store_path();
        let factory: FastStoreFactory = Box::new(move || {
            let store: LogStore<FileBackend> = LogStore::open_file(&fast_path)?;
            Ok(Arc::new(store) as Arc<dyn KeyValueStore>)
        });
        Self::new(
            config.host_runtime,
            Arc::new(JsonFileStore::new(config.generic_store_path())),
            factory,
        )
    }

    /// Selects the backend. Idempotent.
    ///
    /// Returns the selected backend kind.
    ///
    /// # Errors
    ///
    /// Returns a storage `Locked` error if the fast store is held by another
    /// process. The manager stays uninitialized. Any other fast-store failure
    /// selects the generic backend instead.
    pub fn initialize(&self) -> CoreResult<BackendKind> {
        let mut state = self.state.write();
        if state.initialized {
            return Ok(Self::kind_of(&state));
        }

        if self.runtime == HostRuntime::Sandboxed {
            info!("sandboxed host runtime detected, using generic storage backend");
        } else {
            match self.try_fast() {
                Ok(store) => {
                    info!(backend = store.name(), "fast storage backend selected");
                    state.fast = Some(store);
                }
                Err(e) if e.is_locked() => {
                    warn!(error = %e, "fast storage backend is in use by another process");
                    return Err(e);
                }
                Err(e) => {
                    warn!(error = %e, "fast storage backend unavailable, falling back to generic backend");
                }
            }
        }

        state.initialized = true;
        Ok(Self::kind_of(&state))
    }

    fn try_fast(&self) -> CoreResult<Arc<dyn KeyValueStore>> {
        let store = (self.fast_factory)()?;
        store.set(PROBE_KEY, "1")?;
        let read_back = store.get(PROBE_KEY)?;
        store.remove(PROBE_KEY)?;
        if read_back.as_deref() != Some("1") {
            return Err(CoreError::invalid_operation(
                "fast backend self-test read back a different value",
            ));
        }
        debug!("fast backend self-test passed");
        Ok(store)
    }

    fn kind_of(state: &BackendState) -> BackendKind {
        if state.fast.is_some() {
            BackendKind::Fast
        } else {
            BackendKind::Generic
        }
    }

    /// Returns the active store.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotInitialized`] before [`Self::initialize`].
    pub fn adapter(&self) -> CoreResult<Arc<dyn KeyValueStore>> {
        let state = self.state.read();
        if !state.initialized {
            return Err(CoreError::NotInitialized);
        }
        Ok(state
            .fast
            .as_ref()
            .map_or_else(|| Arc::clone(&self.generic), Arc::clone))
    }

    /// Returns the active backend kind (generic until initialized).
    #[must_use]
    pub fn backend(&self) -> BackendKind {
        Self::kind_of(&self.state.read())
    }

    /// Returns true if the fast backend is active.
    #[must_use]
    pub fn is_fast(&self) -> bool {
        self.state.read().fast.is_some()
    }

    /// Returns true once [`Self::initialize`] has run.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.read().initialized
    }

    /// Returns the raw fast store, if active.
    #[must_use]
    pub fn fast_handle(&self) -> Option<Arc<dyn KeyValueStore>> {
        self.state.read().fast.clone()
    }

    /// Returns the generic store regardless of the active backend.
    #[must_use]
    pub fn generic_store(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.generic)
    }

    /// Releases the fast handle and resets to the uninitialized state.
    pub fn destroy(&self) {
        let mut state = self.state.write();
        state.fast = None;
        state.initialized = false;
        debug!("storage backend manager reset");
    }
}

impl fmt::Debug for StorageBackendManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("StorageBackendManager")
            .field("runtime", &self.runtime)
            .field("initialized", &state.initialized)
            .field("backend", &Self::kind_of(&state))
            .finish()
    }
}
