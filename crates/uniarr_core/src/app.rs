//! Wiring of the storage and backup services for one data directory.

use crate::adapter::StorageAdapter;
use crate::backend_manager::{BackendKind, StorageBackendManager};
use crate::backup::BackupRestoreService;
use crate::config::AppConfig;
use crate::error::CoreResult;
use crate::migration::{MigrationReport, StorageMigrator};
use crate::scheduler::{JobHost, ObjectUploader, S3BackupScheduler};
use crate::secure_storage::SecureStorage;
use crate::settings::SettingsAccess;
use std::fs;
use std::sync::Arc;
use tracing::{info, warn};
use uniarr_storage::{FileSecretStore, KeyValueStore, MasterKey, SecretStore};

/// Every service of the subsystem, opened over one data directory.
///
/// Opening selects the backend and runs the storage migration before any
/// state is read.
pub struct AppContext {
    config: AppConfig,
    manager: Arc<StorageBackendManager>,
    store: Arc<dyn KeyValueStore>,
    secure: Arc<SecureStorage>,
    backups: Arc<BackupRestoreService>,
    migration: MigrationReport,
}

impl AppContext {
    /// Opens the data directory described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory, master key or credential store
    /// cannot be opened, if another process has the directory open (see
    /// [`crate::CoreError::is_locked`]), or if the migration cannot record
    /// its flag.
    pub fn open(config: AppConfig) -> CoreResult<Self> {
        fs::create_dir_all(config.data_dir())?;

        let manager = Arc::new(StorageBackendManager::from_config(&config));
        let backend = manager.initialize()?;

        let migration = StorageMigrator::new(Arc::clone(&manager))
            .with_batch_size(config.migration_batch_size)
            .perform()?;
        if !migration.success {
            warn!(
                failed = migration.errors.len(),
                "storage migration finished with errors"
            );
        }

        let store: Arc<dyn KeyValueStore> = Arc::new(StorageAdapter::new(Arc::clone(&manager)));

        let key = MasterKey::load_or_create(&config.master_key_path())?;
        let secrets: Arc<dyn SecretStore> = Arc::new(
            FileSecretStore::open(&config.secrets_path(), &key)?
                .with_item_limit(config.secret_item_limit),
        );
        let secure = Arc::new(SecureStorage::new(Arc::clone(&store), secrets, &config));
        let backups = Arc::new(BackupRestoreService::new(
            Arc::clone(&store),
            Arc::clone(&secure),
            &config,
        ));

        info!(
            data_dir = %config.data_dir().display(),
            %backend,
            "uniarr storage opened"
        );
        Ok(Self {
            config,
            manager,
            store,
            secure,
            backups,
            migration,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Returns the backend manager.
    #[must_use]
    pub fn manager(&self) -> &Arc<StorageBackendManager> {
        &self.manager
    }

    /// Returns the active backend.
    #[must_use]
    pub fn backend(&self) -> BackendKind {
        self.manager.backend()
    }

    /// Returns the key-value store every service reads from.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Returns the service config storage.
    #[must_use]
    pub fn secure(&self) -> &Arc<SecureStorage> {
        &self.secure
    }

    /// Returns the backup service.
    #[must_use]
    pub fn backups(&self) -> &Arc<BackupRestoreService> {
        &self.backups
    }

    /// Returns the settings accessor.
    #[must_use]
    pub fn settings(&self) -> SettingsAccess {
        SettingsAccess::new(Arc::clone(&self.store))
    }

    /// Returns the report of the migration run at open.
    #[must_use]
    pub fn migration_report(&self) -> &MigrationReport {
        &self.migration
    }

    /// Returns a migrator over this directory's backends.
    #[must_use]
    pub fn migrator(&self) -> StorageMigrator {
        StorageMigrator::new(Arc::clone(&self.manager))
            .with_batch_size(self.config.migration_batch_size)
    }

    /// Creates a backup scheduler running on `host` and uploading through
    /// `uploader`.
    #[must_use]
    pub fn scheduler(
        &self,
        host: Arc<dyn JobHost>,
        uploader: Arc<dyn ObjectUploader>,
    ) -> Arc<S3BackupScheduler> {
        Arc::new(S3BackupScheduler::new(
            Arc::clone(&self.backups),
            self.settings(),
            Arc::clone(&self.secure),
            host,
            uploader,
        ))
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("data_dir", &self.config.data_dir())
            .field("backend", &self.backend())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostRuntime;
    use crate::types::{ServiceConfig, ServiceType};
    use tempfile::tempdir;

    #[test]
    fn reopen_keeps_services_and_credentials() {
        let dir = tempdir().unwrap();
        let id = {
            let app = AppContext::open(AppConfig::new(dir.path())).unwrap();
            assert_eq!(app.backend(), BackendKind::Fast);
            let config = ServiceConfig::new(ServiceType::Sonarr, "Sonarr", "http://nas:8989")
                .with_api_key("sonarr-key");
            app.secure().save_service_config(&config).unwrap().id
        };

        let app = AppContext::open(AppConfig::new(dir.path())).unwrap();
        let config = app.secure().service_config(&id).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("sonarr-key"));
        assert!(app.migration_report().skipped);
    }

    #[test]
    fn second_open_while_held_is_refused() {
        let dir = tempdir().unwrap();
        let first = AppContext::open(AppConfig::new(dir.path())).unwrap();
        assert_eq!(first.backend(), BackendKind::Fast);

        let err = AppContext::open(AppConfig::new(dir.path())).unwrap_err();
        assert!(err.is_locked());
        assert!(!dir.path().join("storage.json").exists());

        let config = ServiceConfig::new(ServiceType::Radarr, "Radarr", "http://nas:7878");
        let id = first.secure().save_service_config(&config).unwrap().id;
        drop(first);

        let reopened = AppContext::open(AppConfig::new(dir.path())).unwrap();
        assert_eq!(reopened.backend(), BackendKind::Fast);
        assert!(reopened.secure().service_config(&id).is_some());
    }

    #[test]
    fn sandboxed_uses_generic_backend() {
        let dir = tempdir().unwrap();
        let app = AppContext::open(
            AppConfig::new(dir.path()).host_runtime(HostRuntime::Sandboxed),
        )
        .unwrap();
        assert_eq!(app.backend(), BackendKind::Generic);
        app.store().set("k", "v").unwrap();
        assert!(dir.path().join("storage.json").exists());
    }
}
