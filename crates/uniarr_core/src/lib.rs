//! # UniArr Core
//!
//! Service credentials, storage backend selection, backup/restore and
//! scheduled uploads for UniArr.
//!
//! This crate provides:
//! - [`StorageBackendManager`] and [`StorageAdapter`] to pick between the
//!   fast log store and the generic JSON store
//! - [`StorageMigrator`] for the one-time copy between them
//! - [`SecureStorage`] for service configs with credentials kept apart
//! - [`BackupRestoreService`] for versioned, optionally encrypted backups
//! - [`S3BackupScheduler`] for recurring uploads
//!
//! [`AppContext`] opens all of them over one data directory.
//!
//! ## Example
//!
//! ```rust,no_run
//! use uniarr_core::{AppConfig, AppContext, BackupOptions};
//!
//! let app = AppContext::open(AppConfig::new("uniarr-data"))?;
//! let doc = app
//!     .backups()
//!     .create_selective_backup(&BackupOptions::all().encrypted("correct-horse-battery"))?;
//! let path = app.backups().files().write(&doc)?;
//! println!("backup written to {}", path.display());
//! # Ok::<(), uniarr_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod app;
mod backend_manager;
pub mod backup;
mod config;
mod error;
mod migration;
pub mod scheduler;
mod secure_storage;
mod settings;
mod types;

pub use adapter::StorageAdapter;
pub use app::AppContext;
pub use backend_manager::{BackendKind, FastStoreFactory, StorageBackendManager, PROBE_KEY};
pub use backup::{
    BackupArtifact, BackupCategory, BackupDocument, BackupOptions, BackupProgress,
    BackupRestoreService, BackupSummary, BackupVersion, RestoreOptions, RestoreReport,
};
pub use config::{AppConfig, HostRuntime, HOST_RUNTIME_ENV};
pub use error::{CoreError, CoreResult};
pub use migration::{
    MigrationFailure, MigrationReport, MigrationStatus, StorageMigrator, DEFAULT_BATCH_SIZE,
    MIGRATION_FLAG_KEY,
};
pub use scheduler::{
    DirectoryUploader, JobHost, JobOutcome, ManualJobHost, ObjectUploader, S3BackupScheduler,
    S3Target, SchedulerState, TokioJobHost, TASK_NAME,
};
pub use secure_storage::SecureStorage;
pub use settings::{AutoBackupSettings, BackupFrequency, SettingsAccess, SETTINGS_KEY};
pub use types::{
    NetworkScanHistoryEntry, RecentIp, S3Credentials, ServiceConfig, ServiceCredentials,
    ServiceRecord, ServiceType,
};
