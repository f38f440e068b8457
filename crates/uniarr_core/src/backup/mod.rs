//! Backup and restore.
//!
//! A backup is a [`BackupDocument`]: a versioned JSON envelope whose
//! `appData` object holds one entry per [`BackupSection`]. Sensitive
//! sections can be encrypted as a single `encryptedData` string with a
//! password-derived AES-256-GCM key.
//!
//! ```text
//! {
//!   "version": "1.2",
//!   "timestamp": "2024-05-01T08:00:00Z",
//!   "encrypted": true,
//!   "encryptionInfo": { "algorithm": "AES-256-GCM-PBKDF2", "salt": "..", "iv": "..", "iterations": 100000 },
//!   "appData": { "serviceConfigs": [..], "encryptedData": ".." }
//! }
//! ```

pub mod crypto;
mod document;
mod files;
mod options;
pub mod sections;
mod service;

pub use document::{BackupDocument, BackupVersion, EncryptionInfo, ENCRYPTED_DATA};
pub use files::{
    file_name, file_name_date, is_backup_file_name, BackupFileInfo, BackupFiles, CopyShareSink,
    DocumentPicker, FixedPathPicker, ShareSink, AUTOMATIC_DIR, FILE_EXTENSION, FILE_PREFIX,
};
pub use options::{BackupCategory, BackupOptions, RestoreOptions};
pub use sections::{BackupSection, SectionContext, SectionPayload, SectionRegistry};
pub use service::{
    BackupArtifact, BackupProgress, BackupRestoreService, BackupSummary, RestoreReport,
    SectionFailure, UploadRequest,
};
