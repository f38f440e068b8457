//! Producing and consuming backup documents.

use super::crypto::{self, DEFAULT_ITERATIONS};
use super::document::{BackupDocument, BackupVersion, ENCRYPTED_DATA};
use super::files::{file_name, BackupFiles, DocumentPicker};
use super::options::{BackupOptions, RestoreOptions};
use super::sections::{SectionContext, SectionRegistry};
use crate::config::AppConfig;
use crate::error::{CoreError, CoreResult};
use crate::scheduler::upload::{ObjectUploader, S3Target};
use crate::secure_storage::SecureStorage;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uniarr_storage::KeyValueStore;

/// Stage reported by [`BackupRestoreService::create_backup_with_upload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupProgress {
    /// Reading every selected section.
    Collecting,
    /// Writing the backup file.
    Writing,
    /// Uploading the backup file.
    Uploading,
    /// Done.
    Completed,
}

/// Upload destination passed to [`BackupRestoreService::create_backup_with_upload`].
#[derive(Clone, Copy)]
pub struct UploadRequest<'a> {
    /// The uploader to use.
    pub uploader: &'a dyn ObjectUploader,
    /// Bucket, region and credentials.
    pub target: &'a S3Target,
}

/// Result of a backup written to disk and optionally uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    /// Local backup file.
    pub local_path: PathBuf,
    /// Remote object key, if uploaded.
    pub remote_key: Option<String>,
}

/// A section that failed to restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionFailure {
    /// Section name.
    pub section: String,
    /// Error message.
    pub message: String,
}

/// Outcome of a restore.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Sections written back.
    pub restored: Vec<String>,
    /// Sections present but left untouched.
    pub skipped: Vec<String>,
    /// Sections that failed.
    pub failed: Vec<SectionFailure>,
}

impl RestoreReport {
    /// Returns true if no section failed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Overview of a backup document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSummary {
    /// Schema version.
    pub version: BackupVersion,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Whether a sensitive section is encrypted.
    pub encrypted: bool,
    /// Plaintext section names.
    pub sections: Vec<String>,
    /// Number of plaintext service configs.
    pub service_count: usize,
}

/// Creates, encrypts, decrypts and restores backups.
pub struct BackupRestoreService {
    ctx: SectionContext,
    registry: SectionRegistry,
    files: BackupFiles,
    automatic_files: BackupFiles,
    kdf_iterations: u32,
}

impl BackupRestoreService {
    /// Creates a service with the standard section registry.
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        secure: Arc<SecureStorage>,
        config: &AppConfig,
    ) -> Self {
        let files = BackupFiles::new(config.backup_dir.clone());
        Self {
            ctx: SectionContext { store, secure },
            registry: SectionRegistry::standard(),
            automatic_files: files.automatic(),
            files,
            kdf_iterations: config.kdf_iterations,
        }
    }

    /// Replaces the section registry.
    #[must_use]
    pub fn with_registry(mut self, registry: SectionRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Returns the backup directory helper.
    #[must_use]
    pub fn files(&self) -> &BackupFiles {
        &self.files
    }

    /// Returns the directory of scheduler-written backups.
    ///
    /// Kept apart from [`Self::files`] so retention never touches backups
    /// the user created.
    #[must_use]
    pub fn automatic_files(&self) -> &BackupFiles {
        &self.automatic_files
    }

    /// Returns the section registry.
    #[must_use]
    pub fn registry(&self) -> &SectionRegistry {
        &self.registry
    }

    /// Builds a version 1.2 document from the sections `options` selects.
    ///
    /// Sections that fail to collect are logged and left out.
    ///
    /// # Errors
    ///
    /// Returns a configuration error, before reading anything, when
    /// encryption is requested without a password.
    pub fn create_selective_backup(&self, options: &BackupOptions) -> CoreResult<BackupDocument> {
        let password = if options.encrypt_sensitive {
            match options.password.as_deref() {
                Some(p) if !p.is_empty() => Some(p),
                _ => {
                    return Err(CoreError::configuration(
                        "a password is required to encrypt sensitive data",
                    ))
                }
            }
        } else {
            None
        };

        self.build_document(options, BackupVersion::V1_2, password)
    }

    /// Builds a version 1.1 plaintext document with every section.
    ///
    /// # Errors
    ///
    /// Returns an error only if serialization fails.
    pub fn create_backup(&self) -> CoreResult<BackupDocument> {
        self.build_document(&BackupOptions::all(), BackupVersion::V1_1, None)
    }

    fn build_document(
        &self,
        options: &BackupOptions,
        version: BackupVersion,
        password: Option<&str>,
    ) -> CoreResult<BackupDocument> {
        let mut document = BackupDocument::new(version);
        let mut staging = Map::new();

        for section in self.registry.iter().filter(|s| s.is_selected(options)) {
            let payload = match section.collect(&self.ctx, options) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(section = section.name(), error = %e, "failed to collect backup section");
                    continue;
                }
            };

            if let Some(plain) = payload.plain {
                document.app_data.insert(section.name().to_string(), plain);
            }
            if let Some(sensitive) = payload.sensitive {
                if password.is_some() {
                    staging.insert(section.name().to_string(), sensitive);
                } else {
                    document.app_data.insert(section.name().to_string(), sensitive);
                }
            }
        }

        if let Some(password) = password {
            let (data, info) =
                crypto::encrypt_sensitive_data(&Value::Object(staging), password, self.kdf_iterations)?;
            document
                .app_data
                .insert(ENCRYPTED_DATA.to_string(), Value::String(data));
            document.encrypted = true;
            document.encryption_info = Some(info);
        }

        debug!(
            version = %document.version,
            sections = document.app_data.len(),
            encrypted = document.encrypted,
            "backup document built"
        );
        Ok(document)
    }

    /// Builds a backup, writes it, and optionally uploads it.
    ///
    /// `options` of `None` builds the full plaintext backup.
    ///
    /// # Errors
    ///
    /// Returns an error if building, writing or uploading fails.
    pub fn create_backup_with_upload(
        &self,
        options: Option<&BackupOptions>,
        upload: Option<UploadRequest<'_>>,
        progress: impl FnMut(BackupProgress),
    ) -> CoreResult<BackupArtifact> {
        self.write_and_upload(&self.files, options, upload, progress)
    }

    /// Builds a full plaintext backup into [`Self::automatic_files`] and
    /// uploads it.
    ///
    /// # Errors
    ///
    /// Returns an error if building, writing or uploading fails.
    pub fn create_automatic_backup(
        &self,
        upload: UploadRequest<'_>,
        progress: impl FnMut(BackupProgress),
    ) -> CoreResult<BackupArtifact> {
        self.write_and_upload(
            &self.automatic_files,
            Some(&BackupOptions::all()),
            Some(upload),
            progress,
        )
    }

    fn write_and_upload(
        &self,
        files: &BackupFiles,
        options: Option<&BackupOptions>,
        upload: Option<UploadRequest<'_>>,
        mut progress: impl FnMut(BackupProgress),
    ) -> CoreResult<BackupArtifact> {
        progress(BackupProgress::Collecting);
        let document = match options {
            Some(options) => self.create_selective_backup(options)?,
            None => self.create_backup()?,
        };

        progress(BackupProgress::Writing);
        let local_path = files.write(&document)?;

        let remote_key = match upload {
            Some(request) => {
                progress(BackupProgress::Uploading);
                let body = std::fs::read(&local_path)?;
                let key = request
                    .target
                    .object_key(&file_name(document.timestamp, document.encrypted));
                Some(request.uploader.upload(request.target, &key, &body)?)
            }
            None => None,
        };

        progress(BackupProgress::Completed);
        Ok(BackupArtifact {
            local_path,
            remote_key,
        })
    }

    /// Decrypts an `encryptedData` payload.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DecryptionFailed`] for a wrong password.
    pub fn decrypt_sensitive_data(
        &self,
        data: &str,
        password: &str,
        salt: &str,
        iv: &str,
        iterations: u32,
    ) -> CoreResult<Value> {
        crypto::decrypt_sensitive_data(data, password, salt, iv, iterations)
    }

    /// Decrypts `document` and merges the sensitive sections into
    /// `app_data`, where they take precedence over plaintext duplicates.
    ///
    /// # Errors
    ///
    /// Returns a format error if the document is not encrypted,
    /// [`CoreError::UnsupportedAlgorithm`] for unknown algorithms, or
    /// [`CoreError::DecryptionFailed`] for a wrong password.
    pub fn decrypt_document(
        &self,
        mut document: BackupDocument,
        password: &str,
    ) -> CoreResult<BackupDocument> {
        if !document.has_encrypted_payload() {
            return Err(CoreError::not_backup_format(
                "backup is not encrypted or is missing encryptionInfo/encryptedData",
            ));
        }
        let (Some(info), Some(data)) = (document.encryption_info.take(), document.encrypted_data())
        else {
            return Err(CoreError::not_backup_format("missing encryption fields"));
        };
        crypto::check_algorithm(&info)?;

        let decrypted = crypto::decrypt_sensitive_data(
            data,
            password,
            &info.salt,
            &info.iv,
            info.iterations.unwrap_or(DEFAULT_ITERATIONS),
        )?;
        let Value::Object(sections) = decrypted else {
            return Err(CoreError::not_backup_format(
                "encrypted section does not contain an object",
            ));
        };

        document.app_data.remove(ENCRYPTED_DATA);
        document.app_data.extend(sections);
        document.encrypted = false;
        Ok(document)
    }

    /// Reads and validates a backup file. Nothing is restored.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFileType`] for non-`.json` files, an I/O
    /// error, or any validation error of [`BackupDocument::parse`].
    pub fn load_backup_file(&self, path: &Path) -> CoreResult<BackupDocument> {
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if !is_json {
            return Err(CoreError::InvalidFileType {
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            });
        }
        self.parse_backup(&std::fs::read_to_string(path)?)
    }

    /// Parses and validates backup JSON.
    ///
    /// # Errors
    ///
    /// See [`BackupDocument::parse`].
    pub fn parse_backup(&self, text: &str) -> CoreResult<BackupDocument> {
        BackupDocument::parse(text)
    }

    /// Picks a plaintext backup and restores it.
    ///
    /// Returns `None` if the user cancelled the picker.
    ///
    /// # Errors
    ///
    /// Validation errors are raised before any state is written. An
    /// encrypted backup must go through
    /// [`Self::select_and_restore_encrypted_backup`].
    pub fn select_and_restore_backup(
        &self,
        picker: &dyn DocumentPicker,
        options: RestoreOptions,
    ) -> CoreResult<Option<RestoreReport>> {
        let Some(path) = picker.pick()? else {
            info!("restore cancelled");
            return Ok(None);
        };
        let document = self.load_backup_file(&path)?;
        if document.encrypted_data().is_some() {
            return Err(CoreError::configuration(
                "backup is encrypted; a password is required to restore it",
            ));
        }
        self.restore_backup(&document, options).map(Some)
    }

    /// Picks an encrypted backup, decrypts it with `password` and restores it.
    ///
    /// Returns `None` if the user cancelled the picker.
    ///
    /// # Errors
    ///
    /// Validation and decryption errors are raised before any state is
    /// written.
    pub fn select_and_restore_encrypted_backup(
        &self,
        picker: &dyn DocumentPicker,
        password: &str,
        options: RestoreOptions,
    ) -> CoreResult<Option<RestoreReport>> {
        let Some(path) = picker.pick()? else {
            info!("restore cancelled");
            return Ok(None);
        };
        let document = self.load_backup_file(&path)?;
        let document = self.decrypt_document(document, password)?;
        self.restore_backup(&document, options).map(Some)
    }

    /// Writes every section of `document` back into the stores.
    ///
    /// Each section is restored independently; failures are logged and
    /// reported without stopping the others.
    ///
    /// # Errors
    ///
    /// Returns an error, before writing anything, if the document still
    /// carries `encryptedData`.
    pub fn restore_backup(
        &self,
        document: &BackupDocument,
        options: RestoreOptions,
    ) -> CoreResult<RestoreReport> {
        if document.encrypted_data().is_some() {
            return Err(CoreError::invalid_operation(
                "backup still contains encrypted data; decrypt it first",
            ));
        }

        let mut report = RestoreReport::default();
        for section in self.registry.iter() {
            let Some(value) = document.app_data.get(section.name()) else {
                continue;
            };
            if section.skipped_by(&options) || value.is_null() {
                report.skipped.push(section.name().to_string());
                continue;
            }
            match section.restore(&self.ctx, value) {
                Ok(()) => report.restored.push(section.name().to_string()),
                Err(e) => {
                    warn!(section = section.name(), error = %e, "failed to restore backup section");
                    report.failed.push(SectionFailure {
                        section: section.name().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            restored = report.restored.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "backup restored"
        );
        Ok(report)
    }

    /// Summarizes `document` without restoring it.
    #[must_use]
    pub fn inspect_backup(&self, document: &BackupDocument) -> BackupSummary {
        BackupSummary {
            version: document.version,
            timestamp: document.timestamp,
            encrypted: document.encrypted,
            sections: document.section_names(),
            service_count: document
                .app_data
                .get("serviceConfigs")
                .and_then(Value::as_array)
                .map_or(0, Vec::len),
        }
    }
}

impl std::fmt::Debug for BackupRestoreService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupRestoreService")
            .field("registry", &self.registry)
            .field("files", &self.files)
            .field("automatic_files", &self.automatic_files)
            .finish_non_exhaustive()
    }
}
