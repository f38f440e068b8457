//! Error types for UniArr core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in UniArr core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] uniarr_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The storage backend was used before `initialize()` completed.
    #[error("storage backend manager is not initialized; call initialize() first")]
    NotInitialized,

    /// Missing or inconsistent configuration (bucket, region, password).
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// The selected file is not a JSON backup file.
    #[error("invalid file type: {name} (expected a .json backup file)")]
    InvalidFileType {
        /// Offending file name.
        name: String,
    },

    /// The backup file could not be parsed as JSON.
    #[error("backup file is not valid JSON: {message}")]
    NotJson {
        /// Parser message.
        message: String,
    },

    /// The JSON does not have the shape of a backup document.
    #[error("file is not a UniArr backup: {message}")]
    NotBackupFormat {
        /// Description of the missing or malformed field.
        message: String,
    },

    /// The backup declares a schema version this build cannot read.
    #[error("unsupported backup version: {version} (supported: 1.0, 1.1, 1.2)")]
    UnsupportedVersion {
        /// Declared version.
        version: String,
    },

    /// The backup was encrypted with an algorithm this build cannot read.
    #[error("unsupported encryption algorithm: {algorithm}")]
    UnsupportedAlgorithm {
        /// Declared algorithm tag.
        algorithm: String,
    },

    /// Encrypting the sensitive section failed.
    #[error("encryption failed: {message}")]
    EncryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Decrypting the sensitive section failed, usually a wrong password.
    #[error("decryption failed: {message}. Please verify your password and try again")]
    DecryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Uploading a backup to object storage failed.
    #[error("upload failed: {message}")]
    Upload {
        /// Description of the failure.
        message: String,
    },

    /// The background job host rejected an operation.
    #[error("scheduler error: {message}")]
    Scheduler {
        /// Description of the failure.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a "not a backup" validation error.
    pub fn not_backup_format(message: impl Into<String>) -> Self {
        Self::NotBackupFormat {
            message: message.into(),
        }
    }

    /// Creates an encryption error.
    pub fn encryption_failed(message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            message: message.into(),
        }
    }

    /// Creates a decryption error.
    pub fn decryption_failed(message: impl Into<String>) -> Self {
        Self::DecryptionFailed {
            message: message.into(),
        }
    }

    /// Creates an upload error.
    pub fn upload(message: impl Into<String>) -> Self {
        Self::Upload {
            message: message.into(),
        }
    }

    /// Creates a scheduler error.
    pub fn scheduler(message: impl Into<String>) -> Self {
        Self::Scheduler {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if another process holds the data directory.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Storage(uniarr_storage::StorageError::Locked(_)))
    }

    /// Returns true for errors raised while validating a backup file.
    ///
    /// Validation errors are always raised before any state is written.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidFileType { .. }
                | Self::NotJson { .. }
                | Self::NotBackupFormat { .. }
                | Self::UnsupportedVersion { .. }
                | Self::UnsupportedAlgorithm { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decryption_error_mentions_password() {
        let err = CoreError::decryption_failed("authentication tag mismatch");
        assert!(err.to_string().contains("verify your password"));
    }

    #[test]
    fn validation_classification() {
        assert!(CoreError::not_backup_format("missing appData").is_validation());
        assert!(CoreError::UnsupportedVersion {
            version: "9.9".into()
        }
        .is_validation());
        assert!(!CoreError::configuration("no bucket").is_validation());
        assert!(!CoreError::NotInitialized.is_validation());
        assert!(CoreError::from(uniarr_storage::StorageError::Locked("uniarr.log.lock".into()))
            .is_locked());
        assert!(!CoreError::NotInitialized.is_locked());
    }
}
