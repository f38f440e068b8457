//! Object storage upload seam.

use crate::error::{CoreError, CoreResult};
use crate::types::S3Credentials;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::info;

/// Default key prefix for uploaded backups.
pub const DEFAULT_KEY_PREFIX: &str = "uniarr-backups/";

/// Where backups are uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Target {
    /// Bucket name.
    pub bucket: String,
    /// Bucket region.
    pub region: String,
    /// Prefix prepended to every object key.
    pub key_prefix: String,
    /// Access keys, if stored.
    pub credentials: Option<S3Credentials>,
}

impl S3Target {
    /// Creates a target with the default prefix and no credentials.
    #[must_use]
    pub fn new(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            credentials: None,
        }
    }

    /// Sets the access keys.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<S3Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Returns the object key for `file_name`.
    #[must_use]
    pub fn object_key(&self, file_name: &str) -> String {
        format!("{}{file_name}", self.key_prefix)
    }
}

/// Uploads objects to S3-compatible storage.
pub trait ObjectUploader: Send + Sync {
    /// Stores `body` under `key` and returns the remote key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Upload`] if the upload fails.
    fn upload(&self, target: &S3Target, key: &str, body: &[u8]) -> CoreResult<String>;
}

/// An uploader that mirrors objects to `<root>/<bucket>/<key>` on disk.
#[derive(Debug, Clone)]
pub struct DirectoryUploader {
    root: PathBuf,
}

impl DirectoryUploader {
    /// Creates an uploader rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the local path an object would be written to.
    ///
    /// # Errors
    ///
    /// Returns an upload error if the bucket or key would escape the root.
    pub fn object_path(&self, target: &S3Target, key: &str) -> CoreResult<PathBuf> {
        for part in [target.bucket.as_str(), key] {
            let path = Path::new(part);
            let escapes = part.is_empty()
                || path
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_)));
            if escapes {
                return Err(CoreError::upload(format!("invalid object path component: {part}")));
            }
        }
        Ok(self.root.join(&target.bucket).join(key))
    }
}

impl ObjectUploader for DirectoryUploader {
    fn upload(&self, target: &S3Target, key: &str, body: &[u8]) -> CoreResult<String> {
        let path = self.object_path(target, key)?;
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, body)
        };
        write().map_err(|e| CoreError::upload(format!("{}: {e}", path.display())))?;

        info!(bucket = %target.bucket, key, "backup uploaded");
        Ok(key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mirrors_under_bucket() {
        let dir = tempdir().unwrap();
        let uploader = DirectoryUploader::new(dir.path());
        let target = S3Target::new("media-backups", "eu-west-1");
        let key = target.object_key("uniarr-backup-2024-01-01.json");

        let remote = uploader.upload(&target, &key, b"{}").unwrap();
        assert_eq!(remote, "uniarr-backups/uniarr-backup-2024-01-01.json");
        assert!(dir
            .path()
            .join("media-backups/uniarr-backups/uniarr-backup-2024-01-01.json")
            .exists());
    }

    #[test]
    fn rejects_escaping_keys() {
        let uploader = DirectoryUploader::new("/tmp/mirror");
        let target = S3Target::new("bucket", "us-east-1");
        assert!(uploader.object_path(&target, "../etc/passwd").is_err());
        assert!(uploader.object_path(&target, "/abs").is_err());
        assert!(uploader
            .object_path(&S3Target::new("..", "us-east-1"), "k")
            .is_err());
    }
}
