//! Backup files on disk and the platform seams around them.

use super::document::BackupDocument;
use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

/// File name prefix of every backup.
pub const FILE_PREFIX: &str = "uniarr-backup-";
/// File name extension of every backup.
pub const FILE_EXTENSION: &str = ".json";
/// Subdirectory of the backup directory holding scheduler-written backups.
pub const AUTOMATIC_DIR: &str = "automatic";

/// Lets the user pick a backup file.
pub trait DocumentPicker {
    /// Returns the chosen path, or `None` if the user cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the picker itself fails.
    fn pick(&self) -> CoreResult<Option<PathBuf>>;
}

/// A picker that always returns the same path.
#[derive(Debug, Clone)]
pub struct FixedPathPicker(pub PathBuf);

impl DocumentPicker for FixedPathPicker {
    fn pick(&self) -> CoreResult<Option<PathBuf>> {
        Ok(Some(self.0.clone()))
    }
}

/// Hands a file to the platform share sheet.
pub trait ShareSink {
    /// Shares `path` with the given MIME type.
    ///
    /// # Errors
    ///
    /// Returns an error if sharing fails.
    fn share(&self, path: &Path, mime_type: &str) -> CoreResult<()>;
}

/// A share sink that copies files into a directory.
#[derive(Debug, Clone)]
pub struct CopyShareSink {
    target: PathBuf,
}

impl CopyShareSink {
    /// Creates a sink copying into `target`.
    #[must_use]
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl ShareSink for CopyShareSink {
    fn share(&self, path: &Path, _mime_type: &str) -> CoreResult<()> {
        let name = path
            .file_name()
            .ok_or_else(|| CoreError::invalid_operation("share path has no file name"))?;
        fs::create_dir_all(&self.target)?;
        fs::copy(path, self.target.join(name))?;
        Ok(())
    }
}

/// A backup file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupFileInfo {
    /// File name.
    pub name: String,
    /// Full path.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
}

/// Returns true if `name` follows the backup naming convention.
#[must_use]
pub fn is_backup_file_name(name: &str) -> bool {
    name.starts_with(FILE_PREFIX)
        && name.ends_with(FILE_EXTENSION)
        && !name.contains(['/', '\\'])
}

/// Returns `uniarr-backup-YYYY-MM-DD[-encrypted].json`.
#[must_use]
pub fn file_name(timestamp: DateTime<Utc>, encrypted: bool) -> String {
    let suffix = if encrypted { "-encrypted" } else { "" };
    format!(
        "{FILE_PREFIX}{}{suffix}{FILE_EXTENSION}",
        timestamp.format("%Y-%m-%d")
    )
}

/// Returns the day encoded in a backup file name, if any.
#[must_use]
pub fn file_name_date(name: &str) -> Option<NaiveDate> {
    let day = name.strip_prefix(FILE_PREFIX)?.get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

fn name_time(name: &str) -> Option<DateTime<Utc>> {
    file_name_date(name)?
        .and_hms_opt(0, 0, 0)
        .map(|at| Utc.from_utc_datetime(&at))
}

/// The backup directory.
#[derive(Debug, Clone)]
pub struct BackupFiles {
    dir: PathBuf,
}

impl BackupFiles {
    /// Creates a handle on `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the backup directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns a handle on the [`AUTOMATIC_DIR`] subdirectory.
    #[must_use]
    pub fn automatic(&self) -> Self {
        Self::new(self.dir.join(AUTOMATIC_DIR))
    }

    /// Writes `document` as indented JSON and returns its path.
    ///
    /// A backup from the same day with the same encryption state is
    /// overwritten.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write(&self, document: &BackupDocument) -> CoreResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self
            .dir
            .join(file_name(document.timestamp, document.encrypted));

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, document.to_pretty_json()?)?;
        fs::rename(&tmp, &path)?;

        info!(path = %path.display(), encrypted = document.encrypted, "backup written");
        Ok(path)
    }

    /// Lists backup files, newest first.
    ///
    /// Files are ordered by modification time, then by the day in their
    /// name. A file whose modification time cannot be read takes the day in
    /// its name.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read. A missing
    /// directory lists as empty.
    pub fn list(&self) -> CoreResult<Vec<BackupFileInfo>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_backup_file_name(&name) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let modified = match metadata.modified() {
                Ok(at) => DateTime::<Utc>::from(at),
                Err(e) => {
                    debug!(name = %name, error = %e, "modification time unavailable, using file name date");
                    name_time(&name).unwrap_or_else(|| SystemTime::UNIX_EPOCH.into())
                }
            };
            files.push(BackupFileInfo {
                name,
                path: entry.path(),
                size: metadata.len(),
                modified,
            });
        }

        files.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| file_name_date(&b.name).cmp(&file_name_date(&a.name)))
                .then_with(|| b.name.cmp(&a.name))
        });
        Ok(files)
    }

    /// Deletes the backup named `name`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `name` is not a backup file name,
    /// or an I/O error if deletion fails.
    pub fn delete(&self, name: &str) -> CoreResult<()> {
        if !is_backup_file_name(name) {
            return Err(CoreError::configuration(format!(
                "not a backup file name: {name}"
            )));
        }
        fs::remove_file(self.dir.join(name))?;
        debug!(name, "backup deleted");
        Ok(())
    }

    /// Shares the backup at `path` through `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or the sink fails.
    pub fn share(&self, path: &Path, sink: &dyn ShareSink) -> CoreResult<()> {
        if !path.is_file() {
            return Err(CoreError::invalid_operation(format!(
                "backup file not found: {}",
                path.display()
            )));
        }
        sink.share(path, "application/json")
    }

    /// Deletes all but the newest `keep` backups in this directory and
    /// returns what was removed. Subdirectories are not touched.
    ///
    /// # Errors
    ///
    /// Returns an error if listing or deletion fails.
    pub fn prune(&self, keep: usize) -> CoreResult<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for file in self.list()?.into_iter().skip(keep) {
            fs::remove_file(&file.path)?;
            removed.push(file.path);
        }
        if !removed.is_empty() {
            info!(removed = removed.len(), keep, "pruned old backups");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::document::BackupVersion;
    use std::time::Duration;
    use tempfile::tempdir;

    fn doc_at(day: &str, encrypted: bool) -> BackupDocument {
        let mut doc = BackupDocument::new(BackupVersion::V1_2);
        doc.timestamp = DateTime::parse_from_rfc3339(&format!("{day}T08:00:00Z"))
            .unwrap()
            .with_timezone(&Utc);
        doc.encrypted = encrypted;
        doc
    }

    #[test]
    fn file_names() {
        let doc = doc_at("2024-02-09", false);
        assert_eq!(file_name(doc.timestamp, false), "uniarr-backup-2024-02-09.json");
        assert_eq!(
            file_name(doc.timestamp, true),
            "uniarr-backup-2024-02-09-encrypted.json"
        );
        assert!(is_backup_file_name("uniarr-backup-2024-02-09.json"));
        assert!(!is_backup_file_name("notes.json"));
        assert!(!is_backup_file_name("uniarr-backup-../x.json"));
    }

    #[test]
    fn write_list_delete() {
        let dir = tempdir().unwrap();
        let files = BackupFiles::new(dir.path().join("backups"));
        assert!(files.list().unwrap().is_empty());

        let path = files.write(&doc_at("2024-01-01", false)).unwrap();
        std::fs::write(dir.path().join("backups").join("other.txt"), b"x").unwrap();

        let listed = files.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, path);

        files.delete(&listed[0].name).unwrap();
        assert!(files.list().unwrap().is_empty());
        assert!(files.delete("other.txt").is_err());
    }

    #[test]
    fn prune_keeps_newest() {
        let dir = tempdir().unwrap();
        let files = BackupFiles::new(dir.path());
        for day in ["2024-01-01", "2024-01-02", "2024-01-03"] {
            files.write(&doc_at(day, false)).unwrap();
            std::thread::sleep(Duration::from_millis(20));
        }

        let removed = files.prune(2).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(removed[0].ends_with("uniarr-backup-2024-01-01.json"));
        assert_eq!(files.list().unwrap().len(), 2);
    }

    #[test]
    fn file_name_dates() {
        assert_eq!(
            file_name_date("uniarr-backup-2024-02-09-encrypted.json"),
            NaiveDate::from_ymd_opt(2024, 2, 9)
        );
        assert_eq!(file_name_date("uniarr-backup-latest.json"), None);
        assert_eq!(file_name_date("notes.json"), None);
    }

    #[test]
    fn same_mtime_orders_by_name_date() {
        let dir = tempdir().unwrap();
        let files = BackupFiles::new(dir.path());
        let older = files.write(&doc_at("2024-01-01", true)).unwrap();
        let newer = files.write(&doc_at("2024-03-01", false)).unwrap();

        let stamp = std::fs::metadata(&older).unwrap().modified().unwrap();
        for path in [&older, &newer] {
            std::fs::File::options()
                .write(true)
                .open(path)
                .unwrap()
                .set_modified(stamp)
                .unwrap();
        }

        let listed = files.list().unwrap();
        assert_eq!(listed[0].path, newer);
        assert_eq!(listed[1].path, older);
    }

    #[test]
    fn prune_leaves_other_directories() {
        let dir = tempdir().unwrap();
        let files = BackupFiles::new(dir.path());
        let user = files.write(&doc_at("2024-01-01", true)).unwrap();

        let automatic = files.automatic();
        assert_eq!(automatic.dir(), dir.path().join(AUTOMATIC_DIR));
        automatic.write(&doc_at("2024-01-02", false)).unwrap();
        automatic.write(&doc_at("2024-01-03", false)).unwrap();

        assert_eq!(automatic.prune(0).unwrap().len(), 2);
        assert!(user.exists());
        assert_eq!(files.list().unwrap().len(), 1);
    }

    #[test]
    fn share_copies_through_sink() {
        let dir = tempdir().unwrap();
        let files = BackupFiles::new(dir.path().join("backups"));
        let path = files.write(&doc_at("2024-01-01", true)).unwrap();

        let sink = CopyShareSink::new(dir.path().join("shared"));
        files.share(&path, &sink).unwrap();
        assert!(dir
            .path()
            .join("shared")
            .join("uniarr-backup-2024-01-01-encrypted.json")
            .exists());

        assert!(files.share(&dir.path().join("missing.json"), &sink).is_err());
    }
}
