//! Scheduled backups to S3-compatible storage.

pub mod host;
pub mod upload;

pub use host::{Job, JobHost, JobOutcome, ManualJobHost, TokioJobHost};
pub use upload::{DirectoryUploader, ObjectUploader, S3Target, DEFAULT_KEY_PREFIX};

use crate::backup::{BackupArtifact, BackupRestoreService, UploadRequest};
use crate::error::{CoreError, CoreResult};
use crate::secure_storage::SecureStorage;
use crate::settings::SettingsAccess;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Name of the recurring backup job.
pub const TASK_NAME: &str = "uniarr-s3-backup";

/// Local automatic backups kept after each run. Backups the user created
/// are never pruned.
pub const DEFAULT_LOCAL_RETENTION: usize = 5;

/// Registration state of the recurring job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No recurring job.
    Unregistered,
    /// The recurring job is registered with the host.
    Registered,
}

/// Runs unencrypted full backups and uploads them to the configured bucket.
pub struct S3BackupScheduler {
    backups: Arc<BackupRestoreService>,
    settings: SettingsAccess,
    secure: Arc<SecureStorage>,
    host: Arc<dyn JobHost>,
    uploader: Arc<dyn ObjectUploader>,
    local_retention: usize,
}

impl S3BackupScheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(
        backups: Arc<BackupRestoreService>,
        settings: SettingsAccess,
        secure: Arc<SecureStorage>,
        host: Arc<dyn JobHost>,
        uploader: Arc<dyn ObjectUploader>,
    ) -> Self {
        Self {
            backups,
            settings,
            secure,
            host,
            uploader,
            local_retention: DEFAULT_LOCAL_RETENTION,
        }
    }

    /// Sets how many local automatic backup files survive each run.
    #[must_use]
    pub fn with_local_retention(mut self, keep: usize) -> Self {
        self.local_retention = keep;
        self
    }

    /// Returns the registration state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        if self.host.is_registered(TASK_NAME) {
            SchedulerState::Registered
        } else {
            SchedulerState::Unregistered
        }
    }

    /// Registers the recurring job for the configured frequency.
    ///
    /// Returns `false` without registering when automatic backups are
    /// disabled, the bucket or region is missing, or the job is already
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings cannot be read or the host refuses
    /// the job. Nothing is registered in that case.
    pub fn register_background_task(self: &Arc<Self>) -> CoreResult<bool> {
        let settings = self.settings.auto_backup()?;
        if !settings.enabled {
            info!("automatic backup disabled, not registering");
            return Ok(false);
        }
        if settings.target().is_none() {
            warn!("automatic backup enabled without bucket and region, not registering");
            return Ok(false);
        }
        if self.host.is_registered(TASK_NAME) {
            debug!("automatic backup already registered");
            return Ok(false);
        }

        let scheduler = Arc::downgrade(self);
        let job: Job = Arc::new(move || {
            let Some(scheduler) = scheduler.upgrade() else {
                return JobOutcome::NoData;
            };
            match scheduler.execute_automatic_backup() {
                Ok(_) => JobOutcome::NewData,
                Err(e) => {
                    error!(error = %e, "automatic backup failed");
                    JobOutcome::Failed
                }
            }
        });

        self.host
            .register(TASK_NAME, settings.frequency.interval(), job)
            .inspect_err(|e| error!(error = %e, "failed to register automatic backup"))?;
        info!(frequency = %settings.frequency, "automatic backup registered");
        Ok(true)
    }

    /// Removes the recurring job.
    pub fn unregister_background_task(&self) {
        self.host.unregister(TASK_NAME);
        info!("automatic backup unregistered");
    }

    /// Runs one automatic backup: build, upload, record the time, prune.
    ///
    /// # Errors
    ///
    /// Returns an error if the target is not configured or the backup or
    /// upload fails.
    pub fn execute_automatic_backup(&self) -> CoreResult<BackupArtifact> {
        self.run("automatic")
    }

    /// Runs a backup now on behalf of the user.
    ///
    /// # Errors
    ///
    /// Same as [`Self::execute_automatic_backup`].
    pub fn trigger_manual_backup(&self) -> CoreResult<BackupArtifact> {
        self.run("manual")
    }

    fn run(&self, trigger: &'static str) -> CoreResult<BackupArtifact> {
        let settings = self.settings.auto_backup()?;
        let (bucket, region) = settings.target().ok_or_else(|| {
            CoreError::configuration("S3 bucket and region must be configured")
        })?;
        let target = S3Target::new(bucket, region).with_credentials(self.secure.s3_credentials());

        let artifact = self.backups.create_automatic_backup(
            UploadRequest {
                uploader: self.uploader.as_ref(),
                target: &target,
            },
            |stage| debug!(trigger, ?stage, "backup progress"),
        )?;

        self.settings.record_last_auto_backup(Utc::now())?;
        if let Err(e) = self.backups.automatic_files().prune(self.local_retention) {
            warn!(error = %e, "failed to prune local backups");
        }

        info!(
            trigger,
            path = %artifact.local_path.display(),
            remote_key = artifact.remote_key.as_deref().unwrap_or_default(),
            "backup uploaded"
        );
        Ok(artifact)
    }
}

impl std::fmt::Debug for S3BackupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3BackupScheduler")
            .field("state", &self.state())
            .field("local_retention", &self.local_retention)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::settings::{AutoBackupSettings, BackupFrequency};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use uniarr_storage::{KeyValueStore, MemorySecretStore, MemoryStore, SecretStore};

    struct Fixture {
        dir: TempDir,
        settings: SettingsAccess,
        host: Arc<ManualJobHost>,
        scheduler: Arc<S3BackupScheduler>,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let config = AppConfig::new(dir.path().join("data"));
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let secrets: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
        let secure = Arc::new(SecureStorage::new(Arc::clone(&store), secrets, &config));
        let backups = Arc::new(BackupRestoreService::new(
            Arc::clone(&store),
            Arc::clone(&secure),
            &config,
        ));
        let settings = SettingsAccess::new(store);
        let host = Arc::new(ManualJobHost::new());
        let uploader = Arc::new(DirectoryUploader::new(dir.path().join("s3")));

        let scheduler = Arc::new(S3BackupScheduler::new(
            backups,
            settings.clone(),
            secure,
            Arc::clone(&host) as Arc<dyn JobHost>,
            uploader,
        ));
        Fixture {
            dir,
            settings,
            host,
            scheduler,
        }
    }

    fn enable(settings: &SettingsAccess, frequency: BackupFrequency) {
        settings
            .set_auto_backup(&AutoBackupSettings {
                enabled: true,
                bucket: Some("media".into()),
                region: Some("eu-west-1".into()),
                frequency,
                last_backup: None,
            })
            .unwrap();
    }

    #[test]
    fn disabled_is_not_registered() {
        let f = fixture();
        assert!(!f.scheduler.register_background_task().unwrap());
        assert_eq!(f.scheduler.state(), SchedulerState::Unregistered);
    }

    #[test]
    fn missing_region_is_not_registered() {
        let f = fixture();
        f.settings
            .set_auto_backup(&AutoBackupSettings {
                enabled: true,
                bucket: Some("media".into()),
                ..AutoBackupSettings::default()
            })
            .unwrap();
        assert!(!f.scheduler.register_background_task().unwrap());
        assert!(!f.host.is_registered(TASK_NAME));
    }

    #[test]
    fn registration_is_idempotent() {
        let f = fixture();
        enable(&f.settings, BackupFrequency::Weekly);

        assert!(f.scheduler.register_background_task().unwrap());
        assert!(!f.scheduler.register_background_task().unwrap());
        assert_eq!(f.scheduler.state(), SchedulerState::Registered);
        assert_eq!(
            f.host.interval(TASK_NAME),
            Some(Duration::from_secs(7 * 24 * 60 * 60))
        );

        f.scheduler.unregister_background_task();
        assert_eq!(f.scheduler.state(), SchedulerState::Unregistered);
    }

    #[test]
    fn job_uploads_and_records_last_run() {
        let f = fixture();
        enable(&f.settings, BackupFrequency::Daily);
        f.scheduler.register_background_task().unwrap();

        assert_eq!(f.host.run_now(TASK_NAME).unwrap(), JobOutcome::NewData);

        let last = f.settings.auto_backup().unwrap().last_backup;
        assert!(last.is_some());
        let uploaded = std::fs::read_dir(f.dir.path().join("s3/media/uniarr-backups"))
            .unwrap()
            .count();
        assert_eq!(uploaded, 1);
    }

    #[test]
    fn manual_backup_requires_target() {
        let f = fixture();
        let err = f.scheduler.trigger_manual_backup().unwrap_err();
        assert!(matches!(err, CoreError::Configuration { .. }));
        assert!(f.settings.auto_backup().unwrap().last_backup.is_none());
    }

    #[test]
    fn retention_keeps_user_backups() {
        let f = fixture();
        enable(&f.settings, BackupFrequency::Daily);
        let scheduler = Arc::new(
            Arc::try_unwrap(f.scheduler)
                .unwrap()
                .with_local_retention(0),
        );

        let files = scheduler.backups.files();
        let mut user_backups = Vec::new();
        for day in 1..=6 {
            let mut doc = crate::backup::BackupDocument::new(crate::backup::BackupVersion::V1_2);
            doc.timestamp = chrono::DateTime::parse_from_rfc3339(&format!("2024-01-0{day}T08:00:00Z"))
                .unwrap()
                .with_timezone(&Utc);
            doc.encrypted = true;
            user_backups.push(files.write(&doc).unwrap());
        }

        let artifact = scheduler.trigger_manual_backup().unwrap();
        assert!(artifact
            .local_path
            .starts_with(files.dir().join(crate::backup::AUTOMATIC_DIR)));
        assert!(!artifact.local_path.exists());
        for path in &user_backups {
            assert!(path.exists(), "{} was removed", path.display());
        }
        assert_eq!(files.list().unwrap().len(), 6);
    }

    #[test]
    fn manual_backup_is_plaintext() {
        let f = fixture();
        enable(&f.settings, BackupFrequency::Monthly);
        let artifact = f.scheduler.trigger_manual_backup().unwrap();

        let text = std::fs::read_to_string(&artifact.local_path).unwrap();
        let doc = crate::backup::BackupDocument::parse(&text).unwrap();
        assert!(!doc.encrypted);
        assert_eq!(
            artifact.remote_key.as_deref(),
            Some(format!("uniarr-backups/{}", artifact.local_path.file_name().unwrap().to_string_lossy()).as_str())
        );
    }
}
