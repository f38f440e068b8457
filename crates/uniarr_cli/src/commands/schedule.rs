//! Automatic S3 backup commands.

use std::path::Path;
use std::sync::Arc;
use tracing::info;
use uniarr_core::{
    AppContext, BackupFrequency, DirectoryUploader, JobHost, ManualJobHost, S3Credentials,
    SchedulerState, TokioJobHost,
};

/// Settings changes requested on the command line.
pub struct Changes {
    /// New enabled flag.
    pub enabled: Option<bool>,
    /// New bucket.
    pub bucket: Option<String>,
    /// New region.
    pub region: Option<String>,
    /// New frequency.
    pub frequency: Option<BackupFrequency>,
    /// New access key id and secret.
    pub credentials: Option<(String, String)>,
}

/// Show automatic backup settings.
pub fn status(app: &AppContext) -> Result<(), Box<dyn std::error::Error>> {
    let settings = app.settings().auto_backup()?;
    let credentials = app.secure().s3_credentials().is_some();

    println!("Automatic Backup");
    println!("================");
    println!("  Enabled: {}", if settings.enabled { "yes" } else { "no" });
    println!("  Bucket: {}", settings.bucket.as_deref().unwrap_or("-"));
    println!("  Region: {}", settings.region.as_deref().unwrap_or("-"));
    println!("  Frequency: {}", settings.frequency);
    println!(
        "  Credentials: {}",
        if credentials { "stored" } else { "none" }
    );
    match settings.last_backup {
        Some(at) => println!("  Last backup: {}", at.to_rfc3339()),
        None => println!("  Last backup: never"),
    }
    if settings.enabled && settings.target().is_none() {
        println!("  ! Bucket and region are required for automatic backups");
    }
    Ok(())
}

/// Apply settings changes.
pub fn configure(app: &AppContext, changes: Changes) -> Result<(), Box<dyn std::error::Error>> {
    let settings_access = app.settings();
    let mut settings = settings_access.auto_backup()?;

    if let Some(enabled) = changes.enabled {
        settings.enabled = enabled;
    }
    if changes.bucket.is_some() {
        settings.bucket = changes.bucket;
    }
    if changes.region.is_some() {
        settings.region = changes.region;
    }
    if let Some(frequency) = changes.frequency {
        settings.frequency = frequency;
    }
    settings_access.set_auto_backup(&settings)?;

    if let Some((access_key_id, secret_access_key)) = changes.credentials {
        app.secure().save_s3_credentials(&S3Credentials {
            access_key_id,
            secret_access_key,
        })?;
    }

    println!("✓ Automatic backup settings saved");
    status(app)
}

/// Run one backup and upload it into `mirror`.
pub fn run_now(app: &AppContext, mirror: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let scheduler = app.scheduler(
        Arc::new(ManualJobHost::new()),
        Arc::new(DirectoryUploader::new(mirror)),
    );
    let artifact = scheduler.trigger_manual_backup()?;

    println!("✓ Backup uploaded successfully");
    println!("  Local: {}", artifact.local_path.display());
    if let Some(key) = artifact.remote_key {
        println!("  Remote key: {key}");
    }
    Ok(())
}

/// Register the recurring backup and wait for Ctrl-C.
pub fn daemon(app: &AppContext, mirror: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let host: Arc<dyn JobHost> = Arc::new(TokioJobHost::current()?);
        let scheduler = app.scheduler(host, Arc::new(DirectoryUploader::new(mirror)));

        scheduler.register_background_task()?;
        if scheduler.state() != SchedulerState::Registered {
            return Err("Automatic backup is disabled or missing bucket/region. \
                        Use `uniarr schedule configure` first."
                .into());
        }

        println!("✓ Automatic backup scheduled, press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;

        scheduler.unregister_background_task();
        info!("scheduler stopped");
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
