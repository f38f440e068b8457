//! Backup and restore commands.

use std::path::Path;
use tracing::info;
use uniarr_core::backup::BackupFiles;
use uniarr_core::{AppContext, BackupCategory, BackupOptions, RestoreOptions};

/// Create a backup in the backup directory.
///
/// An empty `include` selects every section.
pub fn create(
    app: &AppContext,
    include: &[BackupCategory],
    encrypt: bool,
    password: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut options = if include.is_empty() {
        BackupOptions::all()
    } else {
        include
            .iter()
            .fold(BackupOptions::none(), |options, category| {
                options.with(*category, true)
            })
    };
    options.encrypt_sensitive = encrypt;
    options.password = password;

    let document = app.backups().create_selective_backup(&options)?;
    let path = app.backups().files().write(&document)?;
    let summary = app.backups().inspect_backup(&document);

    println!("✓ Backup created successfully");
    println!("  Path: {}", path.display());
    println!("  Version: {}", summary.version);
    println!("  Sections: {}", summary.sections.len());
    println!("  Services: {}", summary.service_count);
    println!("  Encrypted: {}", if summary.encrypted { "yes" } else { "no" });

    Ok(())
}

/// Restore a backup file, decrypting it first when needed.
pub fn restore(
    app: &AppContext,
    path: &Path,
    password: Option<&str>,
    skip_settings: bool,
    skip_services: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Restoring backup from {}", path.display());

    let backups = app.backups();
    let mut document = backups.load_backup_file(path)?;
    if document.encrypted_data().is_some() {
        let password = password.ok_or("Backup is encrypted. Use --password to restore it.")?;
        document = backups.decrypt_document(document, password)?;
    }

    let report = backups.restore_backup(
        &document,
        RestoreOptions {
            skip_settings,
            skip_services,
        },
    )?;

    if report.is_complete() {
        println!("✓ Backup restored successfully");
    } else {
        println!("✗ Backup restored with errors");
    }
    println!("  Restored: {}", report.restored.join(", "));
    if !report.skipped.is_empty() {
        println!("  Skipped: {}", report.skipped.join(", "));
    }
    for failure in &report.failed {
        println!("  Failed: {} ({})", failure.section, failure.message);
    }

    if report.is_complete() {
        Ok(())
    } else {
        Err(format!("{} section(s) failed to restore", report.failed.len()).into())
    }
}

/// List backups in the backup directory, then the automatic ones.
pub fn list(app: &AppContext) -> Result<(), Box<dyn std::error::Error>> {
    print_files("Backups", app.backups().files())?;
    println!();
    print_files("Automatic backups", app.backups().automatic_files())
}

fn print_files(title: &str, files: &BackupFiles) -> Result<(), Box<dyn std::error::Error>> {
    let listed = files.list()?;

    println!("{title} in {}", files.dir().display());
    println!("{}", "=".repeat(title.len() + 3));
    if listed.is_empty() {
        println!("  No backups found.");
    }
    for file in listed {
        println!(
            "  {}  {} bytes  {}",
            file.name,
            file.size,
            file.modified.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    Ok(())
}

/// Show a backup's contents without restoring it.
pub fn inspect(app: &AppContext, path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let document = app.backups().load_backup_file(path)?;
    let summary = app.backups().inspect_backup(&document);

    if format == "json" {
        let value = serde_json::json!({
            "path": path.display().to_string(),
            "version": summary.version.as_str(),
            "timestamp": summary.timestamp.to_rfc3339(),
            "encrypted": summary.encrypted,
            "sections": summary.sections,
            "serviceCount": summary.service_count,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Backup Information");
    println!("==================");
    println!("  Path: {}", path.display());
    println!("  Version: {}", summary.version);
    println!("  Created: {}", summary.timestamp.to_rfc3339());
    println!("  Encrypted: {}", if summary.encrypted { "yes" } else { "no" });
    println!("  Services: {}", summary.service_count);
    println!("  Sections:");
    for section in &summary.sections {
        println!("    - {section}");
    }

    Ok(())
}

/// Delete a backup by file name.
pub fn delete(app: &AppContext, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    app.backups().files().delete(name)?;
    println!("✓ Deleted {name}");
    Ok(())
}
