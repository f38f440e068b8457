//! Storage backend commands.

use uniarr_core::{AppContext, MigrationStatus};

/// Show the active backend and migration state.
pub fn status(app: &AppContext) -> Result<(), Box<dyn std::error::Error>> {
    let migration = match app.migrator().status()? {
        MigrationStatus::Done => "done",
        MigrationStatus::NotStarted => "not started",
    };
    let generic_keys = app.manager().generic_store().keys()?.len();

    println!("Storage Status");
    println!("==============");
    println!("  Data directory: {}", app.config().data_dir().display());
    println!("  Backend: {}", app.backend());
    println!("  Migration: {migration}");
    println!("  Keys in active store: {}", app.store().keys()?.len());
    println!("  Keys in generic store: {generic_keys}");
    Ok(())
}

/// Print the migration report from this start.
///
/// The migration itself runs whenever the data directory is opened.
pub fn migrate(app: &AppContext) {
    let report = app.migration_report();
    if report.skipped {
        println!("✓ Nothing to migrate (backend: {})", app.backend());
        return;
    }

    if report.success {
        println!("✓ Storage migrated successfully");
    } else {
        println!("✗ Storage migrated with errors");
    }
    println!("  Keys found: {}", report.total_keys);
    println!("  Keys migrated: {}", report.items_migrated);
    for failure in &report.errors {
        println!("  Failed: {} ({})", failure.key, failure.message);
    }
}

/// Delete every key from the generic store.
pub fn cleanup(app: &AppContext) -> Result<(), Box<dyn std::error::Error>> {
    if !app.manager().is_fast() {
        return Err("The generic store is the active backend; refusing to clear it.".into());
    }
    let removed = app.migrator().cleanup_generic()?;
    println!("✓ Removed {removed} key(s) from the generic store");
    Ok(())
}

/// Clear the migration flag.
pub fn reset_migration(app: &AppContext) -> Result<(), Box<dyn std::error::Error>> {
    app.migrator().reset_flag()?;
    println!("✓ Migration flag cleared; the migration runs again on next start");
    Ok(())
}
