//! UniArr CLI
//!
//! Command-line tools for UniArr data directories.
//!
//! # Commands
//!
//! - `backup` - Create, restore, list, inspect and delete backups
//! - `services` - Manage configured services
//! - `storage` - Show the active backend and run the storage migration
//! - `schedule` - Configure and run automatic S3 backups

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uniarr_core::{AppConfig, AppContext, BackupCategory, BackupFrequency, HostRuntime, ServiceType};

/// UniArr backup, service and storage tools.
#[derive(Parser)]
#[command(name = "uniarr")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory
    #[arg(global = true, short, long, default_value = "uniarr-data")]
    data_dir: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, restore and manage backups
    #[command(subcommand)]
    Backup(BackupCommand),

    /// Manage configured services
    #[command(subcommand)]
    Services(ServicesCommand),

    /// Storage backend and migration
    #[command(subcommand)]
    Storage(StorageCommand),

    /// Automatic S3 backups
    #[command(subcommand)]
    Schedule(ScheduleCommand),
}

#[derive(Subcommand)]
enum BackupCommand {
    /// Write a new backup to the backup directory
    Create {
        /// Include every section (default when no --include is given)
        #[arg(long, conflicts_with = "include")]
        all: bool,

        /// Section to include, e.g. serviceConfigs (repeatable)
        #[arg(long)]
        include: Vec<BackupCategory>,

        /// Encrypt sensitive sections
        #[arg(long)]
        encrypt: bool,

        /// Encryption password
        #[arg(long)]
        password: Option<String>,
    },

    /// Restore a backup file
    Restore {
        /// Backup file (.json)
        file: PathBuf,

        /// Password for encrypted backups
        #[arg(long)]
        password: Option<String>,

        /// Leave settings untouched
        #[arg(long)]
        skip_settings: bool,

        /// Leave service configs untouched
        #[arg(long)]
        skip_services: bool,
    },

    /// List backups, newest first
    List,

    /// Show what a backup file contains
    Inspect {
        /// Backup file (.json)
        file: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete a backup by file name
    Delete {
        /// Backup file name
        name: String,
    },
}

#[derive(Subcommand)]
enum ServicesCommand {
    /// List configured services
    List,

    /// Add a service
    Add {
        /// Service type, e.g. sonarr
        #[arg(long = "type")]
        service_type: ServiceType,

        /// Display name
        #[arg(long)]
        name: String,

        /// Base URL
        #[arg(long)]
        url: String,

        /// API key
        #[arg(long)]
        api_key: Option<String>,

        /// Basic-auth username
        #[arg(long, requires = "password")]
        username: Option<String>,

        /// Basic-auth password
        #[arg(long, requires = "username")]
        password: Option<String>,
    },

    /// Remove a service by id
    Remove {
        /// Service id
        id: String,
    },
}

#[derive(Subcommand)]
enum StorageCommand {
    /// Show the active backend and migration state
    Status,
    /// Show the result of the storage migration
    Migrate,
    /// Delete every key from the generic store
    Cleanup,
    /// Clear the migration flag so it runs again on next start
    ResetMigration,
}

#[derive(Subcommand)]
enum ScheduleCommand {
    /// Show automatic backup settings
    Status,

    /// Change automatic backup settings
    Configure {
        /// Enable automatic backups
        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        /// Disable automatic backups
        #[arg(long)]
        disable: bool,

        /// Target bucket
        #[arg(long)]
        bucket: Option<String>,

        /// Bucket region
        #[arg(long)]
        region: Option<String>,

        /// daily, weekly or monthly
        #[arg(long)]
        frequency: Option<BackupFrequency>,

        /// S3 access key id
        #[arg(long, requires = "secret_access_key")]
        access_key_id: Option<String>,

        /// S3 secret access key
        #[arg(long, requires = "access_key_id")]
        secret_access_key: Option<String>,
    },

    /// Run one backup and upload it now
    RunNow {
        /// Directory mirroring the bucket (defaults to <data-dir>/s3)
        #[arg(long)]
        mirror: Option<PathBuf>,
    },

    /// Run automatic backups until interrupted
    Daemon {
        /// Directory mirroring the bucket (defaults to <data-dir>/s3)
        #[arg(long)]
        mirror: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = AppConfig::new(&cli.data_dir).host_runtime(HostRuntime::detect());
    let app = match AppContext::open(config) {
        Ok(app) => app,
        Err(e) if e.is_locked() => {
            return Err(format!(
                "{} is in use by another uniarr process (is `uniarr schedule daemon` running?)",
                cli.data_dir.display()
            )
            .into());
        }
        Err(e) => return Err(e.into()),
    };
    let mirror_default = cli.data_dir.join("s3");

    match cli.command {
        Commands::Backup(command) => match command {
            BackupCommand::Create {
                all,
                include,
                encrypt,
                password,
            } => {
                let include = if all { Vec::new() } else { include };
                commands::backup::create(&app, &include, encrypt, password)?;
            }
            BackupCommand::Restore {
                file,
                password,
                skip_settings,
                skip_services,
            } => {
                commands::backup::restore(
                    &app,
                    &file,
                    password.as_deref(),
                    skip_settings,
                    skip_services,
                )?;
            }
            BackupCommand::List => commands::backup::list(&app)?,
            BackupCommand::Inspect { file, format } => {
                commands::backup::inspect(&app, &file, &format)?;
            }
            BackupCommand::Delete { name } => commands::backup::delete(&app, &name)?,
        },
        Commands::Services(command) => match command {
            ServicesCommand::List => commands::services::list(&app),
            ServicesCommand::Add {
                service_type,
                name,
                url,
                api_key,
                username,
                password,
            } => {
                commands::services::add(
                    &app,
                    service_type,
                    name,
                    url,
                    api_key,
                    username.zip(password),
                )?;
            }
            ServicesCommand::Remove { id } => commands::services::remove(&app, &id)?,
        },
        Commands::Storage(command) => match command {
            StorageCommand::Status => commands::storage::status(&app)?,
            StorageCommand::Migrate => commands::storage::migrate(&app),
            StorageCommand::Cleanup => commands::storage::cleanup(&app)?,
            StorageCommand::ResetMigration => commands::storage::reset_migration(&app)?,
        },
        Commands::Schedule(command) => match command {
            ScheduleCommand::Status => commands::schedule::status(&app)?,
            ScheduleCommand::Configure {
                enable,
                disable,
                bucket,
                region,
                frequency,
                access_key_id,
                secret_access_key,
            } => {
                let enabled = match (enable, disable) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                };
                commands::schedule::configure(
                    &app,
                    commands::schedule::Changes {
                        enabled,
                        bucket,
                        region,
                        frequency,
                        credentials: access_key_id.zip(secret_access_key),
                    },
                )?;
            }
            ScheduleCommand::RunNow { mirror } => {
                commands::schedule::run_now(&app, &mirror.unwrap_or(mirror_default))?;
            }
            ScheduleCommand::Daemon { mirror } => {
                commands::schedule::daemon(&app, &mirror.unwrap_or(mirror_default))?;
            }
        },
    }

    Ok(())
}
