//! Access to the persisted settings blob.
//!
//! Settings are owned by the UI's settings store and persisted under
//! `SettingsStore:v1` as `{"state": {...}, "version": N}`. This module reads
//! and patches that blob without knowing its full schema.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uniarr_storage::KeyValueStore;

/// Storage key of the settings blob.
pub const SETTINGS_KEY: &str = "SettingsStore:v1";

const AUTO_BACKUP_ENABLED: &str = "s3AutoBackupEnabled";
const BUCKET_NAME: &str = "s3BucketName";
const REGION: &str = "s3Region";
const FREQUENCY: &str = "s3AutoBackupFrequency";
const LAST_AUTO_BACKUP: &str = "s3LastAutoBackup";

/// How often automatic backups run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackupFrequency {
    /// Every 24 hours.
    #[default]
    Daily,
    /// Every 7 days.
    Weekly,
    /// Every 30 days.
    Monthly,
}

impl BackupFrequency {
    /// Interval between runs.
    #[must_use]
    pub fn interval(self) -> Duration {
        const DAY: u64 = 24 * 60 * 60;
        match self {
            Self::Daily => Duration::from_secs(DAY),
            Self::Weekly => Duration::from_secs(7 * DAY),
            Self::Monthly => Duration::from_secs(30 * DAY),
        }
    }

    /// Name stored in settings.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl fmt::Display for BackupFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupFrequency {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(CoreError::configuration(format!(
                "unknown backup frequency: {other}"
            ))),
        }
    }
}

/// Automatic backup preferences.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AutoBackupSettings {
    /// Whether automatic backups are enabled.
    pub enabled: bool,
    /// Target bucket.
    pub bucket: Option<String>,
    /// Target region.
    pub region: Option<String>,
    /// Run frequency.
    pub frequency: BackupFrequency,
    /// When the last automatic backup completed.
    pub last_backup: Option<DateTime<Utc>>,
}

impl AutoBackupSettings {
    /// Returns bucket and region if both are set and non-empty.
    #[must_use]
    pub fn target(&self) -> Option<(&str, &str)> {
        let bucket = self.bucket.as_deref().filter(|b| !b.trim().is_empty())?;
        let region = self.region.as_deref().filter(|r| !r.trim().is_empty())?;
        Some((bucket, region))
    }
}

/// Reads and patches the settings blob.
#[derive(Clone)]
pub struct SettingsAccess {
    store: Arc<dyn KeyValueStore>,
}

impl SettingsAccess {
    /// Creates an accessor over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Returns the `state` object, or `None` if no settings are persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob cannot be read or is not valid JSON.
    pub fn state(&self) -> CoreResult<Option<Map<String, Value>>> {
        let Some(raw) = self.store.get(SETTINGS_KEY)? else {
            return Ok(None);
        };
        let blob: Value = serde_json::from_str(&raw)?;
        match blob.get("state") {
            Some(Value::Object(state)) => Ok(Some(state.clone())),
            Some(_) => Err(CoreError::invalid_operation(
                "settings blob has a non-object state",
            )),
            None => Ok(Some(Map::new())),
        }
    }

    /// Shallow-merges `patch` into the `state` object, creating the blob
    /// if missing. The blob's `version` is preserved.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob cannot be read or written.
    pub fn merge_state(&self, patch: Map<String, Value>) -> CoreResult<()> {
        let mut blob = match self.store.get(SETTINGS_KEY)? {
            Some(raw) => match serde_json::from_str::<Value>(&raw)? {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            None => Map::new(),
        };

        let state = blob
            .entry("state")
            .or_insert_with(|| Value::Object(Map::new()));
        if !state.is_object() {
            *state = Value::Object(Map::new());
        }
        if let Value::Object(state) = state {
            state.extend(patch);
        }
        blob.entry("version").or_insert(Value::from(0));

        self.store
            .set(SETTINGS_KEY, &serde_json::to_string(&Value::Object(blob))?)?;
        Ok(())
    }

    /// Reads the automatic backup preferences.
    ///
    /// Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob cannot be read.
    pub fn auto_backup(&self) -> CoreResult<AutoBackupSettings> {
        let Some(state) = self.state()? else {
            return Ok(AutoBackupSettings::default());
        };

        let string = |key: &str| state.get(key).and_then(Value::as_str).map(str::to_string);
        let frequency = match string(FREQUENCY) {
            Some(f) => f.parse()?,
            None => BackupFrequency::default(),
        };
        let last_backup = string(LAST_AUTO_BACKUP)
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(AutoBackupSettings {
            enabled: state
                .get(AUTO_BACKUP_ENABLED)
                .and_then(Value::as_bool)
                .unwrap_or(false),
            bucket: string(BUCKET_NAME),
            region: string(REGION),
            frequency,
            last_backup,
        })
    }

    /// Writes the automatic backup preferences, keeping `s3LastAutoBackup`.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob cannot be written.
    pub fn set_auto_backup(&self, settings: &AutoBackupSettings) -> CoreResult<()> {
        let mut patch = Map::new();
        patch.insert(AUTO_BACKUP_ENABLED.into(), Value::Bool(settings.enabled));
        patch.insert(BUCKET_NAME.into(), opt_string(settings.bucket.as_deref()));
        patch.insert(REGION.into(), opt_string(settings.region.as_deref()));
        patch.insert(FREQUENCY.into(), Value::from(settings.frequency.as_str()));
        self.merge_state(patch)
    }

    /// Records the completion time of an automatic backup.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob cannot be written.
    pub fn record_last_auto_backup(&self, at: DateTime<Utc>) -> CoreResult<()> {
        let mut patch = Map::new();
        patch.insert(LAST_AUTO_BACKUP.into(), Value::from(at.to_rfc3339()));
        self.merge_state(patch)
    }
}

fn opt_string(value: Option<&str>) -> Value {
    value.map_or(Value::Null, Value::from)
}

impl fmt::Debug for SettingsAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsAccess")
            .field("store", &self.store.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uniarr_storage::MemoryStore;

    #[test]
    fn missing_blob_gives_defaults() {
        let settings = SettingsAccess::new(Arc::new(MemoryStore::new()));
        assert!(settings.state().unwrap().is_none());

        let auto = settings.auto_backup().unwrap();
        assert!(!auto.enabled);
        assert_eq!(auto.frequency, BackupFrequency::Daily);
        assert!(auto.target().is_none());
    }

    #[test]
    fn merge_preserves_other_fields() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(SETTINGS_KEY, r#"{"state":{"theme":"dark"},"version":3}"#)
            .unwrap();
        let settings = SettingsAccess::new(Arc::clone(&store) as Arc<dyn KeyValueStore>);

        settings
            .set_auto_backup(&AutoBackupSettings {
                enabled: true,
                bucket: Some("media".into()),
                region: Some("eu-west-1".into()),
                frequency: BackupFrequency::Weekly,
                last_backup: None,
            })
            .unwrap();

        let blob: Value = serde_json::from_str(&store.get(SETTINGS_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(blob["version"], 3);
        assert_eq!(blob["state"]["theme"], "dark");

        let auto = settings.auto_backup().unwrap();
        assert_eq!(auto.target(), Some(("media", "eu-west-1")));
        assert_eq!(auto.frequency, BackupFrequency::Weekly);
    }

    #[test]
    fn last_backup_round_trips() {
        let settings = SettingsAccess::new(Arc::new(MemoryStore::new()));
        let at = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        settings.record_last_auto_backup(at).unwrap();
        assert_eq!(settings.auto_backup().unwrap().last_backup, Some(at));
    }

    #[test]
    fn blank_bucket_is_incomplete() {
        let auto = AutoBackupSettings {
            enabled: true,
            bucket: Some("  ".into()),
            region: Some("us-east-1".into()),
            ..Default::default()
        };
        assert!(auto.target().is_none());
    }

    #[test]
    fn frequency_intervals() {
        assert_eq!(BackupFrequency::Daily.interval().as_secs(), 86_400);
        assert_eq!(BackupFrequency::Weekly.interval().as_secs(), 604_800);
        assert_eq!(BackupFrequency::Monthly.interval().as_secs(), 2_592_000);
        assert!("hourly".parse::<BackupFrequency>().is_err());
    }
}
