//! The backup document envelope and its validation.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// `appData` field holding the encrypted sensitive section.
pub const ENCRYPTED_DATA: &str = "encryptedData";

/// A backup schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BackupVersion {
    /// Original format.
    #[serde(rename = "1.0")]
    V1_0,
    /// Full plaintext backups.
    #[serde(rename = "1.1")]
    V1_1,
    /// Selective backups with optional encryption.
    #[serde(rename = "1.2")]
    V1_2,
}

impl BackupVersion {
    /// Every version this build can read.
    pub const SUPPORTED: [BackupVersion; 3] = [Self::V1_0, Self::V1_1, Self::V1_2];

    /// Wire form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1_0 => "1.0",
            Self::V1_1 => "1.1",
            Self::V1_2 => "1.2",
        }
    }

    /// Parses a wire version, returning `None` for unsupported values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::SUPPORTED.into_iter().find(|v| v.as_str() == s)
    }
}

impl fmt::Display for BackupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters needed to decrypt `appData.encryptedData`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionInfo {
    /// Algorithm tag.
    pub algorithm: String,
    /// Hex-encoded salt.
    pub salt: String,
    /// Hex-encoded IV.
    pub iv: String,
    /// PBKDF2 iterations; absent in documents that predate the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,
}

/// A versioned backup envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDocument {
    /// Schema version.
    pub version: BackupVersion,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Whether `app_data` carries an encrypted section.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub encrypted: bool,
    /// Decryption parameters, present when `encrypted`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_info: Option<EncryptionInfo>,
    /// Named sections.
    pub app_data: Map<String, Value>,
}

impl BackupDocument {
    /// Creates an empty plaintext document stamped now.
    #[must_use]
    pub fn new(version: BackupVersion) -> Self {
        Self {
            version,
            timestamp: Utc::now(),
            encrypted: false,
            encryption_info: None,
            app_data: Map::new(),
        }
    }

    /// Parses and validates backup JSON.
    ///
    /// Validation order: JSON syntax, object shape, required fields
    /// (`version`, `timestamp`, `appData`), version allow-list, then
    /// `serviceConfigs` being an array when present.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotJson`], [`CoreError::NotBackupFormat`] or
    /// [`CoreError::UnsupportedVersion`].
    pub fn parse(text: &str) -> CoreResult<Self> {
        let value: Value = serde_json::from_str(text.trim_start_matches('\u{feff}')).map_err(
            |e| CoreError::NotJson {
                message: e.to_string(),
            },
        )?;
        Self::from_value(value)
    }

    /// Validates an already-parsed JSON value. See [`Self::parse`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotBackupFormat`] or
    /// [`CoreError::UnsupportedVersion`].
    pub fn from_value(value: Value) -> CoreResult<Self> {
        let Value::Object(mut root) = value else {
            return Err(CoreError::not_backup_format("top level is not an object"));
        };

        for field in ["version", "timestamp", "appData"] {
            if !root.contains_key(field) {
                return Err(CoreError::not_backup_format(format!(
                    "missing required field '{field}'"
                )));
            }
        }

        let version = match root.get("version") {
            Some(Value::String(v)) => {
                BackupVersion::parse(v).ok_or_else(|| CoreError::UnsupportedVersion {
                    version: v.clone(),
                })?
            }
            other => {
                return Err(CoreError::UnsupportedVersion {
                    version: other.map_or_else(String::new, Value::to_string),
                })
            }
        };

        let timestamp = root
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| CoreError::not_backup_format("'timestamp' is not an ISO-8601 date"))?;

        let Some(Value::Object(app_data)) = root.remove("appData") else {
            return Err(CoreError::not_backup_format("'appData' is not an object"));
        };

        if let Some(configs) = app_data.get("serviceConfigs") {
            if !configs.is_array() {
                return Err(CoreError::not_backup_format(
                    "'appData.serviceConfigs' is not an array",
                ));
            }
        }

        let encrypted = match root.get("encrypted") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => return Err(CoreError::not_backup_format("'encrypted' is not a boolean")),
        };

        let encryption_info: Option<EncryptionInfo> = match root.remove("encryptionInfo") {
            None | Some(Value::Null) => None,
            Some(info) => Some(serde_json::from_value(info).map_err(|e| {
                CoreError::not_backup_format(format!("malformed 'encryptionInfo': {e}"))
            })?),
        };
        if let Some(info) = &encryption_info {
            super::crypto::check_iterations(info.iterations)?;
        }

        Ok(Self {
            version,
            timestamp,
            encrypted,
            encryption_info,
            app_data,
        })
    }

    /// Returns the encrypted section, if present.
    #[must_use]
    pub fn encrypted_data(&self) -> Option<&str> {
        self.app_data.get(ENCRYPTED_DATA).and_then(Value::as_str)
    }

    /// Returns true if every field needed for decryption is present.
    #[must_use]
    pub fn has_encrypted_payload(&self) -> bool {
        self.encrypted && self.encryption_info.is_some() && self.encrypted_data().is_some()
    }

    /// Names of the sections in `app_data`, excluding the encrypted blob.
    #[must_use]
    pub fn section_names(&self) -> Vec<String> {
        self.app_data
            .keys()
            .filter(|k| k.as_str() != ENCRYPTED_DATA)
            .cloned()
            .collect()
    }

    /// Serializes with 2-space indentation.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_pretty_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> Value {
        json!({
            "version": "1.2",
            "timestamp": "2024-03-01T12:00:00.000Z",
            "appData": {}
        })
    }

    #[test]
    fn parses_minimal_document() {
        let doc = BackupDocument::from_value(minimal()).unwrap();
        assert_eq!(doc.version, BackupVersion::V1_2);
        assert!(!doc.encrypted);
        assert!(doc.section_names().is_empty());
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            BackupDocument::parse("not json {"),
            Err(CoreError::NotJson { .. })
        ));
    }

    #[test]
    fn rejects_missing_fields() {
        for field in ["version", "timestamp", "appData"] {
            let mut value = minimal();
            value.as_object_mut().unwrap().remove(field);
            let err = BackupDocument::from_value(value).unwrap_err();
            assert!(matches!(err, CoreError::NotBackupFormat { .. }), "{field}");
        }
    }

    #[test]
    fn rejects_unknown_version() {
        let mut value = minimal();
        value["version"] = json!("2.0");
        assert!(matches!(
            BackupDocument::from_value(value),
            Err(CoreError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn rejects_non_array_service_configs() {
        let mut value = minimal();
        value["appData"]["serviceConfigs"] = json!({"id": "x"});
        assert!(matches!(
            BackupDocument::from_value(value),
            Err(CoreError::NotBackupFormat { .. })
        ));
    }

    #[test]
    fn pretty_json_uses_two_spaces() {
        let mut doc = BackupDocument::new(BackupVersion::V1_1);
        doc.app_data.insert("recentIPs".into(), json!([]));
        let text = doc.to_pretty_json().unwrap();
        assert!(text.contains("\n  \"version\": \"1.1\""));
        assert!(!text.contains("encrypted"));

        let reparsed = BackupDocument::parse(&text).unwrap();
        assert_eq!(reparsed, doc);
    }

    #[test]
    fn excessive_iterations_rejected_on_parse() {
        let text = r#"{
            "version": "1.2",
            "timestamp": "2024-05-01T10:00:00Z",
            "encrypted": true,
            "encryptionInfo": {"algorithm": "AES-256-GCM-PBKDF2", "salt": "00", "iv": "00", "iterations": 4294967295},
            "appData": {"encryptedData": "AAAA"}
        }"#;
        let err = BackupDocument::parse(text).unwrap_err();
        assert!(matches!(err, CoreError::NotBackupFormat { .. }));
        assert!(err.is_validation());
    }

    #[test]
    fn encrypted_payload_detection() {
        let mut doc = BackupDocument::new(BackupVersion::V1_2);
        assert!(!doc.has_encrypted_payload());
        doc.encrypted = true;
        doc.encryption_info = Some(EncryptionInfo {
            algorithm: "AES-256-GCM-PBKDF2".into(),
            salt: "00".into(),
            iv: "00".into(),
            iterations: Some(1),
        });
        doc.app_data.insert(ENCRYPTED_DATA.into(), json!("AAAA"));
        assert!(doc.has_encrypted_payload());
        assert!(doc.section_names().is_empty());
    }
}
