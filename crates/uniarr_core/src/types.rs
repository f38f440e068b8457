//! Domain records persisted by [`crate::SecureStorage`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A supported service integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// Sonarr (TV).
    Sonarr,
    /// Radarr (movies).
    Radarr,
    /// Lidarr (music).
    Lidarr,
    /// Readarr (books).
    Readarr,
    /// Prowlarr (indexers).
    Prowlarr,
    /// Bazarr (subtitles).
    Bazarr,
    /// Jellyseerr (requests).
    Jellyseerr,
    /// Overseerr (requests).
    Overseerr,
    /// Jellyfin media server.
    Jellyfin,
    /// Plex media server.
    Plex,
    /// Emby media server.
    Emby,
    /// qBittorrent download client.
    Qbittorrent,
    /// Transmission download client.
    Transmission,
    /// Deluge download client.
    Deluge,
    /// SABnzbd download client.
    Sabnzbd,
    /// NZBGet download client.
    Nzbget,
    /// rTorrent download client.
    Rtorrent,
    /// Tautulli statistics.
    Tautulli,
    /// AdGuard Home.
    Adguard,
    /// Homarr dashboard.
    Homarr,
}

impl ServiceType {
    /// Every supported integration.
    pub const ALL: [ServiceType; 20] = [
        Self::Sonarr,
        Self::Radarr,
        Self::Lidarr,
        Self::Readarr,
        Self::Prowlarr,
        Self::Bazarr,
        Self::Jellyseerr,
        Self::Overseerr,
        Self::Jellyfin,
        Self::Plex,
        Self::Emby,
        Self::Qbittorrent,
        Self::Transmission,
        Self::Deluge,
        Self::Sabnzbd,
        Self::Nzbget,
        Self::Rtorrent,
        Self::Tautulli,
        Self::Adguard,
        Self::Homarr,
    ];

    /// Wire name of the integration.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sonarr => "sonarr",
            Self::Radarr => "radarr",
            Self::Lidarr => "lidarr",
            Self::Readarr => "readarr",
            Self::Prowlarr => "prowlarr",
            Self::Bazarr => "bazarr",
            Self::Jellyseerr => "jellyseerr",
            Self::Overseerr => "overseerr",
            Self::Jellyfin => "jellyfin",
            Self::Plex => "plex",
            Self::Emby => "emby",
            Self::Qbittorrent => "qbittorrent",
            Self::Transmission => "transmission",
            Self::Deluge => "deluge",
            Self::Sabnzbd => "sabnzbd",
            Self::Nzbget => "nzbget",
            Self::Rtorrent => "rtorrent",
            Self::Tautulli => "tautulli",
            Self::Adguard => "adguard",
            Self::Homarr => "homarr",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| format!("unknown service type: {s}"))
    }
}

/// A configured connection to an external service.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Stable identifier.
    pub id: String,
    /// Integration kind.
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    /// Display name.
    pub name: String,
    /// Base URL.
    pub url: String,
    /// API key, if the service uses one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Username for basic-auth services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Password for basic-auth services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// HTTP proxy used to reach the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    /// Request timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Whether the service is active.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// When the service was first saved.
    pub created_at: DateTime<Utc>,
    /// When the service was last saved.
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl ServiceConfig {
    /// Creates an enabled service with a fresh id and no credentials.
    #[must_use]
    pub fn new(service_type: ServiceType, name: impl Into<String>, url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            service_type,
            name: name.into(),
            url: url.into(),
            api_key: None,
            username: None,
            password: None,
            proxy_url: None,
            timeout: None,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets basic-auth credentials.
    #[must_use]
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Splits the config into its non-sensitive and sensitive halves.
    ///
    /// The credential half is `None` when the service has no credentials.
    #[must_use]
    pub fn split(&self) -> (ServiceRecord, Option<ServiceCredentials>) {
        let record = ServiceRecord {
            id: self.id.clone(),
            service_type: self.service_type,
            name: self.name.clone(),
            url: self.url.clone(),
            proxy_url: self.proxy_url.clone(),
            timeout: self.timeout,
            enabled: self.enabled,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        let credentials = ServiceCredentials {
            api_key: self.api_key.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        };
        let credentials = (!credentials.is_empty()).then_some(credentials);
        (record, credentials)
    }

    /// Rebuilds a config from its two halves.
    #[must_use]
    pub fn merge(record: ServiceRecord, credentials: Option<ServiceCredentials>) -> Self {
        let credentials = credentials.unwrap_or_default();
        Self {
            id: record.id,
            service_type: record.service_type,
            name: record.name,
            url: record.url,
            api_key: credentials.api_key,
            username: credentials.username,
            password: credentials.password,
            proxy_url: record.proxy_url,
            timeout: record.timeout,
            enabled: record.enabled,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }

    /// Returns a copy with every credential field cleared.
    #[must_use]
    pub fn without_credentials(&self) -> Self {
        let (record, _) = self.split();
        Self::merge(record, None)
    }

    /// Returns true if any credential field is set.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() || self.username.is_some() || self.password.is_some()
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("id", &self.id)
            .field("service_type", &self.service_type)
            .field("name", &self.name)
            .field("url", &self.url)
            .field("has_credentials", &self.has_credentials())
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Non-sensitive half of a [`ServiceConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    /// Stable identifier.
    pub id: String,
    /// Integration kind.
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    /// Display name.
    pub name: String,
    /// Base URL.
    pub url: String,
    /// HTTP proxy used to reach the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    /// Request timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Whether the service is active.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// When the service was first saved.
    pub created_at: DateTime<Utc>,
    /// When the service was last saved.
    pub updated_at: DateTime<Utc>,
}

/// Sensitive half of a [`ServiceConfig`].
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCredentials {
    /// API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ServiceCredentials {
    /// Returns true if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.api_key.is_none() && self.username.is_none() && self.password.is_none()
    }
}

impl fmt::Debug for ServiceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCredentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// One past local-network discovery scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkScanHistoryEntry {
    /// Identifier of the scan.
    pub id: String,
    /// When the scan ran.
    pub timestamp: DateTime<Utc>,
    /// Scan duration in milliseconds.
    #[serde(default)]
    pub duration: u64,
    /// Number of services discovered.
    #[serde(default)]
    pub services_found: u32,
    /// Scanned subnet, e.g. `192.168.1.0/24`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
    /// Single address scanned instead of a subnet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_ip: Option<String>,
}

impl NetworkScanHistoryEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(duration: u64, services_found: u32, subnet: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            duration,
            services_found,
            subnet,
            custom_ip: None,
        }
    }
}

/// An IP address tried during discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentIp {
    /// The address.
    pub ip: String,
    /// When it was last used.
    pub timestamp: DateTime<Utc>,
    /// Subnet the address belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
    /// Services discovered at the address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services_found: Option<u32>,
}

/// Access keys for S3-compatible object storage.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Credentials {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
}

impl fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&ServiceType::Jellyseerr).unwrap(),
            "\"jellyseerr\""
        );
        assert_eq!("Radarr".parse::<ServiceType>().unwrap(), ServiceType::Radarr);
        assert!("kodi".parse::<ServiceType>().is_err());
        assert!(serde_json::from_str::<ServiceType>("\"kodi\"").is_err());
    }

    #[test]
    fn split_and_merge() {
        let config = ServiceConfig::new(ServiceType::Sonarr, "Sonarr", "http://nas:8989")
            .with_api_key("abc");
        let (record, creds) = config.split();
        assert_eq!(record.id, config.id);
        assert_eq!(creds.as_ref().and_then(|c| c.api_key.as_deref()), Some("abc"));
        assert_eq!(ServiceConfig::merge(record, creds), config);
    }

    #[test]
    fn split_without_credentials() {
        let config = ServiceConfig::new(ServiceType::Plex, "Plex", "http://nas:32400");
        let (_, creds) = config.split();
        assert!(creds.is_none());
    }

    #[test]
    fn record_has_no_secret_fields() {
        let config = ServiceConfig::new(ServiceType::Radarr, "Radarr", "http://nas:7878")
            .with_basic_auth("admin", "hunter2");
        let json = serde_json::to_value(config.split().0).unwrap();
        assert!(json.get("password").is_none());
        assert!(json.get("username").is_none());
        assert_eq!(json["type"], "radarr");
    }

    #[test]
    fn debug_redacts_secrets() {
        let creds = S3Credentials {
            access_key_id: "AKIA".into(),
            secret_access_key: "shh".into(),
        };
        assert!(!format!("{creds:?}").contains("shh"));
    }
}
