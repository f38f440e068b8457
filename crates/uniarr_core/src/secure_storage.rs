//! Service configuration storage with credential isolation.
//!
//! Each [`ServiceConfig`] is split in two: the non-sensitive record goes to
//! the key-value store under `SecureStorage_service_<id>_config`, and the
//! credentials (when present) go to the [`SecretStore`] under
//! `SecureStorage_service_<id>_creds`. An id index is kept under
//! `SecureStorage_index`.
//!
//! Read paths never fail: errors are logged and surface as "no data".

use crate::config::AppConfig;
use crate::error::CoreResult;
use crate::types::{
    NetworkScanHistoryEntry, RecentIp, S3Credentials, ServiceConfig, ServiceCredentials,
    ServiceRecord,
};
use chrono::Utc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uniarr_storage::{KeyValueStore, SecretStore};

/// Prefix shared by every SecureStorage key.
pub const KEY_PREFIX: &str = "SecureStorage_";
/// Key of the service id index.
pub const INDEX_KEY: &str = "SecureStorage_index";
/// Key of the network scan history list.
pub const SCAN_HISTORY_KEY: &str = "SecureStorage_scan_history";
/// Key of the recent IP list.
pub const RECENT_IPS_KEY: &str = "SecureStorage_recent_ips";
/// Secret key of the S3 access key id.
pub const S3_ACCESS_KEY_ID_KEY: &str = "SecureStorage_s3_access_key_id";
/// Secret key of the S3 secret access key.
pub const S3_SECRET_ACCESS_KEY_KEY: &str = "SecureStorage_s3_secret_access_key";
/// Secret key of the TMDB API key.
pub const TMDB_API_KEY_KEY: &str = "SecureStorage_tmdb_api_key";

fn config_key(id: &str) -> String {
    format!("{KEY_PREFIX}service_{id}_config")
}

fn creds_key(id: &str) -> String {
    format!("{KEY_PREFIX}service_{id}_creds")
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    scan_history_cap: usize,
    recent_ip_cap: usize,
    credential_warn_threshold: usize,
}

/// Credential-aware persistence for service configs and related data.
pub struct SecureStorage {
    store: Arc<dyn KeyValueStore>,
    secrets: Arc<dyn SecretStore>,
    limits: Limits,
    cache: Mutex<Option<BTreeMap<String, ServiceConfig>>>,
}

impl SecureStorage {
    /// Creates a secure storage over a key-value store and a credential store.
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        secrets: Arc<dyn SecretStore>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            secrets,
            limits: Limits {
                scan_history_cap: config.scan_history_cap,
                recent_ip_cap: config.recent_ip_cap,
                credential_warn_threshold: config.credential_warn_threshold,
            },
            cache: Mutex::new(None),
        }
    }

    // --- Service configs ---

    /// Saves `config`, preserving the original `created_at` of an existing
    /// record with the same id and stamping `updated_at`.
    ///
    /// Returns the config as stored.
    ///
    /// The credentials are written first. If either half fails, the stored
    /// halves and the cache still describe the previous config.
    ///
    /// # Errors
    ///
    /// Returns an error if either half cannot be persisted.
    pub fn save_service_config(&self, config: &ServiceConfig) -> CoreResult<ServiceConfig> {
        let mut cache = self.cache.lock();
        let configs = self.loaded(&mut cache);

        let mut stored = config.clone();
        let previous = configs.get(&config.id).cloned();
        if let Some(existing) = &previous {
            stored.created_at = existing.created_at;
        }
        stored.updated_at = Utc::now().max(stored.created_at);

        let (record, credentials) = stored.split();
        let record = serde_json::to_string(&record)?;
        self.write_credentials(&stored.id, credentials.as_ref())?;
        if let Err(e) = self.store.set(&config_key(&stored.id), &record) {
            let old_credentials = previous.as_ref().and_then(|p| p.split().1);
            if let Err(rollback) = self.write_credentials(&stored.id, old_credentials.as_ref()) {
                error!(id = %stored.id, error = %rollback, "failed to restore previous service credentials");
            }
            return Err(e.into());
        }

        let is_new = !configs.contains_key(&stored.id);
        configs.insert(stored.id.clone(), stored.clone());
        if is_new {
            self.write_index(configs)?;
        }

        debug!(id = %stored.id, service = %stored.service_type, "saved service config");
        Ok(stored)
    }

    fn write_credentials(&self, id: &str, credentials: Option<&ServiceCredentials>) -> CoreResult<()> {
        let key = creds_key(id);
        match credentials {
            Some(credentials) => {
                let payload = serde_json::to_string(credentials)?;
                if payload.chars().count() > self.limits.credential_warn_threshold {
                    warn!(
                        id,
                        size = payload.len(),
                        limit = self.secrets.item_limit(),
                        "service credentials approach the credential store item limit"
                    );
                }
                self.secrets.set_secret(&key, &payload)?;
            }
            None => self.delete_secret_best_effort(&key),
        }
        Ok(())
    }

    fn write_index(&self, configs: &BTreeMap<String, ServiceConfig>) -> CoreResult<()> {
        let ids: Vec<&String> = configs.keys().collect();
        self.store.set(INDEX_KEY, &serde_json::to_string(&ids)?)?;
        Ok(())
    }

    /// Returns every saved service, sorted by name.
    #[must_use]
    pub fn service_configs(&self) -> Vec<ServiceConfig> {
        let mut cache = self.cache.lock();
        let mut configs: Vec<ServiceConfig> = self.loaded(&mut cache).values().cloned().collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        configs
    }

    /// Returns the service with `id`.
    #[must_use]
    pub fn service_config(&self, id: &str) -> Option<ServiceConfig> {
        let mut cache = self.cache.lock();
        self.loaded(&mut cache).get(id).cloned()
    }

    /// Removes both halves of the service with `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record or index cannot be updated.
    pub fn remove_service_config(&self, id: &str) -> CoreResult<()> {
        let mut cache = self.cache.lock();
        let configs = self.loaded(&mut cache);

        self.store.remove(&config_key(id))?;
        self.delete_secret_best_effort(&creds_key(id));
        configs.remove(id);
        self.write_index(configs)?;
        debug!(id, "removed service config");
        Ok(())
    }

    /// Removes every service config and the index.
    ///
    /// # Errors
    ///
    /// Returns an error if a record or the index cannot be removed.
    pub fn clear_all(&self) -> CoreResult<()> {
        let mut cache = self.cache.lock();
        let configs = self.loaded(&mut cache);

        for id in configs.keys() {
            self.store.remove(&config_key(id))?;
            self.delete_secret_best_effort(&creds_key(id));
        }
        self.store.remove(INDEX_KEY)?;
        configs.clear();
        Ok(())
    }

    fn loaded<'a>(
        &self,
        cache: &'a mut Option<BTreeMap<String, ServiceConfig>>,
    ) -> &'a mut BTreeMap<String, ServiceConfig> {
        cache.get_or_insert_with(|| self.load_all())
    }

    fn load_all(&self) -> BTreeMap<String, ServiceConfig> {
        let ids: Vec<String> = self.read_json(INDEX_KEY).unwrap_or_default();
        let mut configs = BTreeMap::new();

        for id in ids {
            let Some(record) = self.read_json::<ServiceRecord>(&config_key(&id)) else {
                warn!(id, "service index references a missing record");
                continue;
            };
            let credentials = match self.secrets.get_secret(&creds_key(&id)) {
                Ok(Some(raw)) => serde_json::from_str(&raw)
                    .map_err(|e| error!(id, error = %e, "unreadable service credentials"))
                    .ok(),
                Ok(None) => None,
                Err(e) => {
                    error!(id, error = %e, "failed to read service credentials");
                    None
                }
            };
            configs.insert(id, ServiceConfig::merge(record, credentials));
        }

        debug!(count = configs.len(), "loaded service configs");
        configs
    }

    // --- Bounded histories ---

    /// Returns the network scan history, most recent first.
    #[must_use]
    pub fn network_scan_history(&self) -> Vec<NetworkScanHistoryEntry> {
        self.read_json(SCAN_HISTORY_KEY).unwrap_or_default()
    }

    /// Prepends `entry` to the scan history, evicting past the cap.
    ///
    /// # Errors
    ///
    /// Returns an error if the list cannot be written.
    pub fn save_network_scan_history(&self, entry: NetworkScanHistoryEntry) -> CoreResult<()> {
        let mut history = self.network_scan_history();
        history.insert(0, entry);
        self.set_network_scan_history(history)
    }

    /// Replaces the scan history, truncating to the cap.
    ///
    /// # Errors
    ///
    /// Returns an error if the list cannot be written.
    pub fn set_network_scan_history(&self, mut history: Vec<NetworkScanHistoryEntry>) -> CoreResult<()> {
        history.truncate(self.limits.scan_history_cap);
        self.write_json(SCAN_HISTORY_KEY, &history)
    }

    /// Clears the scan history.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be removed.
    pub fn clear_network_scan_history(&self) -> CoreResult<()> {
        self.store.remove(SCAN_HISTORY_KEY)?;
        Ok(())
    }

    /// Returns the recent IPs, most recent first.
    #[must_use]
    pub fn recent_ips(&self) -> Vec<RecentIp> {
        self.read_json(RECENT_IPS_KEY).unwrap_or_default()
    }

    /// Puts `ip` at the front of the recent list, evicting past the cap.
    ///
    /// An address already in the list moves to the front.
    ///
    /// # Errors
    ///
    /// Returns an error if the list cannot be written.
    pub fn add_recent_ip(
        &self,
        ip: &str,
        subnet: Option<String>,
        services_found: Option<u32>,
    ) -> CoreResult<()> {
        let mut ips = self.recent_ips();
        ips.retain(|entry| entry.ip != ip);
        ips.insert(
            0,
            RecentIp {
                ip: ip.to_string(),
                timestamp: Utc::now(),
                subnet,
                services_found,
            },
        );
        self.set_recent_ips(ips)
    }

    /// Replaces the recent IPs, truncating to the cap.
    ///
    /// # Errors
    ///
    /// Returns an error if the list cannot be written.
    pub fn set_recent_ips(&self, mut ips: Vec<RecentIp>) -> CoreResult<()> {
        ips.truncate(self.limits.recent_ip_cap);
        self.write_json(RECENT_IPS_KEY, &ips)
    }

    /// Clears the recent IPs.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be removed.
    pub fn clear_recent_ips(&self) -> CoreResult<()> {
        self.store.remove(RECENT_IPS_KEY)?;
        Ok(())
    }

    // --- Credentials ---

    /// Saves both S3 keys.
    ///
    /// # Errors
    ///
    /// Returns an error if either key cannot be stored.
    pub fn save_s3_credentials(&self, credentials: &S3Credentials) -> CoreResult<()> {
        self.secrets
            .set_secret(S3_ACCESS_KEY_ID_KEY, &credentials.access_key_id)?;
        self.secrets
            .set_secret(S3_SECRET_ACCESS_KEY_KEY, &credentials.secret_access_key)?;
        Ok(())
    }

    /// Returns the S3 keys if both are stored.
    #[must_use]
    pub fn s3_credentials(&self) -> Option<S3Credentials> {
        let access_key_id = self.secret(S3_ACCESS_KEY_ID_KEY)?;
        let secret_access_key = self.secret(S3_SECRET_ACCESS_KEY_KEY)?;
        Some(S3Credentials {
            access_key_id,
            secret_access_key,
        })
    }

    /// Deletes both S3 keys. Best-effort.
    pub fn delete_s3_credentials(&self) {
        self.delete_secret_best_effort(S3_ACCESS_KEY_ID_KEY);
        self.delete_secret_best_effort(S3_SECRET_ACCESS_KEY_KEY);
    }

    /// Returns the stored TMDB API key.
    #[must_use]
    pub fn tmdb_api_key(&self) -> Option<String> {
        self.secret(TMDB_API_KEY_KEY)
    }

    /// Stores the TMDB API key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be stored.
    pub fn set_tmdb_api_key(&self, api_key: &str) -> CoreResult<()> {
        self.set_secret(TMDB_API_KEY_KEY, api_key)
    }

    /// Deletes the TMDB API key. Best-effort.
    pub fn delete_tmdb_api_key(&self) {
        self.delete_secret_best_effort(TMDB_API_KEY_KEY);
    }

    /// Reads a raw secret. Errors are logged and read as `None`.
    #[must_use]
    pub fn secret(&self, key: &str) -> Option<String> {
        self.secrets
            .get_secret(key)
            .map_err(|e| error!(key, error = %e, "failed to read secret"))
            .ok()
            .flatten()
    }

    /// Stores a raw secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the value exceeds the item limit or cannot be
    /// persisted.
    pub fn set_secret(&self, key: &str, value: &str) -> CoreResult<()> {
        self.secrets.set_secret(key, value)?;
        Ok(())
    }

    fn delete_secret_best_effort(&self, key: &str) {
        if let Err(e) = self.secrets.delete_secret(key) {
            debug!(key, error = %e, "ignoring credential delete failure");
        }
    }

    // --- JSON helpers ---

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key) {
            Ok(raw) => raw?,
            Err(e) => {
                error!(key, error = %e, "failed to read entry");
                return None;
            }
        };
        serde_json::from_str(&raw)
            .map_err(|e| error!(key, error = %e, "failed to parse entry"))
            .ok()
    }

    fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> CoreResult<()> {
        self.store.set(key, &serde_json::to_string(value)?)?;
        Ok(())
    }
}

impl std::fmt::Debug for SecureStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureStorage")
            .field("store", &self.store.name())
            .field("loaded", &self.cache.lock().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServiceType;
    use proptest::prelude::*;
    use uniarr_storage::{MemorySecretStore, MemoryStore};

    fn storage() -> (SecureStorage, Arc<MemoryStore>, Arc<MemorySecretStore>) {
        let store = Arc::new(MemoryStore::new());
        let secrets = Arc::new(MemorySecretStore::new());
        let secure = SecureStorage::new(
            Arc::clone(&store) as Arc<dyn KeyValueStore>,
            Arc::clone(&secrets) as Arc<dyn SecretStore>,
            &AppConfig::default(),
        );
        (secure, store, secrets)
    }

    #[test]
    fn oversized_credentials_leave_previous_config() {
        let store = Arc::new(MemoryStore::new());
        let secrets = Arc::new(MemorySecretStore::with_item_limit(2048));
        let open = || {
            SecureStorage::new(
                Arc::clone(&store) as Arc<dyn KeyValueStore>,
                Arc::clone(&secrets) as Arc<dyn SecretStore>,
                &AppConfig::default(),
            )
        };
        let secure = open();

        let original = ServiceConfig::new(ServiceType::Sonarr, "Sonarr", "http://old")
            .with_api_key("old-key");
        secure.save_service_config(&original).unwrap();

        let mut update = original.clone();
        update.url = "http://new".into();
        update.api_key = Some("k".repeat(4000));
        assert!(secure.save_service_config(&update).is_err());

        let cached = secure.service_config(&original.id).unwrap();
        assert_eq!(cached.url, "http://old");
        assert_eq!(cached.api_key.as_deref(), Some("old-key"));

        let reloaded = open().service_config(&original.id).unwrap();
        assert_eq!(reloaded.url, "http://old");
        assert_eq!(reloaded.api_key.as_deref(), Some("old-key"));
    }

    #[test]
    fn save_then_load_equal_except_updated_at() {
        let (secure, store, secrets) = storage();
        let config = ServiceConfig::new(ServiceType::Jellyseerr, "Jellyseerr", "http://nas:5055")
            .with_api_key("secret-key");

        secure.save_service_config(&config).unwrap();

        // A fresh instance reads from the stores, not the cache.
        let fresh = SecureStorage::new(
            store as Arc<dyn KeyValueStore>,
            secrets as Arc<dyn SecretStore>,
            &AppConfig::default(),
        );
        let loaded = fresh.service_config(&config.id).unwrap();
        assert!(loaded.updated_at >= config.created_at);

        let mut expected = config.clone();
        expected.updated_at = loaded.updated_at;
        assert_eq!(loaded, expected);
    }

    #[test]
    fn credentials_stay_out_of_key_value_store() {
        let (secure, store, secrets) = storage();
        let config = ServiceConfig::new(ServiceType::Sonarr, "Sonarr", "http://nas:8989")
            .with_api_key("abc123");
        secure.save_service_config(&config).unwrap();

        for key in store.keys().unwrap() {
            assert!(!store.get(&key).unwrap().unwrap().contains("abc123"));
        }
        assert!(secrets
            .get_secret(&creds_key(&config.id))
            .unwrap()
            .unwrap()
            .contains("abc123"));
    }

    #[test]
    fn created_at_preserved_on_update() {
        let (secure, _, _) = storage();
        let mut config = ServiceConfig::new(ServiceType::Radarr, "Radarr", "http://nas:7878");
        let first = secure.save_service_config(&config).unwrap();

        config.created_at = Utc::now() + chrono::Duration::days(1);
        config.name = "Movies".into();
        let second = secure.save_service_config(&config).unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert_eq!(secure.service_configs().len(), 1);
        assert_eq!(secure.service_configs()[0].name, "Movies");
    }

    #[test]
    fn dropping_credentials_deletes_secret() {
        let (secure, _, secrets) = storage();
        let config = ServiceConfig::new(ServiceType::Sonarr, "Sonarr", "http://nas:8989")
            .with_api_key("abc");
        secure.save_service_config(&config).unwrap();
        secure
            .save_service_config(&config.without_credentials())
            .unwrap();

        assert!(secrets.is_empty());
        assert!(secure.service_config(&config.id).unwrap().api_key.is_none());
    }

    #[test]
    fn sorted_by_name() {
        let (secure, _, _) = storage();
        for name in ["Sonarr", "Bazarr", "Radarr"] {
            secure
                .save_service_config(&ServiceConfig::new(ServiceType::Sonarr, name, "http://x"))
                .unwrap();
        }
        let names: Vec<_> = secure.service_configs().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Bazarr", "Radarr", "Sonarr"]);
    }

    #[test]
    fn remove_and_clear() {
        let (secure, store, secrets) = storage();
        let a = ServiceConfig::new(ServiceType::Sonarr, "A", "http://a").with_api_key("k");
        let b = ServiceConfig::new(ServiceType::Radarr, "B", "http://b").with_api_key("k");
        secure.save_service_config(&a).unwrap();
        secure.save_service_config(&b).unwrap();

        secure.remove_service_config(&a.id).unwrap();
        assert!(secure.service_config(&a.id).is_none());
        assert_eq!(secrets.len(), 1);

        secure.clear_all().unwrap();
        assert!(secure.service_configs().is_empty());
        assert!(secrets.is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn corrupt_index_reads_as_empty() {
        let (secure, store, _) = storage();
        store.set(INDEX_KEY, "not json").unwrap();
        assert!(secure.service_configs().is_empty());
    }

    #[test]
    fn oversized_credentials_are_rejected() {
        let store = Arc::new(MemoryStore::new());
        let secure = SecureStorage::new(
            store,
            Arc::new(MemorySecretStore::with_item_limit(32)),
            &AppConfig::default(),
        );
        let config = ServiceConfig::new(ServiceType::Plex, "Plex", "http://p")
            .with_api_key("x".repeat(64));
        assert!(secure.save_service_config(&config).is_err());
    }

    #[test]
    fn s3_and_tmdb_credentials() {
        let (secure, _, _) = storage();
        assert!(secure.s3_credentials().is_none());

        let creds = S3Credentials {
            access_key_id: "AKIA".into(),
            secret_access_key: "secret".into(),
        };
        secure.save_s3_credentials(&creds).unwrap();
        assert_eq!(secure.s3_credentials(), Some(creds));
        secure.delete_s3_credentials();
        secure.delete_s3_credentials();
        assert!(secure.s3_credentials().is_none());

        secure.set_tmdb_api_key("tmdb").unwrap();
        assert_eq!(secure.tmdb_api_key().as_deref(), Some("tmdb"));
        secure.delete_tmdb_api_key();
        assert!(secure.tmdb_api_key().is_none());
    }

    #[test]
    fn recent_ip_moves_to_front() {
        let (secure, _, _) = storage();
        secure.add_recent_ip("10.0.0.1", None, None).unwrap();
        secure.add_recent_ip("10.0.0.2", None, None).unwrap();
        secure.add_recent_ip("10.0.0.1", None, Some(3)).unwrap();

        let ips = secure.recent_ips();
        assert_eq!(ips.len(), 2);
        assert_eq!(ips[0].ip, "10.0.0.1");
        assert_eq!(ips[0].services_found, Some(3));
    }

    proptest! {
        #[test]
        fn recent_ips_bounded(count in 1usize..40) {
            let (secure, _, _) = storage();
            for i in 0..count {
                secure.add_recent_ip(&format!("10.0.0.{i}"), None, None).unwrap();
                let ips = secure.recent_ips();
                prop_assert!(ips.len() <= 10);
                let expected = format!("10.0.0.{i}");
                prop_assert_eq!(&ips[0].ip, &expected);
            }
        }

        #[test]
        fn scan_history_bounded(count in 1usize..50) {
            let (secure, _, _) = storage();
            for i in 0..count {
                secure
                    .save_network_scan_history(NetworkScanHistoryEntry::new(i as u64, 0, None))
                    .unwrap();
                let history = secure.network_scan_history();
                prop_assert!(history.len() <= 20);
                prop_assert_eq!(history[0].duration, i as u64);
            }
        }
    }
}
