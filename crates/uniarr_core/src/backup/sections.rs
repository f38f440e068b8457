//! The registry of backup sections.
//!
//! Each `appData` section is one [`BackupSection`]. Backup and restore
//! iterate the registry and isolate failures per section, so adding a
//! category means registering a section rather than editing the service.

use super::options::{BackupCategory, BackupOptions, RestoreOptions};
use crate::error::{CoreError, CoreResult};
use crate::secure_storage::SecureStorage;
use crate::settings::SettingsAccess;
use crate::types::{NetworkScanHistoryEntry, RecentIp, ServiceConfig};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::warn;
use uniarr_storage::KeyValueStore;

/// Storage keys of feature stores captured by backups.
pub mod keys {
    /// Download manager settings.
    pub const DOWNLOAD_STORE: &str = "download-store";
    /// Services screen view state.
    pub const SERVICES_STORE: &str = "ServicesStore:v1";
    /// Library filters.
    pub const LIBRARY_FILTER_STORE: &str = "LibraryFilterStore:v1";
    /// Widget layout.
    pub const WIDGETS: &str = "WidgetService:widgets";
    /// Widget credentials.
    pub const WIDGET_CREDENTIALS: &str = "WidgetService:credentials";
    /// Widget secure credentials, kept in the credential store.
    pub const WIDGET_SECURE_CREDENTIALS: &str = "WidgetService:secure_credentials";
    /// Widget profiles.
    pub const WIDGET_PROFILES: &str = "WidgetProfiles:v1";
    /// Voice assistant settings.
    pub const VOICE_ASSISTANT_CONFIG: &str = "voice_assistant_config";
    /// Voice shortcuts.
    pub const VOICE_SHORTCUTS: &str = "voice_shortcuts";
    /// Bookmark health checks.
    pub const BOOKMARK_HEALTH: &str = "BookmarkHealthCheck:health";
    /// Bring-your-own-key AI config.
    pub const BYOK_CONFIG: &str = "byok-config-store";
    /// AI config.
    pub const AI_CONFIG: &str = "ai-config-store";
    /// API logging config.
    pub const API_LOGGING_CONFIG: &str = "api-logging-config";
    /// Conversational AI settings.
    pub const CONVERSATIONAL_AI: &str = "conversational-ai-store";
    /// Conversational AI provider config.
    pub const CONVERSATIONAL_AI_CONFIG: &str = "conversational-ai-config-store";
}

/// Stores a section reads from and writes to.
#[derive(Clone)]
pub struct SectionContext {
    /// The active key-value store.
    pub store: Arc<dyn KeyValueStore>,
    /// Service configs, histories and credentials.
    pub secure: Arc<SecureStorage>,
}

/// What a section contributes to a backup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionPayload {
    /// Written to `appData` as is.
    pub plain: Option<Value>,
    /// Encrypted when encryption is requested, otherwise written to
    /// `appData` (replacing `plain`).
    pub sensitive: Option<Value>,
}

impl SectionPayload {
    /// A payload with only a plaintext part.
    #[must_use]
    pub fn plain(value: Value) -> Self {
        Self {
            plain: Some(value),
            sensitive: None,
        }
    }

    /// A payload with only a sensitive part.
    #[must_use]
    pub fn sensitive(value: Value) -> Self {
        Self {
            plain: None,
            sensitive: Some(value),
        }
    }
}

/// One named `appData` section.
pub trait BackupSection: Send + Sync {
    /// Section name in `appData`.
    fn name(&self) -> &'static str;

    /// The option flag selecting this section.
    fn category(&self) -> BackupCategory;

    /// Returns true if `options` selects this section.
    fn is_selected(&self, options: &BackupOptions) -> bool {
        options.includes(self.category())
    }

    /// Reads the current state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read.
    fn collect(&self, ctx: &SectionContext, options: &BackupOptions) -> CoreResult<SectionPayload>;

    /// Writes `value` back.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is malformed or cannot be written.
    fn restore(&self, ctx: &SectionContext, value: &Value) -> CoreResult<()>;

    /// Returns true if `options` asks to leave this section untouched.
    fn skipped_by(&self, _options: &RestoreOptions) -> bool {
        false
    }
}

/// Reads a JSON blob; non-JSON contents are kept as a string.
fn read_blob(store: &dyn KeyValueStore, key: &str) -> CoreResult<Option<Value>> {
    Ok(store
        .get(key)?
        .map(|raw| serde_json::from_str(&raw).unwrap_or(Value::String(raw))))
}

fn blob_text(value: &Value) -> CoreResult<String> {
    match value {
        Value::String(raw) => Ok(raw.clone()),
        other => Ok(serde_json::to_string(other)?),
    }
}

fn write_blob(store: &dyn KeyValueStore, key: &str, value: &Value) -> CoreResult<()> {
    store.set(key, &blob_text(value)?)?;
    Ok(())
}

/// A section mirroring one opaque key-value entry.
#[derive(Debug)]
pub struct KeyBlobSection {
    category: BackupCategory,
    key: &'static str,
}

impl KeyBlobSection {
    /// Creates a section for `key`.
    #[must_use]
    pub fn new(category: BackupCategory, key: &'static str) -> Self {
        Self { category, key }
    }
}

impl BackupSection for KeyBlobSection {
    fn name(&self) -> &'static str {
        self.category.name()
    }

    fn category(&self) -> BackupCategory {
        self.category
    }

    fn collect(&self, ctx: &SectionContext, _options: &BackupOptions) -> CoreResult<SectionPayload> {
        let value = read_blob(ctx.store.as_ref(), self.key)?.unwrap_or(Value::Null);
        Ok(SectionPayload::plain(value))
    }

    fn restore(&self, ctx: &SectionContext, value: &Value) -> CoreResult<()> {
        write_blob(ctx.store.as_ref(), self.key, value)
    }
}

/// The `state` object of the settings blob. Always sensitive.
#[derive(Debug)]
pub struct SettingsSection;

impl BackupSection for SettingsSection {
    fn name(&self) -> &'static str {
        BackupCategory::Settings.name()
    }

    fn category(&self) -> BackupCategory {
        BackupCategory::Settings
    }

    fn collect(&self, ctx: &SectionContext, _options: &BackupOptions) -> CoreResult<SectionPayload> {
        let state = SettingsAccess::new(Arc::clone(&ctx.store))
            .state()?
            .unwrap_or_default();
        Ok(SectionPayload::sensitive(Value::Object(state)))
    }

    fn restore(&self, ctx: &SectionContext, value: &Value) -> CoreResult<()> {
        let Value::Object(state) = value else {
            return Err(CoreError::not_backup_format("'settings' is not an object"));
        };
        SettingsAccess::new(Arc::clone(&ctx.store)).merge_state(state.clone())
    }

    fn skipped_by(&self, options: &RestoreOptions) -> bool {
        options.skip_settings
    }
}

/// Service configs. Credentials form the sensitive part when selected.
#[derive(Debug)]
pub struct ServiceConfigsSection;

impl BackupSection for ServiceConfigsSection {
    fn name(&self) -> &'static str {
        BackupCategory::ServiceConfigs.name()
    }

    fn category(&self) -> BackupCategory {
        BackupCategory::ServiceConfigs
    }

    fn collect(&self, ctx: &SectionContext, options: &BackupOptions) -> CoreResult<SectionPayload> {
        let configs = ctx.secure.service_configs();
        let stripped: Vec<ServiceConfig> =
            configs.iter().map(ServiceConfig::without_credentials).collect();

        let mut payload = SectionPayload::plain(serde_json::to_value(stripped)?);
        if options.includes(BackupCategory::ServiceCredentials) {
            payload.sensitive = Some(serde_json::to_value(configs)?);
        }
        Ok(payload)
    }

    fn restore(&self, ctx: &SectionContext, value: &Value) -> CoreResult<()> {
        let Value::Array(items) = value else {
            return Err(CoreError::not_backup_format("'serviceConfigs' is not an array"));
        };

        let mut failed = 0usize;
        for item in items {
            let result = serde_json::from_value::<ServiceConfig>(item.clone())
                .map_err(CoreError::from)
                .and_then(|mut config| {
                    // A backup without credentials keeps the ones already stored.
                    if !config.has_credentials() {
                        if let Some(existing) = ctx.secure.service_config(&config.id) {
                            config.api_key = existing.api_key;
                            config.username = existing.username;
                            config.password = existing.password;
                        }
                    }
                    ctx.secure.save_service_config(&config)
                });
            if let Err(e) = result {
                warn!(error = %e, "skipping service config that could not be restored");
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(CoreError::invalid_operation(format!(
                "{failed} of {} service configs could not be restored",
                items.len()
            )));
        }
        Ok(())
    }

    fn skipped_by(&self, options: &RestoreOptions) -> bool {
        options.skip_services
    }
}

/// Network scan history.
#[derive(Debug)]
pub struct NetworkScanHistorySection;

impl BackupSection for NetworkScanHistorySection {
    fn name(&self) -> &'static str {
        BackupCategory::NetworkScanHistory.name()
    }

    fn category(&self) -> BackupCategory {
        BackupCategory::NetworkScanHistory
    }

    fn collect(&self, ctx: &SectionContext, _options: &BackupOptions) -> CoreResult<SectionPayload> {
        Ok(SectionPayload::plain(serde_json::to_value(
            ctx.secure.network_scan_history(),
        )?))
    }

    fn restore(&self, ctx: &SectionContext, value: &Value) -> CoreResult<()> {
        let history: Vec<NetworkScanHistoryEntry> = serde_json::from_value(value.clone())?;
        ctx.secure.set_network_scan_history(history)
    }
}

/// Recent IPs.
#[derive(Debug)]
pub struct RecentIpsSection;

impl BackupSection for RecentIpsSection {
    fn name(&self) -> &'static str {
        BackupCategory::RecentIps.name()
    }

    fn category(&self) -> BackupCategory {
        BackupCategory::RecentIps
    }

    fn collect(&self, ctx: &SectionContext, _options: &BackupOptions) -> CoreResult<SectionPayload> {
        Ok(SectionPayload::plain(serde_json::to_value(
            ctx.secure.recent_ips(),
        )?))
    }

    fn restore(&self, ctx: &SectionContext, value: &Value) -> CoreResult<()> {
        let ips: Vec<RecentIp> = serde_json::from_value(value.clone())?;
        ctx.secure.set_recent_ips(ips)
    }
}

/// The TMDB API key as `{"apiKey": ...}`. Always sensitive.
#[derive(Debug)]
pub struct TmdbCredentialsSection;

impl BackupSection for TmdbCredentialsSection {
    fn name(&self) -> &'static str {
        BackupCategory::TmdbCredentials.name()
    }

    fn category(&self) -> BackupCategory {
        BackupCategory::TmdbCredentials
    }

    fn collect(&self, ctx: &SectionContext, _options: &BackupOptions) -> CoreResult<SectionPayload> {
        let mut credentials = Map::new();
        if let Some(api_key) = ctx.secure.tmdb_api_key() {
            credentials.insert("apiKey".into(), Value::String(api_key));
        }
        Ok(SectionPayload::sensitive(Value::Object(credentials)))
    }

    fn restore(&self, ctx: &SectionContext, value: &Value) -> CoreResult<()> {
        match value.get("apiKey") {
            Some(Value::String(api_key)) if !api_key.is_empty() => {
                ctx.secure.set_tmdb_api_key(api_key)
            }
            Some(Value::String(_)) | Some(Value::Null) | None => Ok(()),
            Some(_) => Err(CoreError::not_backup_format(
                "'tmdbCredentials.apiKey' is not a string",
            )),
        }
    }
}

/// Widget secure credentials held in the credential store. Always sensitive.
#[derive(Debug)]
pub struct WidgetSecureCredentialsSection;

impl BackupSection for WidgetSecureCredentialsSection {
    fn name(&self) -> &'static str {
        BackupCategory::WidgetSecureCredentials.name()
    }

    fn category(&self) -> BackupCategory {
        BackupCategory::WidgetSecureCredentials
    }

    fn collect(&self, ctx: &SectionContext, _options: &BackupOptions) -> CoreResult<SectionPayload> {
        let value = ctx
            .secure
            .secret(keys::WIDGET_SECURE_CREDENTIALS)
            .map(|raw| serde_json::from_str(&raw).unwrap_or(Value::String(raw)))
            .unwrap_or_else(|| json!({}));
        Ok(SectionPayload::sensitive(value))
    }

    fn restore(&self, ctx: &SectionContext, value: &Value) -> CoreResult<()> {
        ctx.secure
            .set_secret(keys::WIDGET_SECURE_CREDENTIALS, &blob_text(value)?)
    }
}

/// Voice assistant settings and shortcuts as `{"config", "shortcuts"}`.
#[derive(Debug)]
pub struct VoiceAssistantSection;

impl BackupSection for VoiceAssistantSection {
    fn name(&self) -> &'static str {
        BackupCategory::VoiceAssistantConfig.name()
    }

    fn category(&self) -> BackupCategory {
        BackupCategory::VoiceAssistantConfig
    }

    fn collect(&self, ctx: &SectionContext, _options: &BackupOptions) -> CoreResult<SectionPayload> {
        let store = ctx.store.as_ref();
        Ok(SectionPayload::plain(json!({
            "config": read_blob(store, keys::VOICE_ASSISTANT_CONFIG)?,
            "shortcuts": read_blob(store, keys::VOICE_SHORTCUTS)?,
        })))
    }

    fn restore(&self, ctx: &SectionContext, value: &Value) -> CoreResult<()> {
        if !value.is_object() {
            return Err(CoreError::not_backup_format(
                "'voiceAssistantConfig' is not an object",
            ));
        }
        let store = ctx.store.as_ref();
        for (field, key) in [
            ("config", keys::VOICE_ASSISTANT_CONFIG),
            ("shortcuts", keys::VOICE_SHORTCUTS),
        ] {
            match value.get(field) {
                Some(Value::Null) | None => {}
                Some(v) => write_blob(store, key, v)?,
            }
        }
        Ok(())
    }
}

/// Widget profiles. Each profile must carry a string `id` and `name`.
#[derive(Debug)]
pub struct WidgetProfilesSection;

impl WidgetProfilesSection {
    fn is_valid_profile(profile: &Value) -> bool {
        profile.get("id").is_some_and(Value::is_string)
            && profile.get("name").is_some_and(Value::is_string)
    }
}

impl BackupSection for WidgetProfilesSection {
    fn name(&self) -> &'static str {
        BackupCategory::WidgetProfiles.name()
    }

    fn category(&self) -> BackupCategory {
        BackupCategory::WidgetProfiles
    }

    fn collect(&self, ctx: &SectionContext, _options: &BackupOptions) -> CoreResult<SectionPayload> {
        let profiles = read_blob(ctx.store.as_ref(), keys::WIDGET_PROFILES)?
            .unwrap_or_else(|| Value::Array(Vec::new()));
        Ok(SectionPayload::plain(profiles))
    }

    fn restore(&self, ctx: &SectionContext, value: &Value) -> CoreResult<()> {
        let Value::Array(profiles) = value else {
            return Err(CoreError::not_backup_format("'widgetProfiles' is not an array"));
        };

        let valid: Vec<Value> = profiles
            .iter()
            .filter(|profile| {
                let ok = Self::is_valid_profile(profile);
                if !ok {
                    warn!("skipping widget profile without a string id and name");
                }
                ok
            })
            .cloned()
            .collect();

        write_blob(ctx.store.as_ref(), keys::WIDGET_PROFILES, &Value::Array(valid))
    }
}

/// Ordered collection of sections.
pub struct SectionRegistry {
    sections: Vec<Box<dyn BackupSection>>,
}

impl SectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sections: Vec::new(),
        }
    }

    /// Creates a registry with every standard section.
    #[must_use]
    pub fn standard() -> Self {
        use BackupCategory as C;

        let mut registry = Self::new();
        registry.register(Box::new(SettingsSection));
        registry.register(Box::new(ServiceConfigsSection));
        registry.register(Box::new(NetworkScanHistorySection));
        registry.register(Box::new(RecentIpsSection));
        registry.register(Box::new(TmdbCredentialsSection));
        for (category, key) in [
            (C::DownloadConfig, keys::DOWNLOAD_STORE),
            (C::ServicesViewState, keys::SERVICES_STORE),
            (C::LibraryFilters, keys::LIBRARY_FILTER_STORE),
        ] {
            registry.register(Box::new(KeyBlobSection::new(category, key)));
        }
        registry.register(Box::new(VoiceAssistantSection));
        for (category, key) in [
            (C::BookmarkHealthChecks, keys::BOOKMARK_HEALTH),
            (C::WidgetsConfig, keys::WIDGETS),
            (C::WidgetsCredentials, keys::WIDGET_CREDENTIALS),
        ] {
            registry.register(Box::new(KeyBlobSection::new(category, key)));
        }
        registry.register(Box::new(WidgetSecureCredentialsSection));
        registry.register(Box::new(WidgetProfilesSection));
        for (category, key) in [
            (C::ByokConfig, keys::BYOK_CONFIG),
            (C::AiConfig, keys::AI_CONFIG),
            (C::ApiLoggingConfig, keys::API_LOGGING_CONFIG),
            (C::ConversationalAiSettings, keys::CONVERSATIONAL_AI),
            (C::ConversationalAiProviderConfig, keys::CONVERSATIONAL_AI_CONFIG),
        ] {
            registry.register(Box::new(KeyBlobSection::new(category, key)));
        }
        registry
    }

    /// Adds `section`, replacing any section with the same name.
    pub fn register(&mut self, section: Box<dyn BackupSection>) {
        match self.sections.iter().position(|s| s.name() == section.name()) {
            Some(index) => self.sections[index] = section,
            None => self.sections.push(section),
        }
    }

    /// Iterates sections in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn BackupSection> {
        self.sections.iter().map(|s| &**s)
    }

    /// Returns the section named `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn BackupSection> {
        self.iter().find(|s| s.name() == name)
    }

    /// Returns the number of sections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Returns true if no sections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

impl Default for SectionRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for SectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.sections.iter().map(|s| s.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::types::ServiceType;
    use uniarr_storage::{MemorySecretStore, MemoryStore, SecretStore};

    fn context() -> SectionContext {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let secrets: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
        let secure = Arc::new(SecureStorage::new(
            Arc::clone(&store),
            secrets,
            &AppConfig::default(),
        ));
        SectionContext { store, secure }
    }

    #[test]
    fn standard_registry_covers_every_section_category() {
        let registry = SectionRegistry::standard();
        for category in BackupCategory::ALL {
            if category == BackupCategory::ServiceCredentials {
                assert!(registry.get(category.name()).is_none());
            } else {
                assert!(registry.get(category.name()).is_some(), "{category}");
            }
        }
        assert_eq!(registry.len(), BackupCategory::ALL.len() - 1);
    }

    #[test]
    fn register_replaces_by_name() {
        let mut registry = SectionRegistry::new();
        registry.register(Box::new(KeyBlobSection::new(BackupCategory::AiConfig, "a")));
        registry.register(Box::new(KeyBlobSection::new(BackupCategory::AiConfig, "b")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn blob_round_trip_keeps_non_json_text() {
        let ctx = context();
        ctx.store.set(keys::DOWNLOAD_STORE, "plain text").unwrap();
        let section = KeyBlobSection::new(BackupCategory::DownloadConfig, keys::DOWNLOAD_STORE);

        let payload = section.collect(&ctx, &BackupOptions::all()).unwrap();
        assert_eq!(payload.plain, Some(Value::String("plain text".into())));

        ctx.store.remove(keys::DOWNLOAD_STORE).unwrap();
        section.restore(&ctx, payload.plain.as_ref().unwrap()).unwrap();
        assert_eq!(
            ctx.store.get(keys::DOWNLOAD_STORE).unwrap().as_deref(),
            Some("plain text")
        );
    }

    #[test]
    fn service_configs_split_plain_and_sensitive() {
        let ctx = context();
        let config = ServiceConfig::new(ServiceType::Jellyseerr, "Jellyseerr", "http://nas:5055")
            .with_api_key("secret");
        ctx.secure.save_service_config(&config).unwrap();

        let options = BackupOptions::none()
            .with(BackupCategory::ServiceConfigs, true)
            .with(BackupCategory::ServiceCredentials, true);
        let payload = ServiceConfigsSection.collect(&ctx, &options).unwrap();

        let plain = payload.plain.unwrap();
        assert!(plain[0].get("apiKey").is_none());
        assert_eq!(payload.sensitive.unwrap()[0]["apiKey"], "secret");
    }

    #[test]
    fn restoring_stripped_config_keeps_stored_credentials() {
        let ctx = context();
        let config = ServiceConfig::new(ServiceType::Sonarr, "Sonarr", "http://nas:8989")
            .with_api_key("keep-me");
        ctx.secure.save_service_config(&config).unwrap();

        let mut renamed = config.without_credentials();
        renamed.name = "TV".into();
        ServiceConfigsSection
            .restore(&ctx, &json!([serde_json::to_value(&renamed).unwrap()]))
            .unwrap();

        let stored = ctx.secure.service_config(&config.id).unwrap();
        assert_eq!(stored.name, "TV");
        assert_eq!(stored.api_key.as_deref(), Some("keep-me"));
    }

    #[test]
    fn invalid_widget_profiles_are_dropped() {
        let ctx = context();
        WidgetProfilesSection
            .restore(
                &ctx,
                &json!([
                    {"id": "p1", "name": "Home", "widgets": []},
                    {"id": 7, "name": "Broken"},
                    {"name": "No id"}
                ]),
            )
            .unwrap();

        let stored: Value =
            serde_json::from_str(&ctx.store.get(keys::WIDGET_PROFILES).unwrap().unwrap()).unwrap();
        assert_eq!(stored.as_array().unwrap().len(), 1);
        assert_eq!(stored[0]["id"], "p1");
    }

    #[test]
    fn tmdb_key_is_sensitive() {
        let ctx = context();
        ctx.secure.set_tmdb_api_key("tmdb-key").unwrap();
        let payload = TmdbCredentialsSection
            .collect(&ctx, &BackupOptions::all())
            .unwrap();
        assert!(payload.plain.is_none());
        assert_eq!(payload.sensitive.unwrap()["apiKey"], "tmdb-key");
    }

    #[test]
    fn voice_assistant_restores_both_keys() {
        let ctx = context();
        VoiceAssistantSection
            .restore(&ctx, &json!({"config": {"enabled": true}, "shortcuts": null}))
            .unwrap();
        assert!(ctx.store.get(keys::VOICE_ASSISTANT_CONFIG).unwrap().is_some());
        assert!(ctx.store.get(keys::VOICE_SHORTCUTS).unwrap().is_none());
    }
}
