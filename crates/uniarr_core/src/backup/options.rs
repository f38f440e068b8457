//! Backup and restore options.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A selectable data category.
///
/// Every category except [`BackupCategory::ServiceCredentials`] maps to one
/// `appData` section of the same name; service credentials widen the
/// `serviceConfigs` section instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackupCategory {
    /// `settings`
    Settings,
    /// `serviceConfigs`
    ServiceConfigs,
    /// Credentials inside `serviceConfigs`.
    ServiceCredentials,
    /// `tmdbCredentials`
    TmdbCredentials,
    /// `networkScanHistory`
    NetworkScanHistory,
    /// `recentIPs`
    RecentIps,
    /// `downloadConfig`
    DownloadConfig,
    /// `servicesViewState`
    ServicesViewState,
    /// `libraryFilters`
    LibraryFilters,
    /// `widgetsConfig`
    WidgetsConfig,
    /// `widgetsCredentials`
    WidgetsCredentials,
    /// `widgetSecureCredentials`
    WidgetSecureCredentials,
    /// `widgetProfiles`
    WidgetProfiles,
    /// `voiceAssistantConfig`
    VoiceAssistantConfig,
    /// `bookmarkHealthChecks`
    BookmarkHealthChecks,
    /// `byokConfig`
    ByokConfig,
    /// `aiConfig`
    AiConfig,
    /// `apiLoggingConfig`
    ApiLoggingConfig,
    /// `conversationalAISettings`
    ConversationalAiSettings,
    /// `conversationalAIProviderConfig`
    ConversationalAiProviderConfig,
}

impl BackupCategory {
    /// Every category.
    pub const ALL: [BackupCategory; 20] = [
        Self::Settings,
        Self::ServiceConfigs,
        Self::ServiceCredentials,
        Self::TmdbCredentials,
        Self::NetworkScanHistory,
        Self::RecentIps,
        Self::DownloadConfig,
        Self::ServicesViewState,
        Self::LibraryFilters,
        Self::WidgetsConfig,
        Self::WidgetsCredentials,
        Self::WidgetSecureCredentials,
        Self::WidgetProfiles,
        Self::VoiceAssistantConfig,
        Self::BookmarkHealthChecks,
        Self::ByokConfig,
        Self::AiConfig,
        Self::ApiLoggingConfig,
        Self::ConversationalAiSettings,
        Self::ConversationalAiProviderConfig,
    ];

    /// Section name in `appData`.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Settings => "settings",
            Self::ServiceConfigs => "serviceConfigs",
            Self::ServiceCredentials => "serviceCredentials",
            Self::TmdbCredentials => "tmdbCredentials",
            Self::NetworkScanHistory => "networkScanHistory",
            Self::RecentIps => "recentIPs",
            Self::DownloadConfig => "downloadConfig",
            Self::ServicesViewState => "servicesViewState",
            Self::LibraryFilters => "libraryFilters",
            Self::WidgetsConfig => "widgetsConfig",
            Self::WidgetsCredentials => "widgetsCredentials",
            Self::WidgetSecureCredentials => "widgetSecureCredentials",
            Self::WidgetProfiles => "widgetProfiles",
            Self::VoiceAssistantConfig => "voiceAssistantConfig",
            Self::BookmarkHealthChecks => "bookmarkHealthChecks",
            Self::ByokConfig => "byokConfig",
            Self::AiConfig => "aiConfig",
            Self::ApiLoggingConfig => "apiLoggingConfig",
            Self::ConversationalAiSettings => "conversationalAISettings",
            Self::ConversationalAiProviderConfig => "conversationalAIProviderConfig",
        }
    }
}

impl fmt::Display for BackupCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackupCategory {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::configuration(format!("unknown backup section: {s}")))
    }
}

/// What to include in a selective backup and whether to encrypt.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupOptions {
    /// Include app settings.
    pub include_settings: bool,
    /// Include service configs.
    pub include_service_configs: bool,
    /// Include service credentials in the service configs.
    pub include_service_credentials: bool,
    /// Include the TMDB API key.
    pub include_tmdb_credentials: bool,
    /// Include network scan history.
    pub include_network_history: bool,
    /// Include recent IPs.
    pub include_recent_ips: bool,
    /// Include download settings.
    pub include_download_config: bool,
    /// Include the services screen view state.
    pub include_services_view_state: bool,
    /// Include library filters.
    pub include_library_filters: bool,
    /// Include widget layout.
    pub include_widgets_config: bool,
    /// Include widget credentials.
    pub include_widgets_credentials: bool,
    /// Include widget secure credentials.
    pub include_widget_secure_credentials: bool,
    /// Include widget profiles.
    pub include_widget_profiles: bool,
    /// Include voice assistant settings and shortcuts.
    pub include_voice_assistant_config: bool,
    /// Include bookmark health checks.
    pub include_bookmark_health_checks: bool,
    /// Include bring-your-own-key AI config.
    pub include_byok_config: bool,
    /// Include AI config.
    pub include_ai_config: bool,
    /// Include API logging config.
    pub include_api_logging_config: bool,
    /// Include conversational AI settings.
    pub include_conversational_ai_settings: bool,
    /// Include conversational AI provider config.
    pub include_conversational_ai_provider_config: bool,
    /// Encrypt the sensitive sections with `password`.
    pub encrypt_sensitive: bool,
    /// Encryption password.
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl BackupOptions {
    /// Options with nothing selected.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Options with every category selected and no encryption.
    #[must_use]
    pub fn all() -> Self {
        BackupCategory::ALL
            .into_iter()
            .fold(Self::none(), |options, category| options.with(category, true))
    }

    /// Selects or deselects `category`.
    #[must_use]
    pub fn with(mut self, category: BackupCategory, enabled: bool) -> Self {
        *self.flag_mut(category) = enabled;
        self
    }

    /// Enables encryption of sensitive sections with `password`.
    #[must_use]
    pub fn encrypted(mut self, password: impl Into<String>) -> Self {
        self.encrypt_sensitive = true;
        self.password = Some(password.into());
        self
    }

    /// Returns true if `category` is selected.
    #[must_use]
    pub fn includes(&self, category: BackupCategory) -> bool {
        match category {
            BackupCategory::Settings => self.include_settings,
            BackupCategory::ServiceConfigs => self.include_service_configs,
            BackupCategory::ServiceCredentials => self.include_service_credentials,
            BackupCategory::TmdbCredentials => self.include_tmdb_credentials,
            BackupCategory::NetworkScanHistory => self.include_network_history,
            BackupCategory::RecentIps => self.include_recent_ips,
            BackupCategory::DownloadConfig => self.include_download_config,
            BackupCategory::ServicesViewState => self.include_services_view_state,
            BackupCategory::LibraryFilters => self.include_library_filters,
            BackupCategory::WidgetsConfig => self.include_widgets_config,
            BackupCategory::WidgetsCredentials => self.include_widgets_credentials,
            BackupCategory::WidgetSecureCredentials => self.include_widget_secure_credentials,
            BackupCategory::WidgetProfiles => self.include_widget_profiles,
            BackupCategory::VoiceAssistantConfig => self.include_voice_assistant_config,
            BackupCategory::BookmarkHealthChecks => self.include_bookmark_health_checks,
            BackupCategory::ByokConfig => self.include_byok_config,
            BackupCategory::AiConfig => self.include_ai_config,
            BackupCategory::ApiLoggingConfig => self.include_api_logging_config,
            BackupCategory::ConversationalAiSettings => self.include_conversational_ai_settings,
            BackupCategory::ConversationalAiProviderConfig => {
                self.include_conversational_ai_provider_config
            }
        }
    }

    fn flag_mut(&mut self, category: BackupCategory) -> &mut bool {
        match category {
            BackupCategory::Settings => &mut self.include_settings,
            BackupCategory::ServiceConfigs => &mut self.include_service_configs,
            BackupCategory::ServiceCredentials => &mut self.include_service_credentials,
            BackupCategory::TmdbCredentials => &mut self.include_tmdb_credentials,
            BackupCategory::NetworkScanHistory => &mut self.include_network_history,
            BackupCategory::RecentIps => &mut self.include_recent_ips,
            BackupCategory::DownloadConfig => &mut self.include_download_config,
            BackupCategory::ServicesViewState => &mut self.include_services_view_state,
            BackupCategory::LibraryFilters => &mut self.include_library_filters,
            BackupCategory::WidgetsConfig => &mut self.include_widgets_config,
            BackupCategory::WidgetsCredentials => &mut self.include_widgets_credentials,
            BackupCategory::WidgetSecureCredentials => &mut self.include_widget_secure_credentials,
            BackupCategory::WidgetProfiles => &mut self.include_widget_profiles,
            BackupCategory::VoiceAssistantConfig => &mut self.include_voice_assistant_config,
            BackupCategory::BookmarkHealthChecks => &mut self.include_bookmark_health_checks,
            BackupCategory::ByokConfig => &mut self.include_byok_config,
            BackupCategory::AiConfig => &mut self.include_ai_config,
            BackupCategory::ApiLoggingConfig => &mut self.include_api_logging_config,
            BackupCategory::ConversationalAiSettings => {
                &mut self.include_conversational_ai_settings
            }
            BackupCategory::ConversationalAiProviderConfig => {
                &mut self.include_conversational_ai_provider_config
            }
        }
    }
}

impl fmt::Debug for BackupOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let selected: Vec<&str> = BackupCategory::ALL
            .into_iter()
            .filter(|c| self.includes(*c))
            .map(BackupCategory::name)
            .collect();
        f.debug_struct("BackupOptions")
            .field("selected", &selected)
            .field("encrypt_sensitive", &self.encrypt_sensitive)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Which groups of sections a restore leaves untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreOptions {
    /// Keep the current app settings.
    pub skip_settings: bool,
    /// Keep the current service configs.
    pub skip_services: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_selects_everything_unencrypted() {
        let options = BackupOptions::all();
        assert!(BackupCategory::ALL.iter().all(|c| options.includes(*c)));
        assert!(!options.encrypt_sensitive);
        assert!(options.password.is_none());
    }

    #[test]
    fn category_names_parse() {
        for category in BackupCategory::ALL {
            assert_eq!(category.name().parse::<BackupCategory>().unwrap(), category);
        }
        assert!("everything".parse::<BackupCategory>().is_err());
    }

    #[test]
    fn serde_is_camel_case_without_password() {
        let options = BackupOptions::none()
            .with(BackupCategory::RecentIps, true)
            .encrypted("pw");
        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["includeRecentIps"], true);
        assert_eq!(json["encryptSensitive"], true);
        assert!(json.get("password").is_none());

        let parsed: BackupOptions =
            serde_json::from_str(r#"{"includeSettings": true}"#).unwrap();
        assert!(parsed.include_settings);
        assert!(!parsed.include_ai_config);
    }

    #[test]
    fn debug_hides_password() {
        let options = BackupOptions::none().encrypted("correct-horse-battery");
        assert!(!format!("{options:?}").contains("correct-horse"));
    }
}
