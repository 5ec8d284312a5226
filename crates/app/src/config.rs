use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use quill_llm::{DEFAULT_THINKING_BUDGET_TOKENS, HTTP_PROVIDER_ID, ProviderConfig};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8787/v1/chat";
pub const DEFAULT_MODEL: &str = "claude-3-7-sonnet-20250219";
pub const SETTINGS_DIRECTORY_NAME: &str = "quill";
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Environment fallbacks, checked when the settings file leaves a field
/// blank.
pub const API_TOKEN_ENV_VAR: &str = "ANTHROPIC_API_TOKEN";
pub const ENDPOINT_ENV_VAR: &str = "QUILL_ENDPOINT";
pub const MODEL_ENV_VAR: &str = "QUILL_MODEL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default = "default_thinking_budget")]
    pub thinking_budget_tokens: u64,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_token: String::new(),
            endpoint: default_endpoint(),
            model: default_model(),
            system_prompt: String::new(),
            max_tokens: None,
            thinking_budget_tokens: default_thinking_budget(),
            stream: default_stream(),
        }
    }
}

impl ProviderSettings {
    /// True once a credential is configured; submissions are refused without
    /// one.
    pub fn is_valid(&self) -> bool {
        !self.api_token.trim().is_empty()
    }

    pub fn to_provider_config(&self) -> Option<ProviderConfig> {
        if !self.is_valid() {
            return None;
        }

        Some(ProviderConfig::new(
            &self.provider_id,
            &self.api_token,
            &self.endpoint,
        ))
    }

    pub fn normalized(mut self) -> Self {
        self.provider_id = if self.provider_id.trim().is_empty() {
            default_provider_id()
        } else {
            self.provider_id.trim().to_string()
        };
        self.api_token = self.api_token.trim().to_string();
        self.endpoint = if self.endpoint.trim().is_empty() {
            default_endpoint()
        } else {
            self.endpoint.trim().to_string()
        };
        self.model = if self.model.trim().is_empty() {
            default_model()
        } else {
            self.model.trim().to_string()
        };
        self
    }

    /// Fills blank fields from the environment, mirroring how the credential
    /// usually arrives on developer machines.
    pub fn with_environment_fallback(mut self) -> Self {
        if self.api_token.trim().is_empty()
            && let Some(token) = non_empty_env(API_TOKEN_ENV_VAR)
        {
            self.api_token = token;
        }
        if let Some(endpoint) = non_empty_env(ENDPOINT_ENV_VAR) {
            self.endpoint = endpoint;
        }
        if let Some(model) = non_empty_env(MODEL_ENV_VAR) {
            self.model = model;
        }
        self
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Persistent settings with lock-free snapshots for readers.
pub struct SettingsStore {
    settings: Arc<ArcSwap<ProviderSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".quill"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    /// Shared snapshot handle; readers call `.load()` per use.
    pub fn shared(&self) -> Arc<ArcSwap<ProviderSettings>> {
        self.settings.clone()
    }

    pub fn settings(&self) -> Arc<ProviderSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: ProviderSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from_disk(path: &PathBuf) -> ProviderSettings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
            return ProviderSettings::default().with_environment_fallback();
        }

        let figment = Figment::from(Serialized::defaults(ProviderSettings::default()))
            .merge(Json::file(path));

        match figment.extract::<ProviderSettings>() {
            Ok(settings) => settings.normalized().with_environment_fallback(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                ProviderSettings::default().with_environment_fallback()
            }
        }
    }

    fn persist(&self, settings: &ProviderSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_provider_id() -> String {
    HTTP_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_thinking_budget() -> u64 {
    DEFAULT_THINKING_BUDGET_TOKENS
}

fn default_stream() -> bool {
    true
}
