use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use superpost_llm::{DEFAULT_MODEL, OPENROUTER_ENDPOINT, OPENROUTER_PROVIDER_ID, ProviderConfig};

pub const SETTINGS_DIRECTORY_NAME: &str = "superpost";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATABASE_FILE_NAME: &str = "superpost.db";
pub const ENV_PREFIX: &str = "SUPERPOST_";
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    Hosted,
}

/// Where the hosted GraphQL and auth services live.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostedSettings {
    #[serde(default)]
    pub subdomain: String,
    #[serde(default)]
    pub region: String,
    /// Overrides the URL derived from subdomain and region.
    #[serde(default)]
    pub graphql_endpoint: String,
    #[serde(default)]
    pub auth_endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedEndpoints {
    pub graphql: String,
    pub auth: String,
}

impl HostedSettings {
    pub fn endpoints(&self) -> Result<HostedEndpoints, SettingsError> {
        let graphql = self.resolve(&self.graphql_endpoint, "graphql")?;
        let auth = self.resolve(&self.auth_endpoint, "auth")?;
        Ok(HostedEndpoints { graphql, auth })
    }

    fn resolve(&self, explicit: &str, service: &'static str) -> Result<String, SettingsError> {
        if !explicit.is_empty() {
            return Ok(explicit.trim_end_matches('/').to_string());
        }

        if self.subdomain.is_empty() || self.region.is_empty() {
            return MissingHostedEndpointSnafu {
                stage: "resolve-hosted-endpoint",
                service,
            }
            .fail();
        }

        Ok(format!(
            "https://{}.{service}.{}.nhost.run/v1",
            self.subdomain, self.region
        ))
    }

    fn normalized(mut self) -> Self {
        self.subdomain = self.subdomain.trim().to_string();
        self.region = self.region.trim().to_string();
        self.graphql_endpoint = self.graphql_endpoint.trim().to_string();
        self.auth_endpoint = self.auth_endpoint.trim().to_string();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: default_endpoint(),
        }
    }
}

impl ProviderSettings {
    pub fn to_provider_config(&self) -> Option<ProviderConfig> {
        if self.api_key.trim().is_empty() {
            return None;
        }

        Some(ProviderConfig::new(
            &self.provider_id,
            &self.api_key,
            &self.endpoint,
        ))
    }

    fn normalized(mut self) -> Self {
        self.provider_id = if self.provider_id.trim().is_empty() {
            default_provider_id()
        } else {
            self.provider_id.trim().to_string()
        };
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = if self.endpoint.trim().is_empty() {
            default_endpoint()
        } else {
            self.endpoint.trim().to_string()
        };
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub backend: BackendKind,
    /// SQLite file for the local backend; empty means the platform data directory.
    #[serde(default)]
    pub database_path: String,
    #[serde(default)]
    pub hosted: HostedSettings,
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            database_path: String::new(),
            hosted: HostedSettings::default(),
            provider: ProviderSettings::default(),
            default_model: default_model(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    pub fn normalized(mut self) -> Self {
        self.database_path = self.database_path.trim().to_string();
        self.hosted = self.hosted.normalized();
        self.provider = self.provider.normalized();
        self.default_model = if self.default_model.trim().is_empty() {
            default_model()
        } else {
            self.default_model.trim().to_string()
        };
        self.log_level = if self.log_level.trim().is_empty() {
            default_log_level()
        } else {
            self.log_level.trim().to_string()
        };
        self
    }

    pub fn database_location(&self) -> String {
        if !self.database_path.is_empty() {
            return self.database_path.clone();
        }

        dirs::data_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".superpost"))
            .join(DATABASE_FILE_NAME)
            .to_string_lossy()
            .into_owned()
    }
}

/// Settings layered from defaults, the JSON file and `SUPERPOST_` variables.
pub struct SettingsStore {
    settings: Arc<ArcSwap<Settings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".superpost"))
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

    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: Settings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from_disk(path: &PathBuf) -> Settings {
        if !path.exists() {
            tracing::info!(path = ?path, "settings file not found; using defaults and environment");
        }

        let figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        match figment.extract::<Settings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = ?path,
                    error = %error,
                    "failed to parse settings; using defaults"
                );
                Settings::default()
            }
        }
    }

    fn persist(&self, settings: &Settings) -> Result<(), SettingsError> {
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

        tracing::info!(path = ?self.config_path, "saved settings");
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
    #[snafu(display(
        "hosted {service} endpoint needs either an explicit URL or subdomain and region on `{stage}`"
    ))]
    MissingHostedEndpoint {
        stage: &'static str,
        service: &'static str,
    },
}

fn default_provider_id() -> String {
    OPENROUTER_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    OPENROUTER_ENDPOINT.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
