//! Application configuration
//!
//! Settings are read from a TOML file: either an explicit path, or
//! `config.toml` in the platform config directory when present. The bearer
//! credential never lives in the file; it is resolved once at startup from
//! the environment and handed to [`crate::network::Connection::open`].

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

use crate::constants::{DEFAULT_CREDENTIAL_ENV, DEFAULT_ENDPOINT, DEFAULT_MODEL};
use crate::error::{ConfigError, NetworkError};
use crate::protocol::{Modality, ResponseConfig};

const CONFIG_FILE_NAME: &str = "config.toml";

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Realtime session settings
    pub realtime: RealtimeConfig,

    /// Device selection
    pub audio: AudioConfig,

    /// Name of the environment variable holding the bearer credential
    pub credential_env: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            realtime: RealtimeConfig::default(),
            audio: AudioConfig::default(),
            credential_env: DEFAULT_CREDENTIAL_ENV.to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration.
    ///
    /// An explicit `path` must exist and parse. Without one, the platform
    /// config file is used if it exists, otherwise defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Parse TOML text
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// `<config_dir>/config.toml` for this application, if the platform has one
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "realtime-voice")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Resolve the bearer credential from the process environment
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        Credentials::from_env(&self.credential_env)
    }
}

/// Realtime session settings sent with the opening `response.create`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Websocket endpoint, without the model query parameter
    pub endpoint: String,

    /// Model requested via `?model=`
    pub model: String,

    /// Voice identifier for synthesized speech
    pub voice: String,

    /// System instructions for the assistant
    pub instructions: String,

    /// Output modalities
    pub modalities: Vec<Modality>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: "alloy".to_string(),
            instructions: "You are an excellent AI assistant.".to_string(),
            modalities: vec![Modality::Audio, Modality::Text],
        }
    }
}

impl RealtimeConfig {
    /// Endpoint URL with the model query parameter attached
    pub fn url(&self) -> Result<Url, NetworkError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| NetworkError::InvalidEndpoint(format!("{}: {}", self.endpoint, e)))?;

        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(NetworkError::InvalidEndpoint(format!(
                    "unsupported scheme '{}'",
                    other
                )))
            }
        }

        if !self.model.is_empty() {
            url.query_pairs_mut().append_pair("model", &self.model);
        }
        Ok(url)
    }

    /// Response settings for the session-init envelope
    pub fn response_config(&self) -> ResponseConfig {
        ResponseConfig {
            modalities: self.modalities.clone(),
            instructions: self.instructions.clone(),
            voice: self.voice.clone(),
        }
    }
}

/// Audio device selection, by the ids printed by `list_devices`.
/// `None` picks the host default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

/// Bearer credential for the realtime endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    /// Read the credential from environment variable `var`
    pub fn from_env(var: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(var, |name| std::env::var(name).ok())
    }

    /// Resolve the credential through `lookup`; absent or blank is an error
    pub fn from_lookup<F>(var: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: FnOnce(&str) -> Option<String>,
    {
        match lookup(var) {
            Some(key) if !key.trim().is_empty() => Ok(Self::new(key.trim())),
            _ => Err(ConfigError::MissingCredential(var.to_string())),
        }
    }

    /// `Authorization` header value
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}
