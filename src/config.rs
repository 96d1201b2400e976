//! Configuration management for dj-query.
//!
//! Handles loading configuration from a TOML file and environment overrides.
//! Every section has defaults, so a missing file is a valid configuration.

use crate::db::{WarehouseSettings, DEFAULT_CREDENTIAL_ENV, DEFAULT_TOKEN_TYPE};
use crate::engine::Engine;
use crate::error::{DjqError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for dj-query.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub state: StateConfig,

    #[serde(default)]
    pub results: ResultsConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub warehouse: WarehouseConfig,

    #[serde(default)]
    pub poller: PollerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    /// Engines registered at startup.
    #[serde(default)]
    pub engines: Vec<Engine>,
}

/// HTTP surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to listen on.
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8001".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// State database settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StateConfig {
    /// SQLite file; the platform default is used when unset.
    pub path: Option<PathBuf>,
}

/// Which results store to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultsBackendKind {
    #[default]
    Sqlite,
    Filesystem,
}

/// Results store settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResultsConfig {
    #[serde(default)]
    pub backend: ResultsBackendKind,

    /// Directory for the filesystem store.
    pub directory: Option<PathBuf>,
}

impl ResultsConfig {
    /// Returns the filesystem store directory, falling back to the platform data dir.
    pub fn directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("dj-query")
                .join("results")
        })
    }
}

/// Query execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Upper bound on a single adapter call, in seconds.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,

    #[serde(default = "default_catalog")]
    pub default_catalog: String,

    /// Engine used when a submission names none.
    pub default_engine_name: Option<String>,
    pub default_engine_version: Option<String>,
}

fn default_query_timeout_secs() -> u64 {
    300
}

fn default_catalog() -> String {
    "default".to_string()
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            query_timeout_secs: default_query_timeout_secs(),
            default_catalog: default_catalog(),
            default_engine_name: None,
            default_engine_version: None,
        }
    }
}

impl ExecutionConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    /// Returns the default engine when both name and version are configured.
    pub fn default_engine(&self) -> Option<(&str, &str)> {
        match (&self.default_engine_name, &self.default_engine_version) {
            (Some(name), Some(version)) => Some((name, version)),
            _ => None,
        }
    }
}

/// Cloud warehouse credentials and polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Environment variable holding the bearer credential.
    #[serde(default = "default_credential_env")]
    pub credential_env: String,

    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Interval between statement status checks, in milliseconds.
    #[serde(default = "default_warehouse_poll_ms")]
    pub poll_interval_ms: u64,
}

fn default_credential_env() -> String {
    DEFAULT_CREDENTIAL_ENV.to_string()
}

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

fn default_warehouse_poll_ms() -> u64 {
    500
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            credential_env: default_credential_env(),
            token_type: default_token_type(),
            poll_interval_ms: default_warehouse_poll_ms(),
        }
    }
}

impl WarehouseConfig {
    /// Resolves the settings, reading the credential from the environment.
    pub fn settings(&self) -> WarehouseSettings {
        WarehouseSettings::from_env(
            &self.credential_env,
            &self.token_type,
            Duration::from_millis(self.poll_interval_ms),
        )
    }
}

/// Job polling settings, shared by the client poller and the stream endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// First wait between polls, in milliseconds. Doubles after every poll.
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    /// Optional ceiling on the wait. Unset means unbounded doubling.
    pub max_interval_ms: Option<u64>,

    /// Interval between server-sent events on the stream endpoint, in milliseconds.
    #[serde(default = "default_stream_interval_ms")]
    pub stream_interval_ms: u64,
}

fn default_initial_interval_ms() -> u64 {
    1000
}

fn default_stream_interval_ms() -> u64 {
    1000
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: None,
            stream_interval_ms: default_stream_interval_ms(),
        }
    }
}

/// Remote server settings for the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    pub engine_name: Option<String>,
    pub engine_version: Option<String>,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            engine_name: None,
            engine_version: None,
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Returns the default config file path for the current platform.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dj-query")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file, then applies environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| DjqError::config(format!("Failed to read config file: {e}")))?;

        Self::parse_toml(&content, path)
    }

    /// Parses configuration from a TOML string.
    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            DjqError::config(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })
    }

    /// Applies `DJQ_BIND`, `DJQ_STATE_PATH` and `DJQ_BASE_URL`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| var(key).filter(|v| !v.is_empty());

        if let Some(bind) = var("DJQ_BIND") {
            self.server.bind = bind;
        }
        if let Some(path) = var("DJQ_STATE_PATH") {
            self.state.path = Some(PathBuf::from(path));
        }
        if let Some(base_url) = var("DJQ_BASE_URL") {
            self.client.base_url = base_url;
        }
    }
}
