//! # Host Configuration
//!
//! Loaded in three layers, later layers winning:
//!
//! 1. built-in defaults
//! 2. optional TOML file
//! 3. environment overrides (`KS_HTTP_HOST`, `KS_HTTP_PORT`, `KS_WS_PATH`,
//!    `KS_STATIC_ROOT`)
//!
//! The result is validated before the host starts.

use ks_02_http_pipeline::DEFAULT_MAX_BODY_BYTES;
use ks_03_connections::{DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_OUTBOUND_BUFFER};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Complete host configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// HTTP listener configuration
    pub http: HttpConfig,
    /// Websocket endpoint configuration
    pub websocket: WebSocketConfig,
    /// Static file serving
    pub static_files: StaticFilesConfig,
    /// Event bus configuration
    pub event_bus: EventBusConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 8080)
    pub port: u16,
    /// Largest accepted request body
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 8080,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Websocket endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Upgrade path (default: /ws)
    pub path: String,
    /// Outbound queue depth per connection
    pub outbound_buffer: usize,
    /// Largest accepted inbound message
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            path: "/ws".to_string(),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Static file serving
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticFilesConfig {
    pub enabled: bool,
    /// Directory served at `/`
    pub root: PathBuf,
    /// File served for directory requests
    pub index: String,
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: PathBuf::from("./public"),
            index: "index.html".to_string(),
        }
    }
}

/// Event bus configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Mount the event bus on the websocket path
    pub enabled: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {variable}: {value}")]
    InvalidEnv { variable: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl HostConfig {
    /// Defaults, then `path` if given, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `KS_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("KS_HTTP_HOST") {
            self.http.host = value.parse().map_err(|_| ConfigError::InvalidEnv {
                variable: "KS_HTTP_HOST",
                value,
            })?;
        }
        if let Some(value) = lookup("KS_HTTP_PORT") {
            self.http.port = value.parse().map_err(|_| ConfigError::InvalidEnv {
                variable: "KS_HTTP_PORT",
                value,
            })?;
        }
        if let Some(value) = lookup("KS_WS_PATH") {
            self.websocket.path = value;
        }
        if let Some(value) = lookup("KS_STATIC_ROOT") {
            self.static_files.root = PathBuf::from(value);
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.port == 0 {
            return Err(ConfigError::Invalid("http.port cannot be 0".into()));
        }
        if self.http.max_body_bytes == 0 {
            return Err(ConfigError::Invalid("http.max_body_bytes cannot be 0".into()));
        }
        if !self.websocket.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "websocket.path must start with '/': {}",
                self.websocket.path
            )));
        }
        if self.websocket.outbound_buffer == 0 {
            return Err(ConfigError::Invalid(
                "websocket.outbound_buffer cannot be 0".into(),
            ));
        }
        Ok(())
    }

    /// Get HTTP bind address
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.host, self.http.port)
    }
}
