//! Configuration file structures for edge-bundle.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`ServerConfigFile`]: HTTP server settings
//! - [`AdminConfig`]: Admin API settings
//! - [`AssetsConfig`]: Static asset source and routing rules
//! - [`GuestConfig`]: The guest runtime module

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::RuntimeConfig;

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [runtime.execution]
/// max_fuel = 2_000_000_000
/// timeout_ms = 15000
///
/// [runtime.bootstrap]
/// archive_name = "app.tar.gz"
/// mount_root = "/app"
///
/// [[runtime.bootstrap.runtime_files]]
/// path = "/app/.env"
/// contents = "APP_ENV=production\n"
///
/// [server]
/// bind_addr = "0.0.0.0:8080"
///
/// [admin]
/// enabled = true
/// token = "your-secret-token"
///
/// [assets]
/// source = "http"
/// base = "https://assets.example.com/"
/// static_prefixes = ["/build/"]
///
/// [guest]
/// module = "./php-cgi.wasm"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration (engine, execution, bootstrap).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfigFile,

    /// Admin API configuration.
    #[serde(default)]
    pub admin: AdminConfig,

    /// Static asset configuration.
    #[serde(default)]
    pub assets: AssetsConfig,

    /// Guest module configuration.
    #[serde(default)]
    pub guest: GuestConfig,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigFileError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        let config = Self::from_toml(&content)?;
        debug!(
            path = %path.display(),
            bind = %config.server.bind_addr,
            guest = %config.guest.module,
            "Config file loaded"
        );
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// HTTP server configuration from config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfigFile {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "defaults::bind_addr")]
    pub bind_addr: String,

    /// Request timeout in seconds.
    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Enable graceful shutdown.
    #[serde(default = "defaults::graceful_shutdown")]
    pub graceful_shutdown: bool,
}

impl Default for ServerConfigFile {
    fn default() -> Self {
        Self {
            bind_addr: defaults::bind_addr(),
            request_timeout_secs: defaults::request_timeout_secs(),
            graceful_shutdown: defaults::graceful_shutdown(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminConfig {
    /// Enable Admin API.
    #[serde(default)]
    pub enabled: bool,

    /// Authentication token (required when enabled).
    ///
    /// Clients must include this token in the `X-Admin-Token` header.
    pub token: Option<String>,

    /// URL prefix for Admin API endpoints.
    #[serde(default = "defaults::admin_prefix")]
    pub prefix: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: None,
            prefix: defaults::admin_prefix(),
        }
    }
}

impl AdminConfig {
    /// Check if Admin API is properly configured.
    ///
    /// Returns `true` if enabled and token is set.
    pub fn is_configured(&self) -> bool {
        self.enabled && self.token.is_some()
    }
}

/// Where assets (including the bundle archive) are read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetSourceKind {
    /// A local directory.
    #[default]
    Dir,
    /// An HTTP origin.
    Http,
}

/// Static asset source and routing rules.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssetsConfig {
    /// Kind of asset source.
    #[serde(default)]
    pub source: AssetSourceKind,

    /// Directory path or base URL, depending on `source`.
    #[serde(default = "defaults::assets_base")]
    pub base: String,

    /// Request path prefixes served as static assets.
    #[serde(default = "defaults::static_prefixes")]
    pub static_prefixes: Vec<String>,

    /// File extensions (without dot) served as static assets.
    #[serde(default = "defaults::static_extensions")]
    pub static_extensions: Vec<String>,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            source: AssetSourceKind::default(),
            base: defaults::assets_base(),
            static_prefixes: defaults::static_prefixes(),
            static_extensions: defaults::static_extensions(),
        }
    }
}

/// Guest module configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GuestConfig {
    /// Path to the guest WebAssembly module (`.wasm` or `.wat`).
    #[serde(default = "defaults::guest_module")]
    pub module: String,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            module: defaults::guest_module(),
        }
    }
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

/// Default value functions for serde.
mod defaults {
    pub fn bind_addr() -> String {
        "0.0.0.0:8080".to_string()
    }

    pub const fn request_timeout_secs() -> u64 {
        30
    }

    pub const fn graceful_shutdown() -> bool {
        true
    }

    pub fn admin_prefix() -> String {
        "/_edge/admin".to_string()
    }

    pub fn assets_base() -> String {
        "./dist".to_string()
    }

    pub fn static_prefixes() -> Vec<String> {
        vec!["/build/".to_string(), "/assets/".to_string()]
    }

    pub fn static_extensions() -> Vec<String> {
        [
            "css", "js", "map", "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "woff",
            "woff2", "ttf", "txt",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    pub fn guest_module() -> String {
        "./guest.wasm".to_string()
    }
}
