//! Server configuration loaded from a JSON file

use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::state::normalize_extension;
use crate::token::CapabilityToken;

const DEFAULT_URL: &str = "https://localhost";
const DEFAULT_PORT: u16 = 443;
const DEFAULT_HOST: &str = "0.0.0.0";

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Configuration file is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Configuration I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid listen address: {0}")]
    InvalidAddress(String),
}

/// Immutable configuration snapshot handed to the server at startup
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    /// Base URL for share links and not-found redirects
    #[serde(default, deserialize_with = "empty_as_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub host: Option<String>,
    pub certfile: PathBuf,
    pub keyfile: PathBuf,
    /// Extensions served with `Content-Disposition: attachment`
    #[serde(default)]
    pub download_extensions: Vec<String>,
    #[serde(default = "default_public_root")]
    pub public_root: PathBuf,
    #[serde(default = "default_resources_root")]
    pub resources_root: PathBuf,
    #[serde(default = "default_database")]
    pub database: PathBuf,
    #[serde(default = "default_true")]
    pub redirect_not_found: bool,
}

fn default_public_root() -> PathBuf {
    PathBuf::from("public_html")
}

fn default_resources_root() -> PathBuf {
    PathBuf::from("resources")
}

fn default_database() -> PathBuf {
    PathBuf::from("database.db")
}

fn default_true() -> bool {
    true
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

impl ServerConfig {
    /// Load configuration from a JSON file
    ///
    /// Relative roots are resolved against the current working directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
            _ => ConfigError::Io(e),
        })?;

        let config = Self::from_json(&raw)?;
        Ok(config.with_absolute_roots(&std::env::current_dir()?))
    }

    /// Parse configuration from a JSON string, leaving paths untouched
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    fn with_absolute_roots(mut self, base: &Path) -> Self {
        self.public_root = absolutize(base, &self.public_root);
        self.resources_root = absolutize(base, &self.resources_root);
        self
    }

    pub fn url(&self) -> &str {
        self.url.as_deref().unwrap_or(DEFAULT_URL)
    }

    pub fn port(&self) -> u16 {
        match self.port {
            Some(0) | None => DEFAULT_PORT,
            Some(port) => port,
        }
    }

    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let host = self.host();
        let candidate = if host.contains(':') {
            format!("[{}]:{}", host, self.port())
        } else {
            format!("{}:{}", host, self.port())
        };
        candidate
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(candidate))
    }

    /// Where unauthorized and missing requests are sent, if anywhere
    pub fn not_found_redirect(&self) -> Option<String> {
        self.redirect_not_found.then(|| self.url().to_string())
    }

    /// Normalized download extensions: lowercase, no leading dot
    pub fn attachment_extensions(&self) -> HashSet<String> {
        self.download_extensions
            .iter()
            .filter_map(|ext| normalize_extension(ext))
            .collect()
    }

    /// Public link to the served tree
    pub fn share_url(&self, token: &CapabilityToken) -> String {
        let base = self.url().trim_end_matches('/');
        if self.port() == DEFAULT_PORT {
            format!("{}/{}/", base, token.expose())
        } else {
            format!("{}:{}/{}/", base, self.port(), token.expose())
        }
    }
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
