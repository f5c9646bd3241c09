//! Configuration file handling
//!
//! Settings come from a TOML file; every field has a default so a missing or
//! partial file still yields a usable config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use logscope_backend::HttpBackendConfig;
use logscope_query::PollConfig;
use serde::Deserialize;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where and how to reach the log backend
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_endpoint() -> String {
    "http://localhost:4566".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Query defaults
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    #[serde(default)]
    pub log_groups: Vec<String>,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_backoff_factor() -> f64 {
    1.5
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            log_groups: Vec::new(),
            poll_interval_ms: default_poll_interval(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load an explicit path, or the default location if it exists
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match default_path() {
            Some(path) if path.exists() => {
                tracing::debug!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn backend(&self) -> HttpBackendConfig {
        HttpBackendConfig {
            endpoint: self.backend.endpoint.clone(),
            request_timeout: Duration::from_secs(self.backend.request_timeout_secs),
        }
    }

    pub fn poll(&self) -> PollConfig {
        PollConfig {
            base_interval: Duration::from_millis(self.query.poll_interval_ms),
            backoff_factor: self.query.backoff_factor,
        }
    }
}

/// `<config dir>/logscope/config.toml`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("logscope").join("config.toml"))
}
