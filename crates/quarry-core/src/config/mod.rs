//! Configuration types for Quarry.
//!
//! Configuration is loaded from a single YAML file (`quarry.yaml`) into
//! [`QuarryConfig`]. Every section is optional; missing sections take their
//! defaults. Authentication settings can additionally be overridden from the
//! environment (see [`auth`]).
//!
//! # Sections
//!
//! - **mcp**: carrier selection, bind address, heartbeat and request timeout
//! - **auth**: authentication mode and the default identity
//! - **store**: location of the JSON snapshot backing the store
//! - **executor**: connection liveness probing and idle eviction

pub mod auth;
pub mod mcp;
pub mod source;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub use auth::{AuthConfig, AuthMode};
pub use mcp::{McpConfig, Transport};
pub use source::{ConnectionPoolConfig, SourceConfig};

/// Complete Quarry configuration loaded from file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuarryConfig {
    #[serde(default)]
    pub mcp: McpConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// Where persisted servers, tools, resources and tokens live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Connection cache behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Ping a cached connection before handing it out.
    #[serde(default = "default_true")]
    pub probe_before_reuse: bool,

    /// Cached connections unused for this long are closed by the reaper.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            probe_before_reuse: true,
            idle_timeout_secs: default_idle_timeout_secs(),
            reaper_interval_secs: default_reaper_interval_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_store_path() -> PathBuf {
    PathBuf::from("quarry-data.json")
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_reaper_interval_secs() -> u64 {
    60
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl QuarryConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Load from `path` when it exists, otherwise start from defaults, then
    /// apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Self::default(),
        };
        config.auth.apply_env();
        Ok(config)
    }
}
