//! Connection parameters for a server's backing database.
//!
//! A `SourceConfig` is stored with every generated server and is the only
//! thing the executor needs to open a pool for it. The password can come
//! from the record itself or from an environment variable named by
//! `password_env` (which wins when set).

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::error::CoreError;

/// Dialect plus connection parameters for one server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database type: `mssql`, `mysql` or `postgresql`.
    ///
    /// Kept as a string so that records naming an unknown engine still load
    /// and fail only when executed.
    #[serde(rename = "type")]
    pub db_type: String,

    #[serde(default = "default_host")]
    pub host: String,

    /// Port; the dialect's default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default)]
    pub database: String,

    #[serde(default)]
    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Environment variable containing the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    /// SQL Server only.
    #[serde(default)]
    pub encrypt: bool,

    /// SQL Server only.
    #[serde(default = "default_trust_server_certificate")]
    pub trust_server_certificate: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<ConnectionPoolConfig>,
}

/// Connection pool sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionPoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Timeout in seconds when acquiring a connection.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u32,

    /// How long a pooled connection can remain idle before being closed.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u32,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            acquire_timeout_seconds: default_acquire_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

impl SourceConfig {
    /// A config for `dialect` with every other field defaulted.
    pub fn new(dialect: Dialect) -> Self {
        Self {
            db_type: dialect.as_str().to_string(),
            host: default_host(),
            port: None,
            database: String::new(),
            username: String::new(),
            password: None,
            password_env: None,
            encrypt: false,
            trust_server_certificate: default_trust_server_certificate(),
            pool: None,
        }
    }

    pub fn dialect(&self) -> Result<Dialect, CoreError> {
        self.db_type.parse()
    }

    /// Explicit port, or the dialect's default.
    pub fn port_or_default(&self) -> Result<u16, CoreError> {
        match self.port {
            Some(port) => Ok(port),
            None => Ok(self.dialect()?.default_port()),
        }
    }

    /// Password with `password_env` taking precedence, resolved through `lookup`.
    pub fn resolve_password_with<F>(&self, lookup: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(env_var) = &self.password_env
            && let Some(password) = lookup(env_var)
        {
            return Some(password);
        }
        self.password.clone()
    }

    /// Password with `password_env` resolved from the process environment.
    pub fn resolve_password(&self) -> Option<String> {
        self.resolve_password_with(|name| std::env::var(name).ok())
    }

    /// Pool sizing, falling back to defaults.
    pub fn pool_or_default(&self) -> ConnectionPoolConfig {
        self.pool.clone().unwrap_or_default()
    }

    /// Postgres or MySQL connection URL for sqlx.
    ///
    /// SQL Server connections are configured field by field and never use a URL.
    pub fn connection_url(&self) -> Result<String, CoreError> {
        let dialect = self.dialect()?;
        let scheme = match dialect {
            Dialect::Postgresql => "postgresql",
            Dialect::Mysql => "mysql",
            Dialect::Mssql => {
                return Err(CoreError::UnsupportedDatabaseType {
                    db_type: "mssql connection url".to_string(),
                });
            }
        };
        let port = self.port_or_default()?;
        Ok(match self.resolve_password() {
            Some(password) => format!(
                "{scheme}://{}:{}@{}:{}/{}",
                self.username, password, self.host, port, self.database
            ),
            None => format!(
                "{scheme}://{}@{}:{}/{}",
                self.username, self.host, port, self.database
            ),
        })
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_trust_server_certificate() -> bool {
    true
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout() -> u32 {
    30
}

fn default_idle_timeout() -> u32 {
    600
}
