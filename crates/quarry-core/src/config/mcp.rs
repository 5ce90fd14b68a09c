//! MCP server configuration.
//!
//! Selects the carrier the server speaks JSON-RPC over and its timing knobs.

use serde::{Deserialize, Serialize};

/// Configuration for the MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// Carrier: "stdio", "sse" or "http".
    #[serde(default)]
    pub transport: Transport,

    /// Bind host (SSE and HTTP carriers).
    #[serde(default = "default_http_host")]
    pub host: String,

    /// Bind port (SSE and HTTP carriers).
    #[serde(default = "default_http_port")]
    pub port: u16,

    /// Interval between SSE heartbeat events.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// How long the session carrier waits for a response before giving up.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Protocol version reported by `initialize`.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,

    /// Server name reported by `initialize`.
    #[serde(default = "default_server_name")]
    pub server_name: String,
}

/// MCP transport type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Newline-delimited JSON over stdin/stdout.
    #[default]
    Stdio,
    /// Event stream for responses plus a POST endpoint for requests.
    Sse,
    /// Session-scoped HTTP streaming.
    Http,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            host: default_http_host(),
            port: default_http_port(),
            heartbeat_secs: default_heartbeat_secs(),
            request_timeout_ms: default_request_timeout_ms(),
            protocol_version: default_protocol_version(),
            server_name: default_server_name(),
        }
    }
}

impl McpConfig {
    pub fn is_stdio(&self) -> bool {
        self.transport == Transport::Stdio
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_http_host() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    3001
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_protocol_version() -> String {
    "2024-11-05".to_string()
}

fn default_server_name() -> String {
    "quarry".to_string()
}
