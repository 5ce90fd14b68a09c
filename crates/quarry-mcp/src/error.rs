//! Error types for the MCP crate.

use quarry_auth::AuthError;
use quarry_core::CoreError;
use thiserror::Error;

/// JSON-RPC error codes used on the wire.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// Errors that can occur while generating, resolving or executing.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("invalid qualified name: {name}")]
    InvalidQualifiedName { name: String },

    #[error("server not found: {server_id}")]
    ServerNotFound { server_id: String },

    #[error("tool not found: {name}")]
    ToolNotFound { name: String },

    #[error("resource not found: {name}")]
    ResourceNotFound { name: String },

    #[error("unsupported database type: {db_type}")]
    UnsupportedDatabaseType { db_type: String },

    /// Direct call denied by policy. Listings never raise this.
    #[error("not authorized: {name}")]
    Unauthorized { name: String },

    #[error("connection failed: {0}")]
    ConnectionFailure(String),

    #[error("query failed: {0}")]
    QueryExecutionFailure(String),

    #[error("Request timeout")]
    RequestTimeout,

    #[error("method not found: {method}")]
    MethodNotFound { method: String },

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to start MCP server: {0}")]
    StartupFailed(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl McpError {
    /// JSON-RPC error code for this failure.
    pub fn code(&self) -> i32 {
        match self {
            McpError::MethodNotFound { .. } => codes::METHOD_NOT_FOUND,
            McpError::InvalidParams(_) => codes::INVALID_PARAMS,
            McpError::Unauthorized { .. } => codes::INVALID_REQUEST,
            _ => codes::INTERNAL_ERROR,
        }
    }
}

impl From<CoreError> for McpError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidQualifiedName { name } => McpError::InvalidQualifiedName { name },
            CoreError::UnsupportedDatabaseType { db_type } => {
                McpError::UnsupportedDatabaseType { db_type }
            }
            CoreError::ServerNotFound { server_id } => McpError::ServerNotFound { server_id },
            CoreError::Io(e) => McpError::Io(e),
            CoreError::Serialization(e) => McpError::Serialization(e),
            other => McpError::Store(other.to_string()),
        }
    }
}

impl From<AuthError> for McpError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Store(core) => core.into(),
            other => McpError::Store(other.to_string()),
        }
    }
}
