//! Error types shared by the core crate.

use thiserror::Error;

/// Errors raised by the data model, name resolution and the store.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid qualified name: {name}")]
    InvalidQualifiedName { name: String },

    #[error("unsupported database type: {db_type}")]
    UnsupportedDatabaseType { db_type: String },

    #[error("server not found: {server_id}")]
    ServerNotFound { server_id: String },

    #[error("token not found: {token_id}")]
    TokenNotFound { token_id: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidQualifiedName { name: name.into() }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }
}
