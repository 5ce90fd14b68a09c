//! Error types for policy evaluation.

use quarry_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// A lookup against the store failed. Distinct from a denial.
    #[error("store error: {0}")]
    Store(#[from] CoreError),

    #[error("malformed token: {0}")]
    MalformedToken(String),
}
