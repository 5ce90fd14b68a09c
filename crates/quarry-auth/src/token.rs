//! MCP tokens as presented by callers.
//!
//! A token has the form `<base64url(claims JSON)>.<signature>`. Tokens are
//! issued elsewhere; here we only hash them for lookup and decode the claims
//! so they can be matched against the stored grant. The signature is not
//! verified: a token is trusted only if its SHA-256 hash is registered.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use quarry_core::{CallerIdentity, Role};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AuthError;

/// `typ` claim carried by MCP tokens.
pub const TOKEN_TYPE: &str = "quarry-mcp";

/// Lower-case hex SHA-256 of the full token string.
pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Claims embedded in an MCP token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Token id; matches the stored record's id.
    pub jti: String,
    /// Subject username.
    pub sub: String,
    /// Workspace.
    pub ws: String,
    #[serde(default)]
    pub role: Role,
    pub typ: String,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl TokenClaims {
    pub fn identity(&self) -> CallerIdentity {
        CallerIdentity {
            subject_id: self.sub.clone(),
            workspace: self.ws.clone(),
            role: self.role,
        }
    }
}

/// Decode the claims segment of `raw`.
pub fn decode_claims(raw: &str) -> Result<TokenClaims, AuthError> {
    let (payload, signature) = raw
        .split_once('.')
        .ok_or_else(|| AuthError::MalformedToken("missing signature segment".to_string()))?;
    if payload.is_empty() || signature.is_empty() {
        return Err(AuthError::MalformedToken("empty segment".to_string()));
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::MalformedToken(format!("invalid base64: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::MalformedToken(format!("invalid claims: {e}")))
}

/// A token supplied with a request, hashed and (if well-formed) decoded.
#[derive(Debug, Clone)]
pub struct PresentedToken {
    pub hash: String,
    pub claims: Option<TokenClaims>,
}

impl PresentedToken {
    pub fn new(raw: &str) -> Self {
        let raw = raw.trim();
        let claims = match decode_claims(raw) {
            Ok(claims) => Some(claims),
            Err(e) => {
                tracing::debug!(error = %e, "presented token has undecodable claims");
                None
            }
        };
        Self {
            hash: hash_token(raw),
            claims,
        }
    }

    /// Parse an `Authorization` header value. Only the `Bearer` scheme is accepted.
    pub fn from_authorization_header(value: &str) -> Option<Self> {
        let (scheme, token) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let token = token.trim();
        (!token.is_empty()).then(|| Self::new(token))
    }
}
