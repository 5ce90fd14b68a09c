//! Quarry authorization
//!
//! Decides whether a caller may see or invoke a server, tool or resource.
//! Decisions combine a scoped default policy (does this item need a token at
//! all?) with the grants recorded on the caller's MCP token.
//!
//! The engine never issues tokens and never mutates identities; both arrive
//! pre-resolved in an [`AuthContext`].

pub mod context;
pub mod error;
pub mod policy;
pub mod token;

pub use context::AuthContext;
pub use error::AuthError;
pub use policy::{AuthorizationPolicyEngine, PolicyDecision};
pub use token::{PresentedToken, TOKEN_TYPE, TokenClaims, decode_claims, hash_token};
