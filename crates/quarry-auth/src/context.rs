//! Per-request caller context.

use quarry_core::CallerIdentity;

use crate::token::PresentedToken;

/// What a carrier knows about the caller of one message.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    /// Identity resolved upstream (session login or auth-disabled default).
    pub identity: Option<CallerIdentity>,
    pub token: Option<PresentedToken>,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_identity(identity: CallerIdentity) -> Self {
        Self {
            identity: Some(identity),
            token: None,
        }
    }

    pub fn with_token(token: PresentedToken) -> Self {
        Self {
            identity: None,
            token: Some(token),
        }
    }

    /// The identity used for ownership checks: the upstream identity if one
    /// was resolved, otherwise the one carried in the token's claims.
    pub fn caller(&self) -> Option<CallerIdentity> {
        if let Some(identity) = &self.identity {
            return Some(identity.clone());
        }
        self.token
            .as_ref()
            .and_then(|t| t.claims.as_ref())
            .map(|c| c.identity())
    }
}
