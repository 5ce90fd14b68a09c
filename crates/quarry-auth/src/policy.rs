//! Authorization policy evaluation.
//!
//! Two questions are answered per call:
//!
//! 1. **Is a token required?** Scoped default policies are consulted in
//!    the order global, user (the server's owning workspace), server, then
//!    the legacy per-server config. Global and user only update a running
//!    default; a server-scope or legacy record is returned as soon as it is
//!    found. Tools inherit the server's answer and may override it with a
//!    tool-scope record keyed by the qualified tool name.
//! 2. **Does the presented token grant access?** The token must be
//!    registered, unrevoked, unexpired and consistent with its own claims,
//!    and the server must belong to the caller. Then an explicit tri-state
//!    rule wins outright; without one, the allow-all flag or the explicit
//!    allow-list decides.
//!
//! With auth mode `NONE` every check passes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use quarry_core::config::AuthMode;
use quarry_core::model::rule_for;
use quarry_core::{DataStore, McpTokenRecord, PolicyScope, ServerConfig, qualify};

use crate::context::AuthContext;
use crate::error::AuthError;
use crate::token::TOKEN_TYPE;

/// Outcome of a single authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDecision {
    pub allow: bool,
    pub reason: &'static str,
}

impl PolicyDecision {
    fn allow(reason: &'static str) -> Self {
        Self {
            allow: true,
            reason,
        }
    }

    fn deny(reason: &'static str) -> Self {
        Self {
            allow: false,
            reason,
        }
    }
}

/// Result of validating the caller's token against a server.
enum Grant {
    Valid(Box<McpTokenRecord>),
    Rejected(PolicyDecision),
}

pub struct AuthorizationPolicyEngine {
    mode: AuthMode,
    store: Arc<dyn DataStore>,
}

impl AuthorizationPolicyEngine {
    pub fn new(mode: AuthMode, store: Arc<dyn DataStore>) -> Self {
        Self { mode, store }
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Whether calls to `server` need a token.
    pub async fn effective_server_require_token(
        &self,
        server: &ServerConfig,
    ) -> Result<bool, AuthError> {
        let mut require = true;

        if let Some(global) = self
            .store
            .get_mcp_token_policy(PolicyScope::Global, PolicyScope::GLOBAL_ID)
            .await?
        {
            require = global.require_token;
        }

        if let Some(user) = self
            .store
            .get_mcp_token_policy(PolicyScope::User, server.owner_scope())
            .await?
        {
            require = user.require_token;
        }

        if let Some(scoped) = self
            .store
            .get_mcp_token_policy(PolicyScope::Server, &server.id)
            .await?
        {
            return Ok(scoped.require_token);
        }

        if let Some(legacy) = self.store.get_server_auth_config(&server.id).await? {
            return Ok(legacy.require_token);
        }

        Ok(require)
    }

    /// Whether calls to `tool_name` on `server` need a token.
    pub async fn effective_tool_require_token(
        &self,
        server: &ServerConfig,
        tool_name: &str,
    ) -> Result<bool, AuthError> {
        let inherited = self.effective_server_require_token(server).await?;
        let key = qualify(&server.id, tool_name);
        match self
            .store
            .get_mcp_token_policy(PolicyScope::Tool, &key)
            .await?
        {
            Some(tool) => Ok(tool.require_token),
            None => Ok(inherited),
        }
    }

    pub async fn check_server(
        &self,
        ctx: &AuthContext,
        server_id: &str,
    ) -> Result<PolicyDecision, AuthError> {
        if self.mode.is_none() {
            return Ok(PolicyDecision::allow("auth disabled"));
        }
        let Some(server) = self.store.get_server(server_id).await? else {
            return Ok(PolicyDecision::deny("unknown server"));
        };
        if !self.effective_server_require_token(&server).await? {
            return Ok(PolicyDecision::allow("token not required"));
        }
        let decision = match self.grant(ctx, &server, Utc::now()).await? {
            Grant::Valid(record) => server_rule(&record, server_id),
            Grant::Rejected(decision) => decision,
        };
        log_decision("server", server_id, decision);
        Ok(decision)
    }

    pub async fn check_tool(
        &self,
        ctx: &AuthContext,
        server_id: &str,
        tool_name: &str,
    ) -> Result<PolicyDecision, AuthError> {
        if self.mode.is_none() {
            return Ok(PolicyDecision::allow("auth disabled"));
        }
        let Some(server) = self.store.get_server(server_id).await? else {
            return Ok(PolicyDecision::deny("unknown server"));
        };
        if !self.effective_tool_require_token(&server, tool_name).await? {
            return Ok(PolicyDecision::allow("token not required"));
        }
        let key = qualify(server_id, tool_name);
        let decision = match self.grant(ctx, &server, Utc::now()).await? {
            Grant::Valid(record) => {
                item_rule(
                    &record.tool_rules,
                    record.allow_all_tools,
                    &record.allowed_tools,
                    &key,
                )
            }
            Grant::Rejected(decision) => decision,
        };
        log_decision("tool", &key, decision);
        Ok(decision)
    }

    /// Resources additionally require the server itself to be authorized.
    pub async fn check_resource(
        &self,
        ctx: &AuthContext,
        server_id: &str,
        resource_name: &str,
    ) -> Result<PolicyDecision, AuthError> {
        if self.mode.is_none() {
            return Ok(PolicyDecision::allow("auth disabled"));
        }
        let Some(server) = self.store.get_server(server_id).await? else {
            return Ok(PolicyDecision::deny("unknown server"));
        };
        if !self.effective_server_require_token(&server).await? {
            return Ok(PolicyDecision::allow("token not required"));
        }
        let key = qualify(server_id, resource_name);
        let decision = match self.grant(ctx, &server, Utc::now()).await? {
            Grant::Valid(record) => {
                let server_decision = server_rule(&record, server_id);
                if server_decision.allow {
                    item_rule(
                        &record.resource_rules,
                        record.allow_all_resources,
                        &record.allowed_resources,
                        &key,
                    )
                } else {
                    server_decision
                }
            }
            Grant::Rejected(decision) => decision,
        };
        log_decision("resource", &key, decision);
        Ok(decision)
    }

    pub async fn is_server_authorized(
        &self,
        ctx: &AuthContext,
        server_id: &str,
    ) -> Result<bool, AuthError> {
        Ok(self.check_server(ctx, server_id).await?.allow)
    }

    pub async fn is_tool_authorized(
        &self,
        ctx: &AuthContext,
        server_id: &str,
        tool_name: &str,
    ) -> Result<bool, AuthError> {
        Ok(self.check_tool(ctx, server_id, tool_name).await?.allow)
    }

    pub async fn is_resource_authorized(
        &self,
        ctx: &AuthContext,
        server_id: &str,
        resource_name: &str,
    ) -> Result<bool, AuthError> {
        Ok(self
            .check_resource(ctx, server_id, resource_name)
            .await?
            .allow)
    }

    /// Token validity and ownership, shared by every check.
    async fn grant(
        &self,
        ctx: &AuthContext,
        server: &ServerConfig,
        now: DateTime<Utc>,
    ) -> Result<Grant, AuthError> {
        let Some(token) = &ctx.token else {
            return Ok(Grant::Rejected(PolicyDecision::deny("token required")));
        };
        let Some(claims) = &token.claims else {
            return Ok(Grant::Rejected(PolicyDecision::deny("malformed token")));
        };
        if claims.typ != TOKEN_TYPE {
            return Ok(Grant::Rejected(PolicyDecision::deny("wrong token type")));
        }
        let Some(record) = self.store.get_mcp_token_by_hash(&token.hash).await? else {
            return Ok(Grant::Rejected(PolicyDecision::deny("unknown token")));
        };
        if record.is_revoked() {
            return Ok(Grant::Rejected(PolicyDecision::deny("token revoked")));
        }
        if record.id != claims.jti
            || record.subject_username != claims.sub
            || record.workspace_id != claims.ws
        {
            return Ok(Grant::Rejected(PolicyDecision::deny("token claims mismatch")));
        }
        if record.is_expired_at(now) {
            return Ok(Grant::Rejected(PolicyDecision::deny("token expired")));
        }
        if let Some(exp) = claims.exp
            && exp <= now.timestamp()
        {
            return Ok(Grant::Rejected(PolicyDecision::deny("token expired")));
        }

        let owner = server.owner_scope();
        let owns = ctx
            .caller()
            .is_some_and(|caller| caller.workspace == owner || caller.subject_id == owner);
        if !owns {
            return Ok(Grant::Rejected(PolicyDecision::deny("server not owned by caller")));
        }

        Ok(Grant::Valid(Box::new(record)))
    }
}

fn server_rule(record: &McpTokenRecord, server_id: &str) -> PolicyDecision {
    item_rule(
        &record.server_rules,
        record.allow_all_servers,
        &record.server_ids,
        server_id,
    )
}

fn item_rule(
    rules: &quarry_core::TriStateRules,
    allow_all: bool,
    allowed: &std::collections::BTreeSet<String>,
    key: &str,
) -> PolicyDecision {
    match rule_for(rules, key) {
        Some(true) => PolicyDecision::allow("explicit allow"),
        Some(false) => PolicyDecision::deny("explicit deny"),
        None if allow_all => PolicyDecision::allow("allow all"),
        None if allowed.contains(key) => PolicyDecision::allow("allow list"),
        None => PolicyDecision::deny("not in allow list"),
    }
}

fn log_decision(kind: &'static str, name: &str, decision: PolicyDecision) {
    if !decision.allow {
        tracing::debug!(kind, name, reason = decision.reason, "authorization denied");
    }
}
