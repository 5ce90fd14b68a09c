//! MCP server implementation.
//!
//! [`McpServer`] is carrier-agnostic: each carrier parses a message, builds
//! an [`AuthContext`] for it and hands both to [`McpServer::handle_message`]
//! together with the [`Session`] the message arrived on.
//!
//! Listings are filtered silently: tools and resources the caller may not
//! use, or whose names do not resolve back to their server, are left out.
//! Direct calls are not: an unauthorized `tools/call` is an error.

use std::sync::{Arc, Mutex};

use quarry_auth::{AuthContext, AuthorizationPolicyEngine, PresentedToken};
use quarry_core::config::{AuthConfig, McpConfig};
use quarry_core::{CallerIdentity, DataStore, QualifiedName, qualify, resolve_qualified_name};
use serde_json::{Value, json};

use crate::error::{McpError, codes};
use crate::executor::DynamicExecutor;
use crate::protocol::*;

/// Lifecycle of one client connection or session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Initialized,
    Active,
    Closed,
}

/// Per-connection protocol state.
#[derive(Debug)]
pub struct Session {
    id: String,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(SessionState::Idle),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(SessionState::Closed)
    }

    pub fn close(&self) {
        self.set_state(SessionState::Closed);
    }

    fn set_state(&self, next: SessionState) {
        if let Ok(mut state) = self.state.lock() {
            tracing::debug!(session = %self.id, from = ?*state, to = ?next, "Session state change");
            *state = next;
        }
    }
}

/// The MCP server.
pub struct McpServer {
    config: McpConfig,
    auth: AuthConfig,
    store: Arc<dyn DataStore>,
    executor: Arc<DynamicExecutor>,
    policy: AuthorizationPolicyEngine,
}

impl McpServer {
    pub fn new(
        config: McpConfig,
        auth: AuthConfig,
        store: Arc<dyn DataStore>,
        executor: Arc<DynamicExecutor>,
    ) -> Self {
        Self {
            policy: AuthorizationPolicyEngine::new(auth.mode, store.clone()),
            config,
            auth,
            store,
            executor,
        }
    }

    pub fn config(&self) -> &McpConfig {
        &self.config
    }

    pub fn executor(&self) -> &Arc<DynamicExecutor> {
        &self.executor
    }

    /// Caller context for a message carrying `token`. With authentication
    /// disabled the caller is the configured default user.
    pub fn context_for(&self, token: Option<PresentedToken>) -> AuthContext {
        let identity = self
            .auth
            .mode
            .is_none()
            .then(|| CallerIdentity::default_admin(&self.auth.default_username));
        AuthContext { identity, token }
    }

    /// Caller context for the stdio carrier, whose token comes from the
    /// environment variable named by `auth.token_env`.
    pub fn stdio_context(&self) -> AuthContext {
        let token = std::env::var(&self.auth.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(|t| PresentedToken::new(&t));
        self.context_for(token)
    }

    /// Parse and handle one raw message. Unparseable input yields a parse
    /// error response.
    pub async fn handle_raw(
        &self,
        session: &Session,
        ctx: &AuthContext,
        raw: &str,
    ) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(session = %session.id(), error = %e, "Unparseable message");
                return Some(JsonRpcResponse::error(
                    None,
                    codes::PARSE_ERROR,
                    format!("Parse error: {e}"),
                ));
            }
        };
        let id = value.get("id").cloned();
        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(message) => self.handle_message(session, ctx, message).await,
            Err(e) => Some(JsonRpcResponse::error(
                id,
                codes::INVALID_REQUEST,
                format!("Invalid request: {e}"),
            )),
        }
    }

    /// Handle one message. Returns the response for requests and `None` for
    /// notifications and for messages without a method.
    pub async fn handle_message(
        &self,
        session: &Session,
        ctx: &AuthContext,
        message: JsonRpcRequest,
    ) -> Option<JsonRpcResponse> {
        let Some(method) = message.method.as_deref() else {
            tracing::debug!(session = %session.id(), "Ignoring message without method");
            return None;
        };
        let state = session.state();

        if state == SessionState::Closed {
            return message.id.map(|id| {
                JsonRpcResponse::error(Some(id), codes::INVALID_REQUEST, "Session closed")
            });
        }

        if method == "notifications/initialized" {
            session.set_state(SessionState::Active);
            return message.id.map(|id| JsonRpcResponse::success(Some(id), json!({})));
        }

        let Some(id) = message.id else {
            tracing::debug!(session = %session.id(), method = %method, "Ignoring notification");
            return None;
        };

        if state == SessionState::Idle && method != "initialize" {
            tracing::warn!(session = %session.id(), method = %method, "Request before initialize");
        }

        let result = match method {
            "initialize" => self.initialize(session),
            "tools/list" => self.list_tools(ctx).await,
            "tools/call" => self.call_tool(ctx, message.params).await,
            "resources/list" => self.list_resources(ctx).await,
            "resources/read" => self.read_resource(ctx, message.params).await,
            "prompts/list" => Ok(json!({ "prompts": [] })),
            other => Err(McpError::MethodNotFound {
                method: other.to_string(),
            }),
        };

        Some(match result {
            Ok(value) => JsonRpcResponse::success(Some(id), value),
            Err(e) => {
                tracing::warn!(session = %session.id(), method = %method, error = %e, "Request failed");
                JsonRpcResponse::from_error(Some(id), &e)
            }
        })
    }

    fn initialize(&self, session: &Session) -> Result<Value, McpError> {
        session.set_state(SessionState::Initialized);
        let result = InitializeResult {
            protocol_version: self.config.protocol_version.clone(),
            server_info: ServerInfo {
                name: self.config.server_name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: json!({
                "tools": {},
                "resources": {},
                "prompts": {}
            }),
        };
        Ok(serde_json::to_value(result)?)
    }

    async fn list_tools(&self, ctx: &AuthContext) -> Result<Value, McpError> {
        let servers = self.store.get_all_servers().await?;
        let ids: Vec<&str> = servers.iter().map(|s| s.id.as_str()).collect();
        let mut tools = Vec::new();

        for server in &servers {
            let defined = match self.store.get_tools_for_server(&server.id).await {
                Ok(defined) => defined,
                Err(e) => {
                    tracing::warn!(server_id = %server.id, error = %e, "Skipping server tools");
                    continue;
                }
            };
            for tool in defined {
                let name = qualify(&server.id, &tool.name);
                if !resolves_to(&name, &ids, &server.id, &tool.name) {
                    tracing::debug!(tool = %name, "Dropping tool whose name does not resolve");
                    continue;
                }
                match self.policy.check_tool(ctx, &server.id, &tool.name).await {
                    Ok(decision) if decision.allow => tools.push(ToolListing {
                        name,
                        description: format!("[{}] {}", server.id, tool.description),
                        input_schema: tool.input_schema,
                    }),
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(tool = %name, error = %e, "Authorization lookup failed");
                    }
                }
            }
        }

        Ok(json!({ "tools": tools }))
    }

    async fn list_resources(&self, ctx: &AuthContext) -> Result<Value, McpError> {
        let servers = self.store.get_all_servers().await?;
        let ids: Vec<&str> = servers.iter().map(|s| s.id.as_str()).collect();
        let mut resources = Vec::new();

        for server in &servers {
            let defined = match self.store.get_resources_for_server(&server.id).await {
                Ok(defined) => defined,
                Err(e) => {
                    tracing::warn!(server_id = %server.id, error = %e, "Skipping server resources");
                    continue;
                }
            };
            for resource in defined {
                let name = qualify(&server.id, &resource.name);
                if !resolves_to(&name, &ids, &server.id, &resource.name) {
                    tracing::debug!(resource = %name, "Dropping resource whose name does not resolve");
                    continue;
                }
                match self
                    .policy
                    .check_resource(ctx, &server.id, &resource.name)
                    .await
                {
                    Ok(decision) if decision.allow => resources.push(ResourceListing {
                        uri: format!("{name}://list"),
                        name,
                        description: format!("[{}] {}", server.id, resource.description),
                    }),
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(resource = %name, error = %e, "Authorization lookup failed");
                    }
                }
            }
        }

        Ok(json!({ "resources": resources }))
    }

    async fn call_tool(&self, ctx: &AuthContext, params: Option<Value>) -> Result<Value, McpError> {
        let params: CallToolParams = parse_params(params)?;
        let resolved = self.executor.resolver().resolve(&params.name).await?;

        let decision = self
            .policy
            .check_tool(ctx, &resolved.server_id, &resolved.item_name)
            .await?;
        if !decision.allow {
            tracing::info!(tool = %params.name, reason = decision.reason, "Tool call denied");
            return Err(McpError::Unauthorized { name: params.name });
        }

        let result = self
            .executor
            .execute_resolved(&resolved, &params.arguments)
            .await?;
        let response = CallToolResponse {
            content: vec![ToolContent::Text {
                text: serde_json::to_string_pretty(&result)?,
            }],
        };
        Ok(serde_json::to_value(response)?)
    }

    async fn read_resource(
        &self,
        ctx: &AuthContext,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        let params: ReadResourceParams = parse_params(params)?;
        let name = params.uri.split("://").next().unwrap_or_default();
        let resolved: QualifiedName = self.executor.resolver().resolve(name).await?;

        let decision = self
            .policy
            .check_resource(ctx, &resolved.server_id, &resolved.item_name)
            .await?;
        if !decision.allow {
            tracing::info!(resource = %name, reason = decision.reason, "Resource read denied");
            return Err(McpError::Unauthorized {
                name: name.to_string(),
            });
        }

        self.executor.read_resource_resolved(&resolved).await
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T, McpError> {
    let params = params.ok_or_else(|| McpError::InvalidParams("missing params".to_string()))?;
    serde_json::from_value(params).map_err(|e| McpError::InvalidParams(e.to_string()))
}

/// True when `name` resolves back to exactly `(server_id, item)`.
fn resolves_to(name: &str, ids: &[&str], server_id: &str, item: &str) -> bool {
    matches!(
        resolve_qualified_name(name, ids.iter().copied()),
        Ok(q) if q.server_id == server_id && q.item_name == item
    )
}
