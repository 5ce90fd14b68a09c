//! Shared fixtures: a generated `acme__crm` server over a fake database.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use quarry_auth::{AuthContext, PresentedToken, TOKEN_TYPE, hash_token};
use quarry_core::config::{AuthConfig, AuthMode, ExecutorConfig, McpConfig};
use quarry_core::{DataStore, Dialect, McpTokenRecord, MemoryStore, SourceConfig, qualify};
use quarry_mcp::executor::{Connection, Connector};
use quarry_mcp::statement::PreparedStatement;
use quarry_mcp::{
    DynamicExecutor, GenerateRequest, JsonRpcRequest, JsonRpcResponse, McpError, McpServer,
    Session, TableSample, ToolDefinitionGenerator,
};
use serde_json::{Map, Value, json};

// =============================================================================
// FIXTURE CONSTANTS
// =============================================================================

pub const OWNER: &str = "acme";
pub const SERVER_ID: &str = "acme__crm";

pub fn qualified(item: &str) -> String {
    qualify(SERVER_ID, item)
}

pub fn people_rows() -> Vec<Map<String, Value>> {
    [
        json!({"id": 1, "name": "Ada", "salary": 1200.5}),
        json!({"id": 2, "name": "Grace", "salary": 980.0}),
        json!({"id": 3, "name": null, "salary": 1500.25}),
    ]
    .into_iter()
    .filter_map(|v| v.as_object().cloned())
    .collect()
}

// =============================================================================
// FAKE DATABASE
// =============================================================================

/// What the fake database has seen.
#[derive(Default)]
pub struct Recorded {
    pub statements: Mutex<Vec<PreparedStatement>>,
    pub connects: AtomicUsize,
}

impl Recorded {
    pub fn last(&self) -> PreparedStatement {
        self.statements.lock().unwrap().last().cloned().expect("no statement ran")
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

/// Answers every read with `rows` after waiting `delay`.
pub struct FakeDatabase {
    recorded: Arc<Recorded>,
    rows: Vec<Value>,
    delay: Duration,
}

struct FakeConnection {
    recorded: Arc<Recorded>,
    rows: Vec<Value>,
    delay: Duration,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn fetch_rows(&self, statement: &PreparedStatement) -> Result<Vec<Value>, McpError> {
        tokio::time::sleep(self.delay).await;
        self.recorded.statements.lock().unwrap().push(statement.clone());
        Ok(self.rows.clone())
    }

    async fn execute(&self, statement: &PreparedStatement) -> Result<u64, McpError> {
        tokio::time::sleep(self.delay).await;
        self.recorded.statements.lock().unwrap().push(statement.clone());
        Ok(1)
    }

    async fn ping(&self) -> Result<(), McpError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), McpError> {
        Ok(())
    }
}

#[async_trait]
impl Connector for FakeDatabase {
    async fn connect(
        &self,
        _server_id: &str,
        _source: &SourceConfig,
        _dialect: Dialect,
    ) -> Result<Arc<dyn Connection>, McpError> {
        self.recorded.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeConnection {
            recorded: self.recorded.clone(),
            rows: self.rows.clone(),
            delay: self.delay,
        }))
    }
}

// =============================================================================
// TEST CONTEXT
// =============================================================================

pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub recorded: Arc<Recorded>,
    pub executor: Arc<DynamicExecutor>,
}

impl TestContext {
    pub async fn setup() -> Self {
        Self::setup_with(Dialect::Mssql).await
    }

    pub async fn setup_with(dialect: Dialect) -> Self {
        Self::build(dialect, Duration::ZERO).await
    }

    /// Like [`TestContext::setup`], but every query takes `delay`.
    pub async fn setup_slow(delay: Duration) -> Self {
        Self::build(Dialect::Mssql, delay).await
    }

    /// Generate `acme__crm` with one `people` table for `dialect`.
    async fn build(dialect: Dialect, delay: Duration) -> Self {
        let store = Arc::new(MemoryStore::new());
        let outcome = ToolDefinitionGenerator::new(store.clone())
            .generate_server(GenerateRequest {
                name: "crm".to_string(),
                owner_workspace: OWNER.to_string(),
                source: SourceConfig::new(dialect),
                tables: vec![TableSample::new("people", people_rows())],
            })
            .await;
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.server_id.as_deref(), Some(SERVER_ID));

        let recorded = Arc::new(Recorded::default());
        let database = FakeDatabase {
            recorded: recorded.clone(),
            rows: people_rows().into_iter().map(Value::Object).collect(),
            delay,
        };
        let executor = Arc::new(DynamicExecutor::new(
            store.clone(),
            Arc::new(database),
            ExecutorConfig::default(),
        ));

        Self {
            store,
            recorded,
            executor,
        }
    }

    pub fn server(&self, mode: AuthMode) -> Arc<McpServer> {
        self.server_with(mode, McpConfig::default())
    }

    pub fn server_with(&self, mode: AuthMode, mcp: McpConfig) -> Arc<McpServer> {
        let auth = AuthConfig {
            mode,
            ..Default::default()
        };
        let store: Arc<dyn DataStore> = self.store.clone();
        Arc::new(McpServer::new(
            mcp,
            auth,
            store,
            self.executor.clone(),
        ))
    }

    pub fn open_server(&self) -> Arc<McpServer> {
        self.server(AuthMode::None)
    }
}

// =============================================================================
// TOKENS
// =============================================================================

pub fn raw_token(jti: &str, workspace: &str) -> String {
    let claims = json!({
        "jti": jti, "sub": workspace, "ws": workspace, "role": "user",
        "typ": TOKEN_TYPE, "iat": Utc::now().timestamp()
    });
    format!("{}.sig", URL_SAFE_NO_PAD.encode(claims.to_string()))
}

pub fn token_record(jti: &str, raw: &str) -> McpTokenRecord {
    serde_json::from_value(json!({
        "id": jti,
        "workspaceId": OWNER,
        "subjectUsername": OWNER,
        "tokenHash": hash_token(raw),
        "neverExpires": true,
        "createdAt": Utc::now(),
    }))
    .unwrap()
}

pub fn token_context(raw: &str) -> AuthContext {
    AuthContext::with_token(PresentedToken::new(raw))
}

// =============================================================================
// MESSAGE HELPERS
// =============================================================================

pub async fn request(
    server: &McpServer,
    ctx: &AuthContext,
    method: &str,
    params: Option<Value>,
) -> JsonRpcResponse {
    let session = Session::new("test");
    server
        .handle_message(&session, ctx, JsonRpcRequest::new(1, method, params))
        .await
        .expect("requests always get a response")
}

pub async fn call_tool(
    server: &McpServer,
    ctx: &AuthContext,
    name: &str,
    arguments: Value,
) -> JsonRpcResponse {
    request(
        server,
        ctx,
        "tools/call",
        Some(json!({ "name": name, "arguments": arguments })),
    )
    .await
}

/// Parse the JSON text carried by a successful `tools/call` reply.
pub fn tool_payload(response: &JsonRpcResponse) -> Value {
    let result = response.result.as_ref().expect("expected a result");
    let text = result["content"][0]["text"].as_str().expect("text content");
    serde_json::from_str(text).unwrap()
}

pub fn listed_names(response: &JsonRpcResponse, key: &str) -> Vec<String> {
    response.result.as_ref().expect("expected a result")[key]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["name"].as_str().unwrap().to_string())
        .collect()
}
