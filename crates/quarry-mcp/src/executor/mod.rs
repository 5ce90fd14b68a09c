//! Dynamic tool execution.
//!
//! The executor resolves a qualified tool or resource name, binds the call's
//! arguments into the stored SQL for the server's dialect, and runs it on a
//! connection cached per server.
//!
//! Cached connections are probed before reuse (when enabled), replaced when
//! the server's source config changes, and closed by an idle reaper. A failed
//! probe triggers exactly one reconnect; the query itself is never retried.

mod connection;
mod mssql;
mod mysql;
mod postgres;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::{Duration, Instant};

use quarry_core::config::ExecutorConfig;
use quarry_core::{
    DataStore, Dialect, Operation, QualifiedName, QualifiedNameResolver, ServerConfig,
    SourceConfig, qualify,
};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::McpError;
use crate::protocol::{ReadResourceResult, ResourceContent};
use crate::statement::prepare_statement;

pub use connection::{Connection, Connector, DriverConnector};
pub use mssql::MssqlConnection;
pub use mysql::MysqlConnection;
pub use postgres::PostgresConnection;

struct CachedConnection {
    dialect: Dialect,
    connection: Arc<dyn Connection>,
    source: SourceConfig,
    last_used: StdMutex<Instant>,
}

impl CachedConnection {
    fn new(dialect: Dialect, connection: Arc<dyn Connection>, source: SourceConfig) -> Self {
        Self {
            dialect,
            connection,
            source,
            last_used: StdMutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        if let Ok(mut last_used) = self.last_used.lock() {
            *last_used = Instant::now();
        }
    }

    fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }
}

pub struct DynamicExecutor {
    store: Arc<dyn DataStore>,
    resolver: QualifiedNameResolver,
    connector: Arc<dyn Connector>,
    connections: Mutex<HashMap<String, Arc<CachedConnection>>>,
    config: ExecutorConfig,
}

impl DynamicExecutor {
    pub fn new(
        store: Arc<dyn DataStore>,
        connector: Arc<dyn Connector>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            resolver: QualifiedNameResolver::new(store.clone()),
            store,
            connector,
            connections: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn resolver(&self) -> &QualifiedNameResolver {
        &self.resolver
    }

    /// Execute the tool named `<serverId>__<toolName>`.
    pub async fn execute_tool(&self, name: &str, args: &Value) -> Result<Value, McpError> {
        let qualified = self.resolver.resolve(name).await?;
        self.execute_resolved(&qualified, args).await
    }

    /// Execute an already resolved tool. Returns `{success, data, rowCount}`;
    /// `data` is the row set for reads and `{rowsAffected}` for mutations.
    pub async fn execute_resolved(
        &self,
        name: &QualifiedName,
        args: &Value,
    ) -> Result<Value, McpError> {
        let tool = self
            .store
            .get_tools_for_server(&name.server_id)
            .await?
            .into_iter()
            .find(|t| t.name == name.item_name)
            .ok_or_else(|| McpError::ToolNotFound {
                name: qualify(&name.server_id, &name.item_name),
            })?;
        let server = self.server(&name.server_id).await?;
        let dialect = server.source_config.dialect()?;

        let args = match args {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(McpError::InvalidParams(format!(
                    "arguments must be an object, got {other}"
                )));
            }
        };
        let statement = prepare_statement(
            dialect,
            &tool.sql_template,
            tool.parameters.as_deref(),
            &args,
            tool.operation,
            &tool.input_schema,
        );
        let connection = self.connection_for(&server, dialect).await?;

        let started = Instant::now();
        let result = if tool.operation.is_read() {
            let rows = connection.fetch_rows(&statement).await?;
            let count = rows.len();
            json!({ "success": true, "data": rows, "rowCount": count })
        } else {
            let affected = connection.execute(&statement).await?;
            json!({ "success": true, "data": { "rowsAffected": affected }, "rowCount": affected })
        };
        tracing::debug!(
            server_id = %name.server_id,
            tool = %name.item_name,
            operation = tool.operation.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Executed tool"
        );
        Ok(result)
    }

    /// Read the resource named `<serverId>__<resourceName>`.
    pub async fn read_resource(&self, name: &str) -> Result<Value, McpError> {
        let qualified = self.resolver.resolve(name).await?;
        self.read_resource_resolved(&qualified).await
    }

    /// Run a resource's query with no arguments and wrap the rows as
    /// resource contents.
    pub async fn read_resource_resolved(&self, name: &QualifiedName) -> Result<Value, McpError> {
        let qualified = qualify(&name.server_id, &name.item_name);
        let resource = self
            .store
            .get_resources_for_server(&name.server_id)
            .await?
            .into_iter()
            .find(|r| r.name == name.item_name)
            .ok_or_else(|| McpError::ResourceNotFound {
                name: qualified.clone(),
            })?;
        let server = self.server(&name.server_id).await?;
        let dialect = server.source_config.dialect()?;

        let statement = prepare_statement(
            dialect,
            &resource.sql_template,
            None,
            &Map::new(),
            Operation::Select,
            &Value::Null,
        );
        let connection = self.connection_for(&server, dialect).await?;
        let rows = connection.fetch_rows(&statement).await?;

        let result = ReadResourceResult {
            contents: vec![ResourceContent {
                uri: format!("{qualified}://list"),
                mime_type: "application/json".to_string(),
                text: serde_json::to_string_pretty(&rows)?,
            }],
        };
        Ok(serde_json::to_value(result)?)
    }

    /// Store counts plus the number of cached connections.
    pub async fn stats(&self) -> Result<Value, McpError> {
        let stats = self.store.get_stats().await?;
        let active = self.connections.lock().await.len();
        Ok(json!({
            "servers": stats.servers,
            "tools": stats.tools,
            "resources": stats.resources,
            "activeConnections": active,
        }))
    }

    /// Close every cached connection. Failures are logged, not returned.
    pub async fn close(&self) {
        let drained: Vec<(String, Arc<CachedConnection>)> =
            self.connections.lock().await.drain().collect();
        for (server_id, entry) in drained {
            close_logged(&server_id, &entry).await;
        }
    }

    /// Close connections idle for at least `max_idle`. Returns how many were closed.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let expired: Vec<(String, Arc<CachedConnection>)> = {
            let mut connections = self.connections.lock().await;
            let ids: Vec<String> = connections
                .iter()
                .filter(|(_, entry)| entry.idle_for() >= max_idle)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| connections.remove(&id).map(|entry| (id, entry)))
                .collect()
        };
        for (server_id, entry) in &expired {
            tracing::info!(server_id = %server_id, "Closing idle connection");
            close_logged(server_id, entry).await;
        }
        expired.len()
    }

    /// Periodically evict idle connections until the executor is dropped.
    pub fn spawn_idle_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = Duration::from_secs(self.config.reaper_interval_secs.max(1));
        let max_idle = Duration::from_secs(self.config.idle_timeout_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(executor) = weak.upgrade() else {
                    break;
                };
                executor.evict_idle(max_idle).await;
            }
        })
    }

    pub async fn active_connections(&self) -> usize {
        self.connections.lock().await.len()
    }

    async fn server(&self, server_id: &str) -> Result<ServerConfig, McpError> {
        self.store
            .get_server(server_id)
            .await?
            .ok_or_else(|| McpError::ServerNotFound {
                server_id: server_id.to_string(),
            })
    }

    /// The cached connection for `server`, opening one if needed. The map
    /// lock is never held while connecting or probing.
    async fn connection_for(
        &self,
        server: &ServerConfig,
        dialect: Dialect,
    ) -> Result<Arc<dyn Connection>, McpError> {
        let cached = self.connections.lock().await.get(&server.id).cloned();
        if let Some(entry) = cached {
            if entry.source != server.source_config || entry.dialect != dialect {
                tracing::info!(server_id = %server.id, "Source config changed, reconnecting");
                self.evict(&server.id, &entry).await;
            } else if !self.config.probe_before_reuse || entry.connection.ping().await.is_ok() {
                entry.touch();
                return Ok(entry.connection.clone());
            } else {
                tracing::warn!(server_id = %server.id, "Cached connection failed liveness probe, reconnecting");
                self.evict(&server.id, &entry).await;
            }
        }

        let connection = self
            .connector
            .connect(&server.id, &server.source_config, dialect)
            .await?;
        let fresh = Arc::new(CachedConnection::new(
            dialect,
            connection,
            server.source_config.clone(),
        ));

        let mut connections = self.connections.lock().await;
        if let Some(existing) = connections.get(&server.id)
            && existing.source == server.source_config
        {
            // Another call connected first; keep theirs.
            let existing = existing.clone();
            drop(connections);
            close_logged(&server.id, &fresh).await;
            existing.touch();
            return Ok(existing.connection.clone());
        }
        let replaced = connections.insert(server.id.clone(), fresh.clone());
        drop(connections);
        if let Some(stale) = replaced {
            close_logged(&server.id, &stale).await;
        }
        Ok(fresh.connection.clone())
    }

    async fn evict(&self, server_id: &str, stale: &Arc<CachedConnection>) {
        let removed = {
            let mut connections = self.connections.lock().await;
            match connections.get(server_id) {
                Some(current) if Arc::ptr_eq(current, stale) => connections.remove(server_id),
                _ => None,
            }
        };
        if let Some(entry) = removed {
            close_logged(server_id, &entry).await;
        }
    }
}

/// Decimal text as a JSON number when it fits an `f64`, else as a string.
fn numeric_to_json(text: &str) -> Value {
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(text.to_string()))
}

async fn close_logged(server_id: &str, entry: &CachedConnection) {
    match entry.connection.close().await {
        Ok(()) => tracing::debug!(server_id = %server_id, dialect = %entry.dialect, "Closed connection"),
        Err(e) => tracing::warn!(server_id = %server_id, error = %e, "Failed to close connection"),
    }
}
