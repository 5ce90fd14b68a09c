//! In-memory store with an optional JSON snapshot.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DataStore;
use crate::error::CoreError;
use crate::model::{
    McpTokenPolicyRecord, McpTokenRecord, PolicyScope, ResourceDefinition, ServerAuthConfig,
    ServerConfig, StoreStats, ToolDefinition,
};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    #[serde(default)]
    servers: BTreeMap<String, ServerConfig>,
    #[serde(default)]
    tools: Vec<ToolDefinition>,
    #[serde(default)]
    resources: Vec<ResourceDefinition>,
    #[serde(default)]
    server_auth: BTreeMap<String, ServerAuthConfig>,
    #[serde(default)]
    policies: Vec<McpTokenPolicyRecord>,
    #[serde(default)]
    tokens: BTreeMap<String, McpTokenRecord>,
}

/// Records held behind a `RwLock`. When opened with a path, every mutation
/// rewrites the snapshot file.
pub struct MemoryStore {
    path: Option<PathBuf>,
    state: RwLock<Snapshot>,
}

impl MemoryStore {
    /// A store that lives only as long as the process.
    pub fn new() -> Self {
        Self {
            path: None,
            state: RwLock::new(Snapshot::default()),
        }
    }

    /// Open a store backed by `path`, loading it if the file exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref().to_path_buf();
        let snapshot = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Snapshot::default()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            Snapshot::default()
        };
        tracing::debug!(path = %path.display(), servers = snapshot.servers.len(), "opened store");
        Ok(Self {
            path: Some(path),
            state: RwLock::new(snapshot),
        })
    }

    fn read<R>(&self, f: impl FnOnce(&Snapshot) -> R) -> Result<R, CoreError> {
        let state = self
            .state
            .read()
            .map_err(|e| CoreError::store(format!("failed to acquire read lock: {e}")))?;
        Ok(f(&state))
    }

    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut Snapshot) -> Result<R, CoreError>,
    ) -> Result<R, CoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|e| CoreError::store(format!("failed to acquire write lock: {e}")))?;
        let result = f(&mut state)?;
        self.persist(&state)?;
        Ok(result)
    }

    fn persist(&self, snapshot: &Snapshot) -> Result<(), CoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(snapshot)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn get_all_servers(&self) -> Result<Vec<ServerConfig>, CoreError> {
        self.read(|s| s.servers.values().cloned().collect())
    }

    async fn get_server(&self, server_id: &str) -> Result<Option<ServerConfig>, CoreError> {
        self.read(|s| s.servers.get(server_id).cloned())
    }

    async fn get_tools_for_server(
        &self,
        server_id: &str,
    ) -> Result<Vec<ToolDefinition>, CoreError> {
        self.read(|s| {
            s.tools
                .iter()
                .filter(|t| t.server_id == server_id)
                .cloned()
                .collect()
        })
    }

    async fn get_resources_for_server(
        &self,
        server_id: &str,
    ) -> Result<Vec<ResourceDefinition>, CoreError> {
        self.read(|s| {
            s.resources
                .iter()
                .filter(|r| r.server_id == server_id)
                .cloned()
                .collect()
        })
    }

    async fn get_server_auth_config(
        &self,
        server_id: &str,
    ) -> Result<Option<ServerAuthConfig>, CoreError> {
        self.read(|s| s.server_auth.get(server_id).cloned())
    }

    async fn get_mcp_token_policy(
        &self,
        scope: PolicyScope,
        scope_id: &str,
    ) -> Result<Option<McpTokenPolicyRecord>, CoreError> {
        self.read(|s| {
            s.policies
                .iter()
                .find(|p| p.scope_type == scope && p.scope_id == scope_id)
                .cloned()
        })
    }

    async fn get_mcp_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<McpTokenRecord>, CoreError> {
        self.read(|s| {
            s.tokens
                .values()
                .find(|t| t.token_hash == token_hash)
                .cloned()
        })
    }

    async fn save_server(&self, server: ServerConfig) -> Result<(), CoreError> {
        self.mutate(|s| {
            s.servers.insert(server.id.clone(), server);
            Ok(())
        })
    }

    async fn save_tools(&self, tools: Vec<ToolDefinition>) -> Result<(), CoreError> {
        self.mutate(|s| {
            for tool in tools {
                s.tools
                    .retain(|t| !(t.server_id == tool.server_id && t.name == tool.name));
                s.tools.push(tool);
            }
            Ok(())
        })
    }

    async fn save_resources(&self, resources: Vec<ResourceDefinition>) -> Result<(), CoreError> {
        self.mutate(|s| {
            for resource in resources {
                s.resources
                    .retain(|r| !(r.server_id == resource.server_id && r.name == resource.name));
                s.resources.push(resource);
            }
            Ok(())
        })
    }

    async fn delete_server(&self, server_id: &str) -> Result<(), CoreError> {
        self.mutate(|s| {
            s.servers.remove(server_id);
            s.tools.retain(|t| t.server_id != server_id);
            s.resources.retain(|r| r.server_id != server_id);
            s.server_auth.remove(server_id);
            Ok(())
        })
    }

    async fn set_server_auth_config(&self, config: ServerAuthConfig) -> Result<(), CoreError> {
        self.mutate(|s| {
            s.server_auth.insert(config.server_id.clone(), config);
            Ok(())
        })
    }

    async fn set_mcp_token_policy(&self, record: McpTokenPolicyRecord) -> Result<(), CoreError> {
        self.mutate(|s| {
            s.policies
                .retain(|p| !(p.scope_type == record.scope_type && p.scope_id == record.scope_id));
            s.policies.push(record);
            Ok(())
        })
    }

    async fn create_mcp_token(&self, record: McpTokenRecord) -> Result<(), CoreError> {
        self.mutate(|s| {
            if s.tokens.values().any(|t| t.token_hash == record.token_hash) {
                return Err(CoreError::store(format!(
                    "token hash already registered for token {}",
                    record.id
                )));
            }
            s.tokens.insert(record.id.clone(), record);
            Ok(())
        })
    }

    async fn revoke_mcp_token(
        &self,
        token_id: &str,
        at: DateTime<Utc>,
    ) -> Result<McpTokenRecord, CoreError> {
        self.mutate(|s| {
            let record = s
                .tokens
                .get_mut(token_id)
                .ok_or_else(|| CoreError::TokenNotFound {
                    token_id: token_id.to_string(),
                })?;
            if record.revoked_at.is_none() {
                record.revoked_at = Some(at);
            }
            Ok(record.clone())
        })
    }

    async fn get_stats(&self) -> Result<StoreStats, CoreError> {
        self.read(|s| StoreStats {
            servers: s.servers.len(),
            tools: s.tools.len(),
            resources: s.resources.len(),
        })
    }

    async fn close(&self) -> Result<(), CoreError> {
        let state = self
            .state
            .read()
            .map_err(|e| CoreError::store(format!("failed to acquire read lock: {e}")))?;
        self.persist(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::dialect::Dialect;
    use crate::model::Operation;
    use chrono::Duration;
    use serde_json::json;

    fn server(id: &str) -> ServerConfig {
        ServerConfig {
            id: id.to_string(),
            name: id.to_string(),
            version: "1.0.0".to_string(),
            owner_workspace: "alice".to_string(),
            source_config: SourceConfig::new(Dialect::Mysql),
            created_at: Utc::now(),
        }
    }

    fn tool(server_id: &str, name: &str) -> ToolDefinition {
        ToolDefinition {
            server_id: server_id.to_string(),
            name: name.to_string(),
            description: String::new(),
            input_schema: json!({"type": "object"}),
            sql_template: "SELECT 1".to_string(),
            operation: Operation::Select,
            parameters: Some(vec![]),
        }
    }

    fn token(id: &str, hash: &str) -> McpTokenRecord {
        serde_json::from_value(json!({
            "id": id,
            "workspaceId": "alice",
            "subjectUsername": "alice",
            "tokenHash": hash,
            "neverExpires": true,
            "createdAt": Utc::now(),
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_save_tools_replaces_same_name() {
        let store = MemoryStore::new();
        store
            .save_tools(vec![tool("a__s", "get_x"), tool("a__s", "count_x")])
            .await
            .unwrap();
        let mut replacement = tool("a__s", "get_x");
        replacement.description = "updated".to_string();
        store.save_tools(vec![replacement]).await.unwrap();

        let tools = store.get_tools_for_server("a__s").await.unwrap();
        assert_eq!(tools.len(), 2);
        assert!(tools.iter().any(|t| t.name == "get_x" && t.description == "updated"));
    }

    #[tokio::test]
    async fn test_delete_server_cascades() {
        let store = MemoryStore::new();
        store.save_server(server("a__s")).await.unwrap();
        store.save_server(server("a__t")).await.unwrap();
        store
            .save_tools(vec![tool("a__s", "get_x"), tool("a__t", "get_y")])
            .await
            .unwrap();
        store
            .set_server_auth_config(ServerAuthConfig {
                server_id: "a__s".to_string(),
                require_token: false,
            })
            .await
            .unwrap();

        store.delete_server("a__s").await.unwrap();

        assert!(store.get_server("a__s").await.unwrap().is_none());
        assert!(store.get_tools_for_server("a__s").await.unwrap().is_empty());
        assert!(store.get_server_auth_config("a__s").await.unwrap().is_none());
        assert_eq!(store.get_tools_for_server("a__t").await.unwrap().len(), 1);
        assert_eq!(store.get_stats().await.unwrap().servers, 1);
    }

    #[tokio::test]
    async fn test_policy_upsert_keeps_one_record_per_scope() {
        let store = MemoryStore::new();
        for require in [true, false] {
            store
                .set_mcp_token_policy(McpTokenPolicyRecord {
                    scope_type: PolicyScope::Global,
                    scope_id: PolicyScope::GLOBAL_ID.to_string(),
                    require_token: require,
                })
                .await
                .unwrap();
        }
        let policy = store
            .get_mcp_token_policy(PolicyScope::Global, "*")
            .await
            .unwrap()
            .unwrap();
        assert!(!policy.require_token);
        assert!(
            store
                .get_mcp_token_policy(PolicyScope::User, "*")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_revocation_is_monotonic() {
        let store = MemoryStore::new();
        store.create_mcp_token(token("t1", "h1")).await.unwrap();

        let first = Utc::now();
        let revoked = store.revoke_mcp_token("t1", first).await.unwrap();
        assert_eq!(revoked.revoked_at, Some(first));

        let again = store
            .revoke_mcp_token("t1", first + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(again.revoked_at, Some(first));

        let by_hash = store.get_mcp_token_by_hash("h1").await.unwrap().unwrap();
        assert_eq!(by_hash.revoked_at, Some(first));
    }

    #[tokio::test]
    async fn test_revoke_unknown_token() {
        let store = MemoryStore::new();
        let err = store.revoke_mcp_token("missing", Utc::now()).await.unwrap_err();
        assert!(matches!(err, CoreError::TokenNotFound { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_token_hash_rejected() {
        let store = MemoryStore::new();
        store.create_mcp_token(token("t1", "same")).await.unwrap();
        assert!(store.create_mcp_token(token("t2", "same")).await.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");

        let store = MemoryStore::open(&path).unwrap();
        store.save_server(server("a__s")).await.unwrap();
        store.save_tools(vec![tool("a__s", "get_x")]).await.unwrap();
        store.close().await.unwrap();

        let reopened = MemoryStore::open(&path).unwrap();
        let stats = reopened.get_stats().await.unwrap();
        assert_eq!(stats.servers, 1);
        assert_eq!(stats.tools, 1);
        assert_eq!(
            reopened.get_server("a__s").await.unwrap().unwrap().owner_workspace,
            "alice"
        );
    }
}
