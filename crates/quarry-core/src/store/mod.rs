//! The persistence contract.
//!
//! Everything the generator writes and everything the executor, resolver and
//! policy engine read goes through [`DataStore`]. The backing engine is an
//! external concern; [`MemoryStore`] keeps records in memory and optionally
//! mirrors them to a JSON snapshot file.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::model::{
    McpTokenPolicyRecord, McpTokenRecord, PolicyScope, ResourceDefinition, ServerAuthConfig,
    ServerConfig, StoreStats, ToolDefinition,
};

pub use memory::MemoryStore;

/// Storage backend for servers, tools, resources, policies and tokens.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn get_all_servers(&self) -> Result<Vec<ServerConfig>, CoreError>;

    async fn get_server(&self, server_id: &str) -> Result<Option<ServerConfig>, CoreError>;

    async fn get_tools_for_server(
        &self,
        server_id: &str,
    ) -> Result<Vec<ToolDefinition>, CoreError>;

    async fn get_resources_for_server(
        &self,
        server_id: &str,
    ) -> Result<Vec<ResourceDefinition>, CoreError>;

    /// Legacy per-server token requirement.
    async fn get_server_auth_config(
        &self,
        server_id: &str,
    ) -> Result<Option<ServerAuthConfig>, CoreError>;

    async fn get_mcp_token_policy(
        &self,
        scope: PolicyScope,
        scope_id: &str,
    ) -> Result<Option<McpTokenPolicyRecord>, CoreError>;

    async fn get_mcp_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<McpTokenRecord>, CoreError>;

    /// Insert or replace a server by id.
    async fn save_server(&self, server: ServerConfig) -> Result<(), CoreError>;

    /// Insert tools, replacing any with the same `(server_id, name)`.
    async fn save_tools(&self, tools: Vec<ToolDefinition>) -> Result<(), CoreError>;

    /// Insert resources, replacing any with the same `(server_id, name)`.
    async fn save_resources(&self, resources: Vec<ResourceDefinition>) -> Result<(), CoreError>;

    /// Remove a server together with its tools, resources and legacy auth config.
    async fn delete_server(&self, server_id: &str) -> Result<(), CoreError>;

    async fn set_server_auth_config(&self, config: ServerAuthConfig) -> Result<(), CoreError>;

    /// Insert or replace the policy for `(scope_type, scope_id)`.
    async fn set_mcp_token_policy(&self, record: McpTokenPolicyRecord) -> Result<(), CoreError>;

    async fn create_mcp_token(&self, record: McpTokenRecord) -> Result<(), CoreError>;

    /// Mark a token revoked. Revoking an already-revoked token keeps the
    /// original `revoked_at`. Returns the stored record.
    async fn revoke_mcp_token(
        &self,
        token_id: &str,
        at: DateTime<Utc>,
    ) -> Result<McpTokenRecord, CoreError>;

    async fn get_stats(&self) -> Result<StoreStats, CoreError>;

    /// Flush and release the backing handle.
    async fn close(&self) -> Result<(), CoreError>;
}
