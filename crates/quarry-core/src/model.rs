//! Persisted records and caller identity.
//!
//! Records are serialized in camelCase because the same shapes are written
//! to the JSON snapshot and returned over the admin surface.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SourceConfig;

/// Separator between a server id and an item name.
pub const SEPARATOR: &str = "__";

/// Wire name of `item` on `server_id`.
pub fn qualify(server_id: &str, item: &str) -> String {
    format!("{server_id}{SEPARATOR}{item}")
}

/// A generated virtual server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Globally unique, conventionally `<ownerWorkspace>__<serverName>`.
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub owner_workspace: String,
    pub source_config: SourceConfig,
    pub created_at: DateTime<Utc>,
}

impl ServerConfig {
    /// Owning workspace, falling back to the id's prefix for records written
    /// without an explicit owner.
    pub fn owner_scope(&self) -> &str {
        if !self.owner_workspace.is_empty() {
            return &self.owner_workspace;
        }
        match self.id.find(SEPARATOR) {
            Some(idx) if idx > 0 => &self.id[..idx],
            _ => &self.id,
        }
    }
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// SQL operation a tool performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn is_read(&self) -> bool {
        *self == Operation::Select
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Select => "SELECT",
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

/// A generated tool: one parameterized SQL statement plus its input schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub server_id: String,
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub sql_template: String,
    pub operation: Operation,
    /// Distinct `@name` tokens of `sql_template` in first-occurrence order.
    /// Absent on records persisted before parameters were captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<String>>,
}

/// A read-only listing exposed as an MCP resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    pub server_id: String,
    pub name: String,
    pub description: String,
    pub uri_template: String,
    pub sql_template: String,
}

/// Granularity of a default token policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyScope {
    Global,
    User,
    Server,
    Tool,
}

impl PolicyScope {
    /// Scope id of the single global policy record.
    pub const GLOBAL_ID: &'static str = "*";
}

/// Whether an MCP token is required at one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTokenPolicyRecord {
    pub scope_type: PolicyScope,
    pub scope_id: String,
    #[serde(alias = "requireMcpToken")]
    pub require_token: bool,
}

/// Legacy per-server token requirement, predating scoped policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerAuthConfig {
    pub server_id: String,
    #[serde(alias = "requireMcpToken")]
    pub require_token: bool,
}

/// Per-identifier override: `Some(true)` allows, `Some(false)` denies,
/// `None` inherits.
pub type TriStateRules = BTreeMap<String, Option<bool>>;

/// A stored MCP token grant. The raw token is never stored, only its hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTokenRecord {
    pub id: String,
    #[serde(default)]
    pub token_name: String,
    pub workspace_id: String,
    pub subject_username: String,
    #[serde(default)]
    pub created_by: String,
    pub token_hash: String,
    #[serde(default)]
    pub allow_all_servers: bool,
    #[serde(default)]
    pub allow_all_tools: bool,
    #[serde(default)]
    pub allow_all_resources: bool,
    #[serde(default)]
    pub server_ids: BTreeSet<String>,
    #[serde(default)]
    pub allowed_tools: BTreeSet<String>,
    #[serde(default)]
    pub allowed_resources: BTreeSet<String>,
    #[serde(default)]
    pub server_rules: TriStateRules,
    #[serde(default)]
    pub tool_rules: TriStateRules,
    #[serde(default)]
    pub resource_rules: TriStateRules,
    #[serde(default)]
    pub never_expires: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl McpTokenRecord {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Expired unless `never_expires`; a missing expiry on an expiring token
    /// counts as expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if self.never_expires {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => expires_at <= now,
            None => true,
        }
    }
}

/// Look up a tri-state rule, treating `null` the same as absent.
pub fn rule_for(rules: &TriStateRules, key: &str) -> Option<bool> {
    rules.get(key).copied().flatten()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
}

/// Who is calling, as resolved upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerIdentity {
    pub subject_id: String,
    pub workspace: String,
    #[serde(default)]
    pub role: Role,
}

impl CallerIdentity {
    /// Identity used when authentication is disabled: a workspace of one.
    pub fn default_admin(username: &str) -> Self {
        Self {
            subject_id: username.to_string(),
            workspace: username.to_string(),
            role: Role::Admin,
        }
    }
}

/// Counts reported by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub servers: usize,
    pub tools: usize,
    pub resources: usize,
}
