//! # quarry-core
//!
//! Shared building blocks for Quarry, a server that exposes stored,
//! parameterized SQL statements as MCP tools and resources.
//!
//! - [`model`]: persisted servers, tools, resources, token grants and policies
//! - [`dialect`]: per-engine SQL conventions
//! - [`resolver`]: mapping `<serverId>__<item>` names back to their server
//! - [`store`]: the persistence contract and an in-memory implementation
//! - [`config`]: `quarry.yaml` and per-server connection settings

// Configuration types shared across all Quarry crates
pub mod config;
pub mod dialect;
pub mod error;
pub mod model;
pub mod resolver;
pub mod store;

pub use config::{QuarryConfig, SourceConfig};
pub use dialect::{Dialect, IdentifierQuoting, ParamStyle};
pub use error::CoreError;
pub use model::{
    CallerIdentity, McpTokenPolicyRecord, McpTokenRecord, Operation, PolicyScope,
    ResourceDefinition, Role, SEPARATOR, ServerAuthConfig, ServerConfig, StoreStats,
    ToolDefinition, TriStateRules, qualify,
};
pub use resolver::{QualifiedName, QualifiedNameResolver, resolve_qualified_name};
pub use store::{DataStore, MemoryStore};
