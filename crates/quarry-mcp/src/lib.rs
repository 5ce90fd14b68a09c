//! # quarry-mcp
//!
//! Turns sampled database tables into MCP tools and serves them.
//!
//! - **Generation**: [`ToolDefinitionGenerator`] infers column types from
//!   sample rows and synthesizes per-table `get_`, `create_`, `update_`,
//!   `delete_`, `count_` and aggregate tools plus a list resource, with SQL
//!   written for the server's dialect.
//! - **Execution**: [`DynamicExecutor`] binds call arguments into the stored
//!   SQL and runs it on a cached per-server connection (sqlx for PostgreSQL
//!   and MySQL, tiberius for SQL Server).
//! - **Protocol**: [`McpServer`] dispatches JSON-RPC messages and filters
//!   listings through the authorization engine.
//! - **Carriers**: stdio, SSE + POST, and session HTTP streaming.
//!
//! ## Architecture
//!
//! ```text
//! MCP client
//!       │
//!       │ JSON-RPC (stdio | SSE + POST | HTTP sessions)
//!       ▼
//! ┌──────────────────────┐
//! │  McpServer           │
//! │  1. Resolve name     │  ← quarry-core resolver
//! │  2. Authorize        │  ← quarry-auth
//! │  3. Bind arguments   │  ← statement
//! │  4. Execute          │  ← executor (per dialect)
//! │  5. Return JSON text │
//! └──────────┬───────────┘
//!            ▼
//!   SQL Server / MySQL / PostgreSQL
//! ```

pub mod error;
pub mod executor;
pub mod generator;
pub mod introspect;
pub mod protocol;
pub mod server;
pub mod statement;
pub mod transport;

use std::sync::Arc;

use quarry_core::config::Transport;

pub use error::McpError;
pub use executor::{Connection, Connector, DriverConnector, DynamicExecutor};
pub use generator::{
    GenerateRequest, GenerationOutcome, TableSample, TableToggles, ToolDefinitionGenerator,
};
pub use protocol::{JsonRpcRequest, JsonRpcResponse};
pub use server::{McpServer, Session, SessionState};

/// Run the carrier selected by the server's config until it stops.
pub async fn serve(server: Arc<McpServer>) -> Result<(), McpError> {
    match server.config().transport {
        Transport::Stdio => {
            let ctx = server.stdio_context();
            transport::stdio::run_stdio(server, ctx).await
        }
        Transport::Sse => transport::sse::run_sse(server).await,
        Transport::Http => transport::streamable_http::run_http(server).await,
    }
}
