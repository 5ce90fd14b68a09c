use std::sync::Arc;

use async_trait::async_trait;
use quarry_core::{Dialect, SourceConfig};
use serde_json::Value;

use super::{MssqlConnection, MysqlConnection, PostgresConnection};
use crate::error::McpError;
use crate::statement::PreparedStatement;

/// An open handle to one server's database.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Run a read and return each row as a JSON object.
    async fn fetch_rows(&self, statement: &PreparedStatement) -> Result<Vec<Value>, McpError>;

    /// Run a mutation and return the number of affected rows.
    async fn execute(&self, statement: &PreparedStatement) -> Result<u64, McpError>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), McpError>;

    async fn close(&self) -> Result<(), McpError>;
}

/// Opens connections. Production uses [`DriverConnector`]; tests substitute fakes.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        server_id: &str,
        source: &SourceConfig,
        dialect: Dialect,
    ) -> Result<Arc<dyn Connection>, McpError>;
}

/// Connects with the native driver for each dialect.
#[derive(Debug, Default, Clone, Copy)]
pub struct DriverConnector;

#[async_trait]
impl Connector for DriverConnector {
    async fn connect(
        &self,
        server_id: &str,
        source: &SourceConfig,
        dialect: Dialect,
    ) -> Result<Arc<dyn Connection>, McpError> {
        let connection: Arc<dyn Connection> = match dialect {
            Dialect::Postgresql => Arc::new(PostgresConnection::connect(source).await?),
            Dialect::Mysql => Arc::new(MysqlConnection::connect(source).await?),
            Dialect::Mssql => Arc::new(MssqlConnection::connect(source).await?),
        };
        tracing::info!(
            server_id = %server_id,
            dialect = %dialect,
            host = %source.host,
            database = %source.database,
            "Opened database connection"
        );
        Ok(connection)
    }
}
