//! SQL Server through a single tiberius client.
//!
//! tiberius has no pool; the client is held behind a mutex, so queries on
//! the same server run one at a time.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use quarry_core::SourceConfig;
use serde_json::{Map, Value, json};
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql, Query, Row};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use super::connection::Connection;
use super::numeric_to_json;
use crate::error::McpError;
use crate::statement::{BindValue, ParamKind, PreparedStatement};

type MssqlClient = Client<Compat<TcpStream>>;

pub struct MssqlConnection {
    client: Mutex<Option<MssqlClient>>,
}

impl MssqlConnection {
    pub async fn connect(source: &SourceConfig) -> Result<Self, McpError> {
        let mut config = Config::new();
        config.host(&source.host);
        config.port(source.port_or_default()?);
        if !source.database.is_empty() {
            config.database(&source.database);
        }
        config.authentication(AuthMethod::sql_server(
            &source.username,
            source.resolve_password().unwrap_or_default(),
        ));
        config.encryption(if source.encrypt {
            EncryptionLevel::Required
        } else {
            EncryptionLevel::Off
        });
        if source.trust_server_certificate {
            config.trust_cert();
        }

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| McpError::ConnectionFailure(e.to_string()))?;
        tcp.set_nodelay(true)?;
        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| McpError::ConnectionFailure(e.to_string()))?;
        Ok(Self {
            client: Mutex::new(Some(client)),
        })
    }
}

#[async_trait]
impl Connection for MssqlConnection {
    async fn fetch_rows(&self, statement: &PreparedStatement) -> Result<Vec<Value>, McpError> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or_else(closed)?;
        let rows = build_query(statement)
            .query(client)
            .await
            .map_err(query_error)?
            .into_first_result()
            .await
            .map_err(query_error)?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn execute(&self, statement: &PreparedStatement) -> Result<u64, McpError> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or_else(closed)?;
        let result = build_query(statement)
            .execute(client)
            .await
            .map_err(query_error)?;
        Ok(result.total())
    }

    async fn ping(&self) -> Result<(), McpError> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or_else(closed)?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| McpError::ConnectionFailure(e.to_string()))?
            .into_results()
            .await
            .map(|_| ())
            .map_err(|e| McpError::ConnectionFailure(e.to_string()))
    }

    async fn close(&self) -> Result<(), McpError> {
        if let Some(client) = self.client.lock().await.take() {
            client
                .close()
                .await
                .map_err(|e| McpError::ConnectionFailure(e.to_string()))?;
        }
        Ok(())
    }
}

fn closed() -> McpError {
    McpError::ConnectionFailure("connection closed".to_string())
}

fn query_error(e: tiberius::error::Error) -> McpError {
    McpError::QueryExecutionFailure(e.to_string())
}

/// Placeholders are already `@P1..@Pn`; bind in order.
fn build_query(statement: &PreparedStatement) -> Query<'static> {
    let mut query = Query::new(statement.sql.clone());
    for value in &statement.bindings {
        match value.clone() {
            BindValue::Null(ParamKind::Text) => query.bind(None::<String>),
            BindValue::Null(ParamKind::Integer) => query.bind(None::<i64>),
            BindValue::Null(ParamKind::Number) => query.bind(None::<f64>),
            BindValue::Null(ParamKind::Boolean) => query.bind(None::<bool>),
            BindValue::Bool(b) => query.bind(b),
            BindValue::Int(i) => query.bind(i),
            BindValue::Float(f) => query.bind(f),
            BindValue::Text(s) => query.bind(s),
        }
    }
    query
}

fn row_to_json(row: &Row) -> Value {
    let mut obj = Map::new();
    for (column, data) in row.cells() {
        obj.insert(column.name().to_string(), decode_cell(data));
    }
    Value::Object(obj)
}

fn decode_cell(data: &ColumnData<'static>) -> Value {
    match data {
        ColumnData::U8(v) => json!(v),
        ColumnData::I16(v) => json!(v),
        ColumnData::I32(v) => json!(v),
        ColumnData::I64(v) => json!(v),
        ColumnData::F32(v) => json!(v),
        ColumnData::F64(v) => json!(v),
        ColumnData::Bit(v) => json!(v),
        ColumnData::String(v) => json!(v.as_deref()),
        ColumnData::Guid(v) => json!(v.map(|g| g.to_string())),
        ColumnData::Numeric(v) => v
            .map(|n| numeric_to_json(&n.to_string()))
            .unwrap_or(Value::Null),
        ColumnData::Binary(v) => json!(v.as_deref().map(String::from_utf8_lossy)),
        ColumnData::Xml(v) => json!(v.as_ref().map(|x| x.clone().into_owned().into_string())),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            from_sql::<NaiveDateTime>(data)
        }
        ColumnData::Date(_) => from_sql::<NaiveDate>(data),
        ColumnData::Time(_) => from_sql::<NaiveTime>(data),
        ColumnData::DateTimeOffset(_) => from_sql::<DateTime<FixedOffset>>(data),
    }
}

fn from_sql<'a, T>(data: &'a ColumnData<'static>) -> Value
where
    T: FromSql<'a> + serde::Serialize,
{
    match T::from_sql(data) {
        Ok(Some(v)) => json!(v),
        _ => Value::Null,
    }
}
