//! MySQL through a sqlx pool.

use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use quarry_core::SourceConfig;
use serde_json::{Map, Value, json};
use sqlx::mysql::{MySqlArguments, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, MySql, Row, ValueRef};

use super::connection::Connection;
use super::numeric_to_json;
use crate::error::McpError;
use crate::statement::{BindValue, ParamKind, PreparedStatement};

pub struct MysqlConnection {
    pool: MySqlPool,
}

impl MysqlConnection {
    pub async fn connect(source: &SourceConfig) -> Result<Self, McpError> {
        let url = source.connection_url()?;
        let pool_config = source.pool_or_default();
        let pool = MySqlPoolOptions::new()
            .max_connections(pool_config.max_connections)
            .acquire_timeout(Duration::from_secs(pool_config.acquire_timeout_seconds.into()))
            .idle_timeout(Duration::from_secs(pool_config.idle_timeout_seconds.into()))
            .connect(&url)
            .await
            .map_err(|e| McpError::ConnectionFailure(e.to_string()))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Connection for MysqlConnection {
    async fn fetch_rows(&self, statement: &PreparedStatement) -> Result<Vec<Value>, McpError> {
        let rows = bind_all(sqlx::query(&statement.sql), &statement.bindings)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| McpError::QueryExecutionFailure(e.to_string()))?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn execute(&self, statement: &PreparedStatement) -> Result<u64, McpError> {
        let result = bind_all(sqlx::query(&statement.sql), &statement.bindings)
            .execute(&self.pool)
            .await
            .map_err(|e| McpError::QueryExecutionFailure(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), McpError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| McpError::ConnectionFailure(e.to_string()))
    }

    async fn close(&self) -> Result<(), McpError> {
        self.pool.close().await;
        Ok(())
    }
}

fn bind_all<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    bindings: &[BindValue],
) -> Query<'q, MySql, MySqlArguments> {
    for value in bindings {
        query = match value.clone() {
            BindValue::Null(ParamKind::Text) => query.bind(None::<String>),
            BindValue::Null(ParamKind::Integer) => query.bind(None::<i64>),
            BindValue::Null(ParamKind::Number) => query.bind(None::<f64>),
            BindValue::Null(ParamKind::Boolean) => query.bind(None::<bool>),
            BindValue::Bool(b) => query.bind(b),
            BindValue::Int(i) => query.bind(i),
            BindValue::Float(f) => query.bind(f),
            BindValue::Text(s) => query.bind(s),
        };
    }
    query
}

fn row_to_json(row: &MySqlRow) -> Value {
    let mut obj = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        obj.insert(column.name().to_string(), decode_column(row, idx));
    }
    Value::Object(obj)
}

fn decode_column(row: &MySqlRow, idx: usize) -> Value {
    match row.try_get_raw(idx) {
        Ok(raw) if !raw.is_null() => {}
        _ => return Value::Null,
    }

    // Integers come before bool: TINYINT(1) decodes as either.
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        json!(v)
    } else if let Ok(v) = row.try_get::<u64, _>(idx) {
        json!(v)
    } else if let Ok(v) = row.try_get::<f64, _>(idx) {
        json!(v)
    } else if let Ok(v) = row.try_get::<f32, _>(idx) {
        json!(v)
    } else if let Ok(v) = row.try_get::<BigDecimal, _>(idx) {
        numeric_to_json(&v.to_string())
    } else if let Ok(v) = row.try_get::<bool, _>(idx) {
        json!(v)
    } else if let Ok(v) = row.try_get::<String, _>(idx) {
        json!(v)
    } else if let Ok(v) = row.try_get::<DateTime<Utc>, _>(idx) {
        json!(v)
    } else if let Ok(v) = row.try_get::<NaiveDateTime, _>(idx) {
        json!(v)
    } else if let Ok(v) = row.try_get::<NaiveDate, _>(idx) {
        json!(v)
    } else if let Ok(v) = row.try_get::<NaiveTime, _>(idx) {
        json!(v)
    } else if let Ok(v) = row.try_get::<Value, _>(idx) {
        v
    } else if let Ok(v) = row.try_get::<Vec<u8>, _>(idx) {
        json!(String::from_utf8_lossy(&v))
    } else {
        Value::Null
    }
}
