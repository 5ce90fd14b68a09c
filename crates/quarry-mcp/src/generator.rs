//! Table-driven tool generation.
//!
//! Given a table name and a few sample rows, the generator infers the
//! table's columns and emits one tool per enabled operation, each with a
//! JSON input schema and a parameterized SQL template.
//!
//! ## Generated tools
//!
//! | Tool | Generated when | SQL |
//! |------|----------------|-----|
//! | `get_<table>` | always | filtered, ordered, paginated `SELECT` |
//! | `create_<table>` | table has a non-`id` column | `INSERT` of every non-`id` column |
//! | `update_<table>` | table has an `id` column and another column | `UPDATE ... WHERE id = @id` |
//! | `delete_<table>` | table has an `id` column | `DELETE ... WHERE id = @id` |
//! | `count_<table>` | always | filtered `SELECT COUNT(*)` |
//! | `min_/max_/sum_/avg_<table>_<col>` | per numeric column | filtered aggregate |
//!
//! Each table also gets a `<table>_list` resource: an unfiltered `SELECT`.

use std::sync::Arc;

use chrono::Utc;
use quarry_core::{
    DataStore, Dialect, IdentifierQuoting, Operation, ResourceDefinition, ServerConfig,
    SourceConfig, ToolDefinition, qualify,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::McpError;
use crate::introspect::{Column, analyze_columns, sanitize_name};
use crate::statement::scan_parameters;

/// Which tools to emit for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableToggles {
    #[serde(default = "enabled")]
    pub get: bool,
    #[serde(default = "enabled")]
    pub create: bool,
    #[serde(default = "enabled")]
    pub update: bool,
    #[serde(default = "enabled")]
    pub delete: bool,
    #[serde(default = "enabled")]
    pub count: bool,
    #[serde(default = "enabled")]
    pub aggregates: bool,
}

impl Default for TableToggles {
    fn default() -> Self {
        Self {
            get: true,
            create: true,
            update: true,
            delete: true,
            count: true,
            aggregates: true,
        }
    }
}

fn enabled() -> bool {
    true
}

/// Sample rows for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSample {
    pub name: String,
    pub rows: Vec<Map<String, Value>>,
    #[serde(default)]
    pub toggles: TableToggles,
}

impl TableSample {
    pub fn new(name: impl Into<String>, rows: Vec<Map<String, Value>>) -> Self {
        Self {
            name: name.into(),
            rows,
            toggles: TableToggles::default(),
        }
    }
}

/// Everything needed to generate one server.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub name: String,
    pub owner_workspace: String,
    pub source: SourceConfig,
    pub tables: Vec<TableSample>,
}

/// Result of [`ToolDefinitionGenerator::generate_server`]. Failures are
/// reported here rather than returned as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    pub tool_count: usize,
    pub resource_count: usize,
}

impl GenerationOutcome {
    fn failure(message: String) -> Self {
        Self {
            success: false,
            message,
            server_id: None,
            tool_count: 0,
            resource_count: 0,
        }
    }
}

pub struct ToolDefinitionGenerator {
    store: Arc<dyn DataStore>,
    quoting: IdentifierQuoting,
}

impl ToolDefinitionGenerator {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self {
            store,
            quoting: IdentifierQuoting::default(),
        }
    }

    pub fn with_quoting(mut self, quoting: IdentifierQuoting) -> Self {
        self.quoting = quoting;
        self
    }

    /// Generate, persist and report on one server. A server with the same id
    /// is replaced along with its tools and resources.
    pub async fn generate_server(&self, request: GenerateRequest) -> GenerationOutcome {
        let dialect = match request.source.dialect() {
            Ok(d) => d,
            Err(e) => return GenerationOutcome::failure(format!("Failed to generate server: {e}")),
        };
        let clean_name = sanitize_name(&request.name);
        if clean_name.is_empty() {
            return GenerationOutcome::failure(format!(
                "Failed to generate server: invalid server name '{}'",
                request.name
            ));
        }
        let server_id = if request.owner_workspace.is_empty() {
            clean_name
        } else {
            qualify(&request.owner_workspace, &clean_name)
        };

        let mut tools = Vec::new();
        let mut resources = Vec::new();
        for table in &request.tables {
            tools.extend(self.generate_tools(&server_id, table, dialect));
            resources.extend(self.generate_resources(&server_id, table, dialect));
        }

        let server = ServerConfig {
            id: server_id.clone(),
            name: request.name.clone(),
            version: "1.0.0".to_string(),
            owner_workspace: request.owner_workspace.clone(),
            source_config: request.source.clone(),
            created_at: Utc::now(),
        };
        let tool_count = tools.len();
        let resource_count = resources.len();

        match self.persist(server, tools, resources).await {
            Ok(()) => {
                tracing::info!(
                    server_id = %server_id,
                    dialect = %dialect,
                    tools = tool_count,
                    resources = resource_count,
                    "Generated server"
                );
                GenerationOutcome {
                    success: true,
                    message: format!(
                        "Server '{server_id}' generated with {tool_count} tools and {resource_count} resources"
                    ),
                    server_id: Some(server_id),
                    tool_count,
                    resource_count,
                }
            }
            Err(e) => {
                tracing::error!(server_id = %server_id, error = %e, "Server generation failed");
                GenerationOutcome::failure(format!("Failed to generate server: {e}"))
            }
        }
    }

    async fn persist(
        &self,
        server: ServerConfig,
        tools: Vec<ToolDefinition>,
        resources: Vec<ResourceDefinition>,
    ) -> Result<(), McpError> {
        if self.store.get_server(&server.id).await?.is_some() {
            tracing::debug!(server_id = %server.id, "Replacing existing server");
            self.store.delete_server(&server.id).await?;
        }
        self.store.save_server(server).await?;
        self.store.save_tools(tools).await?;
        self.store.save_resources(resources).await?;
        Ok(())
    }

    /// Tools for one table. Tables without sample rows produce none.
    pub fn generate_tools(
        &self,
        server_id: &str,
        table: &TableSample,
        dialect: Dialect,
    ) -> Vec<ToolDefinition> {
        if table.rows.is_empty() {
            return Vec::new();
        }
        let columns = analyze_columns(&table.rows);
        let sql = TableSql::new(dialect, self.quoting, &table.name, &columns);
        let clean = sanitize_name(&table.name);
        let toggles = table.toggles;
        let mut tools = Vec::new();

        let mut push = |name: String,
                        description: String,
                        input_schema: Value,
                        sql_template: String,
                        operation: Operation| {
            tools.push(ToolDefinition {
                server_id: server_id.to_string(),
                name,
                description,
                input_schema,
                parameters: Some(scan_parameters(&sql_template)),
                sql_template,
                operation,
            });
        };

        if toggles.get {
            let mut properties = Map::new();
            properties.insert(
                "limit".into(),
                json!({
                    "type": "number",
                    "description": "Maximum number of records to return",
                    "default": 100,
                    "minimum": 1,
                    "maximum": 1000
                }),
            );
            properties.insert(
                "offset".into(),
                json!({
                    "type": "number",
                    "description": "Number of records to skip",
                    "default": 0,
                    "minimum": 0
                }),
            );
            properties.extend(filter_properties(&columns));
            push(
                format!("get_{clean}"),
                format!("Get records from {} table", table.name),
                object_schema(properties, Vec::new()),
                sql.select_page(),
                Operation::Select,
            );
        }

        let id_column = columns.iter().find(|c| c.is_id());
        let data_columns: Vec<&Column> = columns.iter().filter(|c| !c.is_id()).collect();

        if toggles.create && !data_columns.is_empty() {
            let required = data_columns
                .iter()
                .filter(|c| !c.nullable)
                .map(|c| Value::String(c.param_name()))
                .collect();
            push(
                format!("create_{clean}"),
                format!("Create a new record in {} table", table.name),
                object_schema(input_properties(&data_columns), required),
                sql.insert(&data_columns),
                Operation::Insert,
            );
        }

        if let Some(id) = id_column {
            if toggles.update && !data_columns.is_empty() {
                let mut properties = Map::new();
                properties.insert("id".into(), id_property("update"));
                properties.extend(input_properties(&data_columns));
                push(
                    format!("update_{clean}"),
                    format!("Update a record in {} table", table.name),
                    object_schema(properties, vec![json!("id")]),
                    sql.update(id, &data_columns),
                    Operation::Update,
                );
            }
            if toggles.delete {
                let mut properties = Map::new();
                properties.insert("id".into(), id_property("delete"));
                push(
                    format!("delete_{clean}"),
                    format!("Delete a record from {} table", table.name),
                    object_schema(properties, vec![json!("id")]),
                    sql.delete(id),
                    Operation::Delete,
                );
            }
        }

        if toggles.count {
            push(
                format!("count_{clean}"),
                format!("Count records in {} table", table.name),
                object_schema(filter_properties(&columns), Vec::new()),
                sql.count(),
                Operation::Select,
            );
        }

        if toggles.aggregates {
            for column in columns.iter().filter(|c| c.column_type.is_numeric()) {
                let column_clean = sanitize_name(&column.name);
                for aggregate in Aggregate::ALL {
                    push(
                        format!("{}_{clean}_{column_clean}", aggregate.prefix()),
                        format!(
                            "{} of {} in {} table",
                            aggregate.label(),
                            column.name,
                            table.name
                        ),
                        object_schema(filter_properties(&columns), Vec::new()),
                        sql.aggregate(aggregate, column),
                        Operation::Select,
                    );
                }
            }
        }

        tracing::debug!(
            server_id = %server_id,
            table = %table.name,
            tools = ?tools.iter().map(|t| &t.name).collect::<Vec<_>>(),
            "Generated tools"
        );
        tools
    }

    pub fn generate_resources(
        &self,
        server_id: &str,
        table: &TableSample,
        dialect: Dialect,
    ) -> Vec<ResourceDefinition> {
        if table.rows.is_empty() {
            return Vec::new();
        }
        let columns = analyze_columns(&table.rows);
        let clean = sanitize_name(&table.name);
        vec![ResourceDefinition {
            server_id: server_id.to_string(),
            name: format!("{clean}_list"),
            description: format!("List all records from {} table", table.name),
            uri_template: format!("{clean}://list"),
            sql_template: TableSql::new(dialect, self.quoting, &table.name, &columns).select_all(),
        }]
    }
}

#[derive(Debug, Clone, Copy)]
enum Aggregate {
    Min,
    Max,
    Sum,
    Avg,
}

impl Aggregate {
    const ALL: [Aggregate; 4] = [Aggregate::Min, Aggregate::Max, Aggregate::Sum, Aggregate::Avg];

    fn prefix(&self) -> &'static str {
        match self {
            Aggregate::Min => "min",
            Aggregate::Max => "max",
            Aggregate::Sum => "sum",
            Aggregate::Avg => "avg",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Aggregate::Min => "Minimum",
            Aggregate::Max => "Maximum",
            Aggregate::Sum => "Sum",
            Aggregate::Avg => "Average",
        }
    }
}

fn object_schema(properties: Map<String, Value>, required: Vec<Value>) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

fn filter_properties(columns: &[Column]) -> Map<String, Value> {
    columns
        .iter()
        .map(|c| {
            (
                format!("filter_{}", c.param_name()),
                json!({
                    "type": c.column_type.schema_type(),
                    "description": format!("Filter by {}", c.name)
                }),
            )
        })
        .collect()
}

fn input_properties(columns: &[&Column]) -> Map<String, Value> {
    columns
        .iter()
        .map(|c| {
            let ty = c.column_type.schema_type();
            let ty = if c.nullable { json!([ty, "null"]) } else { json!(ty) };
            (
                c.param_name(),
                json!({
                    "type": ty,
                    "description": format!("{} field", c.name)
                }),
            )
        })
        .collect()
}

fn id_property(verb: &str) -> Value {
    json!({
        "type": ["string", "number"],
        "description": format!("ID of the record to {verb}")
    })
}

/// SQL text for one table in one dialect.
struct TableSql<'a> {
    dialect: Dialect,
    quoting: IdentifierQuoting,
    table: String,
    columns: &'a [Column],
}

impl<'a> TableSql<'a> {
    fn new(dialect: Dialect, quoting: IdentifierQuoting, table: &str, columns: &'a [Column]) -> Self {
        Self {
            dialect,
            quoting,
            table: dialect.quote_with(table, quoting),
            columns,
        }
    }

    fn quote(&self, ident: &str) -> String {
        self.dialect.quote_with(ident, self.quoting)
    }

    fn select_list(&self) -> String {
        if self.columns.is_empty() {
            return "*".to_string();
        }
        self.columns
            .iter()
            .map(|c| self.quote(&c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// ` WHERE (...) AND (...)`, or empty for a table without columns.
    fn filter_clause(&self) -> String {
        if self.columns.is_empty() {
            return String::new();
        }
        let predicates = self
            .columns
            .iter()
            .map(|c| {
                let param = format!("@filter_{}", c.param_name());
                format!("({param} IS NULL OR {} = {param})", self.quote(&c.name))
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        format!(" WHERE {predicates}")
    }

    /// `id`, else the first column mentioning `created`, else `timestamp`,
    /// else the first column.
    fn order_by(&self) -> String {
        let lower = |c: &&Column| c.name.to_ascii_lowercase();
        let preferred = self
            .columns
            .iter()
            .find(|c| c.is_id())
            .or_else(|| self.columns.iter().find(|c| lower(c).contains("created")))
            .or_else(|| self.columns.iter().find(|c| lower(c).contains("timestamp")))
            .or_else(|| self.columns.first());
        match preferred {
            Some(c) => self.quote(&c.name),
            None => "(SELECT NULL)".to_string(),
        }
    }

    fn select_page(&self) -> String {
        format!(
            "SELECT {} FROM {}{} ORDER BY {} {}",
            self.select_list(),
            self.table,
            self.filter_clause(),
            self.order_by(),
            self.dialect.pagination_clause()
        )
    }

    fn select_all(&self) -> String {
        format!("SELECT {} FROM {}", self.select_list(), self.table)
    }

    fn count(&self) -> String {
        format!(
            "SELECT COUNT(*) AS {} FROM {}{}",
            self.quote("count"),
            self.table,
            self.filter_clause()
        )
    }

    fn aggregate(&self, aggregate: Aggregate, column: &Column) -> String {
        let col = self.quote(&column.name);
        let expr = match aggregate {
            Aggregate::Min => format!("MIN({col})"),
            Aggregate::Max => format!("MAX({col})"),
            Aggregate::Sum => format!("SUM({col})"),
            Aggregate::Avg => format!("AVG(CAST({col} AS {}))", float_type(self.dialect)),
        };
        format!(
            "SELECT {expr} AS {} FROM {}{}",
            self.quote("value"),
            self.table,
            self.filter_clause()
        )
    }

    fn insert(&self, columns: &[&Column]) -> String {
        let names = columns
            .iter()
            .map(|c| self.quote(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let params = columns
            .iter()
            .map(|c| format!("@{}", c.param_name()))
            .collect::<Vec<_>>()
            .join(", ");
        format!("INSERT INTO {} ({names}) VALUES ({params})", self.table)
    }

    fn update(&self, id: &Column, columns: &[&Column]) -> String {
        let set = columns
            .iter()
            .map(|c| format!("{} = @{}", self.quote(&c.name), c.param_name()))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "UPDATE {} SET {set} WHERE {} = @id",
            self.table,
            self.quote(&id.name)
        )
    }

    fn delete(&self, id: &Column) -> String {
        format!("DELETE FROM {} WHERE {} = @id", self.table, self.quote(&id.name))
    }
}

fn float_type(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Mssql => "FLOAT",
        Dialect::Mysql => "DOUBLE",
        Dialect::Postgresql => "DOUBLE PRECISION",
    }
}
