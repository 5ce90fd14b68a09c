//! Generated schemas and SQL across dialects.

use std::sync::Arc;

use quarry_core::{DataStore, Dialect, IdentifierQuoting, MemoryStore, Operation, SourceConfig};
use quarry_mcp::statement::prepare_statement;
use quarry_mcp::{GenerateRequest, TableSample, ToolDefinitionGenerator};
use serde_json::{Map, json};

use super::common::*;

fn generator() -> ToolDefinitionGenerator {
    ToolDefinitionGenerator::new(Arc::new(MemoryStore::new()))
}

#[test]
fn test_generated_schemas_are_valid_json_schema() {
    let table = TableSample::new("people", people_rows());
    for dialect in Dialect::ALL {
        for tool in generator().generate_tools(SERVER_ID, &table, dialect) {
            assert!(
                jsonschema::meta::is_valid(&tool.input_schema),
                "{} has an invalid schema",
                tool.name
            );
        }
    }
}

#[test]
fn test_schemas_accept_and_reject_arguments() {
    let table = TableSample::new("people", people_rows());
    let tools = generator().generate_tools(SERVER_ID, &table, Dialect::Mssql);
    let schema_of = |name: &str| {
        let tool = tools.iter().find(|t| t.name == name).unwrap();
        jsonschema::validator_for(&tool.input_schema).unwrap()
    };

    let get = schema_of("get_people");
    assert!(get.is_valid(&json!({"filter_name": "Ada", "limit": 5})));
    assert!(!get.is_valid(&json!({"limit": "five"})));

    let delete = schema_of("delete_people");
    assert!(delete.is_valid(&json!({"id": 1})));
    assert!(delete.is_valid(&json!({"id": "a1"})));
    assert!(!delete.is_valid(&json!({})));
}

#[test]
fn test_native_quoting_per_dialect() {
    let table = TableSample::new("people", people_rows());
    let native = generator().with_quoting(IdentifierQuoting::Native);

    let mysql = native.generate_tools(SERVER_ID, &table, Dialect::Mysql);
    let count = mysql.iter().find(|t| t.name == "count_people").unwrap();
    assert!(count.sql_template.contains("FROM `people`"), "{}", count.sql_template);

    let pg = native.generate_tools(SERVER_ID, &table, Dialect::Postgresql);
    let count = pg.iter().find(|t| t.name == "count_people").unwrap();
    assert!(count.sql_template.contains("FROM \"people\""), "{}", count.sql_template);
}

#[test]
fn test_mysql_binds_one_value_per_placeholder() {
    let table = TableSample::new("people", people_rows());
    let tools = generator().generate_tools(SERVER_ID, &table, Dialect::Mysql);
    let get = tools.iter().find(|t| t.name == "get_people").unwrap();

    let args = json!({"filter_name": "Ada"});
    let statement = prepare_statement(
        Dialect::Mysql,
        &get.sql_template,
        get.parameters.as_deref(),
        args.as_object().unwrap(),
        Operation::Select,
        &get.input_schema,
    );
    assert_eq!(statement.sql.matches('?').count(), statement.bindings.len());
    assert!(!statement.sql.contains('@'));
}

#[test]
fn test_every_template_parameter_is_in_the_schema() {
    let table = TableSample::new("people", people_rows());
    for tool in generator().generate_tools(SERVER_ID, &table, Dialect::Postgresql) {
        let properties = tool.input_schema["properties"].as_object().cloned().unwrap_or_default();
        for param in tool.parameters.clone().unwrap_or_default() {
            assert!(properties.contains_key(&param), "{} lacks {param}", tool.name);
        }
    }
}

#[tokio::test]
async fn test_regeneration_replaces_tools() {
    let store = Arc::new(MemoryStore::new());
    let generator = ToolDefinitionGenerator::new(store.clone());
    let request = |tables: Vec<TableSample>| GenerateRequest {
        name: "crm".to_string(),
        owner_workspace: OWNER.to_string(),
        source: SourceConfig::new(Dialect::Mysql),
        tables,
    };

    let people = TableSample::new("people", people_rows());
    let first = generator.generate_server(request(vec![people])).await;
    assert!(first.success);

    let mut row = Map::new();
    row.insert("code".into(), json!("EU"));
    let second = generator
        .generate_server(request(vec![TableSample::new("regions", vec![row])]))
        .await;
    assert!(second.success);

    let tools = store.get_tools_for_server(SERVER_ID).await.unwrap();
    assert!(tools.iter().all(|t| t.name.ends_with("_regions")), "stale tools kept");
    assert_eq!(store.get_all_servers().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_database_type_fails_softly() {
    let generator = ToolDefinitionGenerator::new(Arc::new(MemoryStore::new()));
    let mut source = SourceConfig::new(Dialect::Mysql);
    source.db_type = "oracle".to_string();

    let outcome = generator
        .generate_server(GenerateRequest {
            name: "legacy".to_string(),
            owner_workspace: OWNER.to_string(),
            source,
            tables: vec![TableSample::new("people", people_rows())],
        })
        .await;
    assert!(!outcome.success);
    assert!(outcome.message.contains("oracle"));
    assert_eq!(outcome.tool_count, 0);
}
