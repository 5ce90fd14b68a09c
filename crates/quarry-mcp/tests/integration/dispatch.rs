//! Listing, calling and reading through the dispatcher with auth disabled.

use super::common::*;
use quarry_core::Dialect;
use quarry_mcp::statement::BindValue;
use serde_json::json;

// =============================================================================
// LISTINGS
// =============================================================================

#[tokio::test]
async fn test_tools_are_listed_with_qualified_names() {
    let ctx = TestContext::setup().await;
    let server = ctx.open_server();
    let caller = server.context_for(None);

    let response = request(&server, &caller, "tools/list", None).await;
    let names = listed_names(&response, "tools");

    for expected in ["get_people", "create_people", "update_people", "delete_people", "count_people"] {
        assert!(names.contains(&qualified(expected)), "missing {expected}");
    }
    let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
    for tool in &tools {
        assert!(tool["name"].as_str().unwrap().starts_with("acme__crm__"));
        assert!(tool["description"].as_str().unwrap().starts_with("[acme__crm] "));
        assert_eq!(tool["inputSchema"]["type"], "object");
    }
}

#[tokio::test]
async fn test_resources_are_listed_with_list_uri() {
    let ctx = TestContext::setup().await;
    let server = ctx.open_server();
    let caller = server.context_for(None);

    let response = request(&server, &caller, "resources/list", None).await;
    let resources = response.result.unwrap()["resources"].clone();
    assert_eq!(resources.as_array().unwrap().len(), 1);
    assert_eq!(resources[0]["name"], "acme__crm__people_list");
    assert_eq!(resources[0]["uri"], "acme__crm__people_list://list");
}

// =============================================================================
// TOOL CALLS
// =============================================================================

#[tokio::test]
async fn test_get_without_filters_drops_where_clause() {
    let ctx = TestContext::setup().await;
    let server = ctx.open_server();
    let caller = server.context_for(None);

    let response = call_tool(&server, &caller, &qualified("get_people"), json!({})).await;
    let payload = tool_payload(&response);
    assert_eq!(payload["success"], true);
    assert_eq!(payload["rowCount"], 3);
    assert_eq!(payload["data"][0]["name"], "Ada");

    let statement = ctx.recorded.last();
    assert!(!statement.sql.contains("WHERE"), "{}", statement.sql);
    assert!(statement.sql.contains("OFFSET @P"));
    let tail = &statement.bindings[statement.bindings.len() - 2..];
    assert_eq!(tail, &[BindValue::Int(0), BindValue::Int(100)]);
}

#[tokio::test]
async fn test_get_with_filter_keeps_where_clause() {
    let ctx = TestContext::setup().await;
    let server = ctx.open_server();
    let caller = server.context_for(None);

    call_tool(
        &server,
        &caller,
        &qualified("get_people"),
        json!({"filter_name": "Ada", "limit": 10}),
    )
    .await;

    let statement = ctx.recorded.last();
    assert!(statement.sql.contains("WHERE (@P1 IS NULL OR"), "{}", statement.sql);
    assert!(statement.bindings.contains(&BindValue::Text("Ada".to_string())));
    assert!(statement.bindings.contains(&BindValue::Int(10)));
}

#[tokio::test]
async fn test_mutation_reports_rows_affected() {
    let ctx = TestContext::setup().await;
    let server = ctx.open_server();
    let caller = server.context_for(None);

    let response = call_tool(&server, &caller, &qualified("delete_people"), json!({"id": 2})).await;
    let payload = tool_payload(&response);
    assert_eq!(payload["data"]["rowsAffected"], 1);
    assert_eq!(payload["rowCount"], 1);
    assert_eq!(ctx.recorded.last().bindings, vec![BindValue::Int(2)]);
}

#[tokio::test]
async fn test_postgres_uses_numbered_placeholders() {
    let ctx = TestContext::setup_with(Dialect::Postgresql).await;
    let server = ctx.open_server();
    let caller = server.context_for(None);

    call_tool(&server, &caller, &qualified("get_people"), json!({"filter_name": "Ada"})).await;

    let statement = ctx.recorded.last();
    assert!(statement.sql.contains("$1"));
    assert!(!statement.sql.contains('@'), "{}", statement.sql);
    assert!(statement.bindings.contains(&BindValue::Text("Ada".to_string())));
}

#[tokio::test]
async fn test_connection_is_reused_across_calls() {
    let ctx = TestContext::setup().await;
    let server = ctx.open_server();
    let caller = server.context_for(None);

    for _ in 0..3 {
        call_tool(&server, &caller, &qualified("count_people"), json!({})).await;
    }
    assert_eq!(ctx.recorded.connect_count(), 1);
    assert_eq!(ctx.executor.active_connections().await, 1);
}

#[tokio::test]
async fn test_unknown_tool_is_an_error() {
    let ctx = TestContext::setup().await;
    let server = ctx.open_server();
    let caller = server.context_for(None);

    let response = call_tool(&server, &caller, &qualified("drop_people"), json!({})).await;
    let error = response.error.unwrap();
    assert_eq!(error.code, -32603);
    assert!(error.message.contains("acme__crm__drop_people"));
    assert_eq!(ctx.recorded.connect_count(), 0);
}

#[tokio::test]
async fn test_unqualified_name_is_an_error() {
    let ctx = TestContext::setup().await;
    let server = ctx.open_server();
    let caller = server.context_for(None);

    let response = call_tool(&server, &caller, "get_people", json!({})).await;
    assert_eq!(response.error.unwrap().code, -32603);
}

// =============================================================================
// RESOURCE READS
// =============================================================================

#[tokio::test]
async fn test_read_resource_returns_json_rows() {
    let ctx = TestContext::setup().await;
    let server = ctx.open_server();
    let caller = server.context_for(None);

    let response = request(
        &server,
        &caller,
        "resources/read",
        Some(json!({"uri": "acme__crm__people_list://list"})),
    )
    .await;
    let contents = response.result.unwrap()["contents"].clone();
    assert_eq!(contents[0]["mimeType"], "application/json");
    let rows: serde_json::Value = serde_json::from_str(contents[0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 3);

    let statement = ctx.recorded.last();
    assert_eq!(statement.sql, "SELECT [id], [name], [salary] FROM [people]");
}
