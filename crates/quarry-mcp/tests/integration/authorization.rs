//! Token-gated listings and calls with auth mode `LITE`.

use super::common::*;
use quarry_core::config::AuthMode;
use quarry_core::{DataStore, McpTokenPolicyRecord, PolicyScope};
use quarry_mcp::protocol::JsonRpcResponse;
use serde_json::json;

fn error_code(response: &JsonRpcResponse) -> i32 {
    response.error.as_ref().expect("expected an error").code
}

// =============================================================================
// NO TOKEN
// =============================================================================

#[tokio::test]
async fn test_listings_are_empty_without_token() {
    let ctx = TestContext::setup().await;
    let server = ctx.server(AuthMode::Lite);
    let caller = server.context_for(None);

    let tools = request(&server, &caller, "tools/list", None).await;
    assert!(listed_names(&tools, "tools").is_empty());

    let resources = request(&server, &caller, "resources/list", None).await;
    assert!(listed_names(&resources, "resources").is_empty());
}

#[tokio::test]
async fn test_call_without_token_is_rejected() {
    let ctx = TestContext::setup().await;
    let server = ctx.server(AuthMode::Lite);
    let caller = server.context_for(None);

    let response = call_tool(&server, &caller, &qualified("get_people"), json!({})).await;
    assert_eq!(error_code(&response), -32600);
    assert_eq!(ctx.recorded.connect_count(), 0);

    let read = request(
        &server,
        &caller,
        "resources/read",
        Some(json!({"uri": "acme__crm__people_list://list"})),
    )
    .await;
    assert_eq!(error_code(&read), -32600);
}

#[tokio::test]
async fn test_tool_policy_opens_single_tool() {
    let ctx = TestContext::setup().await;
    ctx.store
        .set_mcp_token_policy(McpTokenPolicyRecord {
            scope_type: PolicyScope::Tool,
            scope_id: qualified("count_people"),
            require_token: false,
        })
        .await
        .unwrap();
    let server = ctx.server(AuthMode::Lite);
    let caller = server.context_for(None);

    let tools = request(&server, &caller, "tools/list", None).await;
    assert_eq!(listed_names(&tools, "tools"), vec![qualified("count_people")]);

    let response = call_tool(&server, &caller, &qualified("count_people"), json!({})).await;
    assert_eq!(tool_payload(&response)["success"], true);
}

// =============================================================================
// SCOPED TOKENS
// =============================================================================

#[tokio::test]
async fn test_allow_list_limits_tools() {
    let ctx = TestContext::setup().await;
    let raw = raw_token("t1", OWNER);
    let mut grant = token_record("t1", &raw);
    grant.allow_all_servers = true;
    grant.allowed_tools.insert(qualified("get_people"));
    ctx.store.create_mcp_token(grant).await.unwrap();

    let server = ctx.server(AuthMode::Lite);
    let caller = token_context(&raw);

    let tools = request(&server, &caller, "tools/list", None).await;
    assert_eq!(listed_names(&tools, "tools"), vec![qualified("get_people")]);

    let allowed = call_tool(&server, &caller, &qualified("get_people"), json!({})).await;
    assert_eq!(tool_payload(&allowed)["rowCount"], 3);

    let denied = call_tool(&server, &caller, &qualified("delete_people"), json!({"id": 1})).await;
    assert_eq!(error_code(&denied), -32600);
}

#[tokio::test]
async fn test_explicit_deny_hides_tool() {
    let ctx = TestContext::setup().await;
    let raw = raw_token("t1", OWNER);
    let mut grant = token_record("t1", &raw);
    grant.allow_all_servers = true;
    grant.allow_all_tools = true;
    grant.tool_rules.insert(qualified("delete_people"), Some(false));
    ctx.store.create_mcp_token(grant).await.unwrap();

    let server = ctx.server(AuthMode::Lite);
    let tools = request(&server, &token_context(&raw), "tools/list", None).await;
    let names = listed_names(&tools, "tools");
    assert!(names.contains(&qualified("get_people")));
    assert!(!names.contains(&qualified("delete_people")));
}

#[tokio::test]
async fn test_revoked_token_sees_nothing() {
    let ctx = TestContext::setup().await;
    let raw = raw_token("t1", OWNER);
    let mut grant = token_record("t1", &raw);
    grant.allow_all_servers = true;
    grant.allow_all_tools = true;
    grant.allow_all_resources = true;
    ctx.store.create_mcp_token(grant).await.unwrap();

    let server = ctx.server(AuthMode::Lite);
    let caller = token_context(&raw);
    let resources = request(&server, &caller, "resources/list", None).await;
    assert_eq!(listed_names(&resources, "resources").len(), 1);

    ctx.store.revoke_mcp_token("t1", chrono::Utc::now()).await.unwrap();
    let tools = request(&server, &caller, "tools/list", None).await;
    assert!(listed_names(&tools, "tools").is_empty());
    let resources = request(&server, &caller, "resources/list", None).await;
    assert!(listed_names(&resources, "resources").is_empty());
}

#[tokio::test]
async fn test_other_workspace_token_is_rejected() {
    let ctx = TestContext::setup().await;
    let raw = raw_token("t2", "globex");
    let mut grant = token_record("t2", &raw);
    grant.workspace_id = "globex".to_string();
    grant.subject_username = "globex".to_string();
    grant.allow_all_servers = true;
    grant.allow_all_tools = true;
    ctx.store.create_mcp_token(grant).await.unwrap();

    let server = ctx.server(AuthMode::Lite);
    let tools = request(&server, &token_context(&raw), "tools/list", None).await;
    assert!(listed_names(&tools, "tools").is_empty());
}
