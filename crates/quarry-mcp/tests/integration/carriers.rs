//! The three carriers driven end to end over a generated server.

use std::time::{Duration, Instant};

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use futures::StreamExt;
use quarry_mcp::transport::sse::{self, SseState};
use quarry_mcp::transport::stdio::{LineWriter, serve_lines};
use quarry_core::config::{AuthMode, McpConfig};
use quarry_mcp::transport::streamable_http::{self, HttpState, SESSION_HEADER};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

use super::common::*;

fn stdio_output(sink: Arc<LineWriter<Vec<u8>>>) -> Vec<Value> {
    let written = Arc::try_unwrap(sink).ok().expect("sink still shared").into_inner();
    String::from_utf8(written)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post(uri: &str, session: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(session) = session {
        builder = builder.header(SESSION_HEADER, session);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

// =============================================================================
// STDIO
// =============================================================================

#[tokio::test]
async fn test_stdio_call_round_trip() {
    let ctx = TestContext::setup().await;
    let server = ctx.open_server();
    let caller = server.context_for(None);
    let input = format!(
        "{}\n{}\n",
        json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"}),
        json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call",
               "params": {"name": qualified("count_people"), "arguments": {}}}),
    );
    let sink = Arc::new(LineWriter::new(Vec::new()));

    serve_lines(server, caller, input.as_bytes(), sink.clone()).await.unwrap();

    let lines = stdio_output(sink);
    assert_eq!(lines.len(), 2);
    let call = lines.iter().find(|l| l["id"] == 2).unwrap();
    assert_eq!(call["result"]["content"][0]["type"], "text");
}

#[tokio::test]
async fn test_stdio_slow_call_does_not_hold_later_lines() {
    let ctx = TestContext::setup_slow(Duration::from_millis(400)).await;
    let server = ctx.open_server();
    let caller = server.context_for(None);
    let input = format!(
        "{}\n{}\n",
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call",
               "params": {"name": qualified("count_people"), "arguments": {}}}),
        json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
    );
    let sink = Arc::new(LineWriter::new(Vec::new()));

    let started = Instant::now();
    serve_lines(server, caller, input.as_bytes(), sink.clone()).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(400));

    let lines = stdio_output(sink);
    let order: Vec<&Value> = lines.iter().map(|l| &l["id"]).collect();
    assert_eq!(order, [&json!(2), &json!(1)]);
    assert!(lines[1]["result"]["content"].is_array());
}

// =============================================================================
// SESSION HTTP STREAMING
// =============================================================================

async fn http_app() -> (TestContext, Router) {
    http_app_with(TestContext::setup().await, McpConfig::default())
}

fn http_app_with(ctx: TestContext, mcp: McpConfig) -> (TestContext, Router) {
    let server = ctx.server_with(AuthMode::None, mcp);
    let app = streamable_http::create_router(Arc::new(HttpState::new(server)));
    (ctx, app)
}

fn count_people(id: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": "tools/call",
           "params": {"name": qualified("count_people"), "arguments": {}}})
}

async fn initialize(app: &Router) -> String {
    let response = app
        .clone()
        .oneshot(post(
            "/mcp",
            None,
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let session = response.headers()[SESSION_HEADER].to_str().unwrap().to_string();
    let body = json_body(response).await;
    assert_eq!(body["result"]["protocolVersion"], "2024-11-05");
    session
}

#[tokio::test]
async fn test_http_health_counts_sessions() {
    let (_ctx, app) = http_app().await;
    initialize(&app).await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"], 1);
}

#[tokio::test]
async fn test_http_requires_known_session() {
    let (_ctx, app) = http_app().await;
    let list = json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"});

    let missing = app.clone().oneshot(post("/mcp", None, list.clone())).await.unwrap();
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(missing).await["error"]["code"], -32600);

    let unknown = app
        .oneshot(post("/mcp", Some("not-a-session"), list))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_http_request_reply_in_session() {
    let (_ctx, app) = http_app().await;
    let session = initialize(&app).await;

    let notified = app
        .clone()
        .oneshot(post(
            "/mcp",
            Some(&session),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        ))
        .await
        .unwrap();
    assert_eq!(notified.status(), StatusCode::ACCEPTED);

    let response = app
        .clone()
        .oneshot(post(
            "/mcp",
            Some(&session),
            json!({"jsonrpc": "2.0", "id": "list-1", "method": "tools/list"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[SESSION_HEADER], session.as_str());
    let body = json_body(response).await;
    assert_eq!(body["id"], "list-1");
    assert!(!body["result"]["tools"].as_array().unwrap().is_empty());

    let ack = app
        .oneshot(post("/mcp", Some(&session), json!({"jsonrpc": "2.0", "id": 9, "result": {}})))
        .await
        .unwrap();
    assert_eq!(ack.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_http_delete_closes_session() {
    let (_ctx, app) = http_app().await;
    let session = initialize(&app).await;

    let delete = |session: String| {
        Request::builder()
            .method("DELETE")
            .uri("/mcp")
            .header(SESSION_HEADER, session)
            .body(Body::empty())
            .unwrap()
    };

    let closed = app.clone().oneshot(delete(session.clone())).await.unwrap();
    assert_eq!(closed.status(), StatusCode::NO_CONTENT);

    let again = app.clone().oneshot(delete(session.clone())).await.unwrap();
    assert_eq!(again.status(), StatusCode::NOT_FOUND);

    let after = app
        .oneshot(post(
            "/mcp",
            Some(&session),
            json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"}),
        ))
        .await
        .unwrap();
    assert_eq!(after.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_http_slow_request_times_out() {
    let mcp = McpConfig {
        request_timeout_ms: 50,
        ..Default::default()
    };
    let (_ctx, app) = http_app_with(TestContext::setup_slow(Duration::from_millis(400)).await, mcp);
    let session = initialize(&app).await;

    let started = Instant::now();
    let response = app
        .clone()
        .oneshot(post("/mcp", Some(&session), count_people(json!("slow"))))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["id"], "slow");
    assert_eq!(body["error"]["code"], -32603);
    assert_eq!(body["error"]["message"], "Request timeout");

    // The waiter is gone, so the id can be reused and the session still answers.
    let list = app
        .oneshot(post(
            "/mcp",
            Some(&session),
            json!({"jsonrpc": "2.0", "id": "slow", "method": "tools/list"}),
        ))
        .await
        .unwrap();
    assert_eq!(list.status(), StatusCode::OK);
    assert!(json_body(list).await["result"]["tools"].is_array());
}

#[tokio::test]
async fn test_http_duplicate_in_flight_id_is_rejected() {
    let (_ctx, app) =
        http_app_with(TestContext::setup_slow(Duration::from_millis(300)).await, McpConfig::default());
    let session = initialize(&app).await;

    let first = tokio::spawn(
        app.clone()
            .oneshot(post("/mcp", Some(&session), count_people(json!(4)))),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    let duplicate = app
        .clone()
        .oneshot(post("/mcp", Some(&session), count_people(json!(4))))
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::BAD_REQUEST);
    let body = json_body(duplicate).await;
    assert_eq!(body["error"]["code"], -32600);
    assert_eq!(body["id"], 4);

    let original = first.await.unwrap().unwrap();
    assert_eq!(original.status(), StatusCode::OK);
    let body = json_body(original).await;
    assert_eq!(body["id"], 4);
    assert!(body["result"]["content"].is_array());
}

#[tokio::test]
async fn test_http_parse_error() {
    let (_ctx, app) = http_app().await;
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .body(Body::from("{oops"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], -32700);
}

// =============================================================================
// SSE + POST
// =============================================================================

fn sse_payload(frame: &[u8]) -> Value {
    let text = std::str::from_utf8(frame).unwrap();
    let data = text
        .lines()
        .find_map(|l| l.strip_prefix("data: ").or_else(|| l.strip_prefix("data:")))
        .expect("data line");
    serde_json::from_str(data).unwrap()
}

#[tokio::test]
async fn test_sse_reply_arrives_on_event_stream() {
    let ctx = TestContext::setup().await;
    let app = sse::create_router(Arc::new(SseState::new(ctx.open_server())));

    let events = app
        .clone()
        .oneshot(Request::builder().uri("/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(events.status(), StatusCode::OK);
    let mut stream = events.into_body().into_data_stream();

    let first = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let connected = sse_payload(&first);
    assert_eq!(connected["type"], "connected");
    let client_id = connected["clientId"].as_str().unwrap().to_string();

    let ack = app
        .clone()
        .oneshot(post(
            &format!("/message?clientId={client_id}"),
            None,
            json!({"jsonrpc": "2.0", "id": 5, "method": "tools/list"}),
        ))
        .await
        .unwrap();
    assert_eq!(ack.status(), StatusCode::OK);
    assert_eq!(json_body(ack).await, json!({"received": true}));

    let next = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let reply = sse_payload(&next);
    assert_eq!(reply["id"], 5);
    assert!(reply["result"]["tools"].is_array());
}

#[tokio::test]
async fn test_sse_unknown_client() {
    let ctx = TestContext::setup().await;
    let app = sse::create_router(Arc::new(SseState::new(ctx.open_server())));

    let unknown = app
        .clone()
        .oneshot(post(
            "/message?clientId=nobody",
            None,
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
        ))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let missing = app
        .oneshot(post("/message", None, json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sse_heartbeat() {
    let ctx = TestContext::setup().await;
    let mcp = McpConfig {
        heartbeat_secs: 1,
        ..Default::default()
    };
    let app = sse::create_router(Arc::new(SseState::new(ctx.server_with(AuthMode::None, mcp))));

    let events = app
        .oneshot(Request::builder().uri("/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let mut stream = events.into_body().into_data_stream();

    let first = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(sse_payload(&first)["type"], "connected");

    let next = tokio::time::timeout(Duration::from_secs(3), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let heartbeat = sse_payload(&next);
    assert_eq!(heartbeat["type"], "heartbeat");
    assert!(heartbeat["timestamp"].as_str().is_some_and(|t| !t.is_empty()));
}
