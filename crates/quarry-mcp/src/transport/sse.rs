//! Event stream plus POST.
//!
//! A client opens `GET /sse` and receives a `connected` event carrying its
//! client id, then heartbeats. It sends messages with
//! `POST /message?clientId=<id>`; the POST only acknowledges receipt and the
//! reply arrives later on the event stream.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse, Response, Sse,
        sse::{Event, KeepAlive},
    },
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use super::{MessageSink, dispatch, http_context};
use crate::error::McpError;
use crate::protocol::JsonRpcResponse;
use crate::server::{McpServer, Session};

/// One connected event-stream client.
struct SseClient {
    session: Session,
    events: mpsc::Sender<Value>,
}

#[async_trait]
impl MessageSink for SseClient {
    async fn send_message(&self, message: JsonRpcResponse) -> Result<(), McpError> {
        self.events
            .send(serde_json::to_value(message)?)
            .await
            .map_err(|_| McpError::Transport("event stream closed".to_string()))
    }
}

pub struct SseState {
    server: Arc<McpServer>,
    clients: Mutex<HashMap<String, Arc<SseClient>>>,
    heartbeat: Duration,
}

impl SseState {
    pub fn new(server: Arc<McpServer>) -> Self {
        let heartbeat = Duration::from_secs(server.config().heartbeat_secs.max(1));
        Self {
            server,
            clients: Mutex::new(HashMap::new()),
            heartbeat,
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn client(&self, id: &str) -> Option<Arc<SseClient>> {
        self.clients.lock().ok()?.get(id).cloned()
    }

    fn register(&self, id: String, client: Arc<SseClient>) {
        if let Ok(mut clients) = self.clients.lock() {
            clients.insert(id, client);
        }
    }

    fn remove(&self, id: &str) {
        let removed = self.clients.lock().ok().and_then(|mut c| c.remove(id));
        if let Some(client) = removed {
            client.session.close();
            tracing::info!(client_id = %id, "SSE client disconnected");
        }
    }
}

/// Unregisters a client when its event stream is dropped.
struct ClientGuard {
    state: Arc<SseState>,
    id: String,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.state.remove(&self.id);
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    client_id: Option<String>,
}

pub fn create_router(state: Arc<SseState>) -> Router {
    Router::new()
        .route("/sse", get(handle_events))
        .route("/message", post(handle_message))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_events(State(state): State<Arc<SseState>>) -> impl IntoResponse {
    let client_id = uuid::Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::channel::<Value>(100);
    state.register(
        client_id.clone(),
        Arc::new(SseClient {
            session: Session::new(client_id.clone()),
            events: tx,
        }),
    );
    tracing::info!(client_id = %client_id, "SSE client connected");

    let period = state.heartbeat;
    let guard = ClientGuard {
        state,
        id: client_id.clone(),
    };

    let stream = async_stream::stream! {
        let _guard = guard;
        let connected = json!({ "type": "connected", "clientId": client_id });
        yield Ok::<_, Infallible>(Event::default().data(connected.to_string()));

        let mut heartbeat = tokio::time::interval(period);
        heartbeat.tick().await;
        loop {
            let next = tokio::select! {
                message = rx.recv() => message,
                _ = heartbeat.tick() => Some(json!({
                    "type": "heartbeat",
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                })),
            };
            match next {
                Some(payload) => yield Ok(Event::default().data(payload.to_string())),
                None => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn handle_message(
    State(state): State<Arc<SseState>>,
    Query(query): Query<MessageQuery>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Some(client_id) = query.client_id else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "clientId is required" })),
        )
            .into_response();
    };
    let Some(client) = state.client(&client_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Unknown client" })),
        )
            .into_response();
    };

    let ctx = http_context(&state.server, &headers);
    let server = state.server.clone();
    tokio::spawn(async move {
        if let Err(e) = dispatch(&server, &client.session, &ctx, &body, client.as_ref()).await {
            tracing::warn!(client_id = %client_id, error = %e, "Failed to deliver reply");
        }
    });

    Json(json!({ "received": true })).into_response()
}

async fn handle_health(State(state): State<Arc<SseState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "transport": "sse",
        "clients": state.client_count(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Bind and serve until the process stops.
pub async fn run_sse(server: Arc<McpServer>) -> Result<(), McpError> {
    let addr = server.config().bind_address();
    let app = create_router(Arc::new(SseState::new(server)));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| McpError::StartupFailed(format!("Failed to bind to {addr}: {e}")))?;
    tracing::info!(address = %addr, "MCP SSE server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| McpError::Transport(e.to_string()))
}
