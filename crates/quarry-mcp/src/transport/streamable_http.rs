//! Session-scoped HTTP streaming.
//!
//! `POST /mcp` carries one message. An `initialize` request mints a session
//! and returns its id in the `Mcp-Session-Id` header; every later message
//! must present that header. Requests wait for their reply, matched by
//! message id, for at most `request_timeout_ms`. `GET /mcp` opens an
//! optional event stream for the session and `DELETE /mcp` closes it.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        IntoResponse, Response, Sse,
        sse::{Event, KeepAlive},
    },
    routing::get,
};
use quarry_auth::AuthContext;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;

use super::{MessageSink, http_context};
use crate::error::{McpError, codes};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::server::{McpServer, Session};

pub const SESSION_HEADER: &str = "mcp-session-id";

type PendingRequests = Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>;

/// One live session.
pub struct HttpSession {
    session: Session,
    pending: PendingRequests,
    push: Mutex<Option<mpsc::Sender<Value>>>,
}

impl HttpSession {
    fn new(id: &str) -> Self {
        Self {
            session: Session::new(id),
            pending: Mutex::new(HashMap::new()),
            push: Mutex::new(None),
        }
    }

    /// Register a waiter for the reply to `id`. `None` when a request with
    /// the same id is still in flight on this session.
    fn await_reply(&self, id: &Value) -> Option<oneshot::Receiver<JsonRpcResponse>> {
        let mut pending = self.pending.lock().ok()?;
        let key = id.to_string();
        if pending.contains_key(&key) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(key, tx);
        Some(rx)
    }

    fn forget(&self, id: &Value) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id.to_string());
        }
    }
}

#[async_trait]
impl MessageSink for HttpSession {
    /// Replies go to the waiting POST when one exists, otherwise to the
    /// session's event stream.
    async fn send_message(&self, message: JsonRpcResponse) -> Result<(), McpError> {
        let key = message.id.as_ref().map(Value::to_string);
        let waiter = key.and_then(|k| self.pending.lock().ok()?.remove(&k));
        if let Some(waiter) = waiter {
            return waiter
                .send(message)
                .map_err(|_| McpError::Transport("request no longer waiting".to_string()));
        }

        let push = self.push.lock().ok().and_then(|p| p.clone());
        match push {
            Some(push) => push
                .send(serde_json::to_value(message)?)
                .await
                .map_err(|_| McpError::Transport("event stream closed".to_string())),
            None => {
                tracing::debug!(session = %self.session.id(), "Dropping reply with no receiver");
                Ok(())
            }
        }
    }
}

pub struct HttpState {
    server: Arc<McpServer>,
    sessions: Mutex<HashMap<String, Arc<HttpSession>>>,
    request_timeout: Duration,
}

impl HttpState {
    pub fn new(server: Arc<McpServer>) -> Self {
        let request_timeout = Duration::from_millis(server.config().request_timeout_ms);
        Self {
            server,
            sessions: Mutex::new(HashMap::new()),
            request_timeout,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn session(&self, headers: &HeaderMap) -> Option<Arc<HttpSession>> {
        let id = headers.get(SESSION_HEADER)?.to_str().ok()?;
        self.sessions.lock().ok()?.get(id).cloned()
    }

    fn open_session(&self) -> (String, Arc<HttpSession>) {
        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(HttpSession::new(&id));
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(id.clone(), session.clone());
        }
        tracing::info!(session = %id, "MCP session opened");
        (id, session)
    }

    fn close_session(&self, headers: &HeaderMap) -> bool {
        let Some(id) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) else {
            return false;
        };
        let removed = self.sessions.lock().ok().and_then(|mut s| s.remove(id));
        match removed {
            Some(session) => {
                session.session.close();
                tracing::info!(session = %id, "MCP session closed");
                true
            }
            None => false,
        }
    }
}

pub fn create_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route(
            "/mcp",
            get(handle_stream).post(handle_post).delete(handle_delete),
        )
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn rpc_error(status: StatusCode, id: Option<Value>, code: i32, message: &str) -> Response {
    (status, Json(JsonRpcResponse::error(id, code, message))).into_response()
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

async fn handle_post(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let value: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            return rpc_error(
                StatusCode::BAD_REQUEST,
                None,
                codes::PARSE_ERROR,
                &format!("Parse error: {e}"),
            );
        }
    };
    let message: JsonRpcRequest = match serde_json::from_value(value.clone()) {
        Ok(m) => m,
        Err(e) => {
            return rpc_error(
                StatusCode::BAD_REQUEST,
                value.get("id").cloned(),
                codes::INVALID_REQUEST,
                &format!("Invalid request: {e}"),
            );
        }
    };

    let (session_id, session) = if message.method.as_deref() == Some("initialize") {
        state.open_session()
    } else {
        match state.session(&headers) {
            Some(session) => (session.session.id().to_string(), session),
            None => {
                return rpc_error(
                    StatusCode::BAD_REQUEST,
                    message.id,
                    codes::INVALID_REQUEST,
                    "Missing or unknown session id",
                );
            }
        }
    };
    let ctx = http_context(&state.server, &headers);

    let has_method = message.method.is_some();
    let response = match (has_method, message.id.clone()) {
        (false, _) => StatusCode::OK.into_response(),
        (true, None) => {
            state.server.handle_message(&session.session, &ctx, message).await;
            StatusCode::ACCEPTED.into_response()
        }
        (true, Some(id)) => match session.await_reply(&id) {
            Some(reply) => {
                let reply = roundtrip(&state, &session, ctx, message, &id, reply).await;
                Json(reply).into_response()
            }
            None => {
                tracing::warn!(session = %session_id, id = %id, "Duplicate in-flight request id");
                rpc_error(
                    StatusCode::BAD_REQUEST,
                    Some(id),
                    codes::INVALID_REQUEST,
                    "Request id already in flight",
                )
            }
        },
    };
    with_session_header(response, &session_id)
}

/// Run a request in the background and wait for its reply, bounded by the
/// configured timeout. A reply that arrives after the timeout goes to the
/// session's event stream if one is open and is dropped otherwise.
async fn roundtrip(
    state: &Arc<HttpState>,
    session: &Arc<HttpSession>,
    ctx: AuthContext,
    message: JsonRpcRequest,
    id: &Value,
    reply: oneshot::Receiver<JsonRpcResponse>,
) -> JsonRpcResponse {
    let server = state.server.clone();
    let worker = session.clone();
    tokio::spawn(async move {
        if let Some(response) = server.handle_message(&worker.session, &ctx, message).await
            && let Err(e) = worker.send_message(response).await
        {
            tracing::debug!(session = %worker.session.id(), error = %e, "Reply not delivered");
        }
    });

    match tokio::time::timeout(state.request_timeout, reply).await {
        Ok(Ok(response)) => response,
        Ok(Err(_)) => JsonRpcResponse::error(
            Some(id.clone()),
            codes::INTERNAL_ERROR,
            "Request dropped",
        ),
        Err(_) => {
            session.forget(id);
            tracing::warn!(session = %session.session.id(), id = %id, "Request timed out");
            JsonRpcResponse::from_error(Some(id.clone()), &McpError::RequestTimeout)
        }
    }
}

async fn handle_stream(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> Response {
    let Some(session) = state.session(&headers) else {
        return rpc_error(
            StatusCode::BAD_REQUEST,
            None,
            codes::INVALID_REQUEST,
            "Missing or unknown session id",
        );
    };

    let (tx, mut rx) = mpsc::channel::<Value>(100);
    if let Ok(mut push) = session.push.lock() {
        *push = Some(tx);
    }
    tracing::debug!(session = %session.session.id(), "Session event stream opened");

    let stream = async_stream::stream! {
        while let Some(payload) = rx.recv().await {
            yield Ok::<_, Infallible>(Event::default().data(payload.to_string()));
        }
    };
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn handle_delete(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> StatusCode {
    if state.close_session(&headers) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn handle_health(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "transport": "http",
        "sessions": state.session_count(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Bind and serve until the process stops.
pub async fn run_http(server: Arc<McpServer>) -> Result<(), McpError> {
    let addr = server.config().bind_address();
    let app = create_router(Arc::new(HttpState::new(server)));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| McpError::StartupFailed(format!("Failed to bind to {addr}: {e}")))?;
    tracing::info!(address = %addr, "MCP HTTP server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| McpError::Transport(e.to_string()))
}
