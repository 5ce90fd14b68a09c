//! Carriers for the MCP message stream.
//!
//! Every carrier turns inbound bytes into messages for [`McpServer`] and
//! delivers its replies through a [`MessageSink`]:
//!
//! | Carrier | Inbound | Outbound |
//! |---------|---------|----------|
//! | [`stdio`] | newline-delimited JSON on stdin | newline-delimited JSON on stdout |
//! | [`sse`] | `POST /message?clientId=` | `data:` events on `GET /sse` |
//! | [`streamable_http`] | `POST /mcp` | the POST response, or `GET /mcp` pushes |

pub mod sse;
pub mod stdio;
pub mod streamable_http;

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, header};
use quarry_auth::{AuthContext, PresentedToken};

use crate::error::McpError;
use crate::protocol::JsonRpcResponse;
use crate::server::{McpServer, Session};

/// Outbound half of a carrier.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send_message(&self, message: JsonRpcResponse) -> Result<(), McpError>;
}

/// Handle one raw inbound message and deliver the reply, if any, to `sink`.
pub async fn dispatch(
    server: &McpServer,
    session: &Session,
    ctx: &AuthContext,
    raw: &str,
    sink: &dyn MessageSink,
) -> Result<(), McpError> {
    match server.handle_raw(session, ctx, raw).await {
        Some(response) => sink.send_message(response).await,
        None => Ok(()),
    }
}

/// Token from an `Authorization: Bearer` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<PresentedToken> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(PresentedToken::from_authorization_header)
}

/// Caller context for an HTTP request.
pub(crate) fn http_context(server: &Arc<McpServer>, headers: &HeaderMap) -> AuthContext {
    server.context_for(bearer_token(headers))
}
