//! Newline-delimited JSON over a byte stream.

use std::sync::Arc;

use async_trait::async_trait;
use quarry_auth::AuthContext;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use super::{MessageSink, dispatch};
use crate::error::McpError;
use crate::protocol::JsonRpcResponse;
use crate::server::{McpServer, Session};

/// Writes each message as one line.
pub struct LineWriter<W> {
    writer: Mutex<W>,
}

impl<W> LineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W> MessageSink for LineWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_message(&self, message: JsonRpcResponse) -> Result<(), McpError> {
        let mut line = serde_json::to_string(&message)?;
        line.push('\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Serve on the process's stdin and stdout until stdin closes.
pub async fn run_stdio(server: Arc<McpServer>, ctx: AuthContext) -> Result<(), McpError> {
    tracing::info!("MCP server listening on stdio");
    let sink = Arc::new(LineWriter::new(tokio::io::stdout()));
    serve_lines(server, ctx, tokio::io::stdin(), sink).await
}

/// Read lines from `reader` until EOF, answering each through `sink`.
///
/// Every line is handled on its own task, so a slow call does not hold up
/// the lines behind it; replies are written in completion order. Bytes that
/// are not UTF-8 are decoded lossily and answered with a parse error. Blank
/// lines are skipped. Returns once the reader is exhausted and every reply
/// has been written.
pub async fn serve_lines<R>(
    server: Arc<McpServer>,
    ctx: AuthContext,
    reader: R,
    sink: Arc<dyn MessageSink>,
) -> Result<(), McpError>
where
    R: AsyncRead + Unpin,
{
    let session = Arc::new(Session::new("stdio"));
    let ctx = Arc::new(ctx);
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut in_flight = JoinSet::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf).trim().to_string();
        if line.is_empty() {
            continue;
        }

        let (server, session, ctx, sink) =
            (server.clone(), session.clone(), ctx.clone(), sink.clone());
        in_flight.spawn(async move {
            if let Err(e) = dispatch(&server, &session, &ctx, &line, sink.as_ref()).await {
                tracing::warn!(error = %e, "Failed to write stdio reply");
            }
        });

        while let Some(done) = in_flight.try_join_next() {
            if let Err(e) = done {
                tracing::error!(error = %e, "stdio message task failed");
            }
        }
    }

    while let Some(done) = in_flight.join_next().await {
        if let Err(e) = done {
            tracing::error!(error = %e, "stdio message task failed");
        }
    }

    session.close();
    tracing::info!("stdin closed");
    Ok(())
}
