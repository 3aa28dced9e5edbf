//! Stdio transport: reads JSON-RPC from stdin, writes to stdout.
//!
//! Requests run concurrently; a single writer task owns stdout so responses
//! and progress notifications never interleave mid-line.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::protocol::{ProtocolHandler, RequestContext};
use crate::tools::CallerIdentity;
use crate::types::{McpError, McpResult};

use super::framing;

/// Request-id scope for the single stdio client.
const STDIO_SCOPE: &str = "stdio";

/// Stdio transport for desktop MCP clients.
pub struct StdioTransport {
    handler: Arc<ProtocolHandler>,
    caller: Option<CallerIdentity>,
}

impl StdioTransport {
    /// `caller` is the identity every call runs as; stdio has no headers.
    pub fn new(handler: Arc<ProtocolHandler>, caller: Option<CallerIdentity>) -> Self {
        Self { handler, caller }
    }

    /// Run the transport loop: reads from stdin, writes to stdout.
    pub async fn run(&self) -> McpResult<()> {
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve until `input` reaches EOF, then let in-flight calls finish.
    pub async fn serve<R, W>(&self, mut input: R, output: W) -> McpResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<Value>();
        let writer = tokio::spawn(write_loop(rx, output));
        let mut tasks = JoinSet::new();
        let mut line = String::new();

        tracing::info!("Stdio transport started");

        loop {
            line.clear();
            let bytes_read = input.read_line(&mut line).await.map_err(McpError::Io)?;

            if bytes_read == 0 {
                tracing::info!("EOF on stdin, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match framing::parse_message(trimmed) {
                Ok(msg) => {
                    let handler = Arc::clone(&self.handler);
                    let ctx = RequestContext::new(STDIO_SCOPE, self.caller.clone())
                        .with_notifications(tx.clone());
                    let tx = tx.clone();
                    tasks.spawn(async move {
                        if let Some(response) = handler.handle_message(msg, ctx).await {
                            let _ = tx.send(response);
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!("Parse error: {e}");
                    let _ = tx.send(framing::error_response(&e));
                }
            }

            // Reap finished request tasks so the set does not grow unbounded.
            while tasks.try_join_next().is_some() {}
        }

        while tasks.join_next().await.is_some() {}
        drop(tx);
        writer
            .await
            .map_err(|e| McpError::Transport(e.to_string()))??;
        Ok(())
    }
}

async fn write_loop<W>(mut rx: mpsc::UnboundedReceiver<Value>, mut output: W) -> McpResult<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(value) = rx.recv().await {
        let framed = framing::frame_message(&value)?;
        output
            .write_all(framed.as_bytes())
            .await
            .map_err(McpError::Io)?;
        output.flush().await.map_err(McpError::Io)?;
    }
    Ok(())
}
