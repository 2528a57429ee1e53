//! Tool server over newline-delimited JSON
//!
//! Every request runs on its own task and replies funnel through a single
//! writer task, so a slow scan never holds up other calls.

use std::io;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    task::JoinSet,
};
use tracing::{debug, error, info, warn};

use super::{
    handler::McpHandler,
    protocol::{error_codes, McpRequest, McpResponse},
};
use crate::error::{GatewayError, Result};

pub struct McpServer {
    handler: McpHandler,
}

impl McpServer {
    pub fn new(handler: McpHandler) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &McpHandler {
        &self.handler
    }

    /// Serve on the process's stdin/stdout until stdin closes
    pub async fn run_stdio(&self) -> Result<()> {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        self.run(stdin, tokio::io::stdout()).await
    }

    /// Serve until `reader` reaches EOF, then wait for in-flight requests
    pub async fn run<R, W>(&self, mut reader: R, writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        info!("[{}] Tool server listening on stdio", self.handler.session());

        let (replies, queue) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_responses(writer, queue));
        let mut in_flight = JoinSet::new();
        let mut buf = Vec::new();
        let mut read_error = None;

        loop {
            let frame = match read_frame(&mut reader, &mut buf).await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read request: {}", e);
                    read_error = Some(e);
                    break;
                }
            };

            let line = match frame {
                Frame::Line(line) => line,
                Frame::NotUtf8 => {
                    warn!("Discarding request that is not valid UTF-8");
                    send(
                        &replies,
                        McpResponse::error(
                            None,
                            error_codes::PARSE_ERROR,
                            "Parse error: request is not valid UTF-8",
                        ),
                    );
                    continue;
                }
                Frame::TooLong => {
                    warn!("Discarding request longer than {} bytes", MAX_LINE_BYTES);
                    send(
                        &replies,
                        McpResponse::error(
                            None,
                            error_codes::INVALID_REQUEST,
                            format!("Request exceeds {} bytes", MAX_LINE_BYTES),
                        ),
                    );
                    continue;
                }
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<McpRequest>(line) {
                Ok(request) => {
                    debug!(method = %request.method, id = ?request.id, "Request received");
                    let handler = self.handler.clone();
                    let replies = replies.clone();
                    in_flight.spawn(async move {
                        if let Some(response) = handler.handle(request).await {
                            send(&replies, response);
                        }
                    });
                }
                Err(e) => {
                    warn!("Failed to parse request: {}", e);
                    send(
                        &replies,
                        McpResponse::error(None, error_codes::PARSE_ERROR, format!("Parse error: {}", e)),
                    );
                }
            }
        }

        debug!("Input closed, waiting for {} in-flight request(s)", in_flight.len());
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!("Request task failed: {}", e);
            }
        }

        drop(replies);
        writer_task
            .await
            .map_err(|e| GatewayError::internal("response writer", e.to_string()))??;

        if let Some(e) = read_error {
            return Err(e.into());
        }

        let stats = self.handler.service().metrics().snapshot();
        info!(
            started = stats.scans_started,
            succeeded = stats.scans_succeeded,
            failed = stats.scans_failed,
            rejected = stats.scans_rejected,
            since = %stats.since,
            "[{}] Tool server stopped",
            self.handler.session()
        );
        Ok(())
    }
}

/// Longest request line accepted, newline excluded
pub const MAX_LINE_BYTES: usize = 1 << 20;

enum Frame {
    Line(String),
    NotUtf8,
    TooLong,
}

/// Next newline-terminated frame, `None` at EOF
async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Option<Frame>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = MAX_LINE_BYTES as u64 + 1;
    if (&mut *reader).take(limit).read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }

    if buf.len() > MAX_LINE_BYTES && buf.last() != Some(&b'\n') {
        skip_line(reader).await?;
        return Ok(Some(Frame::TooLong));
    }

    Ok(Some(match std::str::from_utf8(buf) {
        Ok(line) => Frame::Line(line.to_string()),
        Err(_) => Frame::NotUtf8,
    }))
}

/// Drop input up to and including the next newline
async fn skip_line<R>(reader: &mut R) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        let (used, done) = match available.iter().position(|byte| *byte == b'\n') {
            Some(end) => (end + 1, true),
            None => (available.len(), false),
        };
        reader.consume(used);
        if done {
            return Ok(());
        }
    }
}

fn send(replies: &mpsc::UnboundedSender<McpResponse>, response: McpResponse) {
    if replies.send(response).is_err() {
        warn!("Reply dropped, writer already closed");
    }
}

async fn write_responses<W>(mut writer: W, mut queue: mpsc::UnboundedReceiver<McpResponse>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = queue.recv().await {
        let mut line = serde_json::to_string(&response)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}
