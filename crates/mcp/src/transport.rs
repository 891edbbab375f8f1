//! MCP transport layer.
//!
//! `McpTransport` moves newline-delimited JSON-RPC messages. `LineTransport`
//! frames any async reader/writer pair (stdio in production, in-memory
//! duplex streams in tests); `ChannelTransport` passes whole messages
//! between tasks.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::McpError;

/// Upper bound on a single incoming message.
pub const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Next message, or `None` once the peer has closed.
    ///
    /// Must be cancel safe: the session loop selects on it alongside
    /// finished tool calls.
    async fn receive(&mut self) -> Result<Option<String>, McpError>;

    async fn send(&mut self, message: &str) -> Result<(), McpError>;
}

/// Newline-delimited JSON over an async reader/writer pair.
pub struct LineTransport<R, W> {
    reader: R,
    writer: W,
    max_bytes: usize,
    /// Bytes of the line being assembled, kept across cancelled receives.
    partial: Vec<u8>,
    /// Set while skipping the remainder of an over-long line.
    oversized: Option<usize>,
}

/// Reads stdin, writes stdout. Logs must go to stderr while this is active.
pub type StdioTransport = LineTransport<BufReader<tokio::io::Stdin>, tokio::io::Stdout>;

impl StdioTransport {
    pub fn stdio() -> Self {
        LineTransport::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send + Sync,
    W: AsyncWrite + Unpin + Send + Sync,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            max_bytes: MAX_MESSAGE_BYTES,
            partial: Vec::new(),
            oversized: None,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Close out the current line. `Ok(None)` means it was blank.
    fn finish_line(&mut self) -> Result<Option<String>, McpError> {
        if let Some(size) = self.oversized.take() {
            self.partial.clear();
            return Err(McpError::MessageTooLarge(size));
        }
        let bytes = std::mem::take(&mut self.partial);
        let line = String::from_utf8(bytes).map_err(|e| {
            McpError::Transport(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        let trimmed = line.trim();
        Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
    }
}

#[async_trait]
impl<R, W> McpTransport for LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send + Sync,
    W: AsyncWrite + Unpin + Send + Sync,
{
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        // Only `fill_buf` awaits; all bookkeeping happens between polls.
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if self.partial.is_empty() && self.oversized.is_none() {
                    return Ok(None);
                }
                return self.finish_line();
            }

            let newline = available.iter().position(|b| *b == b'\n');
            let piece = &available[..newline.unwrap_or(available.len())];
            if let Some(seen) = self.oversized.as_mut() {
                *seen += piece.len();
            } else if self.partial.len() + piece.len() > self.max_bytes {
                self.oversized = Some(self.partial.len() + piece.len());
                self.partial.clear();
            } else {
                self.partial.extend_from_slice(piece);
            }
            let consumed = newline.map_or(available.len(), |at| at + 1);
            self.reader.consume(consumed);

            if newline.is_some() {
                if let Some(line) = self.finish_line()? {
                    return Ok(Some(line));
                }
            }
        }
    }

    async fn send(&mut self, message: &str) -> Result<(), McpError> {
        self.writer.write_all(message.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// In-memory transport backed by channel pairs.
pub struct ChannelTransport {
    rx: tokio::sync::mpsc::Receiver<String>,
    tx: tokio::sync::mpsc::Sender<String>,
}

impl ChannelTransport {
    /// Two connected ends: what one sends the other receives.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_b) = tokio::sync::mpsc::channel(32);
        let (tx_b, rx_a) = tokio::sync::mpsc::channel(32);
        (
            Self { rx: rx_a, tx: tx_a },
            Self { rx: rx_b, tx: tx_b },
        )
    }
}

#[async_trait]
impl McpTransport for ChannelTransport {
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        Ok(self.rx.recv().await)
    }

    async fn send(&mut self, message: &str) -> Result<(), McpError> {
        self.tx
            .send(message.to_string())
            .await
            .map_err(|e| McpError::Transport(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e)))
    }
}
