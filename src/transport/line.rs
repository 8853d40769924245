//! Newline-delimited message transport
//!
//! One JSON message per line: writes append a single `\n`, reads take
//! everything up to the next `\n` and strip a trailing `\r` if present.
//! The same implementation backs stdio and TCP; it is generic over the
//! read and write halves so tests can run it over in-memory pipes.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::{MCPError, MCPResult};
use crate::transport::{ConnectionStatus, MCPTransport, TransportConfig, TransportStats};

/// Newline-framed transport over an arbitrary byte stream
pub struct LineTransport<R, W> {
    config: TransportConfig,
    reader: AsyncMutex<Option<R>>,
    writer: AsyncMutex<Option<W>>,
    shutdown: CancelToken,
    status: RwLock<ConnectionStatus>,
    stats: Mutex<TransportStats>,
}

/// Newline framing over the process's stdin/stdout
pub type StdioTransport = LineTransport<BufReader<tokio::io::Stdin>, tokio::io::Stdout>;

/// Newline framing over a TCP stream
pub type TcpTransport = LineTransport<BufReader<OwnedReadHalf>, OwnedWriteHalf>;

impl<R, W> LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Build a transport from already-open read and write halves
    pub fn new(reader: R, writer: W, config: TransportConfig) -> Self {
        Self {
            config,
            reader: AsyncMutex::new(Some(reader)),
            writer: AsyncMutex::new(Some(writer)),
            shutdown: CancelToken::new(),
            status: RwLock::new(ConnectionStatus::Disconnected),
            stats: Mutex::new(TransportStats::default()),
        }
    }

    async fn read_next_line(&self) -> MCPResult<Option<String>> {
        let mut guard = self.reader.lock().await;
        let reader = match guard.as_mut() {
            Some(reader) => reader,
            None => return Ok(None),
        };

        let mut line = String::new();
        let bytes = reader.read_line(&mut line).await.map_err(|e| {
            *self.status.write() = ConnectionStatus::Failed(e.to_string());
            MCPError::transport(format!("read failed: {}", e))
        })?;

        if bytes == 0 {
            debug!("Transport reached end of stream");
            *self.status.write() = ConnectionStatus::Closed;
            return Ok(None);
        }

        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }

        if line.len() > self.config.max_message_size {
            return Err(MCPError::transport(format!(
                "inbound message of {} bytes exceeds limit of {}",
                line.len(),
                self.config.max_message_size
            )));
        }

        self.stats.lock().update_received(bytes);
        Ok(Some(line))
    }
}

impl StdioTransport {
    /// Transport over this process's standard input and output
    pub fn stdio() -> Self {
        Self::stdio_with_config(TransportConfig::stdio())
    }

    pub fn stdio_with_config(config: TransportConfig) -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), config)
    }
}

impl TcpTransport {
    /// Wrap an accepted TCP stream
    pub fn tcp(stream: TcpStream, config: TransportConfig) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self::new(BufReader::new(read_half), write_half, config)
    }

    /// Connect out to a TCP endpoint
    pub async fn connect(addr: &str, config: TransportConfig) -> MCPResult<Self> {
        debug!("Connecting to TCP endpoint {}", addr);
        let connect = TcpStream::connect(addr);
        let stream = tokio::time::timeout(config.connect_timeout, connect)
            .await
            .map_err(|_| {
                MCPError::connection(format!(
                    "connect to {} timed out after {:?}",
                    addr, config.connect_timeout
                ))
            })?
            .map_err(|e| MCPError::connection(format!("connect to {} failed: {}", addr, e)))?;

        let transport = Self::tcp(stream, config);
        transport.start().await?;
        Ok(transport)
    }
}

#[async_trait]
impl<R, W> MCPTransport for LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn start(&self) -> MCPResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(MCPError::connection("transport already stopped"));
        }
        *self.status.write() = ConnectionStatus::Connected;
        self.stats.lock().mark_connected();
        Ok(())
    }

    async fn read_message(&self) -> MCPResult<Option<String>> {
        if self.shutdown.is_cancelled() {
            return Ok(None);
        }
        tokio::select! {
            _ = self.shutdown.cancelled() => Ok(None),
            result = self.read_next_line() => result,
        }
    }

    async fn write_message(&self, message: &str) -> MCPResult<()> {
        debug_assert!(
            !message.contains('\n'),
            "framed messages must not contain raw newlines"
        );
        if message.len() > self.config.max_message_size {
            return Err(MCPError::transport(format!(
                "outbound message of {} bytes exceeds limit of {}",
                message.len(),
                self.config.max_message_size
            )));
        }

        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| MCPError::connection("transport is not writable"))?;

        writer.write_all(message.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        self.stats.lock().update_sent(message.len() + 1);
        Ok(())
    }

    async fn stop(&self) -> MCPResult<()> {
        self.shutdown.cancel();

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                warn!("Error shutting down transport writer: {}", e);
            }
        }
        self.reader.lock().await.take();

        *self.status.write() = ConnectionStatus::Closed;
        debug!("Line transport stopped");
        Ok(())
    }

    fn is_active(&self) -> bool {
        *self.status.read() == ConnectionStatus::Connected
    }

    fn status(&self) -> ConnectionStatus {
        self.status.read().clone()
    }

    fn stats(&self) -> TransportStats {
        self.stats.lock().clone()
    }

    fn config(&self) -> &TransportConfig {
        &self.config
    }
}
