//! Transport layer for MCP connections
//!
//! A transport carries framed text messages between two endpoints and
//! nothing else: framing and byte movement live here, JSON encoding and
//! decoding stay with the protocol engines. All transports expose the
//! same `MCPTransport` trait so clients and servers can run over stdio,
//! TCP, HTTP or WebSocket without caring which.

pub mod http;
pub mod line;
pub mod ws;

pub use http::HttpTransport;
pub use line::{LineTransport, StdioTransport, TcpTransport};
pub use ws::WebSocketTransport;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MCPError, MCPResult};

/// Which kind of byte stream a transport runs over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Newline-delimited messages over the process's stdin/stdout
    Stdio,
    /// Newline-delimited messages over a TCP stream
    Tcp,
    /// One request/response pair per accepted HTTP connection
    Http,
    /// Single-connection WebSocket with text frames
    WebSocket,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::Http => write!(f, "http"),
            TransportKind::WebSocket => write!(f, "websocket"),
        }
    }
}

/// Connection status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
    Closed,
}

/// Transport statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub last_activity: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl TransportStats {
    pub fn update_sent(&mut self, bytes: usize) {
        self.messages_sent += 1;
        self.bytes_sent += bytes as u64;
        self.last_activity = Some(Utc::now());
    }

    pub fn update_received(&mut self, bytes: usize) {
        self.messages_received += 1;
        self.bytes_received += bytes as u64;
        self.last_activity = Some(Utc::now());
    }

    pub fn mark_connected(&mut self) {
        self.connected_at = Some(Utc::now());
    }

    /// Seconds since the transport came up, if it ever did
    pub fn uptime_seconds(&self) -> Option<i64> {
        self.connected_at
            .map(|start| (Utc::now() - start).num_seconds())
    }
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Transport kind to create
    pub kind: TransportKind,
    /// Bind address for server-side transports, connect address for TCP
    /// clients; unused for stdio
    pub endpoint: String,
    /// How long an outbound TCP connect may take
    pub connect_timeout: Duration,
    /// Upper bound on a single framed message, in bytes
    pub max_message_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Stdio,
            endpoint: String::new(),
            connect_timeout: Duration::from_secs(10),
            max_message_size: 1024 * 1024, // 1MB
        }
    }
}

impl TransportConfig {
    pub fn stdio() -> Self {
        Self::default()
    }

    pub fn tcp(endpoint: impl Into<String>) -> Self {
        Self {
            kind: TransportKind::Tcp,
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn http(endpoint: impl Into<String>) -> Self {
        Self {
            kind: TransportKind::Http,
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn websocket(endpoint: impl Into<String>) -> Self {
        Self {
            kind: TransportKind::WebSocket,
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    pub fn validate(&self) -> MCPResult<()> {
        if self.kind != TransportKind::Stdio && self.endpoint.is_empty() {
            return Err(MCPError::configuration(format!(
                "{} transport requires an endpoint",
                self.kind
            )));
        }
        if self.max_message_size == 0 {
            return Err(MCPError::configuration(
                "max_message_size must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// A framed, bidirectional message stream
///
/// Implementations take `&self` throughout: one task may sit in
/// `read_message` while others serialize through `write_message`, with
/// the transport's own locks keeping each direction consistent.
#[async_trait]
pub trait MCPTransport: Send + Sync {
    /// Bind or otherwise ready the underlying stream
    async fn start(&self) -> MCPResult<()>;

    /// Read the next inbound message
    ///
    /// Blocks until a message arrives. `Ok(None)` means the peer is gone
    /// for good: end of stream, an orderly close, or `stop` was called.
    async fn read_message(&self) -> MCPResult<Option<String>>;

    /// Frame and send one outbound message
    async fn write_message(&self, message: &str) -> MCPResult<()>;

    /// Tear the transport down
    ///
    /// Wakes any blocked reader with `Ok(None)`. Reads and writes after
    /// this fail immediately or report end of stream; they never hang.
    async fn stop(&self) -> MCPResult<()>;

    /// Whether the transport is currently usable
    fn is_active(&self) -> bool;

    /// Current connection status
    fn status(&self) -> ConnectionStatus;

    /// Snapshot of the transport counters
    fn stats(&self) -> TransportStats;

    /// The configuration this transport was built with
    fn config(&self) -> &TransportConfig;
}

/// Builds transports from configuration
pub struct TransportFactory;

impl TransportFactory {
    /// Create a transport for the given configuration
    ///
    /// TCP is the client-side door and connects out to `endpoint`; HTTP
    /// and WebSocket are server-side doors that bind `endpoint` on
    /// `start`. Stdio serves either role.
    pub async fn create(config: TransportConfig) -> MCPResult<Arc<dyn MCPTransport>> {
        config.validate()?;
        match config.kind {
            TransportKind::Stdio => Ok(Arc::new(StdioTransport::stdio_with_config(config))),
            TransportKind::Tcp => {
                let endpoint = config.endpoint.clone();
                Ok(Arc::new(TcpTransport::connect(&endpoint, config).await?))
            }
            TransportKind::Http => Ok(Arc::new(HttpTransport::new(config))),
            TransportKind::WebSocket => Ok(Arc::new(WebSocketTransport::new(config))),
        }
    }
}
