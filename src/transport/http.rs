//! One-shot HTTP transport
//!
//! Server-side transport where every accepted connection carries exactly
//! one POSTed message and one response. `read_message` accepts a
//! connection, validates the request and hands back the body; the
//! connection then waits until `write_message` sends the reply and
//! closes it. A one-permit gate keeps the next accept parked until that
//! reply is fully written, so request/response pairs can never
//! interleave on the wire. Bodies that can never be answered (a
//! notification carries no request id) are acknowledged with an empty
//! `202 Accepted` right away and the gate stays open.

use std::net::SocketAddr;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{MCPError, MCPResult};
use crate::transport::{ConnectionStatus, MCPTransport, TransportConfig, TransportStats};

/// HTTP transport serving one request/response pair per connection
pub struct HttpTransport {
    config: TransportConfig,
    listener: AsyncMutex<Option<TcpListener>>,
    /// Connection whose POST has been read and whose response is still owed
    pending_reply: AsyncMutex<Option<TcpStream>>,
    /// One permit; held (forgotten) from accept until the response is written
    accept_gate: Semaphore,
    shutdown: CancelToken,
    status: RwLock<ConnectionStatus>,
    stats: Mutex<TransportStats>,
    local_addr: RwLock<Option<SocketAddr>>,
}

enum RequestOutcome {
    /// Valid POST; the stream is parked for `write_message`
    Accepted { stream: TcpStream, body: String },
    /// Request rejected and connection closed; accept the next one
    Rejected,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            listener: AsyncMutex::new(None),
            pending_reply: AsyncMutex::new(None),
            accept_gate: Semaphore::new(1),
            shutdown: CancelToken::new(),
            status: RwLock::new(ConnectionStatus::Disconnected),
            stats: Mutex::new(TransportStats::default()),
            local_addr: RwLock::new(None),
        }
    }

    /// Bind the endpoint and return a ready transport
    pub async fn bind(endpoint: impl Into<String>) -> MCPResult<Self> {
        let transport = Self::new(TransportConfig::http(endpoint));
        transport.start().await?;
        Ok(transport)
    }

    /// Actual bound address, useful when the endpoint asked for port 0
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    async fn read_one_request(&self, stream: TcpStream) -> MCPResult<RequestOutcome> {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();

        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            debug!("HTTP peer closed before sending a request line");
            return Ok(RequestOutcome::Rejected);
        }

        let (method, target) = match parse_request_line(line.trim_end()) {
            Some(parts) => parts,
            None => {
                let mut stream = reader.into_inner();
                respond_empty(&mut stream, "400 Bad Request").await;
                return Ok(RequestOutcome::Rejected);
            }
        };

        if method != "POST" {
            debug!("Rejecting {} {} with 405", method, target);
            let mut stream = reader.into_inner();
            respond_empty(&mut stream, "405 Method Not Allowed").await;
            return Ok(RequestOutcome::Rejected);
        }

        let mut content_length: Option<usize> = None;
        loop {
            line.clear();
            let bytes = reader.read_line(&mut line).await?;
            if bytes == 0 {
                debug!("HTTP peer closed mid-headers");
                return Ok(RequestOutcome::Rejected);
            }
            let header = line.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some(value) = header_value(header, "content-length") {
                content_length = value.parse().ok();
            }
        }

        let length = match content_length {
            Some(length) if length > 0 && length <= self.config.max_message_size => length,
            Some(length) if length > self.config.max_message_size => {
                warn!(
                    "Rejecting HTTP request: body of {} bytes exceeds limit of {}",
                    length, self.config.max_message_size
                );
                let mut stream = reader.into_inner();
                respond_empty(&mut stream, "400 Bad Request").await;
                return Ok(RequestOutcome::Rejected);
            }
            _ => {
                debug!("Rejecting HTTP request without a usable Content-Length");
                let mut stream = reader.into_inner();
                respond_empty(&mut stream, "400 Bad Request").await;
                return Ok(RequestOutcome::Rejected);
            }
        };

        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await?;
        let body = String::from_utf8(body)
            .map_err(|_| MCPError::transport("request body is not valid UTF-8"))?;

        Ok(RequestOutcome::Accepted {
            stream: reader.into_inner(),
            body,
        })
    }
}

#[async_trait]
impl MCPTransport for HttpTransport {
    async fn start(&self) -> MCPResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(MCPError::connection("transport already stopped"));
        }
        *self.status.write() = ConnectionStatus::Connecting;

        let listener = match TcpListener::bind(&self.config.endpoint).await {
            Ok(listener) => listener,
            Err(e) => {
                *self.status.write() = ConnectionStatus::Failed(e.to_string());
                return Err(MCPError::connection(format!(
                    "bind {} failed: {}",
                    self.config.endpoint, e
                )));
            }
        };

        let addr = listener.local_addr()?;
        *self.local_addr.write() = Some(addr);
        *self.listener.lock().await = Some(listener);
        *self.status.write() = ConnectionStatus::Connected;
        self.stats.lock().mark_connected();

        info!("HTTP transport listening on {}", addr);
        Ok(())
    }

    async fn read_message(&self) -> MCPResult<Option<String>> {
        if self.shutdown.is_cancelled() {
            return Ok(None);
        }

        // Wait out any response still being written; requests must not
        // overlap on the wire.
        let permit = tokio::select! {
            _ = self.shutdown.cancelled() => return Ok(None),
            permit = self.accept_gate.acquire() => {
                permit.map_err(|_| MCPError::connection("transport stopped"))?
            }
        };

        loop {
            let stream = {
                let guard = self.listener.lock().await;
                let listener = guard
                    .as_ref()
                    .ok_or_else(|| MCPError::connection("http transport is not started"))?;
                tokio::select! {
                    _ = self.shutdown.cancelled() => return Ok(None),
                    accepted = listener.accept() => {
                        let (stream, peer) = accepted
                            .map_err(|e| MCPError::transport(format!("accept failed: {}", e)))?;
                        debug!("Accepted HTTP connection from {}", peer);
                        stream
                    }
                }
            };

            let outcome = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(None),
                outcome = self.read_one_request(stream) => outcome?,
            };

            match outcome {
                RequestOutcome::Accepted { mut stream, body } => {
                    self.stats.lock().update_received(body.len());
                    if !expects_reply(&body) {
                        // No response will ever be written for this body;
                        // finish the one-shot cycle now. The permit drops
                        // on return, reopening the gate.
                        debug!("Acknowledging id-less HTTP body with 202");
                        respond_empty(&mut stream, "202 Accepted").await;
                        return Ok(Some(body));
                    }
                    *self.pending_reply.lock().await = Some(stream);
                    // Keep the gate closed until write_message reopens it.
                    permit.forget();
                    return Ok(Some(body));
                }
                RequestOutcome::Rejected => continue,
            }
        }
    }

    async fn write_message(&self, message: &str) -> MCPResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(MCPError::connection("transport stopped"));
        }
        if message.len() > self.config.max_message_size {
            return Err(MCPError::transport(format!(
                "outbound message of {} bytes exceeds limit of {}",
                message.len(),
                self.config.max_message_size
            )));
        }

        let mut stream = self
            .pending_reply
            .lock()
            .await
            .take()
            .ok_or_else(|| MCPError::connection("no request is awaiting a response"))?;

        let result = write_response(&mut stream, message).await;
        let _ = stream.shutdown().await;
        // Response done (or dead either way); let the next accept through.
        self.accept_gate.add_permits(1);
        result?;

        self.stats.lock().update_sent(message.len());
        Ok(())
    }

    async fn stop(&self) -> MCPResult<()> {
        self.shutdown.cancel();

        if let Some(mut stream) = self.pending_reply.lock().await.take() {
            let _ = stream.shutdown().await;
            // The reader forgot its permit when it parked this stream.
            self.accept_gate.add_permits(1);
        }
        self.listener.lock().await.take();

        *self.status.write() = ConnectionStatus::Closed;
        debug!("HTTP transport stopped");
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

async fn write_response(stream: &mut TcpStream, body: &str) -> MCPResult<()> {
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

async fn respond_empty(stream: &mut TcpStream, status: &str) {
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        status
    );
    if let Err(e) = stream.write_all(head.as_bytes()).await {
        debug!("Failed to write {} response: {}", status, e);
        return;
    }
    let _ = stream.flush().await;
    let _ = stream.shutdown().await;
}

/// Whether the engine will ever answer this body
///
/// A reply requires a usable request id: a top-level object whose `id`
/// is a string or an integer. Notifications omit the id, and a payload
/// the engine cannot decode yields no reply either, so their
/// connections must not wait for one.
fn expects_reply(body: &str) -> bool {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(object)) => {
            matches!(object.get("id"), Some(id) if id.is_string() || id.is_i64())
        }
        _ => false,
    }
}

fn parse_request_line(line: &str) -> Option<(&str, &str)> {
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    Some((method, target))
}

pub(crate) fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (field, value) = line.split_once(':')?;
    if field.trim().eq_ignore_ascii_case(name) {
        Some(value.trim())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_line() {
        assert_eq!(
            parse_request_line("POST / HTTP/1.1"),
            Some(("POST", "/"))
        );
        assert_eq!(
            parse_request_line("GET /mcp HTTP/1.1"),
            Some(("GET", "/mcp"))
        );
        assert_eq!(parse_request_line(""), None);
        assert_eq!(parse_request_line("POST"), None);
    }

    #[test]
    fn test_expects_reply_tracks_the_request_id() {
        assert!(expects_reply(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#));
        assert!(expects_reply(r#"{"jsonrpc":"2.0","id":"a","method":"ping"}"#));
        // Response shapes carry an id too; the engine answers them with
        // an error, so their connections wait like any request.
        assert!(expects_reply(r#"{"jsonrpc":"2.0","id":7,"result":{}}"#));

        // Nothing below ever gets a response written.
        assert!(!expects_reply(
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#
        ));
        assert!(!expects_reply(r#"{"jsonrpc":"2.0","id":null,"method":"m"}"#));
        assert!(!expects_reply(r#"{"jsonrpc":"2.0","id":1.5,"method":"m"}"#));
        assert!(!expects_reply("not json at all"));
        assert!(!expects_reply(r#"["jsonrpc","2.0"]"#));
    }

    #[test]
    fn test_header_value_is_case_insensitive() {
        assert_eq!(
            header_value("Content-Length: 42", "content-length"),
            Some("42")
        );
        assert_eq!(
            header_value("CONTENT-LENGTH:  7 ", "content-length"),
            Some("7")
        );
        assert_eq!(header_value("Content-Type: text/plain", "content-length"), None);
        assert_eq!(header_value("no colon here", "content-length"), None);
    }

    #[tokio::test]
    async fn test_bind_assigns_local_addr() {
        let transport = HttpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(transport.status(), ConnectionStatus::Connected);
        transport.stop().await.unwrap();
        assert_eq!(transport.status(), ConnectionStatus::Closed);
    }

    #[tokio::test]
    async fn test_write_without_pending_request_fails() {
        let transport = HttpTransport::bind("127.0.0.1:0").await.unwrap();
        let err = transport.write_message("{}").await.unwrap_err();
        assert!(err.to_string().contains("no request"));
        transport.stop().await.unwrap();
    }
}
