//! WebSocket transport
//!
//! Server-side transport over a single WebSocket connection. The
//! listener accepts one peer, answers the RFC 6455 opening handshake and
//! then exchanges unfragmented text frames: client frames arrive masked
//! and are unmasked here, server frames go out unmasked. A close frame
//! or any unsupported opcode ends the stream.

use std::net::SocketAddr;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::{MCPError, MCPResult};
use crate::transport::http::header_value;
use crate::transport::{ConnectionStatus, MCPTransport, TransportConfig, TransportStats};

/// Fixed GUID appended to the client key when computing the accept hash
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const OPCODE_TEXT: u8 = 0x1;
const OPCODE_CLOSE: u8 = 0x8;

/// WebSocket transport serving a single connection
pub struct WebSocketTransport {
    config: TransportConfig,
    listener: AsyncMutex<Option<TcpListener>>,
    reader: AsyncMutex<Option<BufReader<OwnedReadHalf>>>,
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
    shutdown: CancelToken,
    status: RwLock<ConnectionStatus>,
    stats: Mutex<TransportStats>,
    local_addr: RwLock<Option<SocketAddr>>,
}

impl WebSocketTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            listener: AsyncMutex::new(None),
            reader: AsyncMutex::new(None),
            writer: AsyncMutex::new(None),
            shutdown: CancelToken::new(),
            status: RwLock::new(ConnectionStatus::Disconnected),
            stats: Mutex::new(TransportStats::default()),
            local_addr: RwLock::new(None),
        }
    }

    /// Bind the endpoint and return a transport awaiting its peer
    pub async fn bind(endpoint: impl Into<String>) -> MCPResult<Self> {
        let transport = Self::new(TransportConfig::websocket(endpoint));
        transport.start().await?;
        Ok(transport)
    }

    /// Actual bound address, useful when the endpoint asked for port 0
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    async fn accept_and_handshake(&self) -> MCPResult<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
        let stream = {
            let guard = self.listener.lock().await;
            let listener = guard
                .as_ref()
                .ok_or_else(|| MCPError::connection("websocket transport is not started"))?;
            let (stream, peer) = listener
                .accept()
                .await
                .map_err(|e| MCPError::transport(format!("accept failed: {}", e)))?;
            debug!("Accepted WebSocket connection from {}", peer);
            stream
        };

        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut writer = write_half;

        let key = match read_handshake_request(&mut reader).await? {
            Some(key) => key,
            None => {
                let _ = writer
                    .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .await;
                let _ = writer.shutdown().await;
                return Err(MCPError::handshake(
                    "opening request is not a GET with a Sec-WebSocket-Key",
                ));
            }
        };

        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
            accept_key(&key)
        );
        writer.write_all(response.as_bytes()).await?;
        writer.flush().await?;
        debug!("WebSocket handshake complete");

        Ok((reader, writer))
    }
}

#[async_trait]
impl MCPTransport for WebSocketTransport {
    async fn start(&self) -> MCPResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(MCPError::connection("transport already stopped"));
        }

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
        // Connected only once a peer completes the handshake
        *self.status.write() = ConnectionStatus::Connecting;

        info!("WebSocket transport listening on {}", addr);
        Ok(())
    }

    async fn read_message(&self) -> MCPResult<Option<String>> {
        if self.shutdown.is_cancelled() {
            return Ok(None);
        }

        let mut guard = self.reader.lock().await;
        if guard.is_none() {
            let (read_half, write_half) = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(None),
                result = self.accept_and_handshake() => result?,
            };
            *guard = Some(read_half);
            *self.writer.lock().await = Some(write_half);
            *self.status.write() = ConnectionStatus::Connected;
            self.stats.lock().mark_connected();
        }
        let reader = match guard.as_mut() {
            Some(reader) => reader,
            None => return Ok(None),
        };

        let frame = tokio::select! {
            _ = self.shutdown.cancelled() => return Ok(None),
            frame = read_frame(reader, self.config.max_message_size) => frame?,
        };

        match frame {
            Some(payload) => {
                let text = String::from_utf8(payload)
                    .map_err(|_| MCPError::transport("text frame is not valid UTF-8"))?;
                self.stats.lock().update_received(text.len());
                Ok(Some(text))
            }
            None => {
                debug!("WebSocket peer closed the connection");
                *self.status.write() = ConnectionStatus::Closed;
                Ok(None)
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

        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| MCPError::connection("no websocket peer is connected"))?;

        let frame = encode_text_frame(message.as_bytes());
        writer.write_all(&frame).await?;
        writer.flush().await?;

        self.stats.lock().update_sent(message.len());
        Ok(())
    }

    async fn stop(&self) -> MCPResult<()> {
        self.shutdown.cancel();

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.write_all(&[0x88, 0x00]).await; // close frame
            let _ = writer.shutdown().await;
        }
        self.reader.lock().await.take();
        self.listener.lock().await.take();

        *self.status.write() = ConnectionStatus::Closed;
        debug!("WebSocket transport stopped");
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

/// Compute the Sec-WebSocket-Accept value for a client key
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    base64::encode(hasher.finalize())
}

/// XOR a payload with its 4-byte masking key, in place
///
/// Applying the same key twice restores the original bytes, so this
/// serves both masking and unmasking.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Build an unmasked, unfragmented text frame
pub fn encode_text_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 10);
    frame.push(0x80 | OPCODE_TEXT); // FIN set, text opcode

    if payload.len() <= 125 {
        frame.push(payload.len() as u8);
    } else if payload.len() <= u16::MAX as usize {
        frame.push(126);
        frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    } else {
        frame.push(127);
        frame.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    }

    frame.extend_from_slice(payload);
    frame
}

/// Read one frame, returning its unmasked payload
///
/// `Ok(None)` when the stream ends cleanly between frames, on a close
/// frame, or on any opcode other than an unfragmented text frame.
pub async fn read_frame<R>(reader: &mut R, max_payload: usize) -> MCPResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let fin = header[0] & 0x80 != 0;
    let opcode = header[0] & 0x0f;
    if opcode == OPCODE_CLOSE {
        debug!("Received close frame");
        return Ok(None);
    }
    if opcode != OPCODE_TEXT || !fin {
        debug!("Unsupported frame (opcode {:#x}, fin {}), closing", opcode, fin);
        return Ok(None);
    }

    let masked = header[1] & 0x80 != 0;
    let mut payload_len = u64::from(header[1] & 0x7f);
    if payload_len == 126 {
        let mut ext = [0u8; 2];
        reader.read_exact(&mut ext).await?;
        payload_len = u64::from(u16::from_be_bytes(ext));
    } else if payload_len == 127 {
        let mut ext = [0u8; 8];
        reader.read_exact(&mut ext).await?;
        payload_len = u64::from_be_bytes(ext);
    }

    if payload_len > max_payload as u64 {
        return Err(MCPError::transport(format!(
            "frame payload of {} bytes exceeds limit of {}",
            payload_len, max_payload
        )));
    }

    let mask = if masked {
        let mut key = [0u8; 4];
        reader.read_exact(&mut key).await?;
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; payload_len as usize];
    reader.read_exact(&mut payload).await?;
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    Ok(Some(payload))
}

async fn read_handshake_request<R>(reader: &mut R) -> MCPResult<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let bytes = reader.read_line(&mut line).await?;
    if bytes == 0 {
        return Ok(None);
    }
    let is_get = line.trim_end().split_whitespace().next() == Some("GET");

    let mut key = None;
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some(value) = header_value(header, "sec-websocket-key") {
            key = Some(value.to_string());
        }
    }

    if !is_get {
        return Ok(None);
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 1024 * 1024;

    #[test]
    fn test_accept_key_rfc_vector() {
        // Example from RFC 6455 section 1.3
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_apply_mask_xors_each_byte() {
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let original = b"ping!".to_vec();
        let mut payload = original.clone();

        apply_mask(&mut payload, key);
        for (i, byte) in payload.iter().enumerate() {
            assert_eq!(*byte, original[i] ^ key[i % 4]);
        }

        apply_mask(&mut payload, key);
        assert_eq!(payload, original);
    }

    #[test]
    fn test_encode_small_text_frame() {
        let frame = encode_text_frame(b"pong");
        assert_eq!(frame, vec![0x81, 0x04, b'p', b'o', b'n', b'g']);
    }

    #[tokio::test]
    async fn test_masked_client_frame_is_unmasked() {
        let key = [0x11, 0x22, 0x33, 0x44];
        let mut payload = b"ping".to_vec();
        apply_mask(&mut payload, key);

        let mut frame = vec![0x81, 0x80 | 0x04];
        frame.extend_from_slice(&key);
        frame.extend_from_slice(&payload);

        let mut input: &[u8] = &frame;
        let result = read_frame(&mut input, MAX).await.unwrap();
        assert_eq!(result, Some(b"ping".to_vec()));
    }

    #[tokio::test]
    async fn test_sixteen_bit_extended_length() {
        let payload = vec![0xAB; 200];
        let frame = encode_text_frame(&payload);
        assert_eq!(frame[1], 126);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]), 200);

        let mut input: &[u8] = &frame;
        let result = read_frame(&mut input, MAX).await.unwrap();
        assert_eq!(result, Some(payload));
    }

    #[tokio::test]
    async fn test_sixty_four_bit_extended_length() {
        let payload = vec![0x5A; 70_000];
        let frame = encode_text_frame(&payload);
        assert_eq!(frame[1], 127);
        assert_eq!(
            u64::from_be_bytes([
                frame[2], frame[3], frame[4], frame[5], frame[6], frame[7], frame[8], frame[9],
            ]),
            70_000
        );

        let mut input: &[u8] = &frame;
        let result = read_frame(&mut input, MAX).await.unwrap();
        assert_eq!(result.map(|p| p.len()), Some(70_000));
    }

    #[tokio::test]
    async fn test_close_frame_ends_stream() {
        let mut input: &[u8] = &[0x88, 0x00];
        assert_eq!(read_frame(&mut input, MAX).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_binary_frame_ends_stream() {
        let mut input: &[u8] = &[0x82, 0x02, 0x01, 0x02];
        assert_eq!(read_frame(&mut input, MAX).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clean_eof_between_frames() {
        let mut input: &[u8] = &[];
        assert_eq!(read_frame(&mut input, MAX).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let frame = encode_text_frame(&vec![0u8; 300]);
        let mut input: &[u8] = &frame;
        assert!(read_frame(&mut input, 256).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_reports_connecting_until_handshake() {
        let transport = WebSocketTransport::bind("127.0.0.1:0").await.unwrap();
        assert!(transport.local_addr().is_some());
        assert_eq!(transport.status(), ConnectionStatus::Connecting);
        transport.stop().await.unwrap();
    }
}
