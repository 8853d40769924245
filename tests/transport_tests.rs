//! Transport integration tests
//!
//! Drives the HTTP and WebSocket transports with raw TCP clients to pin
//! down their wire behavior: status lines, framing bytes, masking, and
//! the request/response barrier.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use mcp_conduit::transport::{HttpTransport, MCPTransport, WebSocketTransport};

async fn read_to_end(stream: &mut TcpStream) -> Vec<u8> {
    let mut data = Vec::new();
    stream.read_to_end(&mut data).await.unwrap();
    data
}

/// A POST with Content-Length delivers exactly that many body bytes, and
/// the reply comes back with the standard JSON headers
#[tokio::test]
async fn test_http_post_delivers_exact_body() {
    let transport = Arc::new(HttpTransport::bind("127.0.0.1:0").await.unwrap());
    let addr = transport.local_addr().unwrap();

    let body = r#"{"x":"hello"}"#;
    assert_eq!(body.len(), 13);

    let mut peer = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "POST / HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        addr,
        body.len(),
        body
    );
    peer.write_all(request.as_bytes()).await.unwrap();

    let inbound = transport.read_message().await.unwrap();
    assert_eq!(inbound.as_deref(), Some(body));

    transport.write_message(r#"{"ok":true}"#).await.unwrap();

    let response = String::from_utf8(read_to_end(&mut peer).await).unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Content-Type: application/json"));
    assert!(response.contains("Content-Length: 11"));
    assert!(response.ends_with(r#"{"ok":true}"#));

    transport.stop().await.unwrap();
    println!("✓ 13-byte POST body delivered verbatim");
}

/// Anything but POST is answered 405, and the transport goes straight
/// back to accepting
#[tokio::test]
async fn test_http_get_is_rejected_with_405() {
    let transport = Arc::new(HttpTransport::bind("127.0.0.1:0").await.unwrap());
    let addr = transport.local_addr().unwrap();

    let read_task = {
        let transport = transport.clone();
        tokio::spawn(async move { transport.read_message().await })
    };

    let mut get_peer = TcpStream::connect(addr).await.unwrap();
    get_peer
        .write_all(format!("GET / HTTP/1.1\r\nHost: {}\r\n\r\n", addr).as_bytes())
        .await
        .unwrap();
    let response = String::from_utf8(read_to_end(&mut get_peer).await).unwrap();
    assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));

    let mut post_peer = TcpStream::connect(addr).await.unwrap();
    post_peer
        .write_all(b"POST / HTTP/1.1\r\nContent-Length: 2\r\n\r\n{}")
        .await
        .unwrap();
    let inbound = read_task.await.unwrap().unwrap();
    assert_eq!(inbound.as_deref(), Some("{}"));

    transport.stop().await.unwrap();
}

/// Requests without a usable Content-Length are rejected with 400
#[tokio::test]
async fn test_http_missing_content_length_is_rejected() {
    let transport = Arc::new(HttpTransport::bind("127.0.0.1:0").await.unwrap());
    let addr = transport.local_addr().unwrap();

    let read_task = {
        let transport = transport.clone();
        tokio::spawn(async move { transport.read_message().await })
    };

    let mut bad_peer = TcpStream::connect(addr).await.unwrap();
    bad_peer
        .write_all(b"POST / HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();
    let response = String::from_utf8(read_to_end(&mut bad_peer).await).unwrap();
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));

    let mut ok_peer = TcpStream::connect(addr).await.unwrap();
    ok_peer
        .write_all(b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nnull")
        .await
        .unwrap();
    let inbound = read_task.await.unwrap().unwrap();
    assert_eq!(inbound.as_deref(), Some("null"));

    transport.stop().await.unwrap();
}

/// A second request is not accepted until the first response is written
#[tokio::test]
async fn test_http_requests_never_interleave() {
    let transport = Arc::new(HttpTransport::bind("127.0.0.1:0").await.unwrap());
    let addr = transport.local_addr().unwrap();

    let mut first = TcpStream::connect(addr).await.unwrap();
    first
        .write_all(b"POST / HTTP/1.1\r\nContent-Length: 7\r\n\r\n\"first\"")
        .await
        .unwrap();
    let inbound = transport.read_message().await.unwrap();
    assert_eq!(inbound.as_deref(), Some("\"first\""));

    // Second reader parks on the gate while the first reply is owed
    let second_read = {
        let transport = transport.clone();
        tokio::spawn(async move { transport.read_message().await })
    };
    let mut second = TcpStream::connect(addr).await.unwrap();
    second
        .write_all(b"POST / HTTP/1.1\r\nContent-Length: 8\r\n\r\n\"second\"")
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        !second_read.is_finished(),
        "second request must wait for the first response"
    );

    transport.write_message("\"done\"").await.unwrap();
    let response = String::from_utf8(read_to_end(&mut first).await).unwrap();
    assert!(response.ends_with("\"done\""));

    let inbound = second_read.await.unwrap().unwrap();
    assert_eq!(inbound.as_deref(), Some("\"second\""));

    transport.stop().await.unwrap();
    println!("✓ Request/response pairs stayed strictly ordered");
}

/// A notification body draws an immediate 202 and no response is owed:
/// the next request gets through without any write in between
#[tokio::test]
async fn test_http_notification_gets_202_without_closing_the_gate() {
    let transport = Arc::new(HttpTransport::bind("127.0.0.1:0").await.unwrap());
    let addr = transport.local_addr().unwrap();

    let body = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
    let mut peer = TcpStream::connect(addr).await.unwrap();
    peer.write_all(
        format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}", body.len(), body).as_bytes(),
    )
    .await
    .unwrap();

    let inbound = transport.read_message().await.unwrap();
    assert_eq!(inbound.as_deref(), Some(body));

    // The notification's connection was already answered and closed.
    let response = String::from_utf8(read_to_end(&mut peer).await).unwrap();
    assert!(response.starts_with("HTTP/1.1 202 Accepted\r\n"));
    assert!(response.contains("Content-Length: 0"));

    // Nothing was written for it, yet the next request is accepted.
    let mut next = TcpStream::connect(addr).await.unwrap();
    next.write_all(b"POST / HTTP/1.1\r\nContent-Length: 24\r\n\r\n{\"jsonrpc\":\"2.0\",\"id\":1}")
        .await
        .unwrap();
    let inbound = tokio::time::timeout(Duration::from_secs(1), transport.read_message())
        .await
        .expect("accept should not be blocked behind the notification")
        .unwrap();
    assert_eq!(inbound.as_deref(), Some(r#"{"jsonrpc":"2.0","id":1}"#));

    transport
        .write_message(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
        .await
        .unwrap();
    let response = String::from_utf8(read_to_end(&mut next).await).unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));

    transport.stop().await.unwrap();
    println!("✓ Notification answered 202 with the accept gate left open");
}

/// RFC 6455 handshake, one masked ping in, one unmasked pong out
#[tokio::test]
async fn test_websocket_handshake_and_frame_exchange() {
    let transport = Arc::new(WebSocketTransport::bind("127.0.0.1:0").await.unwrap());
    let addr = transport.local_addr().unwrap();

    let read_task = {
        let transport = transport.clone();
        tokio::spawn(async move { transport.read_message().await })
    };

    let mut peer = TcpStream::connect(addr).await.unwrap();
    let handshake = format!(
        "GET / HTTP/1.1\r\nHost: {}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
        addr
    );
    peer.write_all(handshake.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        peer.read_exact(&mut byte).await.unwrap();
        response.push(byte[0]);
    }
    let response = String::from_utf8(response).unwrap();
    assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    // Accept value from the RFC 6455 example key
    assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));

    // "ping" masked with key 1,2,3,4
    let key = [1u8, 2, 3, 4];
    let mut payload = b"ping".to_vec();
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
    let mut frame = vec![0x81, 0x80 | 4];
    frame.extend_from_slice(&key);
    frame.extend_from_slice(&payload);
    peer.write_all(&frame).await.unwrap();

    let inbound = read_task.await.unwrap().unwrap();
    assert_eq!(inbound.as_deref(), Some("ping"));

    // The reply is one unmasked text frame, byte for byte
    transport.write_message("pong").await.unwrap();
    let mut reply = [0u8; 6];
    peer.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x81, 0x04, b'p', b'o', b'n', b'g']);

    transport.stop().await.unwrap();
    println!("✓ Handshake and ping/pong frames match the RFC byte layout");
}

/// A close frame from the peer ends the message stream
#[tokio::test]
async fn test_websocket_close_frame_ends_stream() {
    let transport = Arc::new(WebSocketTransport::bind("127.0.0.1:0").await.unwrap());
    let addr = transport.local_addr().unwrap();

    let read_task = {
        let transport = transport.clone();
        tokio::spawn(async move { transport.read_message().await })
    };

    let mut peer = TcpStream::connect(addr).await.unwrap();
    peer.write_all(
        b"GET / HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: abcdefghijklmnop\r\n\r\n",
    )
    .await
    .unwrap();
    peer.write_all(&[0x88, 0x00]).await.unwrap();

    let result = read_task.await.unwrap().unwrap();
    assert_eq!(result, None);

    transport.stop().await.unwrap();
}

/// A non-GET opening request is answered 400 and never upgrades
#[tokio::test]
async fn test_websocket_rejects_non_get_handshake() {
    let transport = Arc::new(WebSocketTransport::bind("127.0.0.1:0").await.unwrap());
    let addr = transport.local_addr().unwrap();

    let read_task = {
        let transport = transport.clone();
        tokio::spawn(async move { transport.read_message().await })
    };

    let mut peer = TcpStream::connect(addr).await.unwrap();
    peer.write_all(b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 0\r\n\r\n")
        .await
        .unwrap();

    let response = String::from_utf8(read_to_end(&mut peer).await).unwrap();
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));

    let err = read_task.await.unwrap().unwrap_err();
    assert!(err.to_string().contains("Sec-WebSocket-Key"));

    transport.stop().await.unwrap();
}
