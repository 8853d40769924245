//! Client/server integration tests
//!
//! Runs a real client against a real server over in-memory pipes (and one
//! test over actual TCP sockets): the full handshake, request correlation,
//! timeouts, cancellation, tools, and resources.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{duplex, split, BufReader};
use tokio::net::TcpListener;

use mcp_conduit::cancel::CancelToken;
use mcp_conduit::client::{MCPClient, MCPClientConfig, NotificationHandler};
use mcp_conduit::error::{MCPError, MCPResult};
use mcp_conduit::protocol::{
    decode_message, encode_message, InitializeResult, MCPMessage, MCPNotification, MCPResponse,
    MessageId, ServerCapabilities, ServerInfo, MCP_PROTOCOL_VERSION,
};
use mcp_conduit::server::{
    DispatchEvent, DispatchObserver, DispatchOutcome, MCPServer, MCPServerConfig, RequestContext,
    RequestHandler,
};
use mcp_conduit::tools::{handler_fn, ParamKind, Tool, ToolContent, ToolParameter};
use mcp_conduit::transport::{LineTransport, MCPTransport, TcpTransport, TransportConfig};

/// Handler that sleeps before answering, for timeout and ordering tests
struct SleepHandler {
    delay: Duration,
    reply: Value,
}

#[async_trait]
impl RequestHandler for SleepHandler {
    async fn handle(&self, _params: Option<Value>, _context: RequestContext) -> MCPResult<Value> {
        tokio::time::sleep(self.delay).await;
        Ok(self.reply.clone())
    }
}

/// Handler that panics, for crash-isolation tests
struct PanicHandler;

#[async_trait]
impl RequestHandler for PanicHandler {
    async fn handle(&self, _params: Option<Value>, _context: RequestContext) -> MCPResult<Value> {
        panic!("kaboom")
    }
}

/// Notification handler that sleeps before recording the delivery
struct SlowNoteHandler {
    delay: Duration,
    handled: Arc<AtomicBool>,
}

#[async_trait]
impl NotificationHandler for SlowNoteHandler {
    async fn handle_notification(&self, _notification: MCPNotification) -> MCPResult<()> {
        tokio::time::sleep(self.delay).await;
        self.handled.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Observer that records every dispatch event
#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<DispatchEvent>>,
}

impl DispatchObserver for RecordingObserver {
    fn on_dispatch(&self, event: DispatchEvent) {
        self.events.lock().push(event);
    }
}

/// Build a connected client/server pair over an in-memory pipe
///
/// The server runs on a spawned task; the returned client has completed
/// the initialize handshake and is ready for requests.
async fn connected_pair(server: MCPServer) -> (MCPClient, MCPServer) {
    let (client_side, server_side) = duplex(64 * 1024);
    let (client_read, client_write) = split(client_side);
    let (server_read, server_write) = split(server_side);

    let server_transport: Arc<dyn MCPTransport> = Arc::new(LineTransport::new(
        BufReader::new(server_read),
        server_write,
        TransportConfig::default(),
    ));
    {
        let server = server.clone();
        tokio::spawn(async move {
            let _ = server.serve(server_transport).await;
        });
    }

    let client_transport = Arc::new(LineTransport::new(
        BufReader::new(client_read),
        client_write,
        TransportConfig::default(),
    ));
    let client = MCPClient::new(client_transport, MCPClientConfig::default());
    client.connect().await.expect("client failed to connect");

    (client, server)
}

async fn default_pair() -> (MCPClient, MCPServer) {
    connected_pair(MCPServer::new(MCPServerConfig::default())).await
}

/// The initialize exchange carries both identities across the wire
#[tokio::test]
async fn test_initialize_handshake() {
    let (client, server) = default_pair().await;

    let info = client.server_info().expect("handshake should record server info");
    assert_eq!(info.name, "mcp-conduit-server");
    assert!(client.server_capabilities().is_some());
    assert!(client.is_ready());
    assert!(server.is_running());

    println!("✓ Handshake completed against {} {}", info.name, info.version);
}

/// ping answers with an empty object result
#[tokio::test]
async fn test_ping_round_trip() {
    let (client, _server) = default_pair().await;

    let value = client.call("ping", None).await.unwrap();
    assert_eq!(value, json!({}));

    let rtt = client.ping().await.unwrap();
    assert!(rtt < Duration::from_secs(1));
}

/// An unknown method comes back as a -32601 fault carrying the method name
#[tokio::test]
async fn test_unknown_method_is_method_not_found() {
    let (client, _server) = default_pair().await;

    let err = client.call("foo/bar", None).await.unwrap_err();
    match err {
        MCPError::Protocol(fault) => {
            assert_eq!(fault.code, -32601);
            assert!(fault.message.contains("foo/bar"));
        }
        other => panic!("expected a protocol fault, got {:?}", other),
    }
}

/// The same unknown method as a notification draws no reply at all
#[tokio::test]
async fn test_unknown_notification_is_silent() {
    let (client, server) = default_pair().await;

    client.notify("foo/bar", None).await.unwrap();

    // A follow-up round trip proves the connection survived and flushes
    // the inbound queue; the notification itself was counted and dropped.
    client.ping().await.unwrap();
    assert_eq!(client.pending_requests(), 0);

    let stats = server.stats();
    // initialized + foo/bar
    assert_eq!(stats.notifications_received, 2);
}

/// A response-shaped message sent to the server draws an invalid-request
/// fault echoing its id, not silence
#[tokio::test]
async fn test_server_answers_stray_response_with_invalid_request() {
    let (peer_side, server_side) = duplex(64 * 1024);
    let (peer_read, peer_write) = split(peer_side);
    let (server_read, server_write) = split(server_side);

    let server = MCPServer::new(MCPServerConfig::default());
    let server_transport: Arc<dyn MCPTransport> = Arc::new(LineTransport::new(
        BufReader::new(server_read),
        server_write,
        TransportConfig::default(),
    ));
    {
        let server = server.clone();
        tokio::spawn(async move {
            let _ = server.serve(server_transport).await;
        });
    }

    let peer = LineTransport::new(
        BufReader::new(peer_read),
        peer_write,
        TransportConfig::default(),
    );
    peer.write_message(r#"{"jsonrpc":"2.0","id":7,"result":{}}"#)
        .await
        .unwrap();

    let raw = tokio::time::timeout(Duration::from_secs(1), peer.read_message())
        .await
        .expect("the stray response should draw a reply")
        .unwrap()
        .unwrap();
    let reply = match decode_message(&raw) {
        Ok(MCPMessage::Response(reply)) => reply,
        other => panic!("expected a response, got {:?}", other),
    };
    assert_eq!(reply.id, MessageId::Number(7));
    let fault = reply.error.expect("reply should carry an error");
    assert_eq!(fault.code, -32600);
    assert!(fault.message.contains("not a valid request"));
}

/// Responses resolve by id, not by arrival order
#[tokio::test]
async fn test_concurrent_requests_resolve_out_of_order() {
    let server = MCPServer::new(MCPServerConfig::default());
    server.register_handler(
        "test/slow",
        Arc::new(SleepHandler {
            delay: Duration::from_millis(150),
            reply: json!("slow done"),
        }),
    );
    let (client, _server) = connected_pair(server).await;

    let started = Instant::now();
    let slow = async {
        let result = client.call("test/slow", None).await;
        (result, started.elapsed())
    };
    let fast = async {
        let result = client.call("ping", None).await;
        (result, started.elapsed())
    };

    let ((slow_result, slow_elapsed), (fast_result, fast_elapsed)) = tokio::join!(slow, fast);

    assert_eq!(slow_result.unwrap(), json!("slow done"));
    assert!(fast_result.is_ok());
    assert!(
        fast_elapsed < slow_elapsed,
        "fast call should finish first ({:?} vs {:?})",
        fast_elapsed,
        slow_elapsed
    );

    println!("✓ Fast call resolved in {:?} while slow took {:?}", fast_elapsed, slow_elapsed);
}

/// A slow notification handler runs on its own task; the receive loop
/// stays free to correlate the responses queued behind the notification
#[tokio::test]
async fn test_slow_notification_handler_does_not_stall_responses() {
    let (client_side, peer_side) = duplex(64 * 1024);
    let (client_read, client_write) = split(client_side);
    let (peer_read, peer_write) = split(peer_side);

    // Scripted peer: answers the handshake, then wedges a notification in
    // front of every further response it writes.
    let peer = LineTransport::new(
        BufReader::new(peer_read),
        peer_write,
        TransportConfig::default(),
    );
    tokio::spawn(async move {
        while let Ok(Some(raw)) = peer.read_message().await {
            let request = match decode_message(&raw) {
                Ok(MCPMessage::Request(request)) => request,
                _ => continue,
            };
            let result = if request.method == "initialize" {
                serde_json::to_value(InitializeResult {
                    protocol_version: MCP_PROTOCOL_VERSION.to_string(),
                    server_info: ServerInfo {
                        name: "scripted-peer".to_string(),
                        version: "0.0.0".to_string(),
                    },
                    capabilities: ServerCapabilities::default(),
                })
                .unwrap()
            } else {
                let note = MCPMessage::Notification(MCPNotification::new("progress/update"));
                let _ = peer.write_message(&encode_message(&note).unwrap()).await;
                json!("echoed")
            };
            let reply = MCPMessage::Response(MCPResponse::success(request.id, result));
            let _ = peer.write_message(&encode_message(&reply).unwrap()).await;
        }
    });

    let client_transport = Arc::new(LineTransport::new(
        BufReader::new(client_read),
        client_write,
        TransportConfig::default(),
    ));
    let client = MCPClient::new(client_transport, MCPClientConfig::default());

    let handled = Arc::new(AtomicBool::new(false));
    client.register_notification_handler(
        "progress/update",
        Arc::new(SlowNoteHandler {
            delay: Duration::from_millis(400),
            handled: handled.clone(),
        }),
    );
    client.connect().await.unwrap();

    let started = Instant::now();
    let value = client.call("test/echo", None).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(value, json!("echoed"));
    assert!(
        elapsed < Duration::from_millis(200),
        "response was held behind the notification handler ({:?})",
        elapsed
    );

    // The handler itself still ran to completion.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(handled.load(Ordering::SeqCst));

    println!("✓ Response resolved in {:?} with the handler still sleeping", elapsed);
}

/// A request that misses its deadline resolves as a timeout and leaves no
/// entry behind in the pending table
#[tokio::test]
async fn test_timeout_empties_pending_table() {
    let server = MCPServer::new(MCPServerConfig::default());
    server.register_handler(
        "test/slow",
        Arc::new(SleepHandler {
            delay: Duration::from_secs(10),
            reply: Value::Null,
        }),
    );
    let (client, _server) = connected_pair(server).await;

    let started = Instant::now();
    let err = client
        .call_with_options("test/slow", None, Duration::from_millis(50), CancelToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, MCPError::Timeout { timeout_ms: 50 }));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(client.pending_requests(), 0);
    assert_eq!(client.stats().timeout_requests, 1);

    println!("✓ Timed out in {:?} with a clean pending table", started.elapsed());
}

/// A cancelled request resolves promptly with Cancelled, not Timeout
#[tokio::test]
async fn test_cancellation_resolves_promptly() {
    let server = MCPServer::new(MCPServerConfig::default());
    server.register_handler(
        "test/slow",
        Arc::new(SleepHandler {
            delay: Duration::from_secs(10),
            reply: Value::Null,
        }),
    );
    let (client, _server) = connected_pair(server).await;

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
    }

    let started = Instant::now();
    let err = client
        .call_with_options("test/slow", None, Duration::from_secs(30), cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, MCPError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(client.pending_requests(), 0);
    assert_eq!(client.stats().cancelled_requests, 1);
}

/// A panicking handler becomes a sanitized -32603 reply instead of
/// tearing the connection down
#[tokio::test]
async fn test_handler_panic_surfaces_as_internal_error() {
    let server = MCPServer::new(MCPServerConfig::default());
    server.register_handler("test/panic", Arc::new(PanicHandler));
    let (client, _server) = connected_pair(server).await;

    let err = client.call("test/panic", None).await.unwrap_err();
    match err {
        MCPError::Protocol(fault) => {
            assert_eq!(fault.code, -32603);
            assert_eq!(fault.message, "Internal error");
            let data = fault.data.expect("detail should travel in data");
            assert!(data.as_str().unwrap_or("").contains("panicked"));
        }
        other => panic!("expected a protocol fault, got {:?}", other),
    }

    // Connection is still alive
    client.ping().await.unwrap();
}

/// initialize without parameters is an invalid-params fault
#[tokio::test]
async fn test_initialize_requires_params() {
    let (client, _server) = default_pair().await;

    let err = client.call("initialize", None).await.unwrap_err();
    match err {
        MCPError::Protocol(fault) => assert_eq!(fault.code, -32602),
        other => panic!("expected a protocol fault, got {:?}", other),
    }
}

/// Listed tools advertise an object schema derived from their parameters
#[tokio::test]
async fn test_list_tools_advertises_schema() {
    let server = MCPServer::new(MCPServerConfig::default());
    server.tools().register(
        Tool::new(
            "greet",
            "Greet someone",
            handler_fn(|_args, _context| async move { Ok(Vec::new()) }),
        )
        .with_parameter(ToolParameter::new("name", ParamKind::String))
        .with_parameter(ToolParameter::new("count", ParamKind::Integer).with_default(json!(3))),
    );
    let (client, _server) = connected_pair(server).await;

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "greet");
    assert_eq!(
        tools[0].input_schema,
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "count": {"type": "integer"}
            },
            "required": ["name"]
        })
    );
}

/// tools/call binds named arguments, applies declared defaults, and
/// returns the handler's content
#[tokio::test]
async fn test_tool_call_end_to_end() {
    let server = MCPServer::new(MCPServerConfig::default());
    server.tools().register(
        Tool::new(
            "greet",
            "Greet someone",
            handler_fn(|args, _context| async move {
                let name = args.first().and_then(Value::as_str).unwrap_or("").to_string();
                let count = args.get(1).and_then(Value::as_i64).unwrap_or(0);
                Ok(vec![ToolContent::text(format!("Hello {} (x{})", name, count))])
            }),
        )
        .with_parameter(ToolParameter::new("name", ParamKind::String))
        .with_parameter(ToolParameter::new("count", ParamKind::Integer).with_default(json!(3))),
    );
    let (client, _server) = connected_pair(server).await;

    let result = client.call_tool("greet", json!({"name": "ada"})).await.unwrap();
    assert!(!result.is_error);
    assert_eq!(result.content, vec![ToolContent::text("Hello ada (x3)")]);

    println!("✓ Tool call bound arguments and applied the declared default");
}

/// Tool failures stay inside the result envelope; only an unknown tool
/// name escapes as a request-level fault
#[tokio::test]
async fn test_tool_failures_stay_in_result() {
    let server = MCPServer::new(MCPServerConfig::default());
    server.tools().register(Tool::new(
        "jam",
        "Always fails",
        handler_fn(|_args, _context| async move {
            Err::<Vec<ToolContent>, _>(MCPError::tool("the widget is jammed"))
        }),
    ));
    let (client, _server) = connected_pair(server).await;

    // Handler error: successful response, isError result
    let result = client.call_tool("jam", json!({})).await.unwrap();
    assert!(result.is_error);
    match &result.content[0] {
        ToolContent::Text { text } => assert!(text.contains("jammed")),
        other => panic!("expected text content, got {:?}", other),
    }

    // Binding error (arguments in neither container form): also a
    // result, not a fault
    let result = client.call_tool("jam", json!("zap")).await.unwrap();
    assert!(result.is_error);
    match &result.content[0] {
        ToolContent::Text { text } => assert!(text.contains("arguments must be")),
        other => panic!("expected text content, got {:?}", other),
    }

    // Unknown tool: request-level fault
    let err = client.call_tool("nope", json!({})).await.unwrap_err();
    match err {
        MCPError::Protocol(fault) => {
            assert_eq!(fault.code, -32602);
            assert!(fault.message.contains("nope"));
        }
        other => panic!("expected a protocol fault, got {:?}", other),
    }
}

/// Static resources are listable and readable; a missing URI is the
/// server-range resource fault
#[tokio::test]
async fn test_resources_end_to_end() {
    use mcp_conduit::resources::{ResourceContents, ResourceDescriptor};

    let server = MCPServer::new(MCPServerConfig::default());
    server.resources().register_text(
        ResourceDescriptor::new("conduit://welcome", "welcome").with_mime_type("text/plain"),
        "hello from the engine",
    );
    let (client, _server) = connected_pair(server).await;

    let resources = client.list_resources().await.unwrap();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].uri, "conduit://welcome");

    let contents = client.read_resource("conduit://welcome").await.unwrap();
    assert_eq!(
        contents,
        vec![ResourceContents::text("conduit://welcome", "hello from the engine")
            .with_mime_type("text/plain")]
    );

    let err = client.read_resource("conduit://missing").await.unwrap_err();
    match err {
        MCPError::Protocol(fault) => {
            assert_eq!(fault.code, -32002);
            assert!(fault.message.contains("conduit://missing"));
        }
        other => panic!("expected a protocol fault, got {:?}", other),
    }
}

/// Every dispatch outcome reaches the observer; notifications carry no id
/// and unknown notification methods produce no event at all
#[tokio::test]
async fn test_dispatch_observer_sees_outcomes() {
    let observer = Arc::new(RecordingObserver::default());
    let server = MCPServer::new(MCPServerConfig::default());
    server.set_dispatch_observer(observer.clone());
    let (client, _server) = connected_pair(server).await;

    client.call("ping", None).await.unwrap();
    let _ = client.call("foo/bar", None).await;
    client.notify("foo/bar", None).await.unwrap();
    client.ping().await.unwrap();

    // Spawned dispatch tasks settle before the assertions read the log
    tokio::time::sleep(Duration::from_millis(50)).await;

    let events = observer.events.lock();
    let outcome_for = |method: &str| {
        events
            .iter()
            .find(|event| event.method == method)
            .map(|event| event.outcome.clone())
    };

    assert!(matches!(outcome_for("initialize"), Some(DispatchOutcome::Success)));
    assert!(matches!(outcome_for("ping"), Some(DispatchOutcome::Success)));
    match outcome_for("foo/bar") {
        Some(DispatchOutcome::Fault(fault)) => assert_eq!(fault.code, -32601),
        other => panic!("expected a fault outcome, got {:?}", other),
    }

    let initialized = events
        .iter()
        .find(|event| event.method == "notifications/initialized")
        .expect("initialized notification should be observed");
    assert!(initialized.id.is_none());

    // The unknown notification was dropped without an event: its only
    // trace is the request-path fault above.
    let foo_events = events.iter().filter(|event| event.method == "foo/bar").count();
    assert_eq!(foo_events, 1);
}

/// Disconnecting the client ends the server's connection loop
#[tokio::test]
async fn test_disconnect_ends_server_connection() {
    let (client_side, server_side) = duplex(64 * 1024);
    let (client_read, client_write) = split(client_side);
    let (server_read, server_write) = split(server_side);

    let server = MCPServer::new(MCPServerConfig::default());
    let server_transport: Arc<dyn MCPTransport> = Arc::new(LineTransport::new(
        BufReader::new(server_read),
        server_write,
        TransportConfig::default(),
    ));
    let serve_task = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(server_transport).await })
    };

    let client_transport = Arc::new(LineTransport::new(
        BufReader::new(client_read),
        client_write,
        TransportConfig::default(),
    ));
    let client = MCPClient::new(client_transport, MCPClientConfig::default());
    client.connect().await.unwrap();

    client.disconnect().await.unwrap();

    // Server sees EOF and its serve call returns
    let served = tokio::time::timeout(Duration::from_secs(1), serve_task)
        .await
        .expect("serve should end once the peer disconnects")
        .unwrap();
    assert!(served.is_ok());

    let err = client.call("ping", None).await.unwrap_err();
    assert!(matches!(err, MCPError::Connection { .. }));

    let stats = server.stats();
    assert_eq!(stats.total_connections, 1);
    assert_eq!(stats.active_connections, 0);
}

/// The same engine works over real TCP sockets
#[tokio::test]
async fn test_tcp_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = MCPServer::new(MCPServerConfig::default());
    {
        let server = server.clone();
        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let transport = TcpTransport::tcp(stream, TransportConfig::tcp(peer.to_string()));
            let _ = server.serve(Arc::new(transport)).await;
        });
    }

    let endpoint = addr.to_string();
    let transport = TcpTransport::connect(&endpoint, TransportConfig::tcp(endpoint.clone()))
        .await
        .unwrap();
    let client = MCPClient::new(Arc::new(transport), MCPClientConfig::default());
    client.connect().await.unwrap();

    let value = client.call("ping", None).await.unwrap();
    assert_eq!(value, json!({}));

    client.disconnect().await.unwrap();
    println!("✓ Full round trip over TCP at {}", endpoint);
}

/// Request traffic shows up in the server's statistics
#[tokio::test]
async fn test_server_stats_count_traffic() {
    let (client, server) = default_pair().await;

    client.ping().await.unwrap();
    client.ping().await.unwrap();

    let stats = server.stats();
    // initialize plus two pings
    assert!(stats.requests_processed >= 3);
    assert!(stats.successful_requests >= 3);
    assert_eq!(stats.failed_requests, 0);
    assert_eq!(stats.total_connections, 1);
    assert!(stats.requests_by_method.contains_key("ping"));
    assert!(stats.success_rate() > 0.99);
}
