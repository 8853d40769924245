//! MCP server engine
//!
//! Receives messages off a transport, validates them and dispatches each
//! one as its own task so a slow handler never stalls the receive loop.
//! Requests get exactly one reply; notifications never get any, even
//! when validation or the handler fails. Handlers produce a result value
//! or an error, and the engine owns the response envelope and the reply
//! path. Every dispatch outcome is also reported to an optional observer
//! for host-level logging.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::error::{MCPError, MCPResult};
use crate::protocol::{
    decode_message, encode_message, methods, ClientInfo, InitializeParams, InitializeResult,
    MCPErrorCode, MCPMessage, MCPNotification, MCPRequest, MCPResponse, MessageId, ProtocolError,
    ProtocolStats, ResourceCapabilities, ServerCapabilities, ServerInfo, ToolCapabilities,
    MCP_PROTOCOL_VERSION,
};
use crate::resources::{ListResourcesResult, ReadResourceParams, ReadResourceResult, ResourceRegistry};
use crate::tools::{CallToolParams, ListToolsResult, ToolRegistry};
use crate::transport::{
    HttpTransport, MCPTransport, StdioTransport, TcpTransport, TransportConfig,
    WebSocketTransport,
};

/// Server status enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    /// Server not started
    Stopped,
    /// Server running and serving connections
    Running,
    /// Server error state
    Error(String),
    /// Server shutting down
    ShuttingDown,
}

/// MCP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPServerConfig {
    /// Server identity returned from `initialize`
    pub server_info: ServerInfo,
    /// Capabilities advertised to clients
    pub capabilities: ServerCapabilities,
    /// Maximum concurrent connections for the TCP accept loop
    pub max_connections: usize,
    /// Upper bound on a single framed message, in bytes
    pub max_message_size: usize,
    /// Enable request/response logging
    pub enable_logging: bool,
}

impl Default for MCPServerConfig {
    fn default() -> Self {
        Self {
            server_info: ServerInfo {
                name: "mcp-conduit-server".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: ServerCapabilities {
                tools: Some(ToolCapabilities { list_changed: false }),
                resources: Some(ResourceCapabilities {
                    subscribe: false,
                    list_changed: false,
                }),
            },
            max_connections: 16,
            max_message_size: 1024 * 1024,
            enable_logging: true,
        }
    }
}

/// Per-connection context handed to every handler invocation
#[derive(Clone)]
pub struct RequestContext {
    /// Connection the message arrived on
    pub connection_id: String,
    /// Fires when the connection or the whole server shuts down
    pub cancel: CancelToken,
    state: Arc<ConnectionState>,
}

struct ConnectionState {
    initialized: AtomicBool,
    client_info: RwLock<Option<ClientInfo>>,
}

impl RequestContext {
    /// Create a fresh context, usually one per connection
    pub fn new(connection_id: impl Into<String>, cancel: CancelToken) -> Self {
        Self {
            connection_id: connection_id.into(),
            cancel,
            state: Arc::new(ConnectionState {
                initialized: AtomicBool::new(false),
                client_info: RwLock::new(None),
            }),
        }
    }

    /// Whether the client has sent `notifications/initialized`
    pub fn is_initialized(&self) -> bool {
        self.state.initialized.load(Ordering::Acquire)
    }

    /// Client identity from the `initialize` exchange, if it happened
    pub fn client_info(&self) -> Option<ClientInfo> {
        self.state.client_info.read().clone()
    }

    fn mark_initialized(&self) {
        self.state.initialized.store(true, Ordering::Release);
    }

    fn set_client_info(&self, info: ClientInfo) {
        *self.state.client_info.write() = Some(info);
    }
}

/// Request handler trait
///
/// A handler returns its result value or an error; the engine builds the
/// response envelope. Returning `MCPError::Protocol` passes the fault to
/// the client verbatim; any other error becomes a sanitized
/// `InternalError` reply.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle one request or notification
    async fn handle(&self, params: Option<Value>, context: RequestContext) -> MCPResult<Value>;
}

/// How one dispatched message concluded
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// Handler returned a result
    Success,
    /// Handler signaled a typed protocol fault, passed through verbatim
    Fault(ProtocolError),
    /// Handler failed or panicked; the reply was a sanitized internal error
    Internal(String),
}

/// One dispatched message, as reported to the observer
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    /// Connection the message arrived on
    pub connection_id: String,
    /// Method name
    pub method: String,
    /// Request id; `None` for notifications
    pub id: Option<MessageId>,
    /// How the dispatch concluded
    pub outcome: DispatchOutcome,
    /// Handler wall-clock time
    pub elapsed: Duration,
}

/// Host callback observing every dispatch outcome
///
/// Called for requests and notifications alike, whether or not a reply
/// was sent.
pub trait DispatchObserver: Send + Sync {
    fn on_dispatch(&self, event: DispatchEvent);
}

/// Server statistics
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ServerStats {
    /// Total connections
    pub total_connections: u64,
    /// Current active connections
    pub active_connections: u64,
    /// Total requests processed
    pub requests_processed: u64,
    /// Requests answered with a result
    pub successful_requests: u64,
    /// Requests answered with an error
    pub failed_requests: u64,
    /// Notifications received
    pub notifications_received: u64,
    /// Average request processing time
    pub average_request_time: Duration,
    /// Server uptime
    pub uptime: Duration,
    /// Last activity timestamp
    pub last_activity: Option<DateTime<Utc>>,
    /// Requests by method
    pub requests_by_method: HashMap<String, u64>,
}

impl ServerStats {
    /// Record one processed request
    pub fn update_request(&mut self, method: &str, success: bool, processing_time: Duration) {
        self.requests_processed += 1;

        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }

        let total_time = self.average_request_time.as_nanos() as u64
            * (self.requests_processed - 1)
            + processing_time.as_nanos() as u64;
        self.average_request_time = Duration::from_nanos(total_time / self.requests_processed);

        *self.requests_by_method.entry(method.to_string()).or_insert(0) += 1;
        self.last_activity = Some(Utc::now());
    }

    /// Record a connection opening or closing
    pub fn update_connection(&mut self, connected: bool) {
        if connected {
            self.total_connections += 1;
            self.active_connections += 1;
        } else if self.active_connections > 0 {
            self.active_connections -= 1;
        }
    }

    /// Record an inbound notification
    pub fn update_notification(&mut self) {
        self.notifications_received += 1;
        self.last_activity = Some(Utc::now());
    }

    /// Fraction of requests answered with a result
    pub fn success_rate(&self) -> f64 {
        if self.requests_processed == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.requests_processed as f64
        }
    }
}

/// MCP server implementation
pub struct MCPServer {
    /// Server configuration
    config: MCPServerConfig,
    /// Server status
    status: Arc<RwLock<ServerStatus>>,
    /// Method dispatch table
    handlers: Arc<DashMap<String, Arc<dyn RequestHandler>>>,
    /// Tool registry backing `tools/list` and `tools/call`
    tools: Arc<ToolRegistry>,
    /// Resource registry backing `resources/list` and `resources/read`
    resources: Arc<ResourceRegistry>,
    /// Dispatch observer, when the host installed one
    observer: Arc<RwLock<Option<Arc<dyn DispatchObserver>>>>,
    /// Server statistics
    stats: Arc<Mutex<ServerStats>>,
    /// Wire-level message counters
    protocol_stats: Arc<Mutex<ProtocolStats>>,
    /// Server start time
    started_at: Arc<RwLock<Option<Instant>>>,
    /// Fires when the server shuts down
    shutdown: CancelToken,
}

impl MCPServer {
    /// Create a new MCP server with the built-in method handlers
    pub fn new(config: MCPServerConfig) -> Self {
        let server = Self {
            config,
            status: Arc::new(RwLock::new(ServerStatus::Stopped)),
            handlers: Arc::new(DashMap::new()),
            tools: Arc::new(ToolRegistry::new()),
            resources: Arc::new(ResourceRegistry::new()),
            observer: Arc::new(RwLock::new(None)),
            stats: Arc::new(Mutex::new(ServerStats::default())),
            protocol_stats: Arc::new(Mutex::new(ProtocolStats::default())),
            started_at: Arc::new(RwLock::new(None)),
            shutdown: CancelToken::new(),
        };
        server.register_default_handlers();
        server
    }

    /// Register a request handler, replacing any existing one
    pub fn register_handler(&self, method: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        let method = method.into();
        if self.handlers.insert(method.clone(), handler).is_some() {
            warn!("Replacing existing handler for method: {}", method);
        } else {
            debug!("Registered handler for method: {}", method);
        }
    }

    /// Remove the handler for a method
    ///
    /// Returns false when no handler was registered under that name.
    /// In-flight dispatches keep the handler they already looked up.
    pub fn unregister_handler(&self, method: &str) -> bool {
        if self.handlers.remove(method).is_some() {
            debug!("Unregistered handler for method: {}", method);
            true
        } else {
            false
        }
    }

    /// Whether a handler is registered for the method
    pub fn has_handler(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Install the dispatch observer
    pub fn set_dispatch_observer(&self, observer: Arc<dyn DispatchObserver>) {
        *self.observer.write() = Some(observer);
    }

    /// Serve a single already-built transport until its peer goes away
    pub async fn serve(&self, transport: Arc<dyn MCPTransport>) -> MCPResult<()> {
        transport.start().await?;
        self.mark_running();
        let connection_id = Uuid::new_v4().to_string();
        self.serve_connection(transport, connection_id).await;
        Ok(())
    }

    /// Serve this process's stdin/stdout
    pub async fn serve_stdio(&self) -> MCPResult<()> {
        self.serve(Arc::new(StdioTransport::stdio())).await
    }

    /// Accept newline-framed TCP connections until the server stops
    pub async fn serve_tcp(&self, addr: &str) -> MCPResult<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MCPError::connection(format!("bind {} failed: {}", addr, e)))?;
        let local = listener.local_addr()?;
        info!("MCP server listening on {}", local);
        self.mark_running();

        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    continue;
                }
            };

            if self.stats.lock().active_connections >= self.config.max_connections as u64 {
                warn!(
                    "Refusing connection from {}: at capacity ({})",
                    peer, self.config.max_connections
                );
                continue;
            }

            let connection_id = Uuid::new_v4().to_string();
            debug!("Accepted {} as connection {}", peer, connection_id);

            let mut transport_config = TransportConfig::tcp(peer.to_string());
            transport_config.max_message_size = self.config.max_message_size;
            let transport: Arc<dyn MCPTransport> =
                Arc::new(TcpTransport::tcp(stream, transport_config));
            if let Err(e) = transport.start().await {
                warn!("Failed to start transport for {}: {}", peer, e);
                continue;
            }

            let server = self.clone();
            tokio::spawn(async move {
                server.serve_connection(transport, connection_id).await;
            });
        }

        info!("MCP server accept loop stopped");
        Ok(())
    }

    /// Serve one-shot HTTP POST requests on the given address
    pub async fn serve_http(&self, addr: &str) -> MCPResult<()> {
        let config = TransportConfig::http(addr).with_max_message_size(self.config.max_message_size);
        self.serve(Arc::new(HttpTransport::new(config))).await
    }

    /// Serve WebSocket connections on the given address
    pub async fn serve_ws(&self, addr: &str) -> MCPResult<()> {
        let config =
            TransportConfig::websocket(addr).with_max_message_size(self.config.max_message_size);
        self.serve(Arc::new(WebSocketTransport::new(config))).await
    }

    /// Stop the server and all its connections
    pub async fn stop(&self) -> MCPResult<()> {
        info!("Stopping MCP server...");
        *self.status.write() = ServerStatus::ShuttingDown;
        self.shutdown.cancel();
        *self.status.write() = ServerStatus::Stopped;
        *self.started_at.write() = None;
        info!("MCP server stopped");
        Ok(())
    }

    /// Get server status
    pub fn status(&self) -> ServerStatus {
        self.status.read().clone()
    }

    /// Check if the server is running
    pub fn is_running(&self) -> bool {
        matches!(*self.status.read(), ServerStatus::Running)
    }

    /// Get server statistics
    pub fn stats(&self) -> ServerStats {
        let mut stats = self.stats.lock().clone();
        if let Some(start) = *self.started_at.read() {
            stats.uptime = start.elapsed();
        }
        stats
    }

    /// Get wire-level message counters
    pub fn protocol_stats(&self) -> ProtocolStats {
        self.protocol_stats.lock().clone()
    }

    /// Get the tool registry
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Get the resource registry
    pub fn resources(&self) -> &Arc<ResourceRegistry> {
        &self.resources
    }

    fn register_default_handlers(&self) {
        self.register_handler(
            methods::INITIALIZE,
            Arc::new(InitializeHandler {
                config: self.config.clone(),
            }),
        );
        self.register_handler(methods::INITIALIZED, Arc::new(InitializedHandler));
        self.register_handler(methods::PING, Arc::new(PingHandler));
        self.register_handler(
            methods::LIST_TOOLS,
            Arc::new(ToolListHandler {
                tools: Arc::clone(&self.tools),
            }),
        );
        self.register_handler(
            methods::CALL_TOOL,
            Arc::new(ToolCallHandler {
                tools: Arc::clone(&self.tools),
            }),
        );
        self.register_handler(
            methods::LIST_RESOURCES,
            Arc::new(ResourceListHandler {
                resources: Arc::clone(&self.resources),
            }),
        );
        self.register_handler(
            methods::READ_RESOURCE,
            Arc::new(ResourceReadHandler {
                resources: Arc::clone(&self.resources),
            }),
        );
        debug!("Default request handlers registered");
    }

    fn mark_running(&self) {
        let mut status = self.status.write();
        if *status != ServerStatus::Running {
            *status = ServerStatus::Running;
            *self.started_at.write() = Some(Instant::now());
        }
    }

    /// Read messages off one connection until it ends
    async fn serve_connection(&self, transport: Arc<dyn MCPTransport>, connection_id: String) {
        info!("Client connected: {}", connection_id);
        self.stats.lock().update_connection(true);

        let cancel = self.shutdown.child();
        let context = RequestContext::new(connection_id.clone(), cancel.clone());

        loop {
            let raw = tokio::select! {
                _ = cancel.cancelled() => break,
                result = transport.read_message() => result,
            };

            match raw {
                Ok(Some(raw)) => {
                    self.handle_raw_message(raw, Arc::clone(&transport), &context)
                        .await
                }
                Ok(None) => {
                    info!("Client {} disconnected", connection_id);
                    break;
                }
                Err(e) => {
                    error!("Transport read failed for {}: {}", connection_id, e);
                    break;
                }
            }
        }

        // Wake any in-flight handlers still holding this connection's token.
        cancel.cancel();
        if let Err(e) = transport.stop().await {
            warn!("Error stopping transport for {}: {}", connection_id, e);
        }
        self.stats.lock().update_connection(false);
        info!("Connection {} closed", connection_id);
    }

    /// Decode one raw message and hand it to its own dispatch task
    async fn handle_raw_message(
        &self,
        raw: String,
        transport: Arc<dyn MCPTransport>,
        context: &RequestContext,
    ) {
        let message = match decode_message(&raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    "Undecodable message from {}: {}",
                    context.connection_id, e
                );
                self.protocol_stats.lock().record_invalid();
                // Reply only when an id could be recovered; anything else
                // is logged and dropped.
                if let Some(id) = e.id.clone() {
                    let response = MCPResponse::error(id, e.to_protocol_error());
                    self.write_response(&transport, response).await;
                }
                return;
            }
        };

        self.protocol_stats.lock().record_inbound(&message);

        match message {
            MCPMessage::Request(request) => {
                let server = self.clone();
                let context = context.clone();
                tokio::spawn(async move {
                    server.dispatch_request(request, transport, context).await;
                });
            }
            MCPMessage::Notification(notification) => {
                self.stats.lock().update_notification();
                let server = self.clone();
                let context = context.clone();
                tokio::spawn(async move {
                    server.dispatch_notification(notification, context).await;
                });
            }
            MCPMessage::Response(response) => {
                // A response is not a valid request; the id is known, so
                // say so instead of leaving the peer waiting.
                warn!(
                    "Unexpected response message from {}",
                    context.connection_id
                );
                let reply = MCPResponse::error(
                    response.id,
                    ProtocolError::invalid_request("a response is not a valid request"),
                );
                self.write_response(&transport, reply).await;
            }
        }
    }

    /// Run one request to completion and write its reply
    async fn dispatch_request(
        &self,
        request: MCPRequest,
        transport: Arc<dyn MCPTransport>,
        context: RequestContext,
    ) {
        let started = Instant::now();
        let method = request.method.clone();
        let id = request.id.clone();

        if self.config.enable_logging {
            debug!(
                "Dispatching request {} ({}) from {}",
                id, method, context.connection_id
            );
        }

        let outcome = if method.is_empty() {
            Err(MCPError::Protocol(ProtocolError::invalid_request(
                "method must not be empty",
            )))
        } else {
            let handler = self
                .handlers
                .get(&method)
                .map(|entry| Arc::clone(entry.value()));
            match handler {
                Some(handler) => {
                    self.invoke_handler(handler, request.params, context.clone())
                        .await
                }
                None => Err(MCPError::Protocol(ProtocolError::method_not_found(&method))),
            }
        };

        let elapsed = started.elapsed();
        let (response, event_outcome) = match outcome {
            Ok(result) => (
                MCPResponse::success(id.clone(), result),
                DispatchOutcome::Success,
            ),
            Err(MCPError::Protocol(fault)) => {
                debug!("Request {} ({}) faulted: {}", id, method, fault);
                (
                    MCPResponse::error(id.clone(), fault.clone()),
                    DispatchOutcome::Fault(fault),
                )
            }
            Err(other) => {
                // Sanitized on the wire; the detail goes to the observer
                // and the log.
                error!("Request {} ({}) failed: {}", id, method, other);
                let detail = other.to_string();
                let fault = ProtocolError::with_data(
                    MCPErrorCode::InternalError,
                    "Internal error",
                    Value::String(detail.clone()),
                );
                (
                    MCPResponse::error(id.clone(), fault),
                    DispatchOutcome::Internal(detail),
                )
            }
        };

        let success = matches!(event_outcome, DispatchOutcome::Success);
        self.stats.lock().update_request(&method, success, elapsed);
        self.write_response(&transport, response).await;
        self.emit_event(DispatchEvent {
            connection_id: context.connection_id.clone(),
            method,
            id: Some(id),
            outcome: event_outcome,
            elapsed,
        });
    }

    /// Run one notification; whatever happens, no reply is written
    async fn dispatch_notification(&self, notification: MCPNotification, context: RequestContext) {
        let started = Instant::now();
        let method = notification.method.clone();

        if method.is_empty() {
            debug!(
                "Discarding notification with empty method from {}",
                context.connection_id
            );
            return;
        }

        let handler = self
            .handlers
            .get(&method)
            .map(|entry| Arc::clone(entry.value()));
        let handler = match handler {
            Some(handler) => handler,
            None => {
                debug!(
                    "Ignoring notification {} from {}: no handler",
                    method, context.connection_id
                );
                return;
            }
        };

        let outcome = match self
            .invoke_handler(handler, notification.params, context.clone())
            .await
        {
            Ok(_) => DispatchOutcome::Success, // result discarded
            Err(MCPError::Protocol(fault)) => {
                debug!("Notification {} faulted: {}", method, fault);
                DispatchOutcome::Fault(fault)
            }
            Err(other) => {
                warn!("Notification {} failed: {}", method, other);
                DispatchOutcome::Internal(other.to_string())
            }
        };

        self.emit_event(DispatchEvent {
            connection_id: context.connection_id.clone(),
            method,
            id: None,
            outcome,
            elapsed: started.elapsed(),
        });
    }

    /// Invoke a handler, converting panics into ordinary errors
    async fn invoke_handler(
        &self,
        handler: Arc<dyn RequestHandler>,
        params: Option<Value>,
        context: RequestContext,
    ) -> MCPResult<Value> {
        match AssertUnwindSafe(handler.handle(params, context))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let detail = panic_message(panic);
                error!("Handler panicked: {}", detail);
                Err(MCPError::internal_server(format!(
                    "handler panicked: {}",
                    detail
                )))
            }
        }
    }

    async fn write_response(&self, transport: &Arc<dyn MCPTransport>, response: MCPResponse) {
        self.protocol_stats.lock().record_response(&response);
        match encode_message(&MCPMessage::Response(response)) {
            Ok(encoded) => {
                if let Err(e) = transport.write_message(&encoded).await {
                    error!("Failed to write response: {}", e);
                }
            }
            Err(e) => error!("Failed to encode response: {}", e),
        }
    }

    fn emit_event(&self, event: DispatchEvent) {
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer.on_dispatch(event);
        }
    }
}

impl Clone for MCPServer {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            status: Arc::clone(&self.status),
            handlers: Arc::clone(&self.handlers),
            tools: Arc::clone(&self.tools),
            resources: Arc::clone(&self.resources),
            observer: Arc::clone(&self.observer),
            stats: Arc::clone(&self.stats),
            protocol_stats: Arc::clone(&self.protocol_stats),
            started_at: Arc::clone(&self.started_at),
            shutdown: self.shutdown.clone(),
        }
    }
}

pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Answers `initialize` with this server's identity and capabilities
struct InitializeHandler {
    config: MCPServerConfig,
}

#[async_trait]
impl RequestHandler for InitializeHandler {
    async fn handle(&self, params: Option<Value>, context: RequestContext) -> MCPResult<Value> {
        let params = params.ok_or_else(|| {
            MCPError::Protocol(ProtocolError::invalid_params(
                "missing initialization parameters",
            ))
        })?;
        let params: InitializeParams = serde_json::from_value(params).map_err(|e| {
            MCPError::Protocol(ProtocolError::invalid_params(format!(
                "invalid initialization parameters: {}",
                e
            )))
        })?;

        info!(
            "Client {} identifies as {} {}",
            context.connection_id, params.client_info.name, params.client_info.version
        );
        if params.protocol_version != MCP_PROTOCOL_VERSION {
            debug!(
                "Client proposed protocol {}, answering with {}",
                params.protocol_version, MCP_PROTOCOL_VERSION
            );
        }
        context.set_client_info(params.client_info);

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            server_info: self.config.server_info.clone(),
            capabilities: self.config.capabilities.clone(),
        };
        Ok(serde_json::to_value(result)?)
    }
}

/// Marks the session initialized on `notifications/initialized`
struct InitializedHandler;

#[async_trait]
impl RequestHandler for InitializedHandler {
    async fn handle(&self, _params: Option<Value>, context: RequestContext) -> MCPResult<Value> {
        context.mark_initialized();
        debug!("Connection {} completed initialization", context.connection_id);
        Ok(Value::Null)
    }
}

/// Replies to `ping` with an empty object
struct PingHandler;

#[async_trait]
impl RequestHandler for PingHandler {
    async fn handle(&self, _params: Option<Value>, _context: RequestContext) -> MCPResult<Value> {
        Ok(serde_json::json!({}))
    }
}

/// Serves `tools/list` from the tool registry
struct ToolListHandler {
    tools: Arc<ToolRegistry>,
}

#[async_trait]
impl RequestHandler for ToolListHandler {
    async fn handle(&self, _params: Option<Value>, _context: RequestContext) -> MCPResult<Value> {
        let result = ListToolsResult {
            tools: self.tools.descriptors(),
        };
        Ok(serde_json::to_value(result)?)
    }
}

/// Serves `tools/call` from the tool registry
struct ToolCallHandler {
    tools: Arc<ToolRegistry>,
}

#[async_trait]
impl RequestHandler for ToolCallHandler {
    async fn handle(&self, params: Option<Value>, context: RequestContext) -> MCPResult<Value> {
        let params = params.ok_or_else(|| {
            MCPError::Protocol(ProtocolError::invalid_params("missing tool call parameters"))
        })?;
        let call: CallToolParams = serde_json::from_value(params).map_err(|e| {
            MCPError::Protocol(ProtocolError::invalid_params(format!(
                "invalid tool call parameters: {}",
                e
            )))
        })?;

        let result = self
            .tools
            .call(&call.name, call.arguments, context)
            .await
            .map_err(|e| match e {
                MCPError::ToolNotFound { name } => MCPError::Protocol(
                    ProtocolError::invalid_params(format!("Unknown tool: {}", name)),
                ),
                other => other,
            })?;
        Ok(serde_json::to_value(result)?)
    }
}

/// Serves `resources/list` from the resource registry
struct ResourceListHandler {
    resources: Arc<ResourceRegistry>,
}

#[async_trait]
impl RequestHandler for ResourceListHandler {
    async fn handle(&self, _params: Option<Value>, _context: RequestContext) -> MCPResult<Value> {
        let result = ListResourcesResult {
            resources: self.resources.descriptors().await,
        };
        Ok(serde_json::to_value(result)?)
    }
}

/// Serves `resources/read` from the resource registry
struct ResourceReadHandler {
    resources: Arc<ResourceRegistry>,
}

#[async_trait]
impl RequestHandler for ResourceReadHandler {
    async fn handle(&self, params: Option<Value>, _context: RequestContext) -> MCPResult<Value> {
        let params = params.ok_or_else(|| {
            MCPError::Protocol(ProtocolError::invalid_params("missing resource parameters"))
        })?;
        let params: ReadResourceParams = serde_json::from_value(params).map_err(|e| {
            MCPError::Protocol(ProtocolError::invalid_params(format!(
                "invalid resource parameters: {}",
                e
            )))
        })?;

        let contents = self
            .resources
            .read(&params.uri)
            .await
            .map_err(|e| match e {
                // -32002 is the server-range code for a missing resource
                MCPError::ResourceNotFound { uri } => MCPError::Protocol(ProtocolError::custom(
                    -32002,
                    format!("Resource not found: {}", uri),
                )),
                other => other,
            })?;

        let result = ReadResourceResult { contents };
        Ok(serde_json::to_value(result)?)
    }
}
