//! MCP client engine
//!
//! Drives the client side of a connection: assigns request ids, matches
//! responses back to their callers, runs the initialize handshake and
//! exposes typed helpers for the standard MCP methods. A single
//! background task owns the transport's read side; any number of callers
//! may have requests in flight at once.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::error::{MCPError, MCPResult};
use crate::protocol::{
    decode_message, encode_message, methods, ClientInfo, InitializeParams, InitializeResult,
    MCPMessage, MCPNotification, MCPRequest, MCPResponse, MessageId, ServerCapabilities,
    ServerInfo, MCP_PROTOCOL_VERSION,
};
use crate::resources::{ListResourcesResult, ReadResourceResult, ResourceContents, ResourceDescriptor};
use crate::tools::{CallToolResult, ListToolsResult, ToolDescriptor};
use crate::transport::{MCPTransport, TransportConfig, TransportFactory};

/// Client status enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientStatus {
    /// Client not connected
    Disconnected,
    /// Client connecting
    Connecting,
    /// Transport up, initialize handshake in flight
    Initializing,
    /// Client ready for requests
    Ready,
    /// Client error state
    Error(String),
    /// Client shutting down
    ShuttingDown,
}

/// MCP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPClientConfig {
    /// Transport configuration
    pub transport: TransportConfig,
    /// Client identity sent during the handshake
    pub client_info: ClientInfo,
    /// Default timeout applied to each request
    pub request_timeout: Duration,
    /// Enable request/response logging
    pub enable_logging: bool,
}

impl Default for MCPClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            client_info: ClientInfo {
                name: "mcp-conduit-client".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            request_timeout: Duration::from_secs(30),
            enable_logging: true,
        }
    }
}

/// A request that has been written but not yet resolved
struct PendingRequest {
    method: String,
    sender: oneshot::Sender<MCPResult<MCPResponse>>,
    sent_at: Instant,
}

/// Client statistics
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ClientStats {
    /// Total requests resolved
    pub requests_sent: u64,
    /// Responses that resolved a request successfully
    pub responses_received: u64,
    /// Notifications received
    pub notifications_received: u64,
    /// Requests resolved with an error response or local failure
    pub failed_requests: u64,
    /// Requests that hit their deadline
    pub timeout_requests: u64,
    /// Requests abandoned through a cancel token
    pub cancelled_requests: u64,
    /// Average time to a successful response
    pub average_response_time: Duration,
    /// Connection uptime
    pub uptime: Duration,
    /// Last activity timestamp
    pub last_activity: Option<DateTime<Utc>>,
}

impl ClientStats {
    /// Record a resolved request
    pub fn update_request(&mut self, success: bool, response_time: Duration) {
        self.requests_sent += 1;
        if success {
            self.responses_received += 1;
            let total = self.average_response_time.as_nanos() as u64
                * (self.responses_received - 1)
                + response_time.as_nanos() as u64;
            self.average_response_time = Duration::from_nanos(total / self.responses_received);
        } else {
            self.failed_requests += 1;
        }
        self.last_activity = Some(Utc::now());
    }

    /// Record a request that timed out
    pub fn update_timeout(&mut self) {
        self.requests_sent += 1;
        self.timeout_requests += 1;
        self.failed_requests += 1;
        self.last_activity = Some(Utc::now());
    }

    /// Record a cancelled request
    pub fn update_cancelled(&mut self) {
        self.requests_sent += 1;
        self.cancelled_requests += 1;
        self.last_activity = Some(Utc::now());
    }

    /// Record an inbound notification
    pub fn update_notification(&mut self) {
        self.notifications_received += 1;
        self.last_activity = Some(Utc::now());
    }

    /// Fraction of requests that resolved successfully
    pub fn success_rate(&self) -> f64 {
        if self.requests_sent == 0 {
            0.0
        } else {
            self.responses_received as f64 / self.requests_sent as f64
        }
    }
}

/// Notification handler trait
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Handle one inbound notification
    async fn handle_notification(&self, notification: MCPNotification) -> MCPResult<()>;
}

/// MCP client implementation
pub struct MCPClient {
    /// Client configuration
    config: MCPClientConfig,
    /// Transport layer, shared with the receive loop
    transport: Arc<dyn MCPTransport>,
    /// Client status
    status: Arc<RwLock<ClientStatus>>,
    /// Next request id; ids are monotonically increasing integers
    next_id: Arc<AtomicI64>,
    /// Requests awaiting their response, keyed by id
    pending: Arc<DashMap<MessageId, PendingRequest>>,
    /// Client statistics
    stats: Arc<Mutex<ClientStats>>,
    /// Notification handlers keyed by method
    notification_handlers: Arc<DashMap<String, Arc<dyn NotificationHandler>>>,
    /// Server identity learned during the handshake
    server_info: Arc<RwLock<Option<ServerInfo>>>,
    /// Server capabilities learned during the handshake
    server_capabilities: Arc<RwLock<Option<ServerCapabilities>>>,
    /// Receive loop handle
    receive_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    /// Connection start time
    connected_at: Arc<RwLock<Option<Instant>>>,
    /// Fires when the client shuts down
    shutdown: CancelToken,
}

impl MCPClient {
    /// Create a client over an existing transport
    pub fn new(transport: Arc<dyn MCPTransport>, config: MCPClientConfig) -> Self {
        Self {
            config,
            transport,
            status: Arc::new(RwLock::new(ClientStatus::Disconnected)),
            next_id: Arc::new(AtomicI64::new(1)),
            pending: Arc::new(DashMap::new()),
            stats: Arc::new(Mutex::new(ClientStats::default())),
            notification_handlers: Arc::new(DashMap::new()),
            server_info: Arc::new(RwLock::new(None)),
            server_capabilities: Arc::new(RwLock::new(None)),
            receive_task: Arc::new(Mutex::new(None)),
            connected_at: Arc::new(RwLock::new(None)),
            shutdown: CancelToken::new(),
        }
    }

    /// Create a client, building the transport from the configuration
    pub async fn from_config(config: MCPClientConfig) -> MCPResult<Self> {
        let transport = TransportFactory::create(config.transport.clone()).await?;
        Ok(Self::new(transport, config))
    }

    /// Connect the transport and run the initialize handshake
    pub async fn connect(&self) -> MCPResult<()> {
        info!("Connecting to MCP server...");
        *self.status.write() = ClientStatus::Connecting;

        self.transport.start().await?;
        self.spawn_receive_loop();

        if let Err(e) = self.initialize_protocol().await {
            *self.status.write() = ClientStatus::Error(e.to_string());
            return Err(e);
        }

        *self.status.write() = ClientStatus::Ready;
        *self.connected_at.write() = Some(Instant::now());

        info!("MCP client connected and ready");
        Ok(())
    }

    /// Disconnect from the server
    ///
    /// Every in-flight request resolves with a connection error.
    pub async fn disconnect(&self) -> MCPResult<()> {
        info!("Disconnecting MCP client...");
        *self.status.write() = ClientStatus::ShuttingDown;

        self.shutdown.cancel();
        self.fail_all_pending(MCPError::connection("client disconnecting"));
        self.transport.stop().await?;

        if let Some(handle) = self.receive_task.lock().take() {
            handle.abort();
        }

        *self.status.write() = ClientStatus::Disconnected;
        *self.connected_at.write() = None;

        info!("MCP client disconnected");
        Ok(())
    }

    /// Send a request and wait for its result
    ///
    /// An error response from the server resolves as
    /// `MCPError::Protocol` carrying the fault verbatim.
    pub async fn call(&self, method: &str, params: Option<Value>) -> MCPResult<Value> {
        self.call_with_options(
            method,
            params,
            self.config.request_timeout,
            CancelToken::new(),
        )
        .await
    }

    /// Send a request with an explicit timeout and cancel token
    pub async fn call_with_options(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
        cancel: CancelToken,
    ) -> MCPResult<Value> {
        self.ensure_ready()?;
        self.call_internal(method, params, timeout, cancel).await
    }

    /// Send a notification; no response will ever arrive
    pub async fn notify(&self, method: &str, params: Option<Value>) -> MCPResult<()> {
        self.ensure_ready()?;
        self.notify_internal(method, params).await
    }

    /// Register a handler for a notification method
    pub fn register_notification_handler(
        &self,
        method: impl Into<String>,
        handler: Arc<dyn NotificationHandler>,
    ) {
        self.notification_handlers.insert(method.into(), handler);
    }

    /// Ping the server and measure the round trip
    pub async fn ping(&self) -> MCPResult<Duration> {
        let start = Instant::now();
        self.call(methods::PING, None).await?;
        Ok(start.elapsed())
    }

    /// List the tools the server offers
    pub async fn list_tools(&self) -> MCPResult<Vec<ToolDescriptor>> {
        let value = self.call(methods::LIST_TOOLS, None).await?;
        let result: ListToolsResult = serde_json::from_value(value)?;
        Ok(result.tools)
    }

    /// Invoke a tool by name
    pub async fn call_tool(&self, name: &str, arguments: Value) -> MCPResult<CallToolResult> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });
        let value = self.call(methods::CALL_TOOL, Some(params)).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// List the resources the server offers
    pub async fn list_resources(&self) -> MCPResult<Vec<ResourceDescriptor>> {
        let value = self.call(methods::LIST_RESOURCES, None).await?;
        let result: ListResourcesResult = serde_json::from_value(value)?;
        Ok(result.resources)
    }

    /// Read a resource by URI
    pub async fn read_resource(&self, uri: &str) -> MCPResult<Vec<ResourceContents>> {
        let params = serde_json::json!({ "uri": uri });
        let value = self.call(methods::READ_RESOURCE, Some(params)).await?;
        let result: ReadResourceResult = serde_json::from_value(value)?;
        Ok(result.contents)
    }

    /// Get client status
    pub fn status(&self) -> ClientStatus {
        self.status.read().clone()
    }

    /// Check if connected and ready
    pub fn is_ready(&self) -> bool {
        matches!(*self.status.read(), ClientStatus::Ready)
    }

    /// Number of requests sent and not yet resolved
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Get client statistics
    pub fn stats(&self) -> ClientStats {
        let mut stats = self.stats.lock().clone();
        if let Some(start) = *self.connected_at.read() {
            stats.uptime = start.elapsed();
        }
        stats
    }

    /// Server identity, once the handshake has completed
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.read().clone()
    }

    /// Server capabilities, once the handshake has completed
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.server_capabilities.read().clone()
    }

    fn next_request_id(&self) -> MessageId {
        MessageId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn ensure_ready(&self) -> MCPResult<()> {
        match &*self.status.read() {
            ClientStatus::Ready => Ok(()),
            ClientStatus::Disconnected => Err(MCPError::connection("client is not connected")),
            ClientStatus::Connecting => Err(MCPError::connection("client is still connecting")),
            ClientStatus::Initializing => {
                Err(MCPError::connection("client is still initializing"))
            }
            ClientStatus::Error(msg) => {
                Err(MCPError::connection(format!("client is in error state: {}", msg)))
            }
            ClientStatus::ShuttingDown => Err(MCPError::connection("client is shutting down")),
        }
    }

    /// Run the initialize exchange and announce readiness
    async fn initialize_protocol(&self) -> MCPResult<()> {
        info!("Initializing MCP protocol...");
        *self.status.write() = ClientStatus::Initializing;

        let params = InitializeParams {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            client_info: self.config.client_info.clone(),
            capabilities: Default::default(),
        };

        let value = self
            .call_internal(
                methods::INITIALIZE,
                Some(serde_json::to_value(&params)?),
                self.config.request_timeout,
                CancelToken::new(),
            )
            .await?;

        let result: InitializeResult = serde_json::from_value(value)?;
        if result.protocol_version != MCP_PROTOCOL_VERSION {
            return Err(MCPError::handshake(format!(
                "server speaks protocol {} but this client requires {}",
                result.protocol_version, MCP_PROTOCOL_VERSION
            )));
        }

        info!(
            "MCP protocol initialized against server: {} {}",
            result.server_info.name, result.server_info.version
        );
        *self.server_info.write() = Some(result.server_info);
        *self.server_capabilities.write() = Some(result.capabilities);

        self.notify_internal(methods::INITIALIZED, None).await?;
        Ok(())
    }

    /// Register the waiter, write the request, then race response arrival
    /// against the deadline and the cancel token
    async fn call_internal(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
        cancel: CancelToken,
    ) -> MCPResult<Value> {
        let id = self.next_request_id();
        let request = match params {
            Some(params) => MCPRequest::with_params(id.clone(), method, params),
            None => MCPRequest::new(id.clone(), method),
        };
        let encoded = encode_message(&MCPMessage::Request(request))?;

        if self.config.enable_logging {
            debug!("Sending request {} ({})", id, method);
        }

        // The waiter goes in before the bytes go out; a response cannot
        // arrive before its slot exists.
        let (sender, mut receiver) = oneshot::channel();
        self.pending.insert(
            id.clone(),
            PendingRequest {
                method: method.to_string(),
                sender,
                sent_at: Instant::now(),
            },
        );

        if let Err(e) = self.transport.write_message(&encoded).await {
            self.pending.remove(&id);
            self.stats.lock().update_request(false, Duration::ZERO);
            return Err(e);
        }

        let response = tokio::select! {
            result = &mut receiver => match result {
                Ok(result) => result?,
                Err(_) => return Err(MCPError::connection("connection lost")),
            },
            _ = tokio::time::sleep(timeout) => {
                // Whoever removes the entry resolves the request; losing
                // the race means the response arrived first.
                if self.pending.remove(&id).is_some() {
                    warn!("Request {} ({}) timed out after {:?}", id, method, timeout);
                    self.stats.lock().update_timeout();
                    return Err(MCPError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                match receiver.await {
                    Ok(result) => result?,
                    Err(_) => return Err(MCPError::connection("connection lost")),
                }
            }
            _ = cancel.cancelled() => {
                if self.pending.remove(&id).is_some() {
                    debug!("Request {} ({}) cancelled", id, method);
                    self.stats.lock().update_cancelled();
                    return Err(MCPError::Cancelled);
                }
                match receiver.await {
                    Ok(result) => result?,
                    Err(_) => return Err(MCPError::connection("connection lost")),
                }
            }
        };

        Ok(response.into_result()?)
    }

    async fn notify_internal(&self, method: &str, params: Option<Value>) -> MCPResult<()> {
        let notification = match params {
            Some(params) => MCPNotification::with_params(method, params),
            None => MCPNotification::new(method),
        };
        let encoded = encode_message(&MCPMessage::Notification(notification))?;
        self.transport.write_message(&encoded).await
    }

    fn spawn_receive_loop(&self) {
        let client = self.clone();
        let handle = tokio::spawn(async move {
            client.run_receive_loop().await;
        });
        *self.receive_task.lock() = Some(handle);
    }

    /// Single reader: pulls messages off the transport until it ends
    async fn run_receive_loop(&self) {
        loop {
            let raw = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.transport.read_message() => result,
            };

            match raw {
                Ok(Some(raw)) => self.handle_inbound(&raw),
                Ok(None) => {
                    info!("Server closed the connection");
                    break;
                }
                Err(e) => {
                    error!("Transport read failed: {}", e);
                    break;
                }
            }
        }

        // Nothing else will ever resolve these.
        self.fail_all_pending(MCPError::connection("connection lost"));
        if !self.shutdown.is_cancelled() {
            *self.status.write() = ClientStatus::Error("connection lost".to_string());
        }
    }

    fn handle_inbound(&self, raw: &str) {
        let message = match decode_message(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!("Discarding undecodable message: {}", e);
                return;
            }
        };

        if self.config.enable_logging {
            debug!("Received message: {:?}", message.method().unwrap_or("<response>"));
        }

        match message {
            MCPMessage::Response(response) => match self.pending.remove(&response.id) {
                Some((_, pending)) => {
                    let elapsed = pending.sent_at.elapsed();
                    self.stats.lock().update_request(response.is_success(), elapsed);
                    let _ = pending.sender.send(Ok(response));
                }
                None => {
                    debug!(
                        "Dropping response for unknown or already-resolved id {}",
                        response.id
                    );
                }
            },
            MCPMessage::Notification(notification) => {
                self.stats.lock().update_notification();
                let handler = self
                    .notification_handlers
                    .get(notification.method.as_str())
                    .map(|entry| Arc::clone(entry.value()));
                match handler {
                    Some(handler) => {
                        // On its own task: a slow handler must not hold up
                        // correlation of the next inbound response.
                        let method = notification.method.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handler.handle_notification(notification).await {
                                warn!("Notification handler for {} failed: {}", method, e);
                            }
                        });
                    }
                    None => {
                        debug!("No handler registered for notification: {}", notification.method);
                    }
                }
            }
            MCPMessage::Request(request) => {
                warn!("Ignoring unexpected request {} from server", request.method);
            }
        }
    }

    /// Resolve every pending request with the given error
    fn fail_all_pending(&self, error: MCPError) {
        let ids: Vec<MessageId> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                debug!("Failing pending request {} ({})", id, pending.method);
                self.stats.lock().update_request(false, pending.sent_at.elapsed());
                let _ = pending.sender.send(Err(error.clone()));
            }
        }
    }
}

impl Clone for MCPClient {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            transport: Arc::clone(&self.transport),
            status: Arc::clone(&self.status),
            next_id: Arc::clone(&self.next_id),
            pending: Arc::clone(&self.pending),
            stats: Arc::clone(&self.stats),
            notification_handlers: Arc::clone(&self.notification_handlers),
            server_info: Arc::clone(&self.server_info),
            server_capabilities: Arc::clone(&self.server_capabilities),
            receive_task: Arc::clone(&self.receive_task),
            connected_at: Arc::clone(&self.connected_at),
            shutdown: self.shutdown.clone(),
        }
    }
}
