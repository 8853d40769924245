//! MCP Protocol Core Implementation
//!
//! Implements the Model Context Protocol (MCP) message structures and the
//! JSON-RPC 2.0 encode/decode rules. Decoding discriminates on the *shape*
//! of the parsed object (which of `id`/`method`/`result`/`error` are
//! present), not on field order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display};

use crate::error::{MCPError, MCPResult};

/// MCP protocol revision implemented by this crate
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC version string carried by every wire message
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard MCP method names
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const PING: &str = "ping";
    pub const LIST_TOOLS: &str = "tools/list";
    pub const CALL_TOOL: &str = "tools/call";
    pub const LIST_RESOURCES: &str = "resources/list";
    pub const READ_RESOURCE: &str = "resources/read";
}

/// Message ID for correlating requests and responses
///
/// Either a string or an integer on the wire; echoed back verbatim in the
/// matching response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    String(String),
    Number(i64),
}

impl MessageId {
    /// Create from string
    pub fn from_string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// Create from number
    pub fn from_number(n: i64) -> Self {
        Self::Number(n)
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::String(s) => write!(f, "{}", s),
            MessageId::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<i64> for MessageId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// Standard JSON-RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MCPErrorCode {
    /// Parse error
    ParseError = -32700,
    /// Invalid request
    InvalidRequest = -32600,
    /// Method not found
    MethodNotFound = -32601,
    /// Invalid parameters
    InvalidParams = -32602,
    /// Internal error
    InternalError = -32603,
    /// Server error
    ServerError = -32000,
}

impl MCPErrorCode {
    /// Numeric code as carried on the wire
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Get the standard message for the code
    pub fn message(&self) -> &'static str {
        match self {
            MCPErrorCode::ParseError => "Parse error",
            MCPErrorCode::InvalidRequest => "Invalid Request",
            MCPErrorCode::MethodNotFound => "Method not found",
            MCPErrorCode::InvalidParams => "Invalid params",
            MCPErrorCode::InternalError => "Internal error",
            MCPErrorCode::ServerError => "Server error",
        }
    }
}

/// Inclusive range reserved for server-defined error codes
pub const SERVER_ERROR_RANGE: (i32, i32) = (-32099, -32000);

/// Check whether a code falls in the server-defined range
pub fn is_server_error_code(code: i32) -> bool {
    code >= SERVER_ERROR_RANGE.0 && code <= SERVER_ERROR_RANGE.1
}

/// Wire-level JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolError {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Additional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ProtocolError {
    /// Create a new protocol error
    pub fn new(code: MCPErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Create error with additional data
    pub fn with_data(code: MCPErrorCode, message: impl Into<String>, data: Value) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: Some(data),
        }
    }

    /// Create a custom-coded error (server-defined codes included)
    pub fn custom(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create parse error
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(MCPErrorCode::ParseError, message)
    }

    /// Create invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(MCPErrorCode::InvalidRequest, message)
    }

    /// Create method not found error
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(
            MCPErrorCode::MethodNotFound,
            format!("Method '{}' not found", method.into()),
        )
    }

    /// Create invalid parameters error
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(MCPErrorCode::InvalidParams, message)
    }

    /// Create internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(MCPErrorCode::InternalError, message)
    }

    /// Create server error
    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(MCPErrorCode::ServerError, message)
    }
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ProtocolError {}

/// MCP request message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MCPRequest {
    /// JSON-RPC version (must be "2.0")
    pub jsonrpc: String,
    /// Request ID
    pub id: MessageId,
    /// Method name
    pub method: String,
    /// Request parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl MCPRequest {
    /// Create a new request without parameters
    pub fn new(id: impl Into<MessageId>, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params: None,
        }
    }

    /// Create a request with parameters
    pub fn with_params(
        id: impl Into<MessageId>,
        method: impl Into<String>,
        params: Value,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params: Some(params),
        }
    }

    /// Validate the request structure
    pub fn validate(&self) -> MCPResult<()> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err(MCPError::invalid_request("Invalid JSON-RPC version"));
        }

        if self.method.is_empty() {
            return Err(MCPError::invalid_request("Method name cannot be empty"));
        }

        Ok(())
    }
}

/// MCP response message (success or error, never both)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MCPResponse {
    /// JSON-RPC version (must be "2.0")
    pub jsonrpc: String,
    /// ID of the originating request
    pub id: MessageId,
    /// Response result (success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Response error (failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProtocolError>,
}

impl MCPResponse {
    /// Create a successful response
    pub fn success(id: MessageId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: MessageId, error: ProtocolError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Check if this is a successful response
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Check if this is an error response
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Consume the response, yielding the result value or the wire error
    pub fn into_result(self) -> Result<Value, ProtocolError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }

    /// Validate the response structure
    pub fn validate(&self) -> MCPResult<()> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err(MCPError::invalid_request("Invalid JSON-RPC version"));
        }

        if self.result.is_some() && self.error.is_some() {
            return Err(MCPError::invalid_request(
                "Response cannot have both result and error",
            ));
        }

        if self.result.is_none() && self.error.is_none() {
            return Err(MCPError::invalid_request(
                "Response must have either result or error",
            ));
        }

        Ok(())
    }
}

/// MCP notification message (no id, never answered)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MCPNotification {
    /// JSON-RPC version (must be "2.0")
    pub jsonrpc: String,
    /// Method name
    pub method: String,
    /// Notification parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl MCPNotification {
    /// Create a new notification
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: None,
        }
    }

    /// Create a notification with parameters
    pub fn with_params(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: Some(params),
        }
    }

    /// Validate the notification structure
    pub fn validate(&self) -> MCPResult<()> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err(MCPError::invalid_request("Invalid JSON-RPC version"));
        }

        if self.method.is_empty() {
            return Err(MCPError::invalid_request("Method name cannot be empty"));
        }

        Ok(())
    }
}

/// MCP message enumeration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MCPMessage {
    Request(MCPRequest),
    Response(MCPResponse),
    Notification(MCPNotification),
}

impl MCPMessage {
    /// Serialize the message to its JSON wire form
    pub fn to_json(&self) -> MCPResult<String> {
        encode_message(self)
    }

    /// Validate the message structure
    pub fn validate(&self) -> MCPResult<()> {
        match self {
            MCPMessage::Request(req) => req.validate(),
            MCPMessage::Response(res) => res.validate(),
            MCPMessage::Notification(notif) => notif.validate(),
        }
    }

    /// Get the method name (for requests and notifications)
    pub fn method(&self) -> Option<&str> {
        match self {
            MCPMessage::Request(req) => Some(&req.method),
            MCPMessage::Notification(notif) => Some(&notif.method),
            MCPMessage::Response(_) => None,
        }
    }

    /// Get the message ID (for requests and responses)
    pub fn id(&self) -> Option<&MessageId> {
        match self {
            MCPMessage::Request(req) => Some(&req.id),
            MCPMessage::Response(res) => Some(&res.id),
            MCPMessage::Notification(_) => None,
        }
    }

    /// Check if this is a request message
    pub fn is_request(&self) -> bool {
        matches!(self, MCPMessage::Request(_))
    }

    /// Check if this is a response message
    pub fn is_response(&self) -> bool {
        matches!(self, MCPMessage::Response(_))
    }

    /// Check if this is a notification message
    pub fn is_notification(&self) -> bool {
        matches!(self, MCPMessage::Notification(_))
    }
}

/// Failure produced by [`decode_message`]
///
/// Carries the request id when one could be recovered from the malformed
/// frame, so the dispatch layer can answer with `ParseError`/`InvalidRequest`
/// instead of staying silent.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct DecodeError {
    /// ParseError for unparseable bytes, InvalidRequest for bad shapes
    pub code: MCPErrorCode,
    /// Human-readable description
    pub message: String,
    /// Request id recovered from the frame, when present and well-formed
    pub id: Option<MessageId>,
}

impl DecodeError {
    fn parse(message: impl Into<String>) -> Self {
        Self {
            code: MCPErrorCode::ParseError,
            message: message.into(),
            id: None,
        }
    }

    fn invalid(message: impl Into<String>, id: Option<MessageId>) -> Self {
        Self {
            code: MCPErrorCode::InvalidRequest,
            message: message.into(),
            id,
        }
    }

    /// Convert to a wire error object for a reply
    pub fn to_protocol_error(&self) -> ProtocolError {
        ProtocolError::new(self.code, self.message.clone())
    }
}

/// Encode a message to its JSON wire form
///
/// Absent optional fields are omitted entirely, never emitted as `null`.
pub fn encode_message(message: &MCPMessage) -> MCPResult<String> {
    serde_json::to_string(message)
        .map_err(|e| MCPError::serialization(format!("Failed to encode message: {}", e)))
}

/// Decode one wire frame into a message
///
/// Discrimination order: an object with `id` and no `method` must carry
/// exactly one of `result`/`error` and becomes a response; `method` without
/// `id` is a notification; `method` with `id` is a request; anything else is
/// invalid. A missing or wrong `jsonrpc` version is rejected before shape
/// checks so the error can still carry the recovered id.
pub fn decode_message(raw: &str) -> Result<MCPMessage, DecodeError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| DecodeError::parse(format!("malformed JSON: {}", e)))?;

    let obj = match value.as_object() {
        Some(obj) => obj,
        None => return Err(DecodeError::invalid("invalid message", None)),
    };

    let has_id = obj.contains_key("id");
    let has_method = obj.contains_key("method");

    let id = match obj.get("id") {
        None => None,
        Some(Value::String(s)) => Some(MessageId::String(s.clone())),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(n) => Some(MessageId::Number(n)),
            None => return Err(DecodeError::invalid("invalid request id", None)),
        },
        Some(_) => return Err(DecodeError::invalid("invalid request id", None)),
    };

    match obj.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => {}
        _ => {
            return Err(DecodeError::invalid(
                "missing or invalid jsonrpc version",
                id,
            ))
        }
    }

    if has_id && !has_method {
        let has_result = obj.contains_key("result");
        let has_error = obj.contains_key("error");
        if has_result == has_error {
            return Err(DecodeError::invalid(
                "response must have result or error",
                id,
            ));
        }

        let response: MCPResponse = serde_json::from_value(value)
            .map_err(|e| DecodeError::invalid(format!("invalid response: {}", e), id.clone()))?;
        Ok(MCPMessage::Response(response))
    } else if has_method && !has_id {
        let notification: MCPNotification = serde_json::from_value(value)
            .map_err(|e| DecodeError::invalid(format!("invalid notification: {}", e), None))?;
        Ok(MCPMessage::Notification(notification))
    } else if has_method && has_id {
        let request: MCPRequest = serde_json::from_value(value)
            .map_err(|e| DecodeError::invalid(format!("invalid request: {}", e), id.clone()))?;
        Ok(MCPMessage::Request(request))
    } else {
        Err(DecodeError::invalid("invalid message", id))
    }
}

/// MCP initialization parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol revision the client speaks
    pub protocol_version: String,
    /// Client identity
    pub client_info: ClientInfo,
    /// Client capabilities
    #[serde(default)]
    pub capabilities: ClientCapabilities,
}

/// Client identity advertised during initialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name
    pub name: String,
    /// Client version
    pub version: String,
}

/// Client capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Experimental, non-standard capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
}

/// MCP initialization result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol revision the server speaks
    pub protocol_version: String,
    /// Server identity
    pub server_info: ServerInfo,
    /// Server capabilities
    pub capabilities: ServerCapabilities,
}

/// Server identity returned from initialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name
    pub name: String,
    /// Server version
    pub version: String,
}

/// Server capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Supports tool execution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolCapabilities>,
    /// Supports resource access
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceCapabilities>,
}

/// Tool capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCapabilities {
    /// Emits notifications when the tool list changes
    #[serde(rename = "listChanged", default, skip_serializing_if = "is_false")]
    pub list_changed: bool,
}

/// Resource capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceCapabilities {
    /// Supports resource subscriptions
    #[serde(default, skip_serializing_if = "is_false")]
    pub subscribe: bool,
    /// Emits notifications when the resource list changes
    #[serde(rename = "listChanged", default, skip_serializing_if = "is_false")]
    pub list_changed: bool,
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Per-connection protocol statistics
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ProtocolStats {
    /// Total messages processed
    pub total_messages: u64,
    /// Requests received
    pub requests_received: u64,
    /// Notifications received
    pub notifications_received: u64,
    /// Responses sent
    pub responses_sent: u64,
    /// Error responses sent
    pub errors_sent: u64,
    /// Frames that failed to decode
    pub invalid_messages: u64,
    /// Last activity timestamp
    pub last_activity: Option<DateTime<Utc>>,
}

impl ProtocolStats {
    /// Record a decoded inbound message
    pub fn record_inbound(&mut self, message: &MCPMessage) {
        self.total_messages += 1;
        self.last_activity = Some(Utc::now());

        match message {
            MCPMessage::Request(_) => self.requests_received += 1,
            MCPMessage::Notification(_) => self.notifications_received += 1,
            MCPMessage::Response(_) => {}
        }
    }

    /// Record an outbound response
    pub fn record_response(&mut self, response: &MCPResponse) {
        self.responses_sent += 1;
        if response.is_error() {
            self.errors_sent += 1;
        }
        self.last_activity = Some(Utc::now());
    }

    /// Record a frame that failed to decode
    pub fn record_invalid(&mut self) {
        self.total_messages += 1;
        self.invalid_messages += 1;
        self.last_activity = Some(Utc::now());
    }

    /// Fraction of sent responses that were errors
    pub fn error_rate(&self) -> f64 {
        if self.responses_sent == 0 {
            0.0
        } else {
            self.errors_sent as f64 / self.responses_sent as f64
        }
    }
}
