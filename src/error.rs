//! Protocol Engine Error Handling
//!
//! One crate-wide error enumeration with wire-error conversion. Typed RPC
//! faults travel inside [`MCPError::Protocol`] so dispatch can pass their
//! code/message/data through to the peer verbatim.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{DecodeError, ProtocolError};

/// Result type for protocol engine operations
pub type MCPResult<T> = Result<T, MCPError>;

/// Comprehensive protocol engine error enumeration
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum MCPError {
    /// Typed RPC fault, passed through to the wire verbatim
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport-level errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Connection errors
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Transport handshake errors
    #[error("Handshake error: {message}")]
    Handshake { message: String },

    /// Inbound frame failed to decode
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// A correlated request hit its deadline
    #[error("Timeout error: operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// A correlated request was cancelled by its caller
    #[error("Request cancelled")]
    Cancelled,

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Tool-related errors
    #[error("Tool error: {message}")]
    Tool { message: String },

    /// Tool not found
    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    /// Resource not found
    #[error("Resource not found: {uri}")]
    ResourceNotFound { uri: String },

    /// Invalid request
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Internal server errors
    #[error("Internal server error: {message}")]
    InternalServer { message: String },
}

impl MCPError {
    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a handshake error
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a tool error
    pub fn tool(message: impl Into<String>) -> Self {
        Self::Tool {
            message: message.into(),
        }
    }

    /// Create a tool not found error
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound { name: name.into() }
    }

    /// Create a resource not found error
    pub fn resource_not_found(uri: impl Into<String>) -> Self {
        Self::ResourceNotFound { uri: uri.into() }
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create an internal server error
    pub fn internal_server(message: impl Into<String>) -> Self {
        Self::InternalServer {
            message: message.into(),
        }
    }

    /// Convert to a wire error object for a JSON-RPC reply
    pub fn to_protocol_error(&self) -> ProtocolError {
        match self {
            MCPError::Protocol(err) => err.clone(),
            MCPError::Transport { message } => ProtocolError::server_error(message),
            MCPError::Connection { message } => ProtocolError::server_error(message),
            MCPError::Handshake { message } => ProtocolError::server_error(message),
            MCPError::Decode { message } => ProtocolError::parse_error(message),
            MCPError::Serialization { message } => ProtocolError::parse_error(message),
            MCPError::Timeout { timeout_ms } => {
                ProtocolError::server_error(format!("Operation timed out after {}ms", timeout_ms))
            }
            MCPError::Cancelled => ProtocolError::server_error("Request cancelled"),
            MCPError::Validation { message } => ProtocolError::invalid_params(message),
            MCPError::Configuration { message } => ProtocolError::server_error(message),
            MCPError::Tool { message } => ProtocolError::server_error(message),
            MCPError::ToolNotFound { name } => {
                ProtocolError::method_not_found(format!("tool '{}'", name))
            }
            MCPError::ResourceNotFound { uri } => {
                ProtocolError::server_error(format!("Resource not found: {}", uri))
            }
            MCPError::InvalidRequest { message } => ProtocolError::invalid_request(message),
            MCPError::InternalServer { message } => ProtocolError::internal_error(message),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            MCPError::Protocol(_) => ErrorCategory::Protocol,
            MCPError::Transport { .. } => ErrorCategory::Transport,
            MCPError::Connection { .. } => ErrorCategory::Connection,
            MCPError::Handshake { .. } => ErrorCategory::Handshake,
            MCPError::Decode { .. } => ErrorCategory::Decode,
            MCPError::Serialization { .. } => ErrorCategory::Serialization,
            MCPError::Timeout { .. } => ErrorCategory::Timeout,
            MCPError::Cancelled => ErrorCategory::Cancelled,
            MCPError::Validation { .. } => ErrorCategory::Validation,
            MCPError::Configuration { .. } => ErrorCategory::Configuration,
            MCPError::Tool { .. } => ErrorCategory::Tool,
            MCPError::ToolNotFound { .. } => ErrorCategory::Tool,
            MCPError::ResourceNotFound { .. } => ErrorCategory::Resource,
            MCPError::InvalidRequest { .. } => ErrorCategory::InvalidRequest,
            MCPError::InternalServer { .. } => ErrorCategory::Internal,
        }
    }

    /// Check if the error is worth retrying at the host's discretion
    ///
    /// The engine itself never retries (a transport failure stops the
    /// transport); this is advisory for hosts.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MCPError::Transport { .. }
                | MCPError::Connection { .. }
                | MCPError::Timeout { .. }
                | MCPError::InternalServer { .. }
        )
    }
}

/// Error category for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Protocol,
    Transport,
    Connection,
    Handshake,
    Decode,
    Serialization,
    Timeout,
    Cancelled,
    Validation,
    Configuration,
    Tool,
    Resource,
    InvalidRequest,
    Internal,
}

impl From<std::io::Error> for MCPError {
    fn from(err: std::io::Error) -> Self {
        MCPError::transport(err.to_string())
    }
}

impl From<serde_json::Error> for MCPError {
    fn from(err: serde_json::Error) -> Self {
        MCPError::serialization(err.to_string())
    }
}

impl From<DecodeError> for MCPError {
    fn from(err: DecodeError) -> Self {
        MCPError::decode(err.message)
    }
}
