//! MCP Conduit - JSON-RPC 2.0 protocol engine for the Model Context Protocol
//!
//! This library implements both halves of an MCP session: a client that
//! correlates requests over a framed transport, and a server that dispatches
//! them to registered handlers, tools, and resources.
//!
//! # Architecture
//!
//! The engine is layered:
//! - **Wire Layer**: JSON-RPC 2.0 message types with strict shape discrimination
//! - **Transport Layer**: framed byte streams (stdio, TCP, HTTP, WebSocket)
//! - **Session Layer**: request correlation, timeouts, and cancellation
//! - **Dispatch Layer**: handler table, tool registry, and resource registry

pub mod cancel;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod resources;
pub mod server;
pub mod tools;
pub mod transport;

pub use cancel::CancelToken;
pub use client::{MCPClient, MCPClientConfig};
pub use config::Config;
pub use error::{MCPError, MCPResult};
pub use protocol::{
    MCPMessage, MCPNotification, MCPRequest, MCPResponse, MessageId, ProtocolError,
};
pub use resources::{ResourceDescriptor, ResourceProvider, ResourceRegistry};
pub use server::{MCPServer, MCPServerConfig, RequestContext, RequestHandler};
pub use tools::{Tool, ToolContent, ToolHandler, ToolParameter, ToolRegistry};
pub use transport::{MCPTransport, TransportConfig, TransportKind};

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the logging system with structured logging
///
/// Respects `RUST_LOG` when set; otherwise logs this crate at `info`.
pub fn initialize_logging() -> Result<()> {
    initialize_logging_with_level("info")
}

/// Initialize logging with a specific default level for this crate
///
/// `RUST_LOG` still wins once set; `level` only fills in when the
/// environment is silent.
pub fn initialize_logging_with_level(level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new(format!("mcp_conduit={}", level))
                }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
