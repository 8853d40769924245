//! Configuration Management
//!
//! TOML configuration tree for the protocol engine. [`Config::load`] walks
//! the usual locations (working directory, then the user configuration
//! directory) and falls back to built-in defaults, so hosts run without a
//! config file at all. Sections bridge into the richer runtime configs via
//! [`Config::client_config`], [`Config::server_config`], and
//! [`Config::transport_config`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use crate::client::MCPClientConfig;
use crate::error::{MCPError, MCPResult};
use crate::protocol::{ClientInfo, ServerInfo};
use crate::server::MCPServerConfig;
use crate::transport::{TransportConfig, TransportKind};

/// Config file looked up in the working directory
const LOCAL_CONFIG_FILE: &str = "./mcp-conduit.toml";

/// Top-level configuration tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Engine identity and logging
    pub engine: EngineSettings,
    /// Client-side request handling
    pub client: ClientSettings,
    /// Server-side listeners and limits
    pub server: ServerSettings,
    /// Framing and connection limits shared by every transport
    pub transport: TransportSettings,
}

/// Engine identity and logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Name advertised during the handshake
    pub name: String,
    /// Version advertised during the handshake
    pub version: String,
    /// Default log level when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            name: "mcp-conduit".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: if cfg!(debug_assertions) {
                "debug".to_string()
            } else {
                "info".to_string()
            },
        }
    }
}

/// Client-side request handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Log each request and response
    pub enable_logging: bool,
}

impl ClientSettings {
    /// Request timeout as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            enable_logging: true,
        }
    }
}

/// Server-side listeners and limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Transport served when the host does not request one
    pub default_transport: TransportKind,
    /// Bind address for the TCP listener
    pub listen_tcp: String,
    /// Bind address for the HTTP listener
    pub listen_http: String,
    /// Bind address for the WebSocket listener
    pub listen_ws: String,
    /// Maximum concurrent connections
    pub max_connections: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            default_transport: TransportKind::Stdio,
            listen_tcp: "127.0.0.1:9270".to_string(),
            listen_http: "127.0.0.1:9271".to_string(),
            listen_ws: "127.0.0.1:9272".to_string(),
            max_connections: 16,
        }
    }
}

/// Framing and connection limits shared by every transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Upper bound on a single framed message, in bytes
    pub max_message_size: usize,
    /// Outbound connect timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl TransportSettings {
    /// Connect timeout as a [`Duration`]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            max_message_size: 1024 * 1024, // 1MB
            connect_timeout_ms: 10_000,
        }
    }
}

impl Config {
    /// Load configuration from the default locations
    ///
    /// Order: `./mcp-conduit.toml`, then the per-user config file, then
    /// built-in defaults. A file that fails to read, parse, or validate
    /// is skipped rather than aborting startup.
    pub async fn load() -> MCPResult<Self> {
        match Self::load_from_file(LOCAL_CONFIG_FILE).await {
            Ok(config) => {
                info!("Loaded configuration from {}", LOCAL_CONFIG_FILE);
                return Ok(config);
            }
            Err(e) => debug!("Skipping {}: {}", LOCAL_CONFIG_FILE, e),
        }

        if let Some(path) = user_config_path() {
            match Self::load_from_file(&path).await {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    return Ok(config);
                }
                Err(e) => debug!("Skipping {}: {}", path.display(), e),
            }
        }

        info!("Using default configuration");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> MCPResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| MCPError::configuration(format!("cannot read {}: {}", path.display(), e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| MCPError::configuration(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Write the configuration to a file, creating parent directories
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> MCPResult<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| MCPError::configuration(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                MCPError::configuration(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        fs::write(path, content)
            .await
            .map_err(|e| MCPError::configuration(format!("cannot write {}: {}", path.display(), e)))?;

        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> MCPResult<()> {
        if self.engine.name.is_empty() {
            return Err(MCPError::configuration("engine.name must not be empty"));
        }
        if self.client.request_timeout_ms == 0 {
            return Err(MCPError::configuration(
                "client.request_timeout_ms must be greater than 0",
            ));
        }
        if self.server.max_connections == 0 {
            return Err(MCPError::configuration(
                "server.max_connections must be greater than 0",
            ));
        }
        if self.server.listen_tcp.is_empty()
            || self.server.listen_http.is_empty()
            || self.server.listen_ws.is_empty()
        {
            return Err(MCPError::configuration(
                "server listen addresses must not be empty",
            ));
        }
        if self.transport.max_message_size == 0 {
            return Err(MCPError::configuration(
                "transport.max_message_size must be greater than 0",
            ));
        }
        if self.transport.connect_timeout_ms == 0 {
            return Err(MCPError::configuration(
                "transport.connect_timeout_ms must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Build the transport configuration for one transport kind
    ///
    /// Stdio has no endpoint; the remaining kinds use the configured
    /// listen address, which doubles as the connect address for loopback
    /// clients.
    pub fn transport_config(&self, kind: TransportKind) -> TransportConfig {
        let endpoint = match kind {
            TransportKind::Stdio => String::new(),
            TransportKind::Tcp => self.server.listen_tcp.clone(),
            TransportKind::Http => self.server.listen_http.clone(),
            TransportKind::WebSocket => self.server.listen_ws.clone(),
        };
        TransportConfig {
            kind,
            endpoint,
            connect_timeout: self.transport.connect_timeout(),
            max_message_size: self.transport.max_message_size,
        }
    }

    /// Build a client configuration for the given transport kind
    pub fn client_config(&self, kind: TransportKind) -> MCPClientConfig {
        MCPClientConfig {
            transport: self.transport_config(kind),
            client_info: ClientInfo {
                name: self.engine.name.clone(),
                version: self.engine.version.clone(),
            },
            request_timeout: self.client.request_timeout(),
            enable_logging: self.client.enable_logging,
        }
    }

    /// Build a server configuration carrying this tree's identity and limits
    pub fn server_config(&self) -> MCPServerConfig {
        MCPServerConfig {
            server_info: ServerInfo {
                name: self.engine.name.clone(),
                version: self.engine.version.clone(),
            },
            max_connections: self.server.max_connections,
            max_message_size: self.transport.max_message_size,
            ..MCPServerConfig::default()
        }
    }
}

/// Per-user config path (`<config dir>/mcp-conduit/config.toml`), if the
/// platform exposes a config directory
fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mcp-conduit").join("config.toml"))
}
