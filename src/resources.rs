//! Resource registration and reading
//!
//! Resources are addressed by URI and served through `resources/list`
//! and `resources/read`. The registry holds statically registered
//! entries plus any number of providers; reads consult the static table
//! first, then each provider in registration order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};
use url::Url;

use crate::error::{MCPError, MCPResult};

/// Wire description of one resource, as returned from `resources/list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Resource URI
    pub uri: String,
    /// Human-readable name
    pub name: String,
    /// Resource description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ResourceDescriptor {
    /// Create a new descriptor
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            description: None,
            mime_type: None,
        }
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set MIME type
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// One block of resource content, as returned from `resources/read`
///
/// Text content carries `text`; binary content carries a base64 `blob`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceContents {
    /// Resource URI
    pub uri: String,
    /// MIME type
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Text payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64-encoded binary payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

impl ResourceContents {
    /// Create text contents
    pub fn text(uri: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type: None,
            text: Some(text.into()),
            blob: None,
        }
    }

    /// Create binary contents, base64-encoding the payload
    pub fn blob(uri: impl Into<String>, data: &[u8]) -> Self {
        Self {
            uri: uri.into(),
            mime_type: None,
            text: None,
            blob: Some(base64::encode(data)),
        }
    }

    /// Set MIME type
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// `resources/list` result payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResourcesResult {
    pub resources: Vec<ResourceDescriptor>,
}

/// `resources/read` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceParams {
    /// Resource URI
    pub uri: String,
}

/// `resources/read` result payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceResult {
    pub contents: Vec<ResourceContents>,
}

/// Source of resources beyond the statically registered ones
///
/// `read` returns `Ok(None)` for URIs the provider does not serve,
/// letting the registry try the next one.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Descriptors for everything this provider can serve
    async fn list(&self) -> MCPResult<Vec<ResourceDescriptor>>;

    /// Read one resource, or `None` when the URI is not this provider's
    async fn read(&self, uri: &str) -> MCPResult<Option<Vec<ResourceContents>>>;
}

/// Serves `file://` resources from one directory
///
/// Reads resolve through canonical paths and are refused when they
/// land outside the root.
pub struct FileProvider {
    base_dir: PathBuf,
}

impl FileProvider {
    /// Create a provider rooted at an existing directory
    pub fn new(base_dir: impl AsRef<Path>) -> MCPResult<Self> {
        let base_dir = base_dir.as_ref();
        if !base_dir.is_dir() {
            return Err(MCPError::configuration(format!(
                "resource root is not a directory: {}",
                base_dir.display()
            )));
        }
        let base_dir = base_dir.canonicalize().map_err(|e| {
            MCPError::configuration(format!(
                "cannot canonicalize resource root {}: {}",
                base_dir.display(),
                e
            ))
        })?;
        Ok(Self { base_dir })
    }

    fn resolve(&self, uri: &str) -> MCPResult<Option<PathBuf>> {
        let url = match Url::parse(uri) {
            Ok(url) if url.scheme() == "file" => url,
            _ => return Ok(None),
        };
        let path = url
            .to_file_path()
            .map_err(|_| MCPError::validation(format!("not a usable file URI: {}", uri)))?;
        let path = path
            .canonicalize()
            .map_err(|_| MCPError::resource_not_found(uri))?;
        if !path.starts_with(&self.base_dir) {
            return Err(MCPError::validation(format!(
                "path escapes the resource root: {}",
                uri
            )));
        }
        Ok(Some(path))
    }
}

#[async_trait]
impl ResourceProvider for FileProvider {
    async fn list(&self) -> MCPResult<Vec<ResourceDescriptor>> {
        let mut resources = Vec::new();
        let mut entries = fs::read_dir(&self.base_dir).await.map_err(|e| {
            MCPError::configuration(format!(
                "cannot read resource root {}: {}",
                self.base_dir.display(),
                e
            ))
        })?;

        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            MCPError::configuration(format!("cannot read directory entry: {}", e))
        })? {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };

            let mut descriptor =
                ResourceDescriptor::new(format!("file://{}", path.display()), name);
            if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                descriptor = descriptor.with_mime_type(mime_for_extension(ext));
            }
            resources.push(descriptor);
        }

        Ok(resources)
    }

    async fn read(&self, uri: &str) -> MCPResult<Option<Vec<ResourceContents>>> {
        let path = match self.resolve(uri)? {
            Some(path) => path,
            None => return Ok(None),
        };

        let data = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MCPError::resource_not_found(uri)
            } else {
                MCPError::internal_server(format!("failed to read {}: {}", path.display(), e))
            }
        })?;

        let mime_type = path
            .extension()
            .and_then(|e| e.to_str())
            .map(mime_for_extension);

        let mut contents = match String::from_utf8(data) {
            Ok(text) => ResourceContents::text(uri, text),
            Err(e) => ResourceContents::blob(uri, e.as_bytes()),
        };
        contents.mime_type = mime_type.map(str::to_string);

        Ok(Some(vec![contents]))
    }
}

/// Best-effort MIME type from a file extension
fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "txt" | "rs" | "py" | "js" | "ts" | "css" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "toml" => "application/toml",
        "yaml" | "yml" => "application/yaml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

struct StaticResource {
    descriptor: ResourceDescriptor,
    contents: Vec<ResourceContents>,
}

/// Resource registry
///
/// URI-keyed static entries plus providers consulted in registration
/// order. The last registration wins on URI collision.
pub struct ResourceRegistry {
    entries: RwLock<IndexMap<String, StaticResource>>,
    providers: RwLock<Vec<Arc<dyn ResourceProvider>>>,
}

impl ResourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
            providers: RwLock::new(Vec::new()),
        }
    }

    /// Register a fixed text resource, replacing any entry with the same URI
    pub fn register_text(&self, descriptor: ResourceDescriptor, text: impl Into<String>) {
        let mut contents = ResourceContents::text(descriptor.uri.clone(), text);
        contents.mime_type = descriptor.mime_type.clone();
        self.register_contents(descriptor, vec![contents]);
    }

    /// Register pre-built contents, replacing any entry with the same URI
    pub fn register_contents(
        &self,
        descriptor: ResourceDescriptor,
        contents: Vec<ResourceContents>,
    ) {
        let uri = descriptor.uri.clone();
        let entry = StaticResource {
            descriptor,
            contents,
        };
        if self.entries.write().insert(uri.clone(), entry).is_some() {
            warn!("Replacing existing resource: {}", uri);
        } else {
            debug!("Registered resource: {}", uri);
        }
    }

    /// Remove a static entry; returns whether it was present
    pub fn unregister(&self, uri: &str) -> bool {
        self.entries.write().shift_remove(uri).is_some()
    }

    /// Register a provider, consulted after the static entries
    pub fn register_provider(&self, provider: Arc<dyn ResourceProvider>) {
        self.providers.write().push(provider);
        debug!("Registered resource provider");
    }

    /// All descriptors: static entries first, then provider listings
    pub async fn descriptors(&self) -> Vec<ResourceDescriptor> {
        let mut all: Vec<ResourceDescriptor> = self
            .entries
            .read()
            .values()
            .map(|r| r.descriptor.clone())
            .collect();

        let providers: Vec<_> = self.providers.read().clone();
        for provider in providers {
            match provider.list().await {
                Ok(mut resources) => all.append(&mut resources),
                Err(e) => warn!("Resource provider failed to list: {}", e),
            }
        }

        all
    }

    /// Read one resource by URI
    pub async fn read(&self, uri: &str) -> MCPResult<Vec<ResourceContents>> {
        if let Some(entry) = self.entries.read().get(uri) {
            return Ok(entry.contents.clone());
        }

        let providers: Vec<_> = self.providers.read().clone();
        for provider in providers {
            if let Some(contents) = provider.read(uri).await? {
                return Ok(contents);
            }
        }

        Err(MCPError::resource_not_found(uri))
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
