//! Tool registration, parameter binding, and execution
//!
//! Tools are registered explicitly: each one is a descriptor value
//! carrying a name, a description, typed parameters, and a handler.
//! The registry derives the JSON Schema advertised through `tools/list`
//! from the declared parameters, and `tools/call` binds, validates, and
//! transforms arguments before the handler runs. Failures at any stage
//! become an `isError` result; the only error that leaves the registry
//! is an unknown tool name.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::error::{MCPError, MCPResult};
use crate::resources::ResourceContents;
use crate::server::{panic_message, RequestContext};

/// Schema-primitive parameter kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamKind {
    /// JSON Schema type name
    pub fn schema_type(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
        }
    }

    fn check(self, value: &Value) -> Result<(), String> {
        match (self, value) {
            (ParamKind::String, Value::String(_)) => Ok(()),
            (ParamKind::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(()),
            (ParamKind::Integer, Value::Number(_)) => Err("expected an integer".to_string()),
            (ParamKind::Number, Value::Number(_)) => Ok(()),
            (ParamKind::Boolean, Value::Bool(_)) => Ok(()),
            (ParamKind::Array, Value::Array(_)) => Ok(()),
            (ParamKind::Object, Value::Object(_)) => Ok(()),
            _ => Err(format!(
                "expected {}, got {}",
                self.schema_type(),
                json_type_name(value)
            )),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One validation or transformation step for a bound parameter
///
/// Processors run in the order they were attached; the first error
/// aborts the call and its message becomes the tool result. A processor
/// may also supply a fallback for an unsupplied parameter, which makes
/// that parameter optional.
pub trait ParameterProcessor: Send + Sync {
    /// Transform or reject a supplied value
    fn process(&self, value: Value, kind: ParamKind) -> Result<Value, String>;

    /// Fallback used when the parameter was not supplied
    fn default_value(&self) -> Option<Value> {
        None
    }
}

/// Rejects numeric values outside `[min, max]`, bounds included
#[derive(Debug, Clone)]
pub struct Range {
    min: f64,
    max: f64,
}

impl Range {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

impl ParameterProcessor for Range {
    fn process(&self, value: Value, _kind: ParamKind) -> Result<Value, String> {
        let n = value
            .as_f64()
            .ok_or_else(|| "range check needs a numeric value".to_string())?;
        if n < self.min || n > self.max {
            return Err(format!(
                "value {} is outside the range [{}, {}]",
                n, self.min, self.max
            ));
        }
        Ok(value)
    }
}

/// Clamps numeric values into `[min, max]`, bounds included
#[derive(Debug, Clone)]
pub struct Clamp {
    min: f64,
    max: f64,
}

impl Clamp {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

impl ParameterProcessor for Clamp {
    fn process(&self, value: Value, kind: ParamKind) -> Result<Value, String> {
        let n = value
            .as_f64()
            .ok_or_else(|| "clamp needs a numeric value".to_string())?;
        let clamped = n.clamp(self.min, self.max);
        if clamped == n {
            // Already in range; keep the original number form.
            return Ok(value);
        }
        if kind == ParamKind::Integer {
            Ok(json!(clamped as i64))
        } else {
            serde_json::Number::from_f64(clamped)
                .map(Value::Number)
                .ok_or_else(|| format!("clamped value {} is not representable", clamped))
        }
    }
}

/// Rejects strings that do not match a regular expression
#[derive(Debug, Clone)]
pub struct Pattern {
    regex: Regex,
}

impl Pattern {
    pub fn new(pattern: &str) -> MCPResult<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| MCPError::validation(format!("invalid pattern: {}", e)))?;
        Ok(Self { regex })
    }
}

impl ParameterProcessor for Pattern {
    fn process(&self, value: Value, _kind: ParamKind) -> Result<Value, String> {
        let s = value
            .as_str()
            .ok_or_else(|| "pattern check needs a string value".to_string())?;
        if !self.regex.is_match(s) {
            return Err(format!(
                "value does not match pattern {}",
                self.regex.as_str()
            ));
        }
        Ok(value)
    }
}

/// Rejects values outside a fixed allowed set
#[derive(Debug, Clone)]
pub struct AllowedValues {
    values: Vec<Value>,
}

impl AllowedValues {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }
}

impl ParameterProcessor for AllowedValues {
    fn process(&self, value: Value, _kind: ParamKind) -> Result<Value, String> {
        if !self.values.contains(&value) {
            return Err("value is not one of the allowed values".to_string());
        }
        Ok(value)
    }
}

/// Supplies a fallback value, making its parameter optional
#[derive(Debug, Clone)]
pub struct Fallback {
    value: Value,
}

impl Fallback {
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}

impl ParameterProcessor for Fallback {
    fn process(&self, value: Value, _kind: ParamKind) -> Result<Value, String> {
        Ok(value)
    }

    fn default_value(&self) -> Option<Value> {
        Some(self.value.clone())
    }
}

/// One declared tool parameter
#[derive(Clone)]
pub struct ToolParameter {
    /// Parameter name
    pub name: String,
    /// Parameter description
    pub description: Option<String>,
    /// Declared kind, validated before binding
    pub kind: ParamKind,
    /// Declared default value
    pub default: Option<Value>,
    processors: Vec<Arc<dyn ParameterProcessor>>,
}

impl ToolParameter {
    /// Create a new parameter
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            description: None,
            kind,
            default: None,
            processors: Vec::new(),
        }
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set default value
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Append a processor to the chain
    pub fn with_processor(mut self, processor: impl ParameterProcessor + 'static) -> Self {
        self.processors.push(Arc::new(processor));
        self
    }

    /// Required exactly when neither a declared default nor a processor
    /// fallback exists
    pub fn is_required(&self) -> bool {
        self.default.is_none() && self.processors.iter().all(|p| p.default_value().is_none())
    }

    fn fallback(&self) -> Option<Value> {
        self.default
            .clone()
            .or_else(|| self.processors.iter().find_map(|p| p.default_value()))
    }

    fn bind(&self, value: Value) -> Result<Value, String> {
        self.kind
            .check(&value)
            .map_err(|e| format!("Invalid parameter '{}': {}", self.name, e))?;
        let mut value = value;
        for processor in &self.processors {
            value = processor
                .process(value, self.kind)
                .map_err(|e| format!("Invalid parameter '{}': {}", self.name, e))?;
        }
        Ok(value)
    }
}

impl fmt::Debug for ToolParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolParameter")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("required", &self.is_required())
            .finish_non_exhaustive()
    }
}

/// Content block in a tool result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        /// Base64-encoded image data
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    #[serde(rename = "resource")]
    Resource { resource: ResourceContents },
}

impl ToolContent {
    /// Create text content
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create image content
    pub fn image(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::Image {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Create embedded resource content
    pub fn resource(resource: ResourceContents) -> Self {
        Self::Resource { resource }
    }
}

/// Wire description of one tool, as returned from `tools/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: String,
    /// Input schema
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// `tools/list` result payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolDescriptor>,
}

/// `tools/call` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Tool name
    pub name: String,
    /// Tool arguments, an object keyed by parameter name or a
    /// positional array
    #[serde(default)]
    pub arguments: Value,
}

/// `tools/call` result payload
///
/// Tool failures stay at this level: `is_error` is set and the content
/// explains what went wrong, while the protocol response remains a
/// success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", default, skip_serializing_if = "is_false")]
    pub is_error: bool,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl CallToolResult {
    /// Create a successful result
    pub fn success(content: Vec<ToolContent>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    /// Create a successful single-text result
    pub fn text(text: impl Into<String>) -> Self {
        Self::success(vec![ToolContent::text(text)])
    }

    /// Create a failed result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(message)],
            is_error: true,
        }
    }
}

/// Executes a tool once its arguments are bound
///
/// Arguments arrive in declared-parameter order, already validated and
/// transformed. An `Err` becomes an `isError` result, never a protocol
/// fault.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Vec<Value>, context: RequestContext) -> MCPResult<Vec<ToolContent>>;
}

type BoxToolFuture = Pin<Box<dyn Future<Output = MCPResult<Vec<ToolContent>>> + Send>>;

/// Wrap a plain async function as a [`ToolHandler`]
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Vec<Value>, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MCPResult<Vec<ToolContent>>> + Send + 'static,
{
    struct FnHandler(Box<dyn Fn(Vec<Value>, RequestContext) -> BoxToolFuture + Send + Sync>);

    #[async_trait]
    impl ToolHandler for FnHandler {
        async fn call(
            &self,
            args: Vec<Value>,
            context: RequestContext,
        ) -> MCPResult<Vec<ToolContent>> {
            (self.0)(args, context).await
        }
    }

    Arc::new(FnHandler(Box::new(move |args, context| {
        Box::pin(f(args, context))
    })))
}

/// Tool definition
pub struct Tool {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: String,
    parameters: Vec<ToolParameter>,
    handler: Arc<dyn ToolHandler>,
}

impl Tool {
    /// Create a new tool
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            handler,
        }
    }

    /// Append a parameter
    pub fn with_parameter(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Declared parameters, in order
    pub fn parameters(&self) -> &[ToolParameter] {
        &self.parameters
    }

    /// Input schema derived from the declared parameters
    pub fn input_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for param in &self.parameters {
            let mut schema = serde_json::Map::new();
            schema.insert(
                "type".to_string(),
                Value::String(param.kind.schema_type().to_string()),
            );
            if let Some(ref description) = param.description {
                schema.insert(
                    "description".to_string(),
                    Value::String(description.clone()),
                );
            }
            properties.insert(param.name.clone(), Value::Object(schema));

            if param.is_required() {
                required.push(Value::String(param.name.clone()));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Wire descriptor for `tools/list`
    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema(),
        }
    }

    /// Bind arguments to the declared parameters, in order
    ///
    /// Objects bind by name, arrays by position. The error string is the
    /// tool result, so it is written for the caller.
    fn bind_arguments(&self, arguments: &Value) -> Result<Vec<Value>, String> {
        // Container shape is checked up front; a tool without parameters
        // still rejects a scalar argument payload.
        if !matches!(arguments, Value::Object(_) | Value::Array(_) | Value::Null) {
            return Err(format!(
                "arguments must be an object or an array, got {}",
                json_type_name(arguments)
            ));
        }

        let mut bound = Vec::with_capacity(self.parameters.len());

        for (index, param) in self.parameters.iter().enumerate() {
            let supplied = match arguments {
                Value::Object(map) => map.get(&param.name).cloned(),
                Value::Array(items) => items.get(index).cloned(),
                _ => None,
            };

            match supplied {
                Some(value) if !value.is_null() => bound.push(param.bind(value)?),
                _ => match param.fallback() {
                    Some(value) => bound.push(value),
                    None => {
                        return Err(format!(
                            "Invalid parameter '{}': required and not supplied",
                            param.name
                        ))
                    }
                },
            }
        }

        Ok(bound)
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

/// Tool execution statistics
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ToolStats {
    /// Total calls
    pub total_calls: u64,
    /// Calls that produced a success result
    pub successful_calls: u64,
    /// Calls that produced an error result
    pub failed_calls: u64,
    /// Calls by tool
    pub calls_by_tool: HashMap<String, u64>,
    /// Average call time
    pub average_call_time: Duration,
    /// Last call timestamp
    pub last_call: Option<DateTime<Utc>>,
}

impl ToolStats {
    /// Record one call
    pub fn update(&mut self, tool_name: &str, success: bool, duration: Duration) {
        self.total_calls += 1;

        if success {
            self.successful_calls += 1;
        } else {
            self.failed_calls += 1;
        }

        *self.calls_by_tool.entry(tool_name.to_string()).or_insert(0) += 1;

        let total_time = self.average_call_time.as_nanos() as u64 * (self.total_calls - 1)
            + duration.as_nanos() as u64;
        self.average_call_time = Duration::from_nanos(total_time / self.total_calls);

        self.last_call = Some(Utc::now());
    }

    /// Fraction of calls that produced a success result
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.successful_calls as f64 / self.total_calls as f64
        }
    }
}

/// Tool registry
///
/// Name-keyed tool table. Registration may happen at any time; lookup is
/// by exact name and the last registration wins on collision.
pub struct ToolRegistry {
    tools: RwLock<IndexMap<String, Arc<Tool>>>,
    stats: Mutex<ToolStats>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(IndexMap::new()),
            stats: Mutex::new(ToolStats::default()),
        }
    }

    /// Register a tool, replacing any existing tool with the same name
    pub fn register(&self, tool: Tool) {
        let name = tool.name.clone();
        if self.tools.write().insert(name.clone(), Arc::new(tool)).is_some() {
            warn!("Replacing existing tool: {}", name);
        } else {
            debug!("Registered tool: {}", name);
        }
    }

    /// Remove a tool; returns whether it was present
    pub fn unregister(&self, name: &str) -> bool {
        self.tools.write().shift_remove(name).is_some()
    }

    /// Whether a tool with this name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    /// Wire descriptors in registration order
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.read().values().map(|t| t.descriptor()).collect()
    }

    /// Get execution statistics
    pub fn stats(&self) -> ToolStats {
        self.stats.lock().clone()
    }

    /// Run one tool call end to end
    ///
    /// Binding failures, handler errors, and handler panics all come back
    /// as an `isError` result; the only `Err` is an unknown tool name.
    pub async fn call(
        &self,
        name: &str,
        arguments: Value,
        context: RequestContext,
    ) -> MCPResult<CallToolResult> {
        let started = Instant::now();
        let tool = self
            .tools
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| MCPError::tool_not_found(name))?;

        if let Value::Object(ref map) = arguments {
            for key in map.keys() {
                if !tool.parameters().iter().any(|p| p.name == *key) {
                    warn!("Unknown argument '{}' for tool '{}'", key, name);
                }
            }
        }

        let args = match tool.bind_arguments(&arguments) {
            Ok(args) => args,
            Err(message) => {
                debug!("Binding failed for tool '{}': {}", name, message);
                self.stats.lock().update(name, false, started.elapsed());
                return Ok(CallToolResult::error(message));
            }
        };

        debug!("Executing tool '{}'", name);
        let result = match AssertUnwindSafe(tool.handler.call(args, context))
            .catch_unwind()
            .await
        {
            Ok(Ok(content)) => CallToolResult::success(content),
            Ok(Err(e)) => {
                debug!("Tool '{}' failed: {}", name, e);
                CallToolResult::error(e.to_string())
            }
            Err(panic) => {
                let detail = panic_message(panic);
                error!("Tool '{}' panicked: {}", name, detail);
                CallToolResult::error(format!("tool '{}' panicked: {}", name, detail))
            }
        };

        self.stats.lock().update(name, !result.is_error, started.elapsed());
        Ok(result)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
