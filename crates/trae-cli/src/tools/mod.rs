//! Tool framework for agent-based execution
//!
//! Tools are capability objects the model can invoke by name. Each tool
//! declares a JSON-schema style parameter description; the invoker checks
//! arguments against it before execution.

pub mod builtin;
pub mod invoker;
pub mod registry;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use trae_llm::ToolDefinition;

/// Failure raised by a tool or by argument validation.
///
/// `code()` gives an HTTP-like status for machine checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out after {}s", .0.as_secs_f64())]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("execution failed: {0}")]
    Execution(String),
}

impl ToolError {
    pub fn code(&self) -> u16 {
        match self {
            ToolError::InvalidArguments(_) => 400,
            ToolError::NotFound(_) => 404,
            ToolError::TimedOut(_) => 408,
            ToolError::Cancelled => 499,
            ToolError::Execution(_) => 500,
        }
    }
}

/// Result of tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the tool call this answers (stamped by the invoker)
    #[serde(default)]
    pub call_id: String,
    #[serde(default)]
    pub tool_name: String,
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u16>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            tool_name: String::new(),
            success: true,
            output: output.into(),
            error: None,
            error_code: None,
            duration_ms: 0,
        }
    }

    /// Create a failed result
    pub fn error(error: impl Into<String>) -> Self {
        Self::failure(String::new(), error)
    }

    /// Create a failed result with output
    pub fn failure(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
            ..Self::success("")
        }
    }

    pub fn from_error(err: &ToolError) -> Self {
        Self {
            error_code: Some(err.code()),
            ..Self::error(err.to_string())
        }
    }

    /// Text fed back to the model as the tool message content
    pub fn to_message_content(&self) -> String {
        match (&self.error, self.output.is_empty()) {
            (None, _) => self.output.clone(),
            (Some(err), true) => format!("Error: {err}"),
            (Some(err), false) => format!("{}\nError: {err}", self.output),
        }
    }
}

/// Context provided to tools during execution
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Current working directory
    pub working_dir: PathBuf,
    /// Maximum output length in bytes (truncate if exceeded)
    pub max_output_len: usize,
    /// Upper bound for any single tool execution
    pub timeout: Duration,
    /// Run-wide cancellation
    pub cancel: CancellationToken,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            max_output_len: 50000,
            timeout: Duration::from_secs(600),
            cancel: CancellationToken::new(),
        }
    }
}

impl ToolContext {
    /// Create a new context with the given working directory
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Resolve `path` against the working directory
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            p
        } else {
            self.working_dir.join(p)
        }
    }

    /// Cut `text` to `max_output_len`, on a char boundary
    pub fn truncate_output(&self, text: String) -> String {
        if text.len() <= self.max_output_len {
            return text;
        }
        let mut end = self.max_output_len;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!(
            "{}\n\n[Output truncated at {} bytes]",
            &text[..end],
            self.max_output_len
        )
    }
}

/// Schema for a tool parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterProperty {
    /// Parameter type (string, number, integer, boolean, array, object)
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParameterProperty {
    fn typed(param_type: &str, description: impl Into<String>) -> Self {
        Self {
            param_type: param_type.to_string(),
            description: description.into(),
            enum_values: None,
            default: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::typed("string", description)
    }

    pub fn number(description: impl Into<String>) -> Self {
        Self::typed("number", description)
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self::typed("integer", description)
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self::typed("boolean", description)
    }

    pub fn array(description: impl Into<String>) -> Self {
        Self::typed("array", description)
    }

    pub fn object(description: impl Into<String>) -> Self {
        Self::typed("object", description)
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_enum(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("type".into(), json!(self.param_type));
        map.insert("description".into(), json!(self.description));
        if let Some(ref values) = self.enum_values {
            map.insert("enum".into(), json!(values));
        }
        if let Some(ref default) = self.default {
            map.insert("default".into(), default.clone());
        }
        Value::Object(map)
    }
}

/// Schema describing tool parameters
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter properties, ordered by name
    pub properties: BTreeMap<String, ParameterProperty>,
    /// Required parameter names
    #[serde(default)]
    pub required: Vec<String>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_property(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        self.properties.insert(name.into(), prop);
        self
    }

    pub fn with_required(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), prop);
        self.required.push(name);
        self
    }

    /// JSON-schema object form
    pub fn to_value(&self) -> Value {
        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|(name, prop)| (name.clone(), prop.to_value()))
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
        })
    }
}

/// The Tool trait that all tools must implement
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name
    fn name(&self) -> &str;

    /// Get a description of what the tool does
    fn description(&self) -> &str;

    /// Get the parameter schema
    fn parameters_schema(&self) -> ParameterSchema;

    /// Execute the tool with already validated arguments
    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult, ToolError>;

    /// Convert to a tool definition for the model
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters_schema().to_value())
    }
}

pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing required parameter: {key}")))
}

pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

pub(crate) fn optional_u64(args: &Value, key: &str) -> Option<u64> {
    args.get(key).and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)))
}

pub(crate) fn optional_bool(args: &Value, key: &str) -> Option<bool> {
    args.get(key).and_then(Value::as_bool)
}
