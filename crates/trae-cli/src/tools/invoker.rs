//! Tool invocation and dispatch

use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use trae_llm::ToolCall;

use super::registry::ToolRegistry;
use super::{ParameterSchema, Tool, ToolContext, ToolError, ToolResult};

/// Result of routing a tool call
#[derive(Debug)]
pub enum RouteResult {
    /// The tool ran (successfully or not)
    Completed(ToolResult),
    /// No tool with the requested name
    NotFound(String),
}

/// Check `args` against a tool's declared parameters
pub fn validate_arguments(schema: &ParameterSchema, args: &Value) -> Result<(), ToolError> {
    let obj = args
        .as_object()
        .ok_or_else(|| ToolError::InvalidArguments("arguments must be a JSON object".to_string()))?;

    for name in &schema.required {
        if obj.get(name).map_or(true, Value::is_null) {
            return Err(ToolError::InvalidArguments(format!("missing required parameter: {name}")));
        }
    }

    for (name, value) in obj {
        let Some(prop) = schema.properties.get(name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        if !type_matches(&prop.param_type, value) {
            return Err(ToolError::InvalidArguments(format!(
                "parameter '{name}' must be of type {}",
                prop.param_type
            )));
        }
        if let Some(ref allowed) = prop.enum_values {
            let ok = value.as_str().is_some_and(|v| allowed.iter().any(|a| a == v));
            if !ok {
                return Err(ToolError::InvalidArguments(format!(
                    "parameter '{name}' must be one of: {}",
                    allowed.join(", ")
                )));
            }
        }
    }

    Ok(())
}

fn type_matches(param_type: &str, value: &Value) -> bool {
    match param_type {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

/// Executes one tool under the context's timeout and cancellation.
///
/// Never fails: every outcome becomes a [`ToolResult`] stamped with the
/// call id, tool name and duration.
#[instrument(skip_all, fields(tool = %call.name(), call_id = %call.id))]
pub async fn invoke(tool: &dyn Tool, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
    let started = Instant::now();
    let args = call.arguments();

    let outcome = match validate_arguments(&tool.parameters_schema(), &args) {
        Err(e) => Err(e),
        Ok(()) => {
            debug!("Executing tool");
            tokio::select! {
                _ = ctx.cancel.cancelled() => Err(ToolError::Cancelled),
                r = tokio::time::timeout(ctx.timeout, tool.execute(&args, ctx)) => {
                    r.unwrap_or(Err(ToolError::TimedOut(ctx.timeout)))
                }
            }
        }
    };

    let mut result = match outcome {
        Ok(result) => {
            if result.success {
                info!(output_len = result.output.len(), "Tool executed successfully");
            } else {
                warn!(error = ?result.error, "Tool reported failure");
            }
            result
        }
        Err(e) => {
            warn!(code = e.code(), error = %e, "Tool execution error");
            ToolResult::from_error(&e)
        }
    };

    result.call_id = call.id.clone();
    result.tool_name = call.name().to_string();
    result.duration_ms = started.elapsed().as_millis() as u64;
    result
}

/// Router for dispatching tool calls by name
#[derive(Debug, Clone)]
pub struct ToolInvoker {
    registry: ToolRegistry,
}

impl ToolInvoker {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// Get a reference to the registry
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Route a single tool call
    pub async fn route(&self, call: &ToolCall, ctx: &ToolContext) -> RouteResult {
        match self.registry.get(call.name()) {
            Some(tool) => RouteResult::Completed(invoke(tool.as_ref(), call, ctx).await),
            None => {
                warn!(tool = %call.name(), "Tool not found");
                RouteResult::NotFound(call.name().to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ParameterProperty;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct EchoTool {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo a message"
        }

        fn parameters_schema(&self) -> ParameterSchema {
            ParameterSchema::new()
                .with_required("text", ParameterProperty::string("Text to echo"))
                .with_property("times", ParameterProperty::integer("Repeat count"))
                .with_property("style", ParameterProperty::string("Style").with_enum(&["plain", "loud"]))
        }

        async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(ToolResult::success(args["text"].as_str().unwrap_or_default()))
        }
    }

    struct SleepyTool;

    #[async_trait]
    impl Tool for SleepyTool {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn description(&self) -> &str {
            "Sleeps"
        }

        fn parameters_schema(&self) -> ParameterSchema {
            ParameterSchema::new()
        }

        async fn execute(&self, _args: &Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ToolResult::success("woke"))
        }
    }

    fn invoker(runs: Arc<AtomicUsize>) -> ToolInvoker {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool { runs });
        registry.register(SleepyTool);
        ToolInvoker::new(registry)
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall::from_value("call_1", name, args)
    }

    #[tokio::test]
    async fn test_route_success_stamps_call() {
        let runs = Arc::new(AtomicUsize::new(0));
        let invoker = invoker(runs.clone());

        let result = match invoker.route(&call("echo", json!({"text": "hi"})), &ToolContext::default()).await {
            RouteResult::Completed(r) => r,
            other => panic!("unexpected: {other:?}"),
        };

        assert!(result.success);
        assert_eq!(result.output, "hi");
        assert_eq!(result.call_id, "call_1");
        assert_eq!(result.tool_name, "echo");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_route_unknown_tool() {
        let invoker = invoker(Arc::new(AtomicUsize::new(0)));
        let outcome = invoker.route(&call("nope", json!({})), &ToolContext::default()).await;
        assert!(matches!(outcome, RouteResult::NotFound(name) if name == "nope"));
    }

    #[tokio::test]
    async fn test_invalid_arguments_never_execute() {
        let runs = Arc::new(AtomicUsize::new(0));
        let invoker = invoker(runs.clone());
        let ctx = ToolContext::default();

        for args in [
            json!({}),
            json!({"text": 5}),
            json!({"text": "x", "times": 1.5}),
            json!({"text": "x", "style": "quiet"}),
        ] {
            let RouteResult::Completed(result) = invoker.route(&call("echo", args.clone()), &ctx).await else {
                panic!("echo should resolve");
            };
            assert!(!result.success, "{args}");
            assert_eq!(result.error_code, Some(400), "{args}");
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_validate_accepts_optional_and_unknown_fields() {
        let schema = EchoTool {
            runs: Arc::new(AtomicUsize::new(0)),
        }
        .parameters_schema();
        assert!(validate_arguments(&schema, &json!({"text": "a", "times": 3, "extra": true})).is_ok());
        assert!(validate_arguments(&schema, &json!({"text": "a", "style": null})).is_ok());
        assert!(validate_arguments(&schema, &json!("text")).is_err());
    }

    #[tokio::test]
    async fn test_timeout_becomes_failure() {
        let invoker = invoker(Arc::new(AtomicUsize::new(0)));
        let ctx = ToolContext::default().with_timeout(Duration::from_millis(20));

        let RouteResult::Completed(result) = invoker.route(&call("sleepy", json!({})), &ctx).await else {
            panic!("sleepy should resolve");
        };
        assert!(!result.success);
        assert_eq!(result.error_code, Some(408));
    }

    #[tokio::test]
    async fn test_cancellation_becomes_failure() {
        let invoker = invoker(Arc::new(AtomicUsize::new(0)));
        let ctx = ToolContext::default();
        ctx.cancel.cancel();

        let RouteResult::Completed(result) = invoker.route(&call("sleepy", json!({})), &ctx).await else {
            panic!("sleepy should resolve");
        };
        assert!(!result.success);
        assert_eq!(result.error_code, Some(499));
    }
}
