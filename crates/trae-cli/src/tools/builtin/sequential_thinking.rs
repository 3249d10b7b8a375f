//! Structured reasoning tool; records a thought without side effects

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{optional_u64, required_str, ParameterProperty, ParameterSchema, Tool, ToolContext, ToolError, ToolResult};

pub struct SequentialThinkingTool;

#[async_trait]
impl Tool for SequentialThinkingTool {
    fn name(&self) -> &str {
        "sequential_thinking"
    }

    fn description(&self) -> &str {
        "Think through a problem one step at a time. Record a single reasoning step; use repeatedly to plan before acting."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("thought", ParameterProperty::string("The current reasoning step"))
            .with_required("step_number", ParameterProperty::integer("Index of this step, starting at 1"))
            .with_property("total_steps", ParameterProperty::integer("Estimated number of steps"))
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let thought = required_str(args, "thought")?;
        let step = optional_u64(args, "step_number")
            .filter(|n| *n >= 1)
            .ok_or_else(|| ToolError::InvalidArguments("step_number must be a positive integer".to_string()))?;

        let mut output = format!("Thinking step {step}");
        if let Some(total) = optional_u64(args, "total_steps") {
            output.push_str(&format!("/{total}"));
        }
        output.push_str(": ");
        output.push_str(thought);

        Ok(ToolResult::success(output))
    }
}
