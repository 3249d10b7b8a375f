//! Explicit completion signal

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{optional_bool, optional_str, required_str, ParameterProperty, ParameterSchema, Tool, ToolContext, ToolError, ToolResult};

/// Name the agent loop watches for
pub const TASK_DONE: &str = "task_done";

pub struct TaskDoneTool;

/// Whether a task_done call reported success; `None` if the flag is absent
pub fn reported_success(args: &Value) -> Option<bool> {
    optional_bool(args, "success")
}

#[async_trait]
impl Tool for TaskDoneTool {
    fn name(&self) -> &str {
        TASK_DONE
    }

    fn description(&self) -> &str {
        "Mark the task as finished. Call exactly once when the work is complete (or cannot be completed), with a summary and the final result."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("summary", ParameterProperty::string("What was done and the outcome"))
            .with_required("success", ParameterProperty::boolean("Whether the task was completed successfully"))
            .with_property("output", ParameterProperty::string("Final output or result of the task"))
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let summary = required_str(args, "summary")?;
        let success = reported_success(args)
            .ok_or_else(|| ToolError::InvalidArguments("missing required parameter: success".to_string()))?;

        let status = if success { "completed" } else { "not completed" };
        let mut text = format!("Task {status}\nSummary: {summary}");
        if let Some(output) = optional_str(args, "output").filter(|o| !o.is_empty()) {
            text.push_str("\nOutput: ");
            text.push_str(output);
        }

        Ok(ToolResult::success(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_task_done_output() {
        let result = TaskDoneTool
            .execute(&json!({"summary": "made file", "success": true, "output": "a.txt"}), &ToolContext::default())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "Task completed\nSummary: made file\nOutput: a.txt");
    }

    #[tokio::test]
    async fn test_task_done_failure_report() {
        let args = json!({"summary": "no network", "success": false});
        let result = TaskDoneTool.execute(&args, &ToolContext::default()).await.unwrap();
        assert!(result.output.starts_with("Task not completed"));
        assert_eq!(reported_success(&args), Some(false));
    }
}
