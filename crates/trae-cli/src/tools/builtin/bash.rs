//! Bash command execution tool

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio::time::timeout;

use crate::tools::{optional_u64, required_str, ParameterProperty, ParameterSchema, Tool, ToolContext, ToolError, ToolResult};

const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Tool for executing bash commands
pub struct BashTool;

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a bash command in the working directory and return its combined stdout and stderr. Use for builds, tests, file inspection and git."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("command", ParameterProperty::string("The bash command to execute"))
            .with_property(
                "timeout",
                ParameterProperty::integer("Timeout in seconds (default: 120)").with_default(json!(DEFAULT_TIMEOUT_SECS)),
            )
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let command = required_str(args, "command")?;
        if command.trim().is_empty() {
            return Err(ToolError::InvalidArguments("command must not be empty".to_string()));
        }
        let timeout_secs = optional_u64(args, "timeout").filter(|t| *t > 0).unwrap_or(DEFAULT_TIMEOUT_SECS);

        if !ctx.working_dir.exists() {
            return Err(ToolError::Execution(format!(
                "working directory does not exist: {}",
                ctx.working_dir.display()
            )));
        }

        let (shell, shell_arg) = if cfg!(target_os = "windows") {
            ("cmd", "/C")
        } else {
            ("bash", "-c")
        };

        let mut cmd = Command::new(shell);
        cmd.arg(shell_arg)
            .arg(command)
            .current_dir(&ctx.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let limit = Duration::from_secs(timeout_secs);
        let output = match timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ToolError::Execution(format!("failed to execute command: {e}"))),
            Err(_) => return Err(ToolError::TimedOut(limit)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut combined = String::new();
        if !stdout.is_empty() {
            combined.push_str(&stdout);
        }
        if !stderr.is_empty() {
            if !combined.is_empty() {
                combined.push_str("\n--- stderr ---\n");
            }
            combined.push_str(&stderr);
        }
        let combined = ctx.truncate_output(combined);

        if output.status.success() {
            Ok(ToolResult::success(combined))
        } else {
            let exit_code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            Ok(ToolResult::failure(combined, format!("command exited with code {exit_code}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_bash_echo() {
        let ctx = ToolContext::default();
        let result = BashTool.execute(&json!({ "command": "echo 'hello world'" }), &ctx).await.unwrap();
        assert!(result.success);
        assert!(result.output.contains("hello world"));
    }

    #[tokio::test]
    async fn test_bash_runs_in_working_dir() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(temp_dir.path().to_path_buf());

        let result = BashTool.execute(&json!({ "command": "pwd" }), &ctx).await.unwrap();
        assert!(result.success);
        let expected = temp_dir.path().canonicalize().unwrap();
        assert!(
            result.output.contains(expected.to_str().unwrap()) || result.output.contains(temp_dir.path().to_str().unwrap())
        );
    }

    #[tokio::test]
    async fn test_bash_nonzero_exit() {
        let ctx = ToolContext::default();
        let result = BashTool.execute(&json!({ "command": "echo partial; exit 3" }), &ctx).await.unwrap();
        assert!(!result.success);
        assert!(result.output.contains("partial"));
        assert!(result.error.unwrap().contains("code 3"));
    }

    #[tokio::test]
    async fn test_bash_stderr() {
        let ctx = ToolContext::default();
        let result = BashTool.execute(&json!({ "command": "echo 'error message' >&2" }), &ctx).await.unwrap();
        assert!(result.output.contains("error message"));
    }

    #[tokio::test]
    async fn test_bash_timeout() {
        let ctx = ToolContext::default();
        let err = BashTool
            .execute(&json!({ "command": "sleep 10", "timeout": 1 }), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), 408);
    }

    #[tokio::test]
    async fn test_bash_missing_working_dir() {
        let ctx = ToolContext::new("/definitely/not/here".into());
        let err = BashTool.execute(&json!({ "command": "ls" }), &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::Execution(_)));
        assert_eq!(err.code(), 500);
    }
}
