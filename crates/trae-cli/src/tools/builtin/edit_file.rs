//! File editing tool: replace or append whole-file content

use std::path::{Component, Path};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::tools::{
    optional_bool, optional_str, required_str, ParameterProperty, ParameterSchema, Tool, ToolContext, ToolError,
    ToolResult,
};

/// Suffix appended to the original file when a backup is requested
pub const BACKUP_SUFFIX: &str = ".backup";

/// Tool for writing or appending file contents
pub struct EditFileTool;

fn check_path(raw: &str) -> Result<(), ToolError> {
    if raw.trim().is_empty() {
        return Err(ToolError::InvalidArguments("file_path must not be empty".to_string()));
    }
    if Path::new(raw).components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(ToolError::InvalidArguments(format!(
            "file_path must not contain '..': {raw}"
        )));
    }
    Ok(())
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Create or modify a file. mode=replace overwrites the whole file, mode=append adds to the end. Parent directories are created as needed."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("file_path", ParameterProperty::string("Path of the file, relative to the working directory or absolute"))
            .with_required("content", ParameterProperty::string("Content to write"))
            .with_property(
                "mode",
                ParameterProperty::string("How to write the content (default: replace)")
                    .with_enum(&["replace", "append"])
                    .with_default(json!("replace")),
            )
            .with_property(
                "backup",
                ParameterProperty::boolean("Copy the existing file to <file_path>.backup first (default: false)")
                    .with_default(json!(false)),
            )
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let raw_path = required_str(args, "file_path")?;
        let content = required_str(args, "content")?;
        let append = optional_str(args, "mode") == Some("append");
        let backup = optional_bool(args, "backup").unwrap_or(false);

        check_path(raw_path)?;
        let path = ctx.resolve_path(raw_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ToolError::Execution(format!("failed to create directories: {e}")))?;
            }
        }

        let exists = fs::try_exists(&path).await.unwrap_or(false);
        let mut backup_note = String::new();
        if backup && exists {
            let mut backup_path = path.clone().into_os_string();
            backup_path.push(BACKUP_SUFFIX);
            fs::copy(&path, &backup_path)
                .await
                .map_err(|e| ToolError::Execution(format!("failed to back up {}: {e}", path.display())))?;
            backup_note = format!(" (backup: {})", Path::new(&backup_path).display());
        }

        if append {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| ToolError::Execution(format!("failed to open {}: {e}", path.display())))?;
            file.write_all(content.as_bytes())
                .await
                .map_err(|e| ToolError::Execution(format!("failed to append to {}: {e}", path.display())))?;
            file.flush()
                .await
                .map_err(|e| ToolError::Execution(format!("failed to flush {}: {e}", path.display())))?;
        } else {
            fs::write(&path, content)
                .await
                .map_err(|e| ToolError::Execution(format!("failed to write {}: {e}", path.display())))?;
        }

        let verb = if append { "Appended" } else { "Wrote" };
        Ok(ToolResult::success(format!(
            "{verb} {} bytes to {}{backup_note}",
            content.len(),
            path.display()
        )))
    }
}
