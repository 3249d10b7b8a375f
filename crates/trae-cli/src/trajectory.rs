//! Trajectory recording
//!
//! Collects every message, tool call and tool result of a run in memory and
//! writes them as a single JSON document when the run ends.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trae_llm::{Message, ToolCall};

use crate::tools::ToolResult;

const TRAJECTORY_DIR: &str = "trajectories";

/// Receives run events as they happen
pub trait TrajectorySink: Send + Sync {
    fn record_message(&self, message: &Message) -> Result<()>;
    fn record_tool_call(&self, call: &ToolCall) -> Result<()>;
    fn record_tool_result(&self, result: &ToolResult) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryMetadata {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Seconds between start and end
    pub duration: f64,
    pub total_messages: usize,
    pub total_tool_calls: usize,
    pub total_tool_results: usize,
}

/// On-disk shape of a trajectory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryDocument {
    pub metadata: TrajectoryMetadata,
    pub messages: Vec<Message>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    #[serde(default)]
    pub custom_metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrajectorySummary {
    pub path: PathBuf,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration: f64,
    pub total_messages: usize,
    pub total_tool_calls: usize,
    pub total_tool_results: usize,
    pub custom_metadata_keys: Vec<String>,
}

/// Output format for `export`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Yaml,
    Text,
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "yaml" | "yml" => Ok(ExportFormat::Yaml),
            "txt" | "text" => Ok(ExportFormat::Text),
            other => bail!("Unsupported export format: {}", other),
        }
    }
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Yaml => "yaml",
            ExportFormat::Text => "txt",
        }
    }
}

#[derive(Debug, Default)]
struct Recorded {
    messages: Vec<Message>,
    tool_calls: Vec<ToolCall>,
    tool_results: Vec<ToolResult>,
    custom_metadata: BTreeMap<String, Value>,
}

/// In-memory trajectory saved once at the end of a run
#[derive(Debug)]
pub struct TrajectoryRecorder {
    path: PathBuf,
    start_time: DateTime<Utc>,
    /// Fixed for loaded trajectories; live ones end "now"
    end_time: Option<DateTime<Utc>>,
    inner: Mutex<Recorded>,
}

impl TrajectoryRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            start_time: Utc::now(),
            end_time: None,
            inner: Mutex::new(Recorded::default()),
        }
    }

    /// `trajectories/trajectory_YYYYMMDD_HHMMSS.json`
    pub fn default_path() -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        PathBuf::from(TRAJECTORY_DIR).join(format!("trajectory_{}.json", stamp))
    }

    pub fn add_metadata(&self, key: impl Into<String>, value: Value) {
        self.inner.lock().custom_metadata.insert(key.into(), value);
    }

    pub fn metadata(&self, key: &str) -> Option<Value> {
        self.inner.lock().custom_metadata.get(key).cloned()
    }

    /// Snapshot of the trajectory; a live recorder ends now
    fn document(&self) -> TrajectoryDocument {
        let start_time = self.start_time;
        let end_time = self.end_time.unwrap_or_else(Utc::now);
        let inner = self.inner.lock();
        let duration = (end_time - start_time).num_milliseconds().max(0) as f64 / 1000.0;

        TrajectoryDocument {
            metadata: TrajectoryMetadata {
                start_time,
                end_time,
                duration,
                total_messages: inner.messages.len(),
                total_tool_calls: inner.tool_calls.len(),
                total_tool_results: inner.tool_results.len(),
            },
            messages: inner.messages.clone(),
            tool_calls: inner.tool_calls.clone(),
            tool_results: inner.tool_results.clone(),
            custom_metadata: inner.custom_metadata.clone(),
        }
    }

    /// Write the trajectory as pretty JSON, creating parent directories
    pub fn save(&self) -> Result<PathBuf> {
        write_with_parents(&self.path, &self.render(ExportFormat::Json)?)?;
        tracing::debug!(path = %self.path.display(), "Saved trajectory");
        Ok(self.path.clone())
    }

    /// Load a previously saved trajectory
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read trajectory: {}", path.display()))?;
        let doc: TrajectoryDocument =
            serde_json::from_str(&content).context("Failed to parse trajectory")?;

        Ok(Self {
            path: path.to_path_buf(),
            start_time: doc.metadata.start_time,
            end_time: Some(doc.metadata.end_time),
            inner: Mutex::new(Recorded {
                messages: doc.messages,
                tool_calls: doc.tool_calls,
                tool_results: doc.tool_results,
                custom_metadata: doc.custom_metadata,
            }),
        })
    }

    pub fn summary(&self) -> TrajectorySummary {
        let doc = self.document();
        TrajectorySummary {
            path: self.path.clone(),
            start_time: doc.metadata.start_time,
            end_time: doc.metadata.end_time,
            duration: doc.metadata.duration,
            total_messages: doc.metadata.total_messages,
            total_tool_calls: doc.metadata.total_tool_calls,
            total_tool_results: doc.metadata.total_tool_results,
            custom_metadata_keys: doc.custom_metadata.into_keys().collect(),
        }
    }

    /// Write the trajectory to `output` in `format`
    pub fn export(&self, format: ExportFormat, output: impl AsRef<Path>) -> Result<()> {
        write_with_parents(output.as_ref(), &self.render(format)?)
    }

    fn render(&self, format: ExportFormat) -> Result<String> {
        let doc = self.document();
        match format {
            ExportFormat::Json => {
                serde_json::to_string_pretty(&doc).context("Failed to serialize trajectory")
            }
            ExportFormat::Yaml => serde_yaml::to_string(&doc).context("Failed to serialize trajectory"),
            ExportFormat::Text => Ok(render_text(&doc)),
        }
    }
}

impl TrajectorySink for TrajectoryRecorder {
    fn record_message(&self, message: &Message) -> Result<()> {
        self.inner.lock().messages.push(message.clone());
        Ok(())
    }

    fn record_tool_call(&self, call: &ToolCall) -> Result<()> {
        self.inner.lock().tool_calls.push(call.clone());
        Ok(())
    }

    fn record_tool_result(&self, result: &ToolResult) -> Result<()> {
        self.inner.lock().tool_results.push(result.clone());
        Ok(())
    }
}

fn render_text(doc: &TrajectoryDocument) -> String {
    let meta = &doc.metadata;
    let mut out = String::new();
    let _ = writeln!(out, "Agent trajectory");
    let _ = writeln!(out, "================\n");
    let _ = writeln!(out, "Start:      {}", meta.start_time.to_rfc3339());
    let _ = writeln!(out, "End:        {}", meta.end_time.to_rfc3339());
    let _ = writeln!(out, "Duration:   {:.2}s", meta.duration);
    let _ = writeln!(out, "Messages:   {}", meta.total_messages);
    let _ = writeln!(out, "Tool calls: {}\n", meta.total_tool_calls);

    let _ = writeln!(out, "Messages:\n---------");
    for (i, msg) in doc.messages.iter().enumerate() {
        let _ = writeln!(out, "{}. [{}] {}", i + 1, msg.role, msg.content);
    }

    let _ = writeln!(out, "\nTool calls:\n-----------");
    for (i, call) in doc.tool_calls.iter().enumerate() {
        let _ = writeln!(out, "{}. {} {}", i + 1, call.name(), call.arguments());
    }
    out
}

fn write_with_parents(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}
