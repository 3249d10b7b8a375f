//! Agent state management

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use trae_llm::{LlmError, Message, ToolCall};

use super::tracker::TrackerStats;
use crate::tools::ToolResult;

/// Configuration for the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// System prompt; built from the tool list when unset
    pub system_prompt: Option<String>,
    /// Maximum model calls before giving up
    pub max_steps: usize,
    /// Working directory for tools
    pub working_dir: PathBuf,
    /// Upper bound for a single tool execution
    pub tool_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_steps: 20,
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            tool_timeout: Duration::from_secs(600),
        }
    }
}

impl AgentConfig {
    pub fn new(max_steps: usize) -> Self {
        Self {
            max_steps,
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }
}

/// Lifecycle of one task execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Running,
    Succeeded,
    Failed,
    StepLimitExceeded,
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Succeeded | AgentStatus::Failed | AgentStatus::StepLimitExceeded
        )
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Running => write!(f, "running"),
            AgentStatus::Succeeded => write!(f, "succeeded"),
            AgentStatus::Failed => write!(f, "failed"),
            AgentStatus::StepLimitExceeded => write!(f, "step limit exceeded"),
        }
    }
}

/// Why a run did not succeed
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("model call failed: {0}")]
    Gateway(#[from] LlmError),

    #[error("tool not found: {0} (code 404)")]
    UnknownTool(String),

    #[error("reached the maximum of {0} steps without completing the task")]
    StepLimit(usize),

    #[error("execution cancelled")]
    Cancelled,

    #[error("task reported failure: {0}")]
    TaskReportedFailure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    ModelCall,
    ToolExecution,
}

/// One entry of the execution log
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStep {
    /// Position in the log, starting at 1
    pub sequence: usize,
    /// Loop iteration (model call count) that produced this step
    pub step_number: usize,
    pub action: StepAction,
    pub input: String,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
    pub timestamp: DateTime<Utc>,
}

/// Mutable state of a run, owned by the loop
#[derive(Debug)]
pub struct AgentState {
    pub task: String,
    pub status: AgentStatus,
    /// Message history
    pub messages: Vec<Message>,
    /// Model calls made so far
    pub step: usize,
    pub steps: Vec<ExecutionStep>,
    pub tool_results: Vec<ToolResult>,
    pub final_output: Option<String>,
    pub error: Option<AgentError>,
}

impl AgentState {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            status: AgentStatus::Idle,
            messages: Vec::new(),
            step: 0,
            steps: Vec::new(),
            tool_results: Vec::new(),
            final_output: None,
            error: None,
        }
    }

    pub fn start(&mut self) {
        self.status = AgentStatus::Running;
        self.step = 0;
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn mark_succeeded(&mut self, output: impl Into<String>) {
        self.status = AgentStatus::Succeeded;
        self.final_output = Some(output.into());
    }

    pub fn mark_failed(&mut self, error: AgentError) {
        self.status = match error {
            AgentError::StepLimit(_) => AgentStatus::StepLimitExceeded,
            _ => AgentStatus::Failed,
        };
        self.error = Some(error);
    }

    /// Append a step and return it
    pub fn record_step(
        &mut self,
        action: StepAction,
        input: impl Into<String>,
        output: impl Into<String>,
        tool_call: Option<ToolCall>,
        tool_result: Option<ToolResult>,
    ) -> &ExecutionStep {
        self.steps.push(ExecutionStep {
            sequence: self.steps.len() + 1,
            step_number: self.step,
            action,
            input: input.into(),
            output: output.into(),
            tool_call,
            tool_result,
            timestamp: Utc::now(),
        });
        &self.steps[self.steps.len() - 1]
    }
}

/// Final record of one task
#[derive(Debug)]
pub struct AgentExecution {
    pub task: String,
    pub status: AgentStatus,
    pub success: bool,
    pub final_output: Option<String>,
    pub error: Option<AgentError>,
    pub steps: Vec<ExecutionStep>,
    pub tool_results: Vec<ToolResult>,
    pub tool_stats: TrackerStats,
    /// Number of model calls
    pub step_count: usize,
    pub duration: Duration,
}

impl AgentExecution {
    pub fn from_state(state: AgentState, tool_stats: TrackerStats, duration: Duration) -> Self {
        Self {
            success: state.status == AgentStatus::Succeeded,
            task: state.task,
            status: state.status,
            final_output: state.final_output,
            error: state.error,
            steps: state.steps,
            tool_results: state.tool_results,
            tool_stats,
            step_count: state.step,
            duration,
        }
    }
}
