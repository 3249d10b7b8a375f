//! Agent module for autonomous task execution
//!
//! The agent alternates model calls and tool executions until the task is
//! reported complete, a fatal error occurs, or the step budget runs out.

pub mod agent_loop;
pub mod state;
pub mod tracker;

pub use agent_loop::{contains_completion_keyword, AgentLoop, COMPLETION_KEYWORDS};
pub use state::{AgentConfig, AgentError, AgentExecution, AgentStatus, ExecutionStep, StepAction};
pub use tracker::{ExecutionTracker, TrackerStats};
