//! Agent loop implementation

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use trae_llm::{LlmError, Message, MetricsSink, ModelGateway, ModelSettings, NoopMetrics, ToolDefinition};

use crate::console::{Console, SilentConsole};
use crate::tools::builtin::{reported_success, TASK_DONE};
use crate::tools::invoker::{RouteResult, ToolInvoker};
use crate::tools::ToolContext;
use crate::trajectory::TrajectorySink;

use super::state::{AgentConfig, AgentError, AgentExecution, AgentState, AgentStatus, StepAction};
use super::tracker::ExecutionTracker;

/// Phrases that mark a plain reply (or tool output) as a finished task
pub const COMPLETION_KEYWORDS: &[&str] = &[
    "done",
    "finished",
    "complete",
    "over",
    "success",
    "任务完成",
    "完成",
    "任务已结束",
    "执行完毕",
];

/// Case-insensitive completion keyword check
pub fn contains_completion_keyword(text: &str) -> bool {
    let lower = text.to_lowercase();
    COMPLETION_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// The agent loop orchestrator
pub struct AgentLoop {
    gateway: Arc<dyn ModelGateway>,
    settings: Arc<dyn ModelSettings>,
    invoker: ToolInvoker,
    config: AgentConfig,
    console: Arc<dyn Console>,
    metrics: Arc<dyn MetricsSink>,
}

impl AgentLoop {
    /// Create a new agent loop
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        settings: Arc<dyn ModelSettings>,
        invoker: ToolInvoker,
        config: AgentConfig,
    ) -> Self {
        Self {
            gateway,
            settings,
            invoker,
            config,
            console: Arc::new(SilentConsole),
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_console(mut self, console: Arc<dyn Console>) -> Self {
        self.console = console;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn invoker(&self) -> &ToolInvoker {
        &self.invoker
    }

    /// System prompt for a run: the configured one, or one listing the tools
    pub fn system_prompt(&self, tools: &[ToolDefinition]) -> String {
        if let Some(ref prompt) = self.config.system_prompt {
            return prompt.clone();
        }

        let mut prompt = format!(
            "You are an autonomous software engineering agent. You work in the directory {}.\n\
             Use the available tools to inspect files, run commands and make changes until the task is solved.\n\
             Call tools whenever you need to act; their results are returned to you.\n",
            self.config.working_dir.display()
        );
        if tools.iter().any(|t| t.name() == TASK_DONE) {
            prompt.push_str(&format!(
                "When the task is finished, call `{}` with a summary of what you did.\n",
                TASK_DONE
            ));
        } else {
            prompt.push_str("When the task is finished, reply with a short message saying it is done.\n");
        }

        prompt.push_str("\nAvailable tools:\n");
        for tool in tools {
            prompt.push_str(&format!(
                "- {}: {}\n  parameters: {}\n",
                tool.function.name, tool.function.description, tool.function.parameters
            ));
        }
        prompt
    }

    /// Run a task until it completes, fails, or hits the step limit, recording
    /// messages and tool activity into `trajectory` when one is given.
    ///
    /// Never returns an error; the outcome and everything recorded along the
    /// way live in the returned [`AgentExecution`].
    #[instrument(skip_all, fields(model = %self.settings.model(), max_steps = self.config.max_steps))]
    pub async fn run(
        &self,
        task: &str,
        cancel: &CancellationToken,
        trajectory: Option<Arc<dyn TrajectorySink>>,
    ) -> AgentExecution {
        let sink = trajectory.as_deref();
        let started = Instant::now();
        let mut state = AgentState::new(task);
        let mut tracker = ExecutionTracker::new();

        let tool_defs = if self.settings.supports_tool_calling() {
            self.invoker.registry().tool_definitions()
        } else {
            Vec::new()
        };
        let tool_ctx = ToolContext::new(self.config.working_dir.clone())
            .with_timeout(self.config.tool_timeout)
            .with_cancel(cancel.clone());

        info!(task_len = task.len(), tools = tool_defs.len(), "Starting agent loop");
        state.start();
        push_message(sink, &mut state, Message::system(self.system_prompt(&tool_defs)));
        push_message(sink, &mut state, Message::user(task));

        'steps: while state.status == AgentStatus::Running {
            if state.step >= self.config.max_steps {
                warn!(steps = state.step, "Step limit reached");
                state.mark_failed(AgentError::StepLimit(self.config.max_steps));
                break;
            }
            if cancel.is_cancelled() {
                state.mark_failed(AgentError::Cancelled);
                break;
            }

            debug!(step = state.step + 1, messages = state.messages.len(), "Calling model");
            let call_started = Instant::now();
            self.console.model_call_started(state.step + 1);
            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(LlmError::Cancelled),
                r = self.gateway.chat(&state.messages, &tool_defs, self.settings.as_ref(), cancel) => r,
            };
            self.console.model_call_finished();
            self.metrics.increment("agent.model_calls", 1);
            self.metrics
                .observe("agent.model_call_ms", call_started.elapsed().as_millis() as f64);

            let reply = match reply {
                Ok(message) => message,
                Err(e) if e.is_cancelled() => {
                    state.mark_failed(AgentError::Cancelled);
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Model call failed");
                    state.mark_failed(AgentError::Gateway(e));
                    break;
                }
            };

            state.step += 1;
            let input = state
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let step = state.record_step(StepAction::ModelCall, input, reply.content.clone(), None, None);
            self.console.print_step(step);
            push_message(sink, &mut state, reply.clone());

            if !reply.has_tool_calls() {
                if contains_completion_keyword(&reply.content) {
                    debug!("Completion keyword in reply");
                    state.mark_succeeded(reply.content);
                }
                continue;
            }

            let mut task_done: Option<(Option<bool>, String)> = None;
            let mut last_result = None;

            for call in &reply.tool_calls {
                if let Some(sink) = sink {
                    if let Err(e) = sink.record_tool_call(call) {
                        warn!(error = %e, "Failed to record tool call");
                    }
                }

                let tool_started = Instant::now();
                let result = match self.invoker.route(call, &tool_ctx).await {
                    RouteResult::Completed(result) => result,
                    RouteResult::NotFound(name) => {
                        tracker.track(&name, tool_started, false, Some("tool not found"));
                        self.metrics.increment("agent.unknown_tools", 1);
                        state.mark_failed(AgentError::UnknownTool(name));
                        break 'steps;
                    }
                };

                tracker.track(call.name(), tool_started, result.success, result.error.as_deref());
                self.metrics.increment("agent.tool_calls", 1);
                if !result.success {
                    self.metrics.increment("agent.tool_failures", 1);
                }

                push_message(
                    sink,
                    &mut state,
                    Message::tool(&result.call_id, &result.tool_name, result.to_message_content()),
                );
                if let Some(sink) = sink {
                    if let Err(e) = sink.record_tool_result(&result) {
                        warn!(error = %e, "Failed to record tool result");
                    }
                }

                let step = state.record_step(
                    StepAction::ToolExecution,
                    call.arguments().to_string(),
                    result.output.clone(),
                    Some(call.clone()),
                    Some(result.clone()),
                );
                self.console.print_step(step);

                if call.name() == TASK_DONE && result.success {
                    task_done = Some((reported_success(&call.arguments()), result.output.clone()));
                }
                state.tool_results.push(result.clone());
                last_result = Some(result);
            }

            match (task_done, last_result) {
                (Some((Some(false), output)), _) => {
                    state.mark_failed(AgentError::TaskReportedFailure(output));
                }
                (Some((_, output)), _) => state.mark_succeeded(output),
                (None, Some(last)) if last.success && contains_completion_keyword(&last.output) => {
                    debug!(tool = %last.tool_name, "Completion keyword in tool output");
                    state.mark_succeeded(last.output);
                }
                _ => {}
            }
        }

        let duration = started.elapsed();
        match state.error {
            None => info!(steps = state.step, ?duration, "Task succeeded"),
            Some(ref e) => warn!(steps = state.step, ?duration, error = %e, "Task did not succeed"),
        }
        self.metrics.observe("agent.run_ms", duration.as_millis() as f64);

        AgentExecution::from_state(state, tracker.stats(), duration)
    }
}

fn push_message(sink: Option<&dyn TrajectorySink>, state: &mut AgentState, message: Message) {
    if let Some(sink) = sink {
        if let Err(e) = sink.record_message(&message) {
            warn!(error = %e, "Failed to record message");
        }
    }
    state.add_message(message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtin::TaskDoneTool;
    use crate::tools::registry::ToolRegistry;
    use crate::tools::{ParameterProperty, ParameterSchema, Tool, ToolError, ToolResult};
    use crate::trajectory::TrajectoryRecorder;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use trae_llm::{InMemoryMetrics, ModelConfig, ModelError, ModelErrorKind, ToolCall};

    /// Replays canned replies; repeats the last one when the script runs out
    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<Message, LlmError>>>,
        fallback: Message,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<Message, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                fallback: Message::assistant("still working on it"),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelGateway for ScriptedModel {
        fn provider(&self) -> &str {
            "scripted"
        }

        async fn chat(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            _settings: &dyn ModelSettings,
            _cancel: &CancellationToken,
        ) -> Result<Message, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    struct CountingTool {
        runs: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "lookup"
        }

        fn description(&self) -> &str {
            "Look something up"
        }

        fn parameters_schema(&self) -> ParameterSchema {
            ParameterSchema::new().with_required("query", ParameterProperty::string("Query"))
        }

        async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ToolError::Execution("backend unavailable".into()));
            }
            Ok(ToolResult::success(format!("result for {}", args["query"].as_str().unwrap_or_default())))
        }
    }

    fn lookup_call(id: &str) -> Message {
        Message::assistant_with_tools("", vec![ToolCall::from_value(id, "lookup", json!({"query": "rust"}))])
    }

    fn agent(model: Arc<ScriptedModel>, runs: Arc<AtomicUsize>, fail: bool, max_steps: usize) -> AgentLoop {
        let mut registry = ToolRegistry::new();
        registry.register(CountingTool { runs, fail });
        registry.register(TaskDoneTool);
        AgentLoop::new(
            model,
            Arc::new(ModelConfig::default()),
            ToolInvoker::new(registry),
            AgentConfig::new(max_steps).with_working_dir(std::env::temp_dir()),
        )
    }

    #[tokio::test]
    async fn test_tool_call_then_completion() {
        let model = ScriptedModel::new(vec![
            Ok(lookup_call("call_1")),
            Ok(Message::assistant("The task is complete.")),
        ]);
        let runs = Arc::new(AtomicUsize::new(0));
        let agent = agent(model.clone(), runs.clone(), false, 10);

        let execution = agent.run("find rust", &CancellationToken::new(), None).await;

        assert_eq!(execution.status, AgentStatus::Succeeded);
        assert!(execution.success);
        assert_eq!(model.calls(), 2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(execution.step_count, 2);
        assert_eq!(execution.tool_results.len(), 1);
        assert_eq!(execution.tool_results[0].call_id, "call_1");
        assert_eq!(execution.final_output.as_deref(), Some("The task is complete."));
        assert_eq!(execution.steps.len(), 3);
        assert_eq!(execution.tool_stats.total, 1);
    }

    #[tokio::test]
    async fn test_step_limit() {
        let model = ScriptedModel::new(vec![]);
        let agent = agent(model.clone(), Arc::new(AtomicUsize::new(0)), false, 3);

        let execution = agent.run("never ends", &CancellationToken::new(), None).await;

        assert_eq!(execution.status, AgentStatus::StepLimitExceeded);
        assert!(!execution.success);
        assert_eq!(model.calls(), 3);
        assert!(matches!(execution.error, Some(AgentError::StepLimit(3))));
        assert_eq!(execution.steps.len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_run() {
        let model = ScriptedModel::new(vec![Ok(Message::assistant_with_tools(
            "",
            vec![ToolCall::from_value("call_1", "teleport", json!({}))],
        ))]);
        let agent = agent(model.clone(), Arc::new(AtomicUsize::new(0)), false, 10);

        let execution = agent.run("go", &CancellationToken::new(), None).await;

        assert_eq!(execution.status, AgentStatus::Failed);
        assert_eq!(model.calls(), 1);
        let error = execution.error.expect("error recorded").to_string();
        assert!(error.contains("teleport"));
        assert!(error.contains("404"));
        // The model call step survives
        assert_eq!(execution.steps.len(), 1);
    }

    #[tokio::test]
    async fn test_tool_failure_does_not_end_run() {
        let model = ScriptedModel::new(vec![
            Ok(lookup_call("call_1")),
            Ok(Message::assistant("Finished with a workaround")),
        ]);
        let runs = Arc::new(AtomicUsize::new(0));
        let agent = agent(model.clone(), runs.clone(), true, 10);

        let execution = agent.run("find rust", &CancellationToken::new(), None).await;

        assert_eq!(execution.status, AgentStatus::Succeeded);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!execution.tool_results[0].success);
        assert_eq!(execution.tool_results[0].error_code, Some(500));
        assert_eq!(execution.tool_stats.failed, 1);
    }

    #[tokio::test]
    async fn test_task_done_completes() {
        let model = ScriptedModel::new(vec![Ok(Message::assistant_with_tools(
            "",
            vec![ToolCall::from_value(
                "call_1",
                TASK_DONE,
                json!({"summary": "wrote file", "success": true}),
            )],
        ))]);
        let agent = agent(model.clone(), Arc::new(AtomicUsize::new(0)), false, 10);

        let execution = agent.run("write", &CancellationToken::new(), None).await;

        assert_eq!(execution.status, AgentStatus::Succeeded);
        assert_eq!(model.calls(), 1);
        assert!(execution.final_output.unwrap().contains("wrote file"));
    }

    #[tokio::test]
    async fn test_task_done_reporting_failure() {
        let model = ScriptedModel::new(vec![Ok(Message::assistant_with_tools(
            "",
            vec![ToolCall::from_value(
                "call_1",
                TASK_DONE,
                json!({"summary": "could not build", "success": false}),
            )],
        ))]);
        let agent = agent(model, Arc::new(AtomicUsize::new(0)), false, 10);

        let execution = agent.run("build", &CancellationToken::new(), None).await;

        assert_eq!(execution.status, AgentStatus::Failed);
        assert!(matches!(execution.error, Some(AgentError::TaskReportedFailure(_))));
    }

    #[tokio::test]
    async fn test_gateway_error_fails_run() {
        let err = LlmError::NonRetryable(Box::new(LlmError::Model(ModelError::new(
            ModelErrorKind::Authentication,
            "bad key",
        ))));
        let model = ScriptedModel::new(vec![Err(err)]);
        let agent = agent(model, Arc::new(AtomicUsize::new(0)), false, 10);

        let execution = agent.run("go", &CancellationToken::new(), None).await;

        assert_eq!(execution.status, AgentStatus::Failed);
        assert!(matches!(execution.error, Some(AgentError::Gateway(_))));
        assert!(execution.steps.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let model = ScriptedModel::new(vec![]);
        let agent = agent(model.clone(), Arc::new(AtomicUsize::new(0)), false, 10);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let execution = agent.run("go", &cancel, None).await;

        assert_eq!(execution.status, AgentStatus::Failed);
        assert!(matches!(execution.error, Some(AgentError::Cancelled)));
        assert_eq!(model.calls(), 0);
    }

    /// Answers once with a lookup call, then hangs until cancelled
    struct HangingModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelGateway for HangingModel {
        fn provider(&self) -> &str {
            "hanging"
        }

        async fn chat(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            _settings: &dyn ModelSettings,
            cancel: &CancellationToken,
        ) -> Result<Message, LlmError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(lookup_call("call_1"));
            }
            cancel.cancelled().await;
            Err(LlmError::Cancelled)
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "wait"
        }

        fn description(&self) -> &str {
            "Wait a long time"
        }

        fn parameters_schema(&self) -> ParameterSchema {
            ParameterSchema::new()
        }

        async fn execute(&self, _args: &Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ToolResult::success("waited"))
        }
    }

    fn cancel_after(cancel: &CancellationToken, delay: Duration) {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            cancel.cancel();
        });
    }

    #[tokio::test]
    async fn test_cancel_during_model_call() {
        let model = Arc::new(HangingModel { calls: AtomicUsize::new(0) });
        let runs = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(CountingTool { runs: runs.clone(), fail: false });
        let agent = AgentLoop::new(
            model.clone(),
            Arc::new(ModelConfig::default()),
            ToolInvoker::new(registry),
            AgentConfig::new(10).with_working_dir(std::env::temp_dir()),
        );
        let recorder = Arc::new(TrajectoryRecorder::new(std::env::temp_dir().join("unused.json")));
        let cancel = CancellationToken::new();
        cancel_after(&cancel, Duration::from_millis(50));

        let execution = tokio::time::timeout(
            Duration::from_secs(5),
            agent.run("find rust", &cancel, Some(recorder.clone())),
        )
        .await
        .expect("cancellation interrupts the model call");

        assert_eq!(execution.status, AgentStatus::Failed);
        assert!(!execution.success);
        assert!(matches!(execution.error, Some(AgentError::Cancelled)));
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
        // The first round trip survives the cancellation
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(execution.step_count, 1);
        assert_eq!(execution.steps.len(), 2);
        assert_eq!(execution.steps[0].action, StepAction::ModelCall);
        assert_eq!(execution.steps[1].action, StepAction::ToolExecution);
        assert_eq!(execution.tool_results.len(), 1);
        assert!(execution.tool_results[0].success);
        // system, user, assistant(tool call), tool
        assert_eq!(recorder.summary().total_messages, 4);
    }

    #[tokio::test]
    async fn test_cancel_during_tool_execution() {
        let model = ScriptedModel::new(vec![Ok(Message::assistant_with_tools(
            "",
            vec![ToolCall::from_value("call_1", "wait", json!({}))],
        ))]);
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);
        let agent = AgentLoop::new(
            model.clone(),
            Arc::new(ModelConfig::default()),
            ToolInvoker::new(registry),
            AgentConfig::new(10)
                .with_working_dir(std::env::temp_dir())
                .with_tool_timeout(Duration::from_secs(60)),
        );
        let cancel = CancellationToken::new();
        cancel_after(&cancel, Duration::from_millis(50));

        let started = Instant::now();
        let execution = agent.run("wait", &cancel, None).await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(execution.status, AgentStatus::Failed);
        assert!(matches!(execution.error, Some(AgentError::Cancelled)));
        assert_eq!(model.calls(), 1);
        assert_eq!(execution.steps.len(), 2);
        assert_eq!(execution.steps[1].action, StepAction::ToolExecution);
        assert_eq!(execution.tool_results.len(), 1);
        assert!(!execution.tool_results[0].success);
        assert_eq!(execution.tool_results[0].error_code, Some(499));
        assert_eq!(execution.tool_stats.failed, 1);
    }

    #[tokio::test]
    async fn test_collaborators_are_notified() {
        let model = ScriptedModel::new(vec![
            Ok(lookup_call("call_1")),
            Ok(Message::assistant("done")),
        ]);
        let recorder = Arc::new(TrajectoryRecorder::new(std::env::temp_dir().join("unused.json")));
        let metrics = Arc::new(InMemoryMetrics::new());
        let agent = agent(model, Arc::new(AtomicUsize::new(0)), false, 10).with_metrics(metrics.clone());

        agent
            .run("find rust", &CancellationToken::new(), Some(recorder.clone()))
            .await;

        // system, user, assistant(tool call), tool, assistant
        let summary = recorder.summary();
        assert_eq!(summary.total_messages, 5);
        assert_eq!(summary.total_tool_calls, 1);
        assert_eq!(metrics.counter("agent.model_calls"), 2);
        assert_eq!(metrics.counter("agent.tool_calls"), 1);
    }

    #[test]
    fn test_completion_keywords() {
        assert!(contains_completion_keyword("All DONE here"));
        assert!(contains_completion_keyword("任务完成"));
        assert!(!contains_completion_keyword("still working"));
    }

    #[test]
    fn test_default_system_prompt_lists_tools() {
        let model = ScriptedModel::new(vec![]);
        let agent = agent(model, Arc::new(AtomicUsize::new(0)), false, 10);
        let defs = agent.invoker().registry().tool_definitions();
        let prompt = agent.system_prompt(&defs);
        assert!(prompt.contains("- lookup: Look something up"));
        assert!(prompt.contains("task_done"));
    }
}
