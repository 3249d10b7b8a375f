//! CLI commands implementation

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use trae_llm::config::{CONFIG_FILE_NAME, DEFAULT_AGENT};
use trae_llm::{
    CachedGateway, InMemoryMetrics, ModelGateway, OpenAiGateway, Overrides, ResolvedConfig, ResponseCache,
    RetryingGateway, TraeConfig,
};

use crate::agent::{AgentConfig, AgentExecution, AgentLoop};
use crate::console::{preview, Console, SimpleConsole, BOLD, CYAN, DIM, GREEN, RED, RESET, YELLOW};
use crate::tools::builtin::create_registry;
use crate::tools::invoker::ToolInvoker;
use crate::trajectory::{ExportFormat, TrajectoryRecorder};

/// Options shared by every subcommand
#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Path to the configuration file
    #[arg(short = 'c', long, global = true, env = "TRAE_CONFIG_FILE", default_value = CONFIG_FILE_NAME)]
    pub config_file: PathBuf,

    /// Model provider (overrides config)
    #[arg(short, long, global = true)]
    pub provider: Option<String>,

    /// Model name (overrides config)
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    /// Base URL of the model API
    #[arg(long, global = true)]
    pub model_base_url: Option<String>,

    /// API key (overrides config and environment)
    #[arg(short = 'k', long, global = true)]
    pub api_key: Option<String>,

    /// Maximum number of agent steps
    #[arg(long, global = true)]
    pub max_steps: Option<usize>,

    /// Per-tool execution timeout in seconds
    #[arg(long, global = true)]
    pub tool_timeout: Option<u64>,

    /// Working directory for tools
    #[arg(short, long, global = true)]
    pub working_dir: Option<PathBuf>,

    /// Where to save the trajectory
    #[arg(short, long, global = true)]
    pub trajectory_file: Option<PathBuf>,

    /// Disable the response cache
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl GlobalArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            provider: self.provider.clone(),
            model: self.model.clone(),
            base_url: self.model_base_url.clone(),
            api_key: self.api_key.clone(),
            max_steps: self.max_steps,
        }
    }

    fn working_dir(&self) -> Result<PathBuf> {
        match self.working_dir {
            Some(ref dir) => {
                if !dir.is_dir() {
                    bail!("Working directory does not exist: {}", dir.display());
                }
                dir.canonicalize()
                    .with_context(|| format!("Failed to resolve {}", dir.display()))
            }
            None => std::env::current_dir().context("Failed to get current directory"),
        }
    }
}

/// Load, validate and resolve the configuration for the default agent
pub fn load_config(args: &GlobalArgs) -> Result<ResolvedConfig> {
    let config = TraeConfig::load(Some(&args.config_file))
        .with_context(|| format!("Failed to load {}", args.config_file.display()))?;
    config.validate().context("Invalid configuration")?;
    let mut resolved = config
        .resolve(DEFAULT_AGENT, &args.overrides())
        .context("Failed to resolve configuration")?;
    if args.no_cache {
        resolved.cache = None;
    }
    Ok(resolved)
}

/// Everything a run needs, built once per process
pub struct AgentRuntime {
    pub resolved: ResolvedConfig,
    pub agent: AgentLoop,
    pub cache: Option<Arc<ResponseCache>>,
    pub metrics: Arc<InMemoryMetrics>,
    sweeper: Option<JoinHandle<()>>,
}

impl AgentRuntime {
    /// Build the gateway stack (retry over cache over HTTP) and the agent
    pub fn build(args: &GlobalArgs, console: Arc<dyn Console>) -> Result<Self> {
        let resolved = load_config(args)?;
        let metrics = Arc::new(InMemoryMetrics::new());

        let http = OpenAiGateway::new(&resolved.model).context("Failed to create model client")?;
        let (inner, cache, sweeper) = match resolved.cache {
            Some(ref cache_config) => {
                let cache = Arc::new(ResponseCache::new(cache_config.clone()));
                let sweeper = cache.spawn_sweeper();
                let cached: Arc<dyn ModelGateway> =
                    Arc::new(CachedGateway::new(http, cache.clone()).with_metrics(metrics.clone()));
                (cached, Some(cache), sweeper)
            }
            None => {
                let direct: Arc<dyn ModelGateway> = Arc::new(http);
                (direct, None, None)
            }
        };

        let gateway = RetryingGateway::new(inner, resolved.retry.clone())
            .with_call_timeout(resolved.call_timeout)
            .with_metrics(metrics.clone());

        let registry = create_registry(&resolved.tools);
        let mut agent_config = AgentConfig::new(resolved.max_steps).with_working_dir(args.working_dir()?);
        if let Some(ref prompt) = resolved.system_prompt {
            agent_config = agent_config.with_system_prompt(prompt.clone());
        }
        if let Some(secs) = args.tool_timeout.filter(|s| *s > 0) {
            agent_config = agent_config.with_tool_timeout(Duration::from_secs(secs));
        }

        let agent = AgentLoop::new(
            Arc::new(gateway),
            Arc::new(resolved.model.clone()),
            ToolInvoker::new(registry),
            agent_config,
        )
        .with_console(console)
        .with_metrics(metrics.clone());

        Ok(Self {
            resolved,
            agent,
            cache,
            metrics,
            sweeper,
        })
    }

    /// Run one task, recording its trajectory to `trajectory_path`
    pub async fn run_task(&self, task: &str, trajectory_path: PathBuf) -> (AgentExecution, Option<PathBuf>) {
        let recorder = Arc::new(TrajectoryRecorder::new(trajectory_path));
        recorder.add_metadata("task", json!(task));
        recorder.add_metadata("provider", json!(self.resolved.model.provider));
        recorder.add_metadata("model", json!(self.resolved.model.model));
        recorder.add_metadata("max_steps", json!(self.resolved.max_steps));

        let cancel = CancellationToken::new();
        let ctrl_c = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };

        // Each run gets its own recorder; the loop itself is shared
        let execution = self.agent.run(task, &cancel, Some(recorder.clone())).await;
        ctrl_c.abort();

        recorder.add_metadata("status", json!(execution.status.to_string()));
        recorder.add_metadata("success", json!(execution.success));
        recorder.add_metadata("steps", json!(execution.step_count));
        if let Some(ref err) = execution.error {
            recorder.add_metadata("error", json!(err.to_string()));
        }

        let saved = match recorder.save() {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to save trajectory");
                None
            }
        };
        (execution, saved)
    }

    pub fn shutdown(&mut self) {
        if let Some(ref cache) = self.cache {
            cache.stop();
        }
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}

impl Drop for AgentRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Read the task from `--file` or the positional argument
fn read_task(task: Option<String>, file: Option<&Path>) -> Result<String> {
    let text = match (task, file) {
        (_, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read task file: {}", path.display()))?,
        (Some(task), None) => task,
        (None, None) => bail!("No task given. Pass a task or --file <PATH>"),
    };
    let text = text.trim().to_string();
    if text.is_empty() {
        bail!("Task is empty");
    }
    Ok(text)
}

/// Run a single task to completion
pub async fn run(args: &GlobalArgs, task: Option<String>, file: Option<PathBuf>) -> Result<()> {
    let task = read_task(task, file.as_deref())?;
    let console: Arc<dyn Console> = Arc::new(SimpleConsole::new());
    let mut runtime = AgentRuntime::build(args, console.clone())?;

    console.print_task_details(&task_details(&runtime, &task));

    let trajectory_path = args
        .trajectory_file
        .clone()
        .unwrap_or_else(TrajectoryRecorder::default_path);
    let (execution, saved) = runtime.run_task(&task, trajectory_path).await;

    print_execution(&execution);
    if let Some(path) = saved {
        println!("{}Trajectory saved to {}{}", DIM, path.display(), RESET);
    }
    if args.verbose {
        print_runtime_stats(&runtime);
    }
    runtime.shutdown();

    if !execution.success {
        let reason = execution
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| execution.status.to_string());
        bail!("Task failed: {}", reason);
    }
    Ok(())
}

pub fn task_details(runtime: &AgentRuntime, task: &str) -> Vec<(&'static str, String)> {
    let model = &runtime.resolved.model;
    vec![
        ("Task", task.to_string()),
        ("Provider", model.provider.clone()),
        ("Model", model.model.clone()),
        ("Working dir", runtime.agent.config().working_dir.display().to_string()),
        ("Max steps", runtime.resolved.max_steps.to_string()),
        ("Tools", runtime.agent.invoker().registry().list_names().join(", ")),
    ]
}

/// Outcome summary printed after a run
pub fn print_execution(execution: &AgentExecution) {
    println!();
    if execution.success {
        println!("{}{}✓ Task completed{}", BOLD, GREEN, RESET);
        if let Some(ref output) = execution.final_output {
            println!("{}", output);
        }
    } else {
        println!("{}{}✗ Task failed ({}){}", BOLD, RED, execution.status, RESET);
        if let Some(ref err) = execution.error {
            println!("  {}{}{}", RED, err, RESET);
        }
    }

    let stats = &execution.tool_stats;
    println!();
    println!("  Duration:     {:.2}s", execution.duration.as_secs_f64());
    println!("  Steps:        {}", execution.step_count);
    if stats.total > 0 {
        println!(
            "  Tool calls:   {} ({:.0}% succeeded)",
            stats.total,
            stats.success_rate * 100.0
        );
        for (name, tool) in &stats.per_tool {
            println!(
                "    {}{:<14}{} {} calls, {} failed, {}ms",
                DIM, name, RESET, tool.calls, tool.failures, tool.total_ms
            );
            if let Some(ref err) = tool.last_error {
                println!("      {}last error: {}{}", RED, preview(err), RESET);
            }
        }
    } else {
        println!("  Tool calls:   0");
    }
}

pub fn print_runtime_stats(runtime: &AgentRuntime) {
    if let Some(ref cache) = runtime.cache {
        let stats = cache.stats();
        println!(
            "  Cache:        {} hits, {} misses, {} evictions ({}/{} entries, {:.0}% hit rate)",
            stats.hits,
            stats.misses,
            stats.evictions,
            stats.size,
            stats.max_size,
            stats.hit_rate * 100.0
        );
    }
    for (name, value) in runtime.metrics.counters() {
        println!("  {}{:<24}{} {}", DIM, name, RESET, value);
    }
}

/// Print the resolved configuration with secrets masked
pub fn show_config(args: &GlobalArgs) -> Result<()> {
    let resolved = load_config(args)?;
    let model = &resolved.model;

    println!("{}Configuration{}", BOLD, RESET);
    println!("  File:         {}", args.config_file.display());
    println!("  Agent:        {}", resolved.agent);
    println!();
    println!("{}Model{}", BOLD, RESET);
    println!("  Provider:     {}", model.provider);
    println!("  Model:        {}", model.model);
    println!(
        "  Base URL:     {}",
        model
            .base_url
            .as_deref()
            .unwrap_or_else(|| trae_llm::openai::default_base_url(&model.provider))
    );
    println!("  API key:      {}", model.masked_api_key());
    if let Some(ref version) = model.api_version {
        println!("  API version:  {}", version);
    }
    println!("  Max tokens:   {}", model.max_tokens);
    println!("  Temperature:  {}", model.temperature);
    println!("  Top p:        {}", model.top_p);
    println!("  Top k:        {}", model.top_k);
    println!("  Tool calling: {}", model.supports_tool_calling);
    println!();
    println!("{}Agent{}", BOLD, RESET);
    println!("  Max steps:    {}", resolved.max_steps);
    let tools = create_registry(&resolved.tools);
    println!("  Tools:        {}", tools.list_names().join(", "));
    if resolved.system_prompt.is_some() {
        println!("  System prompt: {}custom{}", CYAN, RESET);
    }
    println!();
    println!("{}Retry{}", BOLD, RESET);
    println!("  Max retries:  {}", resolved.retry.max_retries);
    println!("  Base delay:   {:?}", resolved.retry.base_delay);
    println!("  Max delay:    {:?}", resolved.retry.max_delay);
    println!("  Multiplier:   {}", resolved.retry.backoff_multiplier);
    println!("  Call timeout: {:?}", resolved.call_timeout);
    println!();
    println!("{}Cache{}", BOLD, RESET);
    match resolved.cache {
        Some(ref cache) => {
            println!("  Enabled:      {}yes{}", GREEN, RESET);
            println!("  Max size:     {}", cache.max_size);
            println!("  TTL:          {:?}", cache.ttl);
            println!("  Sweep every:  {:?}", cache.cleanup_interval);
        }
        None => println!("  Enabled:      {}no{}", YELLOW, RESET),
    }

    Ok(())
}

/// Print the summary of a saved trajectory
pub fn trajectory_show(path: &Path) -> Result<()> {
    let recorder = TrajectoryRecorder::load(path)?;
    let summary = recorder.summary();

    println!("{}Trajectory{}", BOLD, RESET);
    println!("  File:         {}", summary.path.display());
    println!("  Started:      {}", summary.start_time.to_rfc3339());
    println!("  Ended:        {}", summary.end_time.to_rfc3339());
    println!("  Duration:     {:.2}s", summary.duration);
    println!("  Messages:     {}", summary.total_messages);
    println!("  Tool calls:   {}", summary.total_tool_calls);
    println!("  Tool results: {}", summary.total_tool_results);
    if !summary.custom_metadata_keys.is_empty() {
        println!();
        println!("{}Metadata{}", BOLD, RESET);
        for key in &summary.custom_metadata_keys {
            if let Some(value) = recorder.metadata(key) {
                println!("  {}{:<13}{} {}", DIM, key, RESET, value);
            }
        }
    }
    Ok(())
}

/// Convert a saved trajectory to another format. Without `output` the file
/// lands next to the input with the format's extension.
pub fn trajectory_export(path: &Path, format: &str, output: Option<PathBuf>) -> Result<PathBuf> {
    let format: ExportFormat = format.parse()?;
    let recorder = TrajectoryRecorder::load(path)?;
    let output = output.unwrap_or_else(|| path.with_extension(format.extension()));
    if output == path {
        bail!("Refusing to overwrite {} with its own export", path.display());
    }
    recorder.export(format, &output)?;
    println!("{}Exported to {}{}", DIM, output.display(), RESET);
    Ok(output)
}
