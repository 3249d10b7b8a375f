//! Interactive REPL
//!
//! Each line is run as a separate agent task; a few words are reserved as
//! session commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};

use crate::agent::AgentStatus;
use crate::commands::{print_execution, print_runtime_stats, AgentRuntime, GlobalArgs};
use crate::console::{Console, SimpleConsole, BOLD, CYAN, DIM, GREEN, RED, RESET, YELLOW};
use crate::trajectory::TrajectoryRecorder;

/// Reserved inputs
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplCommand {
    Help,
    Status,
    Clear,
    Exit,
    Task(String),
}

impl ReplCommand {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        Some(match line.to_lowercase().as_str() {
            "help" | "?" => ReplCommand::Help,
            "status" => ReplCommand::Status,
            "clear" => ReplCommand::Clear,
            "exit" | "quit" => ReplCommand::Exit,
            _ => ReplCommand::Task(line.to_string()),
        })
    }
}

/// Outcome of the most recent task
struct LastRun {
    task: String,
    status: AgentStatus,
    steps: usize,
    trajectory: Option<PathBuf>,
}

fn history_path() -> Result<PathBuf> {
    let dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("trae");
    std::fs::create_dir_all(&dir).context("Failed to create data directory")?;
    Ok(dir.join("history.txt"))
}

/// Run the interactive REPL
pub async fn run(args: &GlobalArgs) -> Result<()> {
    let console: Arc<dyn Console> = Arc::new(SimpleConsole::new());
    let mut runtime = AgentRuntime::build(args, console.clone())?;
    let mut last_run: Option<LastRun> = None;
    let mut tasks_run = 0usize;

    let history = history_path()?;
    let mut rl: Editor<(), DefaultHistory> = DefaultEditor::new()?;
    let _ = rl.load_history(&history);

    print_welcome(&runtime);

    loop {
        let prompt = format!("{}trae>{} ", CYAN, RESET);

        match rl.readline(&prompt) {
            Ok(line) => {
                let Some(command) = ReplCommand::parse(&line) else {
                    continue;
                };
                let _ = rl.add_history_entry(line.trim());

                match command {
                    ReplCommand::Help => print_help(),
                    ReplCommand::Status => print_session_status(&runtime, tasks_run, last_run.as_ref()),
                    ReplCommand::Clear => {
                        print!("\x1b[2J\x1b[H");
                        print_welcome(&runtime);
                    }
                    ReplCommand::Exit => {
                        println!("{}Goodbye!{}", DIM, RESET);
                        break;
                    }
                    ReplCommand::Task(task) => {
                        let trajectory_path = args
                            .trajectory_file
                            .clone()
                            .unwrap_or_else(TrajectoryRecorder::default_path);
                        let (execution, saved) = runtime.run_task(&task, trajectory_path).await;
                        print_execution(&execution);
                        if let Some(ref path) = saved {
                            println!("{}Trajectory saved to {}{}", DIM, path.display(), RESET);
                        }
                        println!();

                        tasks_run += 1;
                        last_run = Some(LastRun {
                            task,
                            status: execution.status,
                            steps: execution.step_count,
                            trajectory: saved,
                        });
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("{}^C{}", DIM, RESET);
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("{}Goodbye!{}", DIM, RESET);
                break;
            }
            Err(e) => {
                eprintln!("{}Error:{} {}", YELLOW, RESET, e);
                break;
            }
        }
    }

    let _ = rl.save_history(&history);
    runtime.shutdown();
    Ok(())
}

fn print_welcome(runtime: &AgentRuntime) {
    let model = &runtime.resolved.model;
    println!("{}trae{} interactive mode", BOLD, RESET);
    println!(
        "{}Model: {} ({}) | Working dir: {}{}",
        DIM,
        model.model,
        model.provider,
        runtime.agent.config().working_dir.display(),
        RESET
    );
    println!("{}Type a task to run it, or 'help' for commands.{}", DIM, RESET);
    println!();
}

fn print_help() {
    println!("{}Commands:{}", BOLD, RESET);
    println!("  {}help{}      Show this help", CYAN, RESET);
    println!("  {}status{}    Show session status and statistics", CYAN, RESET);
    println!("  {}clear{}     Clear the screen", CYAN, RESET);
    println!("  {}exit{}      Leave interactive mode (also 'quit')", CYAN, RESET);
    println!();
    println!("Anything else is run as a task.");
}

fn print_session_status(runtime: &AgentRuntime, tasks_run: usize, last_run: Option<&LastRun>) {
    let model = &runtime.resolved.model;
    println!("{}Session{}", BOLD, RESET);
    println!("  Provider:     {}", model.provider);
    println!("  Model:        {}", model.model);
    println!("  API key:      {}", model.masked_api_key());
    println!("  Max steps:    {}", runtime.resolved.max_steps);
    println!("  Tasks run:    {}", tasks_run);

    if let Some(last) = last_run {
        let color = if last.status == AgentStatus::Succeeded { GREEN } else { RED };
        println!();
        println!("{}Last task{}", BOLD, RESET);
        println!("  Task:         {}", last.task);
        println!("  Status:       {}{}{}", color, last.status, RESET);
        println!("  Steps:        {}", last.steps);
        if let Some(ref path) = last.trajectory {
            println!("  Trajectory:   {}", path.display());
        }
    }

    println!();
    print_runtime_stats(runtime);
}
