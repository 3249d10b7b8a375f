//! trae: autonomous task-execution agent
//!
//! Runs a model-driven loop that calls tools (shell, file edits, ...) until
//! the task is reported complete.

mod agent;
mod commands;
mod console;
mod repl;
mod tools;
mod trajectory;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::GlobalArgs;

#[derive(Debug, Parser)]
#[command(name = "trae")]
#[command(about = "Autonomous agent for software engineering tasks", version)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a single task
    Run {
        /// The task to perform
        task: Option<String>,

        /// Read the task from a file
        #[arg(short, long, conflicts_with = "task")]
        file: Option<PathBuf>,
    },

    /// Show the resolved configuration
    ShowConfig,

    /// Start an interactive session
    Interactive,

    /// Inspect saved trajectories
    Trajectory {
        #[command(subcommand)]
        action: TrajectoryAction,
    },
}

#[derive(Debug, Subcommand)]
enum TrajectoryAction {
    /// Print a summary of a trajectory file
    Show {
        /// Trajectory JSON file
        path: PathBuf,
    },

    /// Convert a trajectory file to json, yaml or text
    Export {
        /// Trajectory JSON file
        path: PathBuf,

        /// Output format: json, yaml or txt
        #[arg(long, default_value = "yaml")]
        format: String,

        /// Output file (defaults to the input path with the format's extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.global.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Some(Commands::Run { task, file }) => commands::run(&cli.global, task, file).await,
        Some(Commands::ShowConfig) => commands::show_config(&cli.global),
        Some(Commands::Trajectory { action }) => match action {
            TrajectoryAction::Show { path } => commands::trajectory_show(&path),
            TrajectoryAction::Export { path, format, output } => {
                commands::trajectory_export(&path, &format, output).map(|_| ())
            }
        },
        Some(Commands::Interactive) | None => repl::run(&cli.global).await,
    }
}
