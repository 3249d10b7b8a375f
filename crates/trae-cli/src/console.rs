//! Terminal output for agent runs

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;

use crate::agent::{ExecutionStep, StepAction};

// ANSI colors
pub const GREEN: &str = "\x1b[92m";
pub const BLUE: &str = "\x1b[94m";
pub const YELLOW: &str = "\x1b[93m";
pub const CYAN: &str = "\x1b[96m";
pub const RED: &str = "\x1b[91m";
pub const DIM: &str = "\x1b[2m";
pub const BOLD: &str = "\x1b[1m";
pub const RESET: &str = "\x1b[0m";

const PREVIEW_CHARS: usize = 200;

/// Output surface the agent loop reports progress to
pub trait Console: Send + Sync {
    fn print(&self, text: &str);

    /// Print a header block of `label: value` pairs
    fn print_task_details(&self, details: &[(&str, String)]);

    fn model_call_started(&self, _step: usize) {}

    fn model_call_finished(&self) {}

    fn print_step(&self, step: &ExecutionStep) {
        self.print(&format_step(step));
    }
}

/// Coloured stdout console with a spinner during model calls
pub struct SimpleConsole {
    spinner: Mutex<Option<ProgressBar>>,
    show_spinner: bool,
}

impl SimpleConsole {
    pub fn new() -> Self {
        Self {
            spinner: Mutex::new(None),
            show_spinner: true,
        }
    }

    pub fn without_spinner(mut self) -> Self {
        self.show_spinner = false;
        self
    }
}

impl Default for SimpleConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl Console for SimpleConsole {
    fn print(&self, text: &str) {
        match self.spinner.lock().as_ref() {
            Some(pb) => pb.println(text),
            None => println!("{}", text),
        }
    }

    fn print_task_details(&self, details: &[(&str, String)]) {
        println!("{}{}Task details{}", BOLD, BLUE, RESET);
        let width = details.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        for (label, value) in details {
            println!("  {}{:<width$}{}  {}", DIM, label, RESET, value, width = width);
        }
        println!();
    }

    fn model_call_started(&self, step: usize) {
        if !self.show_spinner {
            return;
        }
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("Step {}: thinking...", step));
        pb.enable_steady_tick(Duration::from_millis(100));
        *self.spinner.lock() = Some(pb);
    }

    fn model_call_finished(&self) {
        if let Some(pb) = self.spinner.lock().take() {
            pb.finish_and_clear();
        }
    }
}

/// Console that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentConsole;

impl Console for SilentConsole {
    fn print(&self, _text: &str) {}

    fn print_task_details(&self, _details: &[(&str, String)]) {}

    fn print_step(&self, _step: &ExecutionStep) {}
}

/// One-line rendering of a step
pub fn format_step(step: &ExecutionStep) -> String {
    match step.action {
        StepAction::ModelCall => {
            let text = step.output.trim();
            if text.is_empty() {
                format!("{}[Step {}]{} {}(tool calls){}", DIM, step.step_number, RESET, DIM, RESET)
            } else {
                format!("{}[Step {}]{} {}", DIM, step.step_number, RESET, preview(text))
            }
        }
        StepAction::ToolExecution => {
            let name = step
                .tool_call
                .as_ref()
                .map(|c| c.name().to_string())
                .unwrap_or_default();
            match step.tool_result.as_ref() {
                Some(r) if r.success => format!(
                    "{}[Tool: {}]{} {}OK{} {}({} ms){}",
                    CYAN, name, RESET, GREEN, RESET, DIM, r.duration_ms, RESET
                ),
                Some(r) => format!(
                    "{}[Tool: {}]{} {}Failed{} {}",
                    CYAN,
                    name,
                    RESET,
                    YELLOW,
                    RESET,
                    r.error.as_deref().unwrap_or_default()
                ),
                None => format!("{}[Tool: {}]{}", CYAN, name, RESET),
            }
        }
    }
}

pub fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
