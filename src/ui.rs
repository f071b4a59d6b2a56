use colored::*;
use terminal_size::{terminal_size, Height, Width};

use crate::agent::{ExecutionResult, ExecutionStatus, Step};
use crate::tools::Observation;

fn rule() -> String {
    let (width, _) = terminal_size().unwrap_or((Width(80), Height(24)));
    "─".repeat(width.0 as usize)
}

pub fn print_header(model: &str, provider: Option<&str>) {
    let line = rule();
    println!("{}", line.black().bold());

    let name = "Kestrel".yellow().bold();
    let version = format!("v{}", env!("CARGO_PKG_VERSION")).black().bold();
    println!("  {} {}", name, version);

    let info = match provider {
        Some(url) => format!("  {}  •  tools from {}", model, url),
        None => format!("  {}", model),
    };
    println!("{}", info.cyan());

    println!("{}", line.black().bold());
}

/// One trace step as printed after the final answer
pub fn print_trace_step(step: &Step) {
    println!("\n{}", format!("--- Step {} ---", step.index).black().bold());
    if !step.action.rationale.is_empty() {
        println!("{} {}", "Thought:".magenta(), step.action.rationale.trim());
    }
    println!("{} {}", "Action:".cyan(), step.action.describe());

    let text = step.observation.to_prompt_text();
    let text = match &step.observation {
        Observation::Success(_) => text.normal(),
        Observation::ValidationFailed(_) => text.yellow(),
        Observation::ToolFailed(_) | Observation::ProviderUnavailable(_) => text.red(),
    };
    println!("{} {}", "Observation:".cyan(), text);
}

/// Final answer (if any), the thought process and the status line
pub fn print_result(result: &ExecutionResult) {
    if let Some(answer) = &result.final_answer {
        println!("\n{} {}", "Final Answer:".green().bold(), answer);
    }

    if !result.trace.is_empty() {
        println!("\n{}", "Thought process:".bold());
        for step in &result.trace {
            print_trace_step(step);
        }
    }

    println!();
    match &result.status {
        ExecutionStatus::Completed => print_success(&result.status.to_string()),
        ExecutionStatus::IterationBudgetExceeded => print_warning(&result.status.to_string()),
        ExecutionStatus::Aborted(_) => print_error(&result.status.to_string()),
    }
}

pub fn print_step(msg: &str) {
    println!("  {} {}", "•".green(), msg);
}

pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green().bold(), msg.green());
}

pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠️ ".yellow().bold(), msg.yellow());
}

pub fn print_error(msg: &str) {
    println!("  {} {}", "❌".red().bold(), msg.red());
}

pub fn print_thinking(msg: &str) {
    println!("  {} {}...", "∴".magenta(), msg);
}
