use colored::*;
use terminal_size::{Width, Height, terminal_size};

use crate::orchestrator::{ExecutionResult, Route};

pub fn print_header(subtitle: &str) {
    let (width, _) = terminal_size().unwrap_or((Width(80), Height(24)));
    let width = width.0 as usize;

    let line = "─".repeat(width);
    println!("{}", line.black().bold());

    let name = "Switchboard".yellow().bold();
    let version = format!("v{}", env!("CARGO_PKG_VERSION")).black().bold();
    println!("  {} {}", name, version);

    if !subtitle.is_empty() {
        println!("{}", format!("  {}", subtitle).cyan());
    }

    println!("{}", line.black().bold());
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

/// One dim line under an answer: where it ran and what it cost.
pub fn print_result_meta(result: &ExecutionResult) {
    let mut meta = format!(
        "{} • {} • {} steps • {} tools • {} tokens • {:.1}s",
        result.category,
        result.backend,
        result.steps,
        result.tool_calls,
        result.usage.total_tokens,
        result.elapsed.as_secs_f64()
    );
    if result.fallback_used {
        meta.push_str(" • fallback");
    }
    if result.escalated {
        meta.push_str(" • escalated");
    }
    println!("  {}", meta.black().bold());
}

pub fn print_route(route: &Route) {
    println!("  {} {}", "Category:".bold(), route.category.to_string().cyan());
    println!("  {} {}", "Backend:".bold(), route.backend.id());
    match route.model_category {
        Some(category) => println!("  {} {}", "Model said:".bold(), category),
        None => println!("  {} {}", "Model said:".bold(), "(classification failed)".yellow()),
    }
    for rule in &route.overrides {
        print_step(&format!("override: {}", rule));
    }
}
