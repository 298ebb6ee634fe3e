//! Pretty console output for a run: banners, per-process status lines, and
//! the final summary, built around `console`-styled dividers and banners
//! for process-level events.

use console::style;

use crate::invalidation::InvalidationReport;
use crate::scheduler::RunReport;

pub fn format_run_start(workflow_path: &str, jobs: usize) {
    println!("\n{}", "═".repeat(80));
    println!(
        "{} {} {}",
        style("▶").cyan().bold(),
        style("tuttle run:").bold(),
        style(workflow_path).cyan().bold()
    );
    println!("  {} {}", style("Workers:").dim(), style(jobs.to_string()).dim());
    println!("{}", "─".repeat(80));
}

pub fn format_invalidation_summary(report: &InvalidationReport) {
    if report.invalidated.is_empty() && report.not_created_by_tuttle.is_empty() {
        println!("{} nothing to invalidate", style("•").dim());
        return;
    }
    for entry in &report.invalidated {
        println!(
            "  {} {} — {}",
            style("↻").yellow(),
            style(&entry.resource).yellow(),
            entry.reason.message()
        );
    }
    for url in &report.not_created_by_tuttle {
        println!(
            "  {} {} exists but was not recorded as created by tuttle",
            style("⚠").yellow().bold(),
            url
        );
    }
}

pub fn format_process_started(id: &str) {
    println!("{} {}", style("→").cyan(), style(id).bold());
}

pub fn format_process_succeeded(id: &str) {
    println!("{} {}", style("✓").green().bold(), id);
}

pub fn format_process_failed(id: &str, message: &str) {
    println!("{} {}\n{}", style("✗").red().bold(), style(id).bold(), style(message).red());
}

pub fn format_run_summary(report: &RunReport) {
    println!("\n{}", "─".repeat(80));
    if report.failure.is_empty() {
        println!(
            "{} {} process(es) succeeded",
            style("✓").green().bold(),
            report.success.len()
        );
    } else {
        println!(
            "{} {} succeeded, {} failed",
            style("✗").red().bold(),
            report.success.len(),
            report.failure.len()
        );
        for (id, message) in &report.failure {
            println!("  {} {}: {}", style("✗").red(), id, message);
        }
    }
}
