use std::time::Duration;

use console::{Style, style};
use indicatif::{ProgressBar, ProgressStyle};

use crate::execution::ExecutionResult;
use crate::plan::{MergeReport, PlanResult, PlanStatus};
use crate::strategy::Capabilities;
use crate::utils::truncate_with_marker;

const SUMMARY_WIDTH: usize = 72;

pub struct Display;

impl Display {
    pub fn new() -> Self {
        Self
    }

    pub fn print_header(&self, text: &str) {
        println!();
        println!("{}", style(text).bold().cyan());
        println!("{}", style("═".repeat(60)).dim());
        println!();
    }

    pub fn print_execution_result(&self, result: &ExecutionResult) {
        if result.success {
            self.print_success(&result.summary);
        } else {
            self.print_error(&result.summary);
        }
        println!(
            "    Model: {}  Exit: {}  Elapsed: {}",
            style(&result.model).dim(),
            result.exit_code,
            format_ms(result.elapsed_ms)
        );
        if !result.notes.is_empty() {
            println!("    {}", style(truncate_with_marker(&result.notes, 400)).dim());
        }
        if result.retryable {
            println!("    {}", style("retryable").yellow());
        }
        self.print_files("Touched files", &result.touched_files);
    }

    pub fn print_plan_result(&self, plan: &PlanResult) {
        self.print_header("Plan Result");

        println!(
            "Status: {}  Steps: {} ok / {} failed  Elapsed: {}",
            self.status_style(plan.status).apply_to(plan.status.as_str()),
            style(plan.succeeded()).green(),
            style(plan.failed()).red(),
            format_ms(plan.elapsed_ms)
        );
        println!();

        println!(
            "{:<12} {:<6} {}",
            style("Step").bold(),
            style("Status").bold(),
            style("Summary").bold()
        );
        println!("{}", style("─".repeat(65)).dim());
        for step in &plan.steps {
            let label = if step.result.success {
                style(step.status_label()).green()
            } else {
                style(step.status_label()).red()
            };
            println!(
                "{:<12} {:<6} {}",
                step.step_id,
                label,
                truncate_with_marker(&step.result.summary, SUMMARY_WIDTH)
            );
        }

        if let Some(report) = &plan.merge_report {
            println!();
            self.print_merge_report(report);
        }
        if let Some(invocation) = &plan.invocation {
            println!();
            println!(
                "Invocation: {} (exit {}, {})",
                invocation.summary,
                invocation.exit_code,
                format_ms(invocation.elapsed_ms)
            );
        }
        self.print_files("Touched files", &plan.touched_files);
    }

    fn print_merge_report(&self, report: &MergeReport) {
        let disjoint = if report.disjoint {
            style("disjoint").green()
        } else {
            style("overlapping").yellow()
        };
        println!(
            "Isolation: {} ({}, {})",
            report.strategy, disjoint, report.enforcement
        );
        for overlap in &report.overlaps {
            self.print_warning(&format!(
                "{} / {}: {}",
                overlap.first, overlap.second, overlap.reason
            ));
        }
    }

    pub fn print_backends(&self, backends: &[(String, Capabilities)], default: &str) {
        self.print_header("Backends");
        for (name, caps) in backends {
            let marker = if name == default { "*" } else { " " };
            let preferred: Vec<&str> = caps
                .preferred_task_types
                .iter()
                .map(|t| t.as_str())
                .collect();
            println!("{} {}", marker, style(name).bold());
            println!(
                "    streaming: {}  file context: {}  native endpoint: {}  sessions: {}",
                caps.streaming, caps.file_context, caps.native_endpoint, caps.sessions
            );
            println!(
                "    preferred: {}  context file limit: {}",
                preferred.join(", "),
                caps.context_file_soft_limit
            );
        }
    }

    fn print_files(&self, label: &str, files: &[String]) {
        if files.is_empty() {
            return;
        }
        println!();
        println!("{} ({}):", label, files.len());
        for file in files {
            println!("  {}", style(file).dim());
        }
    }

    pub fn print_success(&self, message: &str) {
        println!("{} {}", style("✓").green().bold(), message);
    }

    pub fn print_error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red().bold(), message);
    }

    pub fn print_warning(&self, message: &str) {
        println!("{} {}", style("!").yellow().bold(), message);
    }

    pub fn print_info(&self, message: &str) {
        println!("{} {}", style("→").cyan(), message);
    }

    pub fn create_spinner(&self, message: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(spinner) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(spinner.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    fn status_style(&self, status: PlanStatus) -> Style {
        match status {
            PlanStatus::Ok => Style::new().green(),
            PlanStatus::Partial => Style::new().yellow().bold(),
            PlanStatus::Error => Style::new().red().bold(),
        }
    }
}

impl Default for Display {
    fn default() -> Self {
        Self::new()
    }
}

fn format_ms(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else {
        format!("{:.1}s", ms as f64 / 1_000.0)
    }
}
