// Output formatting and display for CLI

use crate::process::{BackoffStrategy, ExitReason, RestartPolicy, WorkerKind};
use crate::supervisor::{ShutdownReport, SpawnReport};
use colored::*;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Effective settings of one role, as `warden roles` shows them
#[derive(Debug, Clone, PartialEq)]
pub struct RoleSummary {
    pub name: String,
    pub kind: WorkerKind,
    pub policy: RestartPolicy,
    pub stop_signal: String,
    pub stop_timeout: Duration,
    /// `None` when the role re-executes the warden binary
    pub command: Option<Vec<String>>,
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

pub fn print_success_msg(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print the role table
pub fn print_roles(roles: &[RoleSummary]) {
    #[derive(Tabled)]
    struct RoleRow {
        #[tabled(rename = "Role")]
        name: String,
        #[tabled(rename = "Kind")]
        kind: String,
        #[tabled(rename = "Autorestart")]
        autorestart: String,
        #[tabled(rename = "Max Restarts")]
        max_restarts: String,
        #[tabled(rename = "Window")]
        window: String,
        #[tabled(rename = "Backoff")]
        backoff: String,
        #[tabled(rename = "Stop")]
        stop: String,
        #[tabled(rename = "Command")]
        command: String,
    }

    let rows: Vec<RoleRow> = roles
        .iter()
        .map(|r| RoleRow {
            name: r.name.cyan().to_string(),
            kind: r.kind.to_string(),
            autorestart: if r.policy.enabled {
                "yes".green().to_string()
            } else {
                "no".bright_black().to_string()
            },
            max_restarts: r.policy.max_restarts.to_string(),
            window: format_duration(&r.policy.window),
            backoff: format_backoff(&r.policy),
            stop: format!("{} / {}", r.stop_signal, format_duration(&r.stop_timeout)),
            command: r
                .command
                .as_ref()
                .map(|c| truncate(&c.join(" "), 40))
                .unwrap_or_else(|| "(built-in)".dimmed().to_string()),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
    println!(
        "{}",
        format!("Total: {} role(s)", roles.len()).dimmed().italic()
    );
}

/// Print the outcome of the spawn phase
pub fn print_spawn_report(report: &SpawnReport) {
    for (name, pid) in &report.spawned {
        println!(
            "{} {} {}",
            "✓".green().bold(),
            name.cyan(),
            format!("(pid {})", pid).dimmed()
        );
    }

    for failure in &report.failures {
        println!("{} {}", "✗".red().bold(), failure);
    }
}

/// Print the final state of every role after shutdown
pub fn print_shutdown_report(report: &ShutdownReport) {
    #[derive(Tabled)]
    struct ExitRow {
        #[tabled(rename = "Role")]
        name: String,
        #[tabled(rename = "Kind")]
        kind: String,
        #[tabled(rename = "Exit")]
        reason: String,
        #[tabled(rename = "Restarts")]
        restarts: String,
    }

    let rows: Vec<ExitRow> = report
        .exits
        .iter()
        .map(|e| ExitRow {
            name: e.name.clone(),
            kind: e.kind.to_string(),
            reason: format_reason_colored(e.reason.as_ref(), e.disabled),
            restarts: e.restart_count.to_string(),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);

    let summary = format!("Shutdown finished in {:.1}s", report.elapsed.as_secs_f64());
    if report.is_clean() {
        print_success_msg(&summary);
    } else {
        println!("{} {}", "⚠".yellow().bold(), summary);
        for error in report.errors() {
            println!("  {}", error.to_string().yellow());
        }
    }
}

fn format_reason_colored(reason: Option<&ExitReason>, disabled: bool) -> String {
    let text = match reason {
        Some(reason) => reason.to_string(),
        None => "never started".to_string(),
    };

    let text = if disabled {
        format!("{} (crash loop)", text)
    } else {
        text
    };

    match reason {
        _ if disabled => text.red().bold().to_string(),
        Some(ExitReason::ForceKilled) => text.yellow().to_string(),
        Some(ExitReason::SpawnFailed(_)) | Some(ExitReason::Lost(_)) => text.red().to_string(),
        Some(ExitReason::Exited { code: 0 }) => text.green().to_string(),
        // SIGTERM is the normal way down
        Some(ExitReason::Signaled { signal: 15 }) => text.green().to_string(),
        Some(_) => text.yellow().to_string(),
        None => text.bright_black().to_string(),
    }
}

fn format_backoff(policy: &RestartPolicy) -> String {
    match policy.backoff_strategy {
        BackoffStrategy::Fixed => format!("fixed {}", format_delay(&policy.initial_delay)),
        BackoffStrategy::Exponential { max_delay } => format!(
            "exp {}..{}",
            format_delay(&policy.initial_delay),
            format_delay(&max_delay)
        ),
    }
}

/// Sub-second delays are shown in milliseconds
fn format_delay(delay: &Duration) -> String {
    if delay.as_secs() == 0 {
        format!("{}ms", delay.as_millis())
    } else {
        format_duration(delay)
    }
}

/// Format a duration in human-readable format
fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        let secs = secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    }
}

/// Truncate a string to a maximum length
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
