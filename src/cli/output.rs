// Output formatting and display for CLI

use crate::config::SupervisorConfig;
use crate::health::HealthStatus;
use crate::process::WorkerState;
use crate::watchdog::{WatchdogStatus, WorkerStatus};
use chrono::{DateTime, Local};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

pub fn print_success_msg(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print the supervisor overview followed by one row per worker
pub fn print_status(status: &WatchdogStatus) {
    let generated: DateTime<Local> = status.generated_at.into();

    println!("\n{}", "Supervisor Status".bold().underline());
    println!();
    println!(
        "  {:<20} {}",
        "System health:".bold(),
        format_health_colored(status.system_health)
    );
    println!(
        "  {:<20} {}",
        "Monitoring:".bold(),
        if status.monitoring {
            "active".green().to_string()
        } else {
            "stopped".bright_black().to_string()
        }
    );

    if status.rolling_restart_in_progress {
        let pending: Vec<String> = status.pending_restarts.iter().map(|id| id.to_string()).collect();
        println!(
            "  {:<20} {} (pending: {})",
            "Rolling restart:".bold(),
            "in progress".yellow(),
            if pending.is_empty() {
                "-".to_string()
            } else {
                pending.join(", ")
            }
        );
    }

    if status.maintenance_enabled {
        let maintenance = &status.maintenance;
        println!(
            "  {:<20} {} by {} ({})",
            "Maintenance:".bold(),
            "ON".red().bold(),
            maintenance
                .triggered_by
                .map(|by| by.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            maintenance.reason.as_deref().unwrap_or("no reason given")
        );
        if let Some(until) = maintenance.auto_disable_at {
            let until: DateTime<Local> = until.into();
            println!(
                "  {:<20} {}",
                "Auto-disable at:".bold(),
                until.format("%Y-%m-%d %H:%M:%S")
            );
        }
    } else {
        println!("  {:<20} {}", "Maintenance:".bold(), "off".green());
    }

    if status.workers.is_empty() {
        println!("\n{}", "No workers are currently tracked".yellow());
    } else {
        println!("\n{}\n", worker_table(&status.workers));
    }

    println!(
        "{}",
        format!(
            "Total: {} worker(s), snapshot taken {}",
            status.workers.len(),
            generated.format("%H:%M:%S")
        )
        .dimmed()
        .italic()
    );
}

fn worker_table(workers: &[WorkerStatus]) -> Table {
    #[derive(Tabled)]
    struct WorkerRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "State")]
        state: String,
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "Health")]
        health: String,
        #[tabled(rename = "Memory")]
        memory: String,
        #[tabled(rename = "Lag")]
        lag: String,
        #[tabled(rename = "Requests")]
        requests: String,
        #[tabled(rename = "Errors")]
        errors: String,
        #[tabled(rename = "Restarts")]
        restarts: String,
        #[tabled(rename = "Last Heartbeat")]
        last_heartbeat: String,
    }

    let rows: Vec<WorkerRow> = workers
        .iter()
        .map(|w| WorkerRow {
            id: w.health.id.to_string(),
            state: w
                .state
                .map(format_state_colored)
                .unwrap_or_else(|| "-".to_string()),
            pid: w
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
            health: format_health_colored(w.health.status),
            memory: format!("{}MB", w.health.metrics.memory_usage_mb),
            lag: format!("{}ms", w.health.metrics.event_loop_lag_ms),
            requests: w.health.metrics.request_count.to_string(),
            errors: w.health.metrics.error_count.to_string(),
            restarts: w.health.restart_count.to_string(),
            last_heartbeat: format!(
                "{} ago",
                format_duration(Duration::from_millis(w.health.last_heartbeat_ms_ago))
            ),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));
    table
}

/// Print the effective configuration after file, env and flag overrides
pub fn print_config(config: &SupervisorConfig) {
    println!("\n{}", "Effective Configuration".bold().underline());
    println!();

    let rows: [(&str, String); 15] = [
        ("Workers", config.worker_count.to_string()),
        ("Worker command", worker_command(config)),
        ("Memory threshold", format!("{}MB", config.memory_threshold_mb)),
        ("Heartbeat interval", format_duration(config.heartbeat_interval())),
        ("Heartbeat timeout", format_duration(config.heartbeat_timeout())),
        ("Check interval", format_duration(config.check_interval())),
        (
            "Crash loop",
            format!(
                "> {} exits in {}",
                config.restart_threshold,
                format_duration(config.restart_window())
            ),
        ),
        ("Drain timeout", format_duration(config.drain_timeout())),
        ("Settle delay", format_duration(config.settle_delay())),
        (
            "Shutdown timeout",
            format_duration(config.graceful_shutdown_timeout()),
        ),
        (
            "Maintenance length",
            format!("{}m", config.maintenance_duration_minutes),
        ),
        (
            "Maintenance state",
            config.maintenance_state_path.display().to_string(),
        ),
        ("Status file", config.status_file.display().to_string()),
        ("PID file", config.pid_file.display().to_string()),
        (
            "Working directory",
            config
                .worker
                .cwd
                .as_ref()
                .map(|cwd| cwd.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
    ];

    for (label, value) in rows {
        println!("  {:<20} {}", format!("{}:", label).bold(), value);
    }
    println!();
}

fn worker_command(config: &SupervisorConfig) -> String {
    let mut parts = vec![config.worker.script.display().to_string()];
    parts.extend(config.worker.args.iter().cloned());
    parts.join(" ")
}

fn format_state_colored(state: WorkerState) -> String {
    match state {
        WorkerState::Running => state.to_string().green().to_string(),
        WorkerState::Starting => state.to_string().yellow().to_string(),
        WorkerState::Draining => state.to_string().yellow().to_string(),
        WorkerState::Dead => state.to_string().bright_black().to_string(),
    }
}

fn format_health_colored(status: HealthStatus) -> String {
    match status {
        HealthStatus::Healthy => status.to_string().green().to_string(),
        HealthStatus::Degraded => status.to_string().yellow().to_string(),
        HealthStatus::Unhealthy => status.to_string().red().bold().to_string(),
    }
}

/// Format a duration in human-readable format
fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis() as u64;
    let secs = duration.as_secs();

    if millis < 1000 {
        format!("{}ms", millis)
    } else if secs < 60 {
        let tenths = (millis % 1000) / 100;
        if tenths > 0 {
            format!("{}.{}s", secs, tenths)
        } else {
            format!("{}s", secs)
        }
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

/// Spinner for operations that wait on the supervisor
pub fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn finish_progress_success(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✓".green(), message));
}

pub fn finish_progress_error(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✗".red(), message));
}
