//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print rows as a rounded table, or a notice when there are none
pub fn print_table<T: Tabled>(rows: Vec<T>, empty_message: &str) {
    if rows.is_empty() {
        print_warning(empty_message);
        return;
    }
    println!("{}", Table::new(rows).with(Style::rounded()));
}

/// Print a section heading
pub fn print_heading(title: &str) {
    println!("{}", title.bold());
    println!("{}", "=".repeat(60));
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Color a pod phase, readiness or outcome word
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "running" | "succeeded" | "ready" | "true" | "healthy" | "applied" | "created"
        | "updated" => status.green().to_string(),
        "pending" | "unknown" | "degraded" => status.yellow().to_string(),
        "failed" | "false" | "unhealthy" | "error" | "panicked" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// `ready/total`, red unless every container is ready
pub fn format_ready(ready: usize, total: usize) -> String {
    let text = format!("{}/{}", ready, total);
    if total > 0 && ready == total {
        text.green().to_string()
    } else {
        text.red().to_string()
    }
}

/// Age of an RFC 3339 timestamp, kubectl style (`45s`, `12m`, `3h`, `5d`)
pub fn format_age(timestamp: Option<&str>) -> String {
    let Some(ts) = timestamp else {
        return "-".to_string();
    };
    match chrono::DateTime::parse_from_rfc3339(ts) {
        Ok(dt) => format_duration_secs(
            chrono::Utc::now()
                .signed_duration_since(dt)
                .num_seconds()
                .max(0),
        ),
        Err(_) => ts.to_string(),
    }
}

fn format_duration_secs(secs: i64) -> String {
    match secs {
        s if s < 120 => format!("{}s", s),
        s if s < 2 * 3600 => format!("{}m", s / 60),
        s if s < 2 * 86400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86400),
    }
}

/// Shorten long messages for table cells
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_buckets() {
        assert_eq!(format_duration_secs(5), "5s");
        assert_eq!(format_duration_secs(600), "10m");
        assert_eq!(format_duration_secs(3 * 3600), "3h");
        assert_eq!(format_duration_secs(5 * 86400), "5d");
    }

    #[test]
    fn test_age_of_missing_or_garbled_timestamp() {
        assert_eq!(format_age(None), "-");
        assert_eq!(format_age(Some("yesterday")), "yesterday");
    }

    #[test]
    fn test_truncate_keeps_short_text() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a very long message", 8), "a very …");
    }
}
