//! Output formatting utilities

use chrono::{TimeZone, Utc};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL_CONDENSED, ContentArrangement, Table};
use notifcollector_core::services::IngestOutcome;

/// Print a success message
pub fn success(msg: &str) {
    println!("{}", msg.green());
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{}", msg.red());
}

/// Print a warning message
pub fn warning(msg: &str) {
    println!("{}", msg.yellow());
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{}", msg.cyan());
}

/// Create a styled table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Epoch millis as `YYYY-MM-DD HH:MM:SS` (UTC)
pub fn format_timestamp(timestamp_ms: i64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Shorten a dedup key for tables
pub fn short_key(key: &str) -> &str {
    &key[..key.len().min(12)]
}

/// One line per ingest outcome
pub fn print_outcome(outcome: &IngestOutcome) {
    match outcome {
        IngestOutcome::Stored { event } => success(&format!(
            "Stored {} {} {} from {} ({})",
            event.provider,
            event.amount,
            event.currency,
            event.counterparty_name.as_deref().unwrap_or("-"),
            short_key(&event.dedup_key)
        )),
        IngestOutcome::Duplicate { dedup_key } => {
            info(&format!("Duplicate suppressed ({})", short_key(dedup_key)))
        }
        IngestOutcome::Unrecognized { reason } => warning(&format!("Not recognized: {}", reason)),
    }
}
