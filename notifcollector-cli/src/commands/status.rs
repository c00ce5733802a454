//! Status command - show queue and routing status

use anyhow::Result;
use colored::Colorize;
use comfy_table::{ContentArrangement, Table};
use notifcollector_core::services::ListenerState;

use super::get_context;
use crate::output;

pub fn run(json: bool) -> Result<()> {
    let ctx = get_context("status")?;
    // A one-shot command never hosts the listener
    let status = ctx
        .status_service
        .get_status(&ctx.device_id, ListenerState::Disconnected)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{}", "Collector Status".bold());
    println!();

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.add_row(vec!["Device", &status.device_id]);
    table.add_row(vec!["Ledger", &ctx.config.base_url]);
    table.add_row(vec![
        "Credential",
        if ctx.config.access_token.is_some() { "present" } else { "missing" },
    ]);
    table.add_row(vec!["Pending events", &status.pending_events.to_string()]);
    table.add_row(vec!["Uploaded events", &status.uploaded_events.to_string()]);
    table.add_row(vec!["Assignments", &status.assignments.len().to_string()]);
    println!("{}", table);
    println!();

    if !status.assignments.is_empty() {
        println!("{}", "Routing".bold());
        for a in &status.assignments {
            println!("  • {} → {}", a.provider, a.user_id);
        }
        println!();
    }

    if status.pending_events > 0 && !status.unassigned_providers.is_empty() {
        output::warning(&format!(
            "Unassigned providers: {} (their events stay pending)",
            status.unassigned_providers.join(", ")
        ));
    }

    if !status.recent_errors.is_empty() {
        println!("{}", "Recent Errors".red().bold());
        for err in status.recent_errors.iter().take(3) {
            println!(
                "  {} [{}]: {}",
                output::format_timestamp(err.timestamp).dimmed(),
                err.event,
                err.error_message.as_deref().unwrap_or("Unknown error")
            );
        }
    }

    Ok(())
}
