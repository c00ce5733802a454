//! Events command - inspect and prune the local event queue

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use dialoguer::Confirm;
use notifcollector_core::ports::EventStore;

use super::get_context;
use crate::output;

#[derive(Subcommand)]
pub enum EventsCommands {
    /// Show stored events, newest first
    List {
        /// Only events not yet delivered
        #[arg(long)]
        pending: bool,
        /// Number of events to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete delivered events older than the retention window
    Prune {
        /// Retention in days (defaults to delivery.retentionDays)
        #[arg(long)]
        older_than_days: Option<u32>,
        /// Skip confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: EventsCommands) -> Result<()> {
    match command {
        EventsCommands::List {
            pending,
            limit,
            json,
        } => {
            let ctx = get_context("events list")?;
            let events = if pending {
                let mut events = ctx.repository.list_pending()?;
                events.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
                events.truncate(limit);
                events
            } else {
                ctx.repository.list_recent(limit)?
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&events)?);
                return Ok(());
            }

            if events.is_empty() {
                println!("No events found.");
                return Ok(());
            }

            let mut table = output::create_table();
            table.set_header(vec![
                "Time", "Provider", "Amount", "Counterparty", "Reference", "Status", "Key",
            ]);
            for event in &events {
                let status = if event.uploaded {
                    "uploaded".green().to_string()
                } else {
                    "pending".yellow().to_string()
                };
                table.add_row(vec![
                    output::format_timestamp(event.occurred_at),
                    event.provider.to_string(),
                    format!("{} {}", event.amount, event.currency),
                    event.counterparty_name.clone().unwrap_or_default(),
                    event.reference.clone().unwrap_or_default(),
                    status,
                    output::short_key(&event.dedup_key).to_string(),
                ]);
            }
            println!("{}", table);
        }
        EventsCommands::Prune {
            older_than_days,
            force,
            json,
        } => {
            let ctx = get_context("events prune")?;
            let days = older_than_days.unwrap_or(ctx.config.retention_days);

            if !force && !json {
                if !Confirm::new()
                    .with_prompt(format!(
                        "Delete delivered events older than {} days? Pending events are kept.",
                        days
                    ))
                    .default(false)
                    .interact()?
                {
                    println!("Cancelled.");
                    return Ok(());
                }
            }

            let deleted = ctx.delivery_service.prune_uploaded(days)?;
            if json {
                println!("{}", serde_json::json!({ "deleted": deleted, "retention_days": days }));
            } else {
                output::success(&format!("Deleted {} delivered events", deleted));
            }
        }
    }

    Ok(())
}
