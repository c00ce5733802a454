//! Flush command - one delivery pass over the pending backlog

use anyhow::Result;
use colored::Colorize;
use indicatif::ProgressBar;

use super::{block_on, get_context};
use crate::output;

pub fn run(json: bool) -> Result<()> {
    let ctx = get_context("flush")?;

    let spinner = if json {
        ProgressBar::hidden()
    } else {
        let spinner = ProgressBar::new_spinner();
        spinner.set_message("Delivering pending events...");
        spinner.enable_steady_tick(std::time::Duration::from_millis(100));
        spinner
    };
    let result = block_on(ctx.delivery_service.flush())?;
    spinner.finish_and_clear();

    let report = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.skipped_busy {
        output::warning("Another delivery pass is in progress. Try again later.");
        return Ok(());
    }

    println!("{}", "Delivery Pass".bold());
    println!("  Pending at start: {}", report.pending);
    println!("  Delivered: {}", report.uploaded.to_string().green());
    println!("  Waiting for assignment: {}", report.unassigned);
    if report.undeliverable > 0 {
        println!("  Unknown provider (never delivered): {}", report.undeliverable);
    }
    if report.failed > 0 {
        println!("  Failed (will retry): {}", report.failed.to_string().red());
        for err in report.errors.iter().take(5) {
            println!("    {}", err.dimmed());
        }
    }
    if let Some(reason) = &report.aborted {
        output::error(&format!("Pass stopped early: {}", reason));
    }
    if report.unassigned > 0 {
        output::info("Use 'ncol assign <provider> <user-id>' to route waiting events.");
    }

    Ok(())
}
