//! Ingest and replay commands - feed raw notifications through the pipeline

use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use notifcollector_core::services::{FlushReport, IngestOutcome};
use notifcollector_core::{CollectorContext, NormalizedEvent, RawNotification};
use serde::Serialize;

use super::{block_on, get_context};
use crate::output;

pub struct IngestArgs {
    pub package: String,
    pub title: Option<String>,
    pub text: Option<String>,
    pub big_text: Option<String>,
    pub post_time: Option<i64>,
}

#[derive(Serialize)]
struct IngestReport {
    #[serde(flatten)]
    outcome: IngestOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    delivery: Option<FlushReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    delivery_error: Option<String>,
}

/// Delivery pass after ingest; failures leave events pending and are reported.
///
/// When another process holds the flush lock, the freshly stored events are
/// submitted directly since that pass listed the queue before they existed.
fn deliver(
    ctx: &CollectorContext,
    stored: &[NormalizedEvent],
) -> Result<(Option<FlushReport>, Option<String>)> {
    let result = block_on(async {
        match ctx.delivery_service.flush().await {
            Ok(report) if report.skipped_busy => {
                ctx.delivery_service.deliver_events(stored).await
            }
            other => other,
        }
    })?;
    Ok(match result {
        Ok(report) => (Some(report), None),
        Err(e) => (None, Some(e.to_string())),
    })
}

pub fn run(args: IngestArgs, no_deliver: bool, json: bool) -> Result<()> {
    let ctx = get_context("ingest")?;

    let raw = RawNotification {
        package_name: args.package,
        title: args.title,
        text: args.text,
        big_text: args.big_text,
        post_time: args.post_time.unwrap_or_else(|| Utc::now().timestamp_millis()),
    };

    let outcome = ctx.ingest_service.ingest(&raw)?;
    let (delivery, delivery_error) = match outcome.stored() {
        Some(event) if !no_deliver => deliver(&ctx, std::slice::from_ref(event))?,
        _ => (None, None),
    };

    if json {
        let report = IngestReport {
            outcome,
            delivery,
            delivery_error,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    output::print_outcome(&outcome);
    if let Some(event) = outcome.stored() {
        if !event.is_deliverable() {
            output::warning("Unknown provider: this event will not be delivered.");
        } else if let Some(report) = &delivery {
            print_delivery(report);
        }
    }
    if let Some(err) = delivery_error {
        output::warning(&format!("Delivery skipped: {} (event stays pending)", err));
    }
    Ok(())
}

#[derive(Debug, Default, Serialize)]
struct ReplaySummary {
    lines: usize,
    stored: usize,
    duplicates: usize,
    unrecognized: usize,
    invalid: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    delivery: Option<FlushReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    delivery_error: Option<String>,
}

pub fn run_replay(file: &Path, no_deliver: bool, json: bool) -> Result<()> {
    let handle = std::fs::File::open(file)
        .with_context(|| format!("Failed to open {}", file.display()))?;
    let lines: Vec<String> = BufReader::new(handle)
        .lines()
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let ctx = get_context("replay")?;
    let mut summary = ReplaySummary::default();
    let mut stored = Vec::new();

    let progress = if json {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(lines.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar
    };

    for (index, line) in lines.iter().enumerate() {
        progress.inc(1);
        if line.trim().is_empty() {
            continue;
        }
        summary.lines += 1;

        let raw: RawNotification = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => {
                summary.invalid += 1;
                progress.println(format!("line {}: {}", index + 1, e).yellow().to_string());
                continue;
            }
        };

        match ctx.ingest_service.ingest(&raw)? {
            IngestOutcome::Stored { event } => {
                summary.stored += 1;
                stored.push(event);
            }
            IngestOutcome::Duplicate { .. } => summary.duplicates += 1,
            IngestOutcome::Unrecognized { .. } => summary.unrecognized += 1,
        }
    }
    progress.finish_and_clear();

    if summary.stored > 0 && !no_deliver {
        let (delivery, delivery_error) = deliver(&ctx, &stored)?;
        summary.delivery = delivery;
        summary.delivery_error = delivery_error;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{}", "Replay Summary".bold());
    println!("  Notifications: {}", summary.lines);
    println!("  Stored: {}", summary.stored);
    println!("  Duplicates: {}", summary.duplicates);
    println!("  Not recognized: {}", summary.unrecognized);
    if summary.invalid > 0 {
        println!("  Invalid lines: {}", summary.invalid.to_string().yellow());
    }
    if let Some(report) = &summary.delivery {
        print_delivery(report);
    }
    if let Some(err) = &summary.delivery_error {
        output::warning(&format!("Delivery skipped: {} (events stay pending)", err));
    }
    Ok(())
}

pub(crate) fn print_delivery(report: &FlushReport) {
    if report.skipped_busy {
        output::info("Another delivery pass is running.");
        return;
    }
    println!(
        "  Delivered: {}  Unassigned: {}  Failed: {}",
        report.uploaded.to_string().green(),
        report.unassigned,
        if report.failed > 0 {
            report.failed.to_string().red().to_string()
        } else {
            "0".to_string()
        }
    );
    if let Some(reason) = &report.aborted {
        output::error(&format!("Delivery stopped: {}", reason));
    }
}
