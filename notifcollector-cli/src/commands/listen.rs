//! Listen command - long-running notification listener on stdin
//!
//! Each stdin line is one notification object
//! (`{"packageName": ..., "title": ..., "text": ..., "bigText": ..., "postTime": ...}`).
//! The listener connects on start and disconnects on EOF or Ctrl-C; tasks
//! already handed off are allowed to finish.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use notifcollector_core::services::EntryPoint;
use notifcollector_core::RawNotification;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;

use super::{block_on, get_context_for};
use crate::output;

pub fn run(no_deliver: bool, json: bool) -> Result<()> {
    let ctx = get_context_for(EntryPoint::Listener, "listen")?;
    let flush_period = Duration::from_secs(ctx.config.flush_interval_secs.max(1));

    block_on(async move {
        let listener = Arc::new(ctx.listener().with_deliver_on_ingest(!no_deliver));
        listener.connect();
        let periodic = listener.spawn_periodic_flush(flush_period);

        if atty::is(atty::Stream::Stdin) && !json {
            output::info("Listening for notifications (one JSON object per line, Ctrl-D to stop)");
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut tasks = JoinSet::new();

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = tokio::signal::ctrl_c() => break,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    output::error(&format!("Failed to read stdin: {}", e));
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let raw: RawNotification = match serde_json::from_str(&line) {
                Ok(raw) => raw,
                Err(e) => {
                    output::warning(&format!("Ignoring invalid notification: {}", e));
                    continue;
                }
            };

            if let Some(handle) = listener.on_notification(raw) {
                tasks.spawn(async move {
                    match handle.await {
                        Ok(Ok(outcome)) if json => {
                            if let Ok(line) = serde_json::to_string(&outcome) {
                                println!("{}", line);
                            }
                        }
                        Ok(Ok(outcome)) => output::print_outcome(&outcome),
                        Ok(Err(e)) => output::error(&format!("Failed to store notification: {}", e)),
                        Err(e) => output::error(&format!("Notification task failed: {}", e)),
                    }
                });
            }
        }

        listener.disconnect();
        periodic.abort();
        while tasks.join_next().await.is_some() {}
    })?;

    Ok(())
}
