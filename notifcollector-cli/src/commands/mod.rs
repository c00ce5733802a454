//! CLI command implementations

pub mod assign;
pub mod config;
pub mod events;
pub mod flush;
pub mod ingest;
pub mod listen;
pub mod logs;
pub mod status;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use notifcollector_core::services::{EntryPoint, LogEvent, LoggingService};
use notifcollector_core::CollectorContext;
use tracing_subscriber::EnvFilter;

/// Install the stderr tracing subscriber (`NOTIFCOLLECTOR_LOG`, default `warn`)
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("NOTIFCOLLECTOR_LOG")
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Get the logging service for CLI operations
///
/// Returns None if logging fails to initialize (shouldn't block operations)
pub fn get_logger(entry_point: EntryPoint) -> Option<Arc<LoggingService>> {
    let data_dir = get_data_dir().ok()?;
    std::fs::create_dir_all(&data_dir).ok()?;
    LoggingService::new(&data_dir, entry_point, env!("CARGO_PKG_VERSION"))
        .ok()
        .map(Arc::new)
}

/// Log an event, ignoring any errors (logging should never break the app)
pub fn log_event(logger: &Option<Arc<LoggingService>>, event: LogEvent) {
    if let Some(l) = logger {
        let _ = l.log(event);
    }
}

/// Get the data directory from environment or default
pub fn get_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("NOTIFCOLLECTOR_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".notifcollector"))
        .context("Could not find home directory; set NOTIFCOLLECTOR_DIR")
}

/// Get or create the collector context, journaling the command
pub fn get_context(command: &str) -> Result<CollectorContext> {
    get_context_for(EntryPoint::Cli, command)
}

pub fn get_context_for(entry_point: EntryPoint, command: &str) -> Result<CollectorContext> {
    let data_dir = get_data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

    let logger = get_logger(entry_point);
    log_event(&logger, LogEvent::new("command_executed").with_command(command));

    CollectorContext::new(&data_dir, logger).context("Failed to initialize collector context")
}

/// Run a future to completion on a fresh runtime
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    Ok(runtime.block_on(future))
}
