//! Notification collector CLI - wallet notifications to ledger events

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{assign, config, events, flush, ingest, listen, logs, status};

/// ncol - collect wallet push notifications and deliver them to the ledger
#[derive(Parser)]
#[command(name = "ncol", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse, store and deliver a single notification
    Ingest {
        /// Source application package (e.g. com.lemon.wallet)
        #[arg(long)]
        package: String,
        /// Notification title
        #[arg(long)]
        title: Option<String>,
        /// Notification text
        #[arg(long)]
        text: Option<String>,
        /// Expanded notification text
        #[arg(long)]
        big_text: Option<String>,
        /// Post time in epoch milliseconds (defaults to now)
        #[arg(long)]
        post_time: Option<i64>,
        /// Store only, skip the delivery attempt
        #[arg(long)]
        no_deliver: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Feed newline-delimited JSON notifications from a file
    Replay {
        /// File with one notification object per line
        file: PathBuf,
        /// Store only, skip the delivery pass
        #[arg(long)]
        no_deliver: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Listen for notifications on stdin (one JSON object per line)
    Listen {
        /// Store only; rely on the periodic flush for delivery
        #[arg(long)]
        no_deliver: bool,
        /// Print each outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run one delivery pass over pending events
    Flush {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect and prune stored events
    Events {
        #[command(subcommand)]
        command: events::EventsCommands,
    },

    /// Route a provider on this device to a user
    Assign {
        /// Provider tag (uala, lemon, mercadopago, brubank)
        provider: String,
        /// Ledger user id
        user_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove the routing of a provider on this device
    Unassign {
        /// Provider tag
        provider: String,
        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },

    /// Show assignments for this device
    Assignments {
        /// Pull the ledger's assignments first and overwrite the local ones
        #[arg(long)]
        sync: bool,
        /// Show the ledger's view without touching the local directory
        #[arg(long, conflicts_with = "sync")]
        remote: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List ledger users
    Users {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show queue and routing status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// View and manage the event journal
    Logs {
        #[command(subcommand)]
        command: logs::LogsCommands,
    },

    /// Show or change settings
    Config {
        #[command(subcommand)]
        command: config::ConfigCommands,
    },
}

fn main() -> ExitCode {
    commands::init_tracing();
    let cli = Cli::parse();

    let result = run(cli);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest { package, title, text, big_text, post_time, no_deliver, json } => {
            ingest::run(ingest::IngestArgs { package, title, text, big_text, post_time }, no_deliver, json)
        }
        Commands::Replay { file, no_deliver, json } => ingest::run_replay(&file, no_deliver, json),
        Commands::Listen { no_deliver, json } => listen::run(no_deliver, json),
        Commands::Flush { json } => flush::run(json),
        Commands::Events { command } => events::run(command),
        Commands::Assign { provider, user_id, json } => assign::run_assign(&provider, &user_id, json),
        Commands::Unassign { provider, force } => assign::run_unassign(&provider, force),
        Commands::Assignments { sync, remote, json } => assign::run_list(sync, remote, json),
        Commands::Users { json } => assign::run_users(json),
        Commands::Status { json } => status::run(json),
        Commands::Logs { command } => logs::run(command),
        Commands::Config { command } => config::run(command),
    }
}
