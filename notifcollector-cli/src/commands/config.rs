//! Config command - show or change settings.json

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use notifcollector_core::config::{Config, SETTABLE_KEYS};

use super::get_data_dir;
use crate::output;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set one value, e.g. `ncol config set api.baseUrl https://ledger.example.com`
    Set {
        /// Setting key (api.baseUrl, auth.accessToken, ...)
        key: String,
        /// New value (empty string clears optional values)
        value: String,
    },
}

pub fn run(command: ConfigCommands) -> Result<()> {
    let data_dir = get_data_dir()?;

    match command {
        ConfigCommands::Show { json } => {
            let config = Config::load(&data_dir)?;
            let token = config.access_token.as_ref().map(|_| "********");

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "dataDir": data_dir.to_string_lossy(),
                        "api": { "baseUrl": config.base_url, "timeoutSecs": config.timeout_secs },
                        "auth": { "accessToken": token },
                        "device": { "deviceId": config.device_id },
                        "delivery": {
                            "flushIntervalSecs": config.flush_interval_secs,
                            "retentionDays": config.retention_days,
                        },
                        "assignments": config.assignments,
                        "envOverrides": config.env_overrides(),
                    }))?
                );
                return Ok(());
            }

            let mut table = output::create_table();
            table.set_header(vec!["Key", "Value"]);
            table.add_row(vec!["api.baseUrl".to_string(), config.base_url.clone()]);
            table.add_row(vec!["api.timeoutSecs".to_string(), config.timeout_secs.to_string()]);
            table.add_row(vec![
                "auth.accessToken".to_string(),
                token.unwrap_or("(not set)").to_string(),
            ]);
            table.add_row(vec![
                "device.deviceId".to_string(),
                config.device_id.clone().unwrap_or_else(|| "(generated on first run)".into()),
            ]);
            table.add_row(vec![
                "delivery.flushIntervalSecs".to_string(),
                config.flush_interval_secs.to_string(),
            ]);
            table.add_row(vec![
                "delivery.retentionDays".to_string(),
                config.retention_days.to_string(),
            ]);
            println!("{}", table);
            println!("{}", format!("Data directory: {}", data_dir.display()).dimmed());
            if !config.env_overrides().is_empty() {
                output::warning(&format!(
                    "Overridden by environment: {}",
                    config.env_overrides().join(", ")
                ));
            }
        }
        ConfigCommands::Set { key, value } => {
            std::fs::create_dir_all(&data_dir)?;
            let mut config = Config::load(&data_dir)?;
            if let Err(e) = config.set(&key, &value) {
                output::error(&e.to_string());
                println!("{}", format!("Settable keys: {}", SETTABLE_KEYS.join(", ")).dimmed());
                std::process::exit(1);
            }
            config.save(&data_dir)?;
            output::success(&format!("Updated {}", key));
        }
    }

    Ok(())
}
