//! Configuration management
//!
//! Settings live in `settings.json` inside the data directory:
//! ```json
//! {
//!   "api": { "baseUrl": "https://ledger.example.com", "timeoutSecs": 30 },
//!   "auth": { "accessToken": "..." },
//!   "device": { "deviceId": "..." },
//!   "delivery": { "flushIntervalSecs": 60, "retentionDays": 30 },
//!   "assignments": { "lemon": "user-1" }
//! }
//! ```
//!
//! Unknown fields are preserved on save. `NOTIFCOLLECTOR_BASE_URL`,
//! `NOTIFCOLLECTOR_TOKEN` and `NOTIFCOLLECTOR_DEVICE_ID` override the file
//! for the lifetime of the process and are never written back.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::adapters::http_ledger::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};

pub const SETTINGS_FILE: &str = "settings.json";

pub const ENV_BASE_URL: &str = "NOTIFCOLLECTOR_BASE_URL";
pub const ENV_TOKEN: &str = "NOTIFCOLLECTOR_TOKEN";
pub const ENV_DEVICE_ID: &str = "NOTIFCOLLECTOR_DEVICE_ID";

pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Keys accepted by [`Config::set`]
pub const SETTABLE_KEYS: &[&str] = &[
    "api.baseUrl",
    "api.timeoutSecs",
    "auth.accessToken",
    "device.deviceId",
    "delivery.flushIntervalSecs",
    "delivery.retentionDays",
];

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    api: ApiSettings,
    #[serde(default)]
    auth: AuthSettings,
    #[serde(default)]
    device: DeviceSettings,
    #[serde(default)]
    delivery: DeliverySettings,
    #[serde(default)]
    assignments: BTreeMap<String, String>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_secs: Option<u64>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_id: Option<String>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeliverySettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    flush_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retention_days: Option<u32>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Collector configuration (resolved view of settings plus environment)
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub timeout_secs: u64,
    pub access_token: Option<String>,
    pub device_id: Option<String>,
    pub flush_interval_secs: u64,
    pub retention_days: u32,
    /// Legacy per-provider routing cache (provider tag -> user id)
    pub assignments: BTreeMap<String, String>,
    env_overrides: Vec<&'static str>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_settings(SettingsFile::default())
    }
}

fn read_settings(data_dir: &Path) -> Result<SettingsFile> {
    let settings_path = data_dir.join(SETTINGS_FILE);
    if !settings_path.exists() {
        return Ok(SettingsFile::default());
    }
    let content = std::fs::read_to_string(&settings_path)?;
    match serde_json::from_str(&content) {
        Ok(settings) => Ok(settings),
        Err(e) => {
            tracing::warn!(path = %settings_path.display(), error = %e, "ignoring unreadable settings file");
            Ok(SettingsFile::default())
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    fn from_settings(raw: SettingsFile) -> Self {
        Self {
            base_url: raw
                .api
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout_secs: raw.api.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            access_token: raw.auth.access_token.filter(|t| !t.is_empty()),
            device_id: raw.device.device_id.filter(|d| !d.is_empty()),
            flush_interval_secs: raw
                .delivery
                .flush_interval_secs
                .unwrap_or(DEFAULT_FLUSH_INTERVAL_SECS),
            retention_days: raw
                .delivery
                .retention_days
                .unwrap_or(DEFAULT_RETENTION_DAYS),
            assignments: raw.assignments,
            env_overrides: Vec::new(),
        }
    }

    /// Load config from the data directory, then apply environment overrides
    pub fn load(data_dir: &Path) -> Result<Self> {
        let mut config = Self::from_settings(read_settings(data_dir)?);

        if let Some(url) = env_value(ENV_BASE_URL) {
            config.base_url = url;
            config.env_overrides.push(ENV_BASE_URL);
        }
        if let Some(token) = env_value(ENV_TOKEN) {
            config.access_token = Some(token);
            config.env_overrides.push(ENV_TOKEN);
        }
        if let Some(device_id) = env_value(ENV_DEVICE_ID) {
            config.device_id = Some(device_id);
            config.env_overrides.push(ENV_DEVICE_ID);
        }

        Ok(config)
    }

    /// Re-read settings from disk, replacing the in-memory view
    pub fn reload(&mut self, data_dir: &Path) -> Result<()> {
        *self = Self::load(data_dir)?;
        Ok(())
    }

    /// Save config to the data directory
    ///
    /// Preserves fields this crate doesn't manage. Values that came from the
    /// environment keep whatever the file already had.
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(data_dir)?;
        let settings_path = data_dir.join(SETTINGS_FILE);
        let mut settings = read_settings(data_dir)?;

        if !self.is_overridden(ENV_BASE_URL) {
            settings.api.base_url = Some(self.base_url.clone());
        }
        if !self.is_overridden(ENV_TOKEN) {
            settings.auth.access_token = self.access_token.clone();
        }
        if !self.is_overridden(ENV_DEVICE_ID) {
            settings.device.device_id = self.device_id.clone();
        }
        settings.api.timeout_secs = Some(self.timeout_secs);
        settings.delivery.flush_interval_secs = Some(self.flush_interval_secs);
        settings.delivery.retention_days = Some(self.retention_days);
        settings.assignments = self.assignments.clone();

        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&settings_path, content)?;
        Ok(())
    }

    /// Return the device id, generating and persisting one on first use
    pub fn ensure_device_id(&mut self, data_dir: &Path) -> Result<String> {
        if let Some(id) = &self.device_id {
            return Ok(id.clone());
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.device_id = Some(id.clone());
        self.save(data_dir)?;
        tracing::info!(device_id = %id, "generated device id");
        Ok(id)
    }

    /// Set a single setting by its settings.json path
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "api.baseUrl" => {
                url::Url::parse(value)
                    .map_err(|e| anyhow::anyhow!("Invalid URL '{}': {}", value, e))?;
                self.base_url = value.trim_end_matches('/').to_string();
            }
            "api.timeoutSecs" => self.timeout_secs = parse_positive(key, value)?,
            "auth.accessToken" => {
                self.access_token = Some(value.to_string()).filter(|v| !v.is_empty())
            }
            "device.deviceId" => self.device_id = Some(value.to_string()).filter(|v| !v.is_empty()),
            "delivery.flushIntervalSecs" => self.flush_interval_secs = parse_positive(key, value)?,
            "delivery.retentionDays" => self.retention_days = parse_positive(key, value)?,
            _ => anyhow::bail!(
                "Unknown setting '{}'. Valid keys: {}",
                key,
                SETTABLE_KEYS.join(", ")
            ),
        }
        // An explicit set wins over the environment on save
        let env = match key {
            "api.baseUrl" => Some(ENV_BASE_URL),
            "auth.accessToken" => Some(ENV_TOKEN),
            "device.deviceId" => Some(ENV_DEVICE_ID),
            _ => None,
        };
        if let Some(env) = env {
            self.env_overrides.retain(|e| *e != env);
        }
        Ok(())
    }

    /// Environment variables currently overriding the file
    pub fn env_overrides(&self) -> &[&'static str] {
        &self.env_overrides
    }

    fn is_overridden(&self, env: &str) -> bool {
        self.env_overrides.iter().any(|e| *e == env)
    }
}

fn parse_positive<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match value.parse::<T>() {
        Ok(v) if v > T::default() => Ok(v),
        _ => anyhow::bail!("'{}' must be a positive integer, got '{}'", key, value),
    }
}
