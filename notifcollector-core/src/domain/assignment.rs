//! Provider-to-user routing for a device

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::provider::Provider;

/// Routes events from one provider on one device to an end user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub provider: Provider,
    pub device_id: String,
    pub user_id: String,
    pub assigned_at: DateTime<Utc>,
}

impl Assignment {
    pub fn new(provider: Provider, device_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            provider,
            device_id: device_id.into(),
            user_id: user_id.into(),
            assigned_at: Utc::now(),
        }
    }
}
