//! Normalized transaction event domain model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::amount::seed_amount;
use super::provider::Provider;
use super::result::Error;

/// Number of body characters folded into the dedup seed
pub const DEDUP_BODY_PREFIX_CHARS: usize = 64;

/// Semantic classification of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TransferIn,
    Unknown,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TransferIn => "transfer_in",
            EventType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transfer_in" => Ok(EventType::TransferIn),
            "unknown" => Ok(EventType::Unknown),
            other => Err(Error::validation(format!("Unknown event type: {}", other))),
        }
    }
}

/// A notification as handed over by the OS notification supplier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNotification {
    pub package_name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub big_text: Option<String>,
    /// Notification post time, epoch millis
    pub post_time: i64,
}

impl RawNotification {
    pub fn new(package_name: impl Into<String>, post_time: i64) -> Self {
        Self {
            package_name: package_name.into(),
            post_time,
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_big_text(mut self, big_text: impl Into<String>) -> Self {
        self.big_text = Some(big_text.into());
        self
    }

    /// Text the parser works on: big text, else text, else title, trimmed
    pub fn effective_body(&self) -> &str {
        fn non_blank(s: &Option<String>) -> Option<&str> {
            s.as_deref().map(str::trim).filter(|t| !t.is_empty())
        }

        non_blank(&self.big_text)
            .or_else(|| non_blank(&self.text))
            .or_else(|| self.title.as_deref().map(str::trim))
            .unwrap_or("")
    }
}

/// A parsed, deduplicated wallet transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    pub provider: Provider,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub amount: Decimal,
    pub currency: String,
    /// Epoch millis, taken from the notification post time
    pub occurred_at: i64,
    pub counterparty_name: Option<String>,
    pub counterparty_account: Option<String>,
    pub reference: Option<String>,

    // =========================================================================
    // Provenance snapshot (never mutated after capture)
    // =========================================================================
    pub raw_package: String,
    pub raw_title: String,
    pub raw_text: String,
    pub raw_big_text: String,

    pub dedup_key: String,
    pub uploaded: bool,
    pub created_at: DateTime<Utc>,
}

impl NormalizedEvent {
    /// Whether the delivery pipeline may ever send this event
    pub fn is_deliverable(&self) -> bool {
        self.provider.is_known()
    }

    /// Build the remote submission payload for a resolved user
    pub fn to_payload(&self, user_id: &str) -> EventPayload {
        EventPayload {
            user_id: user_id.to_string(),
            provider: self.provider,
            event_type: self.event_type,
            amount: self.amount,
            currency: self.currency.clone(),
            occurred_at: self.occurred_at,
            counterparty_name: self.counterparty_name.clone(),
            counterparty_account: self.counterparty_account.clone(),
            reference: self.reference.clone(),
            dedup_key: self.dedup_key.clone(),
            raw: RawPayload {
                package: self.raw_package.clone(),
                title: self.raw_title.clone(),
                text: self.raw_text.clone(),
                big_text: self.raw_big_text.clone(),
            },
        }
    }
}

/// Inputs of the dedup fingerprint
#[derive(Debug, Clone)]
pub struct DedupSeed<'a> {
    pub provider: Provider,
    pub event_type: EventType,
    pub amount: &'a Decimal,
    pub currency: &'a str,
    pub occurred_at: i64,
    pub reference: Option<&'a str>,
    pub body: &'a str,
}

impl DedupSeed<'_> {
    /// Deterministic seed string:
    /// `provider|type|amount|currency|occurredAt|reference|body[..64]`
    pub fn seed(&self) -> String {
        let body_prefix: String = self.body.chars().take(DEDUP_BODY_PREFIX_CHARS).collect();
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.provider,
            self.event_type,
            seed_amount(self.amount),
            self.currency,
            self.occurred_at,
            self.reference.unwrap_or(""),
            body_prefix
        )
    }

    /// SHA-256 of the seed, lowercase hex (64 chars)
    pub fn key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.seed().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Body of `POST /events`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub user_id: String,
    pub provider: Provider,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: String,
    pub occurred_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterparty_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterparty_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub dedup_key: String,
    pub raw: RawPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPayload {
    pub package: String,
    pub title: String,
    pub text: String,
    pub big_text: String,
}
