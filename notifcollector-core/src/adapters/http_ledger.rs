//! Ledger HTTP API client
//!
//! Talks to the wallet ledger backend: event submission plus the assignment
//! and user directory endpoints used for routing.
//!
//! Endpoints:
//! - `POST /events` (`Idempotency-Key: <dedupKey>`)
//! - `POST /assignments`, `DELETE /assignments/{userId}/{provider}`,
//!   `GET /assignments/device/{deviceId}`
//! - `GET /users`

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::domain::result::{Error as DomainError, Result as DomainResult};
use crate::domain::{EventPayload, User};
use crate::ports::{CreateAssignmentRequest, Credential, LedgerApi, RemoteAssignment};

// =============================================================================
// API Response Models
// =============================================================================

/// Wrapper for users list response
#[derive(Debug, Clone, Deserialize)]
struct UsersResponse {
    users: Vec<User>,
    #[allow(dead_code)]
    #[serde(default)]
    total: i64,
}

/// Device assignments come back either bare or wrapped
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum AssignmentsResponse {
    Wrapped { assignments: Vec<RemoteAssignment> },
    Bare(Vec<RemoteAssignment>),
}

impl AssignmentsResponse {
    fn into_vec(self) -> Vec<RemoteAssignment> {
        match self {
            AssignmentsResponse::Wrapped { assignments } => assignments,
            AssignmentsResponse::Bare(assignments) => assignments,
        }
    }
}

// =============================================================================
// HTTP Client
// =============================================================================

/// Local development backend
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Default request timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Failure classes the port needs to tell apart
#[derive(Debug, thiserror::Error)]
enum LedgerFailure {
    #[error("Ledger rejected the credential (HTTP {0})")]
    Unauthorized(u16),
    #[error("{0}")]
    Other(String),
}

/// Ledger API client
#[derive(Debug, Clone)]
pub struct HttpLedgerClient {
    client: Client,
    base_url: String,
    timeout_secs: u64,
}

impl HttpLedgerClient {
    /// Create a client for `base_url` with the default timeout
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT_SECS)
    }

    /// Create a client with an explicit request timeout
    pub fn with_timeout(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let trimmed = base_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            anyhow::bail!("Ledger base URL cannot be empty");
        }
        Url::parse(trimmed).with_context(|| format!("Invalid ledger base URL: {}", trimmed))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: trimmed.to_string(),
            timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build `{base}/{segments...}` with each segment percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Ledger base URL cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Submit one event; the server treats a repeated key as a no-op
    pub async fn post_event(
        &self,
        payload: &EventPayload,
        idempotency_key: &str,
        credential: &Credential,
    ) -> Result<()> {
        let url = self.endpoint(&["events"])?;
        debug!(%url, dedup_key = idempotency_key, "submitting event");

        let response = self
            .client
            .post(url)
            .header("Authorization", credential.authorization())
            .header("Idempotency-Key", idempotency_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        self.check_response_status(&response)?;
        Ok(())
    }

    pub async fn post_assignment(
        &self,
        request: &CreateAssignmentRequest,
        credential: &Credential,
    ) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint(&["assignments"])?)
            .header("Authorization", credential.authorization())
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        self.check_response_status(&response)?;
        Ok(())
    }

    pub async fn remove_assignment(
        &self,
        user_id: &str,
        provider: &str,
        credential: &Credential,
    ) -> Result<()> {
        let response = self
            .client
            .delete(self.endpoint(&["assignments", user_id, provider])?)
            .header("Authorization", credential.authorization())
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        self.check_response_status(&response)?;
        Ok(())
    }

    pub async fn get_device_assignments(
        &self,
        device_id: &str,
        credential: &Credential,
    ) -> Result<Vec<RemoteAssignment>> {
        let response = self
            .client
            .get(self.endpoint(&["assignments", "device", device_id])?)
            .header("Authorization", credential.authorization())
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        self.check_response_status(&response)?;

        let body: AssignmentsResponse = response
            .json()
            .await
            .context("Failed to parse assignments response")?;
        Ok(body.into_vec())
    }

    /// Fetch the user directory. API returns `{ users: [...], total: N }`
    pub async fn get_users(&self, credential: &Credential) -> Result<Vec<User>> {
        let response = self
            .client
            .get(self.endpoint(&["users"])?)
            .header("Authorization", credential.authorization())
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        self.check_response_status(&response)?;

        let body: UsersResponse = response
            .json()
            .await
            .context("Failed to parse users response")?;
        Ok(body.users)
    }

    /// Map request errors to user-friendly messages
    fn map_request_error(&self, error: reqwest::Error) -> anyhow::Error {
        if error.is_timeout() {
            anyhow::anyhow!("Connection timed out after {} seconds", self.timeout_secs)
        } else if error.is_connect() {
            anyhow::anyhow!("Unable to connect to ledger at {}", self.base_url)
        } else {
            anyhow::anyhow!("Ledger request failed: {}", error)
        }
    }

    /// Check response status and return appropriate errors
    fn check_response_status(&self, response: &Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        match status {
            StatusCode::UNAUTHORIZED => Err(LedgerFailure::Unauthorized(status.as_u16()).into()),
            StatusCode::FORBIDDEN => Err(LedgerFailure::Other(
                "Ledger access denied. The account lacks permission for this call.".into(),
            )
            .into()),
            StatusCode::NOT_FOUND => {
                Err(LedgerFailure::Other("Ledger resource not found.".into()).into())
            }
            StatusCode::CONFLICT => Err(LedgerFailure::Other(
                "Ledger reported a conflict with existing data.".into(),
            )
            .into()),
            StatusCode::TOO_MANY_REQUESTS => Err(LedgerFailure::Other(
                "Ledger rate limit exceeded. Please wait a moment and try again.".into(),
            )
            .into()),
            other => Err(LedgerFailure::Other(format!(
                "Ledger API error: HTTP {}",
                other.as_u16()
            ))
            .into()),
        }
    }
}

/// Map a client failure into the domain taxonomy.
///
/// Rejected credentials are systemic; everything else is a transport
/// failure that leaves the record pending.
fn to_domain(error: anyhow::Error) -> DomainError {
    match error.downcast_ref::<LedgerFailure>() {
        Some(LedgerFailure::Unauthorized(_)) => DomainError::Unauthenticated(error.to_string()),
        _ => DomainError::Transport(format!("{:#}", error)),
    }
}

// =============================================================================
// LedgerApi implementation
// =============================================================================

#[async_trait]
impl LedgerApi for HttpLedgerClient {
    async fn submit_event(
        &self,
        payload: &EventPayload,
        idempotency_key: &str,
        credential: &Credential,
    ) -> DomainResult<()> {
        self.post_event(payload, idempotency_key, credential)
            .await
            .map_err(to_domain)
    }

    async fn create_assignment(
        &self,
        request: &CreateAssignmentRequest,
        credential: &Credential,
    ) -> DomainResult<()> {
        self.post_assignment(request, credential)
            .await
            .map_err(to_domain)
    }

    async fn delete_assignment(
        &self,
        user_id: &str,
        provider: &str,
        credential: &Credential,
    ) -> DomainResult<()> {
        self.remove_assignment(user_id, provider, credential)
            .await
            .map_err(to_domain)
    }

    async fn list_device_assignments(
        &self,
        device_id: &str,
        credential: &Credential,
    ) -> DomainResult<Vec<RemoteAssignment>> {
        self.get_device_assignments(device_id, credential)
            .await
            .map_err(to_domain)
    }

    async fn list_users(&self, credential: &Credential) -> DomainResult<Vec<User>> {
        self.get_users(credential).await.map_err(to_domain)
    }
}

// =============================================================================
// Tests
// =============================================================================
