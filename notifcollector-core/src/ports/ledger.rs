//! Remote ledger API port
//!
//! The ledger owns users, assignments and the final transaction record. The
//! core only needs event submission plus the assignment/user directory calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::result::Result;
use crate::domain::{EventPayload, User};

/// Bearer credential for ledger calls
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// `Authorization` header value
    pub fn authorization(&self) -> String {
        if self.token.starts_with("Bearer ") {
            self.token.clone()
        } else {
            format!("Bearer {}", self.token)
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Body of `POST /assignments`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAssignmentRequest {
    pub user_id: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

/// Assignment as reported by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAssignment {
    pub user_id: String,
    pub provider: String,
    #[serde(default)]
    pub device_id: Option<String>,
}

/// Ledger API trait
///
/// Implementations must send `idempotency_key` so that resubmitting the same
/// event is a no-op on the server.
#[async_trait]
pub trait LedgerApi: Send + Sync {
    /// Submit one event. Any non-success outcome is an error; `Unauthenticated`
    /// for rejected credentials, `Transport` for everything else.
    async fn submit_event(
        &self,
        payload: &EventPayload,
        idempotency_key: &str,
        credential: &Credential,
    ) -> Result<()>;

    async fn create_assignment(
        &self,
        request: &CreateAssignmentRequest,
        credential: &Credential,
    ) -> Result<()>;

    async fn delete_assignment(
        &self,
        user_id: &str,
        provider: &str,
        credential: &Credential,
    ) -> Result<()>;

    async fn list_device_assignments(
        &self,
        device_id: &str,
        credential: &Credential,
    ) -> Result<Vec<RemoteAssignment>>;

    async fn list_users(&self, credential: &Credential) -> Result<Vec<User>>;
}

/// Session collaborator supplying the current bearer credential
pub trait CredentialProvider: Send + Sync {
    /// `None` means the operator is not logged in
    fn credential(&self) -> Option<Credential>;
}
