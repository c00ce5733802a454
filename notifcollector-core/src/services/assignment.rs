//! Assignment service - provider to user routing per device
//!
//! The local directory is what delivery reads. Remote changes go to the
//! ledger first and are mirrored locally only once the ledger accepted them;
//! `sync_from_remote` overwrites the local view of one device.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::result::{Error, Result};
use crate::domain::{Assignment, Provider, User};
use crate::ports::{
    AssignmentStore, CreateAssignmentRequest, Credential, CredentialProvider, LedgerApi,
    RemoteAssignment,
};

pub struct AssignmentService {
    store: Arc<dyn AssignmentStore>,
    ledger: Arc<dyn LedgerApi>,
    credentials: Arc<dyn CredentialProvider>,
}

impl AssignmentService {
    pub fn new(
        store: Arc<dyn AssignmentStore>,
        ledger: Arc<dyn LedgerApi>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            store,
            ledger,
            credentials,
        }
    }

    fn credential(&self) -> Result<Credential> {
        self.credentials
            .credential()
            .ok_or_else(|| Error::Unauthenticated("no credential available".into()))
    }

    /// Route `provider` on `device_id` to `user_id`, replacing any previous
    /// mapping.
    ///
    /// The user must exist in the ledger directory. If the directory can't be
    /// reached the check is skipped and the remote create decides.
    pub async fn assign(
        &self,
        provider: Provider,
        user_id: &str,
        device_id: &str,
    ) -> Result<Assignment> {
        if !provider.is_known() {
            return Err(Error::validation("Cannot assign the unknown provider"));
        }
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(Error::validation("User id cannot be empty"));
        }
        let credential = self.credential()?;

        match self.ledger.list_users(&credential).await {
            Ok(users) => {
                if !users.iter().any(|u| u.id == user_id) {
                    return Err(Error::not_found(format!("User {}", user_id)));
                }
            }
            Err(e) if e.is_systemic() => return Err(e),
            Err(e) => warn!(error = %e, "user directory unavailable, skipping user check"),
        }

        self.ledger
            .create_assignment(
                &CreateAssignmentRequest {
                    user_id: user_id.to_string(),
                    provider: provider.to_string(),
                    device_id: Some(device_id.to_string()),
                },
                &credential,
            )
            .await?;

        let assignment = Assignment::new(provider, device_id, user_id);
        self.store.upsert_assignment(&assignment)?;
        info!(%provider, user_id, device_id, "provider assigned");
        Ok(assignment)
    }

    /// Remove the routing for `provider` on `device_id`.
    ///
    /// Returns `false` when there was nothing to remove.
    pub async fn unassign(&self, provider: Provider, device_id: &str) -> Result<bool> {
        let Some(existing) = self.store.get_assignment(provider, device_id)? else {
            return Ok(false);
        };
        let credential = self.credential()?;

        self.ledger
            .delete_assignment(&existing.user_id, provider.as_str(), &credential)
            .await?;
        let removed = self.store.delete_assignment(provider, device_id)?;
        info!(%provider, device_id, "provider unassigned");
        Ok(removed)
    }

    /// User that receives `provider` events on `device_id`, if any
    pub fn lookup(&self, provider: Provider, device_id: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .get_assignment(provider, device_id)?
            .map(|a| a.user_id))
    }

    pub fn list_for_device(&self, device_id: &str) -> Result<Vec<Assignment>> {
        self.store.list_assignments_for_device(device_id)
    }

    /// Pull the ledger's mappings for `device_id` and overwrite the local
    /// directory with them.
    ///
    /// Entries for unknown providers or other devices are ignored.
    pub async fn sync_from_remote(&self, device_id: &str) -> Result<Vec<Assignment>> {
        let credential = self.credential()?;
        let remote = self
            .ledger
            .list_device_assignments(device_id, &credential)
            .await?;

        let mut assignments: Vec<Assignment> = Vec::new();
        for entry in remote {
            if entry.device_id.as_deref().is_some_and(|d| d != device_id) {
                continue;
            }
            let provider = match entry.provider.parse::<Provider>() {
                Ok(p) if p.is_known() => p,
                _ => {
                    warn!(provider = %entry.provider, "ignoring assignment for unknown provider");
                    continue;
                }
            };
            // Last entry wins for a repeated provider
            assignments.retain(|a| a.provider != provider);
            assignments.push(Assignment::new(provider, device_id, entry.user_id));
        }

        self.store.replace_device_assignments(device_id, &assignments)?;
        info!(device_id, count = assignments.len(), "assignments synced from ledger");
        Ok(assignments)
    }

    pub async fn remote_assignments(&self, device_id: &str) -> Result<Vec<RemoteAssignment>> {
        let credential = self.credential()?;
        self.ledger
            .list_device_assignments(device_id, &credential)
            .await
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let credential = self.credential()?;
        self.ledger.list_users(&credential).await
    }

    /// Import the legacy settings cache (provider tag -> user id) for
    /// `device_id`. Existing directory entries win. Returns how many were
    /// imported.
    pub fn seed_from_config(
        &self,
        cache: &BTreeMap<String, String>,
        device_id: &str,
    ) -> Result<usize> {
        let mut imported = 0;
        for (tag, user_id) in cache {
            let provider = match tag.parse::<Provider>() {
                Ok(p) if p.is_known() => p,
                _ => continue,
            };
            if user_id.trim().is_empty() || self.store.get_assignment(provider, device_id)?.is_some() {
                continue;
            }
            self.store
                .upsert_assignment(&Assignment::new(provider, device_id, user_id.trim()))?;
            imported += 1;
        }
        Ok(imported)
    }
}
