//! Delivery service - drain pending events to the ledger
//!
//! One pass walks every pending event: resolve the assigned user for
//! `(provider, device)`, submit with the dedup key as idempotency key, mark
//! uploaded on success. Events without an assignment stay pending. Transport
//! failures leave the event pending and the pass continues; a systemic
//! failure (rejected or missing credential) stops the pass.
//!
//! Nothing here deletes an event because delivery failed.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use fs2::FileExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::result::{Error, Result};
use crate::domain::NormalizedEvent;
use crate::ports::{AssignmentStore, Credential, CredentialProvider, EventStore, LedgerApi};
use crate::services::logging::{LogEvent, LoggingService};

pub const FLUSH_LOCK_FILE: &str = "flush.lock";

/// Summary of one delivery pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlushReport {
    /// Pending events seen at the start of the pass
    pub pending: usize,
    pub uploaded: usize,
    /// Skipped for lack of an assignment
    pub unassigned: usize,
    /// Skipped because the provider is unknown
    pub undeliverable: usize,
    /// Submissions that failed and stay pending
    pub failed: usize,
    /// Set when a systemic failure stopped the pass early
    pub aborted: Option<String>,
    /// Another pass held the flush lock; nothing was attempted
    pub skipped_busy: bool,
    pub errors: Vec<String>,
}

/// Held for the duration of a pass
pub(crate) struct FlushGuard {
    file: Option<File>,
    _local: tokio::sync::OwnedMutexGuard<()>,
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        if let Some(file) = &self.file {
            let _ = file.unlock();
        }
    }
}

/// Drains the event queue into the ledger
pub struct DeliveryService {
    events: Arc<dyn EventStore>,
    assignments: Arc<dyn AssignmentStore>,
    ledger: Arc<dyn LedgerApi>,
    credentials: Arc<dyn CredentialProvider>,
    device_id: String,
    lock_path: Option<PathBuf>,
    local_lock: Arc<tokio::sync::Mutex<()>>,
    journal: Option<Arc<LoggingService>>,
}

impl DeliveryService {
    pub fn new(
        events: Arc<dyn EventStore>,
        assignments: Arc<dyn AssignmentStore>,
        ledger: Arc<dyn LedgerApi>,
        credentials: Arc<dyn CredentialProvider>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            events,
            assignments,
            ledger,
            credentials,
            device_id: device_id.into(),
            lock_path: None,
            local_lock: Arc::new(tokio::sync::Mutex::new(())),
            journal: None,
        }
    }

    /// Serialize passes across processes through an advisory file lock
    pub fn with_lock_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_path = Some(path.into());
        self
    }

    pub fn with_journal(mut self, journal: Arc<LoggingService>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub(crate) fn try_acquire(&self) -> Result<Option<FlushGuard>> {
        let Ok(local) = self.local_lock.clone().try_lock_owned() else {
            return Ok(None);
        };

        let file = match &self.lock_path {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .truncate(true)
                    .write(true)
                    .open(path)?;
                if file.try_lock_exclusive().is_err() {
                    return Ok(None);
                }
                Some(file)
            }
            None => None,
        };

        Ok(Some(FlushGuard {
            file,
            _local: local,
        }))
    }

    /// Run one delivery pass over every pending event.
    ///
    /// Returns `Err(Unauthenticated)` without touching the queue when no
    /// credential is available. A credential rejected mid-pass stops the
    /// pass and is reported in `aborted`.
    pub async fn flush(&self) -> Result<FlushReport> {
        let Some(_guard) = self.try_acquire()? else {
            debug!("flush already in progress");
            return Ok(FlushReport {
                skipped_busy: true,
                ..Default::default()
            });
        };

        let Some(credential) = self.credentials.credential() else {
            self.journal_error("flush_aborted", "no credential available");
            return Err(Error::Unauthenticated("no credential available".into()));
        };

        let pending = self.events.list_pending()?;
        let report = self.submit_all(pending, &credential).await?;
        info!(
            pending = report.pending,
            uploaded = report.uploaded,
            unassigned = report.unassigned,
            failed = report.failed,
            "delivery pass finished"
        );
        Ok(report)
    }

    /// Submit the given stored events without taking the flush lock.
    ///
    /// Used right after ingest so a fresh event does not wait for a pass
    /// that listed the queue before it was stored. A pass running at the
    /// same time may submit the same event; the dedup key makes the ledger
    /// accept it once.
    pub async fn deliver_events(&self, events: &[NormalizedEvent]) -> Result<FlushReport> {
        let Some(credential) = self.credentials.credential() else {
            return Err(Error::Unauthenticated("no credential available".into()));
        };
        let pending = events.iter().filter(|e| !e.uploaded).cloned().collect();
        self.submit_all(pending, &credential).await
    }

    async fn submit_all(
        &self,
        pending: Vec<NormalizedEvent>,
        credential: &Credential,
    ) -> Result<FlushReport> {
        let mut report = FlushReport {
            pending: pending.len(),
            ..Default::default()
        };

        for event in pending {
            if !event.is_deliverable() {
                report.undeliverable += 1;
                continue;
            }

            match self.submit_one(&event, credential).await {
                Ok(()) => {
                    self.events.mark_uploaded(&event.dedup_key)?;
                    report.uploaded += 1;
                    self.journal_delivery(&event, None);
                }
                Err(Error::NoAssignment { .. }) => {
                    debug!(provider = %event.provider, dedup_key = %event.dedup_key, "no assignment, leaving pending");
                    report.unassigned += 1;
                }
                Err(e) if e.is_systemic() => {
                    warn!(error = %e, "delivery pass aborted");
                    self.journal_delivery(&event, Some(&e));
                    report.failed += 1;
                    report.aborted = Some(e.to_string());
                    break;
                }
                // Storage failures are not per-event
                Err(e @ Error::Database(_)) => return Err(e),
                Err(e) => {
                    warn!(dedup_key = %event.dedup_key, error = %e, "delivery failed, will retry");
                    self.journal_delivery(&event, Some(&e));
                    report.failed += 1;
                    report.errors.push(format!("{}: {}", event.dedup_key, e));
                }
            }
        }

        Ok(report)
    }

    /// Resolve the assigned user and submit. `NoAssignment` when the
    /// provider has no user on this device.
    async fn submit_one(&self, event: &NormalizedEvent, credential: &Credential) -> Result<()> {
        let assignment = self
            .assignments
            .get_assignment(event.provider, &self.device_id)?
            .ok_or_else(|| Error::NoAssignment {
                provider: event.provider.to_string(),
                device_id: self.device_id.clone(),
            })?;

        self.ledger
            .submit_event(
                &event.to_payload(&assignment.user_id),
                &event.dedup_key,
                credential,
            )
            .await
    }

    /// Submit one event for a known user, bypassing the directory.
    ///
    /// The event is stored as uploaded on success and as pending on failure,
    /// replacing any stored copy; the submission error is returned.
    pub async fn deliver_now(&self, event: &NormalizedEvent, user_id: &str) -> Result<()> {
        let Some(credential) = self.credentials.credential() else {
            let mut pending = event.clone();
            pending.uploaded = false;
            self.events.insert_or_replace(&pending)?;
            return Err(Error::Unauthenticated("no credential available".into()));
        };

        let result = self
            .ledger
            .submit_event(&event.to_payload(user_id), &event.dedup_key, &credential)
            .await;

        let mut stored = event.clone();
        stored.uploaded = result.is_ok();
        self.events.insert_or_replace(&stored)?;
        self.journal_delivery(event, result.as_ref().err());
        result
    }

    /// Delete uploaded events older than `retention_days`. Pending events are
    /// kept regardless of age.
    pub fn prune_uploaded(&self, retention_days: u32) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        let deleted = self.events.delete_uploaded_older_than(cutoff)?;
        if deleted > 0 {
            info!(deleted, retention_days, "pruned uploaded events");
        }
        Ok(deleted)
    }

    fn journal_delivery(&self, event: &NormalizedEvent, error: Option<&Error>) {
        let Some(journal) = &self.journal else {
            return;
        };
        let entry = LogEvent::new(if error.is_some() {
            "delivery_failed"
        } else {
            "event_uploaded"
        })
        .with_provider(event.provider.as_str())
        .with_dedup_key(&event.dedup_key);
        let entry = match error {
            Some(e) => entry.with_error(e.to_string()),
            None => entry,
        };
        let _ = journal.log(entry);
    }

    fn journal_error(&self, event: &str, message: &str) {
        if let Some(journal) = &self.journal {
            let _ = journal.log_error(event, message, None);
        }
    }
}
