//! Status service - queue and routing summary

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::adapters::duckdb::DuckDbRepository;
use crate::domain::Provider;
use crate::services::listener::ListenerState;
use crate::services::logging::{LogEntry, LoggingService};

/// Status service for the event queue and assignment directory
pub struct StatusService {
    repository: Arc<DuckDbRepository>,
    journal: Option<Arc<LoggingService>>,
}

impl StatusService {
    pub fn new(repository: Arc<DuckDbRepository>) -> Self {
        Self {
            repository,
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: Arc<LoggingService>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Get overall status summary for `device_id`
    pub fn get_status(&self, device_id: &str, listener: ListenerState) -> Result<StatusSummary> {
        let (pending, uploaded) = self.repository.get_event_counts()?;
        let assignments = self.repository.get_assignments_for_device(device_id)?;

        let unassigned_providers = Provider::KNOWN
            .iter()
            .filter(|p| !assignments.iter().any(|a| a.provider == **p))
            .map(|p| p.to_string())
            .collect();

        let recent_errors = match &self.journal {
            Some(journal) => journal.get_errors(5)?,
            None => Vec::new(),
        };

        Ok(StatusSummary {
            device_id: device_id.to_string(),
            listener,
            pending_events: pending,
            uploaded_events: uploaded,
            assignments: assignments
                .into_iter()
                .map(|a| AssignmentSummary {
                    provider: a.provider.to_string(),
                    user_id: a.user_id,
                })
                .collect(),
            unassigned_providers,
            recent_errors,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct StatusSummary {
    pub device_id: String,
    pub listener: ListenerState,
    pub pending_events: i64,
    pub uploaded_events: i64,
    pub assignments: Vec<AssignmentSummary>,
    pub unassigned_providers: Vec<String>,
    pub recent_errors: Vec<LogEntry>,
}

#[derive(Debug, Serialize)]
pub struct AssignmentSummary {
    pub provider: String,
    pub user_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Assignment, RawNotification};
    use crate::services::logging::EntryPoint;
    use crate::services::ParsingEngine;
    use tempfile::TempDir;

    #[test]
    fn test_status_counts() {
        let dir = TempDir::new().unwrap();
        let repo = Arc::new(DuckDbRepository::new(&dir.path().join("collector.duckdb")).unwrap());
        repo.ensure_schema().unwrap();
        let journal = Arc::new(LoggingService::new(dir.path(), EntryPoint::Cli, "test").unwrap());

        let engine = ParsingEngine::new();
        for (i, text) in ["Recibiste 1 ARS de Ana", "Recibiste 2 ARS de Beto"].iter().enumerate() {
            let event = engine
                .parse(&RawNotification::new("com.lemon.wallet", i as i64).with_text(*text))
                .unwrap();
            repo.insert_event_if_absent(&event).unwrap();
            if i == 0 {
                repo.set_event_uploaded(&event.dedup_key).unwrap();
            }
        }
        repo.upsert_assignment(&Assignment::new(Provider::Lemon, "dev-1", "user-1"))
            .unwrap();
        journal.log_error("delivery_failed", "HTTP 500", None).unwrap();

        let status = StatusService::new(repo)
            .with_journal(journal)
            .get_status("dev-1", ListenerState::Disconnected)
            .unwrap();
        assert_eq!(status.pending_events, 1);
        assert_eq!(status.uploaded_events, 1);
        assert_eq!(status.assignments.len(), 1);
        assert!(!status.unassigned_providers.contains(&"lemon".to_string()));
        assert!(status.unassigned_providers.contains(&"uala".to_string()));
        assert_eq!(status.recent_errors.len(), 1);
    }
}
