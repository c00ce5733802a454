//! Ingest service - parse one notification and persist it as pending
//!
//! Parse failures are terminal for the notification: nothing is persisted and
//! the raw fields are journaled. Persistence failures are returned to the
//! caller, who may reprocess the raw notification if it is redelivered.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::domain::result::Result;
use crate::domain::{NormalizedEvent, RawNotification};
use crate::ports::EventStore;
use crate::services::logging::{LogEvent, LoggingService};
use crate::services::parser::ParsingEngine;

/// What happened to one notification
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// New pending event
    Stored { event: NormalizedEvent },
    /// Same dedup key already stored; nothing written
    Duplicate { dedup_key: String },
    /// No rule matched or the amount was malformed
    Unrecognized { reason: String },
}

impl IngestOutcome {
    /// The stored event, if this notification produced a new one
    pub fn stored(&self) -> Option<&NormalizedEvent> {
        match self {
            IngestOutcome::Stored { event } => Some(event),
            _ => None,
        }
    }
}

/// Classification, parsing and persistence of raw notifications
pub struct IngestService {
    parser: Arc<ParsingEngine>,
    events: Arc<dyn EventStore>,
    journal: Option<Arc<LoggingService>>,
}

impl IngestService {
    pub fn new(parser: Arc<ParsingEngine>, events: Arc<dyn EventStore>) -> Self {
        Self {
            parser,
            events,
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: Arc<LoggingService>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Parse and persist one notification
    pub fn ingest(&self, raw: &RawNotification) -> Result<IngestOutcome> {
        let event = match self.parser.parse(raw) {
            Ok(event) => event,
            Err(e) if e.is_parse_failure() => {
                debug!(package = %raw.package_name, error = %e, "notification not recognized");
                if let Some(journal) = &self.journal {
                    let _ = journal.log_unrecognized(raw, &e.to_string());
                }
                return Ok(IngestOutcome::Unrecognized {
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        };

        if !self.events.insert_if_absent(&event)? {
            debug!(dedup_key = %event.dedup_key, "duplicate notification suppressed");
            self.journal_event("event_duplicate", &event);
            return Ok(IngestOutcome::Duplicate {
                dedup_key: event.dedup_key,
            });
        }

        info!(
            provider = %event.provider,
            amount = %event.amount,
            currency = %event.currency,
            dedup_key = %event.dedup_key,
            "stored pending event"
        );
        self.journal_event("event_stored", &event);
        Ok(IngestOutcome::Stored { event })
    }

    fn journal_event(&self, name: &str, event: &NormalizedEvent) {
        if let Some(journal) = &self.journal {
            let _ = journal.log(
                LogEvent::new(name)
                    .with_provider(event.provider.as_str())
                    .with_package(&event.raw_package)
                    .with_dedup_key(&event.dedup_key),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::duckdb::DuckDbRepository;
    use crate::services::logging::EntryPoint;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (IngestService, Arc<DuckDbRepository>, Arc<LoggingService>) {
        let repo = Arc::new(DuckDbRepository::new(&dir.path().join("collector.duckdb")).unwrap());
        repo.ensure_schema().unwrap();
        let journal = Arc::new(LoggingService::new(dir.path(), EntryPoint::Cli, "test").unwrap());
        let service = IngestService::new(Arc::new(ParsingEngine::new()), repo.clone())
            .with_journal(journal.clone());
        (service, repo, journal)
    }

    fn lemon(text: &str) -> RawNotification {
        RawNotification::new("com.lemon.wallet", 1_700_000_000_000).with_text(text)
    }

    #[test]
    fn test_stored_then_duplicate() {
        let dir = TempDir::new().unwrap();
        let (service, repo, _) = setup(&dir);
        let raw = lemon("Recibiste 1 ARS de Ramiro Brugnoli");

        let first = service.ingest(&raw).unwrap();
        let event = first.stored().unwrap().clone();
        assert!(!event.uploaded);

        match service.ingest(&raw).unwrap() {
            IngestOutcome::Duplicate { dedup_key } => assert_eq!(dedup_key, event.dedup_key),
            other => panic!("expected duplicate, got {:?}", other),
        }
        assert_eq!(repo.get_pending_events().unwrap().len(), 1);
    }

    #[test]
    fn test_unrecognized_is_journaled_not_stored() {
        let dir = TempDir::new().unwrap();
        let (service, repo, journal) = setup(&dir);

        let outcome = service.ingest(&lemon("Tu tarjeta fue activada")).unwrap();
        assert!(matches!(outcome, IngestOutcome::Unrecognized { .. }));
        assert!(repo.get_pending_events().unwrap().is_empty());

        let errors = journal.get_errors(10).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].event, "notification_unrecognized");
        assert!(errors[0]
            .error_details
            .as_deref()
            .unwrap()
            .contains("Tu tarjeta fue activada"));
    }

    #[test]
    fn test_malformed_amount_is_unrecognized() {
        let dir = TempDir::new().unwrap();
        let (service, repo, _) = setup(&dir);

        let outcome = service.ingest(&lemon("Recibiste 1.2.3,4,5 ARS de Ana")).unwrap();
        assert!(matches!(outcome, IngestOutcome::Unrecognized { .. }));
        assert!(repo.get_pending_events().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_provider_still_stored() {
        let dir = TempDir::new().unwrap();
        let (service, _, _) = setup(&dir);

        let raw = RawNotification::new("com.other.bank", 1_700_000_000_000)
            .with_text("$ 1.234,56 recibido de Juan Perez");
        let event = service.ingest(&raw).unwrap().stored().cloned().unwrap();
        assert!(!event.is_deliverable());
    }
}
