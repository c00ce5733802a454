//! Notification collector core - wallet push notifications to ledger events
//!
//! This crate implements the core domain logic following hexagonal architecture:
//!
//! - **domain**: Core entities (NormalizedEvent, Assignment, pattern rules, etc.)
//! - **ports**: Trait definitions for external dependencies (EventStore, LedgerApi)
//! - **services**: Parsing, ingest, delivery and routing orchestration
//! - **adapters**: Concrete implementations (DuckDB, HTTP ledger client, etc.)

pub mod domain;
pub mod ports;
pub mod services;
pub mod adapters;
pub mod config;
pub mod migrations;
pub mod log_migrations;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use adapters::duckdb::DuckDbRepository;
use adapters::http_ledger::HttpLedgerClient;
use adapters::settings_credentials::SettingsCredentialProvider;
use config::Config;
use services::*;

// Re-export commonly used types at crate root
pub use domain::{Assignment, EventType, NormalizedEvent, Provider, RawNotification, User};
pub use domain::result::Error;

pub const DB_FILE: &str = "collector.duckdb";

/// Main context for collector operations
///
/// Built once by process bootstrap and passed around explicitly. Holds the
/// configuration, the store, the ledger client and all services.
pub struct CollectorContext {
    pub config: Config,
    pub data_dir: PathBuf,
    pub device_id: String,
    pub repository: Arc<DuckDbRepository>,
    pub ledger: Arc<HttpLedgerClient>,
    pub journal: Option<Arc<LoggingService>>,
    pub parser: Arc<ParsingEngine>,
    pub ingest_service: Arc<IngestService>,
    pub delivery_service: Arc<DeliveryService>,
    pub assignment_service: AssignmentService,
    pub status_service: StatusService,
}

impl CollectorContext {
    /// Create a new collector context rooted at `data_dir`
    ///
    /// `journal` is optional so read-only commands can run while another
    /// process holds logs.duckdb.
    pub fn new(data_dir: &Path, journal: Option<Arc<LoggingService>>) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let mut config = Config::load(data_dir)?;
        let device_id = config.ensure_device_id(data_dir)?;

        let repository = Arc::new(DuckDbRepository::new(&data_dir.join(DB_FILE))?);
        repository.ensure_schema()?;

        let ledger = Arc::new(HttpLedgerClient::with_timeout(
            &config.base_url,
            config.timeout_secs,
        )?);
        let credentials = Arc::new(SettingsCredentialProvider::new(data_dir));
        let parser = Arc::new(ParsingEngine::new());

        let mut ingest_service = IngestService::new(Arc::clone(&parser), repository.clone());
        let mut delivery_service = DeliveryService::new(
            repository.clone(),
            repository.clone(),
            ledger.clone(),
            credentials.clone(),
            device_id.clone(),
        )
        .with_lock_file(data_dir.join(FLUSH_LOCK_FILE));
        let mut status_service = StatusService::new(Arc::clone(&repository));
        if let Some(journal) = &journal {
            ingest_service = ingest_service.with_journal(journal.clone());
            delivery_service = delivery_service.with_journal(journal.clone());
            status_service = status_service.with_journal(journal.clone());
        }
        let assignment_service =
            AssignmentService::new(repository.clone(), ledger.clone(), credentials);

        let seeded = assignment_service.seed_from_config(&config.assignments, &device_id)?;
        if seeded > 0 {
            tracing::info!(seeded, "imported assignments from settings");
        }

        Ok(Self {
            config,
            data_dir: data_dir.to_path_buf(),
            device_id,
            repository,
            ledger,
            journal,
            parser,
            ingest_service: Arc::new(ingest_service),
            delivery_service: Arc::new(delivery_service),
            assignment_service,
            status_service,
        })
    }

    /// Listener wired to this context's ingest and delivery services
    pub fn listener(&self) -> NotificationListener {
        let listener = NotificationListener::new(
            Arc::clone(&self.ingest_service),
            Arc::clone(&self.delivery_service),
        );
        match &self.journal {
            Some(journal) => listener.with_journal(journal.clone()),
            None => listener,
        }
    }
}
