//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on a specific use case or feature area.

mod assignment;
pub mod delivery;
mod ingest;
pub mod listener;
pub mod logging;
pub mod migration;
pub mod parser;
mod status;

pub use assignment::AssignmentService;
pub use delivery::{DeliveryService, FlushReport, FLUSH_LOCK_FILE};
pub use ingest::{IngestOutcome, IngestService};
pub use listener::{ListenerState, NotificationListener};
pub use logging::{EntryPoint, LogEntry, LogEvent, LoggingService};
pub use migration::{MigrationResult, MigrationService};
pub use parser::ParsingEngine;
pub use status::{AssignmentSummary, StatusService, StatusSummary};
