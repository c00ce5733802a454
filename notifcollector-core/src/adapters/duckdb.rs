//! DuckDB repository implementation
//!
//! Backs both the event queue (`sys_events`) and the assignment directory
//! (`sys_assignments`). Inherent methods speak `anyhow`; the port impls at
//! the bottom map failures into `Error::Database`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use duckdb::types::Type;
use duckdb::{params, Connection};
use rust_decimal::Decimal;
use tracing::warn;

use crate::domain::result::{Error, Result as DomainResult};
use crate::domain::{canonical_amount, Assignment, NormalizedEvent, Provider};
use crate::ports::{AssignmentStore, EventStore};
use crate::services::{MigrationResult, MigrationService};

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400, 800ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

const EVENT_COLUMNS: &str = "dedup_key, provider, event_type, amount, currency, occurred_at, \
     counterparty_name, counterparty_account, reference, \
     raw_package, raw_title, raw_text, raw_big_text, uploaded, created_at";

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("could not set lock on file")
        || lower.contains("file is already open")
}

/// DuckDB repository implementation
pub struct DuckDbRepository {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl DuckDbRepository {
    /// Open (or create) the collector database
    ///
    /// Retries with exponential backoff on file locking errors, which occur
    /// when the listener and a CLI command open the file at the same time.
    pub fn new(db_path: &Path) -> Result<Self> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: db_path.to_path_buf(),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        warn!(
                            delay_ms = delay.as_millis() as u64,
                            attempt = attempt + 1,
                            max = MAX_RETRIES,
                            "database busy, retrying: {}",
                            err_msg
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow!("Failed to open database after {} retries", MAX_RETRIES)))
    }

    fn try_open_connection(db_path: &Path) -> Result<Connection> {
        // Extension autoloading off: everything needed is statically linked
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Ok(Connection::open_with_flags(db_path, config)?)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| anyhow!("Lock poisoned: {}", e))
    }

    /// Run database migrations using the MigrationService
    pub fn run_migrations(&self) -> Result<MigrationResult> {
        let conn = self.conn()?;
        MigrationService::new(&conn).run_pending()
    }

    /// Ensure database schema exists (runs pending migrations)
    pub fn ensure_schema(&self) -> Result<()> {
        self.run_migrations()?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // === Event operations ===

    /// Insert unless the dedup key exists. Returns true if inserted.
    pub fn insert_event_if_absent(&self, event: &NormalizedEvent) -> Result<bool> {
        let values = event_params(event);
        let param_refs: Vec<&dyn duckdb::ToSql> = values.iter().map(|b| b.as_ref()).collect();

        let conn = self.conn()?;
        let rows = conn.execute(
            &format!(
                "INSERT INTO sys_events ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (dedup_key) DO NOTHING",
                EVENT_COLUMNS
            ),
            param_refs.as_slice(),
        )?;
        Ok(rows > 0)
    }

    /// Insert, overwriting every column of an existing record
    pub fn upsert_event(&self, event: &NormalizedEvent) -> Result<()> {
        let values = event_params(event);
        let param_refs: Vec<&dyn duckdb::ToSql> = values.iter().map(|b| b.as_ref()).collect();

        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO sys_events ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (dedup_key) DO UPDATE SET
                    provider = EXCLUDED.provider,
                    event_type = EXCLUDED.event_type,
                    amount = EXCLUDED.amount,
                    currency = EXCLUDED.currency,
                    occurred_at = EXCLUDED.occurred_at,
                    counterparty_name = EXCLUDED.counterparty_name,
                    counterparty_account = EXCLUDED.counterparty_account,
                    reference = EXCLUDED.reference,
                    raw_package = EXCLUDED.raw_package,
                    raw_title = EXCLUDED.raw_title,
                    raw_text = EXCLUDED.raw_text,
                    raw_big_text = EXCLUDED.raw_big_text,
                    uploaded = EXCLUDED.uploaded,
                    created_at = EXCLUDED.created_at",
                EVENT_COLUMNS
            ),
            param_refs.as_slice(),
        )?;
        Ok(())
    }

    pub fn set_event_uploaded(&self, dedup_key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE sys_events SET uploaded = TRUE WHERE dedup_key = ?",
            params![dedup_key],
        )?;
        Ok(rows > 0)
    }

    pub fn get_pending_events(&self) -> Result<Vec<NormalizedEvent>> {
        self.query_events("WHERE uploaded = FALSE", params![])
    }

    pub fn get_recent_events(&self, limit: usize) -> Result<Vec<NormalizedEvent>> {
        self.query_events(
            "ORDER BY occurred_at DESC, created_at DESC LIMIT ?",
            params![limit as i64],
        )
    }

    pub fn get_event(&self, dedup_key: &str) -> Result<Option<NormalizedEvent>> {
        Ok(self
            .query_events("WHERE dedup_key = ?", params![dedup_key])?
            .into_iter()
            .next())
    }

    /// Delete uploaded events created before `before`; pending ones stay
    pub fn delete_uploaded_events_before(&self, before: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM sys_events WHERE uploaded = TRUE AND created_at < ?",
            params![before.timestamp_millis()],
        )?;
        Ok(rows)
    }

    /// (pending, uploaded) record counts
    pub fn get_event_counts(&self) -> Result<(i64, i64)> {
        let conn = self.conn()?;
        let counts = conn.query_row(
            "SELECT
                COUNT(*) FILTER (WHERE NOT uploaded),
                COUNT(*) FILTER (WHERE uploaded)
             FROM sys_events",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(counts)
    }

    fn query_events(
        &self,
        clause: &str,
        params: &[&dyn duckdb::ToSql],
    ) -> Result<Vec<NormalizedEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM sys_events {}", EVENT_COLUMNS, clause))?;
        let events = stmt
            .query_map(params, row_to_event)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(events)
    }

    // === Assignment operations ===

    pub fn upsert_assignment(&self, assignment: &Assignment) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sys_assignments (provider, device_id, user_id, assigned_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (provider, device_id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                assigned_at = EXCLUDED.assigned_at",
            params![
                assignment.provider.as_str(),
                assignment.device_id,
                assignment.user_id,
                assignment.assigned_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn delete_assignment(&self, provider: Provider, device_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM sys_assignments WHERE provider = ? AND device_id = ?",
            params![provider.as_str(), device_id],
        )?;
        Ok(rows > 0)
    }

    pub fn get_assignment(&self, provider: Provider, device_id: &str) -> Result<Option<Assignment>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT provider, device_id, user_id, assigned_at
             FROM sys_assignments WHERE provider = ? AND device_id = ?",
        )?;
        let mut rows = stmt.query_map(params![provider.as_str(), device_id], row_to_assignment)?;
        Ok(rows.next().transpose()?)
    }

    pub fn get_assignments_for_device(&self, device_id: &str) -> Result<Vec<Assignment>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT provider, device_id, user_id, assigned_at
             FROM sys_assignments WHERE device_id = ? ORDER BY provider",
        )?;
        let assignments = stmt
            .query_map(params![device_id], row_to_assignment)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(assignments)
    }

    /// Replace a device's mappings in one transaction
    pub fn replace_assignments_for_device(
        &self,
        device_id: &str,
        assignments: &[Assignment],
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM sys_assignments WHERE device_id = ?",
            params![device_id],
        )?;
        for assignment in assignments {
            if assignment.device_id != device_id {
                return Err(anyhow!(
                    "Assignment for device {} cannot be synced into device {}",
                    assignment.device_id,
                    device_id
                ));
            }
            tx.execute(
                "INSERT INTO sys_assignments (provider, device_id, user_id, assigned_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT (provider, device_id) DO UPDATE SET
                    user_id = EXCLUDED.user_id,
                    assigned_at = EXCLUDED.assigned_at",
                params![
                    assignment.provider.as_str(),
                    assignment.device_id,
                    assignment.user_id,
                    assignment.assigned_at.timestamp_millis(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}

// Helper functions

fn event_params(event: &NormalizedEvent) -> Vec<Box<dyn duckdb::ToSql>> {
    vec![
        Box::new(event.dedup_key.clone()),
        Box::new(event.provider.as_str().to_string()),
        Box::new(event.event_type.as_str().to_string()),
        Box::new(canonical_amount(&event.amount)),
        Box::new(event.currency.clone()),
        Box::new(event.occurred_at),
        Box::new(event.counterparty_name.clone()),
        Box::new(event.counterparty_account.clone()),
        Box::new(event.reference.clone()),
        Box::new(event.raw_package.clone()),
        Box::new(event.raw_title.clone()),
        Box::new(event.raw_text.clone()),
        Box::new(event.raw_big_text.clone()),
        Box::new(event.uploaded),
        Box::new(event.created_at.timestamp_millis()),
    ]
}

fn conversion_error<E>(idx: usize, err: E) -> duckdb::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    duckdb::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_column<T>(row: &duckdb::Row, idx: usize) -> duckdb::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse::<T>().map_err(|e| conversion_error(idx, e))
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

fn row_to_event(row: &duckdb::Row) -> duckdb::Result<NormalizedEvent> {
    let amount: Decimal = parse_column(row, 3)?;
    Ok(NormalizedEvent {
        dedup_key: row.get(0)?,
        provider: parse_column(row, 1)?,
        event_type: parse_column(row, 2)?,
        amount,
        currency: row.get(4)?,
        occurred_at: row.get(5)?,
        counterparty_name: row.get(6)?,
        counterparty_account: row.get(7)?,
        reference: row.get(8)?,
        raw_package: row.get(9)?,
        raw_title: row.get(10)?,
        raw_text: row.get(11)?,
        raw_big_text: row.get(12)?,
        uploaded: row.get(13)?,
        created_at: millis_to_datetime(row.get(14)?),
    })
}

fn row_to_assignment(row: &duckdb::Row) -> duckdb::Result<Assignment> {
    Ok(Assignment {
        provider: parse_column(row, 0)?,
        device_id: row.get(1)?,
        user_id: row.get(2)?,
        assigned_at: millis_to_datetime(row.get(3)?),
    })
}

fn db_err(e: anyhow::Error) -> Error {
    Error::database(format!("{:#}", e))
}

// === Port implementations ===

impl EventStore for DuckDbRepository {
    fn insert_if_absent(&self, event: &NormalizedEvent) -> DomainResult<bool> {
        self.insert_event_if_absent(event).map_err(db_err)
    }

    fn insert_or_replace(&self, event: &NormalizedEvent) -> DomainResult<()> {
        self.upsert_event(event).map_err(db_err)
    }

    fn mark_uploaded(&self, dedup_key: &str) -> DomainResult<bool> {
        self.set_event_uploaded(dedup_key).map_err(db_err)
    }

    fn list_pending(&self) -> DomainResult<Vec<NormalizedEvent>> {
        self.get_pending_events().map_err(db_err)
    }

    fn list_recent(&self, limit: usize) -> DomainResult<Vec<NormalizedEvent>> {
        self.get_recent_events(limit).map_err(db_err)
    }

    fn get(&self, dedup_key: &str) -> DomainResult<Option<NormalizedEvent>> {
        self.get_event(dedup_key).map_err(db_err)
    }

    fn delete_uploaded_older_than(&self, before: DateTime<Utc>) -> DomainResult<usize> {
        self.delete_uploaded_events_before(before).map_err(db_err)
    }
}

impl AssignmentStore for DuckDbRepository {
    fn upsert_assignment(&self, assignment: &Assignment) -> DomainResult<()> {
        DuckDbRepository::upsert_assignment(self, assignment).map_err(db_err)
    }

    fn delete_assignment(&self, provider: Provider, device_id: &str) -> DomainResult<bool> {
        DuckDbRepository::delete_assignment(self, provider, device_id).map_err(db_err)
    }

    fn get_assignment(&self, provider: Provider, device_id: &str) -> DomainResult<Option<Assignment>> {
        DuckDbRepository::get_assignment(self, provider, device_id).map_err(db_err)
    }

    fn list_assignments_for_device(&self, device_id: &str) -> DomainResult<Vec<Assignment>> {
        self.get_assignments_for_device(device_id).map_err(db_err)
    }

    fn replace_device_assignments(
        &self,
        device_id: &str,
        assignments: &[Assignment],
    ) -> DomainResult<()> {
        self.replace_assignments_for_device(device_id, assignments)
            .map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventType;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> DuckDbRepository {
        let repo = DuckDbRepository::new(&dir.path().join("collector.duckdb")).unwrap();
        repo.ensure_schema().unwrap();
        repo
    }

    fn event(key: &str) -> NormalizedEvent {
        NormalizedEvent {
            provider: Provider::Lemon,
            event_type: EventType::TransferIn,
            amount: Decimal::new(123456, 2),
            currency: "ARS".into(),
            occurred_at: 1_700_000_000_000,
            counterparty_name: Some("Juan Perez".into()),
            counterparty_account: None,
            reference: Some("TRX-1".into()),
            raw_package: "com.applemoncash".into(),
            raw_title: "Recibiste".into(),
            raw_text: "Recibiste $ 1.234,56".into(),
            raw_big_text: String::new(),
            dedup_key: key.into(),
            uploaded: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_retryable_errors() {
        assert!(is_retryable_error("IO Error: Could not set lock on file"));
        assert!(is_retryable_error("database is locked"));
        assert!(!is_retryable_error("Catalog Error: Table does not exist"));
    }

    #[test]
    fn test_event_round_trip() {
        let dir = TempDir::new().unwrap();
        let repo = open(&dir);

        assert!(repo.insert_event_if_absent(&event("k1")).unwrap());
        let stored = repo.get_event("k1").unwrap().unwrap();

        assert_eq!(stored.provider, Provider::Lemon);
        assert_eq!(stored.event_type, EventType::TransferIn);
        assert_eq!(stored.amount, Decimal::new(123456, 2));
        assert_eq!(stored.counterparty_name.as_deref(), Some("Juan Perez"));
        assert_eq!(stored.counterparty_account, None);
        assert_eq!(stored.raw_big_text, "");
        assert!(!stored.uploaded);
    }

    #[test]
    fn test_duplicate_insert_is_ignored() {
        let dir = TempDir::new().unwrap();
        let repo = open(&dir);

        assert!(repo.insert_event_if_absent(&event("k1")).unwrap());
        let mut again = event("k1");
        again.currency = "USD".into();
        assert!(!repo.insert_event_if_absent(&again).unwrap());

        assert_eq!(repo.get_event_counts().unwrap(), (1, 0));
        assert_eq!(repo.get_event("k1").unwrap().unwrap().currency, "ARS");
    }

    #[test]
    fn test_upsert_overwrites() {
        let dir = TempDir::new().unwrap();
        let repo = open(&dir);

        repo.insert_event_if_absent(&event("k1")).unwrap();
        let mut replaced = event("k1");
        replaced.uploaded = true;
        repo.upsert_event(&replaced).unwrap();

        assert!(repo.get_event("k1").unwrap().unwrap().uploaded);
        assert_eq!(repo.get_event_counts().unwrap(), (0, 1));
    }

    #[test]
    fn test_pending_and_mark_uploaded() {
        let dir = TempDir::new().unwrap();
        let repo = open(&dir);

        repo.insert_event_if_absent(&event("a")).unwrap();
        repo.insert_event_if_absent(&event("b")).unwrap();
        assert!(repo.set_event_uploaded("a").unwrap());
        assert!(!repo.set_event_uploaded("missing").unwrap());

        let pending = repo.get_pending_events().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].dedup_key, "b");
    }

    #[test]
    fn test_recent_is_newest_first() {
        let dir = TempDir::new().unwrap();
        let repo = open(&dir);

        for (key, at) in [("old", 1), ("new", 3), ("mid", 2)] {
            let mut e = event(key);
            e.occurred_at = at;
            repo.insert_event_if_absent(&e).unwrap();
        }

        let keys: Vec<_> = repo
            .get_recent_events(2)
            .unwrap()
            .into_iter()
            .map(|e| e.dedup_key)
            .collect();
        assert_eq!(keys, vec!["new", "mid"]);
    }

    #[test]
    fn test_delete_only_old_uploaded() {
        let dir = TempDir::new().unwrap();
        let repo = open(&dir);

        let old = Utc::now() - chrono::Duration::days(40);
        for (key, uploaded) in [("old-uploaded", true), ("old-pending", false)] {
            let mut e = event(key);
            e.created_at = old;
            e.uploaded = uploaded;
            repo.insert_event_if_absent(&e).unwrap();
        }
        let mut fresh = event("fresh-uploaded");
        fresh.uploaded = true;
        repo.insert_event_if_absent(&fresh).unwrap();

        let deleted = repo
            .delete_uploaded_events_before(Utc::now() - chrono::Duration::days(30))
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(repo.get_event("old-uploaded").unwrap().is_none());
        assert!(repo.get_event("old-pending").unwrap().is_some());
        assert!(repo.get_event("fresh-uploaded").unwrap().is_some());
    }

    #[test]
    fn test_assignment_upsert_and_scope() {
        let dir = TempDir::new().unwrap();
        let repo = open(&dir);

        repo.upsert_assignment(&Assignment::new(Provider::Lemon, "dev-1", "u1"))
            .unwrap();
        repo.upsert_assignment(&Assignment::new(Provider::Lemon, "dev-1", "u2"))
            .unwrap();
        repo.upsert_assignment(&Assignment::new(Provider::Lemon, "dev-2", "u3"))
            .unwrap();

        let a = repo.get_assignment(Provider::Lemon, "dev-1").unwrap().unwrap();
        assert_eq!(a.user_id, "u2");
        assert_eq!(repo.get_assignments_for_device("dev-1").unwrap().len(), 1);
        assert!(repo.get_assignment(Provider::Uala, "dev-1").unwrap().is_none());

        assert!(repo.delete_assignment(Provider::Lemon, "dev-1").unwrap());
        assert!(!repo.delete_assignment(Provider::Lemon, "dev-1").unwrap());
        assert!(repo.get_assignment(Provider::Lemon, "dev-2").unwrap().is_some());
    }

    #[test]
    fn test_replace_device_assignments() {
        let dir = TempDir::new().unwrap();
        let repo = open(&dir);

        repo.upsert_assignment(&Assignment::new(Provider::Lemon, "dev-1", "u1"))
            .unwrap();
        repo.upsert_assignment(&Assignment::new(Provider::Uala, "dev-2", "u9"))
            .unwrap();

        repo.replace_assignments_for_device(
            "dev-1",
            &[
                Assignment::new(Provider::Brubank, "dev-1", "u5"),
                Assignment::new(Provider::Mercadopago, "dev-1", "u6"),
            ],
        )
        .unwrap();

        let providers: Vec<_> = repo
            .get_assignments_for_device("dev-1")
            .unwrap()
            .into_iter()
            .map(|a| a.provider)
            .collect();
        assert_eq!(providers, vec![Provider::Brubank, Provider::Mercadopago]);
        // Other devices untouched
        assert_eq!(repo.get_assignments_for_device("dev-2").unwrap().len(), 1);
    }

    #[test]
    fn test_replace_rolls_back_on_foreign_device() {
        let dir = TempDir::new().unwrap();
        let repo = open(&dir);

        repo.upsert_assignment(&Assignment::new(Provider::Lemon, "dev-1", "u1"))
            .unwrap();
        let result = repo.replace_assignments_for_device(
            "dev-1",
            &[Assignment::new(Provider::Uala, "dev-other", "u2")],
        );

        assert!(result.is_err());
        assert_eq!(repo.get_assignments_for_device("dev-1").unwrap().len(), 1);
    }

    #[test]
    fn test_port_maps_errors() {
        let dir = TempDir::new().unwrap();
        // No schema: every query fails
        let repo = DuckDbRepository::new(&dir.path().join("empty.duckdb")).unwrap();
        let err = EventStore::list_pending(&repo).unwrap_err();
        assert!(matches!(err, Error::Database(_)));
    }
}
