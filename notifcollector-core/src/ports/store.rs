//! Local durable storage ports
//!
//! Both stores must be safe to share across threads and must enforce their
//! uniqueness invariants atomically (no read-then-write races).

use chrono::{DateTime, Utc};

use crate::domain::result::Result;
use crate::domain::{Assignment, NormalizedEvent, Provider};

/// Durable queue of normalized events keyed by dedup key
pub trait EventStore: Send + Sync {
    /// Insert unless an event with the same dedup key exists.
    ///
    /// Returns `false` when the insert was suppressed as a duplicate.
    fn insert_if_absent(&self, event: &NormalizedEvent) -> Result<bool>;

    /// Insert, replacing any event with the same dedup key
    fn insert_or_replace(&self, event: &NormalizedEvent) -> Result<()>;

    /// Flip the uploaded flag. Returns `false` if no such event exists.
    fn mark_uploaded(&self, dedup_key: &str) -> Result<bool>;

    /// All events not yet confirmed by the ledger (no ordering guarantee)
    fn list_pending(&self) -> Result<Vec<NormalizedEvent>>;

    /// Most recent events by occurrence time, newest first
    fn list_recent(&self, limit: usize) -> Result<Vec<NormalizedEvent>>;

    /// Look up one event
    fn get(&self, dedup_key: &str) -> Result<Option<NormalizedEvent>>;

    /// Delete uploaded events persisted before `before`. Pending events are
    /// never deleted. Returns the number of deleted rows.
    fn delete_uploaded_older_than(&self, before: DateTime<Utc>) -> Result<usize>;
}

/// Durable provider -> user routing, scoped per device
pub trait AssignmentStore: Send + Sync {
    /// Insert or replace the mapping for `(provider, device_id)`
    fn upsert_assignment(&self, assignment: &Assignment) -> Result<()>;

    /// Remove the mapping. Returns `false` if none existed.
    fn delete_assignment(&self, provider: Provider, device_id: &str) -> Result<bool>;

    fn get_assignment(&self, provider: Provider, device_id: &str) -> Result<Option<Assignment>>;

    fn list_assignments_for_device(&self, device_id: &str) -> Result<Vec<Assignment>>;

    /// Atomically replace every mapping of `device_id` with `assignments`
    fn replace_device_assignments(&self, device_id: &str, assignments: &[Assignment]) -> Result<()>;
}
