//! Outbox entries
//!
//! Every local change that the remote authority has not yet acknowledged is
//! kept here, in write order, until the sync side acks or discards it.

use rusqlite::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::now_ms;

/// A change waiting to be pushed upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Idempotency key sent with every push attempt (UUID v7)
    pub op_id: String,
    /// Operation kind understood by the sync side (e.g. "create_capture")
    pub kind: String,
    /// Collection of the record this change belongs to
    pub collection: String,
    /// Record id within the collection
    pub record_id: String,
    /// Snapshot of the record at the time of the change
    pub payload: Value,
    /// When the change was made locally
    pub created_at: i64,
    /// Failed push attempts so far
    pub attempts: u32,
    /// Time of the first failed attempt
    pub first_failure_at: Option<i64>,
    /// Do not retry before this time
    pub next_attempt_at: i64,
    /// Last push error, for display
    pub last_error: Option<String>,
    /// Retries exhausted past the allowed window; still retried, but flagged
    pub stale: bool,
}

impl OutboxEntry {
    /// Create a new entry that is due immediately
    pub fn new(kind: impl Into<String>, collection: impl Into<String>, record_id: impl Into<String>, payload: Value) -> Self {
        let kind = kind.into();
        let record_id = record_id.into();
        debug!(%kind, %record_id, "OutboxEntry::new: called");
        let now = now_ms();
        Self {
            op_id: uuid::Uuid::now_v7().to_string(),
            kind,
            collection: collection.into(),
            record_id,
            payload,
            created_at: now,
            attempts: 0,
            first_failure_at: None,
            next_attempt_at: now,
            last_error: None,
            stale: false,
        }
    }

    /// Stamp the entry with an explicit creation time (due at that time)
    pub fn created_at(mut self, at: i64) -> Self {
        self.created_at = at;
        self.next_attempt_at = at;
        self
    }

    /// Whether this entry may be attempted at `now`
    pub fn is_due(&self, now: i64) -> bool {
        self.next_attempt_at <= now
    }

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let payload: String = row.get("payload")?;
        let payload = serde_json::from_str(&payload)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;
        Ok(Self {
            op_id: row.get("op_id")?,
            kind: row.get("kind")?,
            collection: row.get("collection")?,
            record_id: row.get("record_id")?,
            payload,
            created_at: row.get("created_at")?,
            attempts: row.get("attempts")?,
            first_failure_at: row.get("first_failure_at")?,
            next_attempt_at: row.get("next_attempt_at")?,
            last_error: row.get("last_error")?,
            stale: row.get("stale")?,
        })
    }
}
