//! Conflict log

use rusqlite::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A reconciliation conflict that was resolved in favor of the remote state
///
/// The losing local snapshot is kept so the audit trail survives even though
/// the live record was replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Row id (0 until stored)
    pub id: i64,
    pub collection: String,
    pub record_id: String,
    /// Local state that lost
    pub local: Value,
    /// Authoritative state that won
    pub remote: Value,
    /// Resolution strategy name
    pub strategy: String,
    /// Resolution timestamp (Unix milliseconds)
    pub resolved_at: i64,
}

impl ConflictRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let local: String = row.get("local")?;
        let remote: String = row.get("remote")?;
        Ok(Self {
            id: row.get("id")?,
            collection: row.get("collection")?,
            record_id: row.get("record_id")?,
            local: serde_json::from_str(&local).unwrap_or(Value::Null),
            remote: serde_json::from_str(&remote).unwrap_or(Value::Null),
            strategy: row.get("strategy")?,
            resolved_at: row.get("resolved_at")?,
        })
    }
}
