//! RemoteBackend trait and outbox operation kinds

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use timerstore::{OutboxEntry, Record};

use super::BackendError;
use crate::domain::{Detention, Folio, TimeCapture, WorkOrder};

/// Kinds of change queued in the outbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    CreateCapture,
    UpdateCapture,
    CreateDetention,
    CloseDetention,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::CreateCapture => "create_capture",
            OpKind::UpdateCapture => "update_capture",
            OpKind::CreateDetention => "create_detention",
            OpKind::CloseDetention => "close_detention",
        }
    }

    /// Build the outbox entry for a change to `record` made at `at`
    pub fn entry_for<T: Record>(self, record: &T, at: i64) -> Result<OutboxEntry, serde_json::Error> {
        let payload = serde_json::to_value(record)?;
        Ok(OutboxEntry::new(self.as_str(), T::collection_name(), record.id(), payload).created_at(at))
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create_capture" => Ok(OpKind::CreateCapture),
            "update_capture" => Ok(OpKind::UpdateCapture),
            "create_detention" => Ok(OpKind::CreateDetention),
            "close_detention" => Ok(OpKind::CloseDetention),
            other => Err(format!("unknown outbox operation '{}'", other)),
        }
    }
}

/// The authority's current version of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "record", rename_all = "snake_case")]
pub enum RemoteRecord {
    Capture(TimeCapture),
    Detention(Detention),
}

impl RemoteRecord {
    pub fn record_id(&self) -> &str {
        match self {
            RemoteRecord::Capture(c) => &c.id,
            RemoteRecord::Detention(d) => &d.id,
        }
    }
}

/// The shared authority every device reconciles against
///
/// Writes carry the outbox `op_id` as an idempotency key, so replaying an
/// already-applied change is a no-op. A create or update that loses to an
/// earlier write fails with `BackendError::Conflict` carrying the winner.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    async fn create_capture(&self, op_id: &str, capture: &TimeCapture) -> Result<(), BackendError>;

    async fn update_capture(&self, op_id: &str, capture: &TimeCapture) -> Result<(), BackendError>;

    async fn create_detention(&self, op_id: &str, detention: &Detention) -> Result<(), BackendError>;

    async fn close_detention(&self, op_id: &str, detention: &Detention) -> Result<(), BackendError>;

    /// The work order itself (`None` if the authority does not know it)
    async fn get_work_order(&self, folio: Folio) -> Result<Option<WorkOrder>, BackendError>;

    /// Every capture the authority knows for a work order
    async fn list_captures(&self, folio: Folio) -> Result<Vec<TimeCapture>, BackendError>;

    /// Every detention the authority knows for a work order
    async fn list_detentions(&self, folio: Folio) -> Result<Vec<Detention>, BackendError>;

    /// Captures started within `[from, to)` (Unix ms), for reporting
    async fn list_captures_between(&self, from: i64, to: i64) -> Result<Vec<TimeCapture>, BackendError>;

    /// Detentions started within `[from, to)` (Unix ms), for reporting
    async fn list_detentions_between(&self, from: i64, to: i64) -> Result<Vec<Detention>, BackendError>;
}
