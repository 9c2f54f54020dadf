//! Events broadcast to subscribers (UI, CLI watchers)

use crate::domain::{CaptureStatus, Folio, Stage};

use super::CaptureError;

/// A local pending change that lost to the remote authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictNotice {
    pub folio: Folio,
    pub stage: Stage,
    /// Operator whose local change was discarded
    pub local_operator: String,
    /// What the user should be told (`StageInUse` or `AlreadyFinished`)
    pub error: CaptureError,
}

/// State change notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    /// A capture changed status locally
    Transitioned {
        folio: Folio,
        stage: Stage,
        operator: String,
        status: CaptureStatus,
    },
    DetentionOpened {
        folio: Folio,
        stage: Stage,
        reason: String,
    },
    DetentionClosed {
        folio: Folio,
        stage: Stage,
        closed_by: String,
    },
    /// An outbox entry was acknowledged by the authority
    Synced { op_id: String, record_id: String },
    /// A change has stayed unsynced past the allowed window
    NotYetSynced {
        op_id: String,
        record_id: String,
        attempts: u32,
    },
    /// A pending local change was superseded by the authority
    Conflict(ConflictNotice),
    /// Remote state was merged into the local store
    Reconciled { folio: Folio, adopted: usize },
}
