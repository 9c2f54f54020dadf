//! Capture controller messages
//!
//! Commands and responses for the actor pattern.

use std::collections::BTreeSet;

use thiserror::Error;
use timerstore::{ConflictRecord, OutboxEntry};
use tokio::sync::oneshot;

use crate::domain::{Detention, Folio, Operator, Role, Stage, TimeCapture};
use crate::sync::ReconcileOutcome;

/// Errors from capture and detention operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("{stage} is not available yet for folio {folio}")]
    StageUnavailable { folio: Folio, stage: Stage },

    #[error("Stage in use by {operator}")]
    StageInUse { operator: String },

    #[error("Caller is not the operator running this stage")]
    NotOwner,

    #[error("Stage is already paused")]
    AlreadyPaused,

    #[error("Stage has an active detention")]
    DetentionActive,

    #[error("No active detention")]
    NoActiveDetention,

    #[error("A detention is already active for this stage")]
    DetentionAlreadyActive,

    #[error("Role {role} may not close detentions")]
    Forbidden { role: Role },

    #[error("{stage} is already finished for folio {folio}")]
    AlreadyFinished { folio: Folio, stage: Stage },

    #[error("Sync conflict: {0}")]
    SyncConflict(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Channel error")]
    ChannelError,
}

impl CaptureError {
    /// Whether refreshing state and trying again (or waiting) can succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            CaptureError::StageUnavailable { .. } => true,
            CaptureError::StageInUse { .. } => true,
            CaptureError::AlreadyPaused => true,
            CaptureError::DetentionActive => true,
            CaptureError::NoActiveDetention => true,
            CaptureError::DetentionAlreadyActive => true,
            CaptureError::Store(_) => true,
            CaptureError::ChannelError => true,
            CaptureError::NotOwner => false,
            CaptureError::Forbidden { .. } => false,
            CaptureError::AlreadyFinished { .. } => false,
            CaptureError::SyncConflict(_) => false,
        }
    }

    /// Message for the person at the terminal
    pub fn user_message(&self) -> String {
        match self {
            CaptureError::StageInUse { operator } => format!("Stage in use by {}", operator),
            CaptureError::DetentionActive => {
                "A supervisor must close the detention before this stage can continue".to_string()
            }
            CaptureError::Forbidden { .. } => "Only a supervisor or administrator can close detentions".to_string(),
            CaptureError::Store(_) | CaptureError::ChannelError => {
                "Local storage is unavailable, try again".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Short machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureError::StageUnavailable { .. } => "stage_unavailable",
            CaptureError::StageInUse { .. } => "stage_in_use",
            CaptureError::NotOwner => "not_owner",
            CaptureError::AlreadyPaused => "already_paused",
            CaptureError::DetentionActive => "detention_active",
            CaptureError::NoActiveDetention => "no_active_detention",
            CaptureError::DetentionAlreadyActive => "detention_already_active",
            CaptureError::Forbidden { .. } => "forbidden",
            CaptureError::AlreadyFinished { .. } => "already_finished",
            CaptureError::SyncConflict(_) => "sync_conflict",
            CaptureError::Store(_) => "store",
            CaptureError::ChannelError => "channel",
        }
    }
}

impl From<timerstore::StoreError> for CaptureError {
    fn from(e: timerstore::StoreError) -> Self {
        CaptureError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for CaptureError {
    fn from(e: serde_json::Error) -> Self {
        CaptureError::Store(e.to_string())
    }
}

/// Response from capture operations
pub type CaptureResponse<T> = Result<T, CaptureError>;

/// Commands sent to the CaptureController actor
#[derive(Debug)]
pub enum CaptureCommand {
    // Transitions
    Start {
        folio: Folio,
        stage: Stage,
        operator: Operator,
        reply: oneshot::Sender<CaptureResponse<TimeCapture>>,
    },
    Pause {
        folio: Folio,
        stage: Stage,
        operator: Operator,
        reason: String,
        reply: oneshot::Sender<CaptureResponse<TimeCapture>>,
    },
    Resume {
        folio: Folio,
        stage: Stage,
        operator: Operator,
        reply: oneshot::Sender<CaptureResponse<TimeCapture>>,
    },
    Finish {
        folio: Folio,
        stage: Stage,
        operator: Operator,
        reply: oneshot::Sender<CaptureResponse<TimeCapture>>,
    },
    CloseDetention {
        folio: Folio,
        stage: Stage,
        closer: Operator,
        reply: oneshot::Sender<CaptureResponse<Detention>>,
    },

    // Queries
    GetCapture {
        folio: Folio,
        stage: Stage,
        reply: oneshot::Sender<CaptureResponse<Option<TimeCapture>>>,
    },
    ListCaptures {
        folio: Option<Folio>,
        reply: oneshot::Sender<CaptureResponse<Vec<TimeCapture>>>,
    },
    ListDetentions {
        folio: Option<Folio>,
        reply: oneshot::Sender<CaptureResponse<Vec<Detention>>>,
    },
    ActiveDetention {
        folio: Folio,
        stage: Option<Stage>,
        reply: oneshot::Sender<CaptureResponse<Option<Detention>>>,
    },
    AvailableStages {
        folio: Folio,
        reply: oneshot::Sender<CaptureResponse<BTreeSet<Stage>>>,
    },
    Conflicts {
        reply: oneshot::Sender<CaptureResponse<Vec<ConflictRecord>>>,
    },

    // Outbox operations (driven by the sync coordinator)
    PendingOps {
        reply: oneshot::Sender<CaptureResponse<Vec<OutboxEntry>>>,
    },
    AckOp {
        op_id: String,
        reply: oneshot::Sender<CaptureResponse<()>>,
    },
    RecordFailure {
        op_id: String,
        error: String,
        failed_at: i64,
        next_attempt_at: i64,
        reply: oneshot::Sender<CaptureResponse<()>>,
    },
    MarkStale {
        op_id: String,
        reply: oneshot::Sender<CaptureResponse<()>>,
    },
    FoliosNeedingPull {
        reply: oneshot::Sender<CaptureResponse<BTreeSet<Folio>>>,
    },
    ApplyRemote {
        captures: Vec<TimeCapture>,
        detentions: Vec<Detention>,
        authoritative: bool,
        reply: oneshot::Sender<CaptureResponse<ReconcileOutcome>>,
    },

    // Shutdown
    /// Stop the actor; the reply is sent once the store is closed
    Shutdown {
        reply: oneshot::Sender<CaptureResponse<()>>,
    },
}
