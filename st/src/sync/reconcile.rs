//! Merge remote state into the local store
//!
//! The authority is first-writer-wins. Remote state replaces local state
//! when the remote side holds a different claim, a finished capture, or a
//! closed detention. Otherwise records with unacknowledged local changes
//! keep their local version and everything else takes the newer copy.

use std::collections::BTreeSet;

use serde::Serialize;
use timerstore::{ConflictRecord, Filter, IndexValue, Record, StoreTx};
use tracing::{debug, info, warn};

use crate::capture::{CaptureError, CaptureResponse, ConflictNotice};
use crate::domain::{Detention, Folio, Stage, TimeCapture};

/// Strategy name written to the conflict log
pub const REMOTE_WINS: &str = "remote_wins";

/// What a reconciliation pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    /// Local records replaced by the remote version
    pub adopted: usize,
    /// Remote-only records created locally
    pub inserted: usize,
    /// Records whose pending local change was kept for the next push
    pub kept_local: usize,
    /// Work orders touched
    pub folios: BTreeSet<Folio>,
    /// Local changes that lost
    #[serde(skip)]
    pub notices: Vec<ConflictNotice>,
}

/// Apply remote captures and detentions inside one store transaction
///
/// With `authoritative` set (the authority just rejected one of our pushes)
/// the remote version always replaces the local one.
pub(crate) fn apply_remote(
    tx: &StoreTx<'_>,
    captures: Vec<TimeCapture>,
    detentions: Vec<Detention>,
    authoritative: bool,
    now: i64,
) -> CaptureResponse<ReconcileOutcome> {
    debug!(
        captures = captures.len(),
        detentions = detentions.len(),
        authoritative,
        "apply_remote: called"
    );
    let mut outcome = ReconcileOutcome::default();

    for remote in captures {
        merge_capture(tx, remote, authoritative, now, &mut outcome)?;
    }
    for remote in detentions {
        merge_detention(tx, remote, authoritative, &mut outcome)?;
    }

    debug!(?outcome, "apply_remote: done");
    Ok(outcome)
}

fn merge_capture(
    tx: &StoreTx<'_>,
    remote: TimeCapture,
    authoritative: bool,
    now: i64,
    outcome: &mut ReconcileOutcome,
) -> CaptureResponse<()> {
    let collection = TimeCapture::collection_name();
    let Some(local) = tx.get::<TimeCapture>(&remote.id)? else {
        debug!(id = %remote.id, "merge_capture: remote-only, inserting");
        outcome.folios.insert(remote.folio);
        tx.upsert(&remote)?;
        outcome.inserted += 1;
        return Ok(());
    };
    if local == remote {
        return Ok(());
    }

    let pending = tx.has_pending(collection, &remote.id)?;
    let claim_lost = !local.is_owned_by(&remote.operator);
    let finished_remotely = remote.is_finished() && !local.is_finished();

    if authoritative || claim_lost || finished_remotely {
        if pending || claim_lost {
            warn!(
                id = %remote.id,
                local_operator = %local.operator,
                remote_operator = %remote.operator,
                "Local capture lost to remote state"
            );
            log_conflict(tx, collection, &remote.id, &local, &remote, now)?;
            outcome.notices.push(ConflictNotice {
                folio: remote.folio,
                stage: remote.stage,
                local_operator: local.operator.clone(),
                error: notice_error(&remote, claim_lost),
            });
        }
        tx.discard_for(collection, &remote.id)?;
        if claim_lost {
            drop_unsynced_detentions(tx, remote.folio, remote.stage)?;
        }
        tx.upsert(&remote)?;
        outcome.adopted += 1;
        outcome.folios.insert(remote.folio);
        return Ok(());
    }

    if pending {
        debug!(id = %remote.id, "merge_capture: local change pending, keeping local");
        outcome.kept_local += 1;
    } else if remote.updated_at > local.updated_at {
        debug!(id = %remote.id, "merge_capture: remote newer, adopting");
        tx.upsert(&remote)?;
        outcome.adopted += 1;
        outcome.folios.insert(remote.folio);
    }
    Ok(())
}

fn merge_detention(
    tx: &StoreTx<'_>,
    remote: Detention,
    authoritative: bool,
    outcome: &mut ReconcileOutcome,
) -> CaptureResponse<()> {
    let collection = Detention::collection_name();
    let Some(local) = tx.get::<Detention>(&remote.id)? else {
        debug!(id = %remote.id, "merge_detention: remote-only, inserting");
        outcome.folios.insert(remote.folio);
        tx.upsert(&remote)?;
        outcome.inserted += 1;
        return Ok(());
    };
    if local == remote {
        return Ok(());
    }

    let closed_remotely = local.active && !remote.active;
    let pending = tx.has_pending(collection, &remote.id)?;
    if authoritative || closed_remotely || (!pending && remote.updated_at > local.updated_at) {
        debug!(id = %remote.id, closed_remotely, "merge_detention: adopting remote");
        tx.discard_for(collection, &remote.id)?;
        tx.upsert(&remote)?;
        outcome.adopted += 1;
        outcome.folios.insert(remote.folio);
    } else if pending {
        outcome.kept_local += 1;
    }
    Ok(())
}

/// Remove local detentions that were never accepted upstream for a stage
/// whose claim went to someone else
fn drop_unsynced_detentions(tx: &StoreTx<'_>, folio: Folio, stage: Stage) -> CaptureResponse<()> {
    let collection = Detention::collection_name();
    let local: Vec<Detention> = tx.list(&[
        Filter::eq("folio", IndexValue::Int(folio.0)),
        Filter::eq("stage", IndexValue::String(stage.key().to_string())),
    ])?;
    for detention in local {
        if tx.has_pending(collection, &detention.id)? {
            debug!(id = %detention.id, "drop_unsynced_detentions: dropping");
            tx.discard_for(collection, &detention.id)?;
            tx.delete::<Detention>(&detention.id)?;
        }
    }
    Ok(())
}

fn notice_error(remote: &TimeCapture, claim_lost: bool) -> CaptureError {
    if remote.is_finished() {
        CaptureError::AlreadyFinished {
            folio: remote.folio,
            stage: remote.stage,
        }
    } else if claim_lost {
        CaptureError::StageInUse {
            operator: remote.operator.clone(),
        }
    } else {
        CaptureError::SyncConflict(format!("{} was changed on another device", remote.id))
    }
}

fn log_conflict<T: Serialize>(
    tx: &StoreTx<'_>,
    collection: &str,
    record_id: &str,
    local: &T,
    remote: &T,
    now: i64,
) -> CaptureResponse<()> {
    let conflict = ConflictRecord {
        id: 0,
        collection: collection.to_string(),
        record_id: record_id.to_string(),
        local: serde_json::to_value(local)?,
        remote: serde_json::to_value(remote)?,
        strategy: REMOTE_WINS.to_string(),
        resolved_at: now,
    };
    let id = tx.record_conflict(&conflict)?;
    info!(conflict_id = id, %record_id, "Conflict recorded");
    Ok(())
}
