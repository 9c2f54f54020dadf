//! Capture state machine
//!
//! Each transition validates against local state, mutates the capture (and
//! detention, via the ledger) and queues the outbox entries, all inside one
//! store transaction. Nothing here talks to the network.

use std::collections::{BTreeSet, HashSet};

use timerstore::{Filter, IndexValue, Store, StoreTx};
use tracing::debug;

use super::{CaptureError, CaptureResponse};
use crate::domain::{Detention, Folio, Operator, Stage, TimeCapture, capture_id};
use crate::graph::StageGraph;
use crate::ledger::DetentionLedger;
use crate::sync::OpKind;

/// Result of a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Applied {
    pub capture: TimeCapture,
    /// Detention opened by this transition
    pub opened: Option<Detention>,
    /// False for idempotent no-ops (nothing written, nothing queued)
    pub changed: bool,
}

impl Applied {
    fn changed(capture: TimeCapture) -> Self {
        Self {
            capture,
            opened: None,
            changed: true,
        }
    }
}

/// Stages already finished for a work order
pub(crate) fn finished_stages(tx: &StoreTx<'_>, folio: Folio) -> CaptureResponse<HashSet<Stage>> {
    let captures: Vec<TimeCapture> = tx.list(&[
        Filter::eq("folio", IndexValue::Int(folio.0)),
        Filter::eq("status", IndexValue::String("finished".to_string())),
    ])?;
    Ok(captures.into_iter().map(|c| c.stage).collect())
}

/// Stages startable now for a work order
pub(crate) fn available_stages(store: &mut Store, graph: &StageGraph, folio: Folio) -> CaptureResponse<BTreeSet<Stage>> {
    store.transaction(|tx| {
        let finished = finished_stages(tx, folio)?;
        Ok(graph.next_available(folio, &finished))
    })
}

pub(crate) fn start(
    store: &mut Store,
    graph: &StageGraph,
    folio: Folio,
    stage: Stage,
    operator: &Operator,
    now: i64,
) -> CaptureResponse<Applied> {
    debug!(%folio, %stage, operator = %operator.id, "start: called");
    store.transaction(|tx| {
        if let Some(existing) = tx.get::<TimeCapture>(&capture_id(folio, stage))? {
            if existing.is_finished() {
                return Err(CaptureError::AlreadyFinished { folio, stage });
            }
            if !existing.is_owned_by(&operator.id) {
                debug!(%folio, %stage, holder = %existing.operator, "start: claimed by another operator");
                return Err(CaptureError::StageInUse {
                    operator: existing.operator,
                });
            }
            if existing.is_running() {
                debug!(%folio, %stage, "start: already running for caller, no-op");
                return Ok(Applied {
                    capture: existing,
                    opened: None,
                    changed: false,
                });
            }
            debug!(%folio, %stage, "start: caller's capture is paused, resuming");
            return resume_in(tx, existing, now);
        }

        let finished = finished_stages(tx, folio)?;
        if !graph.is_available(folio, stage, &finished) {
            return Err(CaptureError::StageUnavailable { folio, stage });
        }

        let capture = TimeCapture::start(folio, stage, &operator.id, now);
        tx.upsert(&capture)?;
        tx.enqueue(&OpKind::CreateCapture.entry_for(&capture, now)?)?;
        Ok(Applied::changed(capture))
    })
}

pub(crate) fn pause(
    store: &mut Store,
    folio: Folio,
    stage: Stage,
    operator: &Operator,
    reason: &str,
    now: i64,
) -> CaptureResponse<Applied> {
    debug!(%folio, %stage, operator = %operator.id, %reason, "pause: called");
    store.transaction(|tx| {
        let mut capture = owned_capture(tx, folio, stage, operator)?.ok_or(CaptureError::NotOwner)?;
        if capture.is_paused() || DetentionLedger::active_for_stage(tx, folio, stage)?.is_some() {
            return Err(CaptureError::AlreadyPaused);
        }

        capture.pause(now);
        tx.upsert(&capture)?;
        tx.enqueue(&OpKind::UpdateCapture.entry_for(&capture, now)?)?;
        let detention = DetentionLedger::open(tx, folio, stage, reason, now)?;
        Ok(Applied {
            capture,
            opened: Some(detention),
            changed: true,
        })
    })
}

pub(crate) fn resume(
    store: &mut Store,
    folio: Folio,
    stage: Stage,
    operator: &Operator,
    now: i64,
) -> CaptureResponse<Applied> {
    debug!(%folio, %stage, operator = %operator.id, "resume: called");
    store.transaction(|tx| {
        let capture = owned_capture(tx, folio, stage, operator)?.ok_or(CaptureError::NoActiveDetention)?;
        if !capture.is_paused() {
            return Err(CaptureError::NoActiveDetention);
        }
        resume_in(tx, capture, now)
    })
}

pub(crate) fn finish(
    store: &mut Store,
    graph: &StageGraph,
    folio: Folio,
    stage: Stage,
    operator: &Operator,
    now: i64,
) -> CaptureResponse<Applied> {
    debug!(%folio, %stage, operator = %operator.id, "finish: called");
    store.transaction(|tx| {
        let mut capture = owned_capture(tx, folio, stage, operator)?.ok_or(CaptureError::NotOwner)?;
        if DetentionLedger::active_for_stage(tx, folio, stage)?.is_some() {
            return Err(CaptureError::DetentionActive);
        }
        // Both alternates may run, only one may finish
        if graph.is_retired(stage, &finished_stages(tx, folio)?) {
            debug!(%folio, %stage, "finish: alternate already finished");
            return Err(CaptureError::StageUnavailable { folio, stage });
        }

        capture.finish(now);
        tx.upsert(&capture)?;
        tx.enqueue(&OpKind::UpdateCapture.entry_for(&capture, now)?)?;
        Ok(Applied::changed(capture))
    })
}

pub(crate) fn close_detention(
    store: &mut Store,
    folio: Folio,
    stage: Stage,
    closer: &Operator,
    now: i64,
) -> CaptureResponse<Detention> {
    store.transaction(|tx| DetentionLedger::close(tx, folio, stage, closer, now))
}

/// Load the capture and check the caller holds its claim
///
/// `Ok(None)` when nothing has been captured for the pair.
fn owned_capture(
    tx: &StoreTx<'_>,
    folio: Folio,
    stage: Stage,
    operator: &Operator,
) -> CaptureResponse<Option<TimeCapture>> {
    let Some(capture) = tx.get::<TimeCapture>(&capture_id(folio, stage))? else {
        return Ok(None);
    };
    if capture.is_finished() {
        return Err(CaptureError::AlreadyFinished { folio, stage });
    }
    if !capture.is_owned_by(&operator.id) {
        return Err(CaptureError::NotOwner);
    }
    Ok(Some(capture))
}

fn resume_in(tx: &StoreTx<'_>, mut capture: TimeCapture, now: i64) -> CaptureResponse<Applied> {
    if DetentionLedger::active_for_stage(tx, capture.folio, capture.stage)?.is_some() {
        return Err(CaptureError::DetentionActive);
    }
    capture.resume(now);
    tx.upsert(&capture)?;
    tx.enqueue(&OpKind::UpdateCapture.entry_for(&capture, now)?)?;
    Ok(Applied::changed(capture))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CaptureStatus, Role};
    use tempfile::TempDir;

    const F: Folio = Folio(1254);

    fn setup() -> (TempDir, Store, StageGraph) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (dir, store, StageGraph::new())
    }

    #[test]
    fn test_start_creates_running_capture_and_outbox_entry() {
        let (_dir, mut store, graph) = setup();
        let a = Operator::floor("a");
        let applied = start(&mut store, &graph, F, Stage::Madera, &a, 0).unwrap();
        assert!(applied.changed);
        assert_eq!(applied.capture.status, CaptureStatus::Running);

        let pending = store.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, "create_capture");
    }

    #[test]
    fn test_start_by_owner_is_idempotent() {
        let (_dir, mut store, graph) = setup();
        let a = Operator::floor("a");
        start(&mut store, &graph, F, Stage::Madera, &a, 0).unwrap();
        let again = start(&mut store, &graph, F, Stage::Madera, &a, 5_000).unwrap();
        assert!(!again.changed);
        assert_eq!(again.capture.started_at, 0);
        assert_eq!(store.pending_count().unwrap(), 1);
    }

    #[test]
    fn test_start_unavailable_writes_nothing() {
        let (_dir, mut store, graph) = setup();
        let err = start(&mut store, &graph, F, Stage::Pintura, &Operator::floor("a"), 0).unwrap_err();
        assert_eq!(err, CaptureError::StageUnavailable { folio: F, stage: Stage::Pintura });
        assert_eq!(store.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_pause_requires_owner() {
        let (_dir, mut store, graph) = setup();
        start(&mut store, &graph, F, Stage::Madera, &Operator::floor("a"), 0).unwrap();
        let err = pause(&mut store, F, Stage::Madera, &Operator::floor("b"), "x", 10).unwrap_err();
        assert_eq!(err, CaptureError::NotOwner);
    }

    #[test]
    fn test_pause_twice_rejected() {
        let (_dir, mut store, graph) = setup();
        let a = Operator::floor("a");
        start(&mut store, &graph, F, Stage::Madera, &a, 0).unwrap();
        let paused = pause(&mut store, F, Stage::Madera, &a, "x", 1_000).unwrap();
        assert!(paused.opened.is_some());
        let err = pause(&mut store, F, Stage::Madera, &a, "y", 2_000).unwrap_err();
        assert_eq!(err, CaptureError::AlreadyPaused);
    }

    #[test]
    fn test_resume_gated_by_detention() {
        let (_dir, mut store, graph) = setup();
        let a = Operator::floor("a");
        let sup = Operator::new("s", Role::Supervisor);
        start(&mut store, &graph, F, Stage::Madera, &a, 0).unwrap();

        assert_eq!(
            resume(&mut store, F, Stage::Madera, &a, 500).unwrap_err(),
            CaptureError::NoActiveDetention
        );

        pause(&mut store, F, Stage::Madera, &a, "x", 1_000).unwrap();
        assert_eq!(
            resume(&mut store, F, Stage::Madera, &a, 2_000).unwrap_err(),
            CaptureError::DetentionActive
        );

        close_detention(&mut store, F, Stage::Madera, &sup, 3_000).unwrap();
        let resumed = resume(&mut store, F, Stage::Madera, &a, 4_000).unwrap();
        assert_eq!(resumed.capture.status, CaptureStatus::Running);
        assert_eq!(resumed.capture.intervals.len(), 2);
    }

    #[test]
    fn test_finish_blocked_by_detention_then_allowed() {
        let (_dir, mut store, graph) = setup();
        let a = Operator::floor("a");
        let admin = Operator::new("adm", Role::Administrator);
        start(&mut store, &graph, F, Stage::Madera, &a, 0).unwrap();
        pause(&mut store, F, Stage::Madera, &a, "x", 1_000).unwrap();
        assert_eq!(
            finish(&mut store, &graph, F, Stage::Madera, &a, 2_000).unwrap_err(),
            CaptureError::DetentionActive
        );
        close_detention(&mut store, F, Stage::Madera, &admin, 3_000).unwrap();

        let done = finish(&mut store, &graph, F, Stage::Madera, &a, 4_000).unwrap();
        assert_eq!(done.capture.accumulated_ms, 1_000);
        assert_eq!(
            finish(&mut store, &graph, F, Stage::Madera, &a, 5_000).unwrap_err(),
            CaptureError::AlreadyFinished { folio: F, stage: Stage::Madera }
        );
    }

    #[test]
    fn test_owner_start_on_paused_capture_resumes() {
        let (_dir, mut store, graph) = setup();
        let a = Operator::floor("a");
        let sup = Operator::new("s", Role::Supervisor);
        start(&mut store, &graph, F, Stage::Armado, &a, 0).ok();
        // Armado is not available on a fresh order
        assert_eq!(store.pending_count().unwrap(), 0);

        start(&mut store, &graph, F, Stage::Madera, &a, 0).unwrap();
        pause(&mut store, F, Stage::Madera, &a, "x", 1_000).unwrap();
        close_detention(&mut store, F, Stage::Madera, &sup, 2_000).unwrap();
        let resumed = start(&mut store, &graph, F, Stage::Madera, &a, 3_000).unwrap();
        assert!(resumed.changed);
        assert!(resumed.capture.is_running());
    }

    #[test]
    fn test_available_after_finish() {
        let (_dir, mut store, graph) = setup();
        let a = Operator::floor("a");
        start(&mut store, &graph, F, Stage::Produccion, &a, 0).unwrap();
        finish(&mut store, &graph, F, Stage::Produccion, &a, 1_000).unwrap();
        let avail = available_stages(&mut store, &graph, F).unwrap();
        assert_eq!(avail.into_iter().collect::<Vec<_>>(), vec![Stage::Pintura]);
    }

    #[test]
    fn test_only_one_alternate_can_finish() {
        let (_dir, mut store, graph) = setup();
        let a = Operator::floor("a");
        let b = Operator::floor("b");
        start(&mut store, &graph, F, Stage::Madera, &a, 0).unwrap();
        start(&mut store, &graph, F, Stage::Produccion, &b, 0).unwrap();
        finish(&mut store, &graph, F, Stage::Madera, &a, 1_000).unwrap();

        let queued = store.pending_count().unwrap();
        assert_eq!(
            finish(&mut store, &graph, F, Stage::Produccion, &b, 2_000).unwrap_err(),
            CaptureError::StageUnavailable { folio: F, stage: Stage::Produccion }
        );
        assert_eq!(store.pending_count().unwrap(), queued);
        let loser: TimeCapture = store.get(&capture_id(F, Stage::Produccion)).unwrap().unwrap();
        assert!(loser.is_running());
    }
}
