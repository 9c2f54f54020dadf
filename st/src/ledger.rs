//! Detention ledger
//!
//! The only code that creates or mutates `Detention` records. Runs inside a
//! store transaction so the detention change and its outbox entry commit
//! together with whatever capture change caused it.

use timerstore::{Filter, IndexValue, StoreTx};
use tracing::{debug, info};

use crate::capture::{CaptureError, CaptureResponse};
use crate::domain::{Detention, Folio, Operator, Stage};
use crate::sync::OpKind;

/// Opens, closes and queries detentions
pub struct DetentionLedger;

impl DetentionLedger {
    /// Open an active detention for (folio, stage)
    ///
    /// At most one detention per (folio, stage) may be active.
    pub fn open(tx: &StoreTx<'_>, folio: Folio, stage: Stage, reason: &str, at: i64) -> CaptureResponse<Detention> {
        debug!(%folio, %stage, %reason, "DetentionLedger::open: called");
        if Self::active_for_stage(tx, folio, stage)?.is_some() {
            debug!(%folio, %stage, "DetentionLedger::open: one already active");
            return Err(CaptureError::DetentionAlreadyActive);
        }

        // Ids carry the start time; closed rows are history and must not be overwritten
        let latest = Self::for_stage(tx, folio, stage)?.into_iter().map(|d| d.started_at).max();
        let at = match latest {
            Some(last) if last >= at => {
                debug!(%folio, %stage, last, at, "DetentionLedger::open: start time taken, moving past it");
                last + 1
            }
            _ => at,
        };

        let detention = Detention::open(folio, stage, reason, at);
        tx.upsert(&detention)?;
        tx.enqueue(&OpKind::CreateDetention.entry_for(&detention, at)?)?;
        info!(%folio, %stage, id = %detention.id, "Detention opened");
        Ok(detention)
    }

    /// Close the active detention for (folio, stage)
    ///
    /// Only supervisors and administrators may close. Closing does not
    /// resume the capture.
    pub fn close(tx: &StoreTx<'_>, folio: Folio, stage: Stage, closer: &Operator, at: i64) -> CaptureResponse<Detention> {
        debug!(%folio, %stage, closer = %closer.id, role = %closer.role, "DetentionLedger::close: called");
        if !closer.role.is_privileged() {
            return Err(CaptureError::Forbidden { role: closer.role });
        }

        let mut detention = Self::active_for_stage(tx, folio, stage)?.ok_or(CaptureError::NoActiveDetention)?;
        detention.close(&closer.id, at);
        tx.upsert(&detention)?;
        tx.enqueue(&OpKind::CloseDetention.entry_for(&detention, at)?)?;
        info!(%folio, %stage, id = %detention.id, closed_by = %closer.id, "Detention closed");
        Ok(detention)
    }

    /// The active detention on any stage of a work order, if one exists
    pub fn active_for(tx: &StoreTx<'_>, folio: Folio) -> CaptureResponse<Option<Detention>> {
        let active: Vec<Detention> = tx.list(&[
            Filter::eq("folio", IndexValue::Int(folio.0)),
            Filter::eq("active", IndexValue::Bool(true)),
        ])?;
        Ok(active.into_iter().next())
    }

    /// The active detention for one (folio, stage), if one exists
    pub fn active_for_stage(tx: &StoreTx<'_>, folio: Folio, stage: Stage) -> CaptureResponse<Option<Detention>> {
        let active: Vec<Detention> = tx.list(&[
            Filter::eq("folio", IndexValue::Int(folio.0)),
            Filter::eq("stage", IndexValue::String(stage.key().to_string())),
            Filter::eq("active", IndexValue::Bool(true)),
        ])?;
        Ok(active.into_iter().next())
    }

    fn for_stage(tx: &StoreTx<'_>, folio: Folio, stage: Stage) -> CaptureResponse<Vec<Detention>> {
        Ok(tx.list(&[
            Filter::eq("folio", IndexValue::Int(folio.0)),
            Filter::eq("stage", IndexValue::String(stage.key().to_string())),
        ])?)
    }

    /// Every detention of a work order, oldest first
    pub fn history(tx: &StoreTx<'_>, folio: Folio) -> CaptureResponse<Vec<Detention>> {
        let mut all: Vec<Detention> = tx.list(&[Filter::eq("folio", IndexValue::Int(folio.0))])?;
        all.sort_by_key(|d| d.started_at);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;
    use tempfile::TempDir;
    use timerstore::Store;

    fn store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_open_then_close_by_supervisor() {
        let (_dir, mut store) = store();
        let supervisor = Operator::new("sup-1", Role::Supervisor);

        let opened = store
            .transaction(|tx| DetentionLedger::open(tx, Folio(7), Stage::Pintura, "compressor down", 1_000))
            .unwrap();
        assert!(opened.active);

        let closed = store
            .transaction(|tx| DetentionLedger::close(tx, Folio(7), Stage::Pintura, &supervisor, 5_000))
            .unwrap();
        assert!(!closed.active);
        assert_eq!(closed.closed_by.as_deref(), Some("sup-1"));

        let active = store
            .transaction(|tx| DetentionLedger::active_for(tx, Folio(7)))
            .unwrap();
        assert!(active.is_none());
        // One create and one close queued
        assert_eq!(store.pending_count().unwrap(), 2);
    }

    #[test]
    fn test_second_open_rejected() {
        let (_dir, mut store) = store();
        store
            .transaction(|tx| DetentionLedger::open(tx, Folio(7), Stage::Armado, "a", 1_000))
            .unwrap();
        let err = store
            .transaction(|tx| DetentionLedger::open(tx, Folio(7), Stage::Armado, "b", 2_000))
            .unwrap_err();
        assert_eq!(err, CaptureError::DetentionAlreadyActive);
    }

    #[test]
    fn test_operator_cannot_close() {
        let (_dir, mut store) = store();
        store
            .transaction(|tx| DetentionLedger::open(tx, Folio(7), Stage::Armado, "a", 1_000))
            .unwrap();
        let err = store
            .transaction(|tx| DetentionLedger::close(tx, Folio(7), Stage::Armado, &Operator::floor("op-1"), 2_000))
            .unwrap_err();
        assert_eq!(err, CaptureError::Forbidden { role: Role::Operator });

        let still = store
            .transaction(|tx| DetentionLedger::active_for_stage(tx, Folio(7), Stage::Armado))
            .unwrap();
        assert!(still.is_some());
    }

    #[test]
    fn test_close_without_active_detention() {
        let (_dir, mut store) = store();
        let admin = Operator::new("adm", Role::Administrator);
        let err = store
            .transaction(|tx| DetentionLedger::close(tx, Folio(7), Stage::Armado, &admin, 2_000))
            .unwrap_err();
        assert_eq!(err, CaptureError::NoActiveDetention);
    }

    #[test]
    fn test_history_oldest_first() {
        let (_dir, mut store) = store();
        let admin = Operator::new("adm", Role::Administrator);
        store
            .transaction(|tx| {
                DetentionLedger::open(tx, Folio(9), Stage::Empaque, "first", 1_000)?;
                DetentionLedger::close(tx, Folio(9), Stage::Empaque, &admin, 2_000)?;
                DetentionLedger::open(tx, Folio(9), Stage::Empaque, "second", 3_000)
            })
            .unwrap();
        let history = store.transaction(|tx| DetentionLedger::history(tx, Folio(9))).unwrap();
        let reasons: Vec<&str> = history.iter().map(|d| d.reason.as_str()).collect();
        assert_eq!(reasons, vec!["first", "second"]);
    }

    #[test]
    fn test_reopen_in_same_millisecond_keeps_history() {
        let (_dir, mut store) = store();
        let admin = Operator::new("adm", Role::Administrator);
        let second = store
            .transaction(|tx| {
                DetentionLedger::open(tx, Folio(9), Stage::Madera, "first", 1_000)?;
                DetentionLedger::close(tx, Folio(9), Stage::Madera, &admin, 1_000)?;
                DetentionLedger::open(tx, Folio(9), Stage::Madera, "second", 1_000)
            })
            .unwrap();
        assert_eq!(second.started_at, 1_001);

        let history = store.transaction(|tx| DetentionLedger::history(tx, Folio(9))).unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].active);
        assert_eq!(history[0].reason, "first");
        assert!(history[1].active);
        assert_eq!(history[1].reason, "second");
    }
}
