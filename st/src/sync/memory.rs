//! In-process remote authority
//!
//! Keeps the authority's tables in memory and enforces the same
//! first-writer-wins and idempotency rules the HTTP service does. Several
//! devices can share one instance through `Arc`, which is how multi-device
//! behaviour is exercised without a server.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use super::{BackendError, RemoteBackend, RemoteRecord};
use crate::domain::{Detention, Folio, TimeCapture, WorkOrder};

#[derive(Debug, Default)]
struct State {
    captures: HashMap<String, TimeCapture>,
    detentions: HashMap<String, Detention>,
    work_orders: HashMap<Folio, WorkOrder>,
    applied_ops: HashSet<String>,
    offline: bool,
    writes: usize,
}

/// Shared in-memory authority
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing (or regaining) connectivity
    pub fn set_online(&self, online: bool) {
        debug!(online, "MemoryBackend::set_online: called");
        self.lock().offline = !online;
    }

    /// Register a work order (work orders are created outside this crate)
    pub fn put_work_order(&self, order: WorkOrder) {
        self.lock().work_orders.insert(order.folio, order);
    }

    /// Number of mutating calls that changed state
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    /// The authority's copy of a capture
    pub fn capture(&self, id: &str) -> Option<TimeCapture> {
        self.lock().captures.get(id).cloned()
    }

    /// The authority's copy of a detention
    pub fn detention(&self, id: &str) -> Option<Detention> {
        self.lock().detentions.get(id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding the lock leaves plain data behind
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Common prelude for writes: connectivity, then idempotency
    ///
    /// Returns `None` when the op was already applied.
    fn begin_write(&self, op_id: &str) -> Result<Option<std::sync::MutexGuard<'_, State>>, BackendError> {
        let state = self.lock();
        if state.offline {
            return Err(BackendError::Unavailable);
        }
        if state.applied_ops.contains(op_id) {
            debug!(%op_id, "MemoryBackend: op already applied");
            return Ok(None);
        }
        Ok(Some(state))
    }

    fn check_online(&self) -> Result<(), BackendError> {
        if self.lock().offline {
            return Err(BackendError::Unavailable);
        }
        Ok(())
    }
}

fn conflict(remote: RemoteRecord) -> BackendError {
    BackendError::Conflict {
        remote: Box::new(remote),
    }
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    async fn create_capture(&self, op_id: &str, capture: &TimeCapture) -> Result<(), BackendError> {
        debug!(%op_id, id = %capture.id, "MemoryBackend::create_capture: called");
        let Some(mut state) = self.begin_write(op_id)? else {
            return Ok(());
        };
        if let Some(existing) = state.captures.get(&capture.id) {
            return Err(conflict(RemoteRecord::Capture(existing.clone())));
        }
        state.captures.insert(capture.id.clone(), capture.clone());
        state.applied_ops.insert(op_id.to_string());
        state.writes += 1;
        Ok(())
    }

    async fn update_capture(&self, op_id: &str, capture: &TimeCapture) -> Result<(), BackendError> {
        debug!(%op_id, id = %capture.id, status = %capture.status, "MemoryBackend::update_capture: called");
        let Some(mut state) = self.begin_write(op_id)? else {
            return Ok(());
        };
        // A different start time means the update was built on a claim that lost
        if let Some(existing) = state.captures.get(&capture.id)
            && (existing.operator != capture.operator
                || existing.started_at != capture.started_at
                || existing.is_finished())
        {
            return Err(conflict(RemoteRecord::Capture(existing.clone())));
        }
        state.captures.insert(capture.id.clone(), capture.clone());
        state.applied_ops.insert(op_id.to_string());
        state.writes += 1;
        Ok(())
    }

    async fn create_detention(&self, op_id: &str, detention: &Detention) -> Result<(), BackendError> {
        debug!(%op_id, id = %detention.id, "MemoryBackend::create_detention: called");
        let Some(mut state) = self.begin_write(op_id)? else {
            return Ok(());
        };
        if let Some(active) = state
            .detentions
            .values()
            .find(|d| d.active && d.folio == detention.folio && d.stage == detention.stage && d.id != detention.id)
        {
            return Err(conflict(RemoteRecord::Detention(active.clone())));
        }
        state.detentions.insert(detention.id.clone(), detention.clone());
        state.applied_ops.insert(op_id.to_string());
        state.writes += 1;
        Ok(())
    }

    async fn close_detention(&self, op_id: &str, detention: &Detention) -> Result<(), BackendError> {
        debug!(%op_id, id = %detention.id, "MemoryBackend::close_detention: called");
        let Some(mut state) = self.begin_write(op_id)? else {
            return Ok(());
        };
        let already_closed = state.detentions.get(&detention.id).is_some_and(|d| !d.active);
        if !already_closed {
            state.detentions.insert(detention.id.clone(), detention.clone());
            state.writes += 1;
        }
        state.applied_ops.insert(op_id.to_string());
        Ok(())
    }

    async fn get_work_order(&self, folio: Folio) -> Result<Option<WorkOrder>, BackendError> {
        self.check_online()?;
        Ok(self.lock().work_orders.get(&folio).cloned())
    }

    async fn list_captures(&self, folio: Folio) -> Result<Vec<TimeCapture>, BackendError> {
        self.check_online()?;
        let mut captures: Vec<TimeCapture> = self
            .lock()
            .captures
            .values()
            .filter(|c| c.folio == folio)
            .cloned()
            .collect();
        captures.sort_by_key(|c| c.stage);
        Ok(captures)
    }

    async fn list_detentions(&self, folio: Folio) -> Result<Vec<Detention>, BackendError> {
        self.check_online()?;
        let mut detentions: Vec<Detention> = self
            .lock()
            .detentions
            .values()
            .filter(|d| d.folio == folio)
            .cloned()
            .collect();
        detentions.sort_by_key(|d| d.started_at);
        Ok(detentions)
    }

    async fn list_captures_between(&self, from: i64, to: i64) -> Result<Vec<TimeCapture>, BackendError> {
        self.check_online()?;
        let mut captures: Vec<TimeCapture> = self
            .lock()
            .captures
            .values()
            .filter(|c| c.started_at >= from && c.started_at < to)
            .cloned()
            .collect();
        captures.sort_by_key(|c| (c.folio, c.stage));
        Ok(captures)
    }

    async fn list_detentions_between(&self, from: i64, to: i64) -> Result<Vec<Detention>, BackendError> {
        self.check_online()?;
        let mut detentions: Vec<Detention> = self
            .lock()
            .detentions
            .values()
            .filter(|d| d.started_at >= from && d.started_at < to)
            .cloned()
            .collect();
        detentions.sort_by_key(|d| (d.folio, d.started_at));
        Ok(detentions)
    }
}
