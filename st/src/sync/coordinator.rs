//! SyncCoordinator - background push/pull against the remote authority
//!
//! Runs as its own task. Local transitions never wait on it: they commit to
//! the TimerStore and drop a `SyncSignal::Push` on the way out.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use timerstore::OutboxEntry;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{BackendError, OpKind, RemoteBackend, RemoteRecord, SyncConfig, SyncReport, SyncSignal};
use crate::capture::{CaptureController, CaptureError, CaptureResponse, TimerEvent};
use crate::clock::Clock;
use crate::domain::{Detention, Folio, TimeCapture};

enum Wake {
    Signal(Option<SyncSignal>),
    Tick,
    Retry,
}

/// Drains the outbox upstream and merges remote state back
pub struct SyncCoordinator {
    controller: CaptureController,
    backend: Arc<dyn RemoteBackend>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    signals: mpsc::Receiver<SyncSignal>,
    /// Work orders the UI asked to keep fresh
    watched: BTreeSet<Folio>,
}

impl SyncCoordinator {
    pub fn new(
        controller: CaptureController,
        backend: Arc<dyn RemoteBackend>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
        signals: mpsc::Receiver<SyncSignal>,
    ) -> Self {
        debug!(poll_interval_secs = config.poll_interval_secs, "SyncCoordinator::new: called");
        Self {
            controller,
            backend,
            clock,
            config,
            signals,
            watched: BTreeSet::new(),
        }
    }

    /// Run until shutdown
    ///
    /// Wakes on signals, on the poll interval, and when the earliest
    /// rescheduled outbox entry comes due.
    pub async fn run(mut self) -> eyre::Result<()> {
        info!("SyncCoordinator starting");

        // Replay whatever survived the last run before waiting for signals
        let mut result = self.sync_once().await;

        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            match result {
                Ok(report) => debug!(?report, "run: round complete"),
                Err(CaptureError::ChannelError) => {
                    warn!("CaptureController is gone, stopping sync");
                    break;
                }
                Err(e) => warn!(error = %e, "Sync round failed"),
            }

            let retry_in = self.next_retry_delay().await;
            let retry_sleep = tokio::time::sleep(retry_in.unwrap_or_else(|| self.config.poll_interval()));
            tokio::pin!(retry_sleep);

            let wake = tokio::select! {
                signal = self.signals.recv() => Wake::Signal(signal),
                _ = interval.tick() => Wake::Tick,
                _ = &mut retry_sleep, if retry_in.is_some() => Wake::Retry,
            };

            result = match wake {
                Wake::Signal(Some(SyncSignal::Push)) | Wake::Retry => self.push_pending().await,
                Wake::Signal(Some(SyncSignal::Pull { folio })) => {
                    if let Some(folio) = folio {
                        self.watched.insert(folio);
                    }
                    self.pull().await
                }
                Wake::Signal(Some(SyncSignal::Foreground { reply })) => {
                    let result = self.sync_once().await;
                    if let Some(reply) = reply {
                        let _ = reply.send(result.clone().unwrap_or_default());
                    }
                    result
                }
                Wake::Tick => self.sync_once().await,
                Wake::Signal(Some(SyncSignal::Shutdown)) | Wake::Signal(None) => {
                    info!("SyncCoordinator shutting down");
                    break;
                }
            };
        }

        debug!("run: complete");
        Ok(())
    }

    /// One push round followed by one pull round
    pub async fn sync_once(&mut self) -> CaptureResponse<SyncReport> {
        debug!("sync_once: called");
        let mut report = self.push_pending().await?;
        report.merge(self.pull().await?);
        if report != SyncReport::default() {
            info!(
                pushed = report.pushed,
                failed = report.failed,
                conflicts = report.conflicts,
                pulled = report.pulled,
                "Sync round"
            );
        }
        Ok(report)
    }

    /// Push every due outbox entry, oldest first
    ///
    /// Changes to one stage (its capture and its detentions) go upstream in
    /// write order: once one of them fails or is not yet due, the rest wait.
    pub async fn push_pending(&mut self) -> CaptureResponse<SyncReport> {
        let now = self.clock.now_ms();
        let entries = self.controller.pending_ops().await?;
        debug!(count = entries.len(), now, "push_pending: called");

        let mut report = SyncReport::default();
        let mut blocked: HashSet<String> = HashSet::new();

        for entry in entries {
            let key = order_key(&entry.record_id).to_string();
            if blocked.contains(&key) {
                continue;
            }
            if !entry.is_due(now) {
                if let Some(first) = entry.first_failure_at {
                    self.flag_if_stale(&entry, first, now, &mut report).await?;
                }
                blocked.insert(key);
                continue;
            }

            let kind = match entry.kind.parse::<OpKind>() {
                Ok(kind) => kind,
                Err(e) => {
                    warn!(op_id = %entry.op_id, error = %e, "Dropping outbox entry with unknown kind");
                    self.controller.ack_op(&entry.op_id).await?;
                    continue;
                }
            };

            match self.push_entry(kind, &entry).await {
                Ok(()) => {
                    debug!(op_id = %entry.op_id, %kind, "push_pending: acknowledged");
                    self.controller.ack_op(&entry.op_id).await?;
                    self.controller.emit(TimerEvent::Synced {
                        op_id: entry.op_id.clone(),
                        record_id: entry.record_id.clone(),
                    });
                    report.pushed += 1;
                }
                Err(BackendError::Conflict { remote }) => {
                    self.resolve_conflict(kind, &entry, *remote).await?;
                    report.conflicts += 1;
                    blocked.insert(key);
                }
                Err(e) => {
                    let attempts = entry.attempts + 1;
                    let delay = self.config.backoff_with_jitter_ms(attempts) as i64;
                    if e.is_retryable() {
                        debug!(op_id = %entry.op_id, attempts, delay_ms = delay, error = %e, "push_pending: will retry");
                    } else {
                        warn!(op_id = %entry.op_id, attempts, error = %e, "Authority rejected change, will retry");
                    }
                    self.controller
                        .record_failure(&entry.op_id, &e.to_string(), now, now + delay)
                        .await?;
                    report.failed += 1;
                    let first = entry.first_failure_at.unwrap_or(now);
                    self.flag_if_stale(&entry, first, now, &mut report).await?;
                    blocked.insert(key);
                }
            }
        }

        Ok(report)
    }

    /// Pull remote state for every work order that has local activity
    pub async fn pull(&mut self) -> CaptureResponse<SyncReport> {
        let mut folios = self.controller.folios_needing_pull().await?;
        folios.extend(self.watched.iter().copied());
        debug!(?folios, "pull: called");

        let mut report = SyncReport::default();
        for folio in folios {
            match self.pull_folio(folio).await {
                Ok(r) => report.merge(r),
                Err(PullError::Backend(e)) => {
                    // Offline: the rest of the folios would fail the same way
                    debug!(%folio, error = %e, "pull: authority unreachable, stopping round");
                    break;
                }
                Err(PullError::Local(e)) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Pull one work order now, whether or not it has local activity
    ///
    /// Used before starting a stage so other devices' claims are visible.
    pub async fn refresh_folio(&mut self, folio: Folio) -> Result<SyncReport, BackendError> {
        debug!(%folio, "refresh_folio: called");
        match self.pull_folio(folio).await {
            Ok(report) => Ok(report),
            Err(PullError::Backend(e)) => Err(e),
            Err(PullError::Local(e)) => Err(BackendError::InvalidResponse(e.to_string())),
        }
    }

    async fn pull_folio(&self, folio: Folio) -> Result<SyncReport, PullError> {
        let captures: Vec<TimeCapture> = self.backend.list_captures(folio).await.map_err(PullError::Backend)?;
        let detentions: Vec<Detention> = self.backend.list_detentions(folio).await.map_err(PullError::Backend)?;
        let outcome = self
            .controller
            .apply_remote(captures, detentions, false)
            .await
            .map_err(PullError::Local)?;
        Ok(SyncReport {
            pulled: outcome.adopted + outcome.inserted,
            conflicts: outcome.notices.len(),
            ..Default::default()
        })
    }

    async fn push_entry(&self, kind: OpKind, entry: &OutboxEntry) -> Result<(), BackendError> {
        let op_id = entry.op_id.as_str();
        match kind {
            OpKind::CreateCapture => {
                let capture: TimeCapture = serde_json::from_value(entry.payload.clone())?;
                self.backend.create_capture(op_id, &capture).await
            }
            OpKind::UpdateCapture => {
                let capture: TimeCapture = serde_json::from_value(entry.payload.clone())?;
                self.backend.update_capture(op_id, &capture).await
            }
            OpKind::CreateDetention => {
                let detention: Detention = serde_json::from_value(entry.payload.clone())?;
                self.backend.create_detention(op_id, &detention).await
            }
            OpKind::CloseDetention => {
                let detention: Detention = serde_json::from_value(entry.payload.clone())?;
                self.backend.close_detention(op_id, &detention).await
            }
        }
    }

    /// The authority kept a different version: make it the local truth
    async fn resolve_conflict(&self, kind: OpKind, entry: &OutboxEntry, remote: RemoteRecord) -> CaptureResponse<()> {
        debug!(op_id = %entry.op_id, %kind, remote = %remote.record_id(), "resolve_conflict: called");
        match remote {
            RemoteRecord::Capture(winner) => {
                // Even the same operator's earlier claim replaces ours, along
                // with every queued update built on top of ours
                self.controller.apply_remote(vec![winner], vec![], true).await?;
            }
            RemoteRecord::Detention(winner) => {
                self.controller.apply_remote(vec![], vec![winner], true).await?;
            }
        }
        self.controller.ack_op(&entry.op_id).await
    }

    async fn flag_if_stale(
        &self,
        entry: &OutboxEntry,
        first_failure: i64,
        now: i64,
        report: &mut SyncReport,
    ) -> CaptureResponse<()> {
        if entry.stale || now - first_failure < self.config.unsynced_window_ms() {
            return Ok(());
        }
        warn!(op_id = %entry.op_id, record_id = %entry.record_id, "Change not yet synced");
        self.controller.mark_stale(&entry.op_id).await?;
        self.controller.emit(TimerEvent::NotYetSynced {
            op_id: entry.op_id.clone(),
            record_id: entry.record_id.clone(),
            attempts: entry.attempts + 1,
        });
        report.stale += 1;
        Ok(())
    }

    /// Time until the earliest pending entry comes due
    async fn next_retry_delay(&self) -> Option<Duration> {
        let pending = self.controller.pending_ops().await.ok()?;
        let next = pending.iter().map(|e| e.next_attempt_at).min()?;
        let wait = (next - self.clock.now_ms()).max(0) as u64;
        Some(Duration::from_millis(wait))
    }
}

enum PullError {
    Backend(BackendError),
    Local(CaptureError),
}

/// Ordering key: the `"{folio}:{stage}"` prefix shared by a capture and its
/// detentions
fn order_key(record_id: &str) -> &str {
    match record_id.match_indices(':').nth(1) {
        Some((idx, _)) => &record_id[..idx],
        None => record_id,
    }
}
