//! CaptureController - actor that owns the TimerStore
//!
//! Every capture and detention transition for this device is serialized
//! through one task, so local validation and the write that follows it can
//! never interleave with another transition.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use timerstore::{ConflictRecord, Filter, IndexValue, OutboxEntry, Store};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::events::TimerEvent;
use super::messages::{CaptureCommand, CaptureError, CaptureResponse};
use super::transitions::{self, Applied};
use crate::clock::Clock;
use crate::domain::{Detention, Folio, Operator, Stage, TimeCapture, capture_id};
use crate::graph::StageGraph;
use crate::ledger::DetentionLedger;
use crate::sync::{ReconcileOutcome, SyncHandle, reconcile};

const COMMAND_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 64;

/// Handle to send commands to the CaptureController
#[derive(Clone)]
pub struct CaptureController {
    tx: mpsc::Sender<CaptureCommand>,
    /// Broadcast sender for state change notifications
    event_tx: broadcast::Sender<TimerEvent>,
}

impl CaptureController {
    /// Open the store at `store_path` and spawn the actor
    pub fn spawn(store_path: impl AsRef<Path>, clock: Arc<dyn Clock>, sync: Option<SyncHandle>) -> eyre::Result<Self> {
        debug!(store_path = %store_path.as_ref().display(), "spawn: called");
        let mut store = Store::open(store_path.as_ref())?;

        let capture_count = store.rebuild_indexes::<TimeCapture>()?;
        let detention_count = store.rebuild_indexes::<Detention>()?;
        info!(capture_count, detention_count, "Rebuilt indexes for TimeCapture and Detention records");

        Ok(Self::with_store(store, clock, sync))
    }

    /// Spawn the actor over an already-open store
    pub fn with_store(store: Store, clock: Arc<dyn Clock>, sync: Option<SyncHandle>) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

        // Changes left over from a previous run go out first
        match store.pending_count() {
            Ok(0) => {}
            Ok(pending) => {
                info!(pending, "Unsynced changes found at startup");
                if let Some(sync) = &sync {
                    sync.request_push();
                }
            }
            Err(e) => warn!(error = %e, "Could not count pending outbox entries"),
        }

        let actor = Actor {
            store,
            clock,
            graph: StageGraph::new(),
            sync,
            event_tx: event_tx.clone(),
        };
        tokio::spawn(actor_loop(actor, rx));

        info!("CaptureController spawned");
        Self { tx, event_tx }
    }

    /// Subscribe to state change events
    pub fn subscribe_events(&self) -> broadcast::Receiver<TimerEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: TimerEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<CaptureResponse<T>>) -> CaptureCommand,
    ) -> CaptureResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| CaptureError::ChannelError)?;
        reply_rx.await.map_err(|_| CaptureError::ChannelError)?
    }

    // === Transitions ===

    /// Claim a stage and start its timer
    pub async fn start(&self, folio: Folio, stage: Stage, operator: &Operator) -> CaptureResponse<TimeCapture> {
        debug!(%folio, %stage, operator = %operator.id, "start: called");
        let operator = operator.clone();
        self.request(|reply| CaptureCommand::Start {
            folio,
            stage,
            operator,
            reply,
        })
        .await
    }

    /// Stop the timer and open a detention with `reason`
    pub async fn pause(
        &self,
        folio: Folio,
        stage: Stage,
        operator: &Operator,
        reason: &str,
    ) -> CaptureResponse<TimeCapture> {
        debug!(%folio, %stage, operator = %operator.id, %reason, "pause: called");
        let operator = operator.clone();
        let reason = reason.to_string();
        self.request(|reply| CaptureCommand::Pause {
            folio,
            stage,
            operator,
            reason,
            reply,
        })
        .await
    }

    /// Restart the timer once the detention has been closed
    pub async fn resume(&self, folio: Folio, stage: Stage, operator: &Operator) -> CaptureResponse<TimeCapture> {
        debug!(%folio, %stage, operator = %operator.id, "resume: called");
        let operator = operator.clone();
        self.request(|reply| CaptureCommand::Resume {
            folio,
            stage,
            operator,
            reply,
        })
        .await
    }

    /// Stop the timer for good and release the claim
    pub async fn finish(&self, folio: Folio, stage: Stage, operator: &Operator) -> CaptureResponse<TimeCapture> {
        debug!(%folio, %stage, operator = %operator.id, "finish: called");
        let operator = operator.clone();
        self.request(|reply| CaptureCommand::Finish {
            folio,
            stage,
            operator,
            reply,
        })
        .await
    }

    /// Close the active detention (supervisors and administrators only)
    pub async fn close_detention(&self, folio: Folio, stage: Stage, closer: &Operator) -> CaptureResponse<Detention> {
        debug!(%folio, %stage, closer = %closer.id, "close_detention: called");
        let closer = closer.clone();
        self.request(|reply| CaptureCommand::CloseDetention {
            folio,
            stage,
            closer,
            reply,
        })
        .await
    }

    // === Queries ===

    pub async fn get_capture(&self, folio: Folio, stage: Stage) -> CaptureResponse<Option<TimeCapture>> {
        debug!(%folio, %stage, "get_capture: called");
        self.request(|reply| CaptureCommand::GetCapture { folio, stage, reply })
            .await
    }

    /// All captures, or those of one work order
    pub async fn list_captures(&self, folio: Option<Folio>) -> CaptureResponse<Vec<TimeCapture>> {
        debug!(?folio, "list_captures: called");
        self.request(|reply| CaptureCommand::ListCaptures { folio, reply }).await
    }

    /// All detentions, or those of one work order (oldest first)
    pub async fn list_detentions(&self, folio: Option<Folio>) -> CaptureResponse<Vec<Detention>> {
        debug!(?folio, "list_detentions: called");
        self.request(|reply| CaptureCommand::ListDetentions { folio, reply })
            .await
    }

    /// The active detention of a work order (optionally one stage)
    pub async fn active_detention(&self, folio: Folio, stage: Option<Stage>) -> CaptureResponse<Option<Detention>> {
        debug!(%folio, ?stage, "active_detention: called");
        self.request(|reply| CaptureCommand::ActiveDetention { folio, stage, reply })
            .await
    }

    /// Stages that may be started now
    pub async fn available_stages(&self, folio: Folio) -> CaptureResponse<BTreeSet<Stage>> {
        debug!(%folio, "available_stages: called");
        self.request(|reply| CaptureCommand::AvailableStages { folio, reply })
            .await
    }

    /// Resolved reconciliation conflicts, oldest first
    pub async fn conflicts(&self) -> CaptureResponse<Vec<ConflictRecord>> {
        debug!("conflicts: called");
        self.request(|reply| CaptureCommand::Conflicts { reply }).await
    }

    /// Changes not yet acknowledged by the authority, in write order
    pub async fn pending_ops(&self) -> CaptureResponse<Vec<OutboxEntry>> {
        debug!("pending_ops: called");
        self.request(|reply| CaptureCommand::PendingOps { reply }).await
    }

    // === Outbox operations (sync side) ===

    pub(crate) async fn ack_op(&self, op_id: &str) -> CaptureResponse<()> {
        debug!(%op_id, "ack_op: called");
        let op_id = op_id.to_string();
        self.request(|reply| CaptureCommand::AckOp { op_id, reply }).await
    }

    pub(crate) async fn record_failure(
        &self,
        op_id: &str,
        error: &str,
        failed_at: i64,
        next_attempt_at: i64,
    ) -> CaptureResponse<()> {
        debug!(%op_id, %error, next_attempt_at, "record_failure: called");
        let op_id = op_id.to_string();
        let error = error.to_string();
        self.request(|reply| CaptureCommand::RecordFailure {
            op_id,
            error,
            failed_at,
            next_attempt_at,
            reply,
        })
        .await
    }

    pub(crate) async fn mark_stale(&self, op_id: &str) -> CaptureResponse<()> {
        debug!(%op_id, "mark_stale: called");
        let op_id = op_id.to_string();
        self.request(|reply| CaptureCommand::MarkStale { op_id, reply }).await
    }

    /// Work orders with open captures or unsynced changes
    pub(crate) async fn folios_needing_pull(&self) -> CaptureResponse<BTreeSet<Folio>> {
        debug!("folios_needing_pull: called");
        self.request(|reply| CaptureCommand::FoliosNeedingPull { reply }).await
    }

    pub(crate) async fn apply_remote(
        &self,
        captures: Vec<TimeCapture>,
        detentions: Vec<Detention>,
        authoritative: bool,
    ) -> CaptureResponse<ReconcileOutcome> {
        debug!(captures = captures.len(), detentions = detentions.len(), authoritative, "apply_remote: called");
        self.request(|reply| CaptureCommand::ApplyRemote {
            captures,
            detentions,
            authoritative,
            reply,
        })
        .await
    }

    /// Stop the actor
    pub async fn shutdown(&self) -> CaptureResponse<()> {
        debug!("shutdown: called");
        self.request(|reply| CaptureCommand::Shutdown { reply }).await
    }
}

struct Actor {
    store: Store,
    clock: Arc<dyn Clock>,
    graph: StageGraph,
    sync: Option<SyncHandle>,
    event_tx: broadcast::Sender<TimerEvent>,
}

impl Actor {
    fn emit(&self, event: TimerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn request_push(&self) {
        if let Some(sync) = &self.sync {
            sync.request_push();
        }
    }

    /// Announce a committed transition and wake the sync side
    fn committed(&self, result: CaptureResponse<Applied>) -> CaptureResponse<TimeCapture> {
        let applied = result?;
        if applied.changed {
            let capture = &applied.capture;
            info!(
                folio = %capture.folio,
                stage = %capture.stage,
                operator = %capture.operator,
                status = %capture.status,
                "Capture transitioned"
            );
            self.emit(TimerEvent::Transitioned {
                folio: capture.folio,
                stage: capture.stage,
                operator: capture.operator.clone(),
                status: capture.status,
            });
            if let Some(detention) = &applied.opened {
                self.emit(TimerEvent::DetentionOpened {
                    folio: detention.folio,
                    stage: detention.stage,
                    reason: detention.reason.clone(),
                });
            }
            self.request_push();
        }
        Ok(applied.capture)
    }

    fn list_captures(&self, folio: Option<Folio>) -> CaptureResponse<Vec<TimeCapture>> {
        let filters: Vec<Filter> = folio
            .map(|f| vec![Filter::eq("folio", IndexValue::Int(f.0))])
            .unwrap_or_default();
        let mut captures: Vec<TimeCapture> = self.store.list(&filters)?;
        captures.sort_by_key(|c| (c.folio, c.stage));
        Ok(captures)
    }

    fn list_detentions(&mut self, folio: Option<Folio>) -> CaptureResponse<Vec<Detention>> {
        match folio {
            Some(folio) => self.store.transaction(|tx| DetentionLedger::history(tx, folio)),
            None => {
                let mut all: Vec<Detention> = self.store.list(&[])?;
                all.sort_by_key(|d| (d.folio, d.started_at));
                Ok(all)
            }
        }
    }

    fn folios_needing_pull(&self) -> CaptureResponse<BTreeSet<Folio>> {
        let mut folios: BTreeSet<Folio> = self
            .store
            .list::<TimeCapture>(&[])?
            .into_iter()
            .filter(|c| !c.is_finished())
            .map(|c| c.folio)
            .collect();
        for entry in self.store.pending()? {
            if let Some(folio) = entry.payload.get("folio").and_then(|v| v.as_i64()) {
                folios.insert(Folio(folio));
            }
        }
        Ok(folios)
    }
}

/// The actor loop that processes commands
async fn actor_loop(mut actor: Actor, mut rx: mpsc::Receiver<CaptureCommand>) {
    debug!("CaptureController actor started");
    let mut stopped = None;

    while let Some(cmd) = rx.recv().await {
        let now = actor.clock.now_ms();
        match cmd {
            CaptureCommand::Start {
                folio,
                stage,
                operator,
                reply,
            } => {
                debug!(%folio, %stage, "actor_loop: Start command");
                let result = transitions::start(&mut actor.store, &actor.graph, folio, stage, &operator, now);
                let _ = reply.send(actor.committed(result));
            }

            CaptureCommand::Pause {
                folio,
                stage,
                operator,
                reason,
                reply,
            } => {
                debug!(%folio, %stage, "actor_loop: Pause command");
                let result = transitions::pause(&mut actor.store, folio, stage, &operator, &reason, now);
                let _ = reply.send(actor.committed(result));
            }

            CaptureCommand::Resume {
                folio,
                stage,
                operator,
                reply,
            } => {
                debug!(%folio, %stage, "actor_loop: Resume command");
                let result = transitions::resume(&mut actor.store, folio, stage, &operator, now);
                let _ = reply.send(actor.committed(result));
            }

            CaptureCommand::Finish {
                folio,
                stage,
                operator,
                reply,
            } => {
                debug!(%folio, %stage, "actor_loop: Finish command");
                let result = transitions::finish(&mut actor.store, &actor.graph, folio, stage, &operator, now);
                let _ = reply.send(actor.committed(result));
            }

            CaptureCommand::CloseDetention {
                folio,
                stage,
                closer,
                reply,
            } => {
                debug!(%folio, %stage, "actor_loop: CloseDetention command");
                let result = transitions::close_detention(&mut actor.store, folio, stage, &closer, now);
                if let Ok(detention) = &result {
                    actor.emit(TimerEvent::DetentionClosed {
                        folio,
                        stage,
                        closed_by: detention.closed_by.clone().unwrap_or_default(),
                    });
                    actor.request_push();
                }
                let _ = reply.send(result);
            }

            CaptureCommand::GetCapture { folio, stage, reply } => {
                debug!(%folio, %stage, "actor_loop: GetCapture command");
                let result = actor
                    .store
                    .get::<TimeCapture>(&capture_id(folio, stage))
                    .map_err(CaptureError::from);
                let _ = reply.send(result);
            }

            CaptureCommand::ListCaptures { folio, reply } => {
                debug!(?folio, "actor_loop: ListCaptures command");
                let _ = reply.send(actor.list_captures(folio));
            }

            CaptureCommand::ListDetentions { folio, reply } => {
                debug!(?folio, "actor_loop: ListDetentions command");
                let _ = reply.send(actor.list_detentions(folio));
            }

            CaptureCommand::ActiveDetention { folio, stage, reply } => {
                debug!(%folio, ?stage, "actor_loop: ActiveDetention command");
                let result = actor.store.transaction(|tx| match stage {
                    Some(stage) => DetentionLedger::active_for_stage(tx, folio, stage),
                    None => DetentionLedger::active_for(tx, folio),
                });
                let _ = reply.send(result);
            }

            CaptureCommand::AvailableStages { folio, reply } => {
                debug!(%folio, "actor_loop: AvailableStages command");
                let result = transitions::available_stages(&mut actor.store, &actor.graph, folio);
                let _ = reply.send(result);
            }

            CaptureCommand::Conflicts { reply } => {
                debug!("actor_loop: Conflicts command");
                let _ = reply.send(actor.store.list_conflicts().map_err(CaptureError::from));
            }

            CaptureCommand::PendingOps { reply } => {
                debug!("actor_loop: PendingOps command");
                let _ = reply.send(actor.store.pending().map_err(CaptureError::from));
            }

            CaptureCommand::AckOp { op_id, reply } => {
                debug!(%op_id, "actor_loop: AckOp command");
                let result = actor.store.ack(&op_id).map(|_| ()).map_err(CaptureError::from);
                let _ = reply.send(result);
            }

            CaptureCommand::RecordFailure {
                op_id,
                error,
                failed_at,
                next_attempt_at,
                reply,
            } => {
                debug!(%op_id, "actor_loop: RecordFailure command");
                let result = actor
                    .store
                    .record_failure(&op_id, &error, failed_at, next_attempt_at)
                    .map_err(CaptureError::from);
                let _ = reply.send(result);
            }

            CaptureCommand::MarkStale { op_id, reply } => {
                debug!(%op_id, "actor_loop: MarkStale command");
                let _ = reply.send(actor.store.mark_stale(&op_id).map_err(CaptureError::from));
            }

            CaptureCommand::FoliosNeedingPull { reply } => {
                debug!("actor_loop: FoliosNeedingPull command");
                let _ = reply.send(actor.folios_needing_pull());
            }

            CaptureCommand::ApplyRemote {
                captures,
                detentions,
                authoritative,
                reply,
            } => {
                debug!(authoritative, "actor_loop: ApplyRemote command");
                let result = actor
                    .store
                    .transaction(|tx| reconcile::apply_remote(tx, captures, detentions, authoritative, now));
                if let Ok(outcome) = &result {
                    for notice in &outcome.notices {
                        actor.emit(TimerEvent::Conflict(notice.clone()));
                    }
                    for folio in &outcome.folios {
                        actor.emit(TimerEvent::Reconciled {
                            folio: *folio,
                            adopted: outcome.adopted + outcome.inserted,
                        });
                    }
                }
                let _ = reply.send(result);
            }

            CaptureCommand::Shutdown { reply } => {
                info!("CaptureController shutting down");
                stopped = Some(reply);
                break;
            }
        }
    }

    // Release the store lock before acknowledging
    drop(actor);
    debug!("CaptureController actor stopped");
    if let Some(reply) = stopped {
        let _ = reply.send(Ok(()));
    }
}
