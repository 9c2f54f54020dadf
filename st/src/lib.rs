//! StageTrack - production stage progression and time capture
//!
//! Tracks work orders (folios) through the Madera, Producción, Pintura,
//! Armado, Tapicería and Empaque stages. Each (folio, stage) has exactly one
//! time capture, owned by the operator who started it. Pausing opens a
//! detention that only a supervisor or administrator can close.
//!
//! # Core Concepts
//!
//! - **Local first**: transitions commit to the TimerStore before anything
//!   touches the network
//! - **One writer**: every transition on a device goes through the
//!   [`CaptureController`] actor
//! - **Durable outbox**: unsynced changes survive restarts and go upstream in
//!   write order
//! - **First writer wins**: when two devices claim a stage, the authority's
//!   earliest claim is kept and the loser is told why
//!
//! # Modules
//!
//! - [`domain`] - Stage, work order, capture and detention types
//! - [`graph`] - Which stages a work order may start next
//! - [`capture`] - Transition actor, commands and events
//! - [`ledger`] - Detention bookkeeping
//! - [`sync`] - Outbox drain, pull and reconciliation
//! - [`report`] - Elapsed-time aggregation
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod capture;
pub mod cli;
pub mod clock;
pub mod config;
pub mod domain;
pub mod graph;
pub mod ledger;
pub mod report;
pub mod sync;

// Re-export commonly used types
pub use capture::{CaptureCommand, CaptureController, CaptureError, CaptureResponse, ConflictNotice, TimerEvent};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, DeviceConfig, StoreConfig};
pub use domain::{
    CaptureStatus, Detention, Filter, FilterOp, Folio, IndexValue, Operator, Record, Role, RunInterval, Stage, Store,
    TimeCapture, WorkOrder, WorkOrderStatus,
};
pub use graph::{StageGraph, StageRule};
pub use ledger::DetentionLedger;
pub use report::{
    DetentionCounts, Elapsed, PeriodSummary, StageAverage, StageLine, StageTotal, WorkOrderReport, capture_elapsed,
    detention_counts, period_summary, stage_averages, stage_totals, work_order_report,
};
pub use sync::{
    BackendError, HttpBackend, MemoryBackend, OpKind, RemoteBackend, RemoteRecord, SyncConfig, SyncCoordinator,
    SyncHandle, SyncReport, SyncSignal, create_backend,
};
