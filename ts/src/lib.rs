//! TimerStore - durable local record store
//!
//! TimerStore keeps records as JSON rows in SQLite, keyed by
//! `(collection, id)`, with secondary indexes for filtered queries. Alongside
//! the records it keeps an outbox of changes waiting to be pushed to a remote
//! authority, and a log of conflicts resolved during reconciliation.
//!
//! # Core Concepts
//!
//! - **Single writer**: a store directory is locked by the process that opens it
//! - **Last writer wins locally**: `upsert` replaces whatever row was there
//! - **Write-ahead outbox**: a record change and its outbox entry commit together
//!
//! # Modules
//!
//! - [`record`] - `Record` trait and index/filter types
//! - [`store`] - SQLite-backed `Store` and `StoreTx`
//! - [`outbox`] - pending sync entries
//! - [`conflict`] - reconciliation conflict log

pub mod conflict;
pub mod error;
pub mod outbox;
pub mod record;
pub mod store;

pub use conflict::ConflictRecord;
pub use error::{Result, StoreError};
pub use outbox::OutboxEntry;
pub use record::{Filter, FilterOp, IndexValue, Record};
pub use store::{DB_FILE, LOCK_FILE, Store, StoreTx};

/// Current time as Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
