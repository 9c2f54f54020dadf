//! Sync with the remote authority
//!
//! The outbox in the TimerStore is the source of truth for what still has
//! to go upstream. `SyncCoordinator` drains it through a `RemoteBackend` and
//! merges remote state back through the capture controller, so every local
//! write stays serialized by the same actor.

mod backend;
mod config;
mod coordinator;
mod error;
mod handle;
mod http;
mod memory;
pub(crate) mod reconcile;

use std::sync::Arc;

use tracing::debug;

pub use backend::{OpKind, RemoteBackend, RemoteRecord};
pub use config::SyncConfig;
pub use coordinator::SyncCoordinator;
pub use error::BackendError;
pub use handle::{SyncHandle, SyncReport, SyncSignal};
pub use http::HttpBackend;
pub use memory::MemoryBackend;
pub use reconcile::{REMOTE_WINS, ReconcileOutcome};

/// Create the configured backend, or `None` when sync is disabled
pub fn create_backend(config: &SyncConfig) -> Result<Option<Arc<dyn RemoteBackend>>, BackendError> {
    debug!(enabled = config.enabled, base_url = %config.base_url, "create_backend: called");
    if !config.enabled {
        return Ok(None);
    }
    Ok(Some(Arc::new(HttpBackend::from_config(config)?)))
}
