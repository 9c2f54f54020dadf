//! Signals into the sync coordinator

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::capture::{CaptureError, CaptureResponse};
use crate::domain::Folio;

/// Totals from one push/pull round
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Outbox entries acknowledged by the authority
    pub pushed: usize,
    /// Push attempts that failed and were rescheduled
    pub failed: usize,
    /// Local changes that lost to remote state
    pub conflicts: usize,
    /// Remote records adopted or inserted locally
    pub pulled: usize,
    /// Entries flagged as not yet synced during this round
    pub stale: usize,
}

impl SyncReport {
    pub fn merge(&mut self, other: SyncReport) {
        self.pushed += other.pushed;
        self.failed += other.failed;
        self.conflicts += other.conflicts;
        self.pulled += other.pulled;
        self.stale += other.stale;
    }
}

/// Wake-up reasons for the coordinator
#[derive(Debug)]
pub enum SyncSignal {
    /// A local change was committed
    Push,
    /// Refresh remote state, optionally for one extra work order
    Pull { folio: Option<Folio> },
    /// The app came to the foreground: push, pull and report back
    Foreground {
        reply: Option<oneshot::Sender<SyncReport>>,
    },
    Shutdown,
}

/// Cloneable sender side of the coordinator's signal channel
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<SyncSignal>,
}

impl SyncHandle {
    /// Create a handle and the receiver the coordinator listens on
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<SyncSignal>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    /// Ask for a push without waiting
    ///
    /// A full channel already holds a wake-up, so dropping this one is fine.
    pub fn request_push(&self) {
        if let Err(e) = self.tx.try_send(SyncSignal::Push) {
            debug!(error = %e, "request_push: signal not queued");
        }
    }

    /// Push pending changes now
    pub async fn push_now(&self) -> CaptureResponse<()> {
        debug!("push_now: called");
        self.tx
            .send(SyncSignal::Push)
            .await
            .map_err(|_| CaptureError::ChannelError)
    }

    /// Refresh remote state now, including `folio` if given
    pub async fn pull_now(&self, folio: Option<Folio>) -> CaptureResponse<()> {
        debug!(?folio, "pull_now: called");
        self.tx
            .send(SyncSignal::Pull { folio })
            .await
            .map_err(|_| CaptureError::ChannelError)
    }

    /// Full push/pull round, waiting for the result
    pub async fn foreground(&self) -> CaptureResponse<SyncReport> {
        debug!("foreground: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SyncSignal::Foreground { reply: Some(reply_tx) })
            .await
            .map_err(|_| CaptureError::ChannelError)?;
        reply_rx.await.map_err(|_| CaptureError::ChannelError)
    }

    /// Stop the coordinator
    pub async fn shutdown(&self) -> CaptureResponse<()> {
        debug!("shutdown: called");
        self.tx
            .send(SyncSignal::Shutdown)
            .await
            .map_err(|_| CaptureError::ChannelError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_push_never_blocks_when_full() {
        let (handle, mut rx) = SyncHandle::channel(1);
        handle.request_push();
        handle.request_push();
        assert!(matches!(rx.try_recv(), Ok(SyncSignal::Push)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_report_merge() {
        let mut a = SyncReport {
            pushed: 1,
            ..Default::default()
        };
        a.merge(SyncReport {
            pushed: 2,
            conflicts: 1,
            ..Default::default()
        });
        assert_eq!(a.pushed, 3);
        assert_eq!(a.conflicts, 1);
    }
}
