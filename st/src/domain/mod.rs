//! Domain types for StageTrack
//!
//! Core domain types: Stage, WorkOrder, Operator, TimeCapture, Detention.
//! TimeCapture and Detention implement the Record trait for TimerStore
//! persistence.

mod capture;
mod detention;
mod operator;
mod stage;
mod work_order;

pub use capture::{CaptureStatus, RunInterval, TimeCapture, capture_id};
pub use detention::{Detention, detention_id};
pub use operator::{Operator, Role};
pub use stage::Stage;
pub use work_order::{Folio, WorkOrder, WorkOrderStatus};

// Re-export timerstore types for convenience
pub use timerstore::{Filter, FilterOp, IndexValue, Record, Store};
