//! Capture control
//!
//! The CaptureController actor owns the TimerStore and serializes every
//! start/pause/resume/finish transition for this device.

mod controller;
mod events;
mod messages;
mod transitions;

pub use controller::CaptureController;
pub use events::{ConflictNotice, TimerEvent};
pub use messages::{CaptureCommand, CaptureError, CaptureResponse};
