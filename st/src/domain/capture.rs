//! TimeCapture domain type
//!
//! One attempt to measure how long a (folio, stage) took. Time accrues only
//! inside run intervals; paused spans between intervals are dead time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use timerstore::{IndexValue, Record};
use tracing::debug;

use super::{Folio, Stage};

/// Record id for the capture of a (folio, stage)
///
/// There is exactly one capture row per pair, so the id is derived.
pub fn capture_id(folio: Folio, stage: Stage) -> String {
    format!("{}:{}", folio, stage.key())
}

/// Capture status (absence of a record means "not started")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    /// Time is accruing
    Running,
    /// Stopped by a detention
    Paused,
    /// Terminal
    Finished,
}

impl std::fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// A span during which time accrued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInterval {
    pub started_at: i64,
    /// None while the interval is still open
    pub ended_at: Option<i64>,
}

impl RunInterval {
    /// Length of the interval, measuring an open one up to `now`
    pub fn duration_ms(&self, now: i64) -> i64 {
        (self.ended_at.unwrap_or(now) - self.started_at).max(0)
    }
}

/// Time measurement for one (folio, stage)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeCapture {
    pub id: String,
    pub folio: Folio,
    pub stage: Stage,
    /// Operator who started the capture and holds its claim
    pub operator: String,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    /// Sum of closed run intervals
    pub accumulated_ms: i64,
    pub status: CaptureStatus,
    pub intervals: Vec<RunInterval>,
    pub updated_at: i64,
}

impl TimeCapture {
    /// Start a new running capture owned by `operator`
    pub fn start(folio: Folio, stage: Stage, operator: impl Into<String>, at: i64) -> Self {
        let operator = operator.into();
        debug!(%folio, %stage, %operator, at, "TimeCapture::start: called");
        Self {
            id: capture_id(folio, stage),
            folio,
            stage,
            operator,
            started_at: at,
            finished_at: None,
            accumulated_ms: 0,
            status: CaptureStatus::Running,
            intervals: vec![RunInterval {
                started_at: at,
                ended_at: None,
            }],
            updated_at: at,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == CaptureStatus::Finished
    }

    pub fn is_running(&self) -> bool {
        self.status == CaptureStatus::Running
    }

    pub fn is_paused(&self) -> bool {
        self.status == CaptureStatus::Paused
    }

    /// Operator holding the exclusivity claim, if the capture is still open
    pub fn claim_holder(&self) -> Option<&str> {
        if self.is_finished() {
            None
        } else {
            Some(&self.operator)
        }
    }

    pub fn is_owned_by(&self, operator: &str) -> bool {
        self.operator == operator
    }

    /// Whole seconds accrued in closed intervals
    pub fn accumulated_seconds(&self) -> i64 {
        self.accumulated_ms / 1000
    }

    /// Accrued time including the open interval measured up to `now`
    pub fn elapsed_ms(&self, now: i64) -> i64 {
        let open: i64 = self
            .intervals
            .iter()
            .filter(|i| i.ended_at.is_none())
            .map(|i| i.duration_ms(now))
            .sum();
        self.accumulated_ms + open
    }

    /// Stop accrual (status Paused)
    pub fn pause(&mut self, at: i64) {
        debug!(%self.id, at, "TimeCapture::pause: called");
        self.close_open_interval(at);
        self.status = CaptureStatus::Paused;
        self.updated_at = at;
    }

    /// Restart accrual in a new interval (status Running)
    pub fn resume(&mut self, at: i64) {
        debug!(%self.id, at, "TimeCapture::resume: called");
        self.close_open_interval(at);
        self.intervals.push(RunInterval {
            started_at: at,
            ended_at: None,
        });
        self.status = CaptureStatus::Running;
        self.updated_at = at;
    }

    /// Close accrual for good and release the claim
    pub fn finish(&mut self, at: i64) {
        debug!(%self.id, at, "TimeCapture::finish: called");
        self.close_open_interval(at);
        self.status = CaptureStatus::Finished;
        self.finished_at = Some(at);
        self.updated_at = at;
    }

    fn close_open_interval(&mut self, at: i64) {
        if let Some(last) = self.intervals.last_mut()
            && last.ended_at.is_none()
        {
            let end = at.max(last.started_at);
            last.ended_at = Some(end);
            self.accumulated_ms += end - last.started_at;
            debug!(%self.id, accumulated_ms = self.accumulated_ms, "close_open_interval: interval closed");
        }
    }
}

impl Record for TimeCapture {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "captures"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("folio".to_string(), IndexValue::Int(self.folio.0));
        fields.insert("stage".to_string(), IndexValue::String(self.stage.key().to_string()));
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields.insert("operator".to_string(), IndexValue::String(self.operator.clone()));
        fields.insert("started_at".to_string(), IndexValue::Int(self.started_at));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SEC: i64 = 1000;

    #[test]
    fn test_capture_id_format() {
        assert_eq!(capture_id(Folio(1254), Stage::Produccion), "1254:produccion");
    }

    #[test]
    fn test_pause_resume_excludes_dead_time() {
        let mut c = TimeCapture::start(Folio(1254), Stage::Madera, "ana", 0);
        c.pause(120 * SEC);
        c.resume(305 * SEC);
        c.finish(500 * SEC);

        assert_eq!(c.accumulated_seconds(), 315);
        assert_eq!(c.intervals.len(), 2);
        assert_eq!(c.finished_at, Some(500 * SEC));
        assert!(c.claim_holder().is_none());
    }

    #[test]
    fn test_elapsed_counts_open_interval() {
        let mut c = TimeCapture::start(Folio(1), Stage::Pintura, "ana", 0);
        assert_eq!(c.elapsed_ms(10 * SEC), 10 * SEC);
        c.pause(10 * SEC);
        assert_eq!(c.elapsed_ms(99 * SEC), 10 * SEC);
    }

    #[test]
    fn test_finish_from_paused_adds_nothing() {
        let mut c = TimeCapture::start(Folio(1), Stage::Armado, "ana", 0);
        c.pause(30 * SEC);
        c.finish(90 * SEC);
        assert_eq!(c.accumulated_seconds(), 30);
    }

    #[test]
    fn test_clock_skew_never_goes_negative() {
        let mut c = TimeCapture::start(Folio(1), Stage::Armado, "ana", 100 * SEC);
        c.pause(50 * SEC);
        assert_eq!(c.accumulated_ms, 0);
    }

    #[test]
    fn test_indexed_fields() {
        let c = TimeCapture::start(Folio(7), Stage::Empaque, "luis", 0);
        let fields = c.indexed_fields();
        assert_eq!(fields.get("folio"), Some(&IndexValue::Int(7)));
        assert_eq!(fields.get("status"), Some(&IndexValue::String("running".to_string())));
    }

    proptest! {
        #[test]
        fn prop_accumulated_is_monotonic_sum_of_run_spans(
            steps in proptest::collection::vec((0i64..10_000, 0i64..10_000), 0..20),
            tail in 0i64..10_000,
        ) {
            let mut c = TimeCapture::start(Folio(1), Stage::Madera, "ana", 0);
            let mut now = 0;
            let mut expected = 0;
            let mut last = 0;

            for (run, gap) in steps {
                now += run;
                expected += run;
                c.pause(now);
                prop_assert!(c.accumulated_ms >= last);
                last = c.accumulated_ms;

                now += gap;
                c.resume(now);
                prop_assert_eq!(c.accumulated_ms, last);
            }

            now += tail;
            expected += tail;
            c.finish(now);
            prop_assert!(c.accumulated_ms >= last);
            prop_assert_eq!(c.accumulated_ms, expected);
        }
    }
}
