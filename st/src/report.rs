//! Report aggregation
//!
//! Pure read-side derivations over reconciled captures and detentions.
//! Unfinished captures are never mixed into finished totals: their time is
//! reported separately as elapsed-so-far.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::domain::{Detention, Folio, Stage, TimeCapture, WorkOrder};

/// Time attributed to one capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "seconds", rename_all = "snake_case")]
pub enum Elapsed {
    /// Final accrued seconds
    Finished(i64),
    /// Still running or paused; seconds accrued up to `now`
    SoFar(i64),
}

impl Elapsed {
    pub fn seconds(&self) -> i64 {
        match self {
            Elapsed::Finished(s) | Elapsed::SoFar(s) => *s,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Elapsed::Finished(_))
    }
}

/// Per-stage totals
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageTotal {
    pub stage: Stage,
    pub finished_seconds: i64,
    pub finished_count: usize,
    pub in_progress_seconds: i64,
    pub in_progress_count: usize,
}

/// Average finished duration of a stage across work orders
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageAverage {
    pub stage: Stage,
    pub average_seconds: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DetentionCounts {
    pub active: usize,
    pub inactive: usize,
}

/// One stage row of a work-order report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageLine {
    pub stage: Stage,
    pub operator: String,
    pub elapsed: Elapsed,
    pub detentions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkOrderReport {
    pub folio: Folio,
    /// Backend details, when known
    pub order: Option<WorkOrder>,
    pub stages: Vec<StageLine>,
    pub finished_seconds: i64,
    pub in_progress_seconds: i64,
    pub detentions: DetentionCounts,
    /// Backend status still accepts work (assumed open when unknown)
    pub open: bool,
    /// Empaque finished
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodSummary {
    pub from: i64,
    pub to: i64,
    pub work_orders: usize,
    pub totals: Vec<StageTotal>,
    pub averages: Vec<StageAverage>,
    pub detentions: DetentionCounts,
}

/// Seconds attributed to a capture at `now`
pub fn capture_elapsed(capture: &TimeCapture, now: i64) -> Elapsed {
    if capture.is_finished() {
        Elapsed::Finished(capture.accumulated_seconds())
    } else {
        Elapsed::SoFar(capture.elapsed_ms(now) / 1000)
    }
}

/// Totals per stage, in production order (stages with no captures omitted)
pub fn stage_totals(captures: &[TimeCapture], now: i64) -> Vec<StageTotal> {
    let mut totals: BTreeMap<Stage, StageTotal> = BTreeMap::new();
    for capture in captures {
        let total = totals.entry(capture.stage).or_insert_with(|| StageTotal {
            stage: capture.stage,
            finished_seconds: 0,
            finished_count: 0,
            in_progress_seconds: 0,
            in_progress_count: 0,
        });
        match capture_elapsed(capture, now) {
            Elapsed::Finished(s) => {
                total.finished_seconds += s;
                total.finished_count += 1;
            }
            Elapsed::SoFar(s) => {
                total.in_progress_seconds += s;
                total.in_progress_count += 1;
            }
        }
    }
    totals.into_values().collect()
}

/// Average finished seconds per stage
pub fn stage_averages(captures: &[TimeCapture]) -> Vec<StageAverage> {
    let mut sums: BTreeMap<Stage, (i64, usize)> = BTreeMap::new();
    for capture in captures.iter().filter(|c| c.is_finished()) {
        let entry = sums.entry(capture.stage).or_default();
        entry.0 += capture.accumulated_seconds();
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(stage, (sum, samples))| StageAverage {
            stage,
            average_seconds: sum as f64 / samples as f64,
            samples,
        })
        .collect()
}

pub fn detention_counts(detentions: &[Detention]) -> DetentionCounts {
    let active = detentions.iter().filter(|d| d.active).count();
    DetentionCounts {
        active,
        inactive: detentions.len() - active,
    }
}

/// Everything known about one work order
pub fn work_order_report(
    folio: Folio,
    order: Option<WorkOrder>,
    captures: &[TimeCapture],
    detentions: &[Detention],
    now: i64,
) -> WorkOrderReport {
    let mine: Vec<&TimeCapture> = captures.iter().filter(|c| c.folio == folio).collect();
    let my_detentions: Vec<Detention> = detentions.iter().filter(|d| d.folio == folio).cloned().collect();

    let mut stages: Vec<StageLine> = mine
        .iter()
        .map(|c| StageLine {
            stage: c.stage,
            operator: c.operator.clone(),
            elapsed: capture_elapsed(c, now),
            detentions: my_detentions.iter().filter(|d| d.stage == c.stage).count(),
        })
        .collect();
    stages.sort_by_key(|line| line.stage);

    let finished_seconds = stages.iter().filter(|l| l.elapsed.is_finished()).map(|l| l.elapsed.seconds()).sum();
    let in_progress_seconds = stages.iter().filter(|l| !l.elapsed.is_finished()).map(|l| l.elapsed.seconds()).sum();
    let complete = mine.iter().any(|c| c.stage == Stage::Empaque && c.is_finished());
    let open = order.as_ref().is_none_or(|o| o.status.is_open());

    WorkOrderReport {
        folio,
        order,
        stages,
        finished_seconds,
        in_progress_seconds,
        detentions: detention_counts(&my_detentions),
        open,
        complete,
    }
}

/// Summary of captures and detentions started within `[from, to)`
pub fn period_summary(from: i64, to: i64, captures: &[TimeCapture], detentions: &[Detention], now: i64) -> PeriodSummary {
    let in_range: Vec<TimeCapture> = captures
        .iter()
        .filter(|c| c.started_at >= from && c.started_at < to)
        .cloned()
        .collect();
    let detentions_in_range: Vec<Detention> = detentions
        .iter()
        .filter(|d| d.started_at >= from && d.started_at < to)
        .cloned()
        .collect();
    let work_orders: BTreeSet<Folio> = in_range.iter().map(|c| c.folio).collect();

    PeriodSummary {
        from,
        to,
        work_orders: work_orders.len(),
        totals: stage_totals(&in_range, now),
        averages: stage_averages(&in_range),
        detentions: detention_counts(&detentions_in_range),
    }
}
