//! Work orders (folios)
//!
//! Work orders are created and moved between statuses by the backend. This
//! crate only identifies them and reads their status.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Work-order identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Folio(pub i64);

impl std::fmt::Display for Folio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Folio {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Backend-owned work-order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WorkOrderStatus {
    /// Open, not yet in production
    #[default]
    S,
    /// In production
    P,
    A,
    B,
}

impl WorkOrderStatus {
    /// Whether production work can still be captured against the order
    pub fn is_open(&self) -> bool {
        matches!(self, Self::S | Self::P)
    }
}

/// A manufacturing order tracked through production stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkOrder {
    pub folio: Folio,
    /// Work-order category
    pub type_id: i64,
    pub opened_date: NaiveDate,
    pub status: WorkOrderStatus,
}
