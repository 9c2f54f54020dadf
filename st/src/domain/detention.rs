//! Detention domain type
//!
//! A stoppage window inside a capture. Opened by the operator who pauses,
//! closed only by a privileged role.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use timerstore::{IndexValue, Record};
use tracing::debug;

use super::{Folio, Stage};

/// Record id for a detention row
pub fn detention_id(folio: Folio, stage: Stage, started_at: i64) -> String {
    format!("{}:{}:{}", folio, stage.key(), started_at)
}

/// An audited stoppage of a stage's timer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detention {
    pub id: String,
    pub folio: Folio,
    pub stage: Stage,
    /// Why work stopped (equipment failure, missing material, ...)
    pub reason: String,
    pub started_at: i64,
    pub active: bool,
    pub closed_at: Option<i64>,
    /// Identity of the supervisor/administrator who closed it
    pub closed_by: Option<String>,
    pub updated_at: i64,
}

impl Detention {
    /// Open a new active detention
    pub fn open(folio: Folio, stage: Stage, reason: impl Into<String>, at: i64) -> Self {
        let reason = reason.into();
        debug!(%folio, %stage, %reason, at, "Detention::open: called");
        Self {
            id: detention_id(folio, stage, at),
            folio,
            stage,
            reason,
            started_at: at,
            active: true,
            closed_at: None,
            closed_by: None,
            updated_at: at,
        }
    }

    /// Deactivate the detention
    pub fn close(&mut self, closed_by: impl Into<String>, at: i64) {
        let closed_by = closed_by.into();
        debug!(%self.id, %closed_by, at, "Detention::close: called");
        self.active = false;
        self.closed_at = Some(at);
        self.closed_by = Some(closed_by);
        self.updated_at = at;
    }

    /// How long the stoppage lasted (or has lasted so far)
    pub fn duration_ms(&self, now: i64) -> i64 {
        (self.closed_at.unwrap_or(now) - self.started_at).max(0)
    }
}

impl Record for Detention {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "detentions"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("folio".to_string(), IndexValue::Int(self.folio.0));
        fields.insert("stage".to_string(), IndexValue::String(self.stage.key().to_string()));
        fields.insert("active".to_string(), IndexValue::Bool(self.active));
        fields.insert("started_at".to_string(), IndexValue::Int(self.started_at));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_close() {
        let mut d = Detention::open(Folio(1254), Stage::Madera, "missing material", 120_000);
        assert_eq!(d.id, "1254:madera:120000");
        assert!(d.active);
        assert_eq!(d.duration_ms(200_000), 80_000);

        d.close("sup-1", 300_000);
        assert!(!d.active);
        assert_eq!(d.closed_by.as_deref(), Some("sup-1"));
        assert_eq!(d.duration_ms(999_999), 180_000);
    }
}
