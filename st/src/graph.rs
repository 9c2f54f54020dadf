//! Stage graph
//!
//! Fixed production topology. `Madera` and `Producción` fill the same slot:
//! either one satisfies `Pintura`, and finishing one retires the other. The
//! remaining stages form a strict chain.

use std::collections::{BTreeSet, HashSet};

use tracing::debug;

use crate::domain::{Folio, Stage};

/// Prerequisites for one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageRule {
    pub stage: Stage,
    /// Finishing any one of these unlocks the stage (empty = no prerequisite)
    pub requires_any: &'static [Stage],
    /// Substitutes for the same slot; finishing one makes this stage unavailable
    pub alternates: &'static [Stage],
}

static RULES: [StageRule; 6] = [
    StageRule {
        stage: Stage::Madera,
        requires_any: &[],
        alternates: &[Stage::Produccion],
    },
    StageRule {
        stage: Stage::Produccion,
        requires_any: &[],
        alternates: &[Stage::Madera],
    },
    StageRule {
        stage: Stage::Pintura,
        requires_any: &[Stage::Madera, Stage::Produccion],
        alternates: &[],
    },
    StageRule {
        stage: Stage::Armado,
        requires_any: &[Stage::Pintura],
        alternates: &[],
    },
    StageRule {
        stage: Stage::Tapiceria,
        requires_any: &[Stage::Armado],
        alternates: &[],
    },
    StageRule {
        stage: Stage::Empaque,
        requires_any: &[Stage::Tapiceria],
        alternates: &[],
    },
];

/// Answers "which stages may start now" for a work order
#[derive(Debug, Clone, Copy, Default)]
pub struct StageGraph;

impl StageGraph {
    pub fn new() -> Self {
        Self
    }

    /// The full rule table
    pub fn rules(&self) -> &'static [StageRule] {
        &RULES
    }

    /// Find the rule for a stage by walking the table in order
    pub fn resolve(&self, stage: Stage) -> Option<&'static StageRule> {
        RULES.iter().find(|rule| rule.stage == stage)
    }

    /// Whether `stage` may start given the stages already finished
    ///
    /// A stage with no rule is treated as not yet available.
    pub fn is_available(&self, folio: Folio, stage: Stage, finished: &HashSet<Stage>) -> bool {
        let Some(rule) = self.resolve(stage) else {
            debug!(%folio, %stage, "is_available: no rule, not available");
            return false;
        };

        if finished.contains(&stage) {
            return false;
        }
        if self.is_retired(stage, finished) {
            debug!(%folio, %stage, "is_available: alternate already finished");
            return false;
        }
        rule.requires_any.is_empty() || rule.requires_any.iter().any(|req| finished.contains(req))
    }

    /// Whether an alternate filling the same slot has already finished
    pub fn is_retired(&self, stage: Stage, finished: &HashSet<Stage>) -> bool {
        self.resolve(stage)
            .is_some_and(|rule| rule.alternates.iter().any(|alt| finished.contains(alt)))
    }

    /// Every stage legally startable now, in production order
    pub fn next_available(&self, folio: Folio, finished: &HashSet<Stage>) -> BTreeSet<Stage> {
        debug!(%folio, ?finished, "next_available: called");
        Stage::ALL
            .into_iter()
            .filter(|stage| self.is_available(folio, *stage, finished))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const F: Folio = Folio(1254);

    fn set(stages: &[Stage]) -> HashSet<Stage> {
        stages.iter().copied().collect()
    }

    fn avail(stages: &[Stage]) -> Vec<Stage> {
        StageGraph::new().next_available(F, &set(stages)).into_iter().collect()
    }

    #[test]
    fn test_fresh_order_offers_both_alternates() {
        assert_eq!(avail(&[]), vec![Stage::Madera, Stage::Produccion]);
    }

    #[test]
    fn test_either_alternate_unlocks_pintura() {
        assert_eq!(avail(&[Stage::Madera]), vec![Stage::Pintura]);
        assert_eq!(avail(&[Stage::Produccion]), vec![Stage::Pintura]);
    }

    #[test]
    fn test_chain_advances_one_at_a_time() {
        assert_eq!(avail(&[Stage::Madera, Stage::Pintura]), vec![Stage::Armado]);
        assert_eq!(
            avail(&[Stage::Madera, Stage::Pintura, Stage::Armado]),
            vec![Stage::Tapiceria]
        );
        assert_eq!(
            avail(&[Stage::Produccion, Stage::Pintura, Stage::Armado, Stage::Tapiceria]),
            vec![Stage::Empaque]
        );
    }

    #[test]
    fn test_everything_finished_leaves_nothing() {
        assert!(avail(&[
            Stage::Madera,
            Stage::Pintura,
            Stage::Armado,
            Stage::Tapiceria,
            Stage::Empaque
        ])
        .is_empty());
    }

    #[test]
    fn test_pintura_unavailable_until_slot_finished() {
        let graph = StageGraph::new();
        assert!(!graph.is_available(F, Stage::Pintura, &set(&[])));
        assert!(!graph.is_available(F, Stage::Armado, &set(&[Stage::Madera])));
    }

    #[test]
    fn test_every_stage_resolves() {
        let graph = StageGraph::new();
        for stage in Stage::ALL {
            assert_eq!(graph.resolve(stage).map(|r| r.stage), Some(stage));
        }
    }

    #[test]
    fn test_available_never_has_unfinished_predecessor() {
        let graph = StageGraph::new();
        // Every subset of the six stages
        for mask in 0u32..64 {
            let finished: HashSet<Stage> = Stage::ALL
                .into_iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, s)| s)
                .collect();
            for stage in graph.next_available(F, &finished) {
                let rule = graph.resolve(stage).unwrap();
                assert!(rule.requires_any.is_empty() || rule.requires_any.iter().any(|r| finished.contains(r)));
                assert!(!finished.contains(&stage));
            }
        }
    }
}
