//! Observation analysis (late storage)
//!
//! An active constraint normally enters the store before its first rule
//! body runs, so that constraints told by that body can find it. When no
//! constraint activated by the body can look it up, storage can be
//! delayed past the occurrence. Occurrences whose `stored` flag is
//! cleared here are exactly those where delaying is safe.

use super::{tell_program, AnalysisError};
use crate::facts::{FactEngine, Node, Relation};
use crate::program::{ConstraintId, Program, RuleId};
use rustc_hash::FxHashMap;
use tracing::{debug, instrument, trace};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservationStats {
    /// Occurrences whose active instance need not be stored.
    pub unstored: usize,
    /// Constraints that never enter the store at all.
    pub never_stored: usize,
    pub queries: usize,
}

pub struct ObservationAnalysis {
    engine: FactEngine,
}

impl ObservationAnalysis {
    /// Assert the activation facts of `program`.
    pub fn new(program: &Program) -> Result<Self, AnalysisError> {
        let mut engine = FactEngine::new();
        tell_program(&mut engine, program)?;
        Ok(ObservationAnalysis { engine })
    }

    #[instrument(skip_all, name = "observation")]
    pub fn analyze(program: &mut Program) -> Result<ObservationStats, AnalysisError> {
        let mut analysis = Self::new(program)?;
        let mut stats = ObservationStats::default();
        let constraints: Vec<_> = program.constraint_ids().collect();
        for c in constraints {
            analysis.analyze_constraint(program, c, &mut stats)?;
        }
        debug!(unstored = stats.unstored, queries = stats.queries, "observation done");
        Ok(stats)
    }

    /// Whether the body of `rule` may look up a stored instance of `c`,
    /// including the instance that fired the rule.
    pub fn body_observes(&mut self, c: ConstraintId, rule: RuleId) -> Result<bool, AnalysisError> {
        let observed = self
            .engine
            .with_self(c, |e| e.ask(Relation::Observes, Node::Constraint(c), Node::Body(rule)))?;
        Ok(observed)
    }

    fn analyze_constraint(
        &mut self,
        program: &mut Program,
        c: ConstraintId,
        stats: &mut ObservationStats,
    ) -> Result<(), AnalysisError> {
        let active = program.active_occurrences(c);
        if !program.constraint(c).may_be_stored {
            stats.never_stored += 1;
            for o in active {
                let occ = program.occurrence_mut(o);
                if occ.stored {
                    occ.stored = false;
                    stats.unstored += 1;
                }
            }
            return Ok(());
        }

        // one query per rule: a rule with several occurrences of `c` has one body
        let mut observed: FxHashMap<RuleId, bool> = FxHashMap::default();
        for o in active {
            let rule = program.occurrence(o).rule;
            let body_observes = match observed.get(&rule) {
                Some(&answer) => answer,
                None => {
                    let answer = self.body_observes(c, rule)?;
                    stats.queries += 1;
                    observed.insert(rule, answer);
                    answer
                }
            };

            let occ = program.occurrence_mut(o);
            if (!body_observes || occ.is_removed()) && occ.stored {
                occ.stored = false;
                stats.unstored += 1;
                trace!(occurrence = %o, removed = occ.is_removed(), "storage delayed");
            }
        }
        Ok(())
    }
}
