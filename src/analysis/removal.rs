//! Removal analysis
//!
//! Computes, per constraint, the constraints that may be removed anywhere
//! in the cascade of activations rooted at it. Code generation uses this
//! to decide which iterators must tolerate concurrent removal.

use super::{tell_activations, tell_body, tell_modifiers, AnalysisError};
use crate::facts::{FactEngine, Node, Relation};
use crate::program::Program;
use tracing::{instrument, trace};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalStats {
    /// Constraints with at least one removee.
    pub removers: usize,
    /// Total (remover, removee) pairs.
    pub pairs: usize,
}

pub struct RemovalAnalysis {
    engine: FactEngine,
}

impl RemovalAnalysis {
    pub fn new(program: &Program) -> Result<Self, AnalysisError> {
        let mut engine = FactEngine::new();
        tell_modifiers(&mut engine, program);
        tell_activations(&mut engine, program);
        for rule in program.rule_ids() {
            tell_body(&mut engine, program, rule)?;
        }
        // A firing removes every removed head occurrence, not just the active one.
        for occ in program.occurrences().iter().filter(|o| o.is_active()) {
            let rule = program.rule(occ.rule);
            for &head in &rule.positive_head {
                let removed = program.occurrence(head);
                if removed.is_removed() {
                    engine.tell(
                        Relation::Removes,
                        Node::Constraint(occ.constraint),
                        Node::Constraint(removed.constraint),
                    );
                }
            }
        }
        Ok(RemovalAnalysis { engine })
    }

    #[instrument(skip_all, name = "removal")]
    pub fn analyze(program: &mut Program) -> Result<RemovalStats, AnalysisError> {
        let analysis = Self::new(program)?;
        let mut stats = RemovalStats::default();
        let ids: Vec<_> = program.constraint_ids().collect();
        for &x in &ids {
            let removees: Vec<_> = ids
                .iter()
                .copied()
                .filter(|&y| {
                    analysis
                        .engine
                        .ask(Relation::Removes, Node::Constraint(x), Node::Constraint(y))
                })
                .collect();
            if !removees.is_empty() {
                stats.removers += 1;
                stats.pairs += removees.len();
                trace!(constraint = %program.constraint_name(x), removees = removees.len(), "removees");
            }
            program.constraint_mut(x).removees = removees;
        }
        Ok(stats)
    }
}
