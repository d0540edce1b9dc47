//! Recursion analysis
//!
//! Constraints start out recursive. A constraint whose activation can never
//! lead back to another activation of itself is cleared, which lets code
//! generation skip the stack-saving machinery for it.

use super::{tell_activations, tell_body, tell_modifiers, AnalysisError};
use crate::facts::{FactEngine, Node, Relation};
use crate::program::Program;
use crate::rule::Conjunct;
use tracing::{instrument, trace};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecursionStats {
    /// Constraints proven non-recursive.
    pub cleared: usize,
    pub recursive: usize,
}

pub struct RecursionAnalysis {
    engine: FactEngine,
}

impl RecursionAnalysis {
    pub fn new(program: &Program) -> Result<Self, AnalysisError> {
        let mut engine = FactEngine::new();
        tell_modifiers(&mut engine, program);
        tell_activations(&mut engine, program);
        for rule in program.rule_ids() {
            tell_body(&mut engine, program, rule)?;
        }
        // the generated call may re-enter the handler with this frame live
        for occ in program.occurrences().iter().filter(|o| o.is_active()) {
            let stack = program.rule(occ.rule).body.iter().any(|conjunct| {
                matches!(conjunct, Conjunct::BuiltIn(b) if b.warrants_stack_optimization)
            });
            if stack {
                let c = Node::Constraint(occ.constraint);
                engine.tell(Relation::Tells, c, c);
            }
        }
        Ok(RecursionAnalysis { engine })
    }

    #[instrument(skip_all, name = "recursion")]
    pub fn analyze(program: &mut Program) -> Result<RecursionStats, AnalysisError> {
        let analysis = Self::new(program)?;
        let mut stats = RecursionStats::default();
        let ids: Vec<_> = program.constraint_ids().collect();
        for c in ids {
            if !program.constraint(c).is_recursive {
                continue;
            }
            let node = Node::Constraint(c);
            if analysis.engine.ask(Relation::Tells, node, node) {
                stats.recursive += 1;
            } else {
                program.constraint_mut(c).is_recursive = false;
                stats.cleared += 1;
                trace!(constraint = %program.constraint_name(c), "not recursive");
            }
        }
        Ok(stats)
    }
}
