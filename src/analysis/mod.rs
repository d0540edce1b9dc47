//! Static analyses that strip runtime bookkeeping from generated handlers.
//!
//! Each pass reads the program graph and writes back flags:
//!
//! 1. **Lookups**: index type and category for every partner search
//! 2. **Join**: per-head join graphs, components and maximal cliques
//! 3. **Observation**: occurrences whose active instance need not be stored yet
//! 4. **Removal**: the constraints each constraint's firings may remove
//! 5. **Recursion**: constraints whose activation never re-enters itself
//! 6. **History**: occurrences that can skip the propagation history check
//!
//! Passes 3-6 share one scheme: assert activation facts from every rule
//! body into a fresh [`FactEngine`], then query it per occurrence or per
//! constraint. History must run after observation because it reads the
//! `stored` flags.

pub mod history;
pub mod join_order;
pub mod lookups;
pub mod observation;
pub mod recursion;
pub mod removal;


pub use history::{HistoryAnalysis, HistoryStats};
pub use join_order::{JoinAnalysis, JoinStats};
pub use lookups::{LookupAssignment, LookupStats};
pub use observation::{ObservationAnalysis, ObservationStats};
pub use recursion::{RecursionAnalysis, RecursionStats};
pub use removal::{RemovalAnalysis, RemovalStats};

use crate::facts::{FactEngine, FactError, Node, Relation};
use crate::lookup::LookupError;
use crate::program::{ModelError, Program, RuleId};
use crate::rule::Conjunct;
use thiserror::Error;

/// Any failure of an analysis pass. All of them indicate a bug in the
/// driver or an earlier pass, never a property of the analysed program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Fact(#[from] FactError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("internal error in rule {rule}: {message}")]
    Internal { rule: String, message: String },
}

/// Seed the engine with what the declarations alone imply.
pub(crate) fn tell_modifiers(engine: &mut FactEngine, program: &Program) {
    for c in program.constraints() {
        if c.is_reactive() {
            engine.tell_reactivated(c.id);
        }
        if c.is_exported() {
            engine.tell_exported(c.id);
        }
    }
}

/// Activating a constraint may fire every rule it has an active occurrence in.
pub(crate) fn tell_activations(engine: &mut FactEngine, program: &Program) {
    for occ in program.occurrences().iter().filter(|o| o.is_active()) {
        engine.tell(
            Relation::Tells,
            Node::Constraint(occ.constraint),
            Node::Body(occ.rule),
        );
    }
}

/// Classify the body of `rule` into activation facts.
pub(crate) fn tell_body(
    engine: &mut FactEngine,
    program: &Program,
    rule: RuleId,
) -> Result<(), AnalysisError> {
    let body = Node::Body(rule);
    for conjunct in &program.rule(rule).body {
        match conjunct {
            Conjunct::UserDefined { constraint, .. } => {
                if program.try_constraint(*constraint).is_none() {
                    return Err(AnalysisError::Internal {
                        rule: program.rule(rule).name.to_string(),
                        message: format!("body calls unknown constraint {}", constraint),
                    });
                }
                engine.tell(Relation::Tells, body, Node::Constraint(*constraint));
            }
            Conjunct::Triggering => {
                engine.tell_triggering(body);
            }
            Conjunct::Pessimistic => {
                engine.tell_pessimistic(body);
            }
            Conjunct::BuiltIn(_) | Conjunct::Free => {}
        }
    }
    Ok(())
}

/// Activating a constraint looks up every partner of its active occurrences.
pub(crate) fn tell_head_observations(engine: &mut FactEngine, program: &Program) {
    for occ in program.occurrences().iter().filter(|o| o.is_active()) {
        for partner in program.partners(occ.id) {
            engine.tell(
                Relation::Observes,
                Node::Constraint(program.occurrence(partner).constraint),
                Node::Constraint(occ.constraint),
            );
        }
    }
}

/// Facts shared by the observation and history analyses.
pub(crate) fn tell_program(engine: &mut FactEngine, program: &Program) -> Result<(), AnalysisError> {
    tell_modifiers(engine, program);
    tell_activations(engine, program);
    tell_head_observations(engine, program);
    for rule in program.rule_ids() {
        tell_body(engine, program, rule)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{ConstraintId, ProgramBuilder};

    #[test]
    fn test_dangling_body_call_is_internal_error() {
        let mut b = ProgramBuilder::new();
        let p = b.constraint("p", 0);
        b.rule("r").kept(p, &[]).build().unwrap();
        let mut program = b.build();
        program
            .rule_mut(RuleId::new(0))
            .body
            .push(Conjunct::call(ConstraintId::new(42), Vec::new()));

        let mut engine = FactEngine::new();
        let err = tell_body(&mut engine, &program, RuleId::new(0)).unwrap_err();
        assert!(matches!(err, AnalysisError::Internal { .. }));
    }

    #[test]
    fn test_program_facts() {
        let mut b = ProgramBuilder::new();
        let p = b.constraint("p", 1);
        let q = b.constraint("q", 1);
        b.rule("pq").kept(p, &["X"]).kept(q, &["X"]).build().unwrap();
        b.rule("emit").kept(p, &["X"]).call(q, &["X"]).build().unwrap();
        let program = b.build();

        let mut engine = FactEngine::new();
        tell_program(&mut engine, &program).unwrap();
        let emit = Node::Body(RuleId::new(1));
        assert!(engine.ask(Relation::Tells, Node::Constraint(p), Node::Constraint(q)));
        assert!(engine.ask(Relation::Observes, Node::Constraint(p), emit));
        assert!(!engine.ask(Relation::Observes, Node::Constraint(q), Node::Body(RuleId::new(0))));
    }
}
