//! Propagation history analysis
//!
//! A propagation rule keeps its head, so without a history the same tuple
//! of instances could fire it again. This pass proves, per active
//! occurrence, that no such second firing can happen and clears
//! `check_history` there. A rule whose active occurrences are all cleared
//! drops its history entirely.
//!
//! Must run after the observation pass: the decisions depend on which
//! occurrences keep their active instance stored.

use super::{tell_program, AnalysisError};
use crate::constraint::Occurrence;
use crate::facts::{FactEngine, Node, Relation};
use crate::program::{ConstraintId, OccurrenceId, Program, RuleId};
use tracing::{debug, instrument, trace};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryStats {
    /// Active occurrences that no longer check the history.
    pub occurrences_optimized: usize,
    /// Propagation rules that no longer keep a history.
    pub rules_optimized: usize,
    /// Of those, rules already decided by the cheap pre-pass.
    pub rules_prepass: usize,
}

pub struct HistoryAnalysis {
    engine: FactEngine,
    duplicate_elision: bool,
}

impl HistoryAnalysis {
    /// `duplicate_elision`: generated code already suppresses a rule
    /// re-firing on the very tuple that is currently active.
    pub fn new(program: &Program, duplicate_elision: bool) -> Result<Self, AnalysisError> {
        let mut engine = FactEngine::new();
        tell_program(&mut engine, program)?;
        Ok(HistoryAnalysis {
            engine,
            duplicate_elision,
        })
    }

    #[instrument(skip_all, name = "history")]
    pub fn analyze(program: &mut Program, duplicate_elision: bool) -> Result<HistoryStats, AnalysisError> {
        let mut analysis = Self::new(program, duplicate_elision)?;
        let mut stats = HistoryStats::default();

        prepass(program, &mut stats);

        let constraints: Vec<_> = program.constraint_ids().collect();
        for c in constraints {
            analysis.analyze_constraint(program, c, &mut stats)?;
        }

        let rules: Vec<_> = program.rule_ids().collect();
        for r in rules {
            let rule = program.rule(r);
            if !rule.needs_history || !rule.is_propagation() {
                continue;
            }
            let all_cleared = rule
                .positive_head
                .iter()
                .map(|&o| program.occurrence(o))
                .filter(|o| o.is_active())
                .all(|o| !o.check_history);
            if all_cleared {
                clear_rule(program, r);
                stats.rules_optimized += 1;
            }
        }

        debug!(
            occurrences = stats.occurrences_optimized,
            rules = stats.rules_optimized,
            "history done"
        );
        Ok(stats)
    }

    fn analyze_constraint(
        &mut self,
        program: &mut Program,
        c: ConstraintId,
        stats: &mut HistoryStats,
    ) -> Result<(), AnalysisError> {
        let mut stored_before = false;
        for o in program.active_occurrences(c) {
            let occ = program.occurrence(o);
            if program.rule(occ.rule).needs_history
                && occ.check_history
                && !self.needs_check(program, o, stored_before)?
            {
                program.occurrence_mut(o).check_history = false;
                stats.occurrences_optimized += 1;
                trace!(occurrence = %o, stored_before, "history check elided");
            }
            stored_before |= program.occurrence(o).stored;
        }
        Ok(())
    }

    /// Whether a firing through active occurrence `o` may later be repeated
    /// on the same tuple of instances.
    fn needs_check(
        &mut self,
        program: &Program,
        o: OccurrenceId,
        stored_before: bool,
    ) -> Result<bool, AnalysisError> {
        let occ = program.occurrence(o);
        let c = occ.constraint;
        let body = Node::Body(occ.rule);
        let self_reactivated = self.engine.ask_reactivates(body, c);
        let partners = program.positive_partners(o);

        if partners.is_empty() {
            // only an instance stored by an earlier occurrence can come back here
            return Ok(stored_before && self_reactivated);
        }

        let partner_refired = partners.iter().any(|&p| {
            let pc = program.occurrence(p).constraint;
            self.engine.ask_reactivates(body, pc)
                || self.engine.ask(Relation::Tells, body, Node::Constraint(pc))
        });
        if stored_before && ((self_reactivated && !self.duplicate_elision) || partner_refired) {
            return Ok(true);
        }

        if occ.stored && partners.iter().any(|&p| !is_singleton_lookup(program, occ, p)) {
            let observed = self
                .engine
                .with_self(c, |e| e.ask(Relation::Observes, Node::Constraint(c), body))?;
            return Ok(observed);
        }
        Ok(false)
    }
}

/// Rules decided without consulting the fact engine.
fn prepass(program: &mut Program, stats: &mut HistoryStats) {
    let rules: Vec<_> = program.rule_ids().collect();
    for r in rules {
        let rule = program.rule(r);
        if !rule.needs_history {
            continue;
        }
        if !rule.is_propagation() {
            // a removed head instance cannot take part in a second firing
            clear_rule(program, r);
            continue;
        }
        let never_stored = rule
            .positive_head
            .iter()
            .any(|&o| !program.constraint(program.occurrence(o).constraint).may_be_stored);
        let idempotent = rule.head_len() > 1 && program.is_body_idempotent(r);
        if never_stored || idempotent {
            trace!(rule = %rule.name, never_stored, idempotent, "history skipped");
            clear_rule(program, r);
            stats.rules_optimized += 1;
            stats.rules_prepass += 1;
        }
    }
}

fn clear_rule(program: &mut Program, r: RuleId) {
    let rule = program.rule_mut(r);
    rule.needs_history = false;
    let head = rule.positive_head.clone();
    for o in head {
        program.occurrence_mut(o).check_history = false;
    }
}

/// The lookup from `active` to `partner` can match at most one instance.
/// Without an assigned lookup nothing is known.
fn is_singleton_lookup(program: &Program, active: &Occurrence, partner: OccurrenceId) -> bool {
    let Some(lookup) = active.lookup_for(partner) else {
        return false;
    };
    let p = program.occurrence(partner);
    program
        .constraint(p.constraint)
        .lookup_categories
        .get(lookup.category)
        .map_or(false, |category| category.is_singleton(p.arity()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::LookupAssignment;
    use crate::program::{ConstraintDecl, ProgramBuilder};

    fn check_flags(program: &Program, r: usize) -> Vec<bool> {
        program
            .rule(RuleId::new(r))
            .positive_head
            .iter()
            .map(|&o| program.occurrence(o).check_history)
            .collect()
    }

    #[test]
    fn test_simplification_rules_never_need_history() {
        let mut b = ProgramBuilder::new();
        let p = b.constraint("p", 1);
        b.rule("drop").removed(p, &["X"]).build().unwrap();
        let mut program = b.build();
        let stats = HistoryAnalysis::analyze(&mut program, true).unwrap();

        assert!(!program.rule(RuleId::new(0)).needs_history);
        assert_eq!(stats.rules_optimized, 0);
    }

    #[test]
    fn test_idempotent_body_skips_history() {
        let mut b = ProgramBuilder::new();
        let p = b.declare(ConstraintDecl::new("p", 1).reactive()).unwrap();
        let s = b.declare(ConstraintDecl::new("s", 1).set_semantics()).unwrap();
        b.rule("pair").kept(p, &["X"]).kept(p, &["Y"]).call(s, &["X"]).build().unwrap();
        b.rule("back").kept(s, &["X"]).call(p, &["X"]).build().unwrap();
        let mut program = b.build();
        let stats = HistoryAnalysis::analyze(&mut program, false).unwrap();

        assert!(!program.rule(RuleId::new(0)).needs_history);
        assert_eq!(check_flags(&program, 0), vec![false, false]);
        assert_eq!(stats.rules_prepass, 1);
    }

    #[test]
    fn test_never_stored_partner_skips_history() {
        let mut b = ProgramBuilder::new();
        let p = b.constraint("p", 1);
        let e = b.declare(ConstraintDecl::new("event", 1).never_stored()).unwrap();
        b.rule("r").kept(p, &["X"]).kept(e, &["X"]).call(p, &["X"]).build().unwrap();
        let mut program = b.build();
        HistoryAnalysis::analyze(&mut program, true).unwrap();
        assert!(!program.rule(RuleId::new(0)).needs_history);
    }

    #[test]
    fn test_single_headed_reactivation() {
        let mut b = ProgramBuilder::new();
        let watched = b.declare(ConstraintDecl::new("watched", 1).reactive()).unwrap();
        let plain = b.constraint("plain", 1);
        let log = b.constraint("log", 0);
        b.rule("seen").kept(watched, &["X"]).call(log, &[]).build().unwrap();
        b.rule("bind").kept(watched, &["X"]).triggering().build().unwrap();
        b.rule("bind_plain").kept(plain, &["X"]).triggering().build().unwrap();
        let mut program = b.build();
        let stats = HistoryAnalysis::analyze(&mut program, true).unwrap();

        // stored at `seen`, then woken up again by its own trigger
        assert!(program.rule(RuleId::new(1)).needs_history);
        assert!(!program.rule(RuleId::new(0)).needs_history);
        assert!(!program.rule(RuleId::new(2)).needs_history);
        assert_eq!(stats.occurrences_optimized, 2);
        assert_eq!(stats.rules_optimized, 2);
    }

    #[test]
    fn test_first_occurrence_skips_history() {
        let mut b = ProgramBuilder::new();
        let watched = b.declare(ConstraintDecl::new("watched", 1).reactive()).unwrap();
        b.rule("bind").kept(watched, &["X"]).triggering().build().unwrap();
        let mut program = b.build();
        HistoryAnalysis::analyze(&mut program, true).unwrap();

        assert_eq!(check_flags(&program, 0), vec![false]);
        assert!(!program.rule(RuleId::new(0)).needs_history);
    }

    #[test]
    fn test_three_headed_rule_keeps_history_when_partner_returns() {
        // p(X), q(X), r(X) ==> s(X).  s(X) ==> q(X).
        let mut b = ProgramBuilder::new();
        let p = b.constraint("p", 1);
        let q = b.constraint("q", 1);
        let r = b.constraint("r", 1);
        let s = b.constraint("s", 1);
        b.rule("pqr")
            .kept(p, &["X"])
            .kept(q, &["X"])
            .kept(r, &["X"])
            .call(s, &["X"])
            .build()
            .unwrap();
        b.rule("echo").kept(s, &["X"]).call(q, &["X"]).build().unwrap();
        let mut program = b.build();
        let stats = HistoryAnalysis::analyze(&mut program, true).unwrap();

        assert_eq!(check_flags(&program, 0), vec![true, true, true]);
        assert!(program.rule(RuleId::new(0)).needs_history);
        assert_eq!(stats.rules_prepass, 0);
    }

    #[test]
    fn test_three_headed_silent_rule_drops_history() {
        // p(X), q(X), r(X) ==> s(X).
        let mut b = ProgramBuilder::new();
        let p = b.constraint("p", 1);
        let q = b.constraint("q", 1);
        let r = b.constraint("r", 1);
        let s = b.constraint("s", 1);
        b.rule("pqr")
            .kept(p, &["X"])
            .kept(q, &["X"])
            .kept(r, &["X"])
            .call(s, &["X"])
            .build()
            .unwrap();
        let mut program = b.build();
        let stats = HistoryAnalysis::analyze(&mut program, true).unwrap();

        assert_eq!(check_flags(&program, 0), vec![false, false, false]);
        assert!(!program.rule(RuleId::new(0)).needs_history);
        assert_eq!(stats.occurrences_optimized, 3);
        assert_eq!(stats.rules_optimized, 1);
        assert_eq!(stats.rules_prepass, 0);
    }

    #[test]
    fn test_silent_binary_rule_drops_history() {
        let mut b = ProgramBuilder::new();
        let p = b.constraint("p", 1);
        let q = b.constraint("q", 1);
        let r = b.constraint("r", 1);
        b.rule("pq").kept(p, &["X"]).kept(q, &["X"]).call(r, &["X"]).build().unwrap();
        let mut program = b.build();
        let stats = HistoryAnalysis::analyze(&mut program, true).unwrap();

        assert_eq!(check_flags(&program, 0), vec![false, false]);
        assert!(!program.rule(RuleId::new(0)).needs_history);
        assert_eq!(stats.occurrences_optimized, 2);
        assert_eq!(stats.rules_prepass, 0);
    }

    #[test]
    fn test_body_reaching_partner_keeps_history() {
        let mut b = ProgramBuilder::new();
        let p = b.constraint("p", 1);
        let q = b.constraint("q", 1);
        let s = b.constraint("s", 1);
        b.rule("pq").kept(p, &["X"]).kept(q, &["X"]).call(s, &["X"]).build().unwrap();
        b.rule("sq").kept(s, &["X"]).call(q, &["X"]).build().unwrap();
        let mut program = b.build();
        HistoryAnalysis::analyze(&mut program, true).unwrap();

        assert_eq!(check_flags(&program, 0), vec![true, true]);
        assert!(program.rule(RuleId::new(0)).needs_history);
    }

    #[test]
    fn test_duplicate_elision_covers_self_reactivation() {
        let build = || {
            let mut b = ProgramBuilder::new();
            let p = b.declare(ConstraintDecl::new("p", 1).reactive()).unwrap();
            let q = b.declare(ConstraintDecl::new("q", 1).set_semantics()).unwrap();
            let r = b.constraint("r", 0);
            b.rule("first").kept(p, &["X"]).call(r, &[]).build().unwrap();
            b.rule("second").kept(p, &["X"]).kept(q, &["X"]).triggering().build().unwrap();
            let mut program = b.build();
            LookupAssignment::analyze(&mut program, true).unwrap();
            program
        };

        let mut elided = build();
        HistoryAnalysis::analyze(&mut elided, true).unwrap();
        assert!(!check_flags(&elided, 1)[0]);

        let mut plain = build();
        HistoryAnalysis::analyze(&mut plain, false).unwrap();
        assert!(check_flags(&plain, 1)[0]);
    }
}
