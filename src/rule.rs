//! Rule representation for CHR programs.
//!
//! A rule consists of a positive head, zero or more negative heads, a guard
//! and a body of conjuncts. Head arguments are variables; equalities between
//! head arguments live in the guard.

use crate::join::JoinHints;
use crate::program::{ConstraintId, OccurrenceId, RuleId, VarId};
use std::fmt;
use std::rc::Rc;

/// Shape of a guard conjunct.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum GuardKind {
    /// `X == Y` (also used for enum constant comparisons after normalisation)
    Equals(VarId, VarId),
    /// Any other ask condition over its variables.
    Test,
}

/// One ask condition of a guard.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GuardConjunct {
    pub kind: GuardKind,
    /// Variables that must be bound before the condition can be evaluated.
    pub vars: Vec<VarId>,
}

impl GuardConjunct {
    pub fn equals(left: VarId, right: VarId) -> Self {
        GuardConjunct {
            kind: GuardKind::Equals(left, right),
            vars: vec![left, right],
        }
    }

    pub fn test(vars: Vec<VarId>) -> Self {
        GuardConjunct {
            kind: GuardKind::Test,
            vars,
        }
    }
}

/// A built-in body call.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BuiltIn {
    pub name: Rc<str>,
    /// Executing it twice has the same effect as once.
    pub idempotent: bool,
    /// Generated code may re-enter the handler, so stack frames matter.
    pub warrants_stack_optimization: bool,
}

/// A body conjunct, classified by what it may cause at runtime.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Conjunct {
    /// Call of a user-defined constraint.
    UserDefined {
        constraint: ConstraintId,
        args: Vec<VarId>,
    },
    BuiltIn(BuiltIn),
    /// May reactivate any reactive constraint (e.g. a unification).
    Triggering,
    /// Arbitrary foreign code.
    Pessimistic,
    /// No observable effect on the constraint store.
    Free,
}

impl Conjunct {
    pub fn call(constraint: ConstraintId, args: Vec<VarId>) -> Self {
        Conjunct::UserDefined { constraint, args }
    }

    pub fn built_in(name: &str, idempotent: bool, warrants_stack_optimization: bool) -> Self {
        Conjunct::BuiltIn(BuiltIn {
            name: name.into(),
            idempotent,
            warrants_stack_optimization,
        })
    }
}

/// A negative head: the rule only fires if no match for it exists.
#[derive(Clone, Debug, Default)]
pub struct NegativeHead {
    pub occurrences: Vec<OccurrenceId>,
    pub guard: Vec<GuardConjunct>,
}

/// Rule classification by head dispositions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuleKind {
    /// Every positive occurrence is kept.
    Propagation,
    /// Every positive occurrence is removed.
    Simplification,
    Simpagation,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Propagation => write!(f, "propagation"),
            RuleKind::Simplification => write!(f, "simplification"),
            RuleKind::Simpagation => write!(f, "simpagation"),
        }
    }
}

/// A CHR rule.
#[derive(Clone, Debug)]
pub struct Rule {
    pub id: RuleId,
    pub name: Rc<str>,
    pub kind: RuleKind,
    /// Positive head occurrences, in textual order
    pub positive_head: Vec<OccurrenceId>,
    pub negative_heads: Vec<NegativeHead>,
    pub guard: Vec<GuardConjunct>,
    pub body: Vec<Conjunct>,
    /// Cleared once no active occurrence needs a propagation history check.
    pub needs_history: bool,
    pub join_hints: Option<JoinHints>,
}

impl Rule {
    /// Number of positive head occurrences.
    pub fn head_len(&self) -> usize {
        self.positive_head.len()
    }

    pub fn is_propagation(&self) -> bool {
        self.kind == RuleKind::Propagation
    }

    /// Every occurrence of the rule: positive head first, then negative heads.
    pub fn occurrences(&self) -> impl Iterator<Item = OccurrenceId> + '_ {
        self.positive_head.iter().copied().chain(
            self.negative_heads
                .iter()
                .flat_map(|n| n.occurrences.iter().copied()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_equals_records_both_vars() {
        let g = GuardConjunct::equals(VarId::new(0), VarId::new(3));
        assert_eq!(g.vars, vec![VarId::new(0), VarId::new(3)]);
        assert!(matches!(g.kind, GuardKind::Equals(_, _)));
    }

    #[test]
    fn test_built_in_flags() {
        match Conjunct::built_in("print", false, true) {
            Conjunct::BuiltIn(b) => {
                assert_eq!(&*b.name, "print");
                assert!(!b.idempotent);
                assert!(b.warrants_stack_optimization);
            }
            other => panic!("unexpected conjunct {:?}", other),
        }
    }

    #[test]
    fn test_rule_kind_display() {
        assert_eq!(RuleKind::Simpagation.to_string(), "simpagation");
    }
}
