//! Constraints and their head occurrences.
//!
//! A constraint owns the ordered list of its occurrences (declaration order
//! across all rules) and the lookup categories the generated store will
//! provide for it. Occurrences carry the per-occurrence flags the analyses
//! write back: `stored`, `check_history` and the chosen partner lookups.

use crate::intern::SymbolId;
use crate::lookup::{Lookup, LookupCategories};
use crate::program::{ConstraintId, OccurrenceId, RuleId, VarId};

/// Declaration modifiers of a constraint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Modifiers {
    pub private: bool,
    pub local: bool,
    /// Callable (and observable) from foreign code.
    pub exported: bool,
    /// Re-activated when one of its arguments is modified.
    pub reactive: bool,
}

impl Modifiers {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn exported() -> Self {
        Modifiers {
            exported: true,
            ..Self::default()
        }
    }

    pub fn with_reactive(mut self) -> Self {
        self.reactive = true;
        self
    }
}

/// Static type of a constraint argument, as far as indexing cares.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArgType {
    Boolean,
    /// Enumeration with a known number of constants
    Enum { variants: usize },
    Int,
    Other,
}

impl ArgType {
    /// Number of distinct values, if small and known.
    pub fn domain_size(&self) -> Option<usize> {
        match self {
            ArgType::Boolean => Some(2),
            ArgType::Enum { variants } => Some(*variants),
            ArgType::Int | ArgType::Other => None,
        }
    }
}

/// A user-defined CHR constraint.
#[derive(Clone, Debug)]
pub struct Constraint {
    pub id: ConstraintId,
    pub name: SymbolId,
    pub arity: usize,
    pub modifiers: Modifiers,
    pub arg_types: Vec<ArgType>,
    /// Duplicate instances are redundant (telling twice is idempotent).
    pub set_semantics: bool,
    /// Argument positions that functionally determine the others.
    pub functional_dependency: Option<Vec<usize>>,
    /// False when no code path ever keeps an instance in the store.
    pub may_be_stored: bool,
    /// Cleared when activations of this constraint provably never recurse.
    pub is_recursive: bool,
    /// Constraints some firing rooted at this one may remove.
    pub removees: Vec<ConstraintId>,
    /// Occurrences in declaration order.
    pub occurrences: Vec<OccurrenceId>,
    pub lookup_categories: LookupCategories,
}

impl Constraint {
    pub fn is_exported(&self) -> bool {
        self.modifiers.exported
    }

    pub fn is_reactive(&self) -> bool {
        self.modifiers.reactive
    }
}

/// Which head of its rule an occurrence belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeadRef {
    Positive,
    Negative(usize),
}

/// Whether a successful match keeps or removes the matched instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Disposition {
    Kept,
    Removed,
}

/// One textual appearance of a constraint in a rule head.
#[derive(Clone, Debug)]
pub struct Occurrence {
    pub id: OccurrenceId,
    pub constraint: ConstraintId,
    pub rule: RuleId,
    pub head: HeadRef,
    /// Position within its head.
    pub index: usize,
    /// 1-based number among the occurrences of its constraint.
    pub number: usize,
    pub passive: bool,
    pub disposition: Disposition,
    /// Argument variables, one per argument position.
    pub args: Vec<VarId>,
    /// The active instance must be in the store while this occurrence's body runs.
    pub stored: bool,
    pub check_history: bool,
    /// Partner lookups performed when this occurrence is active, in join order.
    pub lookups: Vec<Lookup>,
}

impl Occurrence {
    /// Only non-passive positive-head occurrences ever trigger a rule.
    pub fn is_active(&self) -> bool {
        !self.passive && self.head == HeadRef::Positive
    }

    pub fn is_removed(&self) -> bool {
        self.disposition == Disposition::Removed
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// The lookup used to find `partner` when this occurrence is active.
    pub fn lookup_for(&self, partner: OccurrenceId) -> Option<&Lookup> {
        self.lookups.iter().find(|l| l.partner == partner)
    }
}
