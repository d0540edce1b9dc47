//! CHR programs: the constraint/rule/occurrence graph the analyses traverse.
//!
//! Constraints, rules and occurrences live in flat vectors owned by
//! [`Program`] and refer to each other through copyable ids. The analyses
//! never add or remove nodes; they only write back flags.

use crate::constraint::{ArgType, Constraint, Disposition, HeadRef, Modifiers, Occurrence};
use crate::intern::SymbolTable;
use crate::lookup::LookupCategories;
use crate::rule::{Conjunct, GuardConjunct, NegativeHead, Rule, RuleKind};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use thiserror::Error;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            pub fn new(index: usize) -> Self {
                $name(index as u32)
            }

            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

define_id!(
    /// Index of a constraint in its program.
    ConstraintId,
    "c"
);
define_id!(
    /// Index of a rule in its program.
    RuleId,
    "r"
);
define_id!(
    /// Index of an occurrence in its program.
    OccurrenceId,
    "o"
);
define_id!(
    /// Rule-local variable.
    VarId,
    "V"
);

/// Errors raised while building a program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("constraint {0} is declared twice")]
    DuplicateConstraint(String),
    #[error("unknown constraint id {0}")]
    UnknownConstraint(ConstraintId),
    #[error("constraint {constraint}/{expected} used with {found} arguments")]
    ArityMismatch {
        constraint: String,
        expected: usize,
        found: usize,
    },
    #[error("constraint {constraint} declares {found} argument types for arity {expected}")]
    ArgTypeCount {
        constraint: String,
        expected: usize,
        found: usize,
    },
    #[error("functional dependency of {constraint} names position {position} out of range")]
    InvalidDependency { constraint: String, position: usize },
    #[error("rule {0} has an empty positive head")]
    EmptyHead(String),
    #[error("guard of rule {rule} uses variable {var} not bound by its head")]
    UnboundGuardVariable { rule: String, var: String },
    #[error("passive marker in rule {0} without a preceding head occurrence")]
    DanglingPassive(String),
}

/// A complete CHR program.
#[derive(Clone, Debug, Default)]
pub struct Program {
    symbols: SymbolTable,
    constraints: Vec<Constraint>,
    rules: Vec<Rule>,
    occurrences: Vec<Occurrence>,
}

impl Program {
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn occurrences(&self) -> &[Occurrence] {
        &self.occurrences
    }

    pub fn constraint(&self, id: ConstraintId) -> &Constraint {
        &self.constraints[id.index()]
    }

    pub fn constraint_mut(&mut self, id: ConstraintId) -> &mut Constraint {
        &mut self.constraints[id.index()]
    }

    pub fn try_constraint(&self, id: ConstraintId) -> Option<&Constraint> {
        self.constraints.get(id.index())
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.index()]
    }

    pub fn rule_mut(&mut self, id: RuleId) -> &mut Rule {
        &mut self.rules[id.index()]
    }

    pub fn occurrence(&self, id: OccurrenceId) -> &Occurrence {
        &self.occurrences[id.index()]
    }

    pub fn occurrence_mut(&mut self, id: OccurrenceId) -> &mut Occurrence {
        &mut self.occurrences[id.index()]
    }

    pub fn constraint_ids(&self) -> impl Iterator<Item = ConstraintId> {
        (0..self.constraints.len()).map(ConstraintId::new)
    }

    pub fn rule_ids(&self) -> impl Iterator<Item = RuleId> {
        (0..self.rules.len()).map(RuleId::new)
    }

    pub fn constraint_by_name(&self, name: &str) -> Option<ConstraintId> {
        let sym = self.symbols.get(name)?;
        self.constraints.iter().find(|c| c.name == sym).map(|c| c.id)
    }

    pub fn constraint_name(&self, id: ConstraintId) -> &str {
        self.symbols.resolve(self.constraint(id).name)
    }

    /// Active occurrences of a constraint, in declaration order.
    pub fn active_occurrences(&self, id: ConstraintId) -> Vec<OccurrenceId> {
        self.constraint(id)
            .occurrences
            .iter()
            .copied()
            .filter(|&o| self.occurrence(o).is_active())
            .collect()
    }

    /// Partners of an active occurrence in join order: the rest of the
    /// positive head in textual order, then every negative head.
    pub fn partners(&self, active: OccurrenceId) -> Vec<OccurrenceId> {
        let rule = self.rule(self.occurrence(active).rule);
        rule.occurrences().filter(|&o| o != active).collect()
    }

    /// Positive-head partners of an active occurrence.
    pub fn positive_partners(&self, active: OccurrenceId) -> Vec<OccurrenceId> {
        let rule = self.rule(self.occurrence(active).rule);
        rule.positive_head
            .iter()
            .copied()
            .filter(|&o| o != active)
            .collect()
    }

    /// Re-executing the body of this rule cannot change the outcome.
    pub fn is_body_idempotent(&self, rule: RuleId) -> bool {
        self.rule(rule).body.iter().all(|conjunct| match conjunct {
            Conjunct::Free => true,
            Conjunct::BuiltIn(b) => b.idempotent,
            Conjunct::UserDefined { constraint, .. } => self
                .try_constraint(*constraint)
                .map_or(false, |c| c.set_semantics),
            Conjunct::Triggering | Conjunct::Pessimistic => false,
        })
    }
}

/// Declaration of a constraint, filled in builder style.
#[derive(Clone, Debug)]
pub struct ConstraintDecl {
    name: String,
    arity: usize,
    modifiers: Modifiers,
    arg_types: Option<Vec<ArgType>>,
    set_semantics: bool,
    functional_dependency: Option<Vec<usize>>,
    may_be_stored: bool,
}

impl ConstraintDecl {
    pub fn new(name: &str, arity: usize) -> Self {
        ConstraintDecl {
            name: name.to_string(),
            arity,
            modifiers: Modifiers::none(),
            arg_types: None,
            set_semantics: false,
            functional_dependency: None,
            may_be_stored: true,
        }
    }

    pub fn modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn exported(mut self) -> Self {
        self.modifiers.exported = true;
        self
    }

    pub fn reactive(mut self) -> Self {
        self.modifiers.reactive = true;
        self
    }

    pub fn arg_types(mut self, types: Vec<ArgType>) -> Self {
        self.arg_types = Some(types);
        self
    }

    pub fn set_semantics(mut self) -> Self {
        self.set_semantics = true;
        self
    }

    /// Set semantics with `key` positions determining the remaining ones.
    pub fn functional_dependency(mut self, key: Vec<usize>) -> Self {
        self.set_semantics = true;
        self.functional_dependency = Some(key);
        self
    }

    pub fn never_stored(mut self) -> Self {
        self.may_be_stored = false;
        self
    }
}

/// Builder for [`Program`]s.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a plain constraint, or return the one already declared under `name`.
    pub fn constraint(&mut self, name: &str, arity: usize) -> ConstraintId {
        if let Some(id) = self.program.constraint_by_name(name) {
            return id;
        }
        self.push_constraint(ConstraintDecl::new(name, arity), vec![ArgType::Other; arity])
    }

    pub fn declare(&mut self, decl: ConstraintDecl) -> Result<ConstraintId, ModelError> {
        if self.program.constraint_by_name(&decl.name).is_some() {
            return Err(ModelError::DuplicateConstraint(decl.name));
        }
        let arg_types = match &decl.arg_types {
            Some(types) if types.len() != decl.arity => {
                return Err(ModelError::ArgTypeCount {
                    constraint: decl.name.clone(),
                    expected: decl.arity,
                    found: types.len(),
                })
            }
            Some(types) => types.clone(),
            None => vec![ArgType::Other; decl.arity],
        };
        if let Some(key) = &decl.functional_dependency {
            if let Some(&position) = key.iter().find(|&&p| p >= decl.arity) {
                return Err(ModelError::InvalidDependency {
                    constraint: decl.name.clone(),
                    position,
                });
            }
        }
        Ok(self.push_constraint(decl, arg_types))
    }

    fn push_constraint(&mut self, decl: ConstraintDecl, arg_types: Vec<ArgType>) -> ConstraintId {
        let id = ConstraintId::new(self.program.constraints.len());
        let name = self.program.symbols.intern(&decl.name);
        self.program.constraints.push(Constraint {
            id,
            name,
            arity: decl.arity,
            modifiers: decl.modifiers,
            arg_types,
            set_semantics: decl.set_semantics,
            functional_dependency: decl.functional_dependency,
            may_be_stored: decl.may_be_stored,
            is_recursive: true,
            removees: Vec::new(),
            occurrences: Vec::new(),
            lookup_categories: LookupCategories::new(),
        });
        id
    }

    pub fn rule(&mut self, name: &str) -> RuleBuilder<'_> {
        RuleBuilder {
            builder: self,
            name: name.to_string(),
            vars: FxHashMap::default(),
            positive: Vec::new(),
            negatives: Vec::new(),
            guard: Vec::new(),
            body: Vec::new(),
            error: None,
        }
    }

    pub fn build(self) -> Program {
        self.program
    }
}

#[derive(Debug)]
struct PendingOccurrence {
    constraint: ConstraintId,
    args: Vec<VarId>,
    disposition: Disposition,
    passive: bool,
}

#[derive(Debug, Default)]
struct PendingNegative {
    occurrences: Vec<PendingOccurrence>,
    guard: Vec<GuardConjunct>,
}

/// Builder for a single rule. Errors are deferred to [`RuleBuilder::build`].
pub struct RuleBuilder<'a> {
    builder: &'a mut ProgramBuilder,
    name: String,
    vars: FxHashMap<String, VarId>,
    positive: Vec<PendingOccurrence>,
    negatives: Vec<PendingNegative>,
    guard: Vec<GuardConjunct>,
    body: Vec<Conjunct>,
    error: Option<ModelError>,
}

impl<'a> RuleBuilder<'a> {
    fn var(&mut self, name: &str) -> VarId {
        let next = VarId::new(self.vars.len());
        *self.vars.entry(name.to_string()).or_insert(next)
    }

    fn vars_of(&mut self, names: &[&str]) -> Vec<VarId> {
        names.iter().map(|n| self.var(n)).collect()
    }

    fn fail(&mut self, error: ModelError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Records an error unless `constraint` exists and takes `args.len()` arguments.
    fn check_args(&mut self, constraint: ConstraintId, args: &[&str]) -> bool {
        let Some(decl) = self.builder.program.try_constraint(constraint) else {
            self.fail(ModelError::UnknownConstraint(constraint));
            return false;
        };
        if decl.arity != args.len() {
            let error = ModelError::ArityMismatch {
                constraint: self.builder.program.constraint_name(constraint).to_string(),
                expected: decl.arity,
                found: args.len(),
            };
            self.fail(error);
            return false;
        }
        true
    }

    fn occurrence(
        &mut self,
        constraint: ConstraintId,
        args: &[&str],
        disposition: Disposition,
    ) -> Option<PendingOccurrence> {
        if !self.check_args(constraint, args) {
            return None;
        }
        Some(PendingOccurrence {
            constraint,
            args: self.vars_of(args),
            disposition,
            passive: false,
        })
    }

    /// Add a kept positive head occurrence.
    pub fn kept(mut self, constraint: ConstraintId, args: &[&str]) -> Self {
        if let Some(o) = self.occurrence(constraint, args, Disposition::Kept) {
            self.positive.push(o);
        }
        self
    }

    /// Add a removed positive head occurrence.
    pub fn removed(mut self, constraint: ConstraintId, args: &[&str]) -> Self {
        if let Some(o) = self.occurrence(constraint, args, Disposition::Removed) {
            self.positive.push(o);
        }
        self
    }

    /// Mark the most recent positive occurrence passive.
    pub fn passive(mut self) -> Self {
        match self.positive.last_mut() {
            Some(o) => o.passive = true,
            None => {
                let name = self.name.clone();
                self.fail(ModelError::DanglingPassive(name));
            }
        }
        self
    }

    /// Start a new negative head with one occurrence.
    pub fn negated(mut self, constraint: ConstraintId, args: &[&str]) -> Self {
        if let Some(mut o) = self.occurrence(constraint, args, Disposition::Kept) {
            o.passive = true;
            self.negatives.push(PendingNegative {
                occurrences: vec![o],
                guard: Vec::new(),
            });
        }
        self
    }

    /// Add an equality to the guard of the most recent negative head.
    pub fn negated_guard_eq(mut self, left: &str, right: &str) -> Self {
        let g = GuardConjunct::equals(self.var(left), self.var(right));
        match self.negatives.last_mut() {
            Some(n) => n.guard.push(g),
            None => self.guard.push(g),
        }
        self
    }

    pub fn guard_eq(mut self, left: &str, right: &str) -> Self {
        let g = GuardConjunct::equals(self.var(left), self.var(right));
        self.guard.push(g);
        self
    }

    pub fn guard_test(mut self, vars: &[&str]) -> Self {
        let vars = self.vars_of(vars);
        self.guard.push(GuardConjunct::test(vars));
        self
    }

    /// Append a user-defined call to the body.
    pub fn call(mut self, constraint: ConstraintId, args: &[&str]) -> Self {
        if !self.check_args(constraint, args) {
            return self;
        }
        let args = self.vars_of(args);
        self.body.push(Conjunct::call(constraint, args));
        self
    }

    pub fn built_in(mut self, name: &str, idempotent: bool, stack: bool) -> Self {
        self.body.push(Conjunct::built_in(name, idempotent, stack));
        self
    }

    pub fn triggering(mut self) -> Self {
        self.body.push(Conjunct::Triggering);
        self
    }

    pub fn pessimistic(mut self) -> Self {
        self.body.push(Conjunct::Pessimistic);
        self
    }

    pub fn free(mut self) -> Self {
        self.body.push(Conjunct::Free);
        self
    }

    fn check_guard(&self, guard: &[GuardConjunct], bound: &FxHashSet<VarId>) -> Result<(), ModelError> {
        for g in guard {
            if let Some(v) = g.vars.iter().find(|v| !bound.contains(v)) {
                let var = self
                    .vars
                    .iter()
                    .find(|(_, id)| *id == v)
                    .map(|(name, _)| name.clone())
                    .unwrap_or_else(|| v.to_string());
                return Err(ModelError::UnboundGuardVariable {
                    rule: self.name.clone(),
                    var,
                });
            }
        }
        Ok(())
    }

    pub fn build(self) -> Result<RuleId, ModelError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if self.positive.is_empty() {
            return Err(ModelError::EmptyHead(self.name));
        }

        let positive_vars: FxHashSet<VarId> = self
            .positive
            .iter()
            .flat_map(|o| o.args.iter().copied())
            .collect();
        self.check_guard(&self.guard, &positive_vars)?;
        for negative in &self.negatives {
            let mut bound = positive_vars.clone();
            bound.extend(negative.occurrences.iter().flat_map(|o| o.args.iter().copied()));
            self.check_guard(&negative.guard, &bound)?;
        }

        let removed = self
            .positive
            .iter()
            .filter(|o| o.disposition == Disposition::Removed)
            .count();
        let kind = if removed == 0 {
            RuleKind::Propagation
        } else if removed == self.positive.len() {
            RuleKind::Simplification
        } else {
            RuleKind::Simpagation
        };

        let program = &mut self.builder.program;
        let rule_id = RuleId::new(program.rules.len());

        let mut push = |pending: PendingOccurrence, head: HeadRef, index: usize| {
            let id = OccurrenceId::new(program.occurrences.len());
            let constraint = &mut program.constraints[pending.constraint.index()];
            constraint.occurrences.push(id);
            program.occurrences.push(Occurrence {
                id,
                constraint: pending.constraint,
                rule: rule_id,
                head,
                index,
                number: constraint.occurrences.len(),
                passive: pending.passive,
                disposition: pending.disposition,
                args: pending.args,
                stored: true,
                check_history: true,
                lookups: Vec::new(),
            });
            id
        };

        let positive_head = self
            .positive
            .into_iter()
            .enumerate()
            .map(|(i, o)| push(o, HeadRef::Positive, i))
            .collect();
        let negative_heads = self
            .negatives
            .into_iter()
            .enumerate()
            .map(|(n, negative)| NegativeHead {
                occurrences: negative
                    .occurrences
                    .into_iter()
                    .enumerate()
                    .map(|(i, o)| push(o, HeadRef::Negative(n), i))
                    .collect(),
                guard: negative.guard,
            })
            .collect();

        program.rules.push(Rule {
            id: rule_id,
            name: self.name.as_str().into(),
            kind,
            positive_head,
            negative_heads,
            guard: self.guard,
            body: self.body,
            needs_history: true,
            join_hints: None,
        });
        Ok(rule_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leq_program() -> Program {
        let mut b = ProgramBuilder::new();
        let leq = b.constraint("leq", 2);
        b.rule("reflexivity")
            .removed(leq, &["X", "Y"])
            .guard_eq("X", "Y")
            .build()
            .unwrap();
        b.rule("antisymmetry")
            .removed(leq, &["X", "Y"])
            .removed(leq, &["Y", "X"])
            .triggering()
            .build()
            .unwrap();
        b.rule("transitivity")
            .kept(leq, &["X", "Y"])
            .kept(leq, &["Y", "Z"])
            .call(leq, &["X", "Z"])
            .build()
            .unwrap();
        b.build()
    }

    #[test]
    fn test_occurrences_in_declaration_order() {
        let program = leq_program();
        let leq = program.constraint_by_name("leq").unwrap();
        let numbers: Vec<_> = program
            .constraint(leq)
            .occurrences
            .iter()
            .map(|&o| program.occurrence(o).number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_rule_kinds() {
        let program = leq_program();
        let kinds: Vec<_> = program.rules().iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RuleKind::Simplification,
                RuleKind::Simplification,
                RuleKind::Propagation
            ]
        );
    }

    #[test]
    fn test_shared_variables_share_ids() {
        let program = leq_program();
        let transitivity = program.rule(RuleId::new(2));
        let first = program.occurrence(transitivity.positive_head[0]);
        let second = program.occurrence(transitivity.positive_head[1]);
        assert_eq!(first.args[1], second.args[0]);
    }

    #[test]
    fn test_partners_in_join_order() {
        let mut b = ProgramBuilder::new();
        let p = b.constraint("p", 1);
        let q = b.constraint("q", 1);
        let r = b.constraint("r", 1);
        b.rule("neg")
            .kept(p, &["X"])
            .kept(q, &["X"])
            .negated(r, &["X"])
            .build()
            .unwrap();
        let program = b.build();
        let rule = program.rule(RuleId::new(0));
        let partners = program.partners(rule.positive_head[1]);
        assert_eq!(
            partners,
            vec![rule.positive_head[0], rule.negative_heads[0].occurrences[0]]
        );
        assert!(!program.occurrence(rule.negative_heads[0].occurrences[0]).is_active());
    }

    #[test]
    fn test_arity_mismatch() {
        let mut b = ProgramBuilder::new();
        let p = b.constraint("p", 2);
        let err = b.rule("bad").kept(p, &["X"]).build().unwrap_err();
        assert!(matches!(err, ModelError::ArityMismatch { expected: 2, found: 1, .. }));
    }

    #[test]
    fn test_body_call_is_checked() {
        let mut b = ProgramBuilder::new();
        let p = b.constraint("p", 1);
        let err = b
            .rule("wide")
            .kept(p, &["X"])
            .call(p, &["X", "Y"])
            .build()
            .unwrap_err();
        assert!(matches!(err, ModelError::ArityMismatch { expected: 1, found: 2, .. }));

        let err = b
            .rule("dangling")
            .kept(p, &["X"])
            .call(ConstraintId::new(99), &[])
            .build()
            .unwrap_err();
        assert_eq!(err, ModelError::UnknownConstraint(ConstraintId::new(99)));
        assert!(b.build().rules().is_empty());
    }

    #[test]
    fn test_unbound_guard_variable() {
        let mut b = ProgramBuilder::new();
        let p = b.constraint("p", 1);
        let err = b
            .rule("bad")
            .kept(p, &["X"])
            .guard_test(&["Y"])
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::UnboundGuardVariable {
                rule: "bad".to_string(),
                var: "Y".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_declaration() {
        let mut b = ProgramBuilder::new();
        b.constraint("p", 1);
        let err = b.declare(ConstraintDecl::new("p", 2)).unwrap_err();
        assert_eq!(err, ModelError::DuplicateConstraint("p".to_string()));
    }

    #[test]
    fn test_invalid_dependency() {
        let mut b = ProgramBuilder::new();
        let err = b
            .declare(ConstraintDecl::new("fd", 2).functional_dependency(vec![2]))
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidDependency { position: 2, .. }));
    }

    #[test]
    fn test_body_idempotence() {
        let mut b = ProgramBuilder::new();
        let p = b.constraint("p", 1);
        let s = b
            .declare(ConstraintDecl::new("s", 1).set_semantics())
            .unwrap();
        let idem = b
            .rule("idem")
            .kept(p, &["X"])
            .call(s, &["X"])
            .built_in("min", true, false)
            .build()
            .unwrap();
        let not_idem = b.rule("counting").kept(p, &["X"]).call(p, &["X"]).build().unwrap();
        let program = b.build();
        assert!(program.is_body_idempotent(idem));
        assert!(!program.is_body_idempotent(not_idem));
    }
}
