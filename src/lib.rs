//! chr-analysis: the optimizing analysis core of a Constraint Handling Rules compiler.
//!
//! This crate provides:
//! - A program model (constraints, rules, occurrences) with a builder
//! - Lookup types, lookup categories and index selection
//! - Join graphs with maximal-clique enumeration
//! - An ask/tell fact engine over the activation graph
//! - History, observation, removal and recursion analyses
//! - A driver running every pass in dependency order

pub mod analysis;
pub mod constraint;
pub mod facts;
pub mod intern;
pub mod join;
pub mod lookup;
pub mod optimizer;
pub mod program;
pub mod rule;

// Re-exports for convenience
pub use analysis::AnalysisError;
pub use constraint::{ArgType, Constraint, Disposition, HeadRef, Modifiers, Occurrence};
pub use facts::{FactEngine, FactError, Node, Relation};
pub use join::{Clique, JoinGraph, JoinHints};
pub use lookup::{IndexType, Lookup, LookupCategories, LookupCategory, LookupError, LookupType};
pub use optimizer::{AnalysisConfig, AnalysisReport, Optimizer};
pub use program::{
    ConstraintDecl, ConstraintId, ModelError, OccurrenceId, Program, ProgramBuilder, RuleBuilder,
    RuleId, VarId,
};
pub use rule::{Conjunct, GuardConjunct, Rule, RuleKind};
