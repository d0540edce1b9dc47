//! Ask/tell fact engine shared by the store analyses.
//!
//! Facts are edges of a small activation graph whose nodes are constraints,
//! rule bodies and two absorbing pseudo-nodes: [`Node::Trigger`] (code that
//! reactivates reactive constraints) and [`Node::Foreign`] (arbitrary foreign
//! code, which may call any exported constraint and trigger). `Tells` edges
//! are saturated lazily: each query is a reachability test, memoised until
//! the next `tell`.
//!
//! Facts are never retracted. The one exception is the *self* fact, which
//! makes a constraint observe itself for the duration of one query sequence.

use crate::program::{ConstraintId, RuleId};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Errors from misuse of the self-fact bracket.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FactError {
    #[error("self fact for {0} asserted while one is already active")]
    NestedSelf(ConstraintId),
    #[error("self fact reset without a matching assertion")]
    UnpairedReset,
}

/// A node of the activation graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Node {
    Constraint(ConstraintId),
    /// The body of a rule, executed after the rule fires.
    Body(RuleId),
    Trigger,
    Foreign,
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Constraint(c) => write!(f, "{}", c),
            Node::Body(r) => write!(f, "body({})", r),
            Node::Trigger => write!(f, "<trigger>"),
            Node::Foreign => write!(f, "<foreign>"),
        }
    }
}

/// The relations facts can be told about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Relation {
    /// `Tells(x, y)`: activating `x` may directly activate `y`.
    Tells,
    /// `Observes(c, y)`: activating `y` may look up a stored `c`.
    Observes,
    /// `Removes(x, c)`: activating `x` may remove an instance of `c`.
    Removes,
}

/// Monotone relational store with saturating queries.
#[derive(Debug, Default)]
pub struct FactEngine {
    tells: FxHashMap<Node, FxHashSet<Node>>,
    /// observer -> constraints it may look up
    observes: FxHashMap<Node, FxHashSet<ConstraintId>>,
    /// remover -> constraints it may remove
    removes: FxHashMap<Node, FxHashSet<ConstraintId>>,
    reactivated: FxHashSet<ConstraintId>,
    exported: FxHashSet<ConstraintId>,
    self_fact: Option<ConstraintId>,
    reach_cache: RefCell<FxHashMap<Node, Rc<FxHashSet<Node>>>>,
}

impl FactEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn invalidate(&mut self) {
        self.reach_cache.get_mut().clear();
    }

    fn add_edge(&mut self, from: Node, to: Node) -> bool {
        let added = self.tells.entry(from).or_default().insert(to);
        if added {
            self.invalidate();
        }
        added
    }

    /// Assert a fact. Returns `false` if it already held.
    ///
    /// For `Observes` and `Removes` the constraint side must be a
    /// [`Node::Constraint`]; other nodes are ignored.
    pub fn tell(&mut self, relation: Relation, x: Node, y: Node) -> bool {
        match relation {
            Relation::Tells => self.add_edge(x, y),
            Relation::Observes => match x {
                Node::Constraint(c) => self.observes.entry(y).or_default().insert(c),
                _ => false,
            },
            Relation::Removes => match y {
                Node::Constraint(c) => self.removes.entry(x).or_default().insert(c),
                _ => false,
            },
        }
    }

    /// `from` contains code that may reactivate reactive constraints.
    pub fn tell_triggering(&mut self, from: Node) -> bool {
        self.add_edge(from, Node::Trigger)
    }

    /// `from` contains arbitrary foreign code.
    pub fn tell_pessimistic(&mut self, from: Node) -> bool {
        let added = self.add_edge(from, Node::Foreign);
        self.add_edge(Node::Foreign, Node::Trigger) || added
    }

    /// `c` is reactivated whenever anything triggers.
    pub fn tell_reactivated(&mut self, c: ConstraintId) -> bool {
        self.reactivated.insert(c);
        self.add_edge(Node::Trigger, Node::Constraint(c))
    }

    /// `c` can be called from foreign code.
    pub fn tell_exported(&mut self, c: ConstraintId) -> bool {
        self.exported.insert(c);
        self.add_edge(Node::Foreign, Node::Constraint(c))
    }

    /// Nodes reachable from `from` through one or more `Tells` edges.
    pub fn reachable(&self, from: Node) -> Rc<FxHashSet<Node>> {
        if let Some(hit) = self.reach_cache.borrow().get(&from) {
            return Rc::clone(hit);
        }

        let mut seen = FxHashSet::default();
        let mut stack: Vec<Node> = self
            .tells
            .get(&from)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        while let Some(node) = stack.pop() {
            if seen.insert(node) {
                if let Some(next) = self.tells.get(&node) {
                    stack.extend(next.iter().copied().filter(|n| !seen.contains(n)));
                }
            }
        }

        let seen = Rc::new(seen);
        self.reach_cache.borrow_mut().insert(from, Rc::clone(&seen));
        seen
    }

    /// Whether a fact holds under saturation.
    ///
    /// * `Tells(x, y)`: `y` is reachable from `x`.
    /// * `Observes(c, x)`: some node activated by `x` (or `x` itself) looks up
    ///   `c`; or `x` reaches the trigger and `c` is reactive; or `x` reaches
    ///   foreign code and `c` is exported or reactive.
    /// * `Removes(x, c)`: some node activated by `x` (or `x` itself) removes `c`.
    pub fn ask(&self, relation: Relation, x: Node, y: Node) -> bool {
        match relation {
            Relation::Tells => self.reachable(x).contains(&y),
            Relation::Observes => match x {
                Node::Constraint(c) => self.ask_observes(c, y),
                _ => false,
            },
            Relation::Removes => match y {
                Node::Constraint(c) => self.ask_removes(x, c),
                _ => false,
            },
        }
    }

    fn ask_observes(&self, c: ConstraintId, from: Node) -> bool {
        let reach = self.reachable(from);
        let observes = |node: &Node| {
            (self.self_fact == Some(c) && *node == Node::Constraint(c))
                || self.observes.get(node).map_or(false, |s| s.contains(&c))
        };
        if observes(&from) || reach.iter().any(observes) {
            return true;
        }
        if reach.contains(&Node::Trigger) && self.reactivated.contains(&c) {
            return true;
        }
        reach.contains(&Node::Foreign) && (self.exported.contains(&c) || self.reactivated.contains(&c))
    }

    fn ask_removes(&self, from: Node, c: ConstraintId) -> bool {
        let removes = |node: &Node| self.removes.get(node).map_or(false, |s| s.contains(&c));
        removes(&from) || self.reachable(from).iter().any(removes)
    }

    /// `from` may reactivate an already stored instance of `c`.
    pub fn ask_reactivates(&self, from: Node, c: ConstraintId) -> bool {
        self.reactivated.contains(&c) && self.reachable(from).contains(&Node::Trigger)
    }

    /// Assert the transient self fact for `c`. Must be paired with
    /// [`Self::reset_self`]; nesting is rejected.
    pub fn tell_self(&mut self, c: ConstraintId) -> Result<(), FactError> {
        if self.self_fact.is_some() {
            return Err(FactError::NestedSelf(c));
        }
        self.self_fact = Some(c);
        Ok(())
    }

    pub fn reset_self(&mut self) -> Result<(), FactError> {
        self.self_fact.take().map(|_| ()).ok_or(FactError::UnpairedReset)
    }

    /// Run `query` with the self fact for `c` asserted.
    pub fn with_self<T>(
        &mut self,
        c: ConstraintId,
        query: impl FnOnce(&Self) -> T,
    ) -> Result<T, FactError> {
        self.tell_self(c)?;
        let answer = query(self);
        self.reset_self()?;
        Ok(answer)
    }

    /// Number of told `Tells` edges.
    pub fn edge_count(&self) -> usize {
        self.tells.values().map(|s| s.len()).sum()
    }
}
