//! Join graphs over rule heads.
//!
//! Nodes are the positions `0..n` of a positive head. Two nodes are joined
//! when they share variables, directly or through a guard or negative head
//! that mentions variables of both. Each distinct variable set is one edge label, so pairs
//! joined on literally the same variables share an [`EdgeId`]. Maximal
//! cliques per label identify occurrences that can be found through one
//! combined index instead of pairwise joins.

use crate::program::{Program, RuleId, VarId};
use rustc_hash::FxHashMap;
use std::fmt;

/// Label of a join edge; equal variable sets share one id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(u32);

impl EdgeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// A maximal clique of one edge label.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Clique {
    pub label: EdgeId,
    /// Join variables shared by every pair in the clique.
    pub variables: Vec<VarId>,
    /// Head positions, ascending.
    pub nodes: Vec<usize>,
}

/// Join-order hints for one rule head.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinHints {
    pub acyclic: bool,
    pub connected: bool,
    /// Independent sub-joins, each ascending; together they cover the head.
    pub components: Vec<Vec<usize>>,
    pub cliques: Vec<Clique>,
}

/// Join graph of one head.
#[derive(Clone, Debug)]
pub struct JoinGraph {
    size: usize,
    /// Symmetric adjacency matrix, row-major.
    edges: Vec<Option<EdgeId>>,
    /// Canonical (sorted) variable set per edge id.
    labels: Vec<Vec<VarId>>,
}

impl JoinGraph {
    /// Build from per-node variables and per-guard precondition variables.
    pub fn build(node_vars: &[Vec<VarId>], guard_vars: &[Vec<VarId>]) -> Self {
        let size = node_vars.len();
        let mut graph = JoinGraph {
            size,
            edges: vec![None; size * size],
            labels: Vec::new(),
        };
        let mut by_label: FxHashMap<Vec<VarId>, EdgeId> = FxHashMap::default();

        for i in 0..size {
            for j in (i + 1)..size {
                let mut shared: Vec<VarId> = node_vars[i]
                    .iter()
                    .filter(|v| node_vars[j].contains(v))
                    .copied()
                    .collect();

                for guard in guard_vars {
                    let touches_i = guard.iter().any(|v| node_vars[i].contains(v));
                    let touches_j = guard.iter().any(|v| node_vars[j].contains(v));
                    if touches_i && touches_j {
                        shared.extend(
                            guard
                                .iter()
                                .filter(|v| node_vars[i].contains(v) || node_vars[j].contains(v)),
                        );
                    }
                }

                shared.sort();
                shared.dedup();
                if shared.is_empty() {
                    continue;
                }

                let next = EdgeId(by_label.len() as u32);
                let id = *by_label.entry(shared.clone()).or_insert_with(|| {
                    graph.labels.push(shared);
                    next
                });
                graph.edges[i * size + j] = Some(id);
                graph.edges[j * size + i] = Some(id);
            }
        }
        graph
    }

    /// Join graph of a rule's positive head.
    pub fn for_rule(program: &Program, rule: RuleId) -> Self {
        let rule = program.rule(rule);
        let node_vars: Vec<Vec<VarId>> = rule
            .positive_head
            .iter()
            .map(|&o| program.occurrence(o).args.clone())
            .collect();
        let mut guard_vars: Vec<Vec<VarId>> = rule.guard.iter().map(|g| g.vars.clone()).collect();
        // a negative head selects on its own arguments and guard together
        for negative in &rule.negative_heads {
            let mut vars: Vec<VarId> = negative
                .occurrences
                .iter()
                .flat_map(|&o| program.occurrence(o).args.iter().copied())
                .chain(negative.guard.iter().flat_map(|g| g.vars.iter().copied()))
                .collect();
            vars.sort();
            vars.dedup();
            guard_vars.push(vars);
        }
        Self::build(&node_vars, &guard_vars)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of distinct edge labels.
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn label(&self, id: EdgeId) -> &[VarId] {
        &self.labels[id.index()]
    }

    pub fn get_edge(&self, i: usize, j: usize) -> Option<EdgeId> {
        if i == j || i >= self.size || j >= self.size {
            return None;
        }
        self.edges[i * self.size + j]
    }

    pub fn is_connected(&self, i: usize, j: usize) -> bool {
        self.get_edge(i, j).is_some()
    }

    fn neighbours(&self, i: usize) -> impl Iterator<Item = usize> + '_ {
        (0..self.size).filter(move |&j| self.is_connected(i, j))
    }

    /// No cycle in the undirected graph. Heads of size two or less are trivially acyclic.
    pub fn is_acyclic(&self) -> bool {
        if self.size <= 2 {
            return true;
        }
        let mut visited = vec![false; self.size];
        for root in 0..self.size {
            if visited[root] {
                continue;
            }
            // (node, parent)
            let mut stack = vec![(root, usize::MAX)];
            visited[root] = true;
            while let Some((node, parent)) = stack.pop() {
                for next in self.neighbours(node) {
                    if next == parent {
                        continue;
                    }
                    if visited[next] {
                        return false;
                    }
                    visited[next] = true;
                    stack.push((next, node));
                }
            }
        }
        true
    }

    /// Heads of size two or less are always planned as a single join.
    pub fn is_connected_graph(&self) -> bool {
        self.size <= 2 || self.components().len() <= 1
    }

    /// Connected components, each sorted, ordered by smallest member.
    pub fn components(&self) -> Vec<Vec<usize>> {
        if self.size <= 2 {
            return if self.size == 0 {
                Vec::new()
            } else {
                vec![(0..self.size).collect()]
            };
        }
        let mut seen = vec![false; self.size];
        let mut components = Vec::new();
        for root in 0..self.size {
            if seen[root] {
                continue;
            }
            seen[root] = true;
            let mut component = vec![root];
            let mut stack = vec![root];
            while let Some(node) = stack.pop() {
                for next in self.neighbours(node) {
                    if !seen[next] {
                        seen[next] = true;
                        component.push(next);
                        stack.push(next);
                    }
                }
            }
            component.sort_unstable();
            components.push(component);
        }
        components
    }

    /// All maximal cliques of size two or more, per edge label.
    pub fn maximal_cliques(&self) -> Vec<Clique> {
        let mut cliques = Vec::new();
        for label in 0..self.labels.len() {
            let label = EdgeId(label as u32);
            let adjacency: Vec<Vec<usize>> = (0..self.size)
                .map(|i| {
                    (0..self.size)
                        .filter(|&j| self.get_edge(i, j) == Some(label))
                        .collect()
                })
                .collect();
            let candidates: Vec<usize> = (0..self.size)
                .filter(|&i| !adjacency[i].is_empty())
                .collect();

            let mut found = Vec::new();
            bron_kerbosch(&adjacency, Vec::new(), candidates, Vec::new(), &mut found);
            for mut nodes in found {
                nodes.sort_unstable();
                cliques.push(Clique {
                    label,
                    variables: self.labels[label.index()].clone(),
                    nodes,
                });
            }
        }
        cliques.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.nodes.cmp(&b.nodes)));
        cliques
    }

    /// Everything the planner needs, in one value.
    pub fn hints(&self) -> JoinHints {
        JoinHints {
            acyclic: self.is_acyclic(),
            connected: self.is_connected_graph(),
            components: self.components(),
            cliques: self.maximal_cliques(),
        }
    }
}

/// Bron–Kerbosch with pivoting over one label's adjacency lists.
fn bron_kerbosch(
    adjacency: &[Vec<usize>],
    clique: Vec<usize>,
    mut candidates: Vec<usize>,
    mut excluded: Vec<usize>,
    found: &mut Vec<Vec<usize>>,
) {
    if candidates.is_empty() {
        if excluded.is_empty() && clique.len() >= 2 {
            found.push(clique);
        }
        return;
    }

    // Pivot: the vertex covering most candidates.
    let pivot = candidates
        .iter()
        .chain(excluded.iter())
        .copied()
        .max_by_key(|&u| candidates.iter().filter(|v| adjacency[u].contains(v)).count())
        .unwrap_or(candidates[0]);

    let branch: Vec<usize> = candidates
        .iter()
        .copied()
        .filter(|v| !adjacency[pivot].contains(v))
        .collect();

    for v in branch {
        let neighbours = &adjacency[v];
        let mut next_clique = clique.clone();
        next_clique.push(v);
        bron_kerbosch(
            adjacency,
            next_clique,
            candidates.iter().copied().filter(|u| neighbours.contains(u)).collect(),
            excluded.iter().copied().filter(|u| neighbours.contains(u)).collect(),
            found,
        );
        candidates.retain(|&u| u != v);
        excluded.push(v);
    }
}
