//! Join-order hints for multi-headed rules.

use crate::join::JoinGraph;
use crate::program::Program;
use tracing::{instrument, trace};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinStats {
    pub rules: usize,
    pub cyclic: usize,
    pub disconnected: usize,
    pub cliques: usize,
}

pub struct JoinAnalysis;

impl JoinAnalysis {
    /// Attach [`crate::join::JoinHints`] to every rule with two or more
    /// positive head occurrences.
    #[instrument(skip_all, name = "join")]
    pub fn analyze(program: &mut Program) -> JoinStats {
        let mut stats = JoinStats::default();
        let rules: Vec<_> = program.rule_ids().collect();
        for r in rules {
            if program.rule(r).head_len() < 2 {
                continue;
            }
            let hints = JoinGraph::for_rule(program, r).hints();
            stats.rules += 1;
            stats.cliques += hints.cliques.len();
            if !hints.acyclic {
                stats.cyclic += 1;
            }
            if !hints.connected {
                stats.disconnected += 1;
            }
            trace!(
                rule = %program.rule(r).name,
                acyclic = hints.acyclic,
                components = hints.components.len(),
                "join graph"
            );
            program.rule_mut(r).join_hints = Some(hints);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{ProgramBuilder, RuleId};

    #[test]
    fn test_hints_only_for_multi_headed_rules() {
        let mut b = ProgramBuilder::new();
        let p = b.constraint("p", 1);
        let q = b.constraint("q", 1);
        let r = b.constraint("r", 1);
        b.rule("single").kept(p, &["X"]).call(q, &["X"]).build().unwrap();
        b.rule("cross")
            .kept(p, &["X"])
            .kept(q, &["Y"])
            .kept(r, &["Y"])
            .build()
            .unwrap();
        let mut program = b.build();
        let stats = JoinAnalysis::analyze(&mut program);

        assert_eq!(stats.rules, 1);
        assert_eq!(stats.disconnected, 1);
        assert!(program.rule(RuleId::new(0)).join_hints.is_none());
        let hints = program.rule(RuleId::new(1)).join_hints.as_ref().unwrap();
        assert_eq!(hints.components, vec![vec![0], vec![1, 2]]);
        assert!(hints.acyclic);
    }

    #[test]
    fn test_triangle_rule_is_one_clique() {
        let mut b = ProgramBuilder::new();
        let e = b.constraint("e", 1);
        b.rule("triangle")
            .kept(e, &["X"])
            .kept(e, &["X"])
            .kept(e, &["X"])
            .build()
            .unwrap();
        let mut program = b.build();
        let stats = JoinAnalysis::analyze(&mut program);

        assert_eq!(stats.cyclic, 1);
        let hints = program.rule(RuleId::new(0)).join_hints.as_ref().unwrap();
        assert_eq!(hints.cliques.len(), 1);
        assert_eq!(hints.cliques[0].nodes, vec![0, 1, 2]);
    }
}
