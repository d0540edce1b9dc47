//! Lookup assignment
//!
//! For every active occurrence, walk its partners in join order and decide
//! which argument positions are already bound when the partner is searched.
//! That bound-position list, together with the partner's declaration,
//! determines the index type; equal lookup types share a category.

use super::AnalysisError;
use crate::constraint::{ArgType, Constraint, HeadRef};
use crate::lookup::{BinaryGuardInfo, CategoryId, DirectAccess, IndexType, Lookup, LookupType};
use crate::program::{ConstraintId, OccurrenceId, Program, VarId};
use crate::rule::{GuardConjunct, GuardKind, Rule};
use rustc_hash::FxHashSet;
use tracing::{instrument, trace};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupStats {
    pub lookups: usize,
    pub categories: usize,
    pub keyed: usize,
    pub never_stored: usize,
    pub direct_access: usize,
}

/// One partner search, computed before anything is written back.
#[derive(Debug)]
struct PlannedLookup {
    active: OccurrenceId,
    partner: OccurrenceId,
    lookup_type: LookupType,
    direct_access: Option<DirectAccess>,
}

pub struct LookupAssignment;

impl LookupAssignment {
    /// Assign a lookup to every (active occurrence, partner) pair and pick
    /// the master category of every constraint.
    #[instrument(skip_all, name = "lookups")]
    pub fn analyze(program: &mut Program, array_indexing: bool) -> Result<LookupStats, AnalysisError> {
        let mut plans = Vec::new();
        for occ in program.occurrences().iter().filter(|o| o.is_active()) {
            plan_occurrence(program, occ.id, array_indexing, &mut plans)?;
        }

        let mut stats = LookupStats::default();
        let active: Vec<_> = program
            .occurrences()
            .iter()
            .filter(|o| o.is_active())
            .map(|o| o.id)
            .collect();
        for id in active {
            program.occurrence_mut(id).lookups.clear();
        }
        for plan in plans {
            let partner = program.occurrence(plan.partner).constraint;
            let category = add_to_category(program, partner, &plan)?;

            stats.lookups += 1;
            match plan.lookup_type.index_type() {
                IndexType::NeverStored => stats.never_stored += 1,
                t if t.is_keyed() => stats.keyed += 1,
                _ => {}
            }
            if plan.direct_access.is_some() {
                stats.direct_access += 1;
            }
            trace!(
                active = %plan.active,
                partner = %plan.partner,
                lookup = %plan.lookup_type,
                "lookup assigned"
            );

            program.occurrence_mut(plan.active).lookups.push(Lookup {
                partner: plan.partner,
                lookup_type: plan.lookup_type,
                category,
                direct_access: plan.direct_access,
            });
        }

        let ids: Vec<_> = program.constraint_ids().collect();
        for c in ids {
            let constraint = program.constraint_mut(c);
            let may_be_stored = constraint.may_be_stored;
            constraint.lookup_categories.assign_master(may_be_stored)?;
            stats.categories += constraint.lookup_categories.len();
        }
        Ok(stats)
    }
}

fn add_to_category(
    program: &mut Program,
    partner: ConstraintId,
    plan: &PlannedLookup,
) -> Result<CategoryId, AnalysisError> {
    let categories = &mut program.constraint_mut(partner).lookup_categories;
    let category = categories.get_or_add(&plan.lookup_type)?;
    categories.get_mut(category)?.add_member(plan.partner)?;
    Ok(category)
}

fn plan_occurrence(
    program: &Program,
    active: OccurrenceId,
    array_indexing: bool,
    plans: &mut Vec<PlannedLookup>,
) -> Result<(), AnalysisError> {
    let occ = program.occurrence(active);
    let rule = program.rule(occ.rule);
    let binary_guard = if array_indexing && rule.head_len() == 2 {
        single_binary_guard(program, rule)
    } else {
        None
    };

    let mut bound: FxHashSet<VarId> = occ.args.iter().copied().collect();
    for partner in program.partners(active) {
        let p = program.occurrence(partner);
        let guards: Vec<&GuardConjunct> = match p.head {
            HeadRef::Positive => rule.guard.iter().collect(),
            HeadRef::Negative(n) => rule
                .guard
                .iter()
                .chain(rule.negative_heads[n].guard.iter())
                .collect(),
        };
        let positions = bound_positions(&p.args, &bound, &guards);
        let constraint = program.constraint(p.constraint);
        let lookup_type = choose_lookup_type(constraint, positions)?;

        let direct_access = match (binary_guard, p.head) {
            (Some(info), HeadRef::Positive) => {
                direct_access(&info, occ.index, p.index, &lookup_type, &constraint.arg_types)
            }
            _ => None,
        };

        plans.push(PlannedLookup {
            active,
            partner,
            lookup_type,
            direct_access,
        });
        bound.extend(p.args.iter().copied());
    }
    Ok(())
}

/// Positions of `args` whose value is known, either directly or through a
/// guard equality with a bound variable. Ascending, duplicates removed.
fn bound_positions(args: &[VarId], bound: &FxHashSet<VarId>, guards: &[&GuardConjunct]) -> Vec<usize> {
    let tied = |v: VarId| {
        guards.iter().any(|g| match g.kind {
            GuardKind::Equals(a, b) => (a == v && bound.contains(&b)) || (b == v && bound.contains(&a)),
            GuardKind::Test => false,
        })
    };
    args.iter()
        .enumerate()
        .filter(|&(_, &v)| bound.contains(&v) || tied(v))
        .map(|(i, _)| i)
        .collect()
}

/// Pick the index structure for a partner search with the given bound positions.
pub fn choose_lookup_type(constraint: &Constraint, positions: Vec<usize>) -> Result<LookupType, AnalysisError> {
    if !constraint.may_be_stored {
        return Ok(LookupType::never_stored());
    }
    if positions.is_empty() {
        return Ok(LookupType::default_scan());
    }
    let index = if constraint.set_semantics {
        if let Some(key) = &constraint.functional_dependency {
            if key.iter().all(|k| positions.contains(k)) {
                return Ok(LookupType::keyed(IndexType::FdSsHashMap, key.clone())?);
            }
        }
        IndexType::SsHashMap
    } else {
        IndexType::HashMap
    };
    Ok(LookupType::keyed(index, positions)?)
}

/// The only guard equality linking the two occurrences of a binary head.
fn single_binary_guard(program: &Program, rule: &Rule) -> Option<BinaryGuardInfo> {
    let heads: Vec<&[VarId]> = rule
        .positive_head
        .iter()
        .map(|&o| program.occurrence(o).args.as_slice())
        .collect();
    let locate = |v: VarId| {
        heads
            .iter()
            .enumerate()
            .find_map(|(h, args)| args.iter().position(|&a| a == v).map(|arg| (h, arg)))
    };

    let mut found = None;
    for (g, guard) in rule.guard.iter().enumerate() {
        let GuardKind::Equals(a, b) = guard.kind else {
            continue;
        };
        let (Some((ha, arg_a)), Some((hb, arg_b))) = (locate(a), locate(b)) else {
            continue;
        };
        if ha == hb {
            continue;
        }
        if found.is_some() {
            return None;
        }
        found = Some(BinaryGuardInfo {
            guard: g,
            occurrence: [ha, hb],
            argument: [arg_a, arg_b],
        });
    }
    found
}

fn direct_access(
    info: &BinaryGuardInfo,
    active_index: usize,
    partner_index: usize,
    lookup_type: &LookupType,
    arg_types: &[ArgType],
) -> Option<DirectAccess> {
    if !matches!(lookup_type.index_type(), IndexType::HashMap | IndexType::SsHashMap) {
        return None;
    }
    let side = info.side_of(active_index)?;
    let other = BinaryGuardInfo::one_index(side);
    if info.occurrence[other] != partner_index {
        return None;
    }
    let position = info.argument[other];
    if lookup_type.variables() != [position].as_slice() {
        return None;
    }
    let domain_size = arg_types.get(position)?.domain_size()?;
    Some(DirectAccess { position, domain_size })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{ConstraintDecl, ProgramBuilder, RuleId};

    fn lookup_of(program: &Program, rule: usize, head: usize) -> &Lookup {
        let active = program.rule(RuleId::new(rule)).positive_head[head];
        &program.occurrence(active).lookups[0]
    }

    #[test]
    fn test_shared_variable_gives_hash_map() {
        let mut b = ProgramBuilder::new();
        let leq = b.constraint("leq", 2);
        b.rule("transitivity")
            .kept(leq, &["X", "Y"])
            .kept(leq, &["Y", "Z"])
            .call(leq, &["X", "Z"])
            .build()
            .unwrap();
        let mut program = b.build();
        let stats = LookupAssignment::analyze(&mut program, true).unwrap();

        assert_eq!(stats.lookups, 2);
        let first = lookup_of(&program, 0, 0);
        assert_eq!(first.lookup_type, LookupType::keyed(IndexType::HashMap, vec![0]).unwrap());
        let second = lookup_of(&program, 0, 1);
        assert_eq!(second.lookup_type, LookupType::keyed(IndexType::HashMap, vec![1]).unwrap());
        assert_ne!(first.category, second.category);
    }

    #[test]
    fn test_unrelated_partner_scans() {
        let mut b = ProgramBuilder::new();
        let p = b.constraint("p", 1);
        let q = b.constraint("q", 1);
        b.rule("cross").kept(p, &["X"]).kept(q, &["Y"]).build().unwrap();
        let mut program = b.build();
        LookupAssignment::analyze(&mut program, true).unwrap();

        let lookup = lookup_of(&program, 0, 0);
        assert_eq!(lookup.lookup_type, LookupType::default_scan());
        let master = program.constraint(q).lookup_categories.master_category().unwrap();
        assert_eq!(master.index_type(), IndexType::Default);
    }

    #[test]
    fn test_guard_equality_binds_position() {
        let mut b = ProgramBuilder::new();
        let p = b.constraint("p", 1);
        b.rule("dup")
            .removed(p, &["X"])
            .kept(p, &["Y"])
            .guard_eq("X", "Y")
            .build()
            .unwrap();
        let mut program = b.build();
        LookupAssignment::analyze(&mut program, true).unwrap();

        let lookup = lookup_of(&program, 0, 0);
        assert_eq!(lookup.lookup_type.variables(), &[0]);
        assert_eq!(lookup.direct_access, None);
        let categories = &program.constraint(p).lookup_categories;
        // both directions search p on position 0
        assert_eq!(categories.get(lookup.category).unwrap().members().len(), 2);
    }

    #[test]
    fn test_functional_dependency_lookup() {
        let mut b = ProgramBuilder::new();
        let key = b.constraint("key", 1);
        let fd = b
            .declare(ConstraintDecl::new("value", 2).functional_dependency(vec![0]))
            .unwrap();
        b.rule("get").kept(key, &["K"]).kept(fd, &["K", "V"]).build().unwrap();
        let mut program = b.build();
        LookupAssignment::analyze(&mut program, true).unwrap();

        let lookup = lookup_of(&program, 0, 0);
        assert_eq!(lookup.lookup_type.index_type(), IndexType::FdSsHashMap);
        let categories = &program.constraint(fd).lookup_categories;
        assert!(categories.get(lookup.category).unwrap().is_singleton(2));
    }

    #[test]
    fn test_never_stored_partner() {
        let mut b = ProgramBuilder::new();
        let p = b.constraint("p", 1);
        let e = b.declare(ConstraintDecl::new("event", 1).never_stored()).unwrap();
        b.rule("r").kept(p, &["X"]).kept(e, &["X"]).build().unwrap();
        let mut program = b.build();
        let stats = LookupAssignment::analyze(&mut program, true).unwrap();

        assert_eq!(stats.never_stored, 1);
        let master = program.constraint(e).lookup_categories.master_category().unwrap();
        assert_eq!(master.index_type(), IndexType::NeverStored);
    }

    #[test]
    fn test_direct_access_on_enum_argument() {
        let mut b = ProgramBuilder::new();
        let colour = b
            .declare(
                ConstraintDecl::new("colour", 1).arg_types(vec![ArgType::Enum { variants: 3 }]),
            )
            .unwrap();
        b.rule("unique")
            .removed(colour, &["A"])
            .kept(colour, &["B"])
            .guard_eq("A", "B")
            .build()
            .unwrap();
        let mut program = b.build();
        let stats = LookupAssignment::analyze(&mut program, true).unwrap();

        assert_eq!(stats.direct_access, 2);
        let lookup = lookup_of(&program, 0, 1);
        assert_eq!(
            lookup.direct_access,
            Some(DirectAccess {
                position: 0,
                domain_size: 3
            })
        );

        let mut b = ProgramBuilder::new();
        let colour = b
            .declare(ConstraintDecl::new("colour", 1).arg_types(vec![ArgType::Boolean]))
            .unwrap();
        b.rule("unique")
            .removed(colour, &["A"])
            .kept(colour, &["B"])
            .guard_eq("A", "B")
            .build()
            .unwrap();
        let mut disabled = b.build();
        let stats = LookupAssignment::analyze(&mut disabled, false).unwrap();
        assert_eq!(stats.direct_access, 0);
        assert_eq!(lookup_of(&disabled, 0, 0).lookup_type.index_type(), IndexType::HashMap);
    }

    #[test]
    fn test_negative_head_sees_positive_bindings() {
        let mut b = ProgramBuilder::new();
        let p = b.constraint("p", 1);
        let q = b.constraint("q", 1);
        let blocked = b.constraint("blocked", 2);
        b.rule("r")
            .kept(p, &["X"])
            .kept(q, &["Y"])
            .negated(blocked, &["X", "Z"])
            .negated_guard_eq("Z", "Y")
            .build()
            .unwrap();
        let mut program = b.build();
        LookupAssignment::analyze(&mut program, true).unwrap();

        let active = program.rule(RuleId::new(0)).positive_head[1];
        let neg = &program.occurrence(active).lookups[1];
        assert_eq!(neg.lookup_type.variables(), &[0, 1]);
    }

    #[test]
    fn test_single_master_per_constraint() {
        let mut b = ProgramBuilder::new();
        let leq = b.constraint("leq", 2);
        b.rule("antisymmetry")
            .removed(leq, &["X", "Y"])
            .removed(leq, &["Y", "X"])
            .build()
            .unwrap();
        b.rule("transitivity")
            .kept(leq, &["X", "Y"])
            .kept(leq, &["Y", "Z"])
            .build()
            .unwrap();
        let mut program = b.build();
        LookupAssignment::analyze(&mut program, true).unwrap();

        let categories = &program.constraint(leq).lookup_categories;
        let masters = categories.iter().filter(|(_, c)| c.is_master()).count();
        assert_eq!(masters, 1);
    }
}
