//! Benchmarks for the analysis passes on synthetic programs.

use chr_analysis::{
    Conjunct, ConstraintDecl, ConstraintId, FactEngine, JoinGraph, Node, Optimizer, Program,
    ProgramBuilder, Relation, RuleId,
};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

/// A chain of `n` constraints: each one propagates into the next through a
/// two-headed join, and every third one is consumed by a simplification.
fn chain_program(n: usize) -> Program {
    let mut b = ProgramBuilder::new();
    let cs: Vec<ConstraintId> = (0..n)
        .map(|i| {
            let decl = ConstraintDecl::new(&format!("c{}", i), 2);
            let decl = if i % 4 == 0 { decl.set_semantics() } else { decl };
            b.declare(decl).unwrap()
        })
        .collect();
    for i in 0..n {
        let next = cs[(i + 1) % n];
        let after = cs[(i + 2) % n];
        b.rule(&format!("join{}", i))
            .kept(cs[i], &["X", "Y"])
            .kept(next, &["Y", "Z"])
            .call(after, &["X", "Z"])
            .build()
            .unwrap();
        if i % 3 == 0 {
            b.rule(&format!("drop{}", i))
                .removed(cs[i], &["X", "Y"])
                .guard_eq("X", "Y")
                .build()
                .unwrap();
        }
    }
    b.build()
}

/// A single rule whose head is `k` occurrences sharing one variable.
fn star_program(k: usize) -> Program {
    let mut b = ProgramBuilder::new();
    let e = b.constraint("e", 2);
    let vars: Vec<String> = (0..k).map(|i| format!("V{}", i)).collect();
    let mut rule = b.rule("star");
    for v in &vars {
        rule = rule.kept(e, &["X", v.as_str()]);
    }
    rule.build().unwrap();
    b.build()
}

fn bench_pipeline(c: &mut Criterion) {
    for n in [16, 128] {
        let program = chain_program(n);
        c.bench_function(&format!("optimize_chain_{}", n), |b| {
            b.iter_batched(
                || program.clone(),
                |mut p| Optimizer::default().run(black_box(&mut p)).unwrap(),
                BatchSize::SmallInput,
            )
        });
    }
}

fn bench_cliques(c: &mut Criterion) {
    let program = star_program(8);
    c.bench_function("cliques_star_8", |b| {
        b.iter(|| JoinGraph::for_rule(black_box(&program), RuleId::new(0)).maximal_cliques())
    });
}

fn activation_engine(program: &Program) -> FactEngine {
    let mut engine = FactEngine::new();
    for rule in program.rules() {
        for &o in &rule.positive_head {
            let from = Node::Constraint(program.occurrence(o).constraint);
            engine.tell(Relation::Tells, from, Node::Body(rule.id));
        }
        for conjunct in &rule.body {
            if let Conjunct::UserDefined { constraint, .. } = conjunct {
                engine.tell(Relation::Tells, Node::Body(rule.id), Node::Constraint(*constraint));
            }
        }
    }
    engine
}

fn bench_reachability(c: &mut Criterion) {
    let program = chain_program(128);
    let start = Node::Constraint(ConstraintId::new(0));
    c.bench_function("fact_engine_tells_128", |b| {
        // fresh engine per round so the memoised reach set is rebuilt
        b.iter_batched(
            || activation_engine(&program),
            |engine| engine.ask(Relation::Tells, black_box(start), start),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_pipeline, bench_cliques, bench_reachability);
criterion_main!(benches);
