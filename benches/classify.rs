//! Benchmarks for classification, incremental updates and explanations.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use schemad::kb::{KbSettings, KnowledgeBase};
use schemad::ontology::{Axiom, AxiomSet, Entity};
use schemad::reasoner::{QueryKind, Reasoner};

/// A balanced tree of `depth` levels with `fanout` children per class.
fn tree(depth: usize, fanout: usize) -> AxiomSet {
    let mut axioms = AxiomSet::new();
    let mut level = vec!["C".to_string()];
    for _ in 0..depth {
        let mut next = Vec::with_capacity(level.len() * fanout);
        for parent in &level {
            for i in 0..fanout {
                let child = format!("{parent}_{i}");
                axioms.insert(Axiom::sub_class_of(child.clone(), parent.clone()));
                next.push(child);
            }
        }
        level = next;
    }
    for (i, leaf) in level.iter().enumerate().step_by(7) {
        axioms.insert(Axiom::class_assertion(leaf.clone(), format!("i{i}")));
    }
    axioms
}

fn bench_classify(c: &mut Criterion) {
    let axioms = tree(5, 4);

    c.bench_function("classify_tree_5x4", |bench| {
        bench.iter(|| {
            let reasoner = Reasoner::with_axioms("bench", &axioms).unwrap();
            reasoner.classify();
            black_box(reasoner.is_consistent())
        })
    });
}

fn bench_incremental_update(c: &mut Criterion) {
    let kb = KnowledgeBase::new("bench", &tree(5, 4), KbSettings::default()).unwrap();
    let edge: AxiomSet = [Axiom::sub_class_of("C_0_0", "Extra")].into_iter().collect();
    let none = AxiomSet::new();
    let leaf = Entity::class("C_0_0_0_0_0");

    c.bench_function("update_add_remove_query", |bench| {
        bench.iter(|| {
            kb.update(&edge, &none).unwrap();
            let supers = kb.query(QueryKind::SuperClasses, &leaf).unwrap();
            kb.update(&none, &edge).unwrap();
            black_box(supers)
        })
    });
}

fn bench_explain(c: &mut Criterion) {
    let axioms = tree(4, 3);
    let goal = Axiom::sub_class_of("C_0_0_0_0", "C");

    c.bench_function("explain_depth_4", |bench| {
        bench.iter(|| {
            // A fresh KB each time so the memo does not answer.
            let kb = KnowledgeBase::new("bench", &axioms, KbSettings::default()).unwrap();
            black_box(kb.explain(&goal, 0).unwrap())
        })
    });
}

criterion_group!(benches, bench_classify, bench_incremental_update, bench_explain);
criterion_main!(benches);
