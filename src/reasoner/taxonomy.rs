//! Told-axiom indices and the memoised subsumer closure.
//!
//! Edges are reference counted by the axioms that produce them, so removing
//! one of two axioms implying `A ⊑ B` keeps the edge. Closures live in a
//! `DashMap` so concurrent readers can fill the cache without a write lock;
//! a change to the out-edges of a class only evicts the closures that pass
//! through that class.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use rayon::prelude::*;

use crate::ontology::{Axiom, ClassName, IndividualName};

/// Set of classes subsuming some class or individual, including itself and `owl:Thing`.
pub type Closure = Arc<BTreeSet<ClassName>>;

#[derive(Default)]
pub(crate) struct Taxonomy {
    /// Told super-class edges: class → (super → supporting axiom count).
    supers: HashMap<ClassName, HashMap<ClassName, usize>>,
    /// Told disjointness, stored in both directions.
    disjoint: HashMap<ClassName, HashMap<ClassName, usize>>,
    /// Asserted types: individual → (class → supporting axiom count).
    asserted: HashMap<IndividualName, HashMap<ClassName, usize>>,
    /// Class signature with occurrence counts.
    classes: HashMap<ClassName, usize>,
    closures: DashMap<ClassName, Closure>,
}

fn increment<K: std::hash::Hash + Eq + Clone>(map: &mut HashMap<K, usize>, key: &K) -> bool {
    let count = map.entry(key.clone()).or_insert(0);
    *count += 1;
    *count == 1
}

fn decrement<K: std::hash::Hash + Eq>(map: &mut HashMap<K, usize>, key: &K) -> bool {
    match map.get_mut(key) {
        Some(count) if *count > 1 => {
            *count -= 1;
            false
        }
        Some(_) => {
            map.remove(key);
            true
        }
        None => false,
    }
}

impl Taxonomy {
    pub(crate) fn insert(&mut self, axiom: &Axiom) {
        for class in axiom_classes(axiom) {
            increment(&mut self.classes, &class);
        }
        match axiom {
            Axiom::SubClassOf { sub, sup } => self.add_edge(sub, sup),
            Axiom::EquivalentClasses { classes } => {
                for a in classes {
                    for b in classes.iter().filter(|b| *b != a) {
                        self.add_edge(a, b);
                    }
                }
            }
            Axiom::DisjointClasses { classes } => {
                for a in classes {
                    for b in classes.iter().filter(|b| *b != a) {
                        increment(self.disjoint.entry(a.clone()).or_default(), b);
                    }
                }
            }
            Axiom::ClassAssertion { class, individual } => {
                increment(self.asserted.entry(individual.clone()).or_default(), class);
            }
        }
    }

    pub(crate) fn remove(&mut self, axiom: &Axiom) {
        for class in axiom_classes(axiom) {
            decrement(&mut self.classes, &class);
        }
        match axiom {
            Axiom::SubClassOf { sub, sup } => self.remove_edge(sub, sup),
            Axiom::EquivalentClasses { classes } => {
                for a in classes {
                    for b in classes.iter().filter(|b| *b != a) {
                        self.remove_edge(a, b);
                    }
                }
            }
            Axiom::DisjointClasses { classes } => {
                for a in classes {
                    for b in classes.iter().filter(|b| *b != a) {
                        remove_nested(&mut self.disjoint, a, b);
                    }
                }
            }
            Axiom::ClassAssertion { class, individual } => {
                remove_nested(&mut self.asserted, individual, class);
            }
        }
    }

    fn add_edge(&mut self, sub: &ClassName, sup: &ClassName) {
        if increment(self.supers.entry(sub.clone()).or_default(), sup) {
            self.invalidate(sub);
        }
    }

    fn remove_edge(&mut self, sub: &ClassName, sup: &ClassName) {
        if remove_nested(&mut self.supers, sub, sup) {
            self.invalidate(sub);
        }
    }

    /// Evict every memoised closure that reaches `class`.
    fn invalidate(&self, class: &ClassName) {
        self.closures.retain(|_, closure| !closure.contains(class));
    }

    pub(crate) fn clear(&mut self) {
        self.supers.clear();
        self.disjoint.clear();
        self.asserted.clear();
        self.classes.clear();
        self.closures.clear();
    }

    /// Every class mentioned by some axiom, plus `owl:Thing` and `owl:Nothing`.
    pub(crate) fn classes(&self) -> BTreeSet<ClassName> {
        let mut out: BTreeSet<ClassName> = self.classes.keys().cloned().collect();
        out.insert(ClassName::thing());
        out.insert(ClassName::nothing());
        out
    }

    pub(crate) fn has_class(&self, class: &ClassName) -> bool {
        class.is_thing() || class.is_nothing() || self.classes.contains_key(class)
    }

    pub(crate) fn individuals(&self) -> impl Iterator<Item = &IndividualName> {
        self.asserted.keys()
    }

    pub(crate) fn has_individual(&self, individual: &IndividualName) -> bool {
        self.asserted.contains_key(individual)
    }

    pub(crate) fn cached_closures(&self) -> usize {
        self.closures.len()
    }

    /// All told subsumers of `class`, memoised.
    pub(crate) fn closure(&self, class: &ClassName) -> Closure {
        if let Some(hit) = self.closures.get(class) {
            return Arc::clone(hit.value());
        }
        let closure = Arc::new(self.reach([class.clone(), ClassName::thing()]));
        self.closures.insert(class.clone(), Arc::clone(&closure));
        closure
    }

    fn reach(&self, start: impl IntoIterator<Item = ClassName>) -> BTreeSet<ClassName> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<ClassName> = start.into_iter().collect();
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(edges) = self.supers.get(&next) {
                queue.extend(edges.keys().filter(|s| !seen.contains(*s)).cloned());
            }
        }
        seen
    }

    /// Subsumers of an individual: the closure of every asserted type.
    pub(crate) fn types(&self, individual: &IndividualName) -> BTreeSet<ClassName> {
        let mut out: BTreeSet<ClassName> = (*self.closure(&ClassName::thing())).clone();
        if let Some(asserted) = self.asserted.get(individual) {
            for class in asserted.keys() {
                out.extend(self.closure(class).iter().cloned());
            }
        }
        out
    }

    /// A set of subsumers is contradictory when it contains `owl:Nothing` or a
    /// pair of declared-disjoint classes.
    pub(crate) fn is_clash(&self, classes: &BTreeSet<ClassName>) -> bool {
        if classes.iter().any(ClassName::is_nothing) {
            return true;
        }
        classes.iter().any(|c| {
            self.disjoint
                .get(c)
                .is_some_and(|others| others.keys().any(|d| classes.contains(d)))
        })
    }

    pub(crate) fn is_satisfiable(&self, class: &ClassName) -> bool {
        !self.is_clash(&self.closure(class))
    }

    /// Compute every closure eagerly, in parallel.
    pub(crate) fn classify(&self) {
        let classes: Vec<ClassName> = self.classes().into_iter().collect();
        classes.par_iter().for_each(|class| {
            self.closure(class);
        });
    }
}

fn remove_nested<K, V>(map: &mut HashMap<K, HashMap<V, usize>>, outer: &K, inner: &V) -> bool
where
    K: std::hash::Hash + Eq,
    V: std::hash::Hash + Eq,
{
    let Some(entry) = map.get_mut(outer) else {
        return false;
    };
    let removed = decrement(entry, inner);
    if entry.is_empty() {
        map.remove(outer);
    }
    removed
}

fn axiom_classes(axiom: &Axiom) -> Vec<ClassName> {
    match axiom {
        Axiom::SubClassOf { sub, sup } => vec![sub.clone(), sup.clone()],
        Axiom::EquivalentClasses { classes } | Axiom::DisjointClasses { classes } => {
            classes.iter().cloned().collect()
        }
        Axiom::ClassAssertion { class, .. } => vec![class.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> ClassName {
        ClassName::new(s)
    }

    #[test]
    fn closure_is_transitive_and_includes_thing() {
        let mut tax = Taxonomy::default();
        tax.insert(&Axiom::sub_class_of("Puppy", "Dog"));
        tax.insert(&Axiom::sub_class_of("Dog", "Animal"));

        let closure = tax.closure(&name("Puppy"));
        assert!(closure.contains(&name("Animal")));
        assert!(closure.contains(&ClassName::thing()));
    }

    #[test]
    fn edge_change_evicts_only_affected_closures() {
        let mut tax = Taxonomy::default();
        tax.insert(&Axiom::sub_class_of("Dog", "Animal"));
        tax.insert(&Axiom::sub_class_of("Oak", "Plant"));
        tax.classify();
        let before = tax.cached_closures();

        tax.insert(&Axiom::sub_class_of("Animal", "Organism"));
        // Dog and Animal reach the changed node, Oak and Plant do not.
        assert_eq!(tax.cached_closures(), before - 2);
        assert!(tax.closure(&name("Dog")).contains(&name("Organism")));
    }

    #[test]
    fn shared_edge_survives_single_removal() {
        let mut tax = Taxonomy::default();
        tax.insert(&Axiom::sub_class_of("A", "B"));
        tax.insert(&Axiom::equivalent(["A", "B"]));
        tax.remove(&Axiom::equivalent(["A", "B"]));

        assert!(tax.closure(&name("A")).contains(&name("B")));
        assert!(!tax.closure(&name("B")).contains(&name("A")));
    }

    #[test]
    fn disjoint_supers_clash() {
        let mut tax = Taxonomy::default();
        tax.insert(&Axiom::disjoint(["Cat", "Dog"]));
        tax.insert(&Axiom::sub_class_of("CatDog", "Cat"));
        tax.insert(&Axiom::sub_class_of("CatDog", "Dog"));

        assert!(!tax.is_satisfiable(&name("CatDog")));
        assert!(tax.is_satisfiable(&name("Cat")));
    }
}
