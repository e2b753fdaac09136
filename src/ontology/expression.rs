//! Boolean class expressions and their normal forms.
//!
//! The reasoner decides entailment by refutation: an axiom is converted into a
//! class expression that is unsatisfiable exactly when the axiom is entailed
//! ([`ClassExpression::from_axiom`]). Satisfiability is then checked on the
//! disjunctive normal form of the expression.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{Axiom, ClassName, Entity, IndividualName};
use crate::error::ReasoningError;

/// Upper bound on the number of conjuncts a normal form may expand into.
pub const MAX_DNF_TERMS: usize = 4096;

/// A class expression over named classes and nominals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassExpression {
    Class(ClassName),
    /// The singleton class `{individual}`.
    Nominal(IndividualName),
    Not(Box<ClassExpression>),
    /// Intersection; the empty intersection is `owl:Thing`.
    And(Vec<ClassExpression>),
    /// Union; the empty union is `owl:Nothing`.
    Or(Vec<ClassExpression>),
}

/// A conjunction of positive and negated atoms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conjunct {
    pub classes: BTreeSet<ClassName>,
    pub negated_classes: BTreeSet<ClassName>,
    pub nominals: BTreeSet<IndividualName>,
    pub negated_nominals: BTreeSet<IndividualName>,
}

impl Conjunct {
    fn merge(&self, other: &Conjunct) -> Conjunct {
        let mut merged = self.clone();
        merged.classes.extend(other.classes.iter().cloned());
        merged.negated_classes.extend(other.negated_classes.iter().cloned());
        merged.nominals.extend(other.nominals.iter().cloned());
        merged
            .negated_nominals
            .extend(other.negated_nominals.iter().cloned());
        merged
    }
}

impl ClassExpression {
    pub fn class(name: impl Into<String>) -> Self {
        ClassExpression::Class(ClassName::new(name))
    }

    pub fn not(inner: ClassExpression) -> Self {
        ClassExpression::Not(Box::new(inner))
    }

    /// Convert an axiom into an expression whose unsatisfiability is
    /// equivalent to the axiom being entailed.
    pub fn from_axiom(axiom: &Axiom) -> Self {
        use ClassExpression::{And, Class, Nominal, Or};
        match axiom {
            Axiom::SubClassOf { sub, sup } => And(vec![
                Class(sub.clone()),
                Self::not(Class(sup.clone())),
            ]),
            Axiom::EquivalentClasses { classes } => Or(classes
                .iter()
                .flat_map(|a| {
                    classes
                        .iter()
                        .filter(move |b| *b != a)
                        .map(move |b| And(vec![Class(a.clone()), Self::not(Class(b.clone()))]))
                })
                .collect()),
            Axiom::DisjointClasses { classes } => Or(classes
                .iter()
                .enumerate()
                .flat_map(|(i, a)| {
                    classes
                        .iter()
                        .skip(i + 1)
                        .map(move |b| And(vec![Class(a.clone()), Class(b.clone())]))
                })
                .collect()),
            Axiom::ClassAssertion { class, individual } => And(vec![
                Nominal(individual.clone()),
                Self::not(Class(class.clone())),
            ]),
        }
    }

    /// Disjunctive normal form: the expression is satisfiable iff one of the
    /// returned conjuncts is.
    pub fn to_dnf(&self) -> Result<Vec<Conjunct>, ReasoningError> {
        dnf(self, true)
    }

    /// Every class and individual the expression mentions.
    pub fn signature(&self) -> BTreeSet<Entity> {
        let mut out = BTreeSet::new();
        self.collect_signature(&mut out);
        out
    }

    fn collect_signature(&self, out: &mut BTreeSet<Entity>) {
        match self {
            ClassExpression::Class(c) => {
                out.insert(Entity::Class(c.clone()));
            }
            ClassExpression::Nominal(i) => {
                out.insert(Entity::Individual(i.clone()));
            }
            ClassExpression::Not(inner) => inner.collect_signature(out),
            ClassExpression::And(items) | ClassExpression::Or(items) => {
                for item in items {
                    item.collect_signature(out);
                }
            }
        }
    }
}

fn dnf(expr: &ClassExpression, positive: bool) -> Result<Vec<Conjunct>, ReasoningError> {
    match expr {
        ClassExpression::Class(c) => {
            let mut conjunct = Conjunct::default();
            if positive {
                conjunct.classes.insert(c.clone());
            } else {
                conjunct.negated_classes.insert(c.clone());
            }
            Ok(vec![conjunct])
        }
        ClassExpression::Nominal(i) => {
            let mut conjunct = Conjunct::default();
            if positive {
                conjunct.nominals.insert(i.clone());
            } else {
                conjunct.negated_nominals.insert(i.clone());
            }
            Ok(vec![conjunct])
        }
        ClassExpression::Not(inner) => dnf(inner, !positive),
        // De Morgan: a negated intersection distributes like a union.
        ClassExpression::And(items) if positive => product(items, positive),
        ClassExpression::And(items) => union(items, positive),
        ClassExpression::Or(items) if positive => union(items, positive),
        ClassExpression::Or(items) => product(items, positive),
    }
}

fn union(items: &[ClassExpression], positive: bool) -> Result<Vec<Conjunct>, ReasoningError> {
    let mut out = Vec::new();
    for item in items {
        out.extend(dnf(item, positive)?);
        check_size(out.len())?;
    }
    Ok(out)
}

fn product(items: &[ClassExpression], positive: bool) -> Result<Vec<Conjunct>, ReasoningError> {
    let mut acc = vec![Conjunct::default()];
    for item in items {
        let terms = dnf(item, positive)?;
        check_size(acc.len().saturating_mul(terms.len()))?;
        acc = acc
            .iter()
            .flat_map(|left| terms.iter().map(move |right| left.merge(right)))
            .collect();
    }
    Ok(acc)
}

fn check_size(terms: usize) -> Result<(), ReasoningError> {
    if terms > MAX_DNF_TERMS {
        return Err(ReasoningError::ExpressionTooComplex {
            terms,
            max: MAX_DNF_TERMS,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subclass_converts_to_intersection_with_complement() {
        let expr = ClassExpression::from_axiom(&Axiom::sub_class_of("Dog", "Animal"));
        let dnf = expr.to_dnf().unwrap();
        assert_eq!(dnf.len(), 1);
        assert!(dnf[0].classes.contains(&ClassName::new("Dog")));
        assert!(dnf[0].negated_classes.contains(&ClassName::new("Animal")));
    }

    #[test]
    fn equivalence_expands_to_both_directions() {
        let expr = ClassExpression::from_axiom(&Axiom::equivalent(["A", "B"]));
        assert_eq!(expr.to_dnf().unwrap().len(), 2);
    }

    #[test]
    fn negated_intersection_becomes_union() {
        let expr = ClassExpression::not(ClassExpression::And(vec![
            ClassExpression::class("A"),
            ClassExpression::class("B"),
        ]));
        let dnf = expr.to_dnf().unwrap();
        assert_eq!(dnf.len(), 2);
        assert!(dnf.iter().all(|c| c.classes.is_empty()));
    }

    #[test]
    fn empty_union_has_no_conjuncts() {
        assert!(ClassExpression::Or(vec![]).to_dnf().unwrap().is_empty());
        assert_eq!(ClassExpression::And(vec![]).to_dnf().unwrap().len(), 1);
    }

    #[test]
    fn blowup_is_bounded() {
        let pair = |i: usize| {
            ClassExpression::Or(vec![
                ClassExpression::class(format!("A{i}")),
                ClassExpression::class(format!("B{i}")),
            ])
        };
        let expr = ClassExpression::And((0..16).map(pair).collect());
        assert!(matches!(
            expr.to_dnf(),
            Err(ReasoningError::ExpressionTooComplex { .. })
        ));
    }
}
