//! Justification finding for entailed axioms.
//!
//! A justification is a minimal subset of the ontology that still entails the
//! axiom. One justification is found by contraction: starting from every
//! relevant axiom, drop each axiom whose absence keeps the statement entailed.
//! All justifications are found with Reiter's hitting-set tree: each edge
//! removes one axiom of the parent's justification and searches again.
//!
//! Every test runs against a scratch [`Reasoner`] built from a subset of the
//! axioms, so explaining never touches the live model.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::ReasoningError;
use crate::ontology::{Axiom, AxiomSet, ClassExpression, ClassName, Entity};
use crate::reasoner::Reasoner;

/// A minimal set of axioms sufficient for an entailment.
pub type Justification = BTreeSet<Axiom>;

/// Every justification found for one entailment.
pub type Explanations = BTreeSet<Justification>;

/// How a caller-supplied explanation limit is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplainLimitPolicy {
    /// Use the caller's limit; `0` still means "all".
    #[default]
    Forward,
    /// Ignore the caller's limit and always search for every justification.
    Unbounded,
}

impl ExplainLimitPolicy {
    pub fn effective(self, requested: usize) -> usize {
        match self {
            ExplainLimitPolicy::Forward => requested,
            ExplainLimitPolicy::Unbounded => 0,
        }
    }
}

/// Generates justifications against a [`Reasoner`], memoising results per
/// model revision.
pub struct ExplanationGenerator {
    policy: ExplainLimitPolicy,
    cache: DashMap<(Axiom, usize), (u64, Arc<Explanations>)>,
    disposed: AtomicBool,
}

impl ExplanationGenerator {
    pub fn new(policy: ExplainLimitPolicy) -> Self {
        Self {
            policy,
            cache: DashMap::new(),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> ExplainLimitPolicy {
        self.policy
    }

    /// Up to `limit` justifications for `axiom` (`0` = all, subject to the policy).
    /// Returns an empty set when the axiom is not entailed.
    pub fn explain(
        &self,
        reasoner: &Reasoner,
        axiom: &Axiom,
        limit: usize,
    ) -> Result<Explanations, ReasoningError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(ReasoningError::Closed {
                ontology: reasoner.ontology().to_string(),
            });
        }
        axiom.validate()?;
        let limit = self.policy.effective(limit);
        let key = (axiom.clone(), limit);
        if let Some(hit) = self.cache.get(&key) {
            let (revision, explanations) = hit.value();
            if *revision == reasoner.revision() {
                return Ok(Explanations::clone(explanations));
            }
        }

        let expr = ClassExpression::from_axiom(axiom);
        let module = relevant_module(reasoner, &expr);
        tracing::debug!(
            ontology = reasoner.ontology(),
            %axiom,
            module = module.len(),
            limit,
            "computing justifications"
        );
        let explanations = all_justifications(reasoner.ontology(), &expr, &module, limit)?;
        self.cache.insert(
            key,
            (reasoner.revision(), Arc::new(explanations.clone())),
        );
        Ok(explanations)
    }

    /// Forget memoised results after the model changed.
    pub fn invalidate(&self) {
        self.cache.clear();
    }

    /// Release the generator. Later calls fail with [`ReasoningError::Closed`].
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        self.cache.clear();
    }
}

/// Axioms connected to the statement's signature. Inconsistency can stem from
/// anywhere, so an inconsistent model keeps every axiom.
fn relevant_module(reasoner: &Reasoner, expr: &ClassExpression) -> AxiomSet {
    if !reasoner.is_consistent() {
        return reasoner.axioms().clone();
    }
    let mut signature = expr.signature();
    signature.insert(Entity::Class(ClassName::thing()));
    signature.insert(Entity::Class(ClassName::nothing()));

    let mut module = AxiomSet::new();
    loop {
        let mut grew = false;
        for axiom in reasoner.axioms() {
            if module.contains(axiom) {
                continue;
            }
            let axiom_signature = axiom.signature();
            if axiom_signature.iter().any(|e| signature.contains(e)) {
                signature.extend(axiom_signature);
                module.insert(axiom.clone());
                grew = true;
            }
        }
        if !grew {
            return module;
        }
    }
}

fn entailed_by(
    ontology: &str,
    expr: &ClassExpression,
    axioms: &AxiomSet,
) -> Result<bool, ReasoningError> {
    Ok(!Reasoner::with_axioms(ontology, axioms)?.is_satisfiable(expr)?)
}

/// One justification within `axioms`, or `None` if they do not entail `expr`'s
/// unsatisfiability.
fn single_justification(
    ontology: &str,
    expr: &ClassExpression,
    axioms: &AxiomSet,
) -> Result<Option<Justification>, ReasoningError> {
    if !entailed_by(ontology, expr, axioms)? {
        return Ok(None);
    }
    let mut kept = axioms.clone();
    for axiom in axioms {
        kept.remove(axiom);
        if !entailed_by(ontology, expr, &kept)? {
            kept.insert(axiom.clone());
        }
    }
    Ok(Some(kept))
}

fn all_justifications(
    ontology: &str,
    expr: &ClassExpression,
    module: &AxiomSet,
    limit: usize,
) -> Result<Explanations, ReasoningError> {
    let mut found = Explanations::new();
    let Some(root) = single_justification(ontology, expr, module)? else {
        return Ok(found);
    };
    found.insert(root.clone());

    // Paths whose removal made the statement no longer entailed.
    let mut closed: Vec<BTreeSet<Axiom>> = Vec::new();
    let mut visited: HashSet<BTreeSet<Axiom>> = HashSet::new();
    let mut stack = vec![(BTreeSet::new(), root)];

    while let Some((path, justification)) = stack.pop() {
        for axiom in &justification {
            if limit > 0 && found.len() >= limit {
                return Ok(found);
            }
            let mut next = path.clone();
            next.insert(axiom.clone());
            if !visited.insert(next.clone()) || closed.iter().any(|c| c.is_subset(&next)) {
                continue;
            }

            let reused = found.iter().find(|j| j.is_disjoint(&next)).cloned();
            let label = match reused {
                Some(j) => j,
                None => {
                    let remaining: AxiomSet = module.difference(&next).cloned().collect();
                    match single_justification(ontology, expr, &remaining)? {
                        Some(j) => {
                            found.insert(j.clone());
                            j
                        }
                        None => {
                            closed.push(next);
                            continue;
                        }
                    }
                }
            };
            stack.push((next, label));
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reasoner(axioms: &[Axiom]) -> Reasoner {
        Reasoner::with_axioms("test", axioms).unwrap()
    }

    #[test]
    fn single_chain_has_one_justification() {
        let r = reasoner(&[
            Axiom::sub_class_of("A", "B"),
            Axiom::sub_class_of("B", "C"),
            Axiom::sub_class_of("X", "Y"),
        ]);
        let generator = ExplanationGenerator::new(ExplainLimitPolicy::Forward);
        let found = generator.explain(&r, &Axiom::sub_class_of("A", "C"), 0).unwrap();

        assert_eq!(found.len(), 1);
        let only = found.iter().next().unwrap();
        assert_eq!(only.len(), 2);
        assert!(!only.contains(&Axiom::sub_class_of("X", "Y")));
    }

    #[test]
    fn alternative_paths_give_multiple_justifications() {
        let r = reasoner(&[
            Axiom::sub_class_of("A", "B"),
            Axiom::sub_class_of("B", "D"),
            Axiom::sub_class_of("A", "C"),
            Axiom::sub_class_of("C", "D"),
            Axiom::sub_class_of("A", "D"),
        ]);
        let generator = ExplanationGenerator::new(ExplainLimitPolicy::Forward);
        let goal = Axiom::sub_class_of("A", "D");

        assert_eq!(generator.explain(&r, &goal, 0).unwrap().len(), 3);
        assert_eq!(generator.explain(&r, &goal, 2).unwrap().len(), 2);
    }

    #[test]
    fn unbounded_policy_ignores_caller_limit() {
        let r = reasoner(&[
            Axiom::sub_class_of("A", "B"),
            Axiom::sub_class_of("B", "D"),
            Axiom::sub_class_of("A", "D"),
        ]);
        let generator = ExplanationGenerator::new(ExplainLimitPolicy::Unbounded);
        let found = generator.explain(&r, &Axiom::sub_class_of("A", "D"), 1).unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn non_entailed_axiom_has_no_justification() {
        let r = reasoner(&[Axiom::sub_class_of("A", "B")]);
        let generator = ExplanationGenerator::new(ExplainLimitPolicy::Forward);
        assert!(generator
            .explain(&r, &Axiom::sub_class_of("B", "A"), 0)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn inconsistency_justifies_anything() {
        let r = reasoner(&[
            Axiom::disjoint(["Cat", "Dog"]),
            Axiom::class_assertion("Cat", "tom"),
            Axiom::class_assertion("Dog", "tom"),
            Axiom::sub_class_of("Oak", "Tree"),
        ]);
        let generator = ExplanationGenerator::new(ExplainLimitPolicy::Forward);
        let found = generator
            .explain(&r, &Axiom::sub_class_of("Tree", "Oak"), 0)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found.iter().next().unwrap().len(), 3);
    }

    #[test]
    fn disposed_generator_refuses_work() {
        let r = reasoner(&[Axiom::sub_class_of("A", "B")]);
        let generator = ExplanationGenerator::new(ExplainLimitPolicy::Forward);
        generator.dispose();
        assert!(matches!(
            generator.explain(&r, &Axiom::sub_class_of("A", "B"), 0),
            Err(ReasoningError::Closed { .. })
        ));
    }
}
