//! Incremental classifier over the Horn fragment of OWL this service supports.
//!
//! A [`Reasoner`] owns an axiom set and a [`taxonomy`] index derived from it.
//! Reads take `&self` and may run concurrently; changes go through
//! [`Reasoner::apply`], which only evicts the part of the classification the
//! change touches.

pub(crate) mod taxonomy;

use std::collections::BTreeSet;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::ReasoningError;
use crate::ontology::expression::Conjunct;
use crate::ontology::{Axiom, AxiomSet, ClassExpression, ClassName, Entity, IndividualName};

use self::taxonomy::Taxonomy;

/// An empty batch, for one-sided calls to [`Reasoner::apply`].
pub const NO_AXIOMS: [&Axiom; 0] = [];

/// What a query asks about its input entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    EquivalentClasses,
    SuperClasses,
    DirectSuperClasses,
    SubClasses,
    DirectSubClasses,
    DisjointClasses,
    Instances,
    Types,
    DirectTypes,
}

impl QueryKind {
    /// Whether the query takes a class (as opposed to an individual).
    pub fn takes_class(self) -> bool {
        !matches!(self, QueryKind::Types | QueryKind::DirectTypes)
    }
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueryKind::EquivalentClasses => "equivalent_classes",
            QueryKind::SuperClasses => "super_classes",
            QueryKind::DirectSuperClasses => "direct_super_classes",
            QueryKind::SubClasses => "sub_classes",
            QueryKind::DirectSubClasses => "direct_sub_classes",
            QueryKind::DisjointClasses => "disjoint_classes",
            QueryKind::Instances => "instances",
            QueryKind::Types => "types",
            QueryKind::DirectTypes => "direct_types",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for QueryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown query kind \"{s}\""))
    }
}

/// A group of mutually equivalent entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Node(BTreeSet<Entity>);

impl Node {
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.0.iter()
    }

    pub fn contains(&self, entity: &Entity) -> bool {
        self.0.contains(entity)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Entity> for Node {
    fn from_iter<T: IntoIterator<Item = Entity>>(iter: T) -> Self {
        Node(iter.into_iter().collect())
    }
}

/// Result of a query: a set of nodes, equivalent entities merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeSet(BTreeSet<Node>);

impl NodeSet {
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether any node contains `entity`.
    pub fn contains_entity(&self, entity: &Entity) -> bool {
        self.0.iter().any(|node| node.contains(entity))
    }

    /// All entities across all nodes.
    pub fn entities(&self) -> BTreeSet<Entity> {
        self.0.iter().flat_map(|n| n.0.iter().cloned()).collect()
    }
}

impl FromIterator<Node> for NodeSet {
    fn from_iter<T: IntoIterator<Item = Node>>(iter: T) -> Self {
        NodeSet(iter.into_iter().collect())
    }
}

/// The reasoning engine bound to one logical model.
pub struct Reasoner {
    ontology: String,
    axioms: AxiomSet,
    taxonomy: Taxonomy,
    consistent: OnceLock<bool>,
    revision: u64,
}

impl Reasoner {
    /// Create an empty engine for the named ontology.
    pub fn new(ontology: impl Into<String>) -> Self {
        Self {
            ontology: ontology.into(),
            axioms: AxiomSet::new(),
            taxonomy: Taxonomy::default(),
            consistent: OnceLock::new(),
            revision: 0,
        }
    }

    /// Create an engine loaded with `axioms`. Fails on the first malformed axiom.
    pub fn with_axioms<'a>(
        ontology: impl Into<String>,
        axioms: impl IntoIterator<Item = &'a Axiom>,
    ) -> Result<Self, ReasoningError> {
        let axioms: Vec<&Axiom> = axioms.into_iter().collect();
        for axiom in &axioms {
            axiom.validate()?;
        }
        let mut reasoner = Self::new(ontology);
        reasoner.apply(axioms, NO_AXIOMS);
        Ok(reasoner)
    }

    pub fn ontology(&self) -> &str {
        &self.ontology
    }

    pub fn axioms(&self) -> &AxiomSet {
        &self.axioms
    }

    /// Number of change batches that modified the model.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Apply `additions`, then `removals`. Axioms are assumed valid.
    ///
    /// Returns how many axioms were actually added and removed.
    pub fn apply<'a>(
        &mut self,
        additions: impl IntoIterator<Item = &'a Axiom>,
        removals: impl IntoIterator<Item = &'a Axiom>,
    ) -> (usize, usize) {
        let mut added = 0;
        for axiom in additions {
            if self.axioms.insert(axiom.clone()) {
                self.taxonomy.insert(axiom);
                added += 1;
            }
        }
        let mut removed = 0;
        for axiom in removals {
            if self.axioms.remove(axiom) {
                self.taxonomy.remove(axiom);
                removed += 1;
            }
        }
        if added + removed > 0 {
            self.consistent = OnceLock::new();
            self.revision += 1;
            tracing::trace!(
                ontology = %self.ontology,
                added,
                removed,
                revision = self.revision,
                "model changed"
            );
        }
        (added, removed)
    }

    /// Eagerly compute the full class hierarchy.
    pub fn classify(&self) {
        self.taxonomy.classify();
    }

    /// Drop the model and every derived structure.
    pub fn dispose(&mut self) {
        self.axioms.clear();
        self.taxonomy.clear();
        self.consistent = OnceLock::new();
    }

    pub fn is_consistent(&self) -> bool {
        *self.consistent.get_or_init(|| {
            self.taxonomy.is_satisfiable(&ClassName::thing())
                && self
                    .taxonomy
                    .individuals()
                    .all(|i| !self.taxonomy.is_clash(&self.taxonomy.types(i)))
        })
    }

    /// Whether `expr` can have an instance in some model of the ontology.
    ///
    /// Nominals follow the unique name assumption. An inconsistent ontology
    /// has no models, so nothing is satisfiable.
    pub fn is_satisfiable(&self, expr: &ClassExpression) -> Result<bool, ReasoningError> {
        if !self.is_consistent() {
            return Ok(false);
        }
        Ok(expr
            .to_dnf()?
            .iter()
            .any(|conjunct| self.conjunct_satisfiable(conjunct)))
    }

    fn conjunct_satisfiable(&self, conjunct: &Conjunct) -> bool {
        if conjunct.nominals.len() > 1
            || conjunct
                .nominals
                .iter()
                .any(|i| conjunct.negated_nominals.contains(i))
        {
            return false;
        }
        let mut closure: BTreeSet<ClassName> = (*self.taxonomy.closure(&ClassName::thing())).clone();
        for class in &conjunct.classes {
            closure.extend(self.taxonomy.closure(class).iter().cloned());
        }
        for individual in &conjunct.nominals {
            closure.extend(self.taxonomy.types(individual));
        }
        !self.taxonomy.is_clash(&closure)
            && conjunct.negated_classes.iter().all(|c| !closure.contains(c))
    }

    /// Whether the ontology entails `axiom`.
    pub fn is_entailed(&self, axiom: &Axiom) -> Result<bool, ReasoningError> {
        axiom.validate()?;
        Ok(!self.is_satisfiable(&ClassExpression::from_axiom(axiom))?)
    }

    /// Answer a query about `entity`.
    pub fn query(&self, kind: QueryKind, entity: &Entity) -> Result<NodeSet, ReasoningError> {
        if !self.is_consistent() {
            return Err(ReasoningError::Inconsistent {
                ontology: self.ontology.clone(),
            });
        }
        match (kind.takes_class(), entity) {
            (true, Entity::Class(class)) => {
                self.require_class(class)?;
                Ok(self.class_query(kind, class))
            }
            (false, Entity::Individual(individual)) => {
                if !self.taxonomy.has_individual(individual) {
                    return Err(ReasoningError::UnknownEntity {
                        entity: entity.to_string(),
                    });
                }
                let types = self.group(self.taxonomy.types(individual));
                Ok(match kind {
                    QueryKind::DirectTypes => self.most_specific(types),
                    _ => types,
                })
            }
            _ => Err(ReasoningError::InvalidQuery {
                kind: kind.to_string(),
                entity: entity.to_string(),
            }),
        }
    }

    fn require_class(&self, class: &ClassName) -> Result<(), ReasoningError> {
        if self.taxonomy.has_class(class) {
            Ok(())
        } else {
            Err(ReasoningError::UnknownEntity {
                entity: Entity::Class(class.clone()).to_string(),
            })
        }
    }

    fn class_query(&self, kind: QueryKind, class: &ClassName) -> NodeSet {
        let own = self.equivalents(class);
        match kind {
            QueryKind::EquivalentClasses => [to_node(&own)].into_iter().collect(),
            QueryKind::SuperClasses | QueryKind::DirectSuperClasses => {
                let supers: BTreeSet<ClassName> = if self.taxonomy.is_satisfiable(class) {
                    self.taxonomy.closure(class).iter().cloned().collect()
                } else {
                    self.taxonomy.classes()
                };
                let supers = self.group(supers.into_iter().filter(|c| !own.contains(c)));
                if kind == QueryKind::DirectSuperClasses {
                    self.most_specific(supers)
                } else {
                    supers
                }
            }
            QueryKind::SubClasses | QueryKind::DirectSubClasses => {
                let subs = self.group(self.taxonomy.classes().into_iter().filter(|c| {
                    !own.contains(c) && self.is_below(c, class)
                }));
                if kind == QueryKind::DirectSubClasses {
                    self.most_general(subs)
                } else {
                    subs
                }
            }
            QueryKind::DisjointClasses => {
                let mine = self.taxonomy.closure(class);
                self.group(self.taxonomy.classes().into_iter().filter(|c| {
                    let mut joint: BTreeSet<ClassName> = (*mine).clone();
                    joint.extend(self.taxonomy.closure(c).iter().cloned());
                    self.taxonomy.is_clash(&joint)
                }))
            }
            QueryKind::Instances => self
                .taxonomy
                .individuals()
                .filter(|i| self.taxonomy.types(i).contains(class))
                .map(|i| [Entity::Individual(i.clone())].into_iter().collect())
                .collect(),
            QueryKind::Types | QueryKind::DirectTypes => NodeSet::default(),
        }
    }

    /// `sub ⊑ sup` in the classified hierarchy.
    fn is_below(&self, sub: &ClassName, sup: &ClassName) -> bool {
        !self.taxonomy.is_satisfiable(sub) || self.taxonomy.closure(sub).contains(sup)
    }

    /// Classes equivalent to `class`, including itself. Every unsatisfiable
    /// class is equivalent to `owl:Nothing`.
    fn equivalents(&self, class: &ClassName) -> BTreeSet<ClassName> {
        if !self.taxonomy.is_satisfiable(class) {
            let mut bottom: BTreeSet<ClassName> = self
                .taxonomy
                .classes()
                .into_iter()
                .filter(|c| !self.taxonomy.is_satisfiable(c))
                .collect();
            bottom.insert(class.clone());
            return bottom;
        }
        self.taxonomy
            .closure(class)
            .iter()
            .filter(|sup| *sup == class || self.taxonomy.closure(sup).contains(class))
            .cloned()
            .collect()
    }

    fn group(&self, classes: impl IntoIterator<Item = ClassName>) -> NodeSet {
        let mut covered = BTreeSet::new();
        let mut nodes = BTreeSet::new();
        for class in classes {
            if covered.contains(&class) {
                continue;
            }
            let node = self.equivalents(&class);
            covered.extend(node.iter().cloned());
            nodes.insert(to_node(&node));
        }
        NodeSet(nodes)
    }

    /// Keep nodes with no strictly more specific node in the set.
    fn most_specific(&self, set: NodeSet) -> NodeSet {
        let reps: Vec<(Node, ClassName)> = with_reps(set);
        reps.iter()
            .filter(|(node, rep)| {
                !reps
                    .iter()
                    .any(|(other, orep)| other != node && self.is_below(orep, rep))
            })
            .map(|(node, _)| node.clone())
            .collect()
    }

    /// Keep nodes with no strictly more general node in the set.
    fn most_general(&self, set: NodeSet) -> NodeSet {
        let reps: Vec<(Node, ClassName)> = with_reps(set);
        reps.iter()
            .filter(|(node, rep)| {
                !reps
                    .iter()
                    .any(|(other, orep)| other != node && self.is_below(rep, orep))
            })
            .map(|(node, _)| node.clone())
            .collect()
    }

    /// Individuals with at least one asserted type.
    pub fn individuals(&self) -> BTreeSet<IndividualName> {
        self.taxonomy.individuals().cloned().collect()
    }
}

fn to_node(classes: &BTreeSet<ClassName>) -> Node {
    classes.iter().cloned().map(Entity::Class).collect()
}

fn with_reps(set: NodeSet) -> Vec<(Node, ClassName)> {
    set.0
        .into_iter()
        .filter_map(|node| {
            let rep = node.entities().find_map(|e| match e {
                Entity::Class(c) => Some(c.clone()),
                Entity::Individual(_) => None,
            })?;
            Some((node, rep))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zoo() -> Reasoner {
        Reasoner::with_axioms(
            "zoo",
            &[
                Axiom::sub_class_of("Dog", "Mammal"),
                Axiom::sub_class_of("Cat", "Mammal"),
                Axiom::sub_class_of("Mammal", "Animal"),
                Axiom::equivalent(["Dog", "Canine"]),
                Axiom::disjoint(["Cat", "Dog"]),
                Axiom::class_assertion("Dog", "rex"),
            ],
        )
        .unwrap()
    }

    fn class(s: &str) -> Entity {
        Entity::class(s)
    }

    #[test]
    fn super_classes_group_equivalents() {
        let r = zoo();
        let supers = r.query(QueryKind::SuperClasses, &class("Canine")).unwrap();
        assert!(supers.contains_entity(&class("Mammal")));
        assert!(supers.contains_entity(&class("Animal")));
        assert!(supers.contains_entity(&class("owl:Thing")));
        assert!(!supers.contains_entity(&class("Dog")));

        let eq = r.query(QueryKind::EquivalentClasses, &class("Dog")).unwrap();
        assert_eq!(eq.len(), 1);
        assert!(eq.contains_entity(&class("Canine")));
    }

    #[test]
    fn direct_super_classes_are_most_specific() {
        let r = zoo();
        let direct = r
            .query(QueryKind::DirectSuperClasses, &class("Dog"))
            .unwrap();
        assert_eq!(direct.len(), 1);
        assert!(direct.contains_entity(&class("Mammal")));
    }

    #[test]
    fn direct_sub_classes_skip_bottom_when_others_exist() {
        let r = zoo();
        let direct = r.query(QueryKind::DirectSubClasses, &class("Mammal")).unwrap();
        assert!(direct.contains_entity(&class("Dog")));
        assert!(direct.contains_entity(&class("Cat")));
        assert!(!direct.contains_entity(&class("owl:Nothing")));
    }

    #[test]
    fn disjointness_is_inherited() {
        let r = zoo();
        let disjoint = r.query(QueryKind::DisjointClasses, &class("Canine")).unwrap();
        assert!(disjoint.contains_entity(&class("Cat")));
        assert!(!disjoint.contains_entity(&class("Mammal")));
    }

    #[test]
    fn instances_and_types() {
        let r = zoo();
        let instances = r.query(QueryKind::Instances, &class("Animal")).unwrap();
        assert!(instances.contains_entity(&Entity::individual("rex")));

        let types = r
            .query(QueryKind::DirectTypes, &Entity::individual("rex"))
            .unwrap();
        assert_eq!(types.len(), 1);
        assert!(types.contains_entity(&class("Dog")));
    }

    #[test]
    fn entailment_by_refutation() {
        let r = zoo();
        assert!(r.is_entailed(&Axiom::sub_class_of("Canine", "Animal")).unwrap());
        assert!(!r.is_entailed(&Axiom::sub_class_of("Animal", "Dog")).unwrap());
        assert!(r.is_entailed(&Axiom::class_assertion("Mammal", "rex")).unwrap());
        assert!(r.is_entailed(&Axiom::disjoint(["Canine", "Cat"])).unwrap());
    }

    #[test]
    fn inconsistency_fails_queries_and_entails_everything() {
        let mut r = zoo();
        let clash = Axiom::class_assertion("Cat", "rex");
        r.apply([&clash], NO_AXIOMS);

        assert!(!r.is_consistent());
        assert!(matches!(
            r.query(QueryKind::Types, &Entity::individual("rex")),
            Err(ReasoningError::Inconsistent { .. })
        ));
        assert!(r.is_entailed(&Axiom::sub_class_of("Animal", "Dog")).unwrap());

        r.apply(NO_AXIOMS, [&clash]);
        assert!(r.is_consistent());
    }

    #[test]
    fn unknown_entity_and_wrong_kind_are_rejected() {
        let r = zoo();
        assert!(matches!(
            r.query(QueryKind::SubClasses, &class("Unicorn")),
            Err(ReasoningError::UnknownEntity { .. })
        ));
        assert!(matches!(
            r.query(QueryKind::SubClasses, &Entity::individual("rex")),
            Err(ReasoningError::InvalidQuery { .. })
        ));
    }

    #[test]
    fn unsatisfiable_class_joins_bottom() {
        let mut r = zoo();
        r.apply(
            [
                &Axiom::sub_class_of("CatDog", "Cat"),
                &Axiom::sub_class_of("CatDog", "Dog"),
            ],
            NO_AXIOMS,
        );
        let eq = r.query(QueryKind::EquivalentClasses, &class("CatDog")).unwrap();
        assert!(eq.contains_entity(&class("owl:Nothing")));
    }

    #[test]
    fn query_kind_parses_from_snake_case() {
        assert_eq!(
            "direct_sub_classes".parse::<QueryKind>().unwrap(),
            QueryKind::DirectSubClasses
        );
        assert!("sideways".parse::<QueryKind>().is_err());
    }
}
