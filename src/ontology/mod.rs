//! Ontology data model: named entities, axioms, and class expressions.
//!
//! Names are opaque strings. Two class names are reserved: [`ClassName::thing`]
//! (`owl:Thing`, the top class every class is subsumed by) and
//! [`ClassName::nothing`] (`owl:Nothing`, the bottom class every unsatisfiable
//! class is equivalent to).

pub mod expression;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::ReasoningError;

pub use expression::ClassExpression;

/// Reserved name of the top class.
pub const OWL_THING: &str = "owl:Thing";
/// Reserved name of the bottom class.
pub const OWL_NOTHING: &str = "owl:Nothing";

/// Name of an OWL class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassName(String);

impl ClassName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// `owl:Thing`.
    pub fn thing() -> Self {
        Self(OWL_THING.to_string())
    }

    /// `owl:Nothing`.
    pub fn nothing() -> Self {
        Self(OWL_NOTHING.to_string())
    }

    pub fn is_thing(&self) -> bool {
        self.0 == OWL_THING
    }

    pub fn is_nothing(&self) -> bool {
        self.0 == OWL_NOTHING
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClassName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClassName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Name of an OWL named individual.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndividualName(String);

impl IndividualName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IndividualName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IndividualName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A logical entity a query can be asked about.
///
/// Serialized externally tagged: `{"class": "Person"}` or `{"individual": "alice"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Class(ClassName),
    Individual(IndividualName),
}

impl Entity {
    pub fn class(name: impl Into<String>) -> Self {
        Entity::Class(ClassName::new(name))
    }

    pub fn individual(name: impl Into<String>) -> Self {
        Entity::Individual(IndividualName::new(name))
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::Class(c) => write!(f, "class {c}"),
            Entity::Individual(i) => write!(f, "individual {i}"),
        }
    }
}

/// A logical statement of the supported OWL fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axiom {
    /// Every instance of `sub` is an instance of `sup`.
    SubClassOf { sub: ClassName, sup: ClassName },
    /// All listed classes have the same instances.
    EquivalentClasses { classes: BTreeSet<ClassName> },
    /// No two listed classes share an instance.
    DisjointClasses { classes: BTreeSet<ClassName> },
    /// `individual` is an instance of `class`.
    ClassAssertion {
        class: ClassName,
        individual: IndividualName,
    },
}

/// An unordered batch of axioms.
pub type AxiomSet = BTreeSet<Axiom>;

impl Axiom {
    pub fn sub_class_of(sub: impl Into<String>, sup: impl Into<String>) -> Self {
        Axiom::SubClassOf {
            sub: ClassName::new(sub),
            sup: ClassName::new(sup),
        }
    }

    pub fn equivalent<I, S>(classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Axiom::EquivalentClasses {
            classes: classes.into_iter().map(ClassName::new).collect(),
        }
    }

    pub fn disjoint<I, S>(classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Axiom::DisjointClasses {
            classes: classes.into_iter().map(ClassName::new).collect(),
        }
    }

    pub fn class_assertion(class: impl Into<String>, individual: impl Into<String>) -> Self {
        Axiom::ClassAssertion {
            class: ClassName::new(class),
            individual: IndividualName::new(individual),
        }
    }

    /// Reject axioms the engine cannot represent.
    pub fn validate(&self) -> Result<(), ReasoningError> {
        let malformed = |message: &str| {
            Err(ReasoningError::MalformedAxiom {
                axiom: self.to_string(),
                message: message.to_string(),
            })
        };
        match self {
            Axiom::SubClassOf { sub, sup } => {
                if sub.as_str().is_empty() || sup.as_str().is_empty() {
                    return malformed("class names must not be empty");
                }
            }
            Axiom::EquivalentClasses { classes } | Axiom::DisjointClasses { classes } => {
                if classes.len() < 2 {
                    return malformed("at least two distinct classes are required");
                }
                if classes.iter().any(|c| c.as_str().is_empty()) {
                    return malformed("class names must not be empty");
                }
            }
            Axiom::ClassAssertion { class, individual } => {
                if class.as_str().is_empty() || individual.as_str().is_empty() {
                    return malformed("class and individual names must not be empty");
                }
            }
        }
        Ok(())
    }

    /// Every entity mentioned by this axiom.
    pub fn signature(&self) -> Vec<Entity> {
        match self {
            Axiom::SubClassOf { sub, sup } => {
                vec![Entity::Class(sub.clone()), Entity::Class(sup.clone())]
            }
            Axiom::EquivalentClasses { classes } | Axiom::DisjointClasses { classes } => {
                classes.iter().cloned().map(Entity::Class).collect()
            }
            Axiom::ClassAssertion { class, individual } => vec![
                Entity::Class(class.clone()),
                Entity::Individual(individual.clone()),
            ],
        }
    }
}

impl std::fmt::Display for Axiom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn join(classes: &BTreeSet<ClassName>) -> String {
            classes
                .iter()
                .map(ClassName::as_str)
                .collect::<Vec<_>>()
                .join(" ")
        }
        match self {
            Axiom::SubClassOf { sub, sup } => write!(f, "SubClassOf({sub} {sup})"),
            Axiom::EquivalentClasses { classes } => {
                write!(f, "EquivalentClasses({})", join(classes))
            }
            Axiom::DisjointClasses { classes } => write!(f, "DisjointClasses({})", join(classes)),
            Axiom::ClassAssertion { class, individual } => {
                write!(f, "ClassAssertion({class} {individual})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axiom_json_shape() {
        let ax = Axiom::sub_class_of("Dog", "Animal");
        let json = serde_json::to_string(&ax).unwrap();
        assert_eq!(json, r#"{"sub_class_of":{"sub":"Dog","sup":"Animal"}}"#);

        let back: Axiom = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ax);
    }

    #[test]
    fn entity_json_shape() {
        let json = serde_json::to_string(&Entity::individual("rex")).unwrap();
        assert_eq!(json, r#"{"individual":"rex"}"#);
    }

    #[test]
    fn equivalence_of_one_class_is_malformed() {
        let ax = Axiom::equivalent(["A", "A"]);
        assert!(matches!(
            ax.validate(),
            Err(ReasoningError::MalformedAxiom { .. })
        ));
        assert!(Axiom::equivalent(["A", "B"]).validate().is_ok());
    }

    #[test]
    fn display_is_functional_syntax() {
        assert_eq!(
            Axiom::disjoint(["Cat", "Dog"]).to_string(),
            "DisjointClasses(Cat Dog)"
        );
        assert_eq!(
            Axiom::class_assertion("Dog", "rex").to_string(),
            "ClassAssertion(Dog rex)"
        );
    }
}
