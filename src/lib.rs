// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # schemad
//!
//! A schema reasoning service: one shared, incrementally classified knowledge
//! base per ontology, served over HTTP and kept in sync with an external
//! ontology source.
//!
//! ## Architecture
//!
//! - **Ontology model** (`ontology`): axioms, entities and class expressions
//! - **Reasoner** (`reasoner`): incremental Horn-OWL classifier with memoised closures
//! - **Explanations** (`explain`): justification search with per-revision memo
//! - **Knowledge base** (`kb`): readers-many / writer-one wrapper with change events
//! - **Server state** (`state`, `source`): versioned snapshots refreshed from a source
//! - **Scheduler** (`scheduler`): recurring jobs on the Tokio runtime
//! - **Server** (`server`): axum routing, graceful shutdown, lifecycle
//! - **Client** (`client`): blocking HTTP client and remote reasoner
//!
//! ## Library usage
//!
//! ```no_run
//! use schemad::kb::{KbSettings, KnowledgeBase};
//! use schemad::ontology::{Axiom, AxiomSet, Entity};
//! use schemad::reasoner::QueryKind;
//!
//! let axioms: AxiomSet = [
//!     Axiom::sub_class_of("Dog", "Mammal"),
//!     Axiom::sub_class_of("Mammal", "Animal"),
//! ]
//! .into_iter()
//! .collect();
//! let kb = KnowledgeBase::new("zoo", &axioms, KbSettings::default()).unwrap();
//! let supers = kb.query(QueryKind::SuperClasses, &Entity::class("Dog")).unwrap();
//! assert!(supers.contains_entity(&Entity::class("Animal")));
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod explain;
pub mod kb;
pub mod ontology;
pub mod reasoner;
pub mod scheduler;
pub mod server;
pub mod source;
pub mod state;
