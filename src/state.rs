//! The process-wide, replaceable server state.
//!
//! Requests capture an `Arc<ServerState>` at dispatch and keep using it even if
//! the refresh job swaps in a newer generation meanwhile. The swap itself is a
//! pointer replace under the holder's write lock, so a reader sees either the
//! old state or the new one, never a mix.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{ReasoningError, SchemaResult, StateError};
use crate::kb::{KbSettings, KnowledgeBase};
use crate::source::{Catalog, OntologyDocument, OntologySource, RejectedDocument};

/// One loaded ontology and the source version it mirrors.
#[derive(Clone)]
pub struct OntologyState {
    pub version: String,
    pub kb: Arc<KnowledgeBase>,
}

/// A consistent snapshot of every knowledge base the service answers for.
pub struct ServerState {
    generation: u64,
    loaded_at: u64,
    ontologies: BTreeMap<String, OntologyState>,
}

/// Listing entry for `GET /ontologies`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OntologySummary {
    pub name: String,
    pub version: String,
    pub axioms: usize,
    pub revision: u64,
}

impl ServerState {
    fn new(generation: u64, ontologies: BTreeMap<String, OntologyState>) -> Self {
        Self {
            generation,
            loaded_at: unix_now(),
            ontologies,
        }
    }

    /// Incremented on every swap.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Unix seconds at which this generation was built.
    pub fn loaded_at(&self) -> u64 {
        self.loaded_at
    }

    pub fn get(&self, name: &str) -> Result<Arc<KnowledgeBase>, ReasoningError> {
        self.ontologies
            .get(name)
            .map(|o| Arc::clone(&o.kb))
            .ok_or_else(|| ReasoningError::UnknownOntology {
                name: name.to_string(),
            })
    }

    pub fn version(&self, name: &str) -> Option<&str> {
        self.ontologies.get(name).map(|o| o.version.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ontologies.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ontologies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ontologies.is_empty()
    }

    pub fn summaries(&self) -> Vec<OntologySummary> {
        self.ontologies
            .iter()
            .map(|(name, o)| OntologySummary {
                name: name.clone(),
                version: o.version.clone(),
                axioms: o.kb.axioms().len(),
                revision: o.kb.revision(),
            })
            .collect()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// What one refresh did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub generation: u64,
    /// Same version, same knowledge base.
    pub reused: usize,
    /// Changed version, knowledge base rebuilt.
    pub updated: usize,
    /// Newly published, new knowledge base built.
    pub added: usize,
    /// No longer published.
    pub dropped: usize,
    /// Rejected documents; the previous state of each is kept.
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed(RefreshSummary),
    /// The holder was closed before or during the refresh; nothing changed.
    Closed,
}

/// Owns the current [`ServerState`] and replaces it on refresh.
pub struct StateHolder {
    current: RwLock<Option<Arc<ServerState>>>,
    closed: AtomicBool,
    /// Serializes refreshes.
    refreshing: Mutex<()>,
    settings: KbSettings,
}

impl StateHolder {
    /// Build the first generation from `source`. Any unreadable or malformed
    /// document fails startup.
    pub fn load(source: &dyn OntologySource, settings: KbSettings) -> SchemaResult<Self> {
        let catalog = source.load()?;
        if let Some(rejected) = catalog.rejected.into_iter().next() {
            return Err(rejected.error.into());
        }
        let mut ontologies = BTreeMap::new();
        for doc in catalog.documents {
            let kb = KnowledgeBase::new(doc.name.clone(), &doc.axioms, settings)?;
            ontologies.insert(
                doc.name,
                OntologyState {
                    version: doc.version,
                    kb: Arc::new(kb),
                },
            );
        }
        tracing::info!(
            source = %source.describe(),
            ontologies = ontologies.len(),
            "server state loaded"
        );
        Ok(Self {
            current: RwLock::new(Some(Arc::new(ServerState::new(1, ontologies)))),
            closed: AtomicBool::new(false),
            refreshing: Mutex::new(()),
            settings,
        })
    }

    pub fn settings(&self) -> KbSettings {
        self.settings
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The latest generation.
    pub fn current(&self) -> Result<Arc<ServerState>, StateError> {
        self.current
            .read()
            .expect("state lock poisoned")
            .clone()
            .ok_or(StateError::Closed)
    }

    /// Bring the state in line with `source` and swap the result in.
    pub fn refresh(&self, source: &dyn OntologySource) -> SchemaResult<RefreshOutcome> {
        let _refreshing = self.refreshing.lock().expect("refresh lock poisoned");
        let Ok(previous) = self.current() else {
            return Ok(RefreshOutcome::Closed);
        };
        let Catalog {
            documents,
            rejected,
        } = source.load()?;

        let mut summary = RefreshSummary::default();
        let mut ontologies = BTreeMap::new();
        for doc in documents {
            let name = doc.name.clone();
            match self.merge(previous.ontologies.get(&name), doc, &mut summary) {
                Some(state) => {
                    ontologies.insert(name, state);
                }
                None => {
                    if let Some(old) = previous.ontologies.get(&name) {
                        ontologies.insert(name, old.clone());
                    }
                }
            }
        }
        for RejectedDocument { name, error } in rejected {
            tracing::warn!(ontology = %name, error = %error, "unreadable ontology document");
            summary.failed += 1;
            if let Some(old) = previous.ontologies.get(&name) {
                ontologies.insert(name, old.clone());
            }
        }
        summary.dropped = previous
            .ontologies
            .keys()
            .filter(|name| !ontologies.contains_key(*name))
            .count();

        let mut current = self.current.write().expect("state lock poisoned");
        if self.is_closed() {
            return Ok(RefreshOutcome::Closed);
        }
        summary.generation = previous.generation + 1;
        *current = Some(Arc::new(ServerState::new(summary.generation, ontologies)));
        Ok(RefreshOutcome::Refreshed(summary))
    }

    /// Carry one document into the next generation. A changed version gets a
    /// new knowledge base, so generations never share a changing one. `None`
    /// means the document was rejected.
    fn merge(
        &self,
        previous: Option<&OntologyState>,
        doc: OntologyDocument,
        summary: &mut RefreshSummary,
    ) -> Option<OntologyState> {
        if let Some(old) = previous.filter(|old| old.version == doc.version) {
            summary.reused += 1;
            return Some(old.clone());
        }
        match KnowledgeBase::new(doc.name.clone(), &doc.axioms, self.settings) {
            Ok(kb) => {
                if previous.is_some() {
                    summary.updated += 1;
                } else {
                    summary.added += 1;
                }
                Some(OntologyState {
                    version: doc.version,
                    kb: Arc::new(kb),
                })
            }
            Err(e) => {
                tracing::warn!(ontology = %doc.name, error = %e, "rejected ontology document");
                summary.failed += 1;
                None
            }
        }
    }

    /// Close every knowledge base of the current generation. Later refreshes
    /// are no-ops and [`current`](Self::current) fails.
    pub fn close(&self) {
        let taken = {
            let mut current = match self.current.write() {
                Ok(guard) => guard,
                Err(poisoned) => {
                    tracing::debug!("state lock poisoned during close");
                    poisoned.into_inner()
                }
            };
            self.closed.store(true, Ordering::Release);
            current.take()
        };
        if let Some(state) = taken {
            for o in state.ontologies.values() {
                o.kb.close();
            }
            tracing::debug!(generation = state.generation, "server state closed");
        }
    }
}
