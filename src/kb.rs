//! The knowledge base: one reasoning engine plus its explanation generator,
//! shared by every request that touches an ontology.
//!
//! Access is readers-many / writer-one. Queries and explanations hold the read
//! side of the engine lock; [`KnowledgeBase::update`] holds the write side for
//! the whole batch, so no reader ever sees a half-applied change. The
//! `listening` flag is up only while an update is being applied, and change
//! notifications are published after the write lock is released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{ReasoningError, SchemaResult};
use crate::explain::{ExplainLimitPolicy, ExplanationGenerator, Explanations};
use crate::ontology::{Axiom, AxiomSet, Entity};
use crate::reasoner::{NodeSet, QueryKind, Reasoner};

/// Buffered change notifications per subscriber before old ones are dropped.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// The operations every schema reasoner offers, local or remote.
pub trait SchemaReasoner {
    /// Answer a hierarchy or instance query about one entity.
    fn query(&self, kind: QueryKind, entity: &Entity) -> SchemaResult<NodeSet>;

    /// Whether the ontology entails `axiom`.
    fn is_entailed(&self, axiom: &Axiom) -> SchemaResult<bool>;

    /// Up to `limit` justifications for `axiom` (`0` = all).
    fn explain(&self, axiom: &Axiom, limit: usize) -> SchemaResult<Explanations>;

    /// Apply `additions`, then `removals`, as one change.
    fn update(&self, additions: &AxiomSet, removals: &AxiomSet) -> SchemaResult<UpdateSummary>;

    /// Release the reasoner. Safe to call more than once.
    fn close(&self);
}

/// Tunables shared by every knowledge base of a service.
#[derive(Debug, Clone, Copy, Default)]
pub struct KbSettings {
    pub explain_limit: ExplainLimitPolicy,
}

/// Outcome of one update batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSummary {
    pub added: usize,
    pub removed: usize,
    pub revision: u64,
}

/// Published to subscribers after an update changed the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelChange {
    pub ontology: String,
    pub revision: u64,
    pub added: usize,
    pub removed: usize,
}

/// Raises the listening flag for the lifetime of the guard, lowering it on
/// every exit path including unwinding.
struct Listening<'a>(&'a AtomicBool);

impl<'a> Listening<'a> {
    fn start(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Listening(flag)
    }
}

impl Drop for Listening<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct KnowledgeBase {
    name: String,
    reasoner: RwLock<Reasoner>,
    explainer: ExplanationGenerator,
    listening: AtomicBool,
    closed: AtomicBool,
    changes: broadcast::Sender<ModelChange>,
}

impl KnowledgeBase {
    /// Load `axioms` into a fresh engine and classify it.
    pub fn new(
        name: impl Into<String>,
        axioms: &AxiomSet,
        settings: KbSettings,
    ) -> Result<Self, ReasoningError> {
        let name = name.into();
        let reasoner = Reasoner::with_axioms(name.clone(), axioms)?;
        reasoner.classify();
        tracing::info!(ontology = %name, axioms = axioms.len(), "knowledge base loaded");

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            name,
            reasoner: RwLock::new(reasoner),
            explainer: ExplanationGenerator::new(settings.explain_limit),
            listening: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            changes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the engine is currently taking in a change.
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn revision(&self) -> u64 {
        self.read().revision()
    }

    /// Snapshot of the current axioms.
    pub fn axioms(&self) -> AxiomSet {
        self.read().axioms().clone()
    }

    /// Receive a [`ModelChange`] after every effective update.
    pub fn subscribe(&self) -> broadcast::Receiver<ModelChange> {
        self.changes.subscribe()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Reasoner> {
        self.reasoner.read().expect("reasoner lock poisoned")
    }

    fn ensure_open(&self) -> Result<(), ReasoningError> {
        if self.is_closed() {
            return Err(ReasoningError::Closed {
                ontology: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Read access to an engine that is not disposed. `close` raises the flag
    /// before it waits for the write side, so checking again under the guard
    /// catches a close that raced the first check.
    fn read_open(&self) -> Result<std::sync::RwLockReadGuard<'_, Reasoner>, ReasoningError> {
        self.ensure_open()?;
        let reasoner = self.read();
        self.ensure_open()?;
        Ok(reasoner)
    }

    pub fn query(&self, kind: QueryKind, entity: &Entity) -> Result<NodeSet, ReasoningError> {
        self.read_open()?.query(kind, entity)
    }

    pub fn is_entailed(&self, axiom: &Axiom) -> Result<bool, ReasoningError> {
        self.read_open()?.is_entailed(axiom)
    }

    pub fn explain(&self, axiom: &Axiom, limit: usize) -> Result<Explanations, ReasoningError> {
        let reasoner = self.read_open()?;
        self.explainer.explain(&reasoner, axiom, limit)
    }

    /// Apply `additions`, then `removals`. A batch containing a malformed axiom
    /// is rejected before anything changes. An axiom in both batches ends up
    /// removed.
    pub fn update(
        &self,
        additions: &AxiomSet,
        removals: &AxiomSet,
    ) -> Result<UpdateSummary, ReasoningError> {
        self.ensure_open()?;
        for axiom in additions.iter().chain(removals) {
            axiom.validate()?;
        }

        let summary = {
            let mut reasoner = self.reasoner.write().expect("reasoner lock poisoned");
            self.ensure_open()?;
            let _listening = Listening::start(&self.listening);
            let (added, removed) = reasoner.apply(additions, removals);
            if added + removed > 0 {
                self.explainer.invalidate();
            }
            UpdateSummary {
                added,
                removed,
                revision: reasoner.revision(),
            }
        };

        if summary.added + summary.removed > 0 {
            tracing::debug!(
                ontology = %self.name,
                added = summary.added,
                removed = summary.removed,
                revision = summary.revision,
                "knowledge base updated"
            );
            // No subscribers is not an error.
            let _ = self.changes.send(ModelChange {
                ontology: self.name.clone(),
                revision: summary.revision,
                added: summary.added,
                removed: summary.removed,
            });
        }
        Ok(summary)
    }

    /// Release the explanation generator, then the engine. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.explainer.dispose();
        match self.reasoner.write() {
            Ok(mut reasoner) => reasoner.dispose(),
            Err(poisoned) => {
                tracing::debug!(ontology = %self.name, "reasoner lock poisoned during close");
                poisoned.into_inner().dispose();
            }
        }
        tracing::debug!(ontology = %self.name, "knowledge base closed");
    }
}

impl SchemaReasoner for KnowledgeBase {
    fn query(&self, kind: QueryKind, entity: &Entity) -> SchemaResult<NodeSet> {
        Ok(KnowledgeBase::query(self, kind, entity)?)
    }

    fn is_entailed(&self, axiom: &Axiom) -> SchemaResult<bool> {
        Ok(KnowledgeBase::is_entailed(self, axiom)?)
    }

    fn explain(&self, axiom: &Axiom, limit: usize) -> SchemaResult<Explanations> {
        Ok(KnowledgeBase::explain(self, axiom, limit)?)
    }

    fn update(&self, additions: &AxiomSet, removals: &AxiomSet) -> SchemaResult<UpdateSummary> {
        Ok(KnowledgeBase::update(self, additions, removals)?)
    }

    fn close(&self) {
        KnowledgeBase::close(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kb(axioms: &[Axiom]) -> KnowledgeBase {
        KnowledgeBase::new("test", &set(axioms), KbSettings::default()).unwrap()
    }

    fn set(axioms: &[Axiom]) -> AxiomSet {
        axioms.iter().cloned().collect()
    }

    #[test]
    fn update_leaves_engine_quiescent() {
        let kb = kb(&[Axiom::sub_class_of("A", "B")]);
        assert!(!kb.is_listening());

        kb.update(&set(&[Axiom::sub_class_of("B", "C")]), &AxiomSet::new())
            .unwrap();
        assert!(!kb.is_listening());

        let err = kb.update(&set(&[Axiom::equivalent(["A"])]), &AxiomSet::new());
        assert!(err.is_err());
        assert!(!kb.is_listening());
    }

    #[test]
    fn malformed_batch_changes_nothing() {
        let kb = kb(&[Axiom::sub_class_of("A", "B")]);
        let before = kb.revision();
        let batch = set(&[Axiom::sub_class_of("B", "C"), Axiom::disjoint(["X"])]);

        assert!(matches!(
            kb.update(&batch, &AxiomSet::new()),
            Err(ReasoningError::MalformedAxiom { .. })
        ));
        assert_eq!(kb.revision(), before);
        assert!(!kb.axioms().contains(&Axiom::sub_class_of("B", "C")));
    }

    #[test]
    fn removals_apply_after_additions() {
        let kb = kb(&[]);
        let ax = Axiom::sub_class_of("A", "B");
        let summary = kb.update(&set(&[ax.clone()]), &set(&[ax.clone()])).unwrap();
        assert_eq!((summary.added, summary.removed), (1, 1));
        assert!(!kb.axioms().contains(&ax));
    }

    #[test]
    fn explain_sees_updates() {
        let kb = kb(&[Axiom::sub_class_of("A", "B")]);
        let goal = Axiom::sub_class_of("A", "C");
        assert!(kb.explain(&goal, 0).unwrap().is_empty());

        kb.update(&set(&[Axiom::sub_class_of("B", "C")]), &AxiomSet::new())
            .unwrap();
        assert_eq!(kb.explain(&goal, 0).unwrap().len(), 1);
    }

    #[test]
    fn subscribers_get_change_after_update() {
        let kb = kb(&[]);
        let mut rx = kb.subscribe();
        kb.update(&set(&[Axiom::sub_class_of("A", "B")]), &AxiomSet::new())
            .unwrap();

        let change = rx.try_recv().unwrap();
        assert_eq!(change.ontology, "test");
        assert_eq!(change.added, 1);

        // A no-op update publishes nothing.
        kb.update(&set(&[Axiom::sub_class_of("A", "B")]), &AxiomSet::new())
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn close_is_idempotent_and_rejects_calls() {
        let kb = kb(&[Axiom::sub_class_of("A", "B")]);
        kb.close();
        kb.close();
        assert!(kb.is_closed());
        assert!(matches!(
            kb.query(QueryKind::SuperClasses, &Entity::class("A")),
            Err(ReasoningError::Closed { .. })
        ));
        assert!(matches!(
            kb.update(&AxiomSet::new(), &AxiomSet::new()),
            Err(ReasoningError::Closed { .. })
        ));
    }

    #[test]
    fn close_during_queries_never_exposes_disposed_engine() {
        let kb = kb(&[Axiom::sub_class_of("A", "B"), Axiom::sub_class_of("B", "C")]);
        let a = Entity::class("A");
        let goal = Axiom::sub_class_of("A", "C");

        std::thread::scope(|scope| {
            let readers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        let mut closed = 0;
                        while closed < 10 {
                            let answers = [
                                kb.query(QueryKind::SuperClasses, &a).map(|_| ()),
                                kb.is_entailed(&goal).map(|entailed| assert!(entailed)),
                                kb.explain(&goal, 0).map(|e| assert_eq!(e.len(), 1)),
                            ];
                            for answer in answers {
                                match answer {
                                    Ok(()) => {}
                                    Err(ReasoningError::Closed { .. }) => closed += 1,
                                    Err(e) => panic!("query against closing engine: {e}"),
                                }
                            }
                        }
                    })
                })
                .collect();
            std::thread::sleep(std::time::Duration::from_millis(5));
            kb.close();
            for reader in readers {
                reader.join().unwrap();
            }
        });

        assert!(matches!(
            kb.update(&set(&[Axiom::sub_class_of("C", "D")]), &AxiomSet::new()),
            Err(ReasoningError::Closed { .. })
        ));
    }
}
