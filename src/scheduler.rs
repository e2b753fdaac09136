//! Recurring background jobs.
//!
//! A job runs on the blocking pool at a fixed period, starting immediately.
//! Runs never overlap: the next tick waits for the current run. Cancelling a
//! job stops the loop at once; a run already in progress is abandoned, its
//! result dropped when it eventually returns.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{SchedulingError, SchemaResult, ShutdownError};
use crate::source::OntologySource;
use crate::state::{RefreshOutcome, StateHolder};

/// A unit of periodic work with a fixed identity.
pub trait RecurringJob: Send + Sync + 'static {
    fn id(&self) -> &str;

    /// One run. Blocking is fine; this is called off the async workers.
    fn run(&self) -> SchemaResult<()>;
}

/// Runs [`RecurringJob`]s until cancelled.
pub trait JobScheduler {
    fn schedule(
        &self,
        job: Arc<dyn RecurringJob>,
        period: Duration,
    ) -> Result<JobHandle, SchedulingError>;
}

/// Control over one scheduled job. Dropping the handle cancels the job.
pub struct JobHandle {
    id: String,
    cancel: watch::Sender<bool>,
    runs: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Completed runs, successful or not.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the job without waiting for it.
    pub fn cancel(&self) -> Result<(), ShutdownError> {
        let already = self.cancel.send_replace(true);
        if already || self.task.is_finished() {
            return Err(ShutdownError::JobAlreadyStopped {
                job: self.id.clone(),
            });
        }
        Ok(())
    }

    /// Wait until the job loop has exited.
    pub async fn stopped(self) {
        // A panicking job loop is already logged by the runtime.
        let _ = self.task.await;
    }
}

/// Schedules jobs on the ambient Tokio runtime.
#[derive(Clone, Default)]
pub struct TokioScheduler {
    active: Arc<DashMap<String, ()>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identities of jobs whose loop is still running.
    pub fn active(&self) -> Vec<String> {
        self.active.iter().map(|e| e.key().clone()).collect()
    }
}

impl JobScheduler for TokioScheduler {
    fn schedule(
        &self,
        job: Arc<dyn RecurringJob>,
        period: Duration,
    ) -> Result<JobHandle, SchedulingError> {
        let id = job.id().to_string();
        if period.is_zero() {
            return Err(SchedulingError::ZeroPeriod { job: id });
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| SchedulingError::NoRuntime { job: id.clone() })?;

        match self.active.entry(id.clone()) {
            Entry::Occupied(_) => return Err(SchedulingError::DuplicateJob { job: id }),
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }

        let (cancel, cancel_rx) = watch::channel(false);
        let runs = Arc::new(AtomicU64::new(0));
        let task = runtime.spawn(run_job(
            job,
            period,
            cancel_rx,
            Arc::clone(&runs),
            Arc::clone(&self.active),
        ));
        tracing::info!(job = %id, period_secs = period.as_secs_f64(), "job scheduled");
        Ok(JobHandle {
            id,
            cancel,
            runs,
            task,
        })
    }
}

async fn run_job(
    job: Arc<dyn RecurringJob>,
    period: Duration,
    mut cancel_rx: watch::Receiver<bool>,
    runs: Arc<AtomicU64>,
    active: Arc<DashMap<String, ()>>,
) {
    let id = job.id().to_string();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel_rx.changed() => break,
            _ = ticker.tick() => {
                let run = tokio::task::spawn_blocking({
                    let job = Arc::clone(&job);
                    move || job.run()
                });
                tokio::select! {
                    biased;
                    _ = cancel_rx.changed() => {
                        tracing::debug!(job = %id, "cancelled during run; abandoning it");
                        break;
                    }
                    result = run => {
                        match result {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => tracing::warn!(job = %id, error = %e, "job run failed"),
                            Err(e) => tracing::error!(job = %id, error = %e, "job run panicked"),
                        }
                        runs.fetch_add(1, Ordering::AcqRel);
                    }
                }
            }
        }
    }

    active.remove(&id);
    tracing::info!(job = %id, runs = runs.load(Ordering::Acquire), "job stopped");
}

/// Keeps a [`StateHolder`] in sync with its source.
pub struct StateRefreshJob {
    holder: Arc<StateHolder>,
    source: Arc<dyn OntologySource>,
}

impl StateRefreshJob {
    pub const ID: &'static str = "server-state-refresh";

    pub fn new(holder: Arc<StateHolder>, source: Arc<dyn OntologySource>) -> Self {
        Self { holder, source }
    }
}

impl RecurringJob for StateRefreshJob {
    fn id(&self) -> &str {
        Self::ID
    }

    fn run(&self) -> SchemaResult<()> {
        match self.holder.refresh(self.source.as_ref())? {
            RefreshOutcome::Refreshed(summary) => {
                tracing::debug!(
                    source = %self.source.describe(),
                    generation = summary.generation,
                    reused = summary.reused,
                    updated = summary.updated,
                    added = summary.added,
                    dropped = summary.dropped,
                    failed = summary.failed,
                    "server state refreshed"
                );
            }
            RefreshOutcome::Closed => {
                tracing::debug!("server state closed; refresh skipped");
            }
        }
        Ok(())
    }
}
