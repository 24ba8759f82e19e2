use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::dispatch::Dispatcher;
use crate::error::EngineError;
use crate::scheduler::{ScheduledJob, Scheduler};
use durable_core::journal::JournalEntry;
use durable_core::primitives::{JournalId, WorkflowId};
use durable_core::registry::WorkflowRegistry;
use durable_core::workflow::Workflow;
use durable_persistence::{StoreError, WorkflowStore};
use std::sync::Arc;

/// The journal-replay engine.
///
/// Owns nothing durable itself: workflow rows and journals live in the store,
/// continuations live in the scheduler. Cloning is cheap and clones share all
/// collaborators.
///
/// # Example
///
/// ```rust,ignore
/// let engine = Engine::new(InMemoryStore::new(), scheduler.clone(), functions, workflows)
///     .with_config(EngineConfig::default().with_max_journal_size(64 * 1024));
///
/// let id = engine.start("checkout", codec.encode(&cart)?).await?;
/// Worker::new("worker-1", engine.clone()).run_until_idle().await?;
/// assert_eq!(engine.status(&id).await?, WorkflowStatus::Completed);
/// ```
pub struct Engine<S> {
    pub(crate) store: Arc<S>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) dispatcher: Arc<dyn Dispatcher>,
    pub(crate) workflows: Arc<WorkflowRegistry>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: EngineConfig,
}

impl<S> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            scheduler: Arc::clone(&self.scheduler),
            dispatcher: Arc::clone(&self.dispatcher),
            workflows: Arc::clone(&self.workflows),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
        }
    }
}

impl<S> Engine<S>
where
    S: WorkflowStore + 'static,
{
    pub fn new<Sch, D>(store: S, scheduler: Sch, dispatcher: D, workflows: WorkflowRegistry) -> Self
    where
        Sch: Scheduler + 'static,
        D: Dispatcher + 'static,
    {
        Self {
            store: Arc::new(store),
            scheduler: Arc::new(scheduler),
            dispatcher: Arc::new(dispatcher),
            workflows: Arc::new(workflows),
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
        }
    }

    #[must_use]
    pub fn with_clock<K: Clock + 'static>(mut self, clock: K) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn scheduler(&self) -> &dyn Scheduler {
        self.scheduler.as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one scheduled job.
    ///
    /// Jobs that arrive for a stale generation, a finished or cleaned-up
    /// workflow, or an already completed step are dropped and reported as
    /// success.
    pub async fn execute(&self, job: &ScheduledJob) -> Result<(), EngineError> {
        let result = match job {
            ScheduledJob::Poll {
                workflow_id,
                generation_number,
            } => self.poll(workflow_id, *generation_number).await.map(|_| ()),
            ScheduledJob::RunFunction {
                workflow_id,
                generation_number,
                journal_id,
            } => {
                self.run_function(workflow_id, *generation_number, journal_id)
                    .await
            }
            ScheduledJob::CompleteSleep {
                workflow_id,
                generation_number,
                journal_id,
            } => {
                self.complete_sleep(workflow_id, *generation_number, journal_id)
                    .await
            }
            ScheduledJob::Recover {
                workflow_id,
                generation_number,
                journal_id,
                run_id,
            } => self
                .recover(workflow_id, *generation_number, journal_id, run_id)
                .await
                .map(|_| ()),
        };

        let result = match result {
            Err(e @ (EngineError::NotFound(_) | EngineError::Store(StoreError::NotFound(_)))) => {
                if self.store.get_workflow(job.workflow_id()).await?.is_none() {
                    tracing::debug!(
                        workflow_id = %job.workflow_id(),
                        job = job.name(),
                        "Dropping job for removed workflow"
                    );
                    return Ok(());
                }
                Err(e)
            }
            other => other,
        };

        match result {
            Err(e) if e.is_benign() => {
                tracing::debug!(
                    workflow_id = %job.workflow_id(),
                    job = job.name(),
                    error = %e,
                    "Dropping stale job"
                );
                Ok(())
            }
            other => other,
        }
    }

    pub(crate) async fn require_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Workflow, EngineError> {
        self.store
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("workflow {}", workflow_id)))
    }

    /// Load an entry and check it belongs to `workflow_id`.
    pub(crate) async fn require_entry(
        &self,
        workflow_id: &WorkflowId,
        journal_id: &JournalId,
    ) -> Result<JournalEntry, EngineError> {
        let entry = self
            .store
            .get_entry(journal_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("journal entry {}", journal_id)))?;
        if entry.workflow_id != *workflow_id {
            return Err(EngineError::Validation(format!(
                "Journal entry {} does not belong to workflow {}",
                journal_id, workflow_id
            )));
        }
        Ok(entry)
    }
}

/// Fails with `InvalidState` unless the workflow is running at `generation_number`.
pub(crate) fn check_running_at(
    workflow: &Workflow,
    generation_number: u64,
) -> Result<(), EngineError> {
    if !workflow.is_running() {
        return Err(EngineError::InvalidState(format!(
            "Workflow {} is not running",
            workflow.id
        )));
    }
    if workflow.generation_number != generation_number {
        return Err(EngineError::InvalidState(format!(
            "Workflow {} is at generation {}, not {}",
            workflow.id, workflow.generation_number, generation_number
        )));
    }
    Ok(())
}
