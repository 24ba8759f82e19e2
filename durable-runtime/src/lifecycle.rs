//! Workflow lifecycle: create, cancel, complete, cleanup and inspection.

use crate::engine::{Engine, check_running_at};
use crate::error::EngineError;
use crate::logging::WorkflowLogger;
use crate::scheduler::ScheduledJob;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use durable_core::journal::JournalEntry;
use durable_core::primitives::WorkflowId;
use durable_core::workflow::{LogLevel, Outcome, Workflow, WorkflowState, WorkflowStatus};
use durable_persistence::{Order, WorkflowStore};

impl<S> Engine<S>
where
    S: WorkflowStore + 'static,
{
    /// Start `handle` with `args` at the configured default log level.
    pub async fn start(&self, handle: &str, args: Bytes) -> Result<WorkflowId, EngineError> {
        self.create(handle, args, None).await
    }

    /// Insert a running workflow at generation 0 and schedule its first poll.
    ///
    /// # Errors
    ///
    /// `Validation` if the handle is not registered, the arguments do not
    /// decode, or `log_level` is not a known level.
    pub async fn create(
        &self,
        handle: &str,
        args: Bytes,
        log_level: Option<&str>,
    ) -> Result<WorkflowId, EngineError> {
        let entry = self.workflows.get(handle).ok_or_else(|| {
            EngineError::Validation(format!("Workflow handler '{}' is not registered", handle))
        })?;
        entry.validate(&args).map_err(|e| {
            EngineError::Validation(format!("Invalid arguments for '{}': {}", handle, e))
        })?;
        let log_level = match log_level {
            Some(level) => level
                .parse::<LogLevel>()
                .map_err(|e| EngineError::Validation(e.to_string()))?,
            None => self.config.default_log_level,
        };

        let now = self.clock.now();
        let workflow = Workflow::new(WorkflowId::generate(), handle, args.to_vec(), log_level, now);
        let id = workflow.id.clone();
        self.store.insert_workflow(workflow).await?;
        self.scheduler
            .schedule_at(
                now,
                ScheduledJob::Poll {
                    workflow_id: id.clone(),
                    generation_number: 0,
                },
            )
            .await?;

        WorkflowLogger::new(id.clone(), log_level)
            .info(format_args!("Workflow '{}' started", handle));
        Ok(id)
    }

    pub async fn status(&self, workflow_id: &WorkflowId) -> Result<WorkflowStatus, EngineError> {
        Ok(self.require_workflow(workflow_id).await?.status())
    }

    /// Move a running workflow to `Canceled` and bump its generation.
    ///
    /// Continuations already scheduled for the old generation turn into
    /// no-ops when they fire.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the workflow already finished.
    pub async fn cancel(&self, workflow_id: &WorkflowId) -> Result<(), EngineError> {
        let mut workflow = self.require_workflow(workflow_id).await?;
        if !workflow.is_running() {
            return Err(EngineError::InvalidState(format!(
                "Cannot cancel workflow {}: it is already {}",
                workflow_id,
                workflow.status()
            )));
        }
        let expected = workflow.generation_number;
        workflow.state = WorkflowState::Canceled {
            canceled_at: self.clock.now(),
        };
        workflow.generation_number += 1;
        let logger = WorkflowLogger::for_workflow(&workflow);
        self.store.replace_workflow(workflow, expected).await?;
        logger.info(format_args!("Workflow canceled at generation {}", expected));
        Ok(())
    }

    /// Record the handler's outcome on a running workflow.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the workflow is not running at `generation_number`.
    pub async fn complete(
        &self,
        workflow_id: &WorkflowId,
        generation_number: u64,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let mut workflow = self.require_workflow(workflow_id).await?;
        check_running_at(&workflow, generation_number)?;

        let logger = WorkflowLogger::for_workflow(&workflow);
        let succeeded = outcome.is_success();
        workflow.state = WorkflowState::Completed {
            completed_at: now,
            outcome,
        };
        self.store.replace_workflow(workflow, generation_number).await?;
        if succeeded {
            logger.info("Workflow completed");
        } else {
            logger.warn("Workflow completed with an error");
        }
        Ok(())
    }

    /// Delete a finished workflow and its journal.
    ///
    /// Returns `false` without touching anything if the workflow is unknown
    /// or still running.
    pub async fn cleanup(&self, workflow_id: &WorkflowId) -> Result<bool, EngineError> {
        let Some(workflow) = self.store.get_workflow(workflow_id).await? else {
            return Ok(false);
        };
        if workflow.is_running() {
            return Ok(false);
        }

        let entries = self.store.entries_by_workflow(workflow_id, Order::Asc).await?;
        for entry in &entries {
            self.store.delete_entry(&entry.id).await?;
        }
        self.store.delete_workflow(workflow_id).await?;
        tracing::debug!(
            workflow_id = %workflow_id,
            entries = entries.len(),
            "Workflow cleaned up"
        );
        Ok(true)
    }

    pub async fn load(&self, workflow_id: &WorkflowId) -> Result<Workflow, EngineError> {
        self.require_workflow(workflow_id).await
    }

    /// The full journal in step order, whatever the workflow's state.
    pub async fn entries(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<JournalEntry>, EngineError> {
        self.require_workflow(workflow_id).await?;
        Ok(self.store.entries_by_workflow(workflow_id, Order::Asc).await?)
    }
}
