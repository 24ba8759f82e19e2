//! Checked access to a workflow's journal.
//!
//! Appends enforce the journal invariants: only a running workflow at the
//! caller's generation can grow, step numbers stay contiguous from 0, and a
//! new entry always starts in progress.

use crate::error::EngineError;
use chrono::{DateTime, Utc};
use durable_core::journal::{JournalEntry, Step, StepType};
use durable_core::primitives::{JournalId, WorkflowId};
use durable_core::workflow::Workflow;
use durable_persistence::{Order, WorkflowStore};

pub struct Journal<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S> Journal<'a, S>
where
    S: WorkflowStore + ?Sized,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Append `step` as entry `step_number` of a running workflow.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the workflow is terminal or at another generation
    /// - `Corruption` if the step is not in progress, the step number is
    ///   taken, or it is not exactly one past the current maximum
    pub async fn append_entry(
        &self,
        workflow_id: &WorkflowId,
        generation_number: u64,
        step_number: u64,
        step: Step,
        now: DateTime<Utc>,
    ) -> Result<JournalEntry, EngineError> {
        let workflow = self.running_workflow(workflow_id).await?;
        if workflow.generation_number != generation_number {
            return Err(EngineError::InvalidState(format!(
                "Workflow {} is at generation {}, not {}",
                workflow_id, workflow.generation_number, generation_number
            )));
        }
        if !step.in_progress() {
            return Err(EngineError::Corruption(format!(
                "New journal entry {} of workflow {} is not in progress",
                step_number, workflow_id
            )));
        }
        if self
            .store
            .entry_by_step(workflow_id, step_number)
            .await?
            .is_some()
        {
            return Err(EngineError::Corruption(format!(
                "Journal entry {} of workflow {} already exists",
                step_number, workflow_id
            )));
        }
        let expected = self
            .store
            .last_entry(workflow_id)
            .await?
            .map_or(0, |last| last.step_number + 1);
        if step_number != expected {
            return Err(EngineError::Corruption(format!(
                "Invalid step number {} for workflow {}, expected {}",
                step_number, workflow_id, expected
            )));
        }

        let entry = JournalEntry {
            id: JournalId::generate(),
            workflow_id: workflow_id.clone(),
            step_number,
            step,
            created_at: now,
        };
        self.store.insert_entry(entry.clone()).await?;
        tracing::debug!(
            workflow_id = %workflow_id,
            journal_id = %entry.id,
            step_number,
            "Journal entry appended"
        );
        Ok(entry)
    }

    /// All entries of a running workflow in step order.
    pub async fn load_entries(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<JournalEntry>, EngineError> {
        self.running_workflow(workflow_id).await?;
        Ok(self
            .store
            .entries_by_workflow(workflow_id, Order::Asc)
            .await?)
    }

    /// The workflow's single in-progress entry, if any.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` if more than one entry is in progress.
    pub async fn find_in_progress_entry(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<JournalEntry>, EngineError> {
        let mut found = Vec::new();
        for step_type in StepType::ALL {
            found.extend(self.store.in_progress_entries(step_type, workflow_id).await?);
        }
        if found.len() > 1 {
            return Err(EngineError::Corruption(format!(
                "Workflow {} has {} in-progress journal entries",
                workflow_id,
                found.len()
            )));
        }
        Ok(found.pop())
    }

    async fn running_workflow(&self, workflow_id: &WorkflowId) -> Result<Workflow, EngineError> {
        let workflow = self
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("workflow {}", workflow_id)))?;
        if !workflow.is_running() {
            return Err(EngineError::InvalidState(format!(
                "Workflow {} is not running",
                workflow_id
            )));
        }
        Ok(workflow)
    }
}
