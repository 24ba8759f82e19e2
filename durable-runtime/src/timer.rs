use crate::engine::{Engine, check_running_at};
use crate::error::EngineError;
use durable_core::journal::Step;
use durable_core::primitives::{JournalId, WorkflowId};
use durable_persistence::WorkflowStore;

impl<S> Engine<S>
where
    S: WorkflowStore + 'static,
{
    /// Mark a sleep step as elapsed and poll again.
    ///
    /// Fired by the scheduler at the step's deadline.
    pub async fn complete_sleep(
        &self,
        workflow_id: &WorkflowId,
        generation_number: u64,
        journal_id: &JournalId,
    ) -> Result<(), EngineError> {
        let workflow = self.require_workflow(workflow_id).await?;
        check_running_at(&workflow, generation_number)?;
        let mut entry = self.require_entry(workflow_id, journal_id).await?;
        let Step::Sleep(step) = &mut entry.step else {
            return Err(EngineError::Validation(format!(
                "Journal entry {} of workflow {} is not a sleep step",
                entry.step_number, workflow_id
            )));
        };
        if !step.in_progress {
            return Err(EngineError::InvalidState(format!(
                "Sleep step {} of workflow {} already completed",
                entry.step_number, workflow_id
            )));
        }

        step.in_progress = false;
        let step_number = entry.step_number;
        self.store.replace_entry(entry).await?;
        tracing::debug!(
            workflow_id = %workflow_id,
            journal_id = %journal_id,
            step_number,
            generation_number,
            "Sleep step elapsed"
        );

        self.poll(workflow_id, generation_number).await.map(|_| ())
    }
}
