//! Heartbeats for untransacted function steps.
//!
//! An untransacted operation is not tracked by the store, so if the job
//! running it dies nothing would ever record an outcome. Each heartbeat
//! checks that the run is still alive and otherwise fails the step on the
//! workflow's behalf, under a new generation so that a late result from the
//! old run is ignored.

use crate::clock;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::logging::WorkflowLogger;
use crate::scheduler::ScheduledJob;
use durable_core::journal::Step;
use durable_core::primitives::{JournalId, ScheduledId, WorkflowId};
use durable_core::workflow::Outcome;
use durable_persistence::WorkflowStore;

/// Error message recorded on a step whose run disappeared.
pub const TRANSIENT_FAILURE_MESSAGE: &str = "Transient error while executing untransacted step";

/// What a heartbeat did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Heartbeat {
    /// The workflow finished or moved to another generation.
    Stale,
    /// The step already has an outcome.
    StepFinished,
    /// The scheduler has no record of the run.
    RunMissing,
    /// The run is still live; the next heartbeat has this id.
    Rescheduled(ScheduledId),
    /// The run died. The step was failed and the workflow polled at the new generation.
    ForceFailed,
}

impl<S> Engine<S>
where
    S: WorkflowStore + 'static,
{
    /// Check on the run `run_id` executing function step `journal_id`.
    pub async fn recover(
        &self,
        workflow_id: &WorkflowId,
        generation_number: u64,
        journal_id: &JournalId,
        run_id: &ScheduledId,
    ) -> Result<Heartbeat, EngineError> {
        let Some(mut workflow) = self.store.get_workflow(workflow_id).await? else {
            return Ok(Heartbeat::Stale);
        };
        if !workflow.is_running() || workflow.generation_number != generation_number {
            return Ok(Heartbeat::Stale);
        }

        let mut entry = self.require_entry(workflow_id, journal_id).await?;
        let Step::Function(step) = &mut entry.step else {
            return Err(EngineError::Validation(format!(
                "Journal entry {} of workflow {} is not a function step",
                entry.step_number, workflow_id
            )));
        };
        if !step.in_progress || step.outcome.is_some() {
            return Ok(Heartbeat::StepFinished);
        }

        let logger = WorkflowLogger::for_workflow(&workflow);
        let Some(status) = self.scheduler.status(run_id).await? else {
            logger.warn(format_args!(
                "Run {} of step {} not found, stopping heartbeats",
                run_id, entry.step_number
            ));
            return Ok(Heartbeat::RunMissing);
        };

        if status.is_live() {
            let next = self
                .scheduler
                .schedule_at(
                    clock::after(self.clock.now(), self.config.heartbeat_interval),
                    ScheduledJob::Recover {
                        workflow_id: workflow_id.clone(),
                        generation_number,
                        journal_id: journal_id.clone(),
                        run_id: run_id.clone(),
                    },
                )
                .await?;
            step.recovery_handle = Some(next.clone());
            self.store.replace_entry(entry).await?;
            logger.debug(format_args!("Run {} is {:?}, heartbeat rescheduled", run_id, status));
            return Ok(Heartbeat::Rescheduled(next));
        }

        logger.warn(format_args!(
            "Run {} of step {} is {:?} without an outcome, failing the step",
            run_id, entry.step_number, status
        ));
        step.recovery_handle = None;
        workflow.generation_number += 1;
        let next_generation = workflow.generation_number;
        self.store.replace_workflow(workflow, generation_number).await?;
        self.store.replace_entry(entry).await?;

        self.complete_function(
            workflow_id,
            next_generation,
            journal_id,
            Outcome::error(TRANSIENT_FAILURE_MESSAGE),
        )
        .await?;
        Ok(Heartbeat::ForceFailed)
    }
}
