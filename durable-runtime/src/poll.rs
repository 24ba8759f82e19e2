//! The poll cycle: advance one workflow as far as its journal allows.
//!
//! A poll reloads the workflow, replays its journal through a fresh handler
//! run, and races the handler against the step executor. Either the handler
//! finishes (the workflow completes) or the executor journals a new step and
//! hands it to the scheduler (the workflow suspends). Stale or redundant
//! polls return without touching anything.

use crate::clock;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::executor::StepExecutor;
use crate::journal::Journal;
use crate::logging::WorkflowLogger;
use crate::scheduler::ScheduledJob;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use durable_core::context::{LogicalClock, step_channel};
use durable_core::journal::{FunctionKind, JournalEntry, Step};
use durable_core::primitives::{JournalId, WorkflowId};
use durable_core::workflow::{Outcome, Workflow};
use durable_persistence::WorkflowStore;
use futures::FutureExt;
use futures::future::{self, Either};
use std::panic::AssertUnwindSafe;

/// Outcome message recorded when a handler panics.
pub const HANDLER_PANIC_MESSAGE: &str = "workflow handler panicked";

/// What a poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    /// The trigger was for another generation. Nothing changed.
    StaleGeneration,
    /// The workflow already finished. Nothing changed.
    Terminal,
    /// Another step is still outstanding. Nothing changed.
    Outstanding(JournalId),
    /// The handler returned and the workflow is now completed.
    Completed,
    /// A new step was journaled and dispatched.
    Suspended(JournalEntry),
}

impl<S> Engine<S>
where
    S: WorkflowStore + 'static,
{
    /// Run one poll cycle for `workflow_id` at `generation_number`.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown workflows, `ReplayMismatch` when the handler
    /// diverges from its journal, `Corruption` when journal invariants do not
    /// hold. A failing handler is not an error: it completes the workflow
    /// with an error outcome.
    pub async fn poll(
        &self,
        workflow_id: &WorkflowId,
        generation_number: u64,
    ) -> Result<PollResult, EngineError> {
        let workflow = self.require_workflow(workflow_id).await?;
        let logger = WorkflowLogger::for_workflow(&workflow);

        if workflow.generation_number != generation_number {
            logger.debug(format_args!(
                "Ignoring poll for generation {}, workflow is at {}",
                generation_number, workflow.generation_number
            ));
            return Ok(PollResult::StaleGeneration);
        }
        if workflow.is_terminal() {
            logger.debug("Ignoring poll for finished workflow");
            return Ok(PollResult::Terminal);
        }

        let journal = Journal::new(self.store.as_ref());
        if let Some(outstanding) = journal.find_in_progress_entry(workflow_id).await? {
            logger.debug(format_args!(
                "Step {} still in progress, nothing to do",
                outstanding.step_number
            ));
            return Ok(PollResult::Outstanding(outstanding.id));
        }

        let entries = journal.load_entries(workflow_id).await?;
        if let Some(entry) = entries.iter().find(|entry| entry.step.in_progress()) {
            return Err(EngineError::Corruption(format!(
                "Journal entry {} of workflow {} is in progress during replay",
                entry.step_number, workflow_id
            )));
        }

        let handler = self.workflows.get(&workflow.handle).ok_or_else(|| {
            EngineError::Validation(format!(
                "Workflow handler '{}' is not registered",
                workflow.handle
            ))
        })?;

        let now = self.clock.now();
        let logical_clock = LogicalClock::new(workflow.started_at);
        let (channel, requests) = step_channel(workflow.id.clone(), logical_clock.clone());
        logger.debug(format_args!(
            "Polling at generation {}, replaying {} journal entries",
            generation_number,
            entries.len()
        ));

        let args = Bytes::from(workflow.args.clone());
        let handler = AssertUnwindSafe(handler.run(channel, args)).catch_unwind();
        let executor = StepExecutor::new(
            self.store.as_ref(),
            &workflow,
            entries,
            self.config.max_journal_size,
            logical_clock,
            now,
            &logger,
        );
        let executor = Box::pin(executor.run(requests));

        match future::select(handler, executor).await {
            Either::Left((result, executor)) => {
                drop(executor);
                let outcome = match result {
                    Ok(Ok(output)) => Outcome::success(output.to_vec()),
                    Ok(Err(e)) => {
                        logger.warn(format_args!("Handler failed: {}", e));
                        Outcome::error(e.to_string())
                    }
                    Err(_) => {
                        logger.error("Handler panicked");
                        Outcome::error(HANDLER_PANIC_MESSAGE)
                    }
                };
                self.complete(workflow_id, generation_number, outcome, self.clock.now())
                    .await?;
                Ok(PollResult::Completed)
            }
            Either::Right((blocked, handler)) => {
                drop(handler);
                let entry = self.dispatch_step(&workflow, blocked?, now).await?;
                Ok(PollResult::Suspended(entry))
            }
        }
    }

    /// Hand a freshly journaled step to the scheduler.
    async fn dispatch_step(
        &self,
        workflow: &Workflow,
        mut entry: JournalEntry,
        now: DateTime<Utc>,
    ) -> Result<JournalEntry, EngineError> {
        let workflow_id = workflow.id.clone();
        let generation_number = workflow.generation_number;

        match &mut entry.step {
            Step::Function(step) => {
                let run_id = self
                    .scheduler
                    .schedule_at(
                        now,
                        ScheduledJob::RunFunction {
                            workflow_id: workflow_id.clone(),
                            generation_number,
                            journal_id: entry.id.clone(),
                        },
                    )
                    .await?;
                tracing::debug!(
                    workflow_id = %workflow_id,
                    journal_id = %entry.id,
                    step_number = entry.step_number,
                    run_id = %run_id,
                    kind = %step.kind,
                    "Function step dispatched"
                );

                if step.kind == FunctionKind::Untransacted {
                    let heartbeat_at = clock::after(now, self.config.heartbeat_interval);
                    let recovery_handle = self
                        .scheduler
                        .schedule_at(
                            heartbeat_at,
                            ScheduledJob::Recover {
                                workflow_id: workflow_id.clone(),
                                generation_number,
                                journal_id: entry.id.clone(),
                                run_id,
                            },
                        )
                        .await?;
                    step.recovery_handle = Some(recovery_handle);
                    self.store.replace_entry(entry.clone()).await?;
                }
            }
            Step::Sleep(step) => {
                self.scheduler
                    .schedule_at(
                        step.deadline,
                        ScheduledJob::CompleteSleep {
                            workflow_id: workflow_id.clone(),
                            generation_number,
                            journal_id: entry.id.clone(),
                        },
                    )
                    .await?;
                tracing::debug!(
                    workflow_id = %workflow_id,
                    journal_id = %entry.id,
                    step_number = entry.step_number,
                    deadline = %step.deadline,
                    "Sleep step scheduled"
                );
            }
        }
        Ok(entry)
    }
}
