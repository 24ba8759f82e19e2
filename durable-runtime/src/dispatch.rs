//! Running function steps and recording their outcomes.

use crate::engine::{Engine, check_running_at};
use crate::error::EngineError;
use crate::logging::WorkflowLogger;
use async_trait::async_trait;
use bytes::Bytes;
use durable_core::journal::{FunctionKind, Step};
use durable_core::primitives::{JournalId, WorkflowId};
use durable_core::registry::FunctionRegistry;
use durable_core::workflow::Outcome;
use durable_persistence::WorkflowStore;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;

/// Invokes the remote operation behind a function step.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn invoke(
        &self,
        kind: FunctionKind,
        operation_handle: &str,
        args: Bytes,
    ) -> anyhow::Result<Bytes>;
}

#[async_trait]
impl Dispatcher for FunctionRegistry {
    async fn invoke(
        &self,
        kind: FunctionKind,
        operation_handle: &str,
        args: Bytes,
    ) -> anyhow::Result<Bytes> {
        FunctionRegistry::invoke(self, kind, operation_handle, args).await
    }
}

impl<S> Engine<S>
where
    S: WorkflowStore + 'static,
{
    /// Execute the operation of an in-progress function step and record its outcome.
    ///
    /// Read-only and transactional operations that panic are recorded as an
    /// error outcome. An untransacted operation that panics propagates the
    /// panic, leaving the step outstanding for the watchdog.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the workflow moved on or the step already finished.
    pub async fn run_function(
        &self,
        workflow_id: &WorkflowId,
        generation_number: u64,
        journal_id: &JournalId,
    ) -> Result<(), EngineError> {
        let workflow = self.require_workflow(workflow_id).await?;
        check_running_at(&workflow, generation_number)?;
        let entry = self.require_entry(workflow_id, journal_id).await?;
        let Step::Function(step) = &entry.step else {
            return Err(EngineError::Validation(format!(
                "Journal entry {} of workflow {} is not a function step",
                entry.step_number, workflow_id
            )));
        };
        if !step.in_progress {
            return Err(EngineError::InvalidState(format!(
                "Function step {} of workflow {} already completed",
                entry.step_number, workflow_id
            )));
        }

        let logger = WorkflowLogger::for_workflow(&workflow);
        logger.debug(format_args!(
            "Invoking {} operation '{}' for step {}",
            step.kind, step.operation_handle, entry.step_number
        ));
        let invocation = self
            .dispatcher
            .invoke(step.kind, &step.operation_handle, Bytes::from(step.args.clone()));
        let result = match step.kind {
            FunctionKind::Untransacted => invocation.await,
            FunctionKind::ReadOnly | FunctionKind::Transactional => {
                AssertUnwindSafe(invocation)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        Err(anyhow::anyhow!("operation '{}' panicked", step.operation_handle))
                    })
            }
        };

        let outcome = match result {
            Ok(output) => Outcome::success(output.to_vec()),
            Err(e) => {
                logger.warn(format_args!(
                    "Operation '{}' failed at step {}: {}",
                    step.operation_handle, entry.step_number, e
                ));
                Outcome::error(e.to_string())
            }
        };
        self.complete_function(workflow_id, generation_number, journal_id, outcome)
            .await
    }

    /// Record `outcome` on an in-progress function step and poll again.
    ///
    /// Any pending heartbeat for the step is canceled afterwards; a failure
    /// to cancel is logged and otherwise ignored.
    pub async fn complete_function(
        &self,
        workflow_id: &WorkflowId,
        generation_number: u64,
        journal_id: &JournalId,
        outcome: Outcome,
    ) -> Result<(), EngineError> {
        let workflow = self.require_workflow(workflow_id).await?;
        check_running_at(&workflow, generation_number)?;
        let mut entry = self.require_entry(workflow_id, journal_id).await?;
        let Step::Function(step) = &mut entry.step else {
            return Err(EngineError::Validation(format!(
                "Journal entry {} of workflow {} is not a function step",
                entry.step_number, workflow_id
            )));
        };
        if !step.in_progress {
            return Err(EngineError::InvalidState(format!(
                "Function step {} of workflow {} already completed",
                entry.step_number, workflow_id
            )));
        }

        step.in_progress = false;
        step.outcome = Some(outcome);
        step.completed_at = Some(self.clock.now());
        let recovery_handle = step.recovery_handle.take();
        let step_number = entry.step_number;
        self.store.replace_entry(entry).await?;
        tracing::debug!(
            workflow_id = %workflow_id,
            journal_id = %journal_id,
            step_number,
            generation_number,
            "Function step completed"
        );

        let polled = self.poll(workflow_id, generation_number).await;

        if let Some(recovery_handle) = recovery_handle
            && let Err(e) = self.scheduler.cancel(&recovery_handle).await
        {
            tracing::warn!(
                workflow_id = %workflow_id,
                journal_id = %journal_id,
                recovery_handle = %recovery_handle,
                error = %e,
                "Failed to cancel heartbeat"
            );
        }
        polled.map(|_| ())
    }
}
