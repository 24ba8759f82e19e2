//! The step executor.
//!
//! Runs alongside the handler during a poll. Each step request is matched
//! against the next unreplayed journal entry; once the journal is exhausted
//! the request is appended as a new in-progress entry and the executor
//! reports it as blocked, ending the poll. One new entry per poll.

use crate::clock;
use crate::error::EngineError;
use crate::journal::Journal;
use crate::logging::WorkflowLogger;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use durable_core::context::{LogicalClock, StepReceiver, StepRequest, StepRequestKind};
use durable_core::error::StepError;
use durable_core::journal::{FunctionStep, JournalEntry, SleepStep, Step, entry_size};
use durable_core::workflow::{Outcome, Workflow};
use durable_persistence::WorkflowStore;
use futures::StreamExt;
use std::collections::VecDeque;
use std::time::Duration;

pub struct StepExecutor<'a, S: ?Sized> {
    journal: Journal<'a, S>,
    workflow: &'a Workflow,
    replay: VecDeque<JournalEntry>,
    next_step_number: u64,
    used_bytes: usize,
    max_journal_size: usize,
    clock: LogicalClock,
    now: DateTime<Utc>,
    logger: &'a WorkflowLogger,
}

impl<'a, S> StepExecutor<'a, S>
where
    S: WorkflowStore + ?Sized,
{
    /// `entries` is the workflow's journal in step order, none in progress.
    /// `now` is the wall-clock time captured at poll start.
    pub fn new(
        store: &'a S,
        workflow: &'a Workflow,
        entries: Vec<JournalEntry>,
        max_journal_size: usize,
        clock: LogicalClock,
        now: DateTime<Utc>,
        logger: &'a WorkflowLogger,
    ) -> Self {
        let used_bytes = entries.iter().map(JournalEntry::size).sum();
        let next_step_number = entries.last().map_or(0, |last| last.step_number + 1);
        Self {
            journal: Journal::new(store),
            workflow,
            replay: entries.into(),
            next_step_number,
            used_bytes,
            max_journal_size,
            clock,
            now,
            logger,
        }
    }

    /// Serve requests until a new entry is journaled.
    ///
    /// Never returns if the handler stops issuing requests; the handler
    /// finishing is what ends the poll then.
    pub async fn run(mut self, mut requests: StepReceiver) -> Result<JournalEntry, EngineError> {
        loop {
            let Some(request) = requests.next().await else {
                return futures::future::pending().await;
            };

            if let Some(entry) = self.replay.pop_front() {
                self.replay_entry(entry, request)?;
                continue;
            }

            let step = self.new_step(&request.kind);
            let size = self.used_bytes + entry_size(&self.workflow.id, &step);
            if size > self.max_journal_size {
                self.logger.warn(format_args!(
                    "Journal size limit exceeded ({} bytes > {} bytes), rejecting step {}",
                    size, self.max_journal_size, self.next_step_number
                ));
                request.reject(StepError::JournalOverflow {
                    size,
                    limit: self.max_journal_size,
                });
                continue;
            }

            let entry = self
                .journal
                .append_entry(
                    &self.workflow.id,
                    self.workflow.generation_number,
                    self.next_step_number,
                    step,
                    self.now,
                )
                .await?;
            self.logger
                .debug(format_args!("Step {} journaled, suspending", entry.step_number));
            return Ok(entry);
        }
    }

    fn new_step(&self, kind: &StepRequestKind) -> Step {
        match kind {
            StepRequestKind::Function {
                kind,
                operation_handle,
                args,
            } => Step::Function(FunctionStep::started(
                *kind,
                operation_handle.clone(),
                args.to_vec(),
                self.now,
            )),
            StepRequestKind::Sleep { duration_ms } => Step::Sleep(SleepStep {
                duration_ms: *duration_ms,
                deadline: clock::after(self.now, Duration::from_millis(*duration_ms)),
                in_progress: true,
            }),
        }
    }

    fn replay_entry(
        &mut self,
        entry: JournalEntry,
        request: StepRequest,
    ) -> Result<(), EngineError> {
        self.next_step_number = entry.step_number + 1;
        let reply = match (&entry.step, &request.kind) {
            (
                Step::Function(step),
                StepRequestKind::Function {
                    kind,
                    operation_handle,
                    args,
                },
            ) => {
                let same_args = step.args == args[..];
                if step.kind != *kind || step.operation_handle != *operation_handle || !same_args {
                    return Err(mismatch(
                        &entry,
                        format!(
                            "journaled {} call to '{}' but the handler requested {} call to '{}'{}",
                            step.kind,
                            step.operation_handle,
                            kind,
                            operation_handle,
                            if same_args { "" } else { " with different arguments" }
                        ),
                    ));
                }
                if let Some(completed_at) = step.completed_at {
                    self.clock.advance_to(completed_at);
                }
                match &step.outcome {
                    Some(Outcome::Success { result, .. }) => Ok(Bytes::from(result.clone())),
                    Some(Outcome::Error { message }) => Err(StepError::Failed(message.clone())),
                    None => {
                        return Err(EngineError::Corruption(format!(
                            "Completed journal entry {} of workflow {} has no outcome",
                            entry.step_number, entry.workflow_id
                        )));
                    }
                }
            }
            (Step::Sleep(step), StepRequestKind::Sleep { duration_ms }) => {
                if step.duration_ms != *duration_ms {
                    return Err(mismatch(
                        &entry,
                        format!(
                            "journaled a sleep of {}ms but the handler requested {}ms",
                            step.duration_ms, duration_ms
                        ),
                    ));
                }
                self.clock.advance_to(step.deadline);
                Ok(Bytes::new())
            }
            (Step::Function(step), StepRequestKind::Sleep { .. }) => {
                return Err(mismatch(
                    &entry,
                    format!(
                        "journaled a call to '{}' but the handler requested a sleep",
                        step.operation_handle
                    ),
                ));
            }
            (Step::Sleep(_), StepRequestKind::Function { operation_handle, .. }) => {
                return Err(mismatch(
                    &entry,
                    format!(
                        "journaled a sleep but the handler requested a call to '{}'",
                        operation_handle
                    ),
                ));
            }
        };
        match reply {
            Ok(value) => request.resolve(value),
            Err(error) => request.reject(error),
        }
        Ok(())
    }
}

fn mismatch(entry: &JournalEntry, detail: String) -> EngineError {
    EngineError::ReplayMismatch {
        step_number: entry.step_number,
        detail,
    }
}
