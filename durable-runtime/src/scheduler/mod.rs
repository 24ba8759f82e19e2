//! Deadline scheduler collaborator.
//!
//! Every continuation of a workflow, from the first poll to step dispatch,
//! sleeps and heartbeats, is a [`ScheduledJob`] handed to a [`Scheduler`]
//! to run at or after a deadline. Jobs carry the generation they were
//! scheduled for, so jobs that outlive a cancellation or a forced step
//! failure turn into no-ops.

mod in_memory;

pub use in_memory::InMemoryScheduler;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use durable_core::primitives::{JournalId, ScheduledId, WorkflowId};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduled job not found: {0}")]
    NotFound(ScheduledId),
    #[error("Scheduler error: {0}")]
    Backend(String),
}

/// A named engine operation plus its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ScheduledJob {
    /// Advance the workflow as far as possible.
    Poll {
        workflow_id: WorkflowId,
        generation_number: u64,
    },
    /// Invoke the operation behind an in-progress function step.
    RunFunction {
        workflow_id: WorkflowId,
        generation_number: u64,
        journal_id: JournalId,
    },
    /// Finish a sleep step whose deadline has passed.
    CompleteSleep {
        workflow_id: WorkflowId,
        generation_number: u64,
        journal_id: JournalId,
    },
    /// Heartbeat check of an untransacted step whose execution is `run_id`.
    Recover {
        workflow_id: WorkflowId,
        generation_number: u64,
        journal_id: JournalId,
        run_id: ScheduledId,
    },
}

impl ScheduledJob {
    pub fn name(&self) -> &'static str {
        match self {
            ScheduledJob::Poll { .. } => "poll",
            ScheduledJob::RunFunction { .. } => "runFunction",
            ScheduledJob::CompleteSleep { .. } => "completeSleep",
            ScheduledJob::Recover { .. } => "recover",
        }
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        match self {
            ScheduledJob::Poll { workflow_id, .. }
            | ScheduledJob::RunFunction { workflow_id, .. }
            | ScheduledJob::CompleteSleep { workflow_id, .. }
            | ScheduledJob::Recover { workflow_id, .. } => workflow_id,
        }
    }
}

/// Lifecycle of a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScheduledStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl ScheduledStatus {
    /// Still waiting to run or running.
    pub fn is_live(&self) -> bool {
        matches!(self, ScheduledStatus::Pending | ScheduledStatus::Running)
    }
}

/// A job claimed for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueJob {
    pub id: ScheduledId,
    pub job: ScheduledJob,
}

/// Runs jobs at or after a deadline.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Schedule `job` to run at or after `at`.
    async fn schedule_at(
        &self,
        at: DateTime<Utc>,
        job: ScheduledJob,
    ) -> Result<ScheduledId, SchedulerError>;

    /// Cancel a job that has not started yet. Jobs that already started or
    /// finished are left untouched.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::NotFound` for unknown ids.
    async fn cancel(&self, id: &ScheduledId) -> Result<(), SchedulerError>;

    /// Status of a job, or `None` if the scheduler has no record of it.
    async fn status(&self, id: &ScheduledId) -> Result<Option<ScheduledStatus>, SchedulerError>;

    /// Claim up to `limit` pending jobs due at `now`, earliest first, and
    /// mark them running.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DueJob>, SchedulerError>;

    /// Record the end of a claimed job.
    async fn mark_finished(&self, id: &ScheduledId, succeeded: bool) -> Result<(), SchedulerError>;
}
