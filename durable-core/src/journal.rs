//! Journal entries: the append-only, per-workflow record of steps.
//!
//! Step numbers for a workflow run contiguously from 0 and at most one entry
//! per workflow is in progress at a time. Both invariants are enforced by the
//! runtime when entries are appended; this module only describes the records
//! and their byte-size accounting.

use crate::primitives::{JournalId, ScheduledId, WorkflowId};
use crate::workflow::Outcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

const U64_SIZE: usize = 8;
const TIMESTAMP_SIZE: usize = 8;
const FLAG_SIZE: usize = 1;

/// How the remote operation behind a function step is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FunctionKind {
    ReadOnly,
    Transactional,
    /// Not transactionally tracked; monitored by heartbeats while running.
    Untransacted,
}

impl Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FunctionKind::ReadOnly => "readOnly",
            FunctionKind::Transactional => "transactional",
            FunctionKind::Untransacted => "untransacted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionStep {
    pub kind: FunctionKind,
    pub operation_handle: String,
    #[serde(with = "serde_bytes")]
    pub args: Vec<u8>,
    pub args_size: usize,
    pub outcome: Option<Outcome>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub in_progress: bool,
    /// Pending heartbeat for an untransacted step.
    pub recovery_handle: Option<ScheduledId>,
}

impl FunctionStep {
    /// A function step that has just been requested and has no outcome yet.
    pub fn started(
        kind: FunctionKind,
        operation_handle: impl Into<String>,
        args: impl Into<Vec<u8>>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let args = args.into();
        Self {
            kind,
            operation_handle: operation_handle.into(),
            args_size: args.len(),
            args,
            outcome: None,
            started_at,
            completed_at: None,
            in_progress: true,
            recovery_handle: None,
        }
    }

    fn size(&self) -> usize {
        self.operation_handle.len()
            + self.args_size
            + self.outcome.as_ref().map_or(0, Outcome::size)
            + 3 * TIMESTAMP_SIZE
            + FLAG_SIZE
            + self.recovery_handle.as_ref().map_or(0, |h| h.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepStep {
    pub duration_ms: u64,
    pub deadline: DateTime<Utc>,
    pub in_progress: bool,
}

impl SleepStep {
    fn size(&self) -> usize {
        U64_SIZE + TIMESTAMP_SIZE + FLAG_SIZE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepType {
    Function,
    Sleep,
}

impl StepType {
    pub const ALL: [StepType; 2] = [StepType::Function, StepType::Sleep];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Step {
    Function(FunctionStep),
    Sleep(SleepStep),
}

impl Step {
    pub fn step_type(&self) -> StepType {
        match self {
            Step::Function(_) => StepType::Function,
            Step::Sleep(_) => StepType::Sleep,
        }
    }

    pub fn in_progress(&self) -> bool {
        match self {
            Step::Function(step) => step.in_progress,
            Step::Sleep(step) => step.in_progress,
        }
    }

    /// Serialized size used for the journal byte budget.
    pub fn size(&self) -> usize {
        match self {
            Step::Function(step) => step.size(),
            Step::Sleep(step) => step.size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: JournalId,
    pub workflow_id: WorkflowId,
    pub step_number: u64,
    pub step: Step,
    pub created_at: DateTime<Utc>,
}

impl JournalEntry {
    pub fn size(&self) -> usize {
        entry_size(&self.workflow_id, &self.step)
    }
}

/// Budgeted size of an entry holding `step` for `workflow_id`.
pub fn entry_size(workflow_id: &WorkflowId, step: &Step) -> usize {
    workflow_id.len() + U64_SIZE + TIMESTAMP_SIZE + step.size()
}
