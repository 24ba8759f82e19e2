//! Engine error taxonomy.

use crate::scheduler::SchedulerError;
use durable_persistence::StoreError;

/// Errors returned by engine operations.
///
/// `InvalidState` and store write conflicts come from stale or duplicate
/// triggers and are benign: scheduled jobs that hit them are dropped.
/// `ReplayMismatch` and `Corruption` point at a defect and abort the poll.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed start arguments, unknown handles, or misdirected calls.
    #[error("Validation error: {0}")]
    Validation(String),
    /// The handler issued a different step than the one journaled.
    #[error("Journal entry mismatch at step {step_number}: {detail}")]
    ReplayMismatch { step_number: u64, detail: String },
    /// Operation on a terminal or generation-stale workflow, or on a step
    /// that is no longer in progress.
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Not found: {0}")]
    NotFound(String),
    /// A journal invariant does not hold.
    #[error("Journal corruption: {0}")]
    Corruption(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl EngineError {
    /// Whether the error only means the trigger arrived too late.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidState(_) | EngineError::Store(StoreError::Conflict(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benign_errors() {
        assert!(EngineError::InvalidState("stale".into()).is_benign());
        assert!(EngineError::Store(StoreError::Conflict("gen".into())).is_benign());
        assert!(!EngineError::Corruption("two in progress".into()).is_benign());
        assert!(
            !EngineError::ReplayMismatch {
                step_number: 0,
                detail: "args".into()
            }
            .is_benign()
        );
    }

    #[test]
    fn test_store_errors_are_transparent() {
        let err = EngineError::from(StoreError::NotFound("wf".into()));
        assert_eq!(err.to_string(), "Record not found: wf");
    }
}
