//! Errors surfaced to workflow handlers by step calls.

/// A step call that did not produce a result.
///
/// These are ordinary control flow for the handler: it may catch them and
/// react, or propagate them with `?` to fail the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// The operation completed with an error outcome.
    Failed(String),
    /// Journaling the step would exceed the workflow's byte budget.
    /// Nothing was recorded.
    JournalOverflow {
        /// Journal size the step would have produced.
        size: usize,
        /// Configured budget.
        limit: usize,
    },
    /// The step's arguments or result could not be encoded or decoded.
    Codec(String),
    /// The poll cycle ended before the step was resolved.
    Abandoned,
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepError::Failed(message) => f.write_str(message),
            StepError::JournalOverflow { size, limit } => write!(
                f,
                "Workflow journal size limit exceeded ({} bytes > {} bytes). \
                 Consider breaking up the workflow into multiple runs",
                size, limit
            ),
            StepError::Codec(message) => write!(f, "Step payload codec error: {}", message),
            StepError::Abandoned => f.write_str("Step request was abandoned by the executor"),
        }
    }
}

impl std::error::Error for StepError {}
