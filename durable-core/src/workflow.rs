//! The durable workflow record and its lifecycle state.

use crate::primitives::WorkflowId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

/// Verbosity of the per-workflow logger.
///
/// Ordered from most to least verbose, so `level >= threshold` means "emit".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a log level name is not one of `DEBUG`, `INFO`, `WARN` or `ERROR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLogLevel(pub String);

impl Display for UnknownLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid log level: '{}'", self.0)
    }
}

impl std::error::Error for UnknownLogLevel {}

impl FromStr for LogLevel {
    type Err = UnknownLogLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            _ => Err(UnknownLogLevel(s.to_string())),
        }
    }
}

/// Result of a function step or of a whole workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Outcome {
    Success {
        #[serde(with = "serde_bytes")]
        result: Vec<u8>,
        result_size: usize,
    },
    Error {
        message: String,
    },
}

impl Outcome {
    pub fn success(result: impl Into<Vec<u8>>) -> Self {
        let result = result.into();
        let result_size = result.len();
        Outcome::Success {
            result,
            result_size,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Outcome::Error {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Bytes this outcome contributes to the journal budget.
    pub fn size(&self) -> usize {
        match self {
            Outcome::Success { result_size, .. } => *result_size,
            Outcome::Error { message } => message.len(),
        }
    }
}

/// Persisted lifecycle state. Terminal once it leaves `Running`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WorkflowState {
    Running,
    Completed {
        completed_at: DateTime<Utc>,
        outcome: Outcome,
    },
    Canceled {
        canceled_at: DateTime<Utc>,
    },
}

/// One durable workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: WorkflowId,
    pub started_at: DateTime<Utc>,
    /// Registered handler re-invoked on every poll.
    pub handle: String,
    #[serde(with = "serde_bytes")]
    pub args: Vec<u8>,
    pub log_level: LogLevel,
    pub state: WorkflowState,
    /// Epoch bumped on cancellation and on forced step failure. Never decreases.
    pub generation_number: u64,
}

impl Workflow {
    /// A freshly started workflow: `Running` at generation 0.
    pub fn new(
        id: WorkflowId,
        handle: impl Into<String>,
        args: impl Into<Vec<u8>>,
        log_level: LogLevel,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            started_at,
            handle: handle.into(),
            args: args.into(),
            log_level,
            state: WorkflowState::Running,
            generation_number: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, WorkflowState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_running()
    }

    pub fn status(&self) -> WorkflowStatus {
        match &self.state {
            WorkflowState::Running => WorkflowStatus::InProgress,
            WorkflowState::Canceled { .. } => WorkflowStatus::Canceled,
            WorkflowState::Completed {
                outcome: Outcome::Success { .. },
                ..
            } => WorkflowStatus::Completed,
            WorkflowState::Completed {
                outcome: Outcome::Error { message },
                ..
            } => WorkflowStatus::Failed(message.clone()),
        }
    }
}

/// Externally visible status of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "camelCase")]
pub enum WorkflowStatus {
    InProgress,
    Completed,
    Canceled,
    /// The handler failed; carries its error message.
    Failed(String),
}

impl Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::InProgress => f.write_str("inProgress"),
            WorkflowStatus::Completed => f.write_str("completed"),
            WorkflowStatus::Canceled => f.write_str("canceled"),
            WorkflowStatus::Failed(message) => write!(f, "failed: {}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow() -> Workflow {
        Workflow::new(
            WorkflowId::new("wf-1"),
            "greet",
            b"{}".to_vec(),
            LogLevel::Info,
            Utc::now(),
        )
    }

    #[test]
    fn test_log_level_parsing_is_case_insensitive() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!(matches!("verbose".parse::<LogLevel>(), Err(UnknownLogLevel(_))));
        assert!(LogLevel::Debug < LogLevel::Error);
    }

    #[test]
    fn test_new_workflow_is_running_at_generation_zero() {
        let wf = workflow();
        assert!(wf.is_running());
        assert_eq!(wf.generation_number, 0);
        assert_eq!(wf.status(), WorkflowStatus::InProgress);
    }

    #[test]
    fn test_status_mapping() {
        let mut wf = workflow();
        wf.state = WorkflowState::Completed {
            completed_at: Utc::now(),
            outcome: Outcome::error("boom"),
        };
        assert_eq!(wf.status(), WorkflowStatus::Failed("boom".to_string()));
        assert!(wf.is_terminal());

        wf.state = WorkflowState::Completed {
            completed_at: Utc::now(),
            outcome: Outcome::success(b"ok".to_vec()),
        };
        assert_eq!(wf.status(), WorkflowStatus::Completed);

        wf.state = WorkflowState::Canceled {
            canceled_at: Utc::now(),
        };
        assert_eq!(wf.status(), WorkflowStatus::Canceled);
    }

    #[test]
    fn test_outcome_size() {
        assert_eq!(Outcome::success(vec![0u8; 12]).size(), 12);
        assert_eq!(Outcome::error("nope").size(), 4);
    }

    #[test]
    fn test_state_is_tagged() {
        let json = serde_json::to_value(&WorkflowState::Running).unwrap();
        assert_eq!(json["type"], "running");
    }
}
