//! Per-workflow log filtering on top of `tracing`.

use durable_core::primitives::WorkflowId;
use durable_core::workflow::{LogLevel, Workflow};
use std::fmt::Display;

/// Emits engine events for one workflow, dropping those below its level.
#[derive(Debug, Clone)]
pub struct WorkflowLogger {
    workflow_id: WorkflowId,
    level: LogLevel,
}

impl WorkflowLogger {
    pub fn new(workflow_id: WorkflowId, level: LogLevel) -> Self {
        Self { workflow_id, level }
    }

    pub fn for_workflow(workflow: &Workflow) -> Self {
        Self::new(workflow.id.clone(), workflow.log_level)
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.level
    }

    pub fn debug(&self, message: impl Display) {
        if self.enabled(LogLevel::Debug) {
            tracing::debug!(workflow_id = %self.workflow_id, "{}", message);
        }
    }

    pub fn info(&self, message: impl Display) {
        if self.enabled(LogLevel::Info) {
            tracing::info!(workflow_id = %self.workflow_id, "{}", message);
        }
    }

    pub fn warn(&self, message: impl Display) {
        if self.enabled(LogLevel::Warn) {
            tracing::warn!(workflow_id = %self.workflow_id, "{}", message);
        }
    }

    pub fn error(&self, message: impl Display) {
        if self.enabled(LogLevel::Error) {
            tracing::error!(workflow_id = %self.workflow_id, "{}", message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold() {
        let logger = WorkflowLogger::new(WorkflowId::new("wf"), LogLevel::Warn);
        assert_eq!(logger.level(), LogLevel::Warn);
        assert!(!logger.enabled(LogLevel::Debug));
        assert!(!logger.enabled(LogLevel::Info));
        assert!(logger.enabled(LogLevel::Warn));
        assert!(logger.enabled(LogLevel::Error));
    }
}
