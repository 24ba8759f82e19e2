//! Store trait for workflow rows and their journal entries.
//!
//! The engine treats the store as a transactional key-value store with two
//! secondary indexes over journal entries:
//!
//! - by `(workflow_id, step_number)`, used to append and replay the journal;
//! - by `(step_type, in_progress, workflow_id)`, used to find outstanding steps.
//!
//! Implementations are expected to run each engine operation's mutations
//! atomically. Workflow writes carry the generation number the caller read,
//! so a store can reject writes based on a stale read.

use async_trait::async_trait;
use durable_core::journal::{JournalEntry, StepType};
use durable_core::primitives::{JournalId, WorkflowId};
use durable_core::workflow::Workflow;

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record with the given id.
    #[error("Record not found: {0}")]
    NotFound(String),
    /// A write lost against a concurrent one: the record already exists, or
    /// its generation moved on since it was read.
    #[error("Write conflict: {0}")]
    Conflict(String),
    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Backend-specific error.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Sort order for index queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Durable storage of workflows and journal entries.
///
/// # Example
///
/// ```rust,ignore
/// use durable_persistence::{InMemoryStore, Order, WorkflowStore};
///
/// let store = InMemoryStore::new();
/// store.insert_workflow(workflow.clone()).await?;
/// let journal = store.entries_by_workflow(&workflow.id, Order::Asc).await?;
/// ```
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert a new workflow row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if a workflow with the same id exists.
    async fn insert_workflow(&self, workflow: Workflow) -> Result<(), StoreError>;

    /// Load a workflow row. Returns `None` if it does not exist.
    async fn get_workflow(&self, id: &WorkflowId) -> Result<Option<Workflow>, StoreError>;

    /// Replace a workflow row, provided its stored generation is still
    /// `expected_generation`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the workflow does not exist and
    /// `StoreError::Conflict` if its generation has changed.
    async fn replace_workflow(
        &self,
        workflow: Workflow,
        expected_generation: u64,
    ) -> Result<(), StoreError>;

    /// Delete a workflow row. Journal entries are not touched.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the workflow does not exist.
    async fn delete_workflow(&self, id: &WorkflowId) -> Result<(), StoreError>;

    /// Insert a journal entry.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the id or the
    /// `(workflow_id, step_number)` pair is already taken.
    async fn insert_entry(&self, entry: JournalEntry) -> Result<(), StoreError>;

    /// Load a journal entry. Returns `None` if it does not exist.
    async fn get_entry(&self, id: &JournalId) -> Result<Option<JournalEntry>, StoreError>;

    /// Replace a journal entry. Its workflow and step number must not change.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the entry does not exist.
    async fn replace_entry(&self, entry: JournalEntry) -> Result<(), StoreError>;

    /// Delete a journal entry.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the entry does not exist.
    async fn delete_entry(&self, id: &JournalId) -> Result<(), StoreError>;

    /// All entries of a workflow, ordered by step number.
    async fn entries_by_workflow(
        &self,
        workflow_id: &WorkflowId,
        order: Order,
    ) -> Result<Vec<JournalEntry>, StoreError>;

    /// The entry recorded at `step_number`, if any.
    async fn entry_by_step(
        &self,
        workflow_id: &WorkflowId,
        step_number: u64,
    ) -> Result<Option<JournalEntry>, StoreError>;

    /// The entry with the highest step number, if any.
    async fn last_entry(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<JournalEntry>, StoreError> {
        Ok(self
            .entries_by_workflow(workflow_id, Order::Desc)
            .await?
            .into_iter()
            .next())
    }

    /// In-progress entries of one step type for a workflow.
    async fn in_progress_entries(
        &self,
        step_type: StepType,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<JournalEntry>, StoreError>;
}
