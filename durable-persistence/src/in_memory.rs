//! In-memory implementation of WorkflowStore.
//!
//! Useful for testing and as a reference implementation. Every call takes a
//! single lock over all tables, so each call is atomic on its own.

use crate::store::{Order, StoreError, WorkflowStore};
use async_trait::async_trait;
use durable_core::journal::{JournalEntry, StepType};
use durable_core::primitives::{JournalId, WorkflowId};
use durable_core::workflow::Workflow;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Tables {
    workflows: HashMap<WorkflowId, Workflow>,
    entries: HashMap<JournalId, JournalEntry>,
    // Index: (workflow_id, step_number) -> entry id.
    by_step: BTreeMap<(WorkflowId, u64), JournalId>,
}

impl Tables {
    fn journal<'a>(
        &'a self,
        workflow_id: &WorkflowId,
    ) -> impl DoubleEndedIterator<Item = &'a JournalEntry> + 'a {
        self.by_step
            .range((workflow_id.clone(), 0)..=(workflow_id.clone(), u64::MAX))
            .filter_map(|(_, id)| self.entries.get(id))
    }
}

/// In-memory store holding workflows and journal entries in hash maps.
///
/// # Example
///
/// ```rust,ignore
/// use durable_persistence::{InMemoryStore, WorkflowStore};
///
/// let store = InMemoryStore::new();
/// store.insert_workflow(workflow).await?;
/// ```
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of workflow rows.
    pub fn workflow_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.workflows.len())
    }

    /// Number of journal entries across all workflows.
    pub fn entry_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.entries.len())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|e| StoreError::Backend(format!("Lock error: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|e| StoreError::Backend(format!("Lock error: {}", e)))
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn insert_workflow(&self, workflow: Workflow) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if tables.workflows.contains_key(&workflow.id) {
            return Err(StoreError::Conflict(format!("workflow {}", workflow.id)));
        }
        tables.workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    async fn get_workflow(&self, id: &WorkflowId) -> Result<Option<Workflow>, StoreError> {
        Ok(self.read()?.workflows.get(id).cloned())
    }

    async fn replace_workflow(
        &self,
        workflow: Workflow,
        expected_generation: u64,
    ) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let current = tables
            .workflows
            .get_mut(&workflow.id)
            .ok_or_else(|| StoreError::NotFound(workflow.id.to_string()))?;
        if current.generation_number != expected_generation {
            return Err(StoreError::Conflict(format!(
                "workflow {} is at generation {}, expected {}",
                workflow.id, current.generation_number, expected_generation
            )));
        }
        *current = workflow;
        Ok(())
    }

    async fn delete_workflow(&self, id: &WorkflowId) -> Result<(), StoreError> {
        self.write()?
            .workflows
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn insert_entry(&self, entry: JournalEntry) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let key = (entry.workflow_id.clone(), entry.step_number);
        if tables.entries.contains_key(&entry.id) || tables.by_step.contains_key(&key) {
            return Err(StoreError::Conflict(format!(
                "journal entry {} of workflow {}",
                entry.step_number, entry.workflow_id
            )));
        }
        tables.by_step.insert(key, entry.id.clone());
        tables.entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    async fn get_entry(&self, id: &JournalId) -> Result<Option<JournalEntry>, StoreError> {
        Ok(self.read()?.entries.get(id).cloned())
    }

    async fn replace_entry(&self, entry: JournalEntry) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let current = tables
            .entries
            .get_mut(&entry.id)
            .ok_or_else(|| StoreError::NotFound(entry.id.to_string()))?;
        if current.workflow_id != entry.workflow_id || current.step_number != entry.step_number {
            return Err(StoreError::Backend(format!(
                "journal entry {} cannot move to another workflow or step",
                entry.id
            )));
        }
        *current = entry;
        Ok(())
    }

    async fn delete_entry(&self, id: &JournalId) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let entry = tables
            .entries
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        tables.by_step.remove(&(entry.workflow_id, entry.step_number));
        Ok(())
    }

    async fn entries_by_workflow(
        &self,
        workflow_id: &WorkflowId,
        order: Order,
    ) -> Result<Vec<JournalEntry>, StoreError> {
        let tables = self.read()?;
        let journal = tables.journal(workflow_id).cloned();
        Ok(match order {
            Order::Asc => journal.collect(),
            Order::Desc => journal.rev().collect(),
        })
    }

    async fn entry_by_step(
        &self,
        workflow_id: &WorkflowId,
        step_number: u64,
    ) -> Result<Option<JournalEntry>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .by_step
            .get(&(workflow_id.clone(), step_number))
            .and_then(|id| tables.entries.get(id))
            .cloned())
    }

    async fn in_progress_entries(
        &self,
        step_type: StepType,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<JournalEntry>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .journal(workflow_id)
            .filter(|entry| entry.step.step_type() == step_type && entry.step.in_progress())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use durable_core::journal::{FunctionKind, FunctionStep, SleepStep, Step};
    use durable_core::workflow::LogLevel;

    fn workflow(id: &str) -> Workflow {
        Workflow::new(WorkflowId::new(id), "flow", Vec::new(), LogLevel::Info, Utc::now())
    }

    fn entry(workflow_id: &str, step_number: u64, in_progress: bool) -> JournalEntry {
        let mut step =
            FunctionStep::started(FunctionKind::Transactional, "op", Vec::new(), Utc::now());
        step.in_progress = in_progress;
        JournalEntry {
            id: JournalId::generate(),
            workflow_id: WorkflowId::new(workflow_id),
            step_number,
            step: Step::Function(step),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_workflow() {
        let store = InMemoryStore::new();
        let wf = workflow("wf-1");

        store.insert_workflow(wf.clone()).await.unwrap();
        let loaded = store.get_workflow(&wf.id).await.unwrap();

        assert_eq!(loaded, Some(wf));
        assert!(store.get_workflow(&WorkflowId::new("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_workflow_conflicts() {
        let store = InMemoryStore::new();
        store.insert_workflow(workflow("wf-1")).await.unwrap();
        let result = store.insert_workflow(workflow("wf-1")).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_replace_workflow_checks_generation() {
        let store = InMemoryStore::new();
        let mut wf = workflow("wf-1");
        store.insert_workflow(wf.clone()).await.unwrap();

        wf.generation_number = 1;
        store.replace_workflow(wf.clone(), 0).await.unwrap();

        let stale = store.replace_workflow(wf.clone(), 0).await;
        assert!(matches!(stale, Err(StoreError::Conflict(_))));

        let missing = store.replace_workflow(workflow("nope"), 0).await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_workflow() {
        let store = InMemoryStore::new();
        let wf = workflow("wf-1");
        store.insert_workflow(wf.clone()).await.unwrap();

        store.delete_workflow(&wf.id).await.unwrap();

        assert_eq!(store.workflow_count().unwrap(), 0);
        let result = store.delete_workflow(&wf.id).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_entries_are_ordered_by_step_number() {
        let store = InMemoryStore::new();
        for step_number in [2, 0, 1] {
            store.insert_entry(entry("wf-1", step_number, false)).await.unwrap();
        }
        store.insert_entry(entry("wf-2", 0, false)).await.unwrap();

        let id = WorkflowId::new("wf-1");
        let asc: Vec<_> = store
            .entries_by_workflow(&id, Order::Asc)
            .await
            .unwrap()
            .iter()
            .map(|e| e.step_number)
            .collect();
        assert_eq!(asc, vec![0, 1, 2]);

        let last = store.last_entry(&id).await.unwrap().unwrap();
        assert_eq!(last.step_number, 2);
        assert!(store.last_entry(&WorkflowId::new("wf-3")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_step_number_is_unique_per_workflow() {
        let store = InMemoryStore::new();
        store.insert_entry(entry("wf-1", 0, false)).await.unwrap();
        let result = store.insert_entry(entry("wf-1", 0, false)).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_in_progress_index() {
        let store = InMemoryStore::new();
        store.insert_entry(entry("wf-1", 0, false)).await.unwrap();
        let outstanding = entry("wf-1", 1, true);
        store.insert_entry(outstanding.clone()).await.unwrap();
        store.insert_entry(entry("wf-2", 0, true)).await.unwrap();

        let id = WorkflowId::new("wf-1");
        let found = store.in_progress_entries(StepType::Function, &id).await.unwrap();
        assert_eq!(found, vec![outstanding]);
        assert!(store.in_progress_entries(StepType::Sleep, &id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_and_delete_entry() {
        let store = InMemoryStore::new();
        let mut e = entry("wf-1", 0, true);
        store.insert_entry(e.clone()).await.unwrap();

        e.step = Step::Sleep(SleepStep {
            duration_ms: 5,
            deadline: Utc::now(),
            in_progress: false,
        });
        store.replace_entry(e.clone()).await.unwrap();
        assert_eq!(store.get_entry(&e.id).await.unwrap(), Some(e.clone()));

        store.delete_entry(&e.id).await.unwrap();
        assert_eq!(store.entry_count().unwrap(), 0);
        assert!(store.entry_by_step(&e.workflow_id, 0).await.unwrap().is_none());
    }
}
