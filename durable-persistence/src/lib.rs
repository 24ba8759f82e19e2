//! Persistence layer for durable workflows.
//!
//! The engine keeps two kinds of records: one [`Workflow`] row per run and
//! an append-only journal of [`JournalEntry`] rows per workflow. This crate
//! defines the [`WorkflowStore`] trait the engine consumes and an
//! [`InMemoryStore`] reference implementation.
//!
//! # Implementing Custom Stores
//!
//! A store backed by a real database needs:
//!
//! 1. a unique index on `(workflow_id, step_number)` for journal entries;
//! 2. an index on `(step_type, in_progress, workflow_id)`;
//! 3. a generation check on workflow replacement;
//! 4. one transaction per engine operation, if the database offers them.
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use durable_persistence::{StoreError, WorkflowStore};
//!
//! pub struct PostgresStore {
//!     // your connection pool
//! }
//!
//! #[async_trait]
//! impl WorkflowStore for PostgresStore {
//!     async fn insert_workflow(&self, workflow: Workflow) -> Result<(), StoreError> {
//!         // INSERT INTO workflows ...
//!     }
//!     // ... implement other methods
//! }
//! ```
//!
//! [`Workflow`]: durable_core::workflow::Workflow
//! [`JournalEntry`]: durable_core::journal::JournalEntry

mod in_memory;
mod store;

pub use in_memory::InMemoryStore;
pub use store::{Order, StoreError, WorkflowStore};
