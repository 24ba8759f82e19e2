//! Core types for journaled, replayable workflows.
//!
//! A workflow is a handler that performs its side effects only through
//! journaled steps: remote operation calls and durable sleeps. Every poll
//! re-runs the handler from the top and replays recorded step results, so
//! progress survives restarts as long as the handler is deterministic.
//!
//! This crate holds the persisted records ([`workflow`], [`journal`]), the
//! payload codecs, the handler bridge ([`context`]) and the registries that
//! map stored handles back to code. The engine lives in `durable-runtime`.

pub mod codec;
pub mod context;
pub mod error;
pub mod journal;
pub mod json;
pub mod primitives;
pub mod registry;
pub mod workflow;

pub use context::StepContext;
pub use error::StepError;
pub use json::JsonCodec;
pub use primitives::{JournalId, ScheduledId, WorkflowId};
