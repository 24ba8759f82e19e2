//! Journal-replay workflow engine.
//!
//! The [`Engine`] advances workflows one poll at a time. Each poll re-runs
//! the workflow's handler from the top, answers its step calls from the
//! journal, and stops at the first step that has not happened yet. That
//! step is journaled and handed to the [`Scheduler`]: function steps are run
//! through the [`Dispatcher`], sleeps wait for their deadline, and
//! untransacted functions get a heartbeat. When a step finishes the workflow
//! is polled again.
//!
//! Every scheduled continuation carries the workflow's generation number.
//! Cancellation and forced step failure bump the generation, so any
//! continuation still in flight for the old one becomes a no-op.
//!
//! A [`Worker`] drains due jobs from the scheduler. The in-memory store and
//! scheduler together with [`ManualClock`] make the whole engine drivable
//! from a test:
//!
//! ```rust,ignore
//! let clock = ManualClock::default();
//! let engine = Engine::new(InMemoryStore::new(), InMemoryScheduler::new(), functions, workflows)
//!     .with_clock(clock.clone());
//! let worker = Worker::new("test", engine.clone());
//!
//! let id = engine.start("greet", JsonCodec.encode(&"world")?).await?;
//! worker.run_until_idle().await?;
//! clock.advance(Duration::from_secs(1));
//! worker.run_until_idle().await?;
//! ```

pub mod clock;
pub mod config;
mod dispatch;
mod engine;
pub mod error;
mod executor;
mod journal;
mod lifecycle;
pub mod logging;
mod poll;
pub mod scheduler;
mod timer;
mod watchdog;
mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use dispatch::Dispatcher;
pub use engine::Engine;
pub use error::EngineError;
pub use poll::{HANDLER_PANIC_MESSAGE, PollResult};
pub use scheduler::{InMemoryScheduler, ScheduledJob, ScheduledStatus, Scheduler, SchedulerError};
pub use watchdog::{Heartbeat, TRANSIENT_FAILURE_MESSAGE};
pub use worker::Worker;

pub use durable_persistence as persistence;
