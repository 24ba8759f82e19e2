//! Worker draining due jobs from the scheduler.
//!
//! A worker repeatedly claims jobs whose deadline has passed, runs each one
//! through [`Engine::execute`], and reports back whether it succeeded. Jobs
//! that panic are reported as failed, which is what the heartbeat of an
//! untransacted step looks for. Several workers may share one scheduler:
//! claiming marks a job running, so each job is handed out once.

use crate::engine::Engine;
use crate::error::EngineError;
use crate::scheduler::DueJob;
use durable_persistence::WorkflowStore;
use futures::FutureExt;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time;

/// Executes scheduled engine jobs.
///
/// # Example
///
/// ```rust,ignore
/// let worker = Worker::new("worker-1", engine.clone())
///     .with_batch_size(NonZeroUsize::new(16).unwrap());
///
/// // In tests: run everything that is due now.
/// worker.run_until_idle().await?;
///
/// // In a service: poll forever.
/// worker.start_polling(Duration::from_millis(200)).await?;
/// ```
pub struct Worker<S> {
    worker_id: String,
    engine: Engine<S>,
    batch_size: NonZeroUsize,
    max_concurrency: NonZeroUsize,
}

impl<S> Worker<S>
where
    S: WorkflowStore + 'static,
{
    pub fn new(worker_id: impl Into<String>, engine: Engine<S>) -> Self {
        Self {
            worker_id: worker_id.into(),
            engine,
            batch_size: NonZeroUsize::MIN,
            max_concurrency: NonZeroUsize::MIN,
        }
    }

    /// Set the number of jobs claimed per scheduler round trip (default: 1).
    #[must_use]
    pub fn with_batch_size(mut self, size: NonZeroUsize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set how many batches [`start_polling`](Self::start_polling) runs at
    /// once (default: 1).
    ///
    /// Jobs for the same workflow are safe to run concurrently only if the
    /// store executes every call as its own transaction.
    #[must_use]
    pub fn with_max_concurrency(mut self, max: NonZeroUsize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn engine(&self) -> &Engine<S> {
        &self.engine
    }

    /// Claim one batch of due jobs and run them in order.
    ///
    /// Returns the number of jobs run. Job failures are logged and reported
    /// to the scheduler, not returned.
    ///
    /// # Errors
    ///
    /// Fails only if the scheduler itself does.
    pub async fn run_once(&self) -> Result<usize, EngineError> {
        let now = self.engine.clock.now();
        let due = self
            .engine
            .scheduler
            .claim_due(now, self.batch_size.get())
            .await?;
        let count = due.len();
        for job in due {
            self.run_job(job).await?;
        }
        Ok(count)
    }

    /// Run batches until no job is due at the engine's current time.
    ///
    /// Jobs scheduled in the future, such as sleep deadlines and heartbeats,
    /// are left alone.
    pub async fn run_until_idle(&self) -> Result<usize, EngineError> {
        let mut total = 0;
        loop {
            let count = self.run_once().await?;
            if count == 0 {
                return Ok(total);
            }
            total += count;
        }
    }

    /// Poll the scheduler every `poll_interval` and run due jobs.
    ///
    /// Batches run on spawned tasks, gated by a semaphore of
    /// `max_concurrency` permits. Runs until an error occurs or the future is
    /// dropped.
    pub async fn start_polling(self, poll_interval: Duration) -> anyhow::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency.get()));
        let worker = Arc::new(self);
        let mut interval = time::interval(poll_interval);

        tracing::info!(worker_id = %worker.worker_id, "Worker started");
        loop {
            let permit = Arc::clone(&semaphore).acquire_owned().await?;

            let now = worker.engine.clock.now();
            let due = worker
                .engine
                .scheduler
                .claim_due(now, worker.batch_size.get())
                .await?;

            if due.is_empty() {
                drop(permit);
                interval.tick().await;
                continue;
            }

            let worker = Arc::clone(&worker);
            tokio::spawn(async move {
                let _permit = permit;
                for job in due {
                    if let Err(e) = worker.run_job(job).await {
                        tracing::error!(
                            worker_id = %worker.worker_id,
                            error = %e,
                            "Failed to report job result"
                        );
                    }
                }
            });
        }
    }

    async fn run_job(&self, due: DueJob) -> Result<(), EngineError> {
        let DueJob { id, job } = due;
        tracing::debug!(
            worker_id = %self.worker_id,
            scheduled_id = %id,
            workflow_id = %job.workflow_id(),
            job = job.name(),
            "Running job"
        );

        let succeeded = match AssertUnwindSafe(self.engine.execute(&job)).catch_unwind().await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(
                    worker_id = %self.worker_id,
                    scheduled_id = %id,
                    workflow_id = %job.workflow_id(),
                    job = job.name(),
                    error = %e,
                    "Job failed"
                );
                false
            }
            Err(_) => {
                tracing::error!(
                    worker_id = %self.worker_id,
                    scheduled_id = %id,
                    workflow_id = %job.workflow_id(),
                    job = job.name(),
                    "Job panicked"
                );
                false
            }
        };

        self.engine.scheduler.mark_finished(&id, succeeded).await?;
        Ok(())
    }
}
