use super::{DueJob, ScheduledJob, ScheduledStatus, Scheduler, SchedulerError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use durable_core::primitives::ScheduledId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone)]
struct Record {
    at: DateTime<Utc>,
    seq: u64,
    job: ScheduledJob,
    status: ScheduledStatus,
}

#[derive(Default)]
struct Jobs {
    records: HashMap<ScheduledId, Record>,
    next_seq: u64,
}

/// In-process scheduler keeping jobs in a hash map.
///
/// Nothing runs on its own: a [`Worker`](crate::worker::Worker) claims due
/// jobs and executes them.
#[derive(Clone, Default)]
pub struct InMemoryScheduler {
    jobs: Arc<RwLock<Jobs>>,
}

impl InMemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pending jobs in deadline order.
    pub fn pending_jobs(
        &self,
    ) -> Result<Vec<(ScheduledId, DateTime<Utc>, ScheduledJob)>, SchedulerError> {
        let jobs = self.read()?;
        let mut pending: Vec<_> = jobs
            .records
            .iter()
            .filter(|(_, record)| record.status == ScheduledStatus::Pending)
            .collect();
        pending.sort_by_key(|(_, record)| (record.at, record.seq));
        Ok(pending
            .into_iter()
            .map(|(id, record)| (id.clone(), record.at, record.job.clone()))
            .collect())
    }

    /// Earliest deadline among pending jobs.
    pub fn next_deadline(&self) -> Result<Option<DateTime<Utc>>, SchedulerError> {
        Ok(self
            .read()?
            .records
            .values()
            .filter(|record| record.status == ScheduledStatus::Pending)
            .map(|record| record.at)
            .min())
    }

    /// Overwrite a job's status, e.g. to simulate a lost execution.
    pub fn set_status(
        &self,
        id: &ScheduledId,
        status: ScheduledStatus,
    ) -> Result<(), SchedulerError> {
        let mut jobs = self.write()?;
        let record = jobs
            .records
            .get_mut(id)
            .ok_or_else(|| SchedulerError::NotFound(id.clone()))?;
        record.status = status;
        Ok(())
    }

    /// Drop every record of a job.
    pub fn forget(&self, id: &ScheduledId) -> Result<(), SchedulerError> {
        self.write()?.records.remove(id);
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Jobs>, SchedulerError> {
        self.jobs
            .read()
            .map_err(|e| SchedulerError::Backend(format!("Lock error: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Jobs>, SchedulerError> {
        self.jobs
            .write()
            .map_err(|e| SchedulerError::Backend(format!("Lock error: {}", e)))
    }
}

#[async_trait]
impl Scheduler for InMemoryScheduler {
    async fn schedule_at(
        &self,
        at: DateTime<Utc>,
        job: ScheduledJob,
    ) -> Result<ScheduledId, SchedulerError> {
        let mut jobs = self.write()?;
        let id = ScheduledId::generate();
        let seq = jobs.next_seq;
        jobs.next_seq += 1;
        tracing::trace!(scheduled_id = %id, job = job.name(), at = %at, "Job scheduled");
        jobs.records.insert(
            id.clone(),
            Record {
                at,
                seq,
                job,
                status: ScheduledStatus::Pending,
            },
        );
        Ok(id)
    }

    async fn cancel(&self, id: &ScheduledId) -> Result<(), SchedulerError> {
        let mut jobs = self.write()?;
        let record = jobs
            .records
            .get_mut(id)
            .ok_or_else(|| SchedulerError::NotFound(id.clone()))?;
        if record.status == ScheduledStatus::Pending {
            record.status = ScheduledStatus::Canceled;
        }
        Ok(())
    }

    async fn status(&self, id: &ScheduledId) -> Result<Option<ScheduledStatus>, SchedulerError> {
        Ok(self.read()?.records.get(id).map(|record| record.status))
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DueJob>, SchedulerError> {
        let mut jobs = self.write()?;
        let mut due: Vec<(DateTime<Utc>, u64, ScheduledId)> = jobs
            .records
            .iter()
            .filter(|(_, record)| record.status == ScheduledStatus::Pending && record.at <= now)
            .map(|(id, record)| (record.at, record.seq, id.clone()))
            .collect();
        due.sort();
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for (_, _, id) in due {
            if let Some(record) = jobs.records.get_mut(&id) {
                record.status = ScheduledStatus::Running;
                claimed.push(DueJob {
                    id,
                    job: record.job.clone(),
                });
            }
        }
        Ok(claimed)
    }

    async fn mark_finished(&self, id: &ScheduledId, succeeded: bool) -> Result<(), SchedulerError> {
        let status = if succeeded {
            ScheduledStatus::Succeeded
        } else {
            ScheduledStatus::Failed
        };
        self.set_status(id, status)
    }
}
