//! [`PgJobStore`], the durable [`JobStore`].

use std::time::Duration;

use async_trait::async_trait;

use invoker::{ExecutionResult, TransportError};
use queue::store::{instant_after, instant_before};
use queue::{DispatchHandle, GroupHandle, Job, JobStatus, JobStore, QueueError};

use crate::models::JobRow;
use crate::repository::jobs;
use crate::{DbError, DbPool};

/// Job store over the `dispatch_jobs` table.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// A conditional write matched nothing: `Ok` if the job exists (the
    /// outcome was stale), `UnknownHandle` otherwise.
    async fn stale_or_unknown(&self, handle: DispatchHandle) -> Result<(), QueueError> {
        if jobs::job_exists(&self.pool, handle.as_uuid()).await? {
            Ok(())
        } else {
            Err(QueueError::UnknownHandle(handle))
        }
    }
}

fn db_attempt(attempt: u32) -> i32 {
    i32::try_from(attempt).unwrap_or(i32::MAX)
}

fn to_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>, QueueError> {
    rows.into_iter()
        .map(|row| Job::try_from(row).map_err(QueueError::from))
        .collect()
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, jobs: Vec<Job>) -> Result<(), QueueError> {
        let rows = jobs
            .iter()
            .enumerate()
            .map(|(seq, job)| JobRow::from_job(job, seq))
            .collect::<Result<Vec<_>, DbError>>()?;
        jobs::insert_jobs(&self.pool, &rows).await?;
        Ok(())
    }

    async fn claim_next(&self) -> Result<Option<Job>, QueueError> {
        match jobs::fetch_next_job(&self.pool).await? {
            Some(row) => Ok(Some(Job::try_from(row)?)),
            None => Ok(None),
        }
    }

    async fn complete(
        &self,
        handle: DispatchHandle,
        attempt: u32,
        result: ExecutionResult,
    ) -> Result<bool, QueueError> {
        let result = serde_json::to_value(result).map_err(DbError::from)?;
        if jobs::complete_job(&self.pool, handle.as_uuid(), db_attempt(attempt), result).await? {
            return Ok(true);
        }
        self.stale_or_unknown(handle).await.map(|()| false)
    }

    async fn fail(
        &self,
        handle: DispatchHandle,
        attempt: u32,
        error: TransportError,
        retry_after: Duration,
    ) -> Result<Option<JobStatus>, QueueError> {
        let error = serde_json::to_value(error).map_err(DbError::from)?;
        let retry_at = instant_after(retry_after);
        match jobs::fail_job(&self.pool, handle.as_uuid(), db_attempt(attempt), error, retry_at).await? {
            Some(status) => status.parse().map(Some).map_err(QueueError::Store),
            None => self.stale_or_unknown(handle).await.map(|()| None),
        }
    }

    async fn cancel_group(&self, group: GroupHandle) -> Result<usize, QueueError> {
        match jobs::cancel_group(&self.pool, group.as_uuid()).await {
            Ok(n) => Ok(n as usize),
            Err(DbError::NotFound) => Err(QueueError::UnknownGroup(group)),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, handle: DispatchHandle) -> Result<Option<Job>, QueueError> {
        match jobs::get_job(&self.pool, handle.as_uuid()).await? {
            Some(row) => Ok(Some(Job::try_from(row)?)),
            None => Ok(None),
        }
    }

    async fn group_jobs(&self, group: GroupHandle) -> Result<Vec<Job>, QueueError> {
        to_jobs(jobs::list_group(&self.pool, group.as_uuid()).await?)
    }

    async fn requeue_stale(&self, older_than: Duration) -> Result<usize, QueueError> {
        let Some(cutoff) = instant_before(older_than) else {
            return Ok(0);
        };
        Ok(jobs::requeue_stale(&self.pool, cutoff).await? as usize)
    }

    async fn purge_finished(&self, older_than: Duration) -> Result<usize, QueueError> {
        let Some(cutoff) = instant_before(older_than) else {
            return Ok(0);
        };
        Ok(jobs::purge_finished(&self.pool, cutoff).await? as usize)
    }
}
