//! In-process [`JobStore`].
//!
//! Jobs live in a `RwLock`-guarded map; every operation takes the lock for a
//! short, non-async critical section. Nothing survives the process, so this
//! store gives at-least-once delivery only for as long as the process runs.
//! Use the Postgres store from the `db` crate when submissions must outlive it.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use invoker::{ExecutionResult, TransportError};

use crate::store::{instant_after, instant_before};
use crate::{DispatchHandle, GroupHandle, Job, JobStatus, JobStore, QueueError};

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<DispatchHandle, Job>,
    /// Submission order, used for FIFO claiming.
    order: Vec<DispatchHandle>,
    groups: HashMap<GroupHandle, Vec<DispatchHandle>>,
}

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: RwLock<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, QueueError> {
        self.inner
            .read()
            .map_err(|_| QueueError::Store("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, QueueError> {
        self.inner
            .write()
            .map_err(|_| QueueError::Store("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, jobs: Vec<Job>) -> Result<(), QueueError> {
        let mut inner = self.write()?;
        for job in jobs {
            inner.order.push(job.handle);
            inner.groups.entry(job.group).or_default().push(job.handle);
            inner.jobs.insert(job.handle, job);
        }
        Ok(())
    }

    async fn claim_next(&self) -> Result<Option<Job>, QueueError> {
        let mut inner = self.write()?;
        let now = Utc::now();

        let next = inner.order.iter().copied().find(|handle| {
            inner
                .jobs
                .get(handle)
                .is_some_and(|job| job.status == JobStatus::Pending && job.available_at <= now)
        });

        Ok(next.and_then(|handle| {
            inner.jobs.get_mut(&handle).map(|job| {
                job.status = JobStatus::Processing;
                job.attempts += 1;
                job.updated_at = now;
                job.clone()
            })
        }))
    }

    async fn complete(
        &self,
        handle: DispatchHandle,
        attempt: u32,
        result: ExecutionResult,
    ) -> Result<bool, QueueError> {
        let mut inner = self.write()?;
        let job = inner
            .jobs
            .get_mut(&handle)
            .ok_or(QueueError::UnknownHandle(handle))?;
        if !job.is_claimed_by(attempt) {
            return Ok(false);
        }
        job.status = JobStatus::Completed;
        job.result = Some(result);
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn fail(
        &self,
        handle: DispatchHandle,
        attempt: u32,
        error: TransportError,
        retry_after: Duration,
    ) -> Result<Option<JobStatus>, QueueError> {
        let mut inner = self.write()?;
        let job = inner
            .jobs
            .get_mut(&handle)
            .ok_or(QueueError::UnknownHandle(handle))?;
        if !job.is_claimed_by(attempt) {
            return Ok(None);
        }

        job.status = if job.attempts >= job.max_attempts {
            JobStatus::DeadLettered
        } else {
            job.available_at = instant_after(retry_after);
            JobStatus::Pending
        };
        job.last_error = Some(error);
        job.updated_at = Utc::now();
        Ok(Some(job.status))
    }

    async fn cancel_group(&self, group: GroupHandle) -> Result<usize, QueueError> {
        let mut inner = self.write()?;
        let Inner { jobs, groups, .. } = &mut *inner;
        let members = groups.get(&group).ok_or(QueueError::UnknownGroup(group))?;

        let now = Utc::now();
        let mut cancelled = 0;
        for handle in members {
            if let Some(job) = jobs.get_mut(handle) {
                if job.status == JobStatus::Pending {
                    job.status = JobStatus::Cancelled;
                    job.updated_at = now;
                    cancelled += 1;
                }
            }
        }
        Ok(cancelled)
    }

    async fn get(&self, handle: DispatchHandle) -> Result<Option<Job>, QueueError> {
        Ok(self.read()?.jobs.get(&handle).cloned())
    }

    async fn group_jobs(&self, group: GroupHandle) -> Result<Vec<Job>, QueueError> {
        let inner = self.read()?;
        Ok(inner
            .groups
            .get(&group)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|handle| inner.jobs.get(handle).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn requeue_stale(&self, older_than: Duration) -> Result<usize, QueueError> {
        let Some(cutoff) = instant_before(older_than) else {
            return Ok(0);
        };
        let mut inner = self.write()?;
        let now = Utc::now();
        let mut requeued = 0;
        for job in inner.jobs.values_mut() {
            if job.status == JobStatus::Processing && job.updated_at < cutoff {
                job.status = JobStatus::Pending;
                job.available_at = now;
                job.updated_at = now;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn purge_finished(&self, older_than: Duration) -> Result<usize, QueueError> {
        let Some(cutoff) = instant_before(older_than) else {
            return Ok(0);
        };
        let mut inner = self.write()?;
        let expired: Vec<DispatchHandle> = inner
            .jobs
            .values()
            .filter(|job| job.status.is_terminal() && job.updated_at < cutoff)
            .map(|job| job.handle)
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }

        for handle in &expired {
            inner.jobs.remove(handle);
        }
        let Inner { jobs, order, groups } = &mut *inner;
        order.retain(|handle| jobs.contains_key(handle));
        groups.retain(|_, members| {
            members.retain(|handle| jobs.contains_key(handle));
            !members.is_empty()
        });
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invoker::InvocationRequest;
    use serde_json::json;

    fn job(group: GroupHandle, node: &str, max_attempts: u32) -> Job {
        Job::new(
            group,
            InvocationRequest::post(node, format!("http://svc/{node}"), json!({})),
            max_attempts,
        )
    }

    #[tokio::test]
    async fn claims_in_submission_order() {
        let store = MemoryJobStore::new();
        let group = GroupHandle::new();
        store
            .enqueue(vec![job(group, "a", 3), job(group, "b", 3)])
            .await
            .unwrap();

        let first = store.claim_next().await.unwrap().unwrap();
        let second = store.claim_next().await.unwrap().unwrap();
        assert_eq!(first.node_id(), "a");
        assert_eq!(second.node_id(), "b");
        assert_eq!(first.status, JobStatus::Processing);
        assert_eq!(first.attempts, 1);
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failure_reschedules_until_attempts_run_out() {
        let store = MemoryJobStore::new();
        let group = GroupHandle::new();
        store.enqueue(vec![job(group, "a", 2)]).await.unwrap();
        let err = TransportError::Connect { url: "http://svc/a".into(), message: "refused".into() };

        let first = store.claim_next().await.unwrap().unwrap();
        let status = store.fail(first.handle, 1, err.clone(), Duration::ZERO).await.unwrap();
        assert_eq!(status, Some(JobStatus::Pending));

        let second = store.claim_next().await.unwrap().unwrap();
        assert_eq!(second.handle, first.handle);
        assert_eq!(second.attempts, 2);
        let status = store.fail(second.handle, 2, err.clone(), Duration::ZERO).await.unwrap();
        assert_eq!(status, Some(JobStatus::DeadLettered));

        let stored = store.get(second.handle).await.unwrap().unwrap();
        assert_eq!(stored.last_error, Some(err));
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retry_backoff_hides_job_until_due() {
        let store = MemoryJobStore::new();
        store.enqueue(vec![job(GroupHandle::new(), "a", 3)]).await.unwrap();
        let err = TransportError::Connect { url: "http://svc/a".into(), message: "refused".into() };

        let claimed = store.claim_next().await.unwrap().unwrap();
        store.fail(claimed.handle, claimed.attempts, err, Duration::from_secs(60)).await.unwrap();

        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_leaves_claimed_jobs_alone() {
        let store = MemoryJobStore::new();
        let group = GroupHandle::new();
        store
            .enqueue(vec![job(group, "a", 1), job(group, "b", 1)])
            .await
            .unwrap();
        let in_flight = store.claim_next().await.unwrap().unwrap();

        assert_eq!(store.cancel_group(group).await.unwrap(), 1);

        let jobs = store.group_jobs(group).await.unwrap();
        assert_eq!(jobs[0].handle, in_flight.handle);
        assert_eq!(jobs[0].status, JobStatus::Processing);
        assert_eq!(jobs[1].status, JobStatus::Cancelled);
        assert!(matches!(
            store.cancel_group(GroupHandle::new()).await,
            Err(QueueError::UnknownGroup(_))
        ));
    }

    #[tokio::test]
    async fn stale_processing_jobs_are_requeued() {
        let store = MemoryJobStore::new();
        let group = GroupHandle::new();
        store.enqueue(vec![job(group, "a", 3)]).await.unwrap();
        let claimed = store.claim_next().await.unwrap().unwrap();

        assert_eq!(store.requeue_stale(Duration::from_secs(60)).await.unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.requeue_stale(Duration::from_millis(5)).await.unwrap(), 1);

        let reclaimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(reclaimed.handle, claimed.handle);
        assert_eq!(reclaimed.attempts, 2);
    }

    #[tokio::test]
    async fn purge_drops_only_old_terminal_jobs() {
        let store = MemoryJobStore::new();
        let group = GroupHandle::new();
        store
            .enqueue(vec![job(group, "done", 1), job(group, "waiting", 1)])
            .await
            .unwrap();
        let done = store.claim_next().await.unwrap().unwrap();
        store
            .complete(done.handle, done.attempts, ExecutionResult::new(200, json!({})))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.purge_finished(Duration::from_millis(5)).await.unwrap(), 1);

        assert!(store.get(done.handle).await.unwrap().is_none());
        let remaining = store.group_jobs(group).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].node_id(), "waiting");
    }

    #[tokio::test]
    async fn late_outcome_from_a_requeued_attempt_is_dropped() {
        let store = MemoryJobStore::new();
        store.enqueue(vec![job(GroupHandle::new(), "a", 3)]).await.unwrap();
        let err = TransportError::Timeout { url: "http://svc/a".into(), after_ms: 400_000 };

        // Attempt 1 outlives the visibility timeout; attempt 2 completes.
        let first = store.claim_next().await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.requeue_stale(Duration::from_millis(5)).await.unwrap(), 1);
        let second = store.claim_next().await.unwrap().unwrap();
        assert_eq!(second.attempts, 2);
        assert!(store
            .complete(second.handle, 2, ExecutionResult::new(200, json!({})))
            .await
            .unwrap());

        // Attempt 1 reports back late: neither outcome kind may reopen the job.
        assert_eq!(store.fail(first.handle, 1, err, Duration::ZERO).await.unwrap(), None);
        assert!(!store
            .complete(first.handle, 1, ExecutionResult::new(500, json!({})))
            .await
            .unwrap());

        let stored = store.get(first.handle).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.result.unwrap().status_code, 200);
        assert_eq!(stored.last_error, None);
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn outcome_for_a_requeued_but_unclaimed_job_is_dropped() {
        let store = MemoryJobStore::new();
        store.enqueue(vec![job(GroupHandle::new(), "a", 3)]).await.unwrap();

        let first = store.claim_next().await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.requeue_stale(Duration::from_millis(5)).await.unwrap();

        assert!(!store
            .complete(first.handle, 1, ExecutionResult::new(200, json!({})))
            .await
            .unwrap());
        let stored = store.get(first.handle).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert!(matches!(
            store.complete(DispatchHandle::new(), 1, ExecutionResult::new(200, json!({}))).await,
            Err(QueueError::UnknownHandle(_))
        ));
    }
}
