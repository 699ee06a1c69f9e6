//! The `JobStore` trait: where queued jobs live between submission and
//! completion.
//!
//! Stores must tolerate concurrent callers: one claiming / recording call per
//! worker plus any number of status readers.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use invoker::{ExecutionResult, TransportError};

use crate::{DispatchHandle, GroupHandle, Job, JobStatus, QueueError};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a batch of new jobs. Either all of them become visible or none.
    async fn enqueue(&self, jobs: Vec<Job>) -> Result<(), QueueError>;

    /// Atomically take the oldest claimable `Pending` job, mark it
    /// `Processing` and bump its attempt counter.
    async fn claim_next(&self) -> Result<Option<Job>, QueueError>;

    /// Record a response for attempt `attempt` of a claimed job.
    ///
    /// Writes only while the job is still `Processing` under that attempt.
    /// Returns `false` when the outcome is stale (the job was requeued and
    /// claimed again, or already finished) and nothing was written.
    async fn complete(
        &self,
        handle: DispatchHandle,
        attempt: u32,
        result: ExecutionResult,
    ) -> Result<bool, QueueError>;

    /// Record a transport failure of attempt `attempt`. The job goes back to
    /// `Pending` (claimable after `retry_after`) while attempts remain,
    /// otherwise it is dead-lettered. Returns the resulting status, or `None`
    /// for a stale outcome, under the same rule as [`JobStore::complete`].
    async fn fail(
        &self,
        handle: DispatchHandle,
        attempt: u32,
        error: TransportError,
        retry_after: Duration,
    ) -> Result<Option<JobStatus>, QueueError>;

    /// Cancel every still-`Pending` member of a group. Jobs already claimed
    /// are left alone. Returns how many were cancelled.
    async fn cancel_group(&self, group: GroupHandle) -> Result<usize, QueueError>;

    async fn get(&self, handle: DispatchHandle) -> Result<Option<Job>, QueueError>;

    /// Every job of a group, in submission order.
    async fn group_jobs(&self, group: GroupHandle) -> Result<Vec<Job>, QueueError>;

    /// Return `Processing` jobs untouched for longer than `older_than` to
    /// `Pending`, so work claimed by a worker that died is attempted again.
    async fn requeue_stale(&self, older_than: Duration) -> Result<usize, QueueError>;

    /// Drop terminal jobs last updated more than `older_than` ago.
    async fn purge_finished(&self, older_than: Duration) -> Result<usize, QueueError>;
}

// ---------------------------------------------------------------------------
// Time helpers shared by store implementations
// ---------------------------------------------------------------------------

/// `now + delay`, saturating at `now` if the delay is out of range.
pub fn instant_after(delay: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(now)
}

/// `now - age`, or `None` when nothing can be that old.
pub fn instant_before(age: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|d| Utc::now().checked_sub_signed(d))
}
