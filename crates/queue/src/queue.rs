//! The submitter-facing side of the dispatch queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use invoker::{ActionInvoker, InvocationRequest};

use crate::job::JobOutcome;
use crate::worker::WorkerPool;
use crate::{DispatchHandle, GroupHandle, GroupStatus, Job, JobEvent, JobStatus, JobStore, QueueError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the queue and its workers.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Number of concurrent worker tasks.
    pub workers: usize,
    /// Attempts per job before it is dead-lettered.
    pub max_attempts: u32,
    /// Base delay for exponential back-off between attempts.
    pub retry_base_delay: Duration,
    /// Timeout for requests that do not carry their own.
    pub default_timeout: Duration,
    /// How often idle workers and waiters re-check the store.
    pub poll_interval: Duration,
    /// A `Processing` job untouched for this long is handed out again.
    pub visibility_timeout: Duration,
    /// Terminal jobs are kept queryable for this long.
    pub retention: Duration,
    /// How often the reaper runs.
    pub reap_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
            default_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            visibility_timeout: Duration::from_secs(300),
            retention: Duration::from_secs(3600),
            reap_interval: Duration::from_secs(30),
        }
    }
}

impl QueueConfig {
    /// Every attempt must finish (or time out) before the reaper may treat
    /// it as abandoned.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.default_timeout >= self.visibility_timeout {
            return Err(QueueError::InvalidConfig(format!(
                "default timeout ({:?}) must be below the visibility timeout ({:?})",
                self.default_timeout, self.visibility_timeout
            )));
        }
        Ok(())
    }

    fn check_timeout(&self, request: &InvocationRequest) -> Result<(), QueueError> {
        let timeout = request.timeout_or(self.default_timeout);
        if timeout >= self.visibility_timeout {
            return Err(QueueError::TimeoutExceedsVisibility {
                node_id: request.node_id.clone(),
                timeout_ms: timeout.as_millis() as u64,
                visibility_ms: self.visibility_timeout.as_millis() as u64,
            });
        }
        Ok(())
    }
}

const EVENT_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// DispatchQueue
// ---------------------------------------------------------------------------

/// Cheap-to-clone handle onto a job store plus the signalling shared with
/// the workers.
#[derive(Clone)]
pub struct DispatchQueue {
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) config: QueueConfig,
    pub(crate) wake: Arc<Notify>,
    events: broadcast::Sender<JobEvent>,
}

impl DispatchQueue {
    /// # Errors
    /// `InvalidConfig` when `config` fails [`QueueConfig::validate`].
    pub fn new(store: Arc<dyn JobStore>, config: QueueConfig) -> Result<Self, QueueError> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            store,
            config,
            wake: Arc::new(Notify::new()),
            events,
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Enqueue a batch as one group and return immediately.
    pub async fn submit(&self, requests: Vec<InvocationRequest>) -> Result<GroupHandle, QueueError> {
        let (group, _) = self.enqueue_group(requests).await?;
        Ok(group)
    }

    /// Enqueue a single request in a group of its own.
    pub async fn submit_one(&self, request: InvocationRequest) -> Result<DispatchHandle, QueueError> {
        let (_, handles) = self.enqueue_group(vec![request]).await?;
        handles.into_iter().next().ok_or(QueueError::EmptyBatch)
    }

    async fn enqueue_group(
        &self,
        requests: Vec<InvocationRequest>,
    ) -> Result<(GroupHandle, Vec<DispatchHandle>), QueueError> {
        if requests.is_empty() {
            return Err(QueueError::EmptyBatch);
        }
        for request in &requests {
            self.config.check_timeout(request)?;
        }

        let group = GroupHandle::new();
        let jobs: Vec<Job> = requests
            .into_iter()
            .map(|request| Job::new(group, request, self.config.max_attempts))
            .collect();
        let handles: Vec<DispatchHandle> = jobs.iter().map(|job| job.handle).collect();

        self.store.enqueue(jobs).await?;
        self.wake.notify_waiters();

        info!(%group, jobs = handles.len(), "batch enqueued");
        Ok((group, handles))
    }

    /// Current state of one job.
    pub async fn status(&self, handle: DispatchHandle) -> Result<Job, QueueError> {
        self.store
            .get(handle)
            .await?
            .ok_or(QueueError::UnknownHandle(handle))
    }

    /// Every job of a group, in submission order.
    pub async fn group_jobs(&self, group: GroupHandle) -> Result<Vec<Job>, QueueError> {
        let jobs = self.store.group_jobs(group).await?;
        if jobs.is_empty() {
            return Err(QueueError::UnknownGroup(group));
        }
        Ok(jobs)
    }

    pub async fn group_status(&self, group: GroupHandle) -> Result<GroupStatus, QueueError> {
        let jobs = self.group_jobs(group).await?;
        Ok(GroupStatus::from_jobs(group, &jobs))
    }

    /// Node id → dispatch handle for every member of a group.
    pub async fn members(&self, group: GroupHandle) -> Result<Vec<(String, DispatchHandle)>, QueueError> {
        Ok(self
            .group_jobs(group)
            .await?
            .into_iter()
            .map(|job| (job.request.node_id, job.handle))
            .collect())
    }

    /// Cancel the members of a group no worker has claimed yet. Calls that are
    /// already in flight run to completion.
    pub async fn cancel(&self, group: GroupHandle) -> Result<usize, QueueError> {
        let cancelled = self.store.cancel_group(group).await?;
        info!(%group, cancelled, "group cancelled");

        for job in self.store.group_jobs(group).await? {
            if job.status == JobStatus::Cancelled {
                let _ = self.events.send(JobEvent {
                    handle: job.handle,
                    group,
                    status: JobStatus::Cancelled,
                });
            }
        }
        Ok(cancelled)
    }

    /// Resolve once every member of the group is terminal.
    ///
    /// Wakes on bookkeeper events and, as a fallback for workers running in
    /// another process, re-reads the store every `poll_interval`.
    pub async fn wait_group(&self, group: GroupHandle) -> Result<GroupStatus, QueueError> {
        let mut events = self.events.subscribe();
        loop {
            let status = self.group_status(group).await?;
            if status.is_finished() {
                return Ok(status);
            }

            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) if event.group == group => break,
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(_)) => break,
                        Err(broadcast::error::RecvError::Closed) => return Err(QueueError::Closed),
                    },
                    _ = tokio::time::sleep(self.config.poll_interval) => break,
                }
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Start `config.workers` workers, the bookkeeper and the reaper.
    pub fn spawn_workers(
        &self,
        invoker: Arc<dyn ActionInvoker>,
        shutdown: CancellationToken,
    ) -> WorkerPool {
        WorkerPool::spawn(self.clone(), invoker, shutdown)
    }

    /// Write one attempt's outcome to the store and announce it.
    ///
    /// Outcomes of attempts the job has moved past are dropped; the result
    /// is `None` for those.
    pub(crate) async fn record(&self, outcome: JobOutcome) -> Result<Option<JobStatus>, QueueError> {
        let JobOutcome { handle, group, attempt, result } = outcome;

        let status = match result {
            Ok(result) => {
                let status_code = result.status_code;
                if !self.store.complete(handle, attempt, result).await? {
                    debug!(%handle, attempt, "dropping stale outcome");
                    return Ok(None);
                }
                debug!(%handle, status_code, "job completed");
                JobStatus::Completed
            }
            Err(err) => {
                let delay = self.retry_delay(attempt);
                let Some(status) = self.store.fail(handle, attempt, err.clone(), delay).await? else {
                    debug!(%handle, attempt, "dropping stale failure: {err}");
                    return Ok(None);
                };
                if status == JobStatus::DeadLettered {
                    error!(%handle, attempt, "job dead-lettered: {err}");
                } else {
                    warn!(%handle, attempt, "attempt failed, retrying in {delay:?}: {err}");
                }
                status
            }
        };

        let _ = self.events.send(JobEvent { handle, group, status });
        Ok(Some(status))
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.config.retry_base_delay.saturating_mul(factor)
    }
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
