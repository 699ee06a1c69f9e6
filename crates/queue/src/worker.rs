//! Worker tasks, the result bookkeeper and the reaper.
//!
//! Workers never touch bookkeeping directly: each finished attempt is posted
//! as a [`JobOutcome`] on an mpsc channel and a single bookkeeper task applies
//! it to the store. The bookkeeper exits once every worker has dropped its
//! sender, so shutting down drains outstanding results first.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use invoker::{ActionInvoker, TransportError};

use crate::job::JobOutcome;
use crate::{DispatchQueue, Job};

/// Running workers plus their helper tasks.
pub struct WorkerPool {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn spawn(
        queue: DispatchQueue,
        invoker: Arc<dyn ActionInvoker>,
        shutdown: CancellationToken,
    ) -> Self {
        let workers = queue.config.workers.max(1);
        let (outcomes_tx, outcomes_rx) = mpsc::channel(workers * 4);
        let mut tasks = Vec::with_capacity(workers + 2);

        tasks.push(tokio::spawn(
            bookkeeper(queue.clone(), outcomes_rx).instrument(info_span!("bookkeeper")),
        ));
        tasks.push(tokio::spawn(
            reaper(queue.clone(), shutdown.clone()).instrument(info_span!("reaper")),
        ));
        for id in 0..workers {
            tasks.push(tokio::spawn(
                worker_loop(queue.clone(), invoker.clone(), outcomes_tx.clone(), shutdown.clone())
                    .instrument(info_span!("worker", id)),
            ));
        }

        info!(workers, "worker pool started");
        Self { shutdown, tasks }
    }

    /// Stop claiming new jobs, let in-flight attempts finish and wait for
    /// their results to be recorded.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("worker task ended abnormally: {e}");
            }
        }
        info!("worker pool stopped");
    }

    /// Wait until the pool's cancellation token fires and every task exits.
    pub async fn join(self) {
        self.shutdown.cancelled().await;
        self.shutdown().await;
    }
}

async fn worker_loop(
    queue: DispatchQueue,
    invoker: Arc<dyn ActionInvoker>,
    outcomes: mpsc::Sender<JobOutcome>,
    shutdown: CancellationToken,
) {
    let poll_interval = queue.config.poll_interval;
    let default_timeout = queue.config.default_timeout;

    while !shutdown.is_cancelled() {
        match queue.store.claim_next().await {
            Ok(Some(job)) => {
                let outcome = attempt(invoker.as_ref(), &job, default_timeout).await;
                if outcomes.send(outcome).await.is_err() {
                    error!("bookkeeper is gone, stopping worker");
                    break;
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = queue.wake.notified() => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            Err(e) => {
                error!("failed to claim job: {e}");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    }
}

/// One call with the request's timeout enforced here, so every invoker gets
/// the same per-node timeout semantics.
async fn attempt(invoker: &dyn ActionInvoker, job: &Job, default_timeout: Duration) -> JobOutcome {
    let timeout = job.request.timeout_or(default_timeout);
    debug!(handle = %job.handle, node_id = %job.node_id(), attempt = job.attempts, "invoking");

    let result = match tokio::time::timeout(timeout, invoker.invoke(&job.request)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout {
            url: job.request.url.clone(),
            after_ms: timeout.as_millis() as u64,
        }),
    };

    JobOutcome {
        handle: job.handle,
        group: job.group,
        attempt: job.attempts,
        result,
    }
}

async fn bookkeeper(queue: DispatchQueue, mut outcomes: mpsc::Receiver<JobOutcome>) {
    while let Some(outcome) = outcomes.recv().await {
        let handle = outcome.handle;
        if let Err(e) = queue.record(outcome).await {
            error!(%handle, "failed to record outcome: {e}");
        }
    }
}

async fn reaper(queue: DispatchQueue, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(queue.config.reap_interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match queue.store.requeue_stale(queue.config.visibility_timeout).await {
            Ok(0) => {}
            Ok(n) => {
                info!(requeued = n, "requeued stale jobs");
                queue.wake.notify_waiters();
            }
            Err(e) => error!("failed to requeue stale jobs: {e}"),
        }
        match queue.store.purge_finished(queue.config.retention).await {
            Ok(0) => {}
            Ok(n) => debug!(purged = n, "purged expired jobs"),
            Err(e) => error!("failed to purge expired jobs: {e}"),
        }
    }
}
