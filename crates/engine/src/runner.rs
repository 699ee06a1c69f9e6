//! Workflow runner.
//!
//! `WorkflowRunner` drives one execution end to end:
//! 1. Resolves the definition into dependency batches (no side effects on
//!    failure).
//! 2. Submits the first batch to the dispatch queue and hands its
//!    `GroupHandle` back to the caller as the execution id.
//! 3. Under `LayerProgression::Continue`, a continuation task waits for each
//!    group to finish and only then submits the next batch. It halts as soon
//!    as a finished group has a dead-lettered or cancelled member.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use invoker::{ExecutionResult, TransportError};
use queue::{DispatchHandle, DispatchQueue, GroupHandle, GroupStatus, JobStatus};

use crate::models::{ExecutionMode, WorkflowDefinition};
use crate::resolver::{Batch, GraphResolver, SkippedNode};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What happens after the first batch is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayerProgression {
    /// Submit each later batch once the previous one has finished.
    #[default]
    Continue,
    /// Submit the first batch only; later batches are left undispatched.
    FirstLayerOnly,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub progression: LayerProgression,
    /// Settled executions stay queryable for this long.
    pub retention: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            progression: LayerProgression::default(),
            retention: Duration::from_secs(3600),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Received,
    Resolved,
    Dispatched,
    /// The first batch is queued; its handle has been returned.
    Accepted,
    /// A continuation is waiting on, or submitting, later batches.
    Running,
    /// Every batch finished and every member completed.
    Completed,
    /// Stopped before the last batch; see `halt_reason`.
    Halted,
    Cancelled,
}

impl ExecutionState {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Halted | Self::Cancelled)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::Resolved => "resolved",
            Self::Dispatched => "dispatched",
            Self::Accepted => "accepted",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Halted => "halted",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of one execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionSnapshot {
    /// The first batch's group handle.
    pub execution_id: GroupHandle,
    pub mode: ExecutionMode,
    pub state: ExecutionState,
    /// Groups submitted so far, in dispatch order.
    pub groups: Vec<GroupHandle>,
    /// Node id → handle of its queued job, for every submitted node.
    pub nodes: BTreeMap<String, DispatchHandle>,
    pub skipped: Vec<SkippedNode>,
    /// Batches resolved but not (yet) submitted.
    pub remaining_batches: usize,
    pub halt_reason: Option<String>,
}

/// Final outcome of one submitted node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeReport {
    pub node_id: String,
    pub handle: DispatchHandle,
    pub group: GroupHandle,
    pub status: JobStatus,
    pub attempts: u32,
    pub result: Option<ExecutionResult>,
    pub error: Option<TransportError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    #[serde(flatten)]
    pub snapshot: ExecutionSnapshot,
    pub node_results: Vec<NodeReport>,
}

struct ExecutionEntry {
    snapshot: ExecutionSnapshot,
    cancel: CancellationToken,
    /// When the runner stopped changing this entry. `None` while a
    /// continuation may still update it.
    settled_at: Option<Instant>,
}

impl ExecutionEntry {
    fn settle(&mut self) {
        if self.settled_at.is_none() && self.snapshot.state.is_finished() {
            self.settled_at = Some(Instant::now());
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowRunner
// ---------------------------------------------------------------------------

/// Orchestrates executions on top of a [`DispatchQueue`].
///
/// Cheap to clone; clones share the same execution table.
#[derive(Clone)]
pub struct WorkflowRunner {
    resolver: Arc<GraphResolver>,
    queue: DispatchQueue,
    config: RunnerConfig,
    executions: Arc<RwLock<HashMap<GroupHandle, ExecutionEntry>>>,
}

impl WorkflowRunner {
    pub fn new(resolver: Arc<GraphResolver>, queue: DispatchQueue, config: RunnerConfig) -> Self {
        Self {
            resolver,
            queue,
            config,
            executions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    /// Validate, resolve and submit the first batch. Returns its group
    /// handle without waiting for any invocation.
    ///
    /// # Errors
    /// Structural errors, `NoDispatchableNodes`, or a queue failure while
    /// submitting the first batch. Nothing is submitted on error.
    #[instrument(skip(self, workflow), fields(nodes = workflow.nodes.len(), %mode))]
    pub async fn execute(
        &self,
        workflow: &WorkflowDefinition,
        mode: ExecutionMode,
    ) -> Result<GroupHandle, EngineError> {
        let (execution_id, pending) = self.start(workflow, mode).await?;

        if self.config.progression == LayerProgression::Continue {
            let runner = self.clone();
            tokio::spawn(async move {
                if let Err(err) = runner.drive(execution_id, pending).await {
                    error!(%execution_id, "execution stopped: {err}");
                    runner.halt(execution_id, err.to_string());
                }
            });
        } else {
            // No continuation will touch this entry again.
            let mut executions = self.executions.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = executions.get_mut(&execution_id) {
                entry.settled_at = Some(Instant::now());
            }
        }

        Ok(execution_id)
    }

    /// Like [`execute`](Self::execute), but drives every batch inline and
    /// returns once the execution has finished.
    #[instrument(skip(self, workflow), fields(nodes = workflow.nodes.len(), %mode))]
    pub async fn run_to_completion(
        &self,
        workflow: &WorkflowDefinition,
        mode: ExecutionMode,
    ) -> Result<ExecutionReport, EngineError> {
        let (execution_id, pending) = self.start(workflow, mode).await?;
        if let Err(err) = self.drive(execution_id, pending).await {
            self.halt(execution_id, err.to_string());
            return Err(err);
        }
        self.report(&execution_id).await
    }

    /// Current bookkeeping for an execution.
    pub fn execution(&self, execution_id: &GroupHandle) -> Result<ExecutionSnapshot, EngineError> {
        self.executions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(execution_id)
            .map(|entry| entry.snapshot.clone())
            .ok_or(EngineError::UnknownExecution(*execution_id))
    }

    /// Stop submitting later batches and cancel every job not yet claimed.
    /// Calls already in flight run to completion. Returns how many jobs were
    /// cancelled.
    pub async fn cancel(&self, execution_id: &GroupHandle) -> Result<usize, EngineError> {
        let groups = {
            let mut executions = self.executions.write().unwrap_or_else(PoisonError::into_inner);
            let entry = executions
                .get_mut(execution_id)
                .ok_or(EngineError::UnknownExecution(*execution_id))?;
            entry.cancel.cancel();
            if !entry.snapshot.state.is_finished() {
                entry.snapshot.state = ExecutionState::Cancelled;
            }
            entry.settle();
            entry.snapshot.groups.clone()
        };

        let mut cancelled = 0;
        for group in groups {
            cancelled += self.queue.cancel(group).await?;
        }
        info!(%execution_id, cancelled, "execution cancelled");
        Ok(cancelled)
    }

    /// Forget executions settled more than `retention` ago. Returns how many
    /// were evicted. Also runs whenever a new execution starts.
    pub fn purge_finished(&self) -> usize {
        let retention = self.config.retention;
        let mut executions = self.executions.write().unwrap_or_else(PoisonError::into_inner);
        let before = executions.len();
        executions.retain(|_, entry| entry.settled_at.map_or(true, |at| at.elapsed() < retention));
        let purged = before - executions.len();
        if purged > 0 {
            debug!(purged, "evicted settled executions");
        }
        purged
    }

    /// Snapshot plus the queue's view of every submitted node.
    pub async fn report(&self, execution_id: &GroupHandle) -> Result<ExecutionReport, EngineError> {
        let snapshot = self.execution(execution_id)?;
        let mut node_results = Vec::with_capacity(snapshot.nodes.len());
        for group in &snapshot.groups {
            for job in self.queue.group_jobs(*group).await? {
                node_results.push(NodeReport {
                    node_id: job.request.node_id,
                    handle: job.handle,
                    group: job.group,
                    status: job.status,
                    attempts: job.attempts,
                    result: job.result,
                    error: job.last_error,
                });
            }
        }
        Ok(ExecutionReport { snapshot, node_results })
    }

    // -----------------------------------------------------------------------
    // Internal: resolve and submit the first batch.
    // -----------------------------------------------------------------------

    async fn start(
        &self,
        workflow: &WorkflowDefinition,
        mode: ExecutionMode,
    ) -> Result<(GroupHandle, VecDeque<Batch>), EngineError> {
        debug!(state = %ExecutionState::Received, "execution received");
        self.purge_finished();

        let resolution = self.resolver.resolve(workflow, mode)?;
        info!(
            state = %ExecutionState::Resolved,
            batches = resolution.batches.len(),
            skipped = resolution.skipped.len(),
            "workflow resolved"
        );

        let mut pending: VecDeque<Batch> = resolution.batches.into();
        let Some(first) = pending.pop_front() else {
            let skipped = resolution.skipped.into_iter().map(|s| s.node_id).collect();
            return Err(EngineError::NoDispatchableNodes { skipped });
        };

        let dropped = match self.config.progression {
            LayerProgression::Continue => 0,
            LayerProgression::FirstLayerOnly => {
                let dropped = pending.len();
                if dropped > 0 {
                    warn!(dropped, "first-layer-only progression: later batches will not be dispatched");
                }
                pending.clear();
                dropped
            }
        };

        debug!(state = %ExecutionState::Dispatched, nodes = ?first.node_ids(), "submitting batch 0");
        let execution_id = self.queue.submit(first.requests()).await?;
        let members = self.queue.members(execution_id).await?;

        let snapshot = ExecutionSnapshot {
            execution_id,
            mode,
            state: ExecutionState::Accepted,
            groups: vec![execution_id],
            nodes: members.into_iter().collect(),
            skipped: resolution.skipped,
            remaining_batches: pending.len() + dropped,
            halt_reason: None,
        };
        self.executions.write().unwrap_or_else(PoisonError::into_inner).insert(
            execution_id,
            ExecutionEntry { snapshot, cancel: CancellationToken::new(), settled_at: None },
        );

        info!(%execution_id, state = %ExecutionState::Accepted, "execution accepted");
        Ok((execution_id, pending))
    }

    // -----------------------------------------------------------------------
    // Internal: the layer loop.
    // -----------------------------------------------------------------------

    /// Wait for the current group, then submit the next batch, until nothing
    /// is left, a group finishes with failures, or the execution is cancelled.
    async fn drive(&self, execution_id: GroupHandle, mut pending: VecDeque<Batch>) -> Result<(), EngineError> {
        let cancel = self.cancel_token(&execution_id)?;
        self.update(&execution_id, |s| {
            if !s.state.is_finished() {
                s.state = ExecutionState::Running;
            }
        });

        let mut current = execution_id;
        loop {
            let status = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                status = self.queue.wait_group(current) => status?,
            };

            if let Some(reason) = failure_reason(&status) {
                warn!(%execution_id, group = %current, "halting execution: {reason}");
                self.halt(execution_id, reason);
                return Ok(());
            }

            let Some(batch) = pending.pop_front() else {
                self.finish(execution_id);
                return Ok(());
            };
            if cancel.is_cancelled() {
                return Ok(());
            }

            debug!(%execution_id, batch = batch.index, nodes = ?batch.node_ids(), "submitting batch");
            let group = self.queue.submit(batch.requests()).await?;
            let members = self.queue.members(group).await?;
            self.update(&execution_id, |s| {
                s.groups.push(group);
                s.nodes.extend(members);
                s.remaining_batches = pending.len();
            });

            // A cancel that raced the submit above missed this group.
            if cancel.is_cancelled() {
                self.queue.cancel(group).await?;
                return Ok(());
            }
            current = group;
        }
    }

    fn finish(&self, execution_id: GroupHandle) {
        self.update(&execution_id, |s| {
            if s.state.is_finished() {
                return;
            }
            if s.remaining_batches > 0 {
                s.state = ExecutionState::Halted;
                s.halt_reason = Some(format!(
                    "layer progression disabled; {} batch(es) not dispatched",
                    s.remaining_batches
                ));
            } else {
                s.state = ExecutionState::Completed;
            }
        });
        info!(%execution_id, "execution finished");
    }

    fn halt(&self, execution_id: GroupHandle, reason: String) {
        self.update(&execution_id, |s| {
            if !s.state.is_finished() {
                s.state = ExecutionState::Halted;
                s.halt_reason = Some(reason);
            }
        });
    }

    fn cancel_token(&self, execution_id: &GroupHandle) -> Result<CancellationToken, EngineError> {
        self.executions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(execution_id)
            .map(|entry| entry.cancel.clone())
            .ok_or(EngineError::UnknownExecution(*execution_id))
    }

    fn update(&self, execution_id: &GroupHandle, f: impl FnOnce(&mut ExecutionSnapshot)) {
        let mut executions = self.executions.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = executions.get_mut(execution_id) {
            f(&mut entry.snapshot);
            entry.settle();
        }
    }
}

fn failure_reason(status: &GroupStatus) -> Option<String> {
    match (status.dead_lettered, status.cancelled) {
        (0, 0) => None,
        (dead, 0) => Some(format!("{dead} node(s) dead-lettered in group {}", status.group)),
        (0, cancelled) => Some(format!("{cancelled} node(s) cancelled in group {}", status.group)),
        (dead, cancelled) => Some(format!(
            "{dead} node(s) dead-lettered and {cancelled} cancelled in group {}",
            status.group
        )),
    }
}
