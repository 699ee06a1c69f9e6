//! Job bookkeeping types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use invoker::{ExecutionResult, InvocationRequest, TransportError};

use crate::{DispatchHandle, GroupHandle};

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a queued invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker (first attempt or a scheduled retry).
    Pending,
    /// Claimed by a worker; the call may be in flight.
    Processing,
    /// The remote service answered. The status code is not interpreted.
    Completed,
    /// Every attempt ended in a transport error.
    DeadLettered,
    /// Cancelled before a worker claimed it.
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::DeadLettered | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending      => write!(f, "pending"),
            Self::Processing   => write!(f, "processing"),
            Self::Completed    => write!(f, "completed"),
            Self::DeadLettered => write!(f, "dead_lettered"),
            Self::Cancelled    => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"       => Ok(Self::Pending),
            "processing"    => Ok(Self::Processing),
            "completed"     => Ok(Self::Completed),
            "dead_lettered" => Ok(Self::DeadLettered),
            "cancelled"     => Ok(Self::Cancelled),
            other           => Err(format!("unknown job status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One invocation request plus everything the queue knows about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub handle: DispatchHandle,
    pub group: GroupHandle,
    pub request: InvocationRequest,
    pub status: JobStatus,
    /// Attempts started so far.
    pub attempts: u32,
    pub max_attempts: u32,
    /// Set once the job is `Completed`.
    pub result: Option<ExecutionResult>,
    /// Most recent transport failure, kept across retries.
    pub last_error: Option<TransportError>,
    /// Earliest time a worker may claim the job.
    pub available_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A fresh pending job that is immediately claimable.
    pub fn new(group: GroupHandle, request: InvocationRequest, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            handle: DispatchHandle::new(),
            group,
            request,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            result: None,
            last_error: None,
            available_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.request.node_id
    }

    /// Still `Processing` under the given attempt, i.e. nobody requeued or
    /// finished it since that attempt was claimed.
    pub fn is_claimed_by(&self, attempt: u32) -> bool {
        self.status == JobStatus::Processing && self.attempts == attempt
    }
}

// ---------------------------------------------------------------------------
// Outcomes and events
// ---------------------------------------------------------------------------

/// What a worker posts back after one attempt.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub handle: DispatchHandle,
    pub group: GroupHandle,
    pub attempt: u32,
    pub result: Result<ExecutionResult, TransportError>,
}

/// Broadcast after the bookkeeper has recorded a status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEvent {
    pub handle: DispatchHandle,
    pub group: GroupHandle,
    pub status: JobStatus,
}

// ---------------------------------------------------------------------------
// GroupStatus
// ---------------------------------------------------------------------------

/// Aggregate state of every job in a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStatus {
    pub group: GroupHandle,
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub dead_lettered: usize,
    pub cancelled: usize,
}

impl GroupStatus {
    pub fn from_jobs(group: GroupHandle, jobs: &[Job]) -> Self {
        let mut status = Self {
            group,
            total: jobs.len(),
            pending: 0,
            processing: 0,
            completed: 0,
            dead_lettered: 0,
            cancelled: 0,
        };
        for job in jobs {
            match job.status {
                JobStatus::Pending => status.pending += 1,
                JobStatus::Processing => status.processing += 1,
                JobStatus::Completed => status.completed += 1,
                JobStatus::DeadLettered => status.dead_lettered += 1,
                JobStatus::Cancelled => status.cancelled += 1,
            }
        }
        status
    }

    /// Every member reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.pending == 0 && self.processing == 0
    }

    /// Every member got an answer from its service.
    pub fn all_completed(&self) -> bool {
        self.completed == self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job_with(group: GroupHandle, status: JobStatus) -> Job {
        let mut job = Job::new(group, InvocationRequest::post("n", "http://svc/a", json!({})), 3);
        job.status = status;
        job
    }

    #[test]
    fn group_status_counts_members() {
        let group = GroupHandle::new();
        let jobs = vec![
            job_with(group, JobStatus::Completed),
            job_with(group, JobStatus::DeadLettered),
            job_with(group, JobStatus::Processing),
        ];

        let status = GroupStatus::from_jobs(group, &jobs);
        assert_eq!(status.total, 3);
        assert_eq!(status.completed, 1);
        assert_eq!(status.dead_lettered, 1);
        assert!(!status.is_finished());

        let finished = GroupStatus::from_jobs(group, &jobs[..2]);
        assert!(finished.is_finished());
        assert!(!finished.all_completed());
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::DeadLettered,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn max_attempts_is_at_least_one() {
        let job = Job::new(GroupHandle::new(), InvocationRequest::post("n", "u", json!({})), 0);
        assert_eq!(job.max_attempts, 1);
    }
}
