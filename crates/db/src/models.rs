//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models; the domain type is [`queue::Job`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use queue::{DispatchHandle, GroupHandle, Job, JobStatus};

use crate::DbError;

// ---------------------------------------------------------------------------
// dispatch_jobs
// ---------------------------------------------------------------------------

/// A job row of the `dispatch_jobs` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub group_id: Uuid,
    /// Position within the group, so members read back in submission order.
    pub seq: i32,
    pub node_id: String,
    /// The full `InvocationRequest` as JSON.
    pub request: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub result: Option<serde_json::Value>,
    pub last_error: Option<serde_json::Value>,
    pub available_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRow {
    pub fn from_job(job: &Job, seq: usize) -> Result<Self, DbError> {
        Ok(Self {
            id: job.handle.as_uuid(),
            group_id: job.group.as_uuid(),
            seq: i32::try_from(seq).unwrap_or(i32::MAX),
            node_id: job.request.node_id.clone(),
            request: serde_json::to_value(&job.request)?,
            status: job.status.to_string(),
            attempts: i32::try_from(job.attempts).unwrap_or(i32::MAX),
            max_attempts: i32::try_from(job.max_attempts).unwrap_or(i32::MAX),
            result: job.result.as_ref().map(serde_json::to_value).transpose()?,
            last_error: job.last_error.as_ref().map(serde_json::to_value).transpose()?,
            available_at: job.available_at,
            created_at: job.created_at,
            updated_at: job.updated_at,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = DbError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| DbError::Corrupt { id: row.id, reason };

        let status: JobStatus = row.status.parse().map_err(corrupt)?;
        let request = serde_json::from_value(row.request.clone())
            .map_err(|e| corrupt(format!("request: {e}")))?;
        let result = row
            .result
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| corrupt(format!("result: {e}")))?;
        let last_error = row
            .last_error
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| corrupt(format!("last_error: {e}")))?;

        Ok(Job {
            handle: DispatchHandle::from_uuid(row.id),
            group: GroupHandle::from_uuid(row.group_id),
            request,
            status,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            max_attempts: u32::try_from(row.max_attempts).unwrap_or(1),
            result,
            last_error,
            available_at: row.available_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invoker::{ExecutionResult, InvocationRequest, TransportError};
    use serde_json::json;

    fn sample_job() -> Job {
        let mut job = Job::new(
            GroupHandle::new(),
            InvocationRequest::post("n1", "http://dropbox/save-file", json!({ "path": "/a" })),
            3,
        );
        job.status = JobStatus::Completed;
        job.attempts = 2;
        job.result = Some(ExecutionResult::new(201, json!({ "ok": true })));
        job.last_error = Some(TransportError::Timeout {
            url: "http://dropbox/save-file".into(),
            after_ms: 500,
        });
        job
    }

    #[test]
    fn row_preserves_every_job_field() {
        let job = sample_job();
        let row = JobRow::from_job(&job, 4).unwrap();
        assert_eq!(row.seq, 4);
        assert_eq!(row.status, "completed");
        assert_eq!(row.node_id, "n1");

        let back = Job::try_from(row).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn unknown_status_is_reported_as_corrupt() {
        let mut row = JobRow::from_job(&sample_job(), 0).unwrap();
        row.status = "exploded".into();
        assert!(matches!(Job::try_from(row), Err(DbError::Corrupt { .. })));
    }
}
