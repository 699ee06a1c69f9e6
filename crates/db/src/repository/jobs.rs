//! Job queue repository functions.
//!
//! The queue is backed by the `dispatch_jobs` Postgres table. Workers poll
//! the table and use `SELECT … FOR UPDATE SKIP LOCKED` for safe concurrent
//! processing, possibly from several processes at once.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{models::JobRow, DbError};

const COLUMNS: &str = "id, group_id, seq, node_id, request, status, attempts, max_attempts, \
                       result, last_error, available_at, created_at, updated_at";

/// Insert a whole group inside one transaction.
pub async fn insert_jobs(pool: &PgPool, rows: &[JobRow]) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO dispatch_jobs
                (id, group_id, seq, node_id, request, status, attempts, max_attempts,
                 result, last_error, available_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(row.id)
        .bind(row.group_id)
        .bind(row.seq)
        .bind(&row.node_id)
        .bind(&row.request)
        .bind(&row.status)
        .bind(row.attempts)
        .bind(row.max_attempts)
        .bind(&row.result)
        .bind(&row.last_error)
        .bind(row.available_at)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Atomically fetch the oldest claimable pending job and mark it as
/// `processing`.
///
/// Returns `None` if no pending job is due.
pub async fn fetch_next_job(pool: &PgPool) -> Result<Option<JobRow>, DbError> {
    let mut tx = pool.begin().await?;
    let now = Utc::now();

    let candidate: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id
        FROM dispatch_jobs
        WHERE status = 'pending' AND available_at <= $1
        ORDER BY created_at ASC, seq ASC
        LIMIT 1
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(now)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(id) = candidate else {
        tx.rollback().await?;
        return Ok(None);
    };

    let row = sqlx::query_as::<_, JobRow>(&format!(
        r#"
        UPDATE dispatch_jobs
        SET status = 'processing', attempts = attempts + 1, updated_at = $1
        WHERE id = $2
        RETURNING {COLUMNS}
        "#
    ))
    .bind(now)
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some(row))
}

/// Mark a job as completed and store its result, provided it is still
/// `processing` under `attempt`. Returns `false` when no row matched.
pub async fn complete_job(
    pool: &PgPool,
    job_id: Uuid,
    attempt: i32,
    result: serde_json::Value,
) -> Result<bool, DbError> {
    let done = sqlx::query(
        r#"
        UPDATE dispatch_jobs
        SET status = 'completed', result = $1, updated_at = $2
        WHERE id = $3 AND status = 'processing' AND attempts = $4
        "#,
    )
    .bind(result)
    .bind(Utc::now())
    .bind(job_id)
    .bind(attempt)
    .execute(pool)
    .await?;

    Ok(done.rows_affected() > 0)
}

/// Record failed attempt `attempt`: back to `pending` (due at `retry_at`)
/// while attempts remain, `dead_lettered` otherwise. Returns the new status,
/// or `None` when the job is no longer `processing` under that attempt.
pub async fn fail_job(
    pool: &PgPool,
    job_id: Uuid,
    attempt: i32,
    error: serde_json::Value,
    retry_at: DateTime<Utc>,
) -> Result<Option<String>, DbError> {
    let status: Option<String> = sqlx::query_scalar(
        r#"
        UPDATE dispatch_jobs
        SET status = CASE WHEN attempts >= max_attempts THEN 'dead_lettered' ELSE 'pending' END,
            available_at = $1,
            last_error = $2,
            updated_at = $3
        WHERE id = $4 AND status = 'processing' AND attempts = $5
        RETURNING status
        "#,
    )
    .bind(retry_at)
    .bind(error)
    .bind(Utc::now())
    .bind(job_id)
    .bind(attempt)
    .fetch_optional(pool)
    .await?;

    Ok(status)
}

/// Whether a row exists for `job_id`.
pub async fn job_exists(pool: &PgPool, job_id: Uuid) -> Result<bool, DbError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM dispatch_jobs WHERE id = $1)")
        .bind(job_id)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

/// Cancel the pending members of a group. Returns `NotFound` for a group
/// with no rows at all.
pub async fn cancel_group(pool: &PgPool, group_id: Uuid) -> Result<u64, DbError> {
    let members: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dispatch_jobs WHERE group_id = $1")
        .bind(group_id)
        .fetch_one(pool)
        .await?;
    if members == 0 {
        return Err(DbError::NotFound);
    }

    let cancelled = sqlx::query(
        r#"
        UPDATE dispatch_jobs
        SET status = 'cancelled', updated_at = $1
        WHERE group_id = $2 AND status = 'pending'
        "#,
    )
    .bind(Utc::now())
    .bind(group_id)
    .execute(pool)
    .await?;

    Ok(cancelled.rows_affected())
}

pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<JobRow>, DbError> {
    let row = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {COLUMNS} FROM dispatch_jobs WHERE id = $1"
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn list_group(pool: &PgPool, group_id: Uuid) -> Result<Vec<JobRow>, DbError> {
    let rows = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {COLUMNS} FROM dispatch_jobs WHERE group_id = $1 ORDER BY seq ASC"
    ))
    .bind(group_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Hand `processing` jobs last touched before `cutoff` back to the queue.
pub async fn requeue_stale(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64, DbError> {
    let now = Utc::now();
    let requeued = sqlx::query(
        r#"
        UPDATE dispatch_jobs
        SET status = 'pending', available_at = $1, updated_at = $1
        WHERE status = 'processing' AND updated_at < $2
        "#,
    )
    .bind(now)
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(requeued.rows_affected())
}

/// Delete terminal jobs last touched before `cutoff`.
pub async fn purge_finished(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64, DbError> {
    let purged = sqlx::query(
        r#"
        DELETE FROM dispatch_jobs
        WHERE status IN ('completed', 'dead_lettered', 'cancelled') AND updated_at < $1
        "#,
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(purged.rows_affected())
}
