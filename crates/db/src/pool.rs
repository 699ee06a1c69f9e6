//! Postgres connection pool and schema setup for the job table.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::{DbError, PgJobStore};

pub type DbPool = PgPool;

/// Connect to `database_url`.
///
/// Size `max_connections` to at least the number of workers plus two: one for
/// the reaper and one for submitters and status queries.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, DbError> {
    info!(max_connections, "connecting to job database");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Apply the embedded migrations under `migrations/` at the workspace root.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbError> {
    info!("applying dispatch_jobs migrations");
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

/// A [`PgJobStore`] with a pool sized for `workers` workers.
pub async fn connect_store(database_url: &str, workers: usize) -> Result<PgJobStore, DbError> {
    let max_connections = u32::try_from(workers).unwrap_or(u32::MAX).saturating_add(2);
    let pool = create_pool(database_url, max_connections).await?;
    Ok(PgJobStore::new(pool))
}
