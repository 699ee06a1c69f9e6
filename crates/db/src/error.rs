//! Typed error type for the db crate.

use thiserror::Error;

use queue::QueueError;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("row not found")]
    NotFound,

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be turned back into a job.
    #[error("corrupt job row {id}: {reason}")]
    Corrupt { id: uuid::Uuid, reason: String },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<DbError> for QueueError {
    fn from(err: DbError) -> Self {
        QueueError::Store(err.to_string())
    }
}
