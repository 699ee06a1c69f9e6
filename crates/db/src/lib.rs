//! `db` crate: Postgres persistence for the dispatch queue.
//!
//! Provides a connection pool, the `dispatch_jobs` row struct, repository
//! functions over that table and [`PgJobStore`], a durable
//! [`queue::JobStore`]. Jobs enqueued here survive the submitting process and
//! can be worked off by `worker` processes elsewhere.

pub mod error;
pub mod models;
pub mod pool;
pub mod repository;
pub mod store;

pub use error::DbError;
pub use pool::DbPool;
pub use store::PgJobStore;
