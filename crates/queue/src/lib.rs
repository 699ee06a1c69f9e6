//! `queue` crate: the dispatch queue.
//!
//! Invocation requests are enqueued into a [`JobStore`] and executed by a pool
//! of worker tasks decoupled from the submitter. Every request gets a
//! [`DispatchHandle`]; requests submitted together share a [`GroupHandle`].
//! Results are posted back over a channel to a single bookkeeper that records
//! them and broadcasts [`JobEvent`]s to anyone waiting on a group.

pub mod error;
pub mod handle;
pub mod job;
pub mod memory;
pub mod queue;
pub mod store;
pub mod worker;

pub use error::QueueError;
pub use handle::{DispatchHandle, GroupHandle};
pub use job::{GroupStatus, Job, JobEvent, JobStatus};
pub use memory::MemoryJobStore;
pub use queue::{DispatchQueue, QueueConfig};
pub use store::JobStore;
pub use worker::WorkerPool;
