//! Queue-level error types.

use thiserror::Error;

use crate::{DispatchHandle, GroupHandle};

/// Errors produced by the dispatch queue and its job stores.
#[derive(Debug, Error)]
pub enum QueueError {
    /// `submit` was called with no requests.
    #[error("cannot submit an empty batch")]
    EmptyBatch,

    /// No job is known under this handle (never submitted, or purged).
    #[error("unknown dispatch handle: {0}")]
    UnknownHandle(DispatchHandle),

    /// No job belongs to this group (never submitted, or purged).
    #[error("unknown group handle: {0}")]
    UnknownGroup(GroupHandle),

    /// The backing store failed.
    #[error("job store error: {0}")]
    Store(String),

    /// The configuration would let the reaper requeue attempts that are
    /// still running.
    #[error("invalid queue configuration: {0}")]
    InvalidConfig(String),

    /// A request's timeout reaches the visibility timeout, so its attempt
    /// could be handed out twice.
    #[error("timeout of node '{node_id}' ({timeout_ms} ms) must be below the visibility timeout ({visibility_ms} ms)")]
    TimeoutExceedsVisibility {
        node_id: String,
        timeout_ms: u64,
        visibility_ms: u64,
    },

    /// The bookkeeper is gone; results can no longer be recorded.
    #[error("dispatch queue is shut down")]
    Closed,
}
