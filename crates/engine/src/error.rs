//! Engine-level error types.

use thiserror::Error;

use queue::{GroupHandle, QueueError};

/// Errors returned synchronously by the resolver and the runner.
///
/// Per-node runtime failures never show up here; they are recorded by the
/// dispatch queue against the node's own handle.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// The definition has no nodes at all.
    #[error("workflow has no nodes")]
    EmptyWorkflow,

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// An edge references a node ID that doesn't exist in the workflow.
    #[error("edge references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference {
        node_id: String,
        side: &'static str,
    },

    /// The dependency graph is not acyclic. `cycle` lists one witness cycle
    /// in edge order; its last node points back to the first.
    #[error("workflow graph contains a cycle: {}", format_cycle(.cycle))]
    CyclicGraph { cycle: Vec<String> },

    // ------ Dispatch errors ------

    /// Every node was skipped, so there is nothing to submit.
    #[error("no dispatchable nodes ({} skipped)", .skipped.len())]
    NoDispatchableNodes { skipped: Vec<String> },

    /// The dispatch queue rejected the submission.
    #[error("dispatch queue error: {0}")]
    Queue(#[from] QueueError),

    /// No execution was started under this handle.
    #[error("unknown execution: {0}")]
    UnknownExecution(GroupHandle),
}

fn format_cycle(cycle: &[String]) -> String {
    match cycle.first() {
        Some(first) => format!("{} -> {first}", cycle.join(" -> ")),
        None => String::from("<unknown>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_closes_the_loop() {
        let err = EngineError::CyclicGraph { cycle: vec!["n1".into(), "n2".into()] };
        assert_eq!(err.to_string(), "workflow graph contains a cycle: n1 -> n2 -> n1");
    }
}
