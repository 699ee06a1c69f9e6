//! `engine` crate: workflow models, DAG validation, graph resolution and the
//! workflow runner.

pub mod dag;
pub mod error;
pub mod models;
pub mod resolver;
pub mod runner;

pub use dag::{validate_dag, DependencyGraph};
pub use error::EngineError;
pub use models::{Edge, ExecutionMode, Node, NodeKind, WorkflowDefinition};
pub use resolver::{Batch, GraphResolver, PlannedNode, Resolution, ResolverConfig, SkipReason, SkippedNode};
pub use runner::{
    ExecutionReport, ExecutionSnapshot, ExecutionState, LayerProgression, NodeReport, RunnerConfig,
    WorkflowRunner,
};
