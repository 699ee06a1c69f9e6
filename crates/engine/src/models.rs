//! Core domain models for the workflow engine.
//!
//! A [`WorkflowDefinition`] is supplied by the caller for one execution and
//! never mutated by the engine. Workflow files use the same JSON shape:
//!
//! ```json
//! { "nodes": [{ "id": "n1", "type": "generic_action", "service": "dropbox",
//!               "name": "Save File", "parameters": { "path": "/a" } }],
//!   "edges": [{ "from": "n1", "to": "n2" }] }
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// NodeKind
// ---------------------------------------------------------------------------

/// What a node is. Only action kinds are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Calls `service`'s action endpoint.
    #[serde(alias = "GenericAction", alias = "genericAction")]
    GenericAction,
    /// Entry point fired from outside; never dispatched by the engine.
    #[serde(alias = "Trigger")]
    Trigger,
    /// Any type this engine does not know.
    #[serde(other)]
    Other,
}

impl NodeKind {
    pub fn is_dispatchable(self) -> bool {
        matches!(self, Self::GenericAction)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GenericAction => write!(f, "generic_action"),
            Self::Trigger => write!(f, "trigger"),
            Self::Other => write!(f, "other"),
        }
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier within this workflow (referenced by edges).
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Target service; looked up in the service registry.
    #[serde(default)]
    pub service: String,
    /// Human-readable action label, e.g. `"Save File"`.
    #[serde(alias = "actionName", alias = "action_name")]
    pub name: String,
    /// Sent verbatim as the request body, in document order.
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl Node {
    /// A `GenericAction` node with no parameters.
    pub fn action(id: impl Into<String>, service: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::GenericAction,
            service: service.into(),
            name: name.into(),
            parameters: Map::new(),
        }
    }

    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Endpoint name derived from the label: `"Save File"` → `"save-file"`.
    pub fn action_slug(&self) -> String {
        normalize_action_name(&self.name)
    }
}

/// Lower-case the label and join its whitespace-separated words with hyphens.
/// Runs of whitespace collapse into one hyphen; leading and trailing
/// whitespace is dropped.
pub fn normalize_action_name(name: &str) -> String {
    name.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// `to` depends on `from`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self { from: from.into(), to: to.into() }
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// A complete workflow definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl WorkflowDefinition {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    pub fn from_json(document: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(document)
    }
}

// ---------------------------------------------------------------------------
// ExecutionMode
// ---------------------------------------------------------------------------

/// How the runner treats edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Dispatch layer by layer, respecting every edge.
    #[default]
    DependencyAware,
    /// Ignore edges and dispatch every action node as one batch. A known
    /// simplification that must be asked for explicitly.
    Flatten,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DependencyAware => write!(f, "dependency_aware"),
            Self::Flatten => write!(f, "flatten"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dependency_aware" | "dependency-aware" => Ok(Self::DependencyAware),
            "flatten" => Ok(Self::Flatten),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}
