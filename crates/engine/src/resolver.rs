//! Graph resolution: turn a definition into ordered batches of ready-to-send
//! invocation requests.
//!
//! Structural validation always runs first, so a definition that fails it
//! never produces a single [`InvocationRequest`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use invoker::{HttpMethod, InvocationRequest, ServiceRegistry};

use crate::dag::DependencyGraph;
use crate::models::{ExecutionMode, Node, NodeKind, WorkflowDefinition};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How nodes are mapped onto requests.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub method: HttpMethod,
    /// Attached to every request; `None` leaves it to the queue default.
    pub invocation_timeout: Option<Duration>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            method: HttpMethod::Post,
            invocation_timeout: Some(Duration::from_secs(30)),
        }
    }
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// A node that resolved to a concrete request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedNode {
    pub node_id: String,
    pub service: String,
    pub action: String,
    pub request: InvocationRequest,
}

/// Nodes that may run concurrently.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Batch {
    pub index: usize,
    pub nodes: Vec<PlannedNode>,
}

impl Batch {
    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.node_id.as_str()).collect()
    }

    pub fn requests(&self) -> Vec<InvocationRequest> {
        self.nodes.iter().map(|n| n.request.clone()).collect()
    }
}

/// Why a node was left out of dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The node's type is not an action kind.
    NotAnAction { kind: NodeKind },
    /// The node's service is not in the registry.
    UnknownService { service: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnAction { kind } => write!(f, "node type '{kind}' is not dispatchable"),
            Self::UnknownService { service } => write!(f, "unknown service '{service}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedNode {
    pub node_id: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Everything the runner needs to dispatch one execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub mode: ExecutionMode,
    /// Non-empty batches in dispatch order.
    pub batches: Vec<Batch>,
    pub skipped: Vec<SkippedNode>,
}

impl Resolution {
    pub fn dispatchable_count(&self) -> usize {
        self.batches.iter().map(|b| b.nodes.len()).sum()
    }

    pub fn skipped_ids(&self) -> Vec<String> {
        self.skipped.iter().map(|s| s.node_id.clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// GraphResolver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GraphResolver {
    registry: Arc<ServiceRegistry>,
    config: ResolverConfig,
}

impl GraphResolver {
    pub fn new(registry: Arc<ServiceRegistry>, config: ResolverConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Validate the definition and split its action nodes into batches.
    ///
    /// In [`ExecutionMode::DependencyAware`] batches follow the dependency
    /// layers; a layer whose nodes were all skipped produces no batch. In
    /// [`ExecutionMode::Flatten`] edges are still validated but otherwise
    /// ignored, and every dispatchable node lands in one batch.
    ///
    /// # Errors
    /// Structural errors from [`DependencyGraph`]; skipped nodes are not errors.
    pub fn resolve(
        &self,
        workflow: &WorkflowDefinition,
        mode: ExecutionMode,
    ) -> Result<Resolution, EngineError> {
        let graph = DependencyGraph::build(workflow)?;
        let layers = graph.layers()?;

        let layers = match mode {
            ExecutionMode::DependencyAware => layers,
            ExecutionMode::Flatten => {
                if !workflow.edges.is_empty() {
                    warn!(
                        edges = workflow.edges.len(),
                        "flatten mode: ignoring declared dependencies"
                    );
                }
                vec![workflow.nodes.iter().collect()]
            }
        };

        let mut batches = Vec::new();
        let mut skipped = Vec::new();

        for layer in layers {
            let mut planned = Vec::with_capacity(layer.len());
            for node in layer {
                match self.plan_node(node) {
                    Ok(p) => planned.push(p),
                    Err(reason) => {
                        warn!(node_id = %node.id, "skipping node: {reason}");
                        skipped.push(SkippedNode { node_id: node.id.clone(), reason });
                    }
                }
            }
            if !planned.is_empty() {
                batches.push(Batch { index: batches.len(), nodes: planned });
            }
        }

        debug!(
            %mode,
            batches = batches.len(),
            skipped = skipped.len(),
            "workflow resolved"
        );

        Ok(Resolution { mode, batches, skipped })
    }

    /// Map one node onto its request: `{method} {base(service)}/{slug(name)}`
    /// with the parameters as body.
    pub fn plan_node(&self, node: &Node) -> Result<PlannedNode, SkipReason> {
        if !node.kind.is_dispatchable() {
            return Err(SkipReason::NotAnAction { kind: node.kind });
        }

        let action = node.action_slug();
        let url = self
            .registry
            .endpoint(&node.service, &action)
            .ok_or_else(|| SkipReason::UnknownService { service: node.service.clone() })?;

        let mut request = InvocationRequest {
            node_id: node.id.clone(),
            method: self.config.method,
            url,
            payload: Value::Object(node.parameters.clone()),
            timeout_ms: None,
        };
        if let Some(timeout) = self.config.invocation_timeout {
            request = request.with_timeout(timeout);
        }

        Ok(PlannedNode {
            node_id: node.id.clone(),
            service: node.service.clone(),
            action,
            request,
        })
    }
}
