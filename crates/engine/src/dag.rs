//! DAG validation and layering. Runs before anything is dispatched.
//!
//! Rules enforced:
//! 1. The workflow has at least one node.
//! 2. Node IDs must be unique within the workflow.
//! 3. Every edge must reference valid node IDs (both `from` and `to`).
//! 4. The directed graph must be acyclic (topological sort must succeed).
//!
//! Nodes are kept in an index-addressed arena with per-index edge lists, so
//! layering is Kahn's algorithm over plain in-degree counters.

use std::collections::{HashMap, HashSet};

use crate::{models::Node, EngineError, WorkflowDefinition};

/// Arena view of a definition's nodes and edges.
#[derive(Debug)]
pub struct DependencyGraph<'a> {
    nodes: Vec<&'a Node>,
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
}

impl<'a> DependencyGraph<'a> {
    /// Index the definition, checking rules 1–3.
    ///
    /// # Errors
    /// - [`EngineError::EmptyWorkflow`] if there are no nodes.
    /// - [`EngineError::DuplicateNodeId`] if two nodes share an ID.
    /// - [`EngineError::UnknownNodeReference`] if an edge references a missing node.
    pub fn build(workflow: &'a WorkflowDefinition) -> Result<Self, EngineError> {
        if workflow.nodes.is_empty() {
            return Err(EngineError::EmptyWorkflow);
        }

        // -------------------------------------------------------------------
        // Index nodes, rejecting duplicates
        // -------------------------------------------------------------------
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(workflow.nodes.len());
        for (i, node) in workflow.nodes.iter().enumerate() {
            if index.insert(node.id.as_str(), i).is_some() {
                return Err(EngineError::DuplicateNodeId(node.id.clone()));
            }
        }

        // -------------------------------------------------------------------
        // Resolve edge endpoints
        // -------------------------------------------------------------------
        let mut successors = vec![Vec::new(); workflow.nodes.len()];
        let mut predecessors = vec![Vec::new(); workflow.nodes.len()];

        for edge in &workflow.edges {
            let from = *index.get(edge.from.as_str()).ok_or_else(|| {
                EngineError::UnknownNodeReference {
                    node_id: edge.from.clone(),
                    side: "from",
                }
            })?;
            let to = *index.get(edge.to.as_str()).ok_or_else(|| {
                EngineError::UnknownNodeReference {
                    node_id: edge.to.clone(),
                    side: "to",
                }
            })?;
            successors[from].push(to);
            predecessors[to].push(from);
        }

        Ok(Self {
            nodes: workflow.nodes.iter().collect(),
            successors,
            predecessors,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// IDs of the nodes `node_id` directly depends on.
    pub fn dependencies(&self, node_id: &str) -> Vec<&'a str> {
        self.position(node_id)
            .map(|i| self.predecessors[i].iter().map(|&p| self.nodes[p].id.as_str()).collect())
            .unwrap_or_default()
    }

    fn position(&self, node_id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == node_id)
    }

    /// Split the nodes into dependency layers (Kahn's algorithm, level by
    /// level). Layer 0 holds the nodes without incoming edges; layer `k` the
    /// nodes whose dependencies all sit in layers `< k`. Within a layer nodes
    /// keep definition order.
    ///
    /// # Errors
    /// [`EngineError::CyclicGraph`] with one witness cycle.
    pub fn layers(&self) -> Result<Vec<Vec<&'a Node>>, EngineError> {
        let mut in_degree: Vec<usize> = self.predecessors.iter().map(Vec::len).collect();

        let mut frontier: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut layers = Vec::new();
        let mut placed = 0;

        while !frontier.is_empty() {
            placed += frontier.len();
            let mut next = Vec::new();
            for &i in &frontier {
                for &succ in &self.successors[i] {
                    in_degree[succ] -= 1;
                    if in_degree[succ] == 0 {
                        next.push(succ);
                    }
                }
            }
            next.sort_unstable();
            layers.push(frontier.iter().map(|&i| self.nodes[i]).collect());
            frontier = next;
        }

        // If we didn't place every node the graph contains a cycle.
        if placed != self.nodes.len() {
            return Err(EngineError::CyclicGraph {
                cycle: self.witness_cycle(&in_degree),
            });
        }

        Ok(layers)
    }

    /// Every node left with a non-zero in-degree after Kahn's pass has an
    /// unplaced predecessor, so walking predecessors must revisit a node.
    fn witness_cycle(&self, in_degree: &[usize]) -> Vec<String> {
        let Some(start) = (0..self.nodes.len()).find(|&i| in_degree[i] > 0) else {
            return Vec::new();
        };

        let mut path: Vec<usize> = Vec::new();
        let mut seen: HashMap<usize, usize> = HashMap::new();
        let mut current = start;

        let loop_start = loop {
            if let Some(&pos) = seen.get(&current) {
                break pos;
            }
            seen.insert(current, path.len());
            path.push(current);
            match self.predecessors[current].iter().find(|&&p| in_degree[p] > 0) {
                Some(&p) => current = p,
                None => return Vec::new(),
            }
        };

        // The walk went against the edges; flip it and start at the
        // earliest-defined node so the witness is stable.
        let mut cycle: Vec<usize> = path[loop_start..].iter().rev().copied().collect();
        if let Some(min_pos) = cycle.iter().enumerate().min_by_key(|&(_, &i)| i).map(|(pos, _)| pos) {
            cycle.rotate_left(min_pos);
        }
        cycle.into_iter().map(|i| self.nodes[i].id.clone()).collect()
    }
}

/// Validate the workflow's DAG and return node IDs grouped by dependency layer.
///
/// # Errors
/// Any error of [`DependencyGraph::build`] or [`DependencyGraph::layers`].
pub fn validate_dag(workflow: &WorkflowDefinition) -> Result<Vec<Vec<String>>, EngineError> {
    let graph = DependencyGraph::build(workflow)?;
    let layers = graph.layers()?;
    Ok(layers
        .into_iter()
        .map(|layer| layer.into_iter().map(|n| n.id.clone()).collect())
        .collect())
}

/// Checks that `layers` is a valid layering of `workflow`: every node appears
/// exactly once and every edge points into a strictly later layer.
pub fn is_valid_layering(workflow: &WorkflowDefinition, layers: &[Vec<String>]) -> bool {
    let mut layer_of: HashMap<&str, usize> = HashMap::new();
    for (k, layer) in layers.iter().enumerate() {
        for id in layer {
            if layer_of.insert(id.as_str(), k).is_some() {
                return false;
            }
        }
    }
    let all: HashSet<&str> = workflow.nodes.iter().map(|n| n.id.as_str()).collect();
    if all.len() != layer_of.len() || !all.iter().all(|id| layer_of.contains_key(id)) {
        return false;
    }
    workflow.edges.iter().all(|e| {
        matches!(
            (layer_of.get(e.from.as_str()), layer_of.get(e.to.as_str())),
            (Some(from), Some(to)) if from < to
        )
    })
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Edge;
    use proptest::prelude::*;

    fn make_node(id: &str) -> Node {
        Node::action(id, "svc", "Do Thing")
    }

    fn make_workflow(ids: &[&str], edges: &[(&str, &str)]) -> WorkflowDefinition {
        WorkflowDefinition::new(
            ids.iter().map(|id| make_node(id)).collect(),
            edges.iter().map(|(f, t)| Edge::new(*f, *t)).collect(),
        )
    }

    #[test]
    fn linear_dag_yields_one_node_per_layer() {
        // A → B → C
        let workflow = make_workflow(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        let layers = validate_dag(&workflow).expect("should be valid");
        assert_eq!(layers, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn diamond_dag_groups_siblings() {
        //   A
        //  / \
        // B   C
        //  \ /
        //   D
        let workflow = make_workflow(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );
        let layers = validate_dag(&workflow).expect("should be valid");
        assert_eq!(layers, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[test]
    fn node_waits_for_its_deepest_dependency() {
        // a → b → c, and a → c directly: c still belongs after b.
        let workflow = make_workflow(&["c", "b", "a"], &[("a", "b"), ("b", "c"), ("a", "c")]);
        let layers = validate_dag(&workflow).unwrap();
        assert_eq!(layers, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn independent_nodes_share_the_first_layer() {
        let workflow = make_workflow(&["x", "y", "z"], &[]);
        let layers = validate_dag(&workflow).unwrap();
        assert_eq!(layers, vec![vec!["x", "y", "z"]]);
    }

    #[test]
    fn empty_workflow_is_rejected() {
        let workflow = WorkflowDefinition::default();
        assert!(matches!(validate_dag(&workflow), Err(EngineError::EmptyWorkflow)));
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let workflow = make_workflow(&["a", "a"], &[]); // duplicate!
        assert!(matches!(
            validate_dag(&workflow),
            Err(EngineError::DuplicateNodeId(id)) if id == "a"
        ));
    }

    #[test]
    fn edge_referencing_missing_node_is_rejected() {
        let workflow = make_workflow(&["a"], &[("a", "ghost")]); // ghost doesn't exist
        assert!(matches!(
            validate_dag(&workflow),
            Err(EngineError::UnknownNodeReference { node_id, side: "to" }) if node_id == "ghost"
        ));
    }

    #[test]
    fn two_node_cycle_is_reported_with_witness() {
        let workflow = make_workflow(&["n1", "n2"], &[("n1", "n2"), ("n2", "n1")]);
        match validate_dag(&workflow) {
            Err(EngineError::CyclicGraph { cycle }) => assert_eq!(cycle, vec!["n1", "n2"]),
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn cycle_behind_a_valid_prefix_is_found() {
        // root → a → b → c → a  (cycle!), root is fine on its own
        let workflow = make_workflow(
            &["root", "a", "b", "c"],
            &[("root", "a"), ("a", "b"), ("b", "c"), ("c", "a")],
        );
        match validate_dag(&workflow) {
            Err(EngineError::CyclicGraph { cycle }) => assert_eq!(cycle, vec!["a", "b", "c"]),
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let workflow = make_workflow(&["solo"], &[("solo", "solo")]);
        match validate_dag(&workflow) {
            Err(EngineError::CyclicGraph { cycle }) => assert_eq!(cycle, vec!["solo"]),
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn dependencies_lists_direct_predecessors() {
        let workflow = make_workflow(&["a", "b", "c"], &[("a", "c"), ("b", "c")]);
        let graph = DependencyGraph::build(&workflow).unwrap();
        assert_eq!(graph.dependencies("c"), vec!["a", "b"]);
        assert!(graph.dependencies("a").is_empty());
        assert_eq!(graph.len(), 3);
    }

    /// Random DAGs: edges only run from a lower to a higher index, so the
    /// graph is acyclic by construction.
    fn arb_dag() -> impl Strategy<Value = WorkflowDefinition> {
        (1usize..24).prop_flat_map(|n| {
            proptest::collection::vec((0..n, 0..n), 0..(n * 2)).prop_map(move |pairs| {
                let ids: Vec<String> = (0..n).map(|i| format!("n{i}")).collect();
                let edges = pairs
                    .into_iter()
                    .filter(|(a, b)| a != b)
                    .map(|(a, b)| Edge::new(ids[a.min(b)].clone(), ids[a.max(b)].clone()))
                    .collect();
                WorkflowDefinition::new(ids.iter().map(|id| make_node(id)).collect(), edges)
            })
        })
    }

    proptest! {
        #[test]
        fn layering_respects_every_edge(workflow in arb_dag()) {
            let layers = validate_dag(&workflow).unwrap();
            prop_assert!(is_valid_layering(&workflow, &layers));
        }

        #[test]
        fn layering_is_deterministic(workflow in arb_dag()) {
            prop_assert_eq!(validate_dag(&workflow).unwrap(), validate_dag(&workflow).unwrap());
        }

        #[test]
        fn back_edge_always_yields_a_cycle(workflow in arb_dag()) {
            // Reversing any existing edge closes a two-node loop.
            let mut cyclic = workflow.clone();
            if let Some(edge) = workflow.edges.first() {
                cyclic.edges.push(Edge::new(edge.to.clone(), edge.from.clone()));
                let is_cyclic = matches!(validate_dag(&cyclic), Err(EngineError::CyclicGraph { .. }));
                prop_assert!(is_cyclic);
            }
        }
    }
}
