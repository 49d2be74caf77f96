//! Read-only per-run view of a workflow graph.
//!
//! [`GraphModel`] is rebuilt fresh from the stored definition at run start
//! and never mutated afterwards. It keeps two lookup structures: a node-id
//! map and outgoing edges grouped by source, in declaration order.

use std::collections::{HashMap, HashSet};

use crate::error::WorkflowError;
use crate::model::{Edge, Node, NodeType};

#[derive(Debug)]
pub struct GraphModel {
    nodes_by_id: HashMap<String, Node>,
    edges_by_source: HashMap<String, Vec<Edge>>,
    /// All edges in declaration order, used for backward walks.
    edges: Vec<Edge>,
    /// Node ids in declaration order, used for Start discovery.
    node_order: Vec<String>,
}

impl GraphModel {
    /// Build the derived model. Every edge must reference node ids present
    /// in the node set.
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Result<Self, WorkflowError> {
        let mut nodes_by_id = HashMap::with_capacity(nodes.len());
        let mut node_order = Vec::with_capacity(nodes.len());
        for node in nodes {
            node_order.push(node.id.clone());
            nodes_by_id.insert(node.id.clone(), node);
        }

        let mut edges_by_source: HashMap<String, Vec<Edge>> = HashMap::new();
        for edge in &edges {
            if !nodes_by_id.contains_key(&edge.source) {
                return Err(WorkflowError::GraphBuildError(format!(
                    "Source node not found: {}",
                    edge.source
                )));
            }
            if !nodes_by_id.contains_key(&edge.target) {
                return Err(WorkflowError::GraphBuildError(format!(
                    "Target node not found: {}",
                    edge.target
                )));
            }
            edges_by_source
                .entry(edge.source.clone())
                .or_default()
                .push(edge.clone());
        }

        Ok(GraphModel {
            nodes_by_id,
            edges_by_source,
            edges,
            node_order,
        })
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes_by_id.get(node_id)
    }

    /// Outgoing edges of `node_id` in declaration order.
    pub fn edges_from(&self, node_id: &str) -> &[Edge] {
        self.edges_by_source
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The first Start node in declaration order, if any.
    pub fn start_node(&self) -> Option<&Node> {
        self.node_order
            .iter()
            .filter_map(|id| self.nodes_by_id.get(id))
            .find(|n| n.node_type == NodeType::Start)
    }

    /// Walk incoming edges backwards from `node_id` until a node of
    /// `wanted` type is found. Depth-first, first match wins. Used by
    /// listener/emitter nodes to locate their owning connection node.
    pub fn upstream_connection(&self, node_id: &str, wanted: &NodeType) -> Option<String> {
        let mut visited = HashSet::new();
        self.walk_upstream(node_id, wanted, &mut visited)
    }

    fn walk_upstream(
        &self,
        current: &str,
        wanted: &NodeType,
        visited: &mut HashSet<String>,
    ) -> Option<String> {
        if !visited.insert(current.to_string()) {
            return None;
        }
        for edge in self.edges.iter().filter(|e| e.target == current) {
            if let Some(source) = self.nodes_by_id.get(&edge.source) {
                if &source.node_type == wanted {
                    return Some(source.id.clone());
                }
                if let Some(found) = self.walk_upstream(&edge.source, wanted, visited) {
                    return Some(found);
                }
            }
        }
        None
    }
}
