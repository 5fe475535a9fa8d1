// auditflow-core/src/core/graph.rs
// ============================================================================
// Module: Auditflow Execution Graph
// Description: Typed DAG of pipeline nodes with labeled routing edges.
// Purpose: Provide topological order and edge contract validation.
// Dependencies: crate::core::{contract, hashing, identifiers, records}, serde
// ============================================================================

//! ## Overview
//! The execution graph is the static shape of a pipeline: nodes carry type,
//! plugin name, configuration, and contracts; edges carry an origin label and
//! a routing mode. The orchestrator walks the graph in topological order;
//! `validate_edge_compatibility` proves every consumer's required fields are
//! supplied by its producer before the run starts.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::VecDeque;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::contract::ContractViolation;
use crate::core::contract::SchemaContract;
use crate::core::hashing::HashError;
use crate::core::hashing::stable_hash;
use crate::core::identifiers::NodeId;
use crate::core::records::NodeType;
use crate::core::records::RoutingMode;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Execution graph construction and validation errors.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A node id was registered twice.
    #[error("duplicate node: {0}")]
    DuplicateNode(NodeId),
    /// An edge referenced an unregistered node.
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),
    /// The (origin, label) pair was registered twice.
    #[error("duplicate edge from {node} with label '{label}'")]
    DuplicateEdge {
        /// Origin node.
        node: NodeId,
        /// Duplicated label.
        label: String,
    },
    /// The graph contains a cycle.
    #[error("execution graph contains a cycle")]
    Cycle,
    /// A producer contract does not satisfy a consumer contract.
    #[error("edge {from} -> {to} ('{label}') is incompatible: {violation}")]
    IncompatibleEdge {
        /// Producer node.
        from: NodeId,
        /// Consumer node.
        to: NodeId,
        /// Edge label.
        label: String,
        /// Underlying contract violation.
        violation: ContractViolation,
    },
    /// Graph hashing failed.
    #[error("graph hashing failed: {0}")]
    Hashing(#[from] HashError),
}

// ============================================================================
// SECTION: Graph Node / Edge
// ============================================================================

/// One pipeline vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Node identifier.
    pub node_id: NodeId,
    /// Node classification.
    pub node_type: NodeType,
    /// Plugin name backing the node.
    pub plugin_name: String,
    /// Node configuration.
    pub config: Value,
    /// Contract constraining what may arrive at the node.
    ///
    /// Aggregations are the only nodes where this differs from
    /// `output_contract`.
    pub input_contract: SchemaContract,
    /// Contract guaranteeing what the node emits.
    pub output_contract: SchemaContract,
}

/// One directed labeled edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Origin node.
    pub from: NodeId,
    /// Destination node.
    pub to: NodeId,
    /// Origin label (`continue`, `true`, `false`, route or branch name).
    pub label: String,
    /// Routing mode.
    pub mode: RoutingMode,
}

// ============================================================================
// SECTION: Execution Graph
// ============================================================================

/// Typed DAG of pipeline nodes and labeled edges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionGraph {
    /// Nodes in registration order.
    nodes: Vec<GraphNode>,
    /// Edges in registration order.
    edges: Vec<GraphEdge>,
}

impl ExecutionGraph {
    /// Creates an empty graph.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Registers a node.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateNode`] when the id is already present.
    pub fn add_node(&mut self, node: GraphNode) -> Result<(), GraphError> {
        if self.node(&node.node_id).is_some() {
            return Err(GraphError::DuplicateNode(node.node_id));
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Registers an edge.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] for unregistered endpoints and
    /// [`GraphError::DuplicateEdge`] for a repeated (origin, label) pair.
    pub fn add_edge(&mut self, edge: GraphEdge) -> Result<(), GraphError> {
        if self.node(&edge.from).is_none() {
            return Err(GraphError::UnknownNode(edge.from));
        }
        if self.node(&edge.to).is_none() {
            return Err(GraphError::UnknownNode(edge.to));
        }
        if self.edge(&edge.from, &edge.label).is_some() {
            return Err(GraphError::DuplicateEdge {
                node: edge.from,
                label: edge.label,
            });
        }
        self.edges.push(edge);
        Ok(())
    }

    /// Returns a node by id.
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&GraphNode> {
        self.nodes.iter().find(|node| &node.node_id == node_id)
    }

    /// Returns nodes in registration order.
    #[must_use]
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// Returns edges in registration order.
    #[must_use]
    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    /// Returns the edge leaving `from` under `label`.
    #[must_use]
    pub fn edge(&self, from: &NodeId, label: &str) -> Option<&GraphEdge> {
        self.edges.iter().find(|edge| &edge.from == from && edge.label == label)
    }

    /// Returns all edges leaving `from`.
    #[must_use]
    pub fn outgoing(&self, from: &NodeId) -> Vec<&GraphEdge> {
        self.edges.iter().filter(|edge| &edge.from == from).collect()
    }

    /// Returns the 0-based step index of a node in topological order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] when the node is not registered,
    /// or [`GraphError::Cycle`] when no topological order exists.
    pub fn step_index(&self, node_id: &NodeId) -> Result<u32, GraphError> {
        let order = self.topological_order()?;
        let position = order
            .iter()
            .position(|candidate| candidate == node_id)
            .ok_or_else(|| GraphError::UnknownNode(node_id.clone()))?;
        Ok(u32::try_from(position).unwrap_or(u32::MAX))
    }

    /// Returns node ids in deterministic topological order.
    ///
    /// Kahn's algorithm; ties resolve by node registration order so the
    /// result is stable across runs of the same pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Cycle`] when the graph is not acyclic.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut indegree: BTreeMap<&NodeId, usize> =
            self.nodes.iter().map(|node| (&node.node_id, 0)).collect();
        for edge in &self.edges {
            if let Some(count) = indegree.get_mut(&edge.to) {
                *count += 1;
            }
        }
        let mut ready: VecDeque<&NodeId> = self
            .nodes
            .iter()
            .map(|node| &node.node_id)
            .filter(|id| indegree.get(*id).copied() == Some(0))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(next) = ready.pop_front() {
            order.push(next.clone());
            for edge in &self.edges {
                if &edge.from != next {
                    continue;
                }
                if let Some(count) = indegree.get_mut(&edge.to) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(&edge.to);
                    }
                }
            }
        }
        if order.len() != self.nodes.len() {
            return Err(GraphError::Cycle);
        }
        Ok(order)
    }

    /// Validates producer/consumer contract compatibility on every edge.
    ///
    /// For every edge, the producer's output contract must supply every
    /// field required by the consumer's input contract. Observed (dynamic)
    /// contracts on either side skip the check. Aggregations contribute
    /// their distinct contracts on both sides.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::IncompatibleEdge`] for the first failing edge.
    pub fn validate_edge_compatibility(&self) -> Result<(), GraphError> {
        for edge in &self.edges {
            let Some(producer) = self.node(&edge.from) else {
                return Err(GraphError::UnknownNode(edge.from.clone()));
            };
            let Some(consumer) = self.node(&edge.to) else {
                return Err(GraphError::UnknownNode(edge.to.clone()));
            };
            producer.output_contract.satisfies(&consumer.input_contract).map_err(
                |violation| GraphError::IncompatibleEdge {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    label: edge.label.clone(),
                    violation,
                },
            )?;
        }
        Ok(())
    }

    /// Returns the RFC 8785 hash of the graph shape.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Hashing`] when canonicalization fails.
    pub fn graph_hash(&self) -> Result<String, GraphError> {
        Ok(stable_hash(self)?)
    }
}
