// auditflow-core/tests/graph.rs
// ============================================================================
// Module: Execution Graph Tests
// Description: Tests for DAG construction, ordering, and edge contracts.
// ============================================================================
//! ## Overview
//! Validates topological ordering determinism, cycle rejection, duplicate
//! edge labels, and contract compatibility checking across edges.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use auditflow_core::FieldSpec;
use auditflow_core::GraphError;
use auditflow_core::NodeId;
use auditflow_core::NodeType;
use auditflow_core::RoutingMode;
use auditflow_core::SchemaContract;
use auditflow_core::graph::ExecutionGraph;
use auditflow_core::graph::GraphEdge;
use auditflow_core::graph::GraphNode;
use serde_json::json;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds a graph node with observed contracts.
fn node(id: &str, node_type: NodeType) -> GraphNode {
    GraphNode {
        node_id: NodeId::new(id),
        node_type,
        plugin_name: "test".to_string(),
        config: json!({}),
        input_contract: SchemaContract::observed(),
        output_contract: SchemaContract::observed(),
    }
}

/// Builds a move-mode edge.
fn edge(from: &str, to: &str, label: &str) -> GraphEdge {
    GraphEdge {
        from: NodeId::new(from),
        to: NodeId::new(to),
        label: label.to_string(),
        mode: RoutingMode::Move,
    }
}

// ============================================================================
// SECTION: Construction
// ============================================================================

/// Tests duplicate nodes are rejected.
#[test]
fn test_duplicate_node_rejected() {
    let mut graph = ExecutionGraph::new();
    graph.add_node(node("source", NodeType::Source)).unwrap();

    let result = graph.add_node(node("source", NodeType::Source));

    assert!(matches!(result, Err(GraphError::DuplicateNode(_))));
}

/// Tests a duplicate (origin, label) pair is rejected.
#[test]
fn test_duplicate_edge_label_rejected() {
    let mut graph = ExecutionGraph::new();
    graph.add_node(node("a", NodeType::Source)).unwrap();
    graph.add_node(node("b", NodeType::Sink)).unwrap();
    graph.add_node(node("c", NodeType::Sink)).unwrap();
    graph.add_edge(edge("a", "b", "continue")).unwrap();

    let result = graph.add_edge(edge("a", "c", "continue"));

    assert!(matches!(result, Err(GraphError::DuplicateEdge { .. })));
}

/// Tests edges to unknown nodes are rejected.
#[test]
fn test_edge_to_unknown_node_rejected() {
    let mut graph = ExecutionGraph::new();
    graph.add_node(node("a", NodeType::Source)).unwrap();

    let result = graph.add_edge(edge("a", "missing", "continue"));

    assert!(matches!(result, Err(GraphError::UnknownNode(_))));
}

// ============================================================================
// SECTION: Topological Order
// ============================================================================

/// Tests topological order respects edges and registration order.
#[test]
fn test_topological_order_is_deterministic() {
    let mut graph = ExecutionGraph::new();
    graph.add_node(node("source", NodeType::Source)).unwrap();
    graph.add_node(node("gate", NodeType::Gate)).unwrap();
    graph.add_node(node("sink_a", NodeType::Sink)).unwrap();
    graph.add_node(node("sink_b", NodeType::Sink)).unwrap();
    graph.add_edge(edge("source", "gate", "continue")).unwrap();
    graph.add_edge(edge("gate", "sink_a", "continue")).unwrap();
    graph.add_edge(edge("gate", "sink_b", "route_b")).unwrap();

    let order = graph.topological_order().unwrap();

    assert_eq!(
        order,
        vec![
            NodeId::new("source"),
            NodeId::new("gate"),
            NodeId::new("sink_a"),
            NodeId::new("sink_b"),
        ]
    );
    assert_eq!(order, graph.topological_order().unwrap());
}

/// Tests cycles are rejected.
#[test]
fn test_cycle_rejected() {
    let mut graph = ExecutionGraph::new();
    graph.add_node(node("a", NodeType::Transform)).unwrap();
    graph.add_node(node("b", NodeType::Transform)).unwrap();
    graph.add_edge(edge("a", "b", "continue")).unwrap();
    graph.add_edge(edge("b", "a", "back")).unwrap();

    assert!(matches!(graph.topological_order(), Err(GraphError::Cycle)));
}

// ============================================================================
// SECTION: Edge Compatibility
// ============================================================================

/// Tests a producer missing a required consumer field fails validation.
#[test]
fn test_incompatible_edge_detected() {
    let mut graph = ExecutionGraph::new();
    let mut producer = node("producer", NodeType::Transform);
    producer.output_contract =
        SchemaContract::fixed(vec![FieldSpec::required("order_id", "int")]);
    let mut consumer = node("consumer", NodeType::Sink);
    consumer.input_contract = SchemaContract::fixed(vec![
        FieldSpec::required("order_id", "int"),
        FieldSpec::required("items", "list"),
    ]);
    graph.add_node(producer).unwrap();
    graph.add_node(consumer).unwrap();
    graph.add_edge(edge("producer", "consumer", "continue")).unwrap();

    let result = graph.validate_edge_compatibility();

    assert!(matches!(result, Err(GraphError::IncompatibleEdge { .. })));
}

/// Tests dynamic schemas skip validation.
#[test]
fn test_dynamic_contract_skips_validation() {
    let mut graph = ExecutionGraph::new();
    let producer = node("producer", NodeType::Transform);
    let mut consumer = node("consumer", NodeType::Sink);
    consumer.input_contract = SchemaContract::fixed(vec![
        FieldSpec::required("order_id", "int"),
    ]);
    graph.add_node(producer).unwrap();
    graph.add_node(consumer).unwrap();
    graph.add_edge(edge("producer", "consumer", "continue")).unwrap();

    assert!(graph.validate_edge_compatibility().is_ok());
}

/// Tests aggregation input and output contracts are both checked.
#[test]
fn test_aggregation_contracts_checked_on_both_edges() {
    let mut graph = ExecutionGraph::new();
    let mut producer = node("producer", NodeType::Transform);
    producer.output_contract =
        SchemaContract::fixed(vec![FieldSpec::required("score", "float")]);
    let mut aggregation = node("agg", NodeType::Aggregation);
    aggregation.input_contract =
        SchemaContract::fixed(vec![FieldSpec::required("score", "float")]);
    aggregation.output_contract =
        SchemaContract::fixed(vec![FieldSpec::required("mean_score", "float")]);
    let mut consumer = node("sink", NodeType::Sink);
    consumer.input_contract =
        SchemaContract::fixed(vec![FieldSpec::required("mean_score", "float")]);
    graph.add_node(producer).unwrap();
    graph.add_node(aggregation).unwrap();
    graph.add_node(consumer).unwrap();
    graph.add_edge(edge("producer", "agg", "continue")).unwrap();
    graph.add_edge(edge("agg", "sink", "continue")).unwrap();

    assert!(graph.validate_edge_compatibility().is_ok());

    // Break the aggregate's guarantee and the downstream edge must fail.
    let mut broken = ExecutionGraph::new();
    let mut agg = node("agg", NodeType::Aggregation);
    agg.output_contract = SchemaContract::fixed(vec![FieldSpec::required("other", "str")]);
    let mut sink = node("sink", NodeType::Sink);
    sink.input_contract =
        SchemaContract::fixed(vec![FieldSpec::required("mean_score", "float")]);
    broken.add_node(agg).unwrap();
    broken.add_node(sink).unwrap();
    broken.add_edge(edge("agg", "sink", "continue")).unwrap();

    assert!(matches!(
        broken.validate_edge_compatibility(),
        Err(GraphError::IncompatibleEdge { .. })
    ));
}

// ============================================================================
// SECTION: Hashing
// ============================================================================

/// Tests the graph hash is stable across identical builds.
#[test]
fn test_graph_hash_stable() {
    let build = || {
        let mut graph = ExecutionGraph::new();
        graph.add_node(node("a", NodeType::Source)).unwrap();
        graph.add_node(node("b", NodeType::Sink)).unwrap();
        graph.add_edge(edge("a", "b", "continue")).unwrap();
        graph
    };

    assert_eq!(build().graph_hash().unwrap(), build().graph_hash().unwrap());
}
