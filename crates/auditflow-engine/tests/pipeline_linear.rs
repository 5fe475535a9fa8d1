// auditflow-engine/tests/pipeline_linear.rs
// ============================================================================
// Module: Linear Pipeline Tests
// Description: End-to-end source → transform → gate → sinks runs.
// ============================================================================
//! ## Overview
//! Drives the orchestrator over small linear and gated graphs, checking the
//! run-level invariants: no open states at termination, every routing event
//! references a registered edge, every token reaching a sink has exactly one
//! outcome, and routed sinks record `Routed` outcomes.

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

mod common;

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;

use auditflow_core::EngineSettings;
use auditflow_core::ExportSettings;
use auditflow_core::GateSettings;
use auditflow_core::LandscapeSettings;
use auditflow_core::NodeId;
use auditflow_core::NodeStateStatus;
use auditflow_core::NodeType;
use auditflow_core::ReproducibilityGrade;
use auditflow_core::RouteSpec;
use auditflow_core::RoutingMode;
use auditflow_core::RunStatus;
use auditflow_core::SchemaContract;
use auditflow_core::TokenOutcomeKind;
use auditflow_core::ValidationFailurePolicy;
use auditflow_core::graph::ExecutionGraph;
use auditflow_core::graph::GraphEdge;
use auditflow_core::graph::GraphNode;
use auditflow_engine::GateKind;
use auditflow_engine::NodePlugin;
use auditflow_engine::Orchestrator;
use auditflow_landscape::LandscapeDb;
use auditflow_landscape::LandscapeRecorder;
use common::MemorySink;
use common::PassthroughTransform;
use common::StaticSource;
use serde_json::json;

// ============================================================================
// SECTION: Graph Construction
// ============================================================================

/// Builds a node with observed contracts.
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
// SECTION: Linear Run
// ============================================================================

/// Tests a linear run completes with full invariants.
#[test]
fn test_linear_pipeline_invariants() {
    let recorder = LandscapeRecorder::new(LandscapeDb::in_memory().unwrap());
    let mut graph = ExecutionGraph::new();
    graph.add_node(node("source", NodeType::Source)).unwrap();
    graph.add_node(node("enrich", NodeType::Transform)).unwrap();
    graph.add_node(node("output", NodeType::Sink)).unwrap();
    graph.add_edge(edge("source", "enrich", "continue")).unwrap();
    graph.add_edge(edge("enrich", "output", "continue")).unwrap();

    let (sink, written) = MemorySink::new();
    let mut plugins: BTreeMap<NodeId, NodePlugin> = BTreeMap::new();
    plugins.insert(
        NodeId::new("source"),
        NodePlugin::Source(Box::new(StaticSource::new(vec![
            json!({"order": 1}),
            json!({"order": 2}),
            json!({"order": 3}),
        ]))),
    );
    plugins.insert(
        NodeId::new("enrich"),
        NodePlugin::Transform(Arc::new(PassthroughTransform {
            tag: Some("enriched".to_string()),
        })),
    );
    plugins.insert(NodeId::new("output"), NodePlugin::Sink(Box::new(sink)));

    let mut settings = EngineSettings::default();
    settings.landscape = Some(LandscapeSettings {
        url: "sqlite://:memory:".to_string(),
        export: Some(ExportSettings {
            enabled: true,
            sink: "audit".to_string(),
            format: auditflow_core::ExportFormat::Json,
            sign: true,
        }),
        dump_to_jsonl: false,
        dump_to_jsonl_path: None,
    });

    let orchestrator = Orchestrator::new(
        recorder.clone(),
        graph,
        plugins,
        settings,
        ValidationFailurePolicy::Discard,
    )
    .with_signing_key(b"pipeline-signing-key");
    let outcome = orchestrator.run().unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.grade, Some(ReproducibilityGrade::Full));
    assert_eq!(outcome.rows_emitted, 3);
    assert_eq!(written.lock().unwrap().len(), 3);
    assert!(written.lock().unwrap().iter().all(|row| row["enriched"] == true));

    // Invariant: no node state remains open.
    let states = recorder.get_all_node_states_for_run(&outcome.run_id).unwrap();
    assert!(!states.is_empty());
    assert!(states.iter().all(|state| state.status != NodeStateStatus::Open));

    // Invariant: every routing event references a registered edge.
    let edges: HashSet<String> = recorder
        .get_edges(&outcome.run_id)
        .unwrap()
        .into_iter()
        .map(|edge| edge.edge_id.to_string())
        .collect();
    let events = recorder.get_all_routing_events_for_run(&outcome.run_id).unwrap();
    assert!(events.iter().all(|event| edges.contains(event.edge_id.as_str())));

    // Invariant: every token reaching the sink has exactly one outcome.
    let outcomes = recorder.get_token_outcomes(&outcome.run_id).unwrap();
    assert_eq!(outcomes.len(), 3);
    let distinct: HashSet<&str> =
        outcomes.iter().map(|outcome| outcome.token_id.as_str()).collect();
    assert_eq!(distinct.len(), 3);

    // The signed export ran and recorded its final hash on the run.
    let final_hash = outcome.export_final_hash.unwrap();
    assert_eq!(final_hash.len(), 64);
    let run = recorder.get_run(&outcome.run_id).unwrap().unwrap();
    assert_eq!(run.export_final_hash.as_deref(), Some(final_hash.as_str()));
}

// ============================================================================
// SECTION: Gated Multi-Sink Run
// ============================================================================

/// Tests explicit routes record `Routed` outcomes at named sinks.
#[test]
fn test_gate_routes_record_routed_outcomes() {
    let recorder = LandscapeRecorder::new(LandscapeDb::in_memory().unwrap());
    let mut graph = ExecutionGraph::new();
    graph.add_node(node("source", NodeType::Source)).unwrap();
    graph.add_node(node("router", NodeType::Gate)).unwrap();
    graph.add_node(node("large_orders", NodeType::Sink)).unwrap();
    graph.add_node(node("small_orders", NodeType::Sink)).unwrap();
    graph.add_edge(edge("source", "router", "continue")).unwrap();
    graph.add_edge(edge("router", "large_orders", "true")).unwrap();
    graph.add_edge(edge("router", "small_orders", "false")).unwrap();

    let gate = GateSettings {
        name: "router".to_string(),
        condition: "order > 10".to_string(),
        routes: [
            ("true".to_string(), RouteSpec::Sink("large_orders".to_string())),
            ("false".to_string(), RouteSpec::Sink("small_orders".to_string())),
        ]
        .into_iter()
        .collect::<BTreeMap<_, _>>(),
        fork_to: None,
    };

    let (large_sink, large_rows) = MemorySink::new();
    let (small_sink, small_rows) = MemorySink::new();
    let mut plugins: BTreeMap<NodeId, NodePlugin> = BTreeMap::new();
    plugins.insert(
        NodeId::new("source"),
        NodePlugin::Source(Box::new(StaticSource::new(vec![
            json!({"order": 5}),
            json!({"order": 50}),
            json!({"order": 7}),
        ]))),
    );
    plugins.insert(NodeId::new("router"), NodePlugin::Gate(GateKind::Config(gate)));
    plugins.insert(NodeId::new("large_orders"), NodePlugin::Sink(Box::new(large_sink)));
    plugins.insert(NodeId::new("small_orders"), NodePlugin::Sink(Box::new(small_sink)));

    let orchestrator = Orchestrator::new(
        recorder.clone(),
        graph,
        plugins,
        EngineSettings::default(),
        ValidationFailurePolicy::Discard,
    );
    let outcome = orchestrator.run().unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(large_rows.lock().unwrap().len(), 1);
    assert_eq!(small_rows.lock().unwrap().len(), 2);

    // Every outcome is Routed: both sinks were reached by explicit labels.
    let outcomes = recorder.get_token_outcomes(&outcome.run_id).unwrap();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|record| record.outcome == TokenOutcomeKind::Routed));
    let sink_names: HashSet<&str> = outcomes
        .iter()
        .filter_map(|record| record.sink_name.as_deref())
        .collect();
    assert_eq!(
        sink_names,
        HashSet::from(["large_orders", "small_orders"])
    );
}
