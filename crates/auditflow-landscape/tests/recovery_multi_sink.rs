// auditflow-landscape/tests/recovery_multi_sink.rs
// ============================================================================
// Module: Multi-Sink Recovery Tests
// Description: Tests for outcome-based unprocessed-row computation.
// ============================================================================
//! ## Overview
//! When rows interleave between sinks and one sink fails, recovery must
//! return every row lacking a terminal outcome, including rows *below* the
//! latest checkpoint's position. A row-index boundary would silently drop
//! the failed sink's rows.

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

use auditflow_core::DeterminismClass;
use auditflow_core::NodeId;
use auditflow_core::NodeType;
use auditflow_core::RoutingMode;
use auditflow_core::RunStatus;
use auditflow_core::SchemaContract;
use auditflow_core::TokenId;
use auditflow_core::TokenOutcomeKind;
use auditflow_core::graph::ExecutionGraph;
use auditflow_core::graph::GraphEdge;
use auditflow_core::graph::GraphNode;
use auditflow_landscape::CheckpointManager;
use auditflow_landscape::LandscapeDb;
use auditflow_landscape::LandscapeRecorder;
use auditflow_landscape::RecoveryManager;
use auditflow_landscape::TokenSpec;
use serde_json::json;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds the source → gate → {sink_a, sink_b} graph.
fn multi_sink_graph() -> ExecutionGraph {
    let mut graph = ExecutionGraph::new();
    for (id, node_type) in [
        ("source", NodeType::Source),
        ("gate", NodeType::Gate),
        ("sink_a", NodeType::Sink),
        ("sink_b", NodeType::Sink),
    ] {
        graph
            .add_node(GraphNode {
                node_id: NodeId::new(id),
                node_type,
                plugin_name: "test".to_string(),
                config: json!({}),
                input_contract: SchemaContract::observed(),
                output_contract: SchemaContract::observed(),
            })
            .unwrap();
    }
    for (from, to, label) in [
        ("source", "gate", "continue"),
        ("gate", "sink_a", "continue"),
        ("gate", "sink_b", "route_b"),
    ] {
        graph
            .add_edge(GraphEdge {
                from: NodeId::new(from),
                to: NodeId::new(to),
                label: label.to_string(),
                mode: RoutingMode::Move,
            })
            .unwrap();
    }
    graph
}

// ============================================================================
// SECTION: Scenario
// ============================================================================

/// Recovery must include rows routed to the failed sink, not just rows
/// after the checkpoint.
///
/// Scenario: row 0 → sink_a (ok), row 1 → sink_b (fails, no outcome),
/// row 2 → sink_a (ok, checkpointed), rows 3 and 4 not started.
#[test]
fn test_interleaved_multi_sink_includes_failed_sink_rows() {
    let recorder = LandscapeRecorder::new(LandscapeDb::in_memory().unwrap());
    let run = recorder.begin_run(&json!({}), None).unwrap();

    for (index, (id, node_type)) in [
        ("source", NodeType::Source),
        ("gate", NodeType::Gate),
        ("sink_a", NodeType::Sink),
        ("sink_b", NodeType::Sink),
    ]
    .iter()
    .enumerate()
    {
        recorder
            .register_node(
                &run.run_id,
                &NodeId::new(*id),
                "test",
                *node_type,
                "1.0.0",
                DeterminismClass::Deterministic,
                &json!({}),
                u32::try_from(index).unwrap(),
            )
            .unwrap();
    }

    let mut tokens: Vec<TokenId> = Vec::new();
    for index in 0..5u64 {
        let row = recorder
            .create_row(&run.run_id, &NodeId::new("source"), index, &json!({"row": index}))
            .unwrap();
        let token = recorder.create_token(TokenSpec::for_row(row.row_id)).unwrap();
        tokens.push(token.token_id);
    }

    // Rows 0 and 2 completed to sink_a; row 1 was routed to sink_b which
    // failed before recording any outcome; rows 3 and 4 never started.
    recorder
        .record_token_outcome(&run.run_id, &tokens[0], TokenOutcomeKind::Completed, Some("sink_a"))
        .unwrap();
    recorder
        .record_token_outcome(&run.run_id, &tokens[2], TokenOutcomeKind::Completed, Some("sink_a"))
        .unwrap();
    recorder.complete_run(&run.run_id, RunStatus::Failed).unwrap();

    // Checkpoint at row 2's sink write; sequence can differ from row_index.
    let checkpoints = CheckpointManager::new(recorder.clone());
    checkpoints
        .create_checkpoint(&run.run_id, &tokens[2], &NodeId::new("sink_a"), 3, &multi_sink_graph())
        .unwrap();

    let recovery = RecoveryManager::new(recorder);
    let unprocessed = recovery.unprocessed_rows(&run.run_id).unwrap();
    let indices: Vec<u64> = unprocessed.iter().map(|row| row.row_index).collect();

    // Row 1 must be included even though its index precedes the checkpoint.
    assert_eq!(indices, vec![1, 3, 4]);
}

/// A routed outcome counts as terminal for recovery purposes.
#[test]
fn test_routed_outcome_counts_as_processed() {
    let recorder = LandscapeRecorder::new(LandscapeDb::in_memory().unwrap());
    let run = recorder.begin_run(&json!({}), None).unwrap();
    recorder
        .register_node(
            &run.run_id,
            &NodeId::new("source"),
            "test",
            NodeType::Source,
            "1.0.0",
            DeterminismClass::Deterministic,
            &json!({}),
            0,
        )
        .unwrap();
    let row = recorder
        .create_row(&run.run_id, &NodeId::new("source"), 0, &json!({}))
        .unwrap();
    let token = recorder.create_token(TokenSpec::for_row(row.row_id)).unwrap();
    recorder
        .record_token_outcome(&run.run_id, &token.token_id, TokenOutcomeKind::Routed, Some("alt"))
        .unwrap();

    let recovery = RecoveryManager::new(recorder);

    assert!(recovery.unprocessed_rows(&run.run_id).unwrap().is_empty());
}

/// A quarantined token does not count as processed.
#[test]
fn test_quarantined_outcome_is_not_terminal_success() {
    let recorder = LandscapeRecorder::new(LandscapeDb::in_memory().unwrap());
    let run = recorder.begin_run(&json!({}), None).unwrap();
    recorder
        .register_node(
            &run.run_id,
            &NodeId::new("source"),
            "test",
            NodeType::Source,
            "1.0.0",
            DeterminismClass::Deterministic,
            &json!({}),
            0,
        )
        .unwrap();
    let row = recorder
        .create_row(&run.run_id, &NodeId::new("source"), 0, &json!({}))
        .unwrap();
    let token = recorder.create_token(TokenSpec::for_row(row.row_id)).unwrap();
    recorder
        .record_token_outcome(&run.run_id, &token.token_id, TokenOutcomeKind::Quarantined, None)
        .unwrap();

    let recovery = RecoveryManager::new(recorder);

    assert_eq!(recovery.unprocessed_rows(&run.run_id).unwrap().len(), 1);
}
