// auditflow-landscape/tests/recorder.rs
// ============================================================================
// Module: Recorder Tests
// Description: Tests for the landscape write facade and ordered queries.
// ============================================================================
//! ## Overview
//! Validates run lifecycle roundtrips, node state transitions, routing event
//! ordinals, outcome uniqueness, and the ordering contract behind export
//! determinism.

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

use auditflow_core::CallKind;
use auditflow_core::CallStatus;
use auditflow_core::DeterminismClass;
use auditflow_core::ExportStatus;
use auditflow_core::NodeId;
use auditflow_core::NodeStateStatus;
use auditflow_core::NodeType;
use auditflow_core::ReproducibilityGrade;
use auditflow_core::RoutingMode;
use auditflow_core::RunStatus;
use auditflow_core::TokenOutcomeKind;
use auditflow_core::stable_hash;
use auditflow_landscape::CallSpec;
use auditflow_landscape::LandscapeDb;
use auditflow_landscape::LandscapeError;
use auditflow_landscape::LandscapeRecorder;
use auditflow_landscape::TokenSpec;
use serde_json::json;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Opens a fresh in-memory recorder.
fn recorder() -> LandscapeRecorder {
    LandscapeRecorder::new(LandscapeDb::in_memory().unwrap())
}

/// Registers a node with default attributes.
fn register_node(
    recorder: &LandscapeRecorder,
    run_id: &auditflow_core::RunId,
    node_id: &str,
    node_type: NodeType,
    determinism: DeterminismClass,
    sequence_index: u32,
) -> NodeId {
    let record = recorder
        .register_node(
            run_id,
            &NodeId::new(node_id),
            "test",
            node_type,
            "1.0.0",
            determinism,
            &json!({}),
            sequence_index,
        )
        .unwrap();
    record.node_id
}

// ============================================================================
// SECTION: Run Lifecycle
// ============================================================================

/// Tests begin_run then get_run returns the same logical record.
#[test]
fn test_begin_run_roundtrip() {
    let recorder = recorder();
    let config = json!({"source": {"plugin": "csv"}});

    let run = recorder.begin_run(&config, None).unwrap();
    let loaded = recorder.get_run(&run.run_id).unwrap().unwrap();

    assert_eq!(loaded.run_id, run.run_id);
    assert_eq!(loaded.status, RunStatus::Running);
    assert_eq!(loaded.config_hash, stable_hash(&config).unwrap());
    assert_eq!(loaded.canonical_version, run.canonical_version);
    assert!(loaded.completed_at.is_none());
}

/// Tests complete_run stores the terminal status and timestamp.
#[test]
fn test_complete_run() {
    let recorder = recorder();
    let run = recorder.begin_run(&json!({}), None).unwrap();

    recorder.complete_run(&run.run_id, RunStatus::Failed).unwrap();

    let loaded = recorder.get_run(&run.run_id).unwrap().unwrap();
    assert_eq!(loaded.status, RunStatus::Failed);
    assert!(loaded.completed_at.is_some());
}

/// Tests finalize_run grades deterministic runs as full.
#[test]
fn test_finalize_run_full_grade() {
    let recorder = recorder();
    let run = recorder.begin_run(&json!({}), None).unwrap();
    let node = register_node(
        &recorder,
        &run.run_id,
        "transform",
        NodeType::Transform,
        DeterminismClass::Deterministic,
        0,
    );
    let row = recorder.create_row(&run.run_id, &node, 0, &json!({"x": 1})).unwrap();
    let token = recorder.create_token(TokenSpec::for_row(row.row_id)).unwrap();
    let state = recorder
        .begin_node_state(&token.token_id, &node, &run.run_id, 0, 1, &json!({"x": 1}))
        .unwrap();
    recorder
        .complete_node_state(&state.state_id, NodeStateStatus::Completed, None, Some(1.0), None)
        .unwrap();

    let grade = recorder.finalize_run(&run.run_id).unwrap();

    assert_eq!(grade, ReproducibilityGrade::Full);
    let loaded = recorder.get_run(&run.run_id).unwrap().unwrap();
    assert_eq!(loaded.status, RunStatus::Completed);
    assert_eq!(loaded.reproducibility_grade, Some(ReproducibilityGrade::Full));
}

/// Tests finalize_run grades executed non-deterministic nodes as limited.
#[test]
fn test_finalize_run_limited_grade() {
    let recorder = recorder();
    let run = recorder.begin_run(&json!({}), None).unwrap();
    let node = register_node(
        &recorder,
        &run.run_id,
        "llm",
        NodeType::Transform,
        DeterminismClass::NonDeterministic,
        0,
    );
    let row = recorder.create_row(&run.run_id, &node, 0, &json!({})).unwrap();
    let token = recorder.create_token(TokenSpec::for_row(row.row_id)).unwrap();
    let state = recorder
        .begin_node_state(&token.token_id, &node, &run.run_id, 0, 1, &json!({}))
        .unwrap();
    recorder
        .complete_node_state(&state.state_id, NodeStateStatus::Completed, None, None, None)
        .unwrap();

    assert_eq!(recorder.finalize_run(&run.run_id).unwrap(), ReproducibilityGrade::Limited);
}

/// Tests export status transitions clear the error on non-failed statuses.
#[test]
fn test_set_export_status_clears_error() {
    let recorder = recorder();
    let run = recorder.begin_run(&json!({}), None).unwrap();

    recorder
        .set_export_status(&run.run_id, ExportStatus::Failed, Some("sink unreachable"), None)
        .unwrap();
    let failed = recorder.get_run(&run.run_id).unwrap().unwrap();
    assert_eq!(failed.export_status, Some(ExportStatus::Failed));
    assert_eq!(failed.export_error.as_deref(), Some("sink unreachable"));

    recorder
        .set_export_status(&run.run_id, ExportStatus::Completed, None, Some("abc123"))
        .unwrap();
    let completed = recorder.get_run(&run.run_id).unwrap().unwrap();
    assert_eq!(completed.export_status, Some(ExportStatus::Completed));
    assert_eq!(completed.export_error, None);
    assert_eq!(completed.export_final_hash.as_deref(), Some("abc123"));

    recorder
        .set_export_status(&run.run_id, ExportStatus::Failed, Some("again"), None)
        .unwrap();
    recorder.set_export_status(&run.run_id, ExportStatus::Pending, None, None).unwrap();
    let pending = recorder.get_run(&run.run_id).unwrap().unwrap();
    assert_eq!(pending.export_status, Some(ExportStatus::Pending));
    assert_eq!(pending.export_error, None);
}

// ============================================================================
// SECTION: Rows, Tokens, Parents
// ============================================================================

/// Tests the row hash is computed at creation from the source data.
#[test]
fn test_create_row_hashes_source_data() {
    let recorder = recorder();
    let run = recorder.begin_run(&json!({}), None).unwrap();
    let node = register_node(
        &recorder,
        &run.run_id,
        "source",
        NodeType::Source,
        DeterminismClass::Deterministic,
        0,
    );
    let data = json!({"order": 7});

    let row = recorder.create_row(&run.run_id, &node, 0, &data).unwrap();

    assert_eq!(row.source_data_hash, stable_hash(&data).unwrap());
    let loaded = recorder.get_row(&row.row_id).unwrap().unwrap();
    assert_eq!(loaded.source_data_hash, row.source_data_hash);
}

/// Tests token parent ordinals are unique per child.
#[test]
fn test_token_parent_ordinal_unique() {
    let recorder = recorder();
    let run = recorder.begin_run(&json!({}), None).unwrap();
    let node = register_node(
        &recorder,
        &run.run_id,
        "source",
        NodeType::Source,
        DeterminismClass::Deterministic,
        0,
    );
    let row = recorder.create_row(&run.run_id, &node, 0, &json!({})).unwrap();
    let parent_a = recorder.create_token(TokenSpec::for_row(row.row_id.clone())).unwrap();
    let parent_b = recorder.create_token(TokenSpec::for_row(row.row_id.clone())).unwrap();
    let child = recorder.create_token(TokenSpec::for_row(row.row_id)).unwrap();

    recorder.add_token_parent(&child.token_id, &parent_a.token_id, 0).unwrap();
    let duplicate = recorder.add_token_parent(&child.token_id, &parent_b.token_id, 0);

    assert!(matches!(duplicate, Err(LandscapeError::Conflict(_))));

    recorder.add_token_parent(&child.token_id, &parent_b.token_id, 1).unwrap();
    let parents = recorder.get_token_parents(&child.token_id).unwrap();
    assert_eq!(parents.len(), 2);
    assert_eq!(parents[0].parent_token_id, parent_a.token_id);
    assert_eq!(parents[1].parent_token_id, parent_b.token_id);
}

// ============================================================================
// SECTION: Node States
// ============================================================================

/// Tests node state completion writes output hash and duration.
#[test]
fn test_node_state_lifecycle() {
    let recorder = recorder();
    let run = recorder.begin_run(&json!({}), None).unwrap();
    let node = register_node(
        &recorder,
        &run.run_id,
        "transform",
        NodeType::Transform,
        DeterminismClass::Deterministic,
        0,
    );
    let row = recorder.create_row(&run.run_id, &node, 0, &json!({"x": 1})).unwrap();
    let token = recorder.create_token(TokenSpec::for_row(row.row_id)).unwrap();

    let state = recorder
        .begin_node_state(&token.token_id, &node, &run.run_id, 2, 1, &json!({"x": 1}))
        .unwrap();
    assert_eq!(state.status, NodeStateStatus::Open);
    assert_eq!(state.input_hash, stable_hash(&json!({"x": 1})).unwrap());

    recorder
        .complete_node_state(
            &state.state_id,
            NodeStateStatus::Completed,
            Some(&json!({"x": 2})),
            Some(12.5),
            None,
        )
        .unwrap();

    let states = recorder.get_node_states_for_token(&token.token_id).unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].status, NodeStateStatus::Completed);
    assert_eq!(states[0].output_hash.as_deref(), Some(stable_hash(&json!({"x": 2})).unwrap().as_str()));
    assert_eq!(states[0].duration_ms, Some(12.5));
}

/// Tests a state cannot be closed twice.
#[test]
fn test_node_state_double_close_rejected() {
    let recorder = recorder();
    let run = recorder.begin_run(&json!({}), None).unwrap();
    let node = register_node(
        &recorder,
        &run.run_id,
        "transform",
        NodeType::Transform,
        DeterminismClass::Deterministic,
        0,
    );
    let row = recorder.create_row(&run.run_id, &node, 0, &json!({})).unwrap();
    let token = recorder.create_token(TokenSpec::for_row(row.row_id)).unwrap();
    let state = recorder
        .begin_node_state(&token.token_id, &node, &run.run_id, 0, 1, &json!({}))
        .unwrap();

    recorder
        .complete_node_state(&state.state_id, NodeStateStatus::Failed, None, None, None)
        .unwrap();
    let second =
        recorder.complete_node_state(&state.state_id, NodeStateStatus::Completed, None, None, None);

    assert!(matches!(second, Err(LandscapeError::Invalid(_))));
}

/// Tests node states order by (step_index, attempt) across retries.
#[test]
fn test_node_state_ordering_across_retries() {
    let recorder = recorder();
    let run = recorder.begin_run(&json!({}), None).unwrap();
    let node_a = register_node(
        &recorder,
        &run.run_id,
        "first",
        NodeType::Transform,
        DeterminismClass::Deterministic,
        0,
    );
    let node_b = register_node(
        &recorder,
        &run.run_id,
        "second",
        NodeType::Transform,
        DeterminismClass::Deterministic,
        1,
    );
    let row = recorder.create_row(&run.run_id, &node_a, 0, &json!({})).unwrap();
    let token = recorder.create_token(TokenSpec::for_row(row.row_id)).unwrap();

    // Insert out of order: step 1, then step 0 attempts 2 and 1.
    recorder
        .begin_node_state(&token.token_id, &node_b, &run.run_id, 1, 1, &json!({}))
        .unwrap();
    recorder
        .begin_node_state(&token.token_id, &node_a, &run.run_id, 0, 2, &json!({}))
        .unwrap();
    recorder
        .begin_node_state(&token.token_id, &node_a, &run.run_id, 0, 1, &json!({}))
        .unwrap();

    let states = recorder.get_node_states_for_token(&token.token_id).unwrap();
    let keys: Vec<(u32, u32)> =
        states.iter().map(|state| (state.step_index, state.attempt)).collect();
    assert_eq!(keys, vec![(0, 1), (0, 2), (1, 1)]);
}

// ============================================================================
// SECTION: Routing Events And Calls
// ============================================================================

/// Tests routing event ordinals continue the state's sequence.
#[test]
fn test_routing_event_ordinals() {
    let recorder = recorder();
    let run = recorder.begin_run(&json!({}), None).unwrap();
    let gate = register_node(
        &recorder,
        &run.run_id,
        "gate",
        NodeType::Gate,
        DeterminismClass::Deterministic,
        0,
    );
    let sink = register_node(
        &recorder,
        &run.run_id,
        "sink",
        NodeType::Sink,
        DeterminismClass::Deterministic,
        1,
    );
    let edge_a =
        recorder.register_edge(&run.run_id, &gate, &sink, "a", RoutingMode::Move).unwrap();
    let edge_b =
        recorder.register_edge(&run.run_id, &gate, &sink, "b", RoutingMode::Move).unwrap();
    let row = recorder.create_row(&run.run_id, &gate, 0, &json!({})).unwrap();
    let token = recorder.create_token(TokenSpec::for_row(row.row_id)).unwrap();
    let state = recorder
        .begin_node_state(&token.token_id, &gate, &run.run_id, 0, 1, &json!({}))
        .unwrap();

    recorder
        .record_routing_event(&state.state_id, &edge_a.edge_id, RoutingMode::Move, None)
        .unwrap();
    recorder
        .record_routing_events(
            &state.state_id,
            &[(edge_b.edge_id.clone(), RoutingMode::Copy)],
            Some(&json!({"why": "fanout"})),
        )
        .unwrap();

    let events = recorder.get_routing_events(&state.state_id).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].ordinal, 0);
    assert_eq!(events[0].edge_id, edge_a.edge_id);
    assert_eq!(events[1].ordinal, 1);
    assert_eq!(events[1].mode, RoutingMode::Copy);
    assert_eq!(events[1].reason, Some(json!({"why": "fanout"})));
}

/// Tests duplicate (origin, label) edges are rejected.
#[test]
fn test_duplicate_edge_label_conflict() {
    let recorder = recorder();
    let run = recorder.begin_run(&json!({}), None).unwrap();
    let gate = register_node(
        &recorder,
        &run.run_id,
        "gate",
        NodeType::Gate,
        DeterminismClass::Deterministic,
        0,
    );
    let sink = register_node(
        &recorder,
        &run.run_id,
        "sink",
        NodeType::Sink,
        DeterminismClass::Deterministic,
        1,
    );

    recorder.register_edge(&run.run_id, &gate, &sink, "true", RoutingMode::Move).unwrap();
    let duplicate = recorder.register_edge(&run.run_id, &gate, &sink, "true", RoutingMode::Move);

    assert!(matches!(duplicate, Err(LandscapeError::Conflict(_))));
}

/// Tests calls order by call index.
#[test]
fn test_calls_ordered_by_index() {
    let recorder = recorder();
    let run = recorder.begin_run(&json!({}), None).unwrap();
    let node = register_node(
        &recorder,
        &run.run_id,
        "transform",
        NodeType::Transform,
        DeterminismClass::NonDeterministic,
        0,
    );
    let row = recorder.create_row(&run.run_id, &node, 0, &json!({})).unwrap();
    let token = recorder.create_token(TokenSpec::for_row(row.row_id)).unwrap();
    let state = recorder
        .begin_node_state(&token.token_id, &node, &run.run_id, 0, 1, &json!({}))
        .unwrap();

    for index in [1u32, 0u32] {
        recorder
            .record_call(CallSpec {
                state_id: state.state_id.clone(),
                call_index: index,
                kind: CallKind::Llm,
                status: CallStatus::Success,
                request_hash: format!("req-{index}"),
                response_hash: None,
                latency_ms: Some(5.0),
                provider: Some("mock".to_string()),
                error: None,
            })
            .unwrap();
    }

    let calls = recorder.get_calls(&state.state_id).unwrap();
    assert_eq!(calls[0].call_index, 0);
    assert_eq!(calls[1].call_index, 1);
}

// ============================================================================
// SECTION: Outcomes And Resolutions
// ============================================================================

/// Tests the (run, token) outcome pair is unique.
#[test]
fn test_token_outcome_unique() {
    let recorder = recorder();
    let run = recorder.begin_run(&json!({}), None).unwrap();
    let node = register_node(
        &recorder,
        &run.run_id,
        "sink",
        NodeType::Sink,
        DeterminismClass::Deterministic,
        0,
    );
    let row = recorder.create_row(&run.run_id, &node, 0, &json!({})).unwrap();
    let token = recorder.create_token(TokenSpec::for_row(row.row_id)).unwrap();

    recorder
        .record_token_outcome(&run.run_id, &token.token_id, TokenOutcomeKind::Completed, Some("out"))
        .unwrap();
    let second = recorder.record_token_outcome(
        &run.run_id,
        &token.token_id,
        TokenOutcomeKind::Failed,
        None,
    );

    assert!(matches!(second, Err(LandscapeError::Conflict(_))));
}

/// Tests source field resolutions round-trip in order.
#[test]
fn test_source_field_resolution_roundtrip() {
    let recorder = recorder();
    let run = recorder.begin_run(&json!({}), None).unwrap();
    let node = register_node(
        &recorder,
        &run.run_id,
        "source",
        NodeType::Source,
        DeterminismClass::Deterministic,
        0,
    );
    let mappings = vec![
        ("Order ID".to_string(), "order_id".to_string()),
        ("Item Count".to_string(), "item_count".to_string()),
    ];

    recorder.record_source_field_resolution(&run.run_id, &node, &mappings).unwrap();

    let resolved = recorder.get_source_field_resolution(&run.run_id, &node).unwrap();
    let roundtrip: Vec<(String, String)> = resolved
        .into_iter()
        .map(|record| (record.original_name, record.normalized_name))
        .collect();
    assert_eq!(roundtrip, mappings);
}

/// Tests orphan writes are rejected by foreign keys.
#[test]
fn test_orphan_token_rejected() {
    let recorder = recorder();

    let orphan = recorder.create_token(TokenSpec::for_row(auditflow_core::RowId::new(
        "ffffffffffffffffffffffffffffffff",
    )));

    assert!(matches!(orphan, Err(LandscapeError::Integrity(_))));
}
