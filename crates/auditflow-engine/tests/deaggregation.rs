// auditflow-engine/tests/deaggregation.rs
// ============================================================================
// Module: Deaggregation Tests
// Description: Source validation plus expand-token deaggregation.
// ============================================================================
//! ## Overview
//! Source reads orders under a strict schema requiring `items` with
//! `on_validation_failure: discard`; surviving orders expand into one token
//! per item with 0-based sequential `item_index`, a shared expand group per
//! order, and exactly one parent edge each.

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

use auditflow_core::DeterminismClass;
use auditflow_core::FieldSpec;
use auditflow_core::NodeId;
use auditflow_core::NodeType;
use auditflow_core::PluginContext;
use auditflow_core::SchemaContract;
use auditflow_core::ValidationFailurePolicy;
use auditflow_engine::TokenManager;
use auditflow_engine::executors::SourceExecutor;
use auditflow_landscape::LandscapeDb;
use auditflow_landscape::LandscapeRecorder;
use common::StaticSource;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Scenario
// ============================================================================

/// Deaggregation with strict source validation and discard policy.
#[test]
fn test_deaggregation_with_source_validation() {
    let recorder = LandscapeRecorder::new(LandscapeDb::in_memory().unwrap());
    let run = recorder.begin_run(&json!({}), None).unwrap();
    let source_node = recorder
        .register_node(
            &run.run_id,
            &NodeId::new("orders"),
            "static_source",
            NodeType::Source,
            "1.0.0",
            DeterminismClass::Deterministic,
            &json!({}),
            0,
        )
        .unwrap();

    let schema = SchemaContract::flexible(vec![
        FieldSpec::required("order_id", "int"),
        FieldSpec::required("items", "list"),
    ]);
    let mut source = StaticSource::with_schema(
        vec![
            json!({"order_id": 1, "items": ["A", "B"]}),
            json!({"order_id": 2}),
            json!({"order_id": 3, "items": ["C", "D", "E"]}),
        ],
        schema,
    );

    let manager = TokenManager::new(recorder.clone(), run.run_id.clone());
    let executor = SourceExecutor::new(
        recorder.clone(),
        manager.clone(),
        source_node.node_id.clone(),
        ValidationFailurePolicy::Discard,
    );
    let ctx = PluginContext::new(run.run_id.clone(), source_node.node_id.clone());
    let output = executor.execute(&mut source, &ctx).unwrap();

    // The order without items was discarded with a recorded violation.
    assert_eq!(output.tokens.len(), 2);
    assert_eq!(output.rejected_rows, 1);
    let violations = recorder.get_validation_errors(&run.run_id).unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].violation["violation_type"], "missing_field");
    assert_eq!(violations[0].policy_applied, "discard");

    // Expand each surviving order into one token per item.
    let mut expanded_rows: Vec<Value> = Vec::new();
    let mut expanded_tokens = Vec::new();
    for parent in &output.tokens {
        let items = parent.row_data["items"].as_array().unwrap().clone();
        let children_data: Vec<Value> = items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                json!({
                    "order_id": parent.row_data["order_id"],
                    "item": item,
                    "item_index": index,
                })
            })
            .collect();
        let children = manager.expand_token(parent, children_data, 1).unwrap();
        for child in &children {
            expanded_rows.push(child.row_data.clone());
        }
        expanded_tokens.extend(children);
    }

    // Five output rows, item_index 0-based and sequential per order.
    assert_eq!(expanded_rows.len(), 5);
    assert!(expanded_rows.iter().all(|row| row["order_id"] != 2));
    for order_id in [1u64, 3] {
        let indices: Vec<u64> = expanded_rows
            .iter()
            .filter(|row| row["order_id"] == order_id)
            .map(|row| row["item_index"].as_u64().unwrap())
            .collect();
        let expected: Vec<u64> =
            (0..indices.len()).map(|index| u64::try_from(index).unwrap()).collect();
        assert_eq!(indices, expected, "order {order_id} indices must be sequential");
    }

    // Every expanded token carries an expand group and one parent edge.
    for token in &expanded_tokens {
        let record = recorder.get_token(&token.token_id).unwrap().unwrap();
        assert!(record.expand_group_id.is_some());
        let parents = recorder.get_token_parents(&token.token_id).unwrap();
        assert_eq!(parents.len(), 1);
    }

    // Siblings of one order share their expand group; orders differ.
    let group_of = |token: &auditflow_engine::TokenInfo| {
        recorder
            .get_token(&token.token_id)
            .unwrap()
            .unwrap()
            .expand_group_id
            .unwrap()
    };
    let first_order: Vec<_> = expanded_tokens
        .iter()
        .filter(|token| token.row_data["order_id"] == 1)
        .collect();
    let third_order: Vec<_> = expanded_tokens
        .iter()
        .filter(|token| token.row_data["order_id"] == 3)
        .collect();
    assert_eq!(first_order.len(), 2);
    assert_eq!(third_order.len(), 3);
    assert_eq!(group_of(first_order[0]), group_of(first_order[1]));
    assert_ne!(group_of(first_order[0]), group_of(third_order[0]));
}
