// auditflow-landscape/tests/payload_store.rs
// ============================================================================
// Module: Payload Store Tests
// Description: Tests for the content-addressed blob store.
// ============================================================================
//! ## Overview
//! Validates store/retrieve roundtrips, the NotFound-vs-corruption
//! distinction, and retention purging leaving rows degraded but queryable.

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

use std::sync::Arc;

use auditflow_core::DeterminismClass;
use auditflow_core::NodeId;
use auditflow_core::NodeType;
use auditflow_landscape::FilesystemPayloadStore;
use auditflow_landscape::LandscapeDb;
use auditflow_landscape::LandscapeRecorder;
use auditflow_landscape::PayloadError;
use auditflow_landscape::RowDataState;
use serde_json::json;

// ============================================================================
// SECTION: Roundtrip
// ============================================================================

/// Tests store then retrieve returns the original bytes.
#[test]
fn test_store_retrieve_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FilesystemPayloadStore::new(dir.path()).unwrap();

    let reference = store.store(b"{\"order\": 7}").unwrap();
    let bytes = store.retrieve(&reference).unwrap();

    assert_eq!(bytes, b"{\"order\": 7}");
    assert_eq!(reference.len(), 64);
}

/// Tests storing identical bytes twice is idempotent.
#[test]
fn test_store_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = FilesystemPayloadStore::new(dir.path()).unwrap();

    let first = store.store(b"same").unwrap();
    let second = store.store(b"same").unwrap();

    assert_eq!(first, second);
}

// ============================================================================
// SECTION: Missing vs Corrupt
// ============================================================================

/// Tests an unknown reference is NotFound, not corruption.
#[test]
fn test_missing_payload_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = FilesystemPayloadStore::new(dir.path()).unwrap();
    let reference = store.store(b"ephemeral").unwrap();
    store.purge_older_than(0).unwrap();

    let result = store.retrieve(&reference);

    assert!(matches!(result, Err(PayloadError::NotFound(_))));
}

/// Tests tampered bytes fail closed as an integrity error.
#[test]
fn test_corrupt_payload_is_integrity_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = FilesystemPayloadStore::new(dir.path()).unwrap();
    let reference = store.store(b"trustworthy").unwrap();

    // Overwrite the stored blob in place.
    let (first, rest) = reference.split_at(2);
    let (second, _) = rest.split_at(2);
    let path = dir.path().join(first).join(second).join(&reference);
    std::fs::write(&path, b"tampered").unwrap();

    let result = store.retrieve(&reference);

    assert!(matches!(result, Err(PayloadError::Integrity(_))));
}

/// Tests malformed references are rejected before touching the filesystem.
#[test]
fn test_invalid_ref_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = FilesystemPayloadStore::new(dir.path()).unwrap();

    assert!(matches!(store.retrieve("not-a-ref"), Err(PayloadError::InvalidRef(_))));
    assert!(matches!(store.retrieve("../etc/passwd"), Err(PayloadError::InvalidRef(_))));
}

// ============================================================================
// SECTION: Degraded Rows
// ============================================================================

/// Tests a purged payload leaves the row queryable with its hash intact.
#[test]
fn test_purged_payload_degrades_row() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FilesystemPayloadStore::new(dir.path()).unwrap());
    let recorder = LandscapeRecorder::new(LandscapeDb::in_memory().unwrap())
        .with_payload_store(Arc::clone(&store));
    let run = recorder.begin_run(&json!({}), None).unwrap();
    let node = recorder
        .register_node(
            &run.run_id,
            &NodeId::new("source"),
            "csv",
            NodeType::Source,
            "1.0.0",
            DeterminismClass::Deterministic,
            &json!({}),
            0,
        )
        .unwrap();
    let data = json!({"order": 7});
    let row = recorder.create_row(&run.run_id, &node.node_id, 0, &data).unwrap();

    let before = recorder.get_row_data(&row.row_id).unwrap();
    assert_eq!(before.state, RowDataState::Available);
    assert_eq!(before.data, Some(data));

    store.purge_older_than(0).unwrap();

    let after = recorder.get_row_data(&row.row_id).unwrap();
    assert_eq!(after.state, RowDataState::Purged);
    assert_eq!(after.data, None);

    // The hash is invariant across purging.
    let loaded = recorder.get_row(&row.row_id).unwrap().unwrap();
    assert_eq!(loaded.source_data_hash, row.source_data_hash);
}
