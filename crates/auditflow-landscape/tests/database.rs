// auditflow-landscape/tests/database.rs
// ============================================================================
// Module: Database Tests
// Description: Tests for URL parsing, pragmas, passphrases, and the journal.
// ============================================================================
//! ## Overview
//! Validates URL handling, the encryption passphrase rules, foreign key
//! enforcement on file-backed stores, and that the JSONL change journal
//! mirrors only committed statements.

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

use auditflow_core::TokenOutcomeKind;
use auditflow_landscape::LandscapeDb;
use auditflow_landscape::LandscapeError;
use auditflow_landscape::LandscapeRecorder;
use auditflow_landscape::TokenSpec;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Urls And Passphrases
// ============================================================================

/// Tests the accepted URL forms open.
#[test]
fn test_url_forms() {
    let dir = tempfile::tempdir().unwrap();
    let file_url = format!("sqlite://{}", dir.path().join("audit.db").display());

    assert!(LandscapeDb::open("sqlite://:memory:", None).is_ok());
    assert!(LandscapeDb::open(&file_url, None).is_ok());
    assert!(LandscapeDb::open("postgres://audit", None).is_err());
}

/// Tests a passphrase with a memory URL is a configuration error.
#[test]
fn test_passphrase_requires_file_url() {
    let result = LandscapeDb::open("sqlite://:memory:", Some("hunter2"));

    assert!(matches!(result, Err(LandscapeError::Invalid(_))));
}

/// Tests a passphrase with a file URL opens, including embedded quotes.
#[test]
fn test_passphrase_with_quotes_opens() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("secret.db").display());

    assert!(LandscapeDb::open(&url, Some("pa'ss'phrase")).is_ok());
}

/// Tests reopening an existing database validates its schema.
#[test]
fn test_reopen_existing_database() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("audit.db").display());

    {
        let recorder = LandscapeRecorder::new(LandscapeDb::open(&url, None).unwrap());
        recorder.begin_run(&json!({}), None).unwrap();
    }

    let reopened = LandscapeRecorder::new(LandscapeDb::open(&url, None).unwrap());
    let rows = reopened.db().read(|conn| {
        conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get::<_, i64>(0))
            .map_err(|err| LandscapeError::Db(err.to_string()))
    });
    assert_eq!(rows.unwrap(), 1);
}

// ============================================================================
// SECTION: Foreign Keys
// ============================================================================

/// Tests foreign keys are enforced on file-backed stores too.
#[test]
fn test_foreign_keys_enforced_on_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("audit.db").display());
    let recorder = LandscapeRecorder::new(LandscapeDb::open(&url, None).unwrap());

    let orphan = recorder.create_token(TokenSpec::for_row(auditflow_core::RowId::new(
        "00000000000000000000000000000000",
    )));

    assert!(matches!(orphan, Err(LandscapeError::Integrity(_))));
}

// ============================================================================
// SECTION: Journal
// ============================================================================

/// Reads journal lines from disk.
fn read_journal(path: &std::path::Path) -> Vec<Value> {
    let text = std::fs::read_to_string(path).unwrap_or_default();
    text.lines().map(|line| serde_json::from_str(line).unwrap()).collect()
}

/// Tests committed statements are mirrored with their parameters.
#[test]
fn test_journal_mirrors_committed_statements() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("changes.jsonl");
    let db = LandscapeDb::open("sqlite://:memory:", None)
        .unwrap()
        .with_journal(&journal_path)
        .unwrap();
    let recorder = LandscapeRecorder::new(db);

    let run = recorder.begin_run(&json!({"a": 1}), None).unwrap();

    let lines = read_journal(&journal_path);
    assert_eq!(lines.len(), 1);
    assert!(lines[0]["statement"].as_str().unwrap().starts_with("INSERT INTO runs"));
    assert_eq!(lines[0]["parameters"][0], run.run_id.as_str());
    assert!(lines[0]["timestamp"].is_i64());
}

/// Tests rolled-back transactions produce no journal lines.
#[test]
fn test_rollback_produces_no_journal_lines() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("changes.jsonl");
    let db = LandscapeDb::open("sqlite://:memory:", None)
        .unwrap()
        .with_journal(&journal_path)
        .unwrap();
    let recorder = LandscapeRecorder::new(db);
    let run = recorder.begin_run(&json!({}), None).unwrap();
    let lines_before = read_journal(&journal_path).len();

    // An orphan outcome violates a foreign key; the transaction rolls back.
    let failed = recorder.record_token_outcome(
        &run.run_id,
        &auditflow_core::TokenId::new("00000000000000000000000000000000"),
        TokenOutcomeKind::Completed,
        None,
    );
    assert!(failed.is_err());

    assert_eq!(read_journal(&journal_path).len(), lines_before);
}
