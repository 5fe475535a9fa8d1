// auditflow-core/tests/config_validation.rs
// ============================================================================
// Module: Configuration Validation Tests
// Description: Tests for settings defaults, parsing, and validation.
// ============================================================================
//! ## Overview
//! Validates serde defaults, checkpoint frequency parsing, route spec
//! parsing, and validation failures for coalesce, gate, and pool settings.

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

use auditflow_core::CheckpointFrequency;
use auditflow_core::CheckpointSettings;
use auditflow_core::CoalescePolicy;
use auditflow_core::CoalesceSettings;
use auditflow_core::GateSettings;
use auditflow_core::MergeStrategy;
use auditflow_core::PoolSettings;
use auditflow_core::RetrySettings;
use auditflow_core::RouteSpec;
use serde_json::json;

// ============================================================================
// SECTION: Retry
// ============================================================================

/// Tests retry defaults deserialize from an empty object.
#[test]
fn test_retry_defaults() {
    let settings: RetrySettings = serde_json::from_value(json!({})).unwrap();

    assert_eq!(settings.max_attempts, 3);
    assert!(settings.validate().is_ok());
}

/// Tests an exponential base of 1 is rejected.
#[test]
fn test_retry_base_must_grow() {
    let settings: RetrySettings =
        serde_json::from_value(json!({"exponential_base": 1.0})).unwrap();

    assert!(settings.validate().is_err());
}

// ============================================================================
// SECTION: Checkpoint Frequency
// ============================================================================

/// Tests the keyword and count forms both parse.
#[test]
fn test_checkpoint_frequency_forms() {
    let every_row: CheckpointSettings =
        serde_json::from_value(json!({"enabled": true, "frequency": "every_row"})).unwrap();
    let every_n: CheckpointSettings =
        serde_json::from_value(json!({"enabled": true, "frequency": 25})).unwrap();

    assert_eq!(every_row.frequency, CheckpointFrequency::EveryRow);
    assert_eq!(every_n.frequency, CheckpointFrequency::EveryN(25));
}

/// Tests unknown keywords and zero counts are rejected.
#[test]
fn test_checkpoint_frequency_rejects_bad_forms() {
    let bad_keyword =
        serde_json::from_value::<CheckpointSettings>(json!({"frequency": "hourly"}));
    let zero = serde_json::from_value::<CheckpointSettings>(json!({"frequency": 0}));

    assert!(bad_keyword.is_err());
    assert!(zero.is_err());
}

// ============================================================================
// SECTION: Route Specs
// ============================================================================

/// Tests route spec string forms parse to the closed sum.
#[test]
fn test_route_spec_parsing() {
    assert_eq!(
        serde_json::from_value::<RouteSpec>(json!("continue")).unwrap(),
        RouteSpec::Continue
    );
    assert_eq!(
        serde_json::from_value::<RouteSpec>(json!("sink:quarantine")).unwrap(),
        RouteSpec::Sink("quarantine".to_string())
    );
    assert_eq!(
        serde_json::from_value::<RouteSpec>(json!("node:enrich")).unwrap(),
        RouteSpec::Node("enrich".to_string())
    );
    assert!(serde_json::from_value::<RouteSpec>(json!("teleport:elsewhere")).is_err());
    assert!(serde_json::from_value::<RouteSpec>(json!("sink:")).is_err());
}

// ============================================================================
// SECTION: Coalesce
// ============================================================================

/// Returns a valid require_all coalesce settings value.
fn base_coalesce() -> CoalesceSettings {
    CoalesceSettings {
        name: "merge".to_string(),
        policy: CoalescePolicy::RequireAll,
        merge: MergeStrategy::Union,
        branches: vec!["a".to_string(), "b".to_string()],
        quorum_count: None,
        select_branch: None,
        timeout_seconds: None,
    }
}

/// Tests quorum policy requires a count within the branch set.
#[test]
fn test_coalesce_quorum_validation() {
    let mut settings = base_coalesce();
    settings.policy = CoalescePolicy::Quorum;

    assert!(settings.validate().is_err());

    settings.quorum_count = Some(3);
    assert!(settings.validate().is_err());

    settings.quorum_count = Some(2);
    assert!(settings.validate().is_ok());
}

/// Tests select merge requires a known branch.
#[test]
fn test_coalesce_select_validation() {
    let mut settings = base_coalesce();
    settings.merge = MergeStrategy::Select;

    assert!(settings.validate().is_err());

    settings.select_branch = Some("c".to_string());
    assert!(settings.validate().is_err());

    settings.select_branch = Some("a".to_string());
    assert!(settings.validate().is_ok());
}

// ============================================================================
// SECTION: Gate / Pool
// ============================================================================

/// Tests a fork route requires configured branches.
#[test]
fn test_gate_fork_requires_branches() {
    let mut settings: GateSettings = serde_json::from_value(json!({
        "name": "split",
        "condition": "order > 5",
        "routes": {"true": "fork", "false": "continue"},
    }))
    .unwrap();

    assert!(settings.validate().is_err());

    settings.fork_to = Some(vec!["a".to_string(), "b".to_string()]);
    assert!(settings.validate().is_ok());
}

/// Tests the pool backoff multiplier must exceed 1.
#[test]
fn test_pool_multiplier_validation() {
    let mut settings = PoolSettings::default();

    assert!(settings.validate().is_ok());

    settings.backoff_multiplier = 1.0;
    assert!(settings.validate().is_err());
}
