// auditflow-core/tests/hashing.rs
// ============================================================================
// Module: Hashing Tests
// Description: Tests for canonical JSON hashing.
// ============================================================================
//! ## Overview
//! Validates deterministic hashing using RFC 8785 canonicalization and the
//! rejection of non-finite floats.

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

use auditflow_core::hashing::stable_hash;
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// SECTION: Canonical Hashing
// ============================================================================

/// Tests key order does not change the hash.
#[test]
fn test_stable_hash_ignores_key_order() {
    let value_a = json!({"b": 1, "a": 2});
    let value_b = json!({"a": 2, "b": 1});

    assert_eq!(stable_hash(&value_a).unwrap(), stable_hash(&value_b).unwrap());
}

/// Tests the hash is 64 lowercase hex characters.
#[test]
fn test_stable_hash_shape() {
    let hash = stable_hash(&json!({"order": 7})).unwrap();

    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

/// Tests distinct values produce distinct hashes.
#[test]
fn test_stable_hash_distinguishes_values() {
    let hash_a = stable_hash(&json!({"order": 7})).unwrap();
    let hash_b = stable_hash(&json!({"order": 8})).unwrap();

    assert_ne!(hash_a, hash_b);
}

/// Tests non-finite floats are rejected.
#[test]
fn test_stable_hash_rejects_non_finite() {
    assert!(stable_hash(&f64::NAN).is_err());
    assert!(stable_hash(&f64::INFINITY).is_err());
    assert!(stable_hash(&f64::NEG_INFINITY).is_err());
}

// ============================================================================
// SECTION: Properties
// ============================================================================

proptest! {
    /// Equal inputs always produce equal outputs.
    #[test]
    fn prop_stable_hash_is_pure(keys in proptest::collection::vec("[a-z]{1,8}", 1..6), value in -1_000_000i64..1_000_000) {
        let object: serde_json::Map<String, serde_json::Value> =
            keys.iter().map(|k| (k.clone(), serde_json::Value::from(value))).collect();
        let first = stable_hash(&object).unwrap();
        let second = stable_hash(&object).unwrap();
        prop_assert_eq!(first, second);
    }

    /// Finite floats always hash.
    #[test]
    fn prop_finite_floats_hash(value in proptest::num::f64::NORMAL) {
        prop_assert!(stable_hash(&value).is_ok());
    }
}
