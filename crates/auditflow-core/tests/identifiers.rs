// auditflow-core/tests/identifiers.rs
// ============================================================================
// Module: Identifier Tests
// Description: Tests for identifier minting and string forms.
// ============================================================================
//! ## Overview
//! Validates minted identifiers are 32 lowercase hex characters and that
//! string conversions round-trip.

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

use std::collections::HashSet;

use auditflow_core::RunId;
use auditflow_core::TokenId;
use auditflow_core::mint_hex_id;

// ============================================================================
// SECTION: Minting
// ============================================================================

/// Tests minted ids are 32 lowercase hex characters.
#[test]
fn test_minted_id_shape() {
    let id = mint_hex_id();

    assert_eq!(id.len(), 32);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

/// Tests minted ids do not collide in practice.
#[test]
fn test_minted_ids_unique() {
    let ids: HashSet<String> = (0..1_000).map(|_| mint_hex_id()).collect();

    assert_eq!(ids.len(), 1_000);
}

// ============================================================================
// SECTION: Conversions
// ============================================================================

/// Tests string round-trips preserve the identifier.
#[test]
fn test_identifier_string_roundtrip() {
    let run = RunId::new("aabbccddeeff00112233445566778899");

    assert_eq!(run.as_str(), "aabbccddeeff00112233445566778899");
    assert_eq!(run.to_string(), run.as_str());
    assert_eq!(RunId::from(run.as_str()), run);
}

/// Tests distinct identifier types never compare as equal strings silently.
#[test]
fn test_minted_token_ids_differ() {
    assert_ne!(TokenId::mint(), TokenId::mint());
}
