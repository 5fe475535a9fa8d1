// auditflow-core/tests/contract.rs
// ============================================================================
// Module: Schema Contract Tests
// Description: Tests for contract validation and violation payloads.
// ============================================================================
//! ## Overview
//! Validates row validation under fixed/flexible/observed modes and the
//! structured violation payloads.

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

use auditflow_core::ContractViolation;
use auditflow_core::FieldSpec;
use auditflow_core::SchemaContract;
use serde_json::json;

// ============================================================================
// SECTION: Row Validation
// ============================================================================

/// Tests a conforming row passes a fixed contract.
#[test]
fn test_fixed_contract_accepts_conforming_row() {
    let contract = SchemaContract::fixed(vec![
        FieldSpec::required("order_id", "int"),
        FieldSpec::required("items", "list"),
    ]);

    assert!(contract.validate_row(&json!({"order_id": 1, "items": ["A"]})).is_ok());
}

/// Tests a missing required field is a structured violation.
#[test]
fn test_missing_required_field() {
    let contract = SchemaContract::fixed(vec![
        FieldSpec::required("order_id", "int"),
        FieldSpec::required("items", "list"),
    ]);

    let violation = contract.validate_row(&json!({"order_id": 2})).unwrap_err();

    assert_eq!(
        violation,
        ContractViolation::MissingField {
            field: "items".to_string(),
            expected: "list".to_string(),
        }
    );
}

/// Tests type mismatches carry expected, actual, and a value repr.
#[test]
fn test_type_mismatch_payload() {
    let contract = SchemaContract::fixed(vec![FieldSpec::required("order_id", "int")]);

    let violation = contract.validate_row(&json!({"order_id": "seven"})).unwrap_err();

    match violation {
        ContractViolation::TypeMismatch {
            field,
            expected,
            actual,
            value_repr,
        } => {
            assert_eq!(field, "order_id");
            assert_eq!(expected, "int");
            assert_eq!(actual, "str");
            assert_eq!(value_repr, "\"seven\"");
        }
        other => panic!("unexpected violation: {other}"),
    }
}

/// Tests extra fields fail only under fixed mode.
#[test]
fn test_extra_field_strictness() {
    let fields = vec![FieldSpec::required("order_id", "int")];
    let fixed = SchemaContract::fixed(fields.clone());
    let flexible = SchemaContract::flexible(fields);
    let row = json!({"order_id": 1, "surprise": true});

    assert!(matches!(
        fixed.validate_row(&row),
        Err(ContractViolation::ExtraField { .. })
    ));
    assert!(flexible.validate_row(&row).is_ok());
}

/// Tests observed contracts validate nothing.
#[test]
fn test_observed_contract_is_dynamic() {
    let contract = SchemaContract::observed();

    assert!(contract.is_dynamic());
    assert!(contract.validate_row(&json!(["not", "even", "an", "object"])).is_ok());
}

/// Tests optional fields may be absent but not mistyped.
#[test]
fn test_optional_field_type_checked_when_present() {
    let contract = SchemaContract::flexible(vec![FieldSpec::optional("note", "str")]);

    assert!(contract.validate_row(&json!({})).is_ok());
    assert!(contract.validate_row(&json!({"note": 42})).is_err());
}

// ============================================================================
// SECTION: Compatibility
// ============================================================================

/// Tests satisfies() requires every required consumer field.
#[test]
fn test_satisfies_requires_consumer_fields() {
    let producer = SchemaContract::fixed(vec![FieldSpec::required("a", "int")]);
    let consumer = SchemaContract::fixed(vec![
        FieldSpec::required("a", "int"),
        FieldSpec::required("b", "str"),
    ]);

    assert!(matches!(
        producer.satisfies(&consumer),
        Err(ContractViolation::MissingField { .. })
    ));

    let richer = SchemaContract::fixed(vec![
        FieldSpec::required("a", "int"),
        FieldSpec::required("b", "str"),
        FieldSpec::optional("c", "bool"),
    ]);
    assert!(richer.satisfies(&consumer).is_ok());
}

/// Tests violations serialize with a violation_type tag.
#[test]
fn test_violation_serializes_with_tag() {
    let violation = ContractViolation::MissingField {
        field: "items".to_string(),
        expected: "list".to_string(),
    };

    let encoded = serde_json::to_value(&violation).unwrap();

    assert_eq!(encoded["violation_type"], "missing_field");
    assert_eq!(encoded["field"], "items");
}
