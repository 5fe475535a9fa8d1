// auditflow-core/src/core/contract.rs
// ============================================================================
// Module: Auditflow Schema Contracts
// Description: Frozen field-level schemas and compatibility checking.
// Purpose: Validate rows at sources and edges; resolve sink headers.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A contract is a frozen schema: an ordered list of field records, each
//! carrying a normalized name, the original source name, a Python-style type
//! spec, a required flag, and provenance. Contracts gate edges
//! (producer output must satisfy consumer input) and validate rows at
//! sources. Observed contracts are purely dynamic and skip validation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Contract Mode
// ============================================================================

/// Schema strictness mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractMode {
    /// Declared fields only; extra fields are violations.
    Fixed,
    /// Declared fields are validated; extra fields pass through.
    Flexible,
    /// No declared fields; the schema is whatever arrives.
    Observed,
}

/// Provenance of a field record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldProvenance {
    /// Declared in configuration.
    Declared,
    /// Inferred from observed data.
    Inferred,
    /// Derived by a transform.
    Derived,
}

// ============================================================================
// SECTION: Field Spec
// ============================================================================

/// One ordered field record within a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Normalized field name used downstream.
    pub normalized_name: String,
    /// Original name as it appeared at the source.
    pub original_name: String,
    /// Python-style type spec (`str`, `int`, `float`, `bool`, `list`, `dict`).
    pub type_spec: String,
    /// Whether the field must be present.
    pub required: bool,
    /// Where the field record came from.
    pub provenance: FieldProvenance,
}

impl FieldSpec {
    /// Creates a declared, required field record.
    #[must_use]
    pub fn required(name: impl Into<String>, type_spec: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            original_name: name.clone(),
            normalized_name: name,
            type_spec: type_spec.into(),
            required: true,
            provenance: FieldProvenance::Declared,
        }
    }

    /// Creates a declared, optional field record.
    #[must_use]
    pub fn optional(name: impl Into<String>, type_spec: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            original_name: name.clone(),
            normalized_name: name,
            type_spec: type_spec.into(),
            required: false,
            provenance: FieldProvenance::Declared,
        }
    }
}

// ============================================================================
// SECTION: Contract
// ============================================================================

/// Frozen schema stored on the run and consulted by edges and sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaContract {
    /// Strictness mode.
    pub mode: ContractMode,
    /// Ordered field records; empty for observed contracts.
    pub fields: Vec<FieldSpec>,
}

impl SchemaContract {
    /// Creates an observed (purely dynamic) contract.
    #[must_use]
    pub const fn observed() -> Self {
        Self {
            mode: ContractMode::Observed,
            fields: Vec::new(),
        }
    }

    /// Creates a fixed contract over the provided fields.
    #[must_use]
    pub const fn fixed(fields: Vec<FieldSpec>) -> Self {
        Self {
            mode: ContractMode::Fixed,
            fields,
        }
    }

    /// Creates a flexible contract over the provided fields.
    #[must_use]
    pub const fn flexible(fields: Vec<FieldSpec>) -> Self {
        Self {
            mode: ContractMode::Flexible,
            fields,
        }
    }

    /// Returns true when the contract performs no validation.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.mode == ContractMode::Observed
    }

    /// Returns the field record for a normalized name.
    #[must_use]
    pub fn field(&self, normalized_name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.normalized_name == normalized_name)
    }

    /// Checks that this contract (as a producer output) supplies every field
    /// required by `consumer` (as a consumer input).
    ///
    /// Dynamic contracts on either side skip the check.
    ///
    /// # Errors
    ///
    /// Returns [`ContractViolation::MissingField`] for the first required
    /// consumer field this contract does not provide.
    pub fn satisfies(&self, consumer: &Self) -> Result<(), ContractViolation> {
        if self.is_dynamic() || consumer.is_dynamic() {
            return Ok(());
        }
        for required in consumer.fields.iter().filter(|field| field.required) {
            if self.field(&required.normalized_name).is_none() {
                return Err(ContractViolation::MissingField {
                    field: required.normalized_name.clone(),
                    expected: required.type_spec.clone(),
                });
            }
        }
        Ok(())
    }

    /// Validates a row object against this contract.
    ///
    /// # Errors
    ///
    /// Returns the first [`ContractViolation`] found: a missing required
    /// field, a type mismatch, or (under `Fixed` mode) an extra field.
    pub fn validate_row(&self, row: &Value) -> Result<(), ContractViolation> {
        if self.is_dynamic() {
            return Ok(());
        }
        let Some(object) = row.as_object() else {
            return Err(ContractViolation::TypeMismatch {
                field: String::new(),
                expected: "dict".to_string(),
                actual: json_type_name(row).to_string(),
                value_repr: truncate_repr(row),
            });
        };
        for field in &self.fields {
            match object.get(&field.normalized_name) {
                None if field.required => {
                    return Err(ContractViolation::MissingField {
                        field: field.normalized_name.clone(),
                        expected: field.type_spec.clone(),
                    });
                }
                None => {}
                Some(value) => {
                    if !type_spec_matches(&field.type_spec, value) {
                        return Err(ContractViolation::TypeMismatch {
                            field: field.normalized_name.clone(),
                            expected: field.type_spec.clone(),
                            actual: json_type_name(value).to_string(),
                            value_repr: truncate_repr(value),
                        });
                    }
                }
            }
        }
        if self.mode == ContractMode::Fixed {
            for key in object.keys() {
                if self.field(key).is_none() {
                    return Err(ContractViolation::ExtraField {
                        field: key.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Violations
// ============================================================================

/// Structured contract violation surfaced as a validation or transform error.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "violation_type", rename_all = "snake_case")]
pub enum ContractViolation {
    /// A required field is absent.
    #[error("missing required field '{field}' (expected {expected})")]
    MissingField {
        /// Missing field name.
        field: String,
        /// Expected type spec.
        expected: String,
    },
    /// A field value does not match its declared type spec.
    #[error("type mismatch on '{field}': expected {expected}, got {actual}")]
    TypeMismatch {
        /// Offending field name.
        field: String,
        /// Expected type spec.
        expected: String,
        /// Observed JSON type.
        actual: String,
        /// Truncated representation of the observed value.
        value_repr: String,
    },
    /// A field not in the contract arrived under strict mode.
    #[error("unexpected field '{field}' under fixed contract")]
    ExtraField {
        /// Offending field name.
        field: String,
    },
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Maximum characters kept in a violation value representation.
const MAX_VALUE_REPR: usize = 120;

/// Returns the JSON type name for a value.
fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(number) => {
            if number.is_i64() || number.is_u64() {
                "int"
            } else {
                "float"
            }
        }
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

/// Checks a value against a Python-style type spec.
fn type_spec_matches(type_spec: &str, value: &Value) -> bool {
    match type_spec {
        "str" => value.is_string(),
        "int" => value.is_i64() || value.is_u64(),
        "float" => value.is_number(),
        "bool" => value.is_boolean(),
        "list" => value.is_array(),
        "dict" => value.is_object(),
        // Unknown specs validate presence only.
        _ => true,
    }
}

/// Produces a bounded textual representation of a value for error payloads.
fn truncate_repr(value: &Value) -> String {
    let repr = value.to_string();
    if repr.chars().count() <= MAX_VALUE_REPR {
        return repr;
    }
    let mut out: String = repr.chars().take(MAX_VALUE_REPR).collect();
    out.push('…');
    out
}
