// auditflow-core/src/core/integrity.rs
// ============================================================================
// Module: Auditflow Integrity Errors
// Description: Tier-1 integrity violations shared across subsystems.
// Purpose: Provide one propagating error type for audit-fatal conditions.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Tier-1 integrity violations abort the run: a corrupt payload, a missing
//! foreign key, invalid canonical JSON, or a schema-incompatible store on
//! open. They propagate to the caller unchanged; nothing downgrades them to
//! warnings.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// SECTION: Integrity Errors
// ============================================================================

/// Tier-1 audit integrity violation.
#[derive(Debug, Error)]
pub enum IntegrityError {
    /// A stored payload failed its digest check or decoded to garbage.
    #[error("corrupt payload: {0}")]
    CorruptPayload(String),
    /// A write violated (or a schema lacked) a required foreign key.
    #[error("foreign key integrity violation: {0}")]
    ForeignKey(String),
    /// A value could not be canonicalized for hashing.
    #[error("invalid canonical json: {0}")]
    InvalidCanonicalJson(String),
    /// The store schema is incompatible with this build.
    #[error("schema incompatible at {path}: {detail}; {remediation}")]
    SchemaIncompatible {
        /// Database path or URL.
        path: String,
        /// What is wrong.
        detail: String,
        /// Actionable remediation text.
        remediation: String,
    },
}
