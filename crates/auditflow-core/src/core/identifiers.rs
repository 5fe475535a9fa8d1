// auditflow-core/src/core/identifiers.rs
// ============================================================================
// Module: Auditflow Identifiers
// Description: Canonical opaque identifiers for audit entities.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: rand, serde
// ============================================================================

//! ## Overview
//! This module defines the canonical string-based identifiers used throughout
//! Auditflow. Identifiers are opaque 32-character lowercase hex strings and
//! serialize as plain strings. Minting draws 16 random bytes; callers that
//! replay recorded runs construct identifiers from stored strings instead.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use rand::RngCore;
use serde::Deserialize;
use serde::Serialize;

use crate::core::hashing::hex_encode;

// ============================================================================
// SECTION: Minting
// ============================================================================

/// Number of random bytes behind a minted identifier.
const ID_BYTES: usize = 16;

/// Mints a fresh opaque identifier as 32 lowercase hex characters.
#[must_use]
pub fn mint_hex_id() -> String {
    let mut bytes = [0u8; ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

/// Declares an opaque string identifier newtype.
macro_rules! string_identifier {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from an existing string form.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Mints a fresh random identifier.
            #[must_use]
            pub fn mint() -> Self {
                Self(mint_hex_id())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

string_identifier! {
    /// Run identifier; root of all audit data.
    RunId
}

string_identifier! {
    /// Node identifier; one per graph vertex per run.
    NodeId
}

string_identifier! {
    /// Edge identifier; one per directed labeled edge per run.
    EdgeId
}

string_identifier! {
    /// Row identifier; one per source input record.
    RowId
}

string_identifier! {
    /// Token identifier; the moving unit of work.
    TokenId
}

string_identifier! {
    /// Node state identifier; one per (token, node, attempt).
    StateId
}

string_identifier! {
    /// Routing event identifier.
    EventId
}

string_identifier! {
    /// External call identifier.
    CallId
}

string_identifier! {
    /// Token outcome identifier.
    OutcomeId
}

string_identifier! {
    /// Aggregation batch identifier.
    BatchId
}

string_identifier! {
    /// Checkpoint identifier.
    CheckpointId
}

string_identifier! {
    /// Recorded error identifier (validation and transform errors).
    ErrorId
}

string_identifier! {
    /// Lineage group identifier shared by tokens minted together.
    ///
    /// # Invariants
    /// - A fork, coalesce, or expand operation mints exactly one group id and
    ///   stamps it on every token it creates.
    GroupId
}
