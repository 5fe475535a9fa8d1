// auditflow-core/src/core/time.rs
// ============================================================================
// Module: Auditflow Time Model
// Description: Canonical UTC timestamps for audit records.
// Purpose: Provide a single, serializable time representation for all writes.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every audit write records its creation time as UTC unix milliseconds. The
//! recorder reads the wall clock exactly once per write; everything else
//! treats timestamps as opaque ordered values so replay stays deterministic.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// UTC timestamp in unix epoch milliseconds.
///
/// # Invariants
/// - Values are non-decreasing within a single recorder write sequence only
///   as far as the host clock is; ordering contracts always tie-break on
///   identifiers rather than trusting the clock alone.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Self(i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }
}
