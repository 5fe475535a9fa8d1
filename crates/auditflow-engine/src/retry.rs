// auditflow-engine/src/retry.rs
// ============================================================================
// Module: Retry Policy
// Description: Exponential backoff with internal jitter.
// Purpose: Time retry attempts for retryable transform errors.
// Dependencies: auditflow-core, rand
// ============================================================================

//! ## Overview
//! Delays grow as `initial * base^(attempt - 1)`, capped at the configured
//! maximum, with full jitter applied internally (callers configure only the
//! curve). Attempt numbers start at 1; the first retry follows attempt 1.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use auditflow_core::RetrySettings;
use rand::Rng;

// ============================================================================
// SECTION: Retry Policy
// ============================================================================

/// Exponential backoff retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retry settings.
    settings: RetrySettings,
}

impl RetryPolicy {
    /// Creates a policy from settings.
    #[must_use]
    pub const fn new(settings: RetrySettings) -> Self {
        Self {
            settings,
        }
    }

    /// Returns the maximum attempts, including the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.settings.max_attempts
    }

    /// Returns true when another attempt is allowed after `attempt`.
    #[must_use]
    pub const fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.settings.max_attempts
    }

    /// Returns the jittered delay before the attempt following `attempt`.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let raw = self.settings.initial_delay_seconds
            * self.settings.exponential_base.powi(exponent_i32(exponent));
        let capped = raw.min(self.settings.max_delay_seconds);
        // Full jitter keeps concurrent retries from synchronizing.
        let jittered = capped * rand::thread_rng().gen_range(0.5..=1.0);
        if jittered.is_finite() && jittered > 0.0 {
            Duration::from_secs_f64(jittered)
        } else {
            Duration::ZERO
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Clamps an exponent into `powi` range.
fn exponent_i32(exponent: u32) -> i32 {
    i32::try_from(exponent).unwrap_or(i32::MAX)
}
