// auditflow-engine/src/pool.rs
// ============================================================================
// Module: Pooled Executor
// Description: Bounded worker pool with AIMD capacity backoff.
// Purpose: Dispatch per-row work under a semaphore without deadlocking.
// Dependencies: auditflow-core, serde_json, std::sync, std::thread
// ============================================================================

//! ## Overview
//! The pooled executor runs a batch of rows under a semaphore of `pool_size`
//! permits. The permit is acquired *inside* the worker, never in the
//! submitting thread, so a pool of size k handling n > k rows whose
//! workers hit capacity errors and release the permit to back off cannot
//! deadlock on queued but unpermitted work.
//!
//! Capacity errors (429/529-class) drive an AIMD throttle: the
//! inter-dispatch delay grows multiplicatively on each capacity error and
//! recovers additively on success. The semaphore permit is released during
//! every backoff sleep. A wall-clock retry budget caps the total window per
//! row; exhausting it yields a `capacity_retry_timeout` error result.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Condvar;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use auditflow_core::PoolSettings;
use auditflow_core::StateId;
use auditflow_core::TransformResult;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Semaphore
// ============================================================================

/// Counting semaphore over a mutex and condvar.
#[derive(Debug)]
struct Semaphore {
    /// Available permits.
    permits: Mutex<usize>,
    /// Signaled on release.
    released: Condvar,
}

impl Semaphore {
    /// Creates a semaphore with the given permits.
    const fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            released: Condvar::new(),
        }
    }

    /// Acquires one permit, blocking until available.
    fn acquire(&self) {
        let Ok(mut permits) = self.permits.lock() else {
            return;
        };
        while *permits == 0 {
            let Ok(guard) = self.released.wait(permits) else {
                return;
            };
            permits = guard;
        }
        *permits -= 1;
    }

    /// Releases one permit.
    fn release(&self) {
        if let Ok(mut permits) = self.permits.lock() {
            *permits += 1;
        }
        self.released.notify_one();
    }
}

// ============================================================================
// SECTION: Throttle
// ============================================================================

/// AIMD throttle state.
#[derive(Debug, Clone, Copy)]
struct ThrottleState {
    /// Current inter-dispatch delay in milliseconds.
    current_delay_ms: f64,
    /// Highest delay reached.
    peak_delay_ms: f64,
    /// Capacity errors observed.
    capacity_errors: u64,
}

/// AIMD dispatch throttle shared by every worker in the pool.
#[derive(Debug)]
struct Throttle {
    /// Pool settings driving the arithmetic.
    settings: PoolSettings,
    /// Mutable throttle state.
    state: Mutex<ThrottleState>,
}

impl Throttle {
    /// Creates a throttle at the minimum delay.
    fn new(settings: PoolSettings) -> Self {
        let initial = to_f64(settings.min_dispatch_delay_ms);
        Self {
            settings,
            state: Mutex::new(ThrottleState {
                current_delay_ms: initial,
                peak_delay_ms: initial,
                capacity_errors: 0,
            }),
        }
    }

    /// Returns the current inter-dispatch delay.
    fn current_delay(&self) -> Duration {
        self.state
            .lock()
            .map(|state| Duration::from_millis(to_millis(state.current_delay_ms)))
            .unwrap_or_default()
    }

    /// Multiplicative increase on a capacity error.
    fn on_capacity_error(&self) {
        if let Ok(mut state) = self.state.lock() {
            let floor = to_f64(self.settings.min_dispatch_delay_ms).max(1.0);
            let grown = state.current_delay_ms.max(floor) * self.settings.backoff_multiplier;
            state.current_delay_ms = grown.min(to_f64(self.settings.max_dispatch_delay_ms));
            state.peak_delay_ms = state.peak_delay_ms.max(state.current_delay_ms);
            state.capacity_errors += 1;
        }
    }

    /// Additive decrease on success.
    fn on_success(&self) {
        if let Ok(mut state) = self.state.lock() {
            let floor = to_f64(self.settings.min_dispatch_delay_ms);
            state.current_delay_ms =
                (state.current_delay_ms - to_f64(self.settings.recovery_step_ms)).max(floor);
        }
    }

    /// Returns observable throttle statistics.
    fn stats(&self) -> ThrottleStats {
        self.state
            .lock()
            .map(|state| ThrottleStats {
                current_delay_ms: state.current_delay_ms,
                peak_delay_ms: state.peak_delay_ms,
                capacity_errors: state.capacity_errors,
            })
            .unwrap_or(ThrottleStats {
                current_delay_ms: 0.0,
                peak_delay_ms: 0.0,
                capacity_errors: 0,
            })
    }
}

/// Observable throttle statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleStats {
    /// Current inter-dispatch delay in milliseconds.
    pub current_delay_ms: f64,
    /// Highest delay reached.
    pub peak_delay_ms: f64,
    /// Capacity errors observed.
    pub capacity_errors: u64,
}

// ============================================================================
// SECTION: Pooled Executor
// ============================================================================

/// Bounded worker pool with AIMD capacity handling.
#[derive(Debug)]
pub struct PooledExecutor {
    /// Pool settings.
    settings: PoolSettings,
    /// Dispatch semaphore; permits == `pool_size`.
    semaphore: Semaphore,
    /// Shared AIMD throttle.
    throttle: Throttle,
}

impl PooledExecutor {
    /// Creates an executor from pool settings.
    #[must_use]
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            semaphore: Semaphore::new(settings.pool_size),
            throttle: Throttle::new(settings.clone()),
            settings,
        }
    }

    /// Returns the pool settings.
    #[must_use]
    pub const fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Returns throttle statistics.
    #[must_use]
    pub fn throttle_stats(&self) -> ThrottleStats {
        self.throttle.stats()
    }

    /// Executes a batch of rows, returning results in submission order.
    ///
    /// One thread is spawned per row; each acquires the semaphore inside the
    /// worker and runs the capacity retry loop. Capacity errors release the
    /// permit during backoff so other workers progress; exhausting the retry
    /// budget yields a `capacity_retry_timeout` error result for that row.
    pub fn execute_batch<F>(&self, rows: Vec<(Value, StateId)>, process: F) -> Vec<TransformResult>
    where
        F: Fn(&Value, &StateId) -> TransformResult + Send + Sync,
    {
        let count = rows.len();
        let mut results: Vec<Option<TransformResult>> = Vec::with_capacity(count);
        results.resize_with(count, || None);
        let slots = Mutex::new(results);

        thread::scope(|scope| {
            for (index, (row, state_id)) in rows.into_iter().enumerate() {
                let slots = &slots;
                let process = &process;
                scope.spawn(move || {
                    let result = self.run_row(&row, &state_id, process);
                    if let Ok(mut slots) = slots.lock() {
                        slots[index] = Some(result);
                    }
                });
            }
        });

        slots
            .into_inner()
            .unwrap_or_default()
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    TransformResult::error(json!({"reason": "worker_lost"}), false)
                })
            })
            .collect()
    }

    /// Runs one row through the capacity retry loop.
    fn run_row<F>(&self, row: &Value, state_id: &StateId, process: &F) -> TransformResult
    where
        F: Fn(&Value, &StateId) -> TransformResult,
    {
        let deadline =
            Instant::now() + Duration::from_secs(self.settings.max_capacity_retry_seconds);
        loop {
            self.semaphore.acquire();
            let delay = self.throttle.current_delay();
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            let result = process(row, state_id);
            if is_capacity_error(&result) {
                self.throttle.on_capacity_error();
                // Release the permit for the whole backoff sleep so other
                // workers can dispatch.
                self.semaphore.release();
                if Instant::now() >= deadline {
                    return TransformResult::error(
                        json!({
                            "reason": "capacity_retry_timeout",
                            "budget_seconds": self.settings.max_capacity_retry_seconds,
                        }),
                        false,
                    );
                }
                thread::sleep(self.throttle.current_delay());
                continue;
            }
            self.throttle.on_success();
            self.semaphore.release();
            return result;
        }
    }
}

// ============================================================================
// SECTION: Classification
// ============================================================================

/// Returns true for retryable capacity-class (429/529) error results.
fn is_capacity_error(result: &TransformResult) -> bool {
    match result {
        TransformResult::Error {
            reason,
            retryable: true,
        } => reason.get("category").and_then(Value::as_str) == Some("capacity"),
        TransformResult::Error {
            ..
        }
        | TransformResult::Success {
            ..
        } => false,
    }
}

// ============================================================================
// SECTION: Conversions
// ============================================================================

/// Converts a millisecond setting to f64 for AIMD arithmetic.
///
/// Delays are bounded by configuration; precision loss past 2^52 ms is not
/// reachable.
#[allow(clippy::cast_precision_loss, reason = "Delay values are far below 2^52 ms.")]
const fn to_f64(millis: u64) -> f64 {
    millis as f64
}

/// Converts AIMD arithmetic back to whole milliseconds.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "Clamped to the non-negative finite range first."
)]
fn to_millis(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}
