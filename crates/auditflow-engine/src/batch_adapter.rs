// auditflow-engine/src/batch_adapter.rs
// ============================================================================
// Module: Shared Batch Adapter
// Description: Retry-safe result multiplexer keyed by (token, state).
// Purpose: Route each buffered result to the exact attempt awaiting it.
// Dependencies: auditflow-core, std::sync
// ============================================================================

//! ## Overview
//! The adapter maps `(token_id, state_id)` to a waiter. `register` inserts
//! the waiter; `emit` stores the result only if a matching waiter still
//! exists, holding one lock across the check and the write. A waiter's
//! `wait` retrieves and removes the result under the same lock, and on
//! timeout also removes both its waiter entry and any result that raced into
//! the map during the wake window. Without the dual cleanup, an `emit` that
//! beat the timeout by microseconds would leave an orphan result behind
//! (memory leak and stale-delivery risk).
//!
//! Retry safety falls out of the key: a retry registers under a fresh
//! `state_id`, so a late first-attempt result can never be delivered to it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use auditflow_core::StateId;
use auditflow_core::TokenId;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Waiter wait failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterWaitError {
    /// No result arrived within the timeout.
    #[error("no result received for ({token_id}, {state_id}) within the timeout")]
    Timeout {
        /// Token key component.
        token_id: TokenId,
        /// State key component.
        state_id: StateId,
    },
    /// The adapter lock was poisoned.
    #[error("batch adapter poisoned")]
    Poisoned,
}

// ============================================================================
// SECTION: State
// ============================================================================

/// Adapter key: one attempt of one token.
type Key = (TokenId, StateId);

/// Map state behind the adapter lock.
struct AdapterState<T> {
    /// Registered waiters; presence gates result storage.
    waiters: HashMap<Key, ()>,
    /// Deposited results awaiting retrieval.
    results: HashMap<Key, T>,
}

/// Shared interior.
struct Inner<T> {
    /// Waiter and result maps under one lock.
    state: Mutex<AdapterState<T>>,
    /// Broadcast on every deposit.
    delivered: Condvar,
}

// ============================================================================
// SECTION: Adapter
// ============================================================================

/// Retry-safe result multiplexer.
pub struct SharedBatchAdapter<T> {
    /// Shared interior.
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SharedBatchAdapter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for SharedBatchAdapter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SharedBatchAdapter<T> {
    /// Creates an empty adapter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(AdapterState {
                    waiters: HashMap::new(),
                    results: HashMap::new(),
                }),
                delivered: Condvar::new(),
            }),
        }
    }

    /// Registers a waiter for `(token_id, state_id)`.
    #[must_use]
    pub fn register(&self, token_id: &TokenId, state_id: &StateId) -> Waiter<T> {
        if let Ok(mut state) = self.inner.state.lock() {
            state.waiters.insert((token_id.clone(), state_id.clone()), ());
        }
        Waiter {
            inner: Arc::clone(&self.inner),
            token_id: token_id.clone(),
            state_id: state_id.clone(),
        }
    }

    /// Deposits a result for `(token_id, state_id)`.
    ///
    /// The result is stored only if a matching waiter still exists; the
    /// check and the write happen under one lock. Results for departed
    /// waiters are silently discarded.
    pub fn emit(&self, token_id: &TokenId, state_id: &StateId, result: T) {
        let key = (token_id.clone(), state_id.clone());
        if let Ok(mut state) = self.inner.state.lock() {
            if state.waiters.contains_key(&key) {
                state.results.insert(key, result);
                self.inner.delivered.notify_all();
            }
        }
    }

    /// Returns the number of registered waiters.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.inner.state.lock().map(|state| state.waiters.len()).unwrap_or(0)
    }

    /// Returns the number of undelivered results.
    #[must_use]
    pub fn result_count(&self) -> usize {
        self.inner.state.lock().map(|state| state.results.len()).unwrap_or(0)
    }

    /// Removes every waiter and result.
    pub fn clear(&self) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.waiters.clear();
            state.results.clear();
        }
        self.inner.delivered.notify_all();
    }
}

impl<T> std::fmt::Debug for SharedBatchAdapter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBatchAdapter").finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Waiter
// ============================================================================

/// Handle awaiting one `(token, state)` result.
pub struct Waiter<T> {
    /// Shared interior.
    inner: Arc<Inner<T>>,
    /// Token key component.
    token_id: TokenId,
    /// State key component.
    state_id: StateId,
}

impl<T> Waiter<T> {
    /// Waits for the result, removing it from the map on delivery.
    ///
    /// On timeout both the waiter entry and any result deposited during the
    /// wake window are removed, leaving no orphan entries behind.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterWaitError::Timeout`] when no result arrives in time.
    pub fn wait(&self, timeout: Duration) -> Result<T, AdapterWaitError> {
        let key = (self.token_id.clone(), self.state_id.clone());
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock().map_err(|_| AdapterWaitError::Poisoned)?;
        loop {
            if let Some(result) = state.results.remove(&key) {
                state.waiters.remove(&key);
                return Ok(result);
            }
            let now = Instant::now();
            if now >= deadline {
                // Dual cleanup: drop the waiter entry AND any result that
                // raced in between the wakeup and this lock acquisition.
                state.waiters.remove(&key);
                state.results.remove(&key);
                return Err(AdapterWaitError::Timeout {
                    token_id: self.token_id.clone(),
                    state_id: self.state_id.clone(),
                });
            }
            let (guard, _) = self
                .inner
                .delivered
                .wait_timeout(state, deadline - now)
                .map_err(|_| AdapterWaitError::Poisoned)?;
            state = guard;
        }
    }
}

impl<T> std::fmt::Debug for Waiter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("token_id", &self.token_id)
            .field("state_id", &self.state_id)
            .finish_non_exhaustive()
    }
}
