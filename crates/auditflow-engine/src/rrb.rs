// auditflow-engine/src/rrb.rs
// ============================================================================
// Module: Row Reorder Buffer
// Description: Bounded FIFO multiplexer with submission-order release.
// Purpose: Run transforms concurrently while releasing results in order.
// Dependencies: std::sync
// ============================================================================

//! ## Overview
//! The buffer hands out monotonically numbered tickets on `submit`, blocking
//! once `max_pending` entries are outstanding (backpressure). Workers
//! `complete` tickets in any order; `wait_for_next_release` returns entries
//! strictly in submission order. `evict` removes an outstanding entry so a
//! timed-out attempt cannot block the FIFO head; a worker completing an
//! evicted ticket gets a not-found error and discards its result. `shutdown`
//! wakes every waiter with a terminal error and empties the buffer.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Row reorder buffer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RrbError {
    /// The awaited condition did not occur within the timeout.
    #[error("row reorder buffer timeout")]
    Timeout,
    /// The buffer was shut down; no further work will be released.
    #[error("row reorder buffer shut down")]
    Shutdown,
    /// The ticket is unknown (already released or evicted).
    #[error("ticket {0} not found (released or evicted)")]
    TicketNotFound(u64),
    /// The buffer state is internally inconsistent.
    #[error("row reorder buffer poisoned")]
    Poisoned,
}

// ============================================================================
// SECTION: Ticket
// ============================================================================

/// Ticket for one submitted row; carries the monotonic sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowTicket {
    /// Monotonic submission sequence number.
    seq: u64,
}

impl RowTicket {
    /// Returns the submission sequence number.
    #[must_use]
    pub const fn seq(self) -> u64 {
        self.seq
    }
}

/// One released entry: the ticket and the completed result.
#[derive(Debug)]
pub struct ReleaseEntry<T> {
    /// Ticket of the released submission.
    pub ticket: RowTicket,
    /// Identifier provided at submission time.
    pub row_id: String,
    /// Completed result.
    pub result: T,
}

// ============================================================================
// SECTION: Metrics
// ============================================================================

/// Counters exposed for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RrbMetrics {
    /// Rows submitted.
    pub submitted: u64,
    /// Rows released in order.
    pub released: u64,
    /// Rows evicted before release.
    pub evicted: u64,
    /// Completions discarded because the ticket was gone.
    pub discarded: u64,
}

// ============================================================================
// SECTION: State
// ============================================================================

/// One in-flight entry.
struct Slot<T> {
    /// Identifier provided at submission time.
    row_id: String,
    /// Completed result, when the worker has finished.
    result: Option<T>,
}

/// Buffer state behind the mutex.
struct State<T> {
    /// In-flight entries keyed by sequence number.
    entries: BTreeMap<u64, Slot<T>>,
    /// Next sequence number to hand out.
    next_seq: u64,
    /// Whether the buffer is shut down.
    shutdown: bool,
    /// Counters.
    metrics: RrbMetrics,
}

// ============================================================================
// SECTION: Buffer
// ============================================================================

/// Bounded row reorder buffer.
pub struct RowReorderBuffer<T> {
    /// Backpressure threshold.
    max_pending: usize,
    /// Name for diagnostics.
    name: String,
    /// Buffer state.
    state: Mutex<State<T>>,
    /// Signaled when capacity frees up (submit waits here).
    space_available: Condvar,
    /// Signaled when the FIFO head may be releasable.
    release_ready: Condvar,
}

impl<T> RowReorderBuffer<T> {
    /// Creates a buffer with the given backpressure threshold.
    ///
    /// # Panics
    ///
    /// Never panics; a zero `max_pending` is clamped to one.
    #[must_use]
    pub fn new(max_pending: usize, name: impl Into<String>) -> Self {
        Self {
            max_pending: max_pending.max(1),
            name: name.into(),
            state: Mutex::new(State {
                entries: BTreeMap::new(),
                next_seq: 0,
                shutdown: false,
                metrics: RrbMetrics::default(),
            }),
            space_available: Condvar::new(),
            release_ready: Condvar::new(),
        }
    }

    /// Returns the buffer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Submits a row, blocking while `max_pending` entries are outstanding.
    ///
    /// # Errors
    ///
    /// Returns [`RrbError::Shutdown`] when the buffer shuts down while
    /// waiting.
    pub fn submit(&self, row_id: impl Into<String>) -> Result<RowTicket, RrbError> {
        let mut state = self.state.lock().map_err(|_| RrbError::Poisoned)?;
        while !state.shutdown && state.entries.len() >= self.max_pending {
            state = self.space_available.wait(state).map_err(|_| RrbError::Poisoned)?;
        }
        if state.shutdown {
            return Err(RrbError::Shutdown);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            seq,
            Slot {
                row_id: row_id.into(),
                result: None,
            },
        );
        state.metrics.submitted += 1;
        Ok(RowTicket {
            seq,
        })
    }

    /// Completes a ticket with its result; may arrive out of order.
    ///
    /// # Errors
    ///
    /// Returns [`RrbError::TicketNotFound`] when the ticket was evicted or
    /// already released; workers discard their result in that case.
    pub fn complete(&self, ticket: RowTicket, result: T) -> Result<(), RrbError> {
        let mut state = self.state.lock().map_err(|_| RrbError::Poisoned)?;
        if state.shutdown {
            return Err(RrbError::Shutdown);
        }
        let Some(slot) = state.entries.get_mut(&ticket.seq) else {
            state.metrics.discarded += 1;
            return Err(RrbError::TicketNotFound(ticket.seq));
        };
        slot.result = Some(result);
        // Only a completed FIFO head is releasable; cheaper to always signal.
        self.release_ready.notify_all();
        Ok(())
    }

    /// Waits for the next entry in submission order.
    ///
    /// # Errors
    ///
    /// Returns [`RrbError::Timeout`] when no entry becomes releasable in
    /// time and [`RrbError::Shutdown`] when the buffer shuts down.
    pub fn wait_for_next_release(&self, timeout: Duration) -> Result<ReleaseEntry<T>, RrbError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().map_err(|_| RrbError::Poisoned)?;
        loop {
            if state.shutdown {
                return Err(RrbError::Shutdown);
            }
            let head_complete = state
                .entries
                .first_key_value()
                .is_some_and(|(_, slot)| slot.result.is_some());
            if head_complete {
                let Some((seq, slot)) = state.entries.pop_first() else {
                    return Err(RrbError::Poisoned);
                };
                let Some(result) = slot.result else {
                    return Err(RrbError::Poisoned);
                };
                state.metrics.released += 1;
                self.space_available.notify_all();
                return Ok(ReleaseEntry {
                    ticket: RowTicket {
                        seq,
                    },
                    row_id: slot.row_id,
                    result,
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(RrbError::Timeout);
            }
            let (guard, _) = self
                .release_ready
                .wait_timeout(state, deadline - now)
                .map_err(|_| RrbError::Poisoned)?;
            state = guard;
        }
    }

    /// Evicts an outstanding entry without releasing it.
    ///
    /// Returns true when the entry existed. A later `complete` for the
    /// evicted ticket returns not-found and the worker discards the result.
    #[must_use]
    pub fn evict(&self, ticket: RowTicket) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        let existed = state.entries.remove(&ticket.seq).is_some();
        if existed {
            state.metrics.evicted += 1;
            // The eviction may have exposed a completed head and freed space.
            self.release_ready.notify_all();
            self.space_available.notify_all();
        }
        existed
    }

    /// Returns the number of outstanding entries.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.lock().map(|state| state.entries.len()).unwrap_or(0)
    }

    /// Returns buffer counters.
    #[must_use]
    pub fn metrics(&self) -> RrbMetrics {
        self.state.lock().map(|state| state.metrics).unwrap_or_default()
    }

    /// Shuts the buffer down: empties it and wakes every waiter with a
    /// terminal error.
    pub fn shutdown(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.shutdown = true;
            state.entries.clear();
        }
        self.release_ready.notify_all();
        self.space_available.notify_all();
    }
}

impl<T> std::fmt::Debug for RowReorderBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowReorderBuffer")
            .field("name", &self.name)
            .field("max_pending", &self.max_pending)
            .finish_non_exhaustive()
    }
}
