// auditflow-engine/src/batching.rs
// ============================================================================
// Module: Concurrent Row Driver
// Description: Worker pool + reorder buffer composition for transforms.
// Purpose: Process rows concurrently while emitting results in FIFO order.
// Dependencies: auditflow-core, crate::rrb, std::sync, std::thread
// ============================================================================

//! ## Overview
//! Transforms that opt into concurrency own a driver instead of inheriting
//! one: the driver composes a bounded [`RowReorderBuffer`], a worker pool
//! sized to `max_pending` (workers == `max_pending`, or a starved row can
//! deadlock the FIFO head), and a dedicated release thread that emits
//! completed results in submission order through an [`OutputPort`].
//!
//! Submissions are tracked by `(token_id, state_id)` so a timed-out caller
//! can evict the exact ticket; the originating `state_id` travels with the
//! result so a retry under a fresh state receives only its own result.
//!
//! A panicking processor is a plugin bug: the payload is caught in the
//! worker, carried through the buffer as [`WorkerOutcome::Panicked`], and
//! resumed in the orchestrator thread. Bugs crash the pipeline; they are
//! never converted into row errors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use auditflow_core::StateId;
use auditflow_core::TokenId;
use auditflow_core::TransformResult;

use crate::errors::EngineError;
use crate::rrb::RowReorderBuffer;
use crate::rrb::RowTicket;
use crate::rrb::RrbError;
use crate::tokens::TokenInfo;

// ============================================================================
// SECTION: Worker Outcome
// ============================================================================

/// Transported panic payload from a worker thread.
pub type PanicPayload = Box<dyn Any + Send + 'static>;

/// Result of one worker execution.
#[derive(Debug)]
pub enum WorkerOutcome {
    /// The processor returned a result.
    Result(TransformResult),
    /// The processor panicked; resume this in the orchestrator thread.
    Panicked(PanicPayload),
}

// ============================================================================
// SECTION: Output Port
// ============================================================================

/// Destination for FIFO-ordered results.
///
/// The transform does not know what is downstream: a sink, another
/// transform, or a waiting executor. It just emits to the port.
pub trait OutputPort: Send + Sync {
    /// Receives one result in submission order.
    fn emit(&self, token: TokenInfo, outcome: WorkerOutcome, state_id: Option<StateId>);
}

// ============================================================================
// SECTION: Work Item
// ============================================================================

/// One queued worker job.
struct Job {
    /// Ticket to complete.
    ticket: RowTicket,
    /// Token under processing.
    token: TokenInfo,
    /// Originating state for retry-safe delivery.
    state_id: Option<StateId>,
    /// The processing closure.
    processor: Box<dyn FnOnce() -> TransformResult + Send>,
}

/// Buffer payload: token, outcome, and the originating state.
type Completed = (TokenInfo, WorkerOutcome, Option<StateId>);

// ============================================================================
// SECTION: Driver
// ============================================================================

/// Concurrency driver owned by a batching transform.
pub struct ConcurrentRowDriver {
    /// Reorder buffer with backpressure.
    buffer: Arc<RowReorderBuffer<Completed>>,
    /// Submission tracking for eviction by `(token, state)`.
    submissions: Arc<Mutex<HashMap<(TokenId, StateId), RowTicket>>>,
    /// Job queue feeding the workers.
    jobs: Mutex<Option<mpsc::Sender<Job>>>,
    /// Worker threads.
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Release thread.
    release_thread: Mutex<Option<JoinHandle<()>>>,
    /// Shutdown flag observed by the release loop.
    stopping: Arc<AtomicBool>,
}

impl ConcurrentRowDriver {
    /// Creates a driver with `max_pending` in-flight rows.
    ///
    /// The worker pool is sized to `max_pending` so every pending row has a
    /// worker; results flow to `output` in submission order.
    #[must_use]
    pub fn new(name: &str, max_pending: usize, output: Arc<dyn OutputPort>) -> Self {
        let buffer = Arc::new(RowReorderBuffer::new(max_pending, name));
        let submissions: Arc<Mutex<HashMap<(TokenId, StateId), RowTicket>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let stopping = Arc::new(AtomicBool::new(false));

        let (sender, receiver) = mpsc::channel::<Job>();
        let shared_receiver = Arc::new(Mutex::new(receiver));
        let mut workers = Vec::with_capacity(max_pending.max(1));
        for index in 0..max_pending.max(1) {
            let worker_buffer = Arc::clone(&buffer);
            let worker_receiver = Arc::clone(&shared_receiver);
            let handle = thread::Builder::new()
                .name(format!("{name}-worker-{index}"))
                .spawn(move || worker_loop(&worker_buffer, &worker_receiver))
                .ok();
            if let Some(handle) = handle {
                workers.push(handle);
            }
        }

        let release_buffer = Arc::clone(&buffer);
        let release_submissions = Arc::clone(&submissions);
        let release_stopping = Arc::clone(&stopping);
        let release_thread = thread::Builder::new()
            .name(format!("{name}-release"))
            .spawn(move || {
                release_loop(&release_buffer, &release_submissions, &release_stopping, &output);
            })
            .ok();

        Self {
            buffer,
            submissions,
            jobs: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            release_thread: Mutex::new(release_thread),
            stopping,
        }
    }

    /// Accepts a row for concurrent processing.
    ///
    /// Blocks only on backpressure. The result is emitted through the output
    /// port in submission order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Shutdown`] after shutdown.
    pub fn accept_row(
        &self,
        token: TokenInfo,
        state_id: Option<StateId>,
        processor: impl FnOnce() -> TransformResult + Send + 'static,
    ) -> Result<(), EngineError> {
        let ticket = match self.buffer.submit(token.token_id.as_str()) {
            Ok(ticket) => ticket,
            Err(RrbError::Shutdown) => return Err(EngineError::Shutdown),
            Err(err) => return Err(EngineError::Invariant(err.to_string())),
        };
        if let Some(state_id) = &state_id {
            if let Ok(mut submissions) = self.submissions.lock() {
                submissions.insert((token.token_id.clone(), state_id.clone()), ticket);
            }
        }
        let job = Job {
            ticket,
            token,
            state_id,
            processor: Box::new(processor),
        };
        let sender = self.jobs.lock().map_err(|_| EngineError::Shutdown)?;
        match sender.as_ref() {
            Some(sender) => sender.send(job).map_err(|_| EngineError::Shutdown),
            None => Err(EngineError::Shutdown),
        }
    }

    /// Evicts a tracked submission so a retry can proceed.
    ///
    /// Returns true when the entry existed and was evicted. A worker that
    /// later completes the evicted ticket gets not-found from the buffer and
    /// discards the result.
    #[must_use]
    pub fn evict_submission(&self, token_id: &TokenId, state_id: &StateId) -> bool {
        let ticket = self
            .submissions
            .lock()
            .ok()
            .and_then(|mut submissions| submissions.remove(&(token_id.clone(), state_id.clone())));
        ticket.is_some_and(|ticket| self.buffer.evict(ticket))
    }

    /// Returns the number of rows in flight.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.buffer.pending_count()
    }

    /// Waits until every pending row has been released.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Timeout`] when rows are still pending at the
    /// deadline.
    pub fn flush(&self, timeout: Duration) -> Result<(), EngineError> {
        let deadline = Instant::now() + timeout;
        while self.buffer.pending_count() > 0 {
            if Instant::now() >= deadline {
                return Err(EngineError::Timeout(format!(
                    "flush timeout: {} rows still pending",
                    self.buffer.pending_count()
                )));
            }
            thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    }

    /// Shuts the driver down: workers finish current jobs, the buffer wakes
    /// the release thread with a terminal error, and both are joined.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        if let Ok(mut sender) = self.jobs.lock() {
            // Dropping the sender lets workers drain and exit.
            sender.take();
        }
        if let Ok(mut workers) = self.workers.lock() {
            for handle in workers.drain(..) {
                let _ = handle.join();
            }
        }
        self.buffer.shutdown();
        if let Ok(mut release) = self.release_thread.lock() {
            if let Some(handle) = release.take() {
                let _ = handle.join();
            }
        }
        if let Ok(mut submissions) = self.submissions.lock() {
            submissions.clear();
        }
    }
}

impl std::fmt::Debug for ConcurrentRowDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentRowDriver")
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Worker Loop
// ============================================================================

/// Worker thread body: run jobs, complete tickets, transport panics.
fn worker_loop(
    buffer: &RowReorderBuffer<Completed>,
    receiver: &Mutex<mpsc::Receiver<Job>>,
) {
    loop {
        let job = {
            let Ok(guard) = receiver.lock() else {
                return;
            };
            guard.recv()
        };
        let Ok(job) = job else {
            // Channel closed: shutdown.
            return;
        };
        let outcome = match catch_unwind(AssertUnwindSafe(job.processor)) {
            Ok(result) => WorkerOutcome::Result(result),
            Err(payload) => WorkerOutcome::Panicked(payload),
        };
        // Not-found means the ticket was evicted after a timeout; the late
        // result is discarded by discipline.
        let _ = buffer.complete(job.ticket, (job.token, outcome, job.state_id));
    }
}

// ============================================================================
// SECTION: Release Loop
// ============================================================================

/// Poll interval for the release loop's shutdown check.
const RELEASE_POLL: Duration = Duration::from_millis(200);

/// Release thread body: emit results in FIFO order to the output port.
fn release_loop(
    buffer: &RowReorderBuffer<Completed>,
    submissions: &Mutex<HashMap<(TokenId, StateId), RowTicket>>,
    stopping: &AtomicBool,
    output: &Arc<dyn OutputPort>,
) {
    while !stopping.load(Ordering::Acquire) {
        match buffer.wait_for_next_release(RELEASE_POLL) {
            Ok(entry) => {
                let (token, outcome, state_id) = entry.result;
                // Clean up tracking before emit so an emit-side wait cannot
                // race a stale eviction entry.
                if let Some(state_id) = &state_id {
                    if let Ok(mut submissions) = submissions.lock() {
                        submissions.remove(&(token.token_id.clone(), state_id.clone()));
                    }
                }
                output.emit(token, outcome, state_id);
            }
            Err(RrbError::Timeout) => {}
            Err(_) => return,
        }
    }
}
