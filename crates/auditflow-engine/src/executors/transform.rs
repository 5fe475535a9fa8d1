// auditflow-engine/src/executors/transform.rs
// ============================================================================
// Module: Transform Executor
// Description: Runs transforms with retries and audit recording.
// Purpose: Wrap transform calls in node-state lifecycle; crash on bugs.
// Dependencies: auditflow-core, auditflow-landscape, crate::{batch_adapter,
// batching, retry, tokens}
// ============================================================================

//! ## Overview
//! Each attempt opens a fresh node state; retries receive a new `state_id`
//! so buffered delivery lines up with the current attempt. Expected failures
//! arrive as `TransformResult::Error` and follow the retry policy; a
//! panicking plugin has its state recorded `Failed` and the panic resumed in
//! the calling thread. Plugin bugs crash; they never silently convert to
//! errors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::panic::resume_unwind;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use auditflow_core::NodeId;
use auditflow_core::NodeStateStatus;
use auditflow_core::PluginContext;
use auditflow_core::RunId;
use auditflow_core::TransformPlugin;
use auditflow_core::TransformResult;
use auditflow_landscape::LandscapeRecorder;
use serde_json::Value;
use serde_json::json;

use crate::batch_adapter::AdapterWaitError;
use crate::batch_adapter::SharedBatchAdapter;
use crate::batching::ConcurrentRowDriver;
use crate::batching::WorkerOutcome;
use crate::errors::EngineError;
use crate::retry::RetryPolicy;
use crate::tokens::TokenInfo;

// ============================================================================
// SECTION: Execution Result
// ============================================================================

/// Terminal result of executing one token through a transform.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformExecution {
    /// The transform produced a row; the token advances.
    Completed(TokenInfo),
    /// The transform failed terminally (non-retryable or retries exhausted).
    Failed {
        /// Structured failure reason.
        reason: Value,
    },
}

/// Delivery payload routed through the shared batch adapter.
pub type BufferedDelivery = (TokenInfo, WorkerOutcome);

// ============================================================================
// SECTION: Transform Executor
// ============================================================================

/// Executes transform nodes.
#[derive(Debug)]
pub struct TransformExecutor {
    /// Recorder for states and transform errors.
    recorder: LandscapeRecorder,
    /// Owning run.
    run_id: RunId,
    /// Retry policy for retryable errors.
    retry: RetryPolicy,
}

impl TransformExecutor {
    /// Creates a transform executor.
    #[must_use]
    pub const fn new(recorder: LandscapeRecorder, run_id: RunId, retry: RetryPolicy) -> Self {
        Self {
            recorder,
            run_id,
            retry,
        }
    }

    /// Executes a transform synchronously with retries.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when audit writes fail. Plugin panics are
    /// resumed in this thread after the state is recorded `Failed`.
    pub fn execute(
        &self,
        transform: &dyn TransformPlugin,
        node_id: &NodeId,
        step_index: u32,
        token: &TokenInfo,
        ctx: &PluginContext,
    ) -> Result<TransformExecution, EngineError> {
        let mut attempt: u32 = 1;
        loop {
            let state = self.recorder.begin_node_state(
                &token.token_id,
                node_id,
                &self.run_id,
                step_index,
                attempt,
                &token.row_data,
            )?;
            let state_ctx = ctx.with_state(state.state_id.clone());
            let started = Instant::now();
            let outcome =
                catch_unwind(AssertUnwindSafe(|| transform.process(&token.row_data, &state_ctx)));
            let duration_ms = duration_ms(started);
            match outcome {
                Err(payload) => {
                    self.recorder.complete_node_state(
                        &state.state_id,
                        NodeStateStatus::Failed,
                        None,
                        Some(duration_ms),
                        Some(&json!({"exception": "plugin panic", "type": "PluginPanic"})),
                    )?;
                    resume_unwind(payload);
                }
                Ok(TransformResult::Success {
                    row,
                    reason: _,
                }) => {
                    self.recorder.complete_node_state(
                        &state.state_id,
                        NodeStateStatus::Completed,
                        Some(&row),
                        Some(duration_ms),
                        None,
                    )?;
                    return Ok(TransformExecution::Completed(token.with_updated_data(row)));
                }
                Ok(TransformResult::Error {
                    reason,
                    retryable,
                }) => {
                    self.recorder.record_transform_error(
                        &self.run_id,
                        &state.state_id,
                        &token.token_id,
                        &reason,
                        retryable,
                    )?;
                    self.recorder.complete_node_state(
                        &state.state_id,
                        NodeStateStatus::Failed,
                        None,
                        Some(duration_ms),
                        Some(&reason),
                    )?;
                    if retryable && self.retry.allows_retry(attempt) {
                        std::thread::sleep(self.retry.delay_after(attempt));
                        attempt += 1;
                        continue;
                    }
                    return Ok(TransformExecution::Failed {
                        reason,
                    });
                }
            }
        }
    }

    /// Executes a batching transform through its driver and adapter.
    ///
    /// Each attempt registers a waiter under the attempt's fresh `state_id`
    /// before submitting, so a late result from a timed-out attempt can
    /// never be delivered to the retry. A timeout evicts the exact ticket
    /// and retries under the policy.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when audit writes or the driver fail. Plugin
    /// panics are resumed in this thread after the state is recorded
    /// `Failed`.
    #[allow(clippy::too_many_lines, reason = "One attempt loop mirroring the sync path.")]
    pub fn execute_buffered(
        &self,
        transform: &Arc<dyn TransformPlugin>,
        driver: &ConcurrentRowDriver,
        adapter: &SharedBatchAdapter<BufferedDelivery>,
        node_id: &NodeId,
        step_index: u32,
        token: &TokenInfo,
        ctx: &PluginContext,
        wait_timeout: Duration,
    ) -> Result<TransformExecution, EngineError> {
        let mut attempt: u32 = 1;
        loop {
            let state = self.recorder.begin_node_state(
                &token.token_id,
                node_id,
                &self.run_id,
                step_index,
                attempt,
                &token.row_data,
            )?;
            let state_ctx = ctx.with_state(state.state_id.clone());
            let waiter = adapter.register(&token.token_id, &state.state_id);
            let worker_transform = Arc::clone(transform);
            let worker_row = token.row_data.clone();
            let worker_ctx = state_ctx.clone();
            let started = Instant::now();
            driver.accept_row(token.clone(), Some(state.state_id.clone()), move || {
                worker_transform.process(&worker_row, &worker_ctx)
            })?;

            match waiter.wait(wait_timeout) {
                Ok((_, WorkerOutcome::Panicked(payload))) => {
                    self.recorder.complete_node_state(
                        &state.state_id,
                        NodeStateStatus::Failed,
                        None,
                        Some(duration_ms(started)),
                        Some(&json!({"exception": "plugin panic", "type": "PluginPanic"})),
                    )?;
                    resume_unwind(payload);
                }
                Ok((_, WorkerOutcome::Result(TransformResult::Success {
                    row,
                    reason: _,
                }))) => {
                    self.recorder.complete_node_state(
                        &state.state_id,
                        NodeStateStatus::Completed,
                        Some(&row),
                        Some(duration_ms(started)),
                        None,
                    )?;
                    return Ok(TransformExecution::Completed(token.with_updated_data(row)));
                }
                Ok((_, WorkerOutcome::Result(TransformResult::Error {
                    reason,
                    retryable,
                }))) => {
                    self.recorder.record_transform_error(
                        &self.run_id,
                        &state.state_id,
                        &token.token_id,
                        &reason,
                        retryable,
                    )?;
                    self.recorder.complete_node_state(
                        &state.state_id,
                        NodeStateStatus::Failed,
                        None,
                        Some(duration_ms(started)),
                        Some(&reason),
                    )?;
                    if retryable && self.retry.allows_retry(attempt) {
                        std::thread::sleep(self.retry.delay_after(attempt));
                        attempt += 1;
                        continue;
                    }
                    return Ok(TransformExecution::Failed {
                        reason,
                    });
                }
                Err(AdapterWaitError::Timeout {
                    ..
                }) => {
                    // Evict the exact ticket so the FIFO head cannot stall;
                    // a late completion is discarded by the buffer.
                    let _ = driver.evict_submission(&token.token_id, &state.state_id);
                    let reason = json!({"reason": "row_wait_timeout", "attempt": attempt});
                    self.recorder.record_transform_error(
                        &self.run_id,
                        &state.state_id,
                        &token.token_id,
                        &reason,
                        true,
                    )?;
                    self.recorder.complete_node_state(
                        &state.state_id,
                        NodeStateStatus::Failed,
                        None,
                        Some(duration_ms(started)),
                        Some(&reason),
                    )?;
                    if self.retry.allows_retry(attempt) {
                        attempt += 1;
                        continue;
                    }
                    return Ok(TransformExecution::Failed {
                        reason,
                    });
                }
                Err(AdapterWaitError::Poisoned) => {
                    return Err(EngineError::Invariant(
                        "batch adapter poisoned while awaiting a result".to_string(),
                    ));
                }
            }
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns elapsed wall-clock milliseconds.
fn duration_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1_000.0
}
