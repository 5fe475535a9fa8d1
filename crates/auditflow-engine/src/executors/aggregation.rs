// auditflow-engine/src/executors/aggregation.rs
// ============================================================================
// Module: Aggregation Executor
// Description: Buffers tokens into batches and emits batch results.
// Purpose: Drive the batch status machine and output-mode token creation.
// Dependencies: auditflow-core, auditflow-landscape, crate::tokens
// ============================================================================

//! ## Overview
//! Tokens buffer into a draft batch; count, duration, or an explicit
//! boundary closes it. The `transform` output mode emits a single merged
//! row (one output token whose parents are every member); the rarely used
//! `expand` mode emits one row per member. A failed emit marks the batch
//! `Failed` and can be retried through `retry_batch`, which copies members
//! into a fresh batch with `attempt + 1`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;
use std::time::Instant;

use auditflow_core::AggregationOutputMode;
use auditflow_core::AggregationPlugin;
use auditflow_core::AggregationSettings;
use auditflow_core::BatchRecord;
use auditflow_core::BatchStatus;
use auditflow_core::BatchTrigger;
use auditflow_core::NodeId;
use auditflow_core::NodeStateStatus;
use auditflow_core::PluginContext;
use auditflow_landscape::LandscapeRecorder;
use serde_json::json;

use crate::errors::EngineError;
use crate::tokens::TokenInfo;
use crate::tokens::TokenManager;

// ============================================================================
// SECTION: Open Batch
// ============================================================================

/// One accepting batch with its buffered members.
#[derive(Debug)]
struct OpenBatch {
    /// Batch record in `Draft` status.
    record: BatchRecord,
    /// Buffered member tokens in acceptance order.
    members: Vec<TokenInfo>,
    /// When the batch opened, for duration triggers.
    opened_at: Instant,
}

// ============================================================================
// SECTION: Aggregation Executor
// ============================================================================

/// Executes one aggregation node.
#[derive(Debug)]
pub struct AggregationExecutor {
    /// Recorder for batches and member states.
    recorder: LandscapeRecorder,
    /// Token manager for output lineage.
    token_manager: TokenManager,
    /// Aggregation node identifier.
    node_id: NodeId,
    /// Aggregation settings (triggers and output mode).
    settings: AggregationSettings,
    /// Currently accepting batch, when any.
    open: Option<OpenBatch>,
}

impl AggregationExecutor {
    /// Creates an aggregation executor.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] when the settings are invalid.
    pub fn new(
        recorder: LandscapeRecorder,
        token_manager: TokenManager,
        node_id: NodeId,
        settings: AggregationSettings,
    ) -> Result<Self, EngineError> {
        settings.validate()?;
        Ok(Self {
            recorder,
            token_manager,
            node_id,
            settings,
            open: None,
        })
    }

    /// Accepts a token into the open batch.
    ///
    /// Records a completed node state for the buffered token and closes the
    /// batch when a count or duration trigger fires, returning the output
    /// tokens.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when recording or the plugin fails.
    pub fn accept(
        &mut self,
        plugin: &mut dyn AggregationPlugin,
        token: TokenInfo,
        step_index: u32,
        ctx: &PluginContext,
    ) -> Result<Option<Vec<TokenInfo>>, EngineError> {
        if self.open.is_none() {
            let record =
                self.recorder.create_batch(self.token_manager.run_id(), &self.node_id)?;
            self.open = Some(OpenBatch {
                record,
                members: Vec::new(),
                opened_at: Instant::now(),
            });
        }
        let Some(open) = self.open.as_mut() else {
            return Err(EngineError::Invariant("open batch vanished".to_string()));
        };

        let ordinal = u32::try_from(open.members.len()).unwrap_or(u32::MAX);
        self.recorder.add_batch_member(&open.record.batch_id, &token.token_id, ordinal)?;
        plugin.accept(&token.row_data, ctx).map_err(|err| EngineError::Plugin {
            node_id: self.node_id.clone(),
            message: err.to_string(),
        })?;

        let state = self.recorder.begin_node_state(
            &token.token_id,
            &self.node_id,
            self.token_manager.run_id(),
            step_index,
            1,
            &token.row_data,
        )?;
        self.recorder.complete_node_state(
            &state.state_id,
            NodeStateStatus::Completed,
            Some(&json!({"buffered_into": open.record.batch_id.as_str()})),
            Some(0.0),
            None,
        )?;
        open.members.push(token);

        let count_due =
            self.settings.max_count.is_some_and(|count| open.members.len() >= count);
        let duration_due = self.settings.max_duration_seconds.is_some_and(|seconds| {
            open.opened_at.elapsed() >= Duration::from_secs_f64(seconds.max(0.0))
        });
        if count_due {
            return self.close_batch(plugin, BatchTrigger::Count, step_index, ctx).map(Some);
        }
        if duration_due {
            return self.close_batch(plugin, BatchTrigger::Duration, step_index, ctx).map(Some);
        }
        Ok(None)
    }

    /// Closes the open batch at an explicit boundary (end of source).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the plugin or recording fails.
    pub fn flush(
        &mut self,
        plugin: &mut dyn AggregationPlugin,
        step_index: u32,
        ctx: &PluginContext,
    ) -> Result<Option<Vec<TokenInfo>>, EngineError> {
        if self.open.is_none() {
            return Ok(None);
        }
        self.close_batch(plugin, BatchTrigger::Boundary, step_index, ctx).map(Some)
    }

    /// Executes the batch: emit, status transitions, output tokens.
    fn close_batch(
        &mut self,
        plugin: &mut dyn AggregationPlugin,
        trigger: BatchTrigger,
        step_index: u32,
        ctx: &PluginContext,
    ) -> Result<Vec<TokenInfo>, EngineError> {
        let Some(open) = self.open.take() else {
            return Err(EngineError::Invariant("no open batch to close".to_string()));
        };
        self.recorder.update_batch_status(
            &open.record.batch_id,
            BatchStatus::Executing,
            Some(trigger),
        )?;

        let rows = match plugin.emit(ctx) {
            Ok(rows) => rows,
            Err(err) => {
                self.recorder.update_batch_status(
                    &open.record.batch_id,
                    BatchStatus::Failed,
                    None,
                )?;
                return Err(EngineError::Plugin {
                    node_id: self.node_id.clone(),
                    message: err.to_string(),
                });
            }
        };

        let outputs = match self.settings.output_mode {
            AggregationOutputMode::Transform => {
                let Some(merged_row) = rows.into_iter().next() else {
                    self.recorder.update_batch_status(
                        &open.record.batch_id,
                        BatchStatus::Failed,
                        None,
                    )?;
                    return Err(EngineError::Plugin {
                        node_id: self.node_id.clone(),
                        message: "transform-mode aggregation emitted no rows".to_string(),
                    });
                };
                vec![self.token_manager.coalesce_tokens(
                    &open.members,
                    merged_row,
                    step_index,
                )?]
            }
            AggregationOutputMode::Expand => {
                let mut outputs = Vec::with_capacity(rows.len());
                for (member, row) in open.members.iter().zip(rows) {
                    let mut children =
                        self.token_manager.expand_token(member, vec![row], step_index)?;
                    outputs.append(&mut children);
                }
                outputs
            }
        };

        self.recorder.update_batch_status(
            &open.record.batch_id,
            BatchStatus::Completed,
            None,
        )?;
        Ok(outputs)
    }
}
