// auditflow-landscape/src/checkpoint.rs
// ============================================================================
// Module: Checkpoint And Recovery
// Description: Checkpoint creation and outcome-based recovery.
// Purpose: Resume interrupted runs without silently dropping rows.
// Dependencies: auditflow-core, crate::recorder
// ============================================================================

//! ## Overview
//! Checkpoints capture `(token, node, sequence_number, graph hash)` on
//! configured boundaries. Recovery never consults row-index boundaries:
//! "unprocessed rows" is the set of rows none of whose tokens carries a
//! terminal outcome for any sink. A row-index rule would silently drop rows
//! routed to a failed sink when routing interleaves across sinks.

// ============================================================================
// SECTION: Imports
// ============================================================================

use auditflow_core::CheckpointRecord;
use auditflow_core::ExecutionGraph;
use auditflow_core::NodeId;
use auditflow_core::RowRecord;
use auditflow_core::RunId;
use auditflow_core::TokenId;
use thiserror::Error;

use crate::database::LandscapeError;
use crate::recorder::LandscapeRecorder;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Checkpoint and recovery errors.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The audit store failed.
    #[error(transparent)]
    Landscape(#[from] LandscapeError),
    /// Hashing the execution graph failed.
    #[error("checkpoint graph hashing failed: {0}")]
    GraphHash(String),
}

// ============================================================================
// SECTION: Checkpoint Manager
// ============================================================================

/// Creates checkpoints on configured boundaries.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    /// Recorder backing the checkpoint table.
    recorder: LandscapeRecorder,
}

impl CheckpointManager {
    /// Creates a manager over the recorder.
    #[must_use]
    pub const fn new(recorder: LandscapeRecorder) -> Self {
        Self {
            recorder,
        }
    }

    /// Records a checkpoint for the token at the given node.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] when graph hashing or the write fails.
    pub fn create_checkpoint(
        &self,
        run_id: &RunId,
        token_id: &TokenId,
        node_id: &NodeId,
        sequence_number: u64,
        graph: &ExecutionGraph,
    ) -> Result<CheckpointRecord, CheckpointError> {
        let graph_hash =
            graph.graph_hash().map_err(|err| CheckpointError::GraphHash(err.to_string()))?;
        Ok(self.recorder.record_checkpoint(
            run_id,
            token_id,
            node_id,
            sequence_number,
            &graph_hash,
        )?)
    }

    /// Returns the latest checkpoint for the run.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] on read failure.
    pub fn latest(&self, run_id: &RunId) -> Result<Option<CheckpointRecord>, CheckpointError> {
        Ok(self.recorder.latest_checkpoint(run_id)?)
    }
}

// ============================================================================
// SECTION: Recovery Manager
// ============================================================================

/// Computes the resume work set for an interrupted run.
#[derive(Debug, Clone)]
pub struct RecoveryManager {
    /// Recorder backing the outcome queries.
    recorder: LandscapeRecorder,
}

impl RecoveryManager {
    /// Creates a manager over the recorder.
    #[must_use]
    pub const fn new(recorder: LandscapeRecorder) -> Self {
        Self {
            recorder,
        }
    }

    /// Returns the rows that still need processing.
    ///
    /// A row counts as processed only when at least one of its tokens has a
    /// terminal `completed` or `routed` outcome. Rows routed to a sink that
    /// failed before recording an outcome are therefore included, regardless
    /// of any checkpoint's row index.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] on read failure.
    pub fn unprocessed_rows(&self, run_id: &RunId) -> Result<Vec<RowRecord>, CheckpointError> {
        Ok(self.recorder.get_unprocessed_rows(run_id)?)
    }
}
