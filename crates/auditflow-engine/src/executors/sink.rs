// auditflow-engine/src/executors/sink.rs
// ============================================================================
// Module: Sink Executor
// Description: Writes rows through sink plugins and records outcomes.
// Purpose: Prove write intent via pre-I/O content hashing.
// Dependencies: auditflow-core, auditflow-landscape, crate::tokens
// ============================================================================

//! ## Overview
//! The sink executor computes the SHA-256 of the canonical JSON payload
//! *before* any I/O, so the recorded hash proves intent even if the storage
//! layer transforms the data (auto-increment ids, server-side timestamps,
//! coercions). The plugin's returned descriptor must carry that same hash;
//! a mismatch is an orchestration invariant violation.
//!
//! Every token reaching the sink gets a completed node state and exactly
//! one terminal outcome: `Completed` for the default sink, `Routed` when an
//! explicit route label delivered it here.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Instant;

use auditflow_core::ArtifactDescriptor;
use auditflow_core::NodeId;
use auditflow_core::NodeStateStatus;
use auditflow_core::PluginContext;
use auditflow_core::RunId;
use auditflow_core::SinkPlugin;
use auditflow_core::TokenOutcomeKind;
use auditflow_core::stable_hash;
use auditflow_landscape::LandscapeRecorder;
use serde_json::Value;

use crate::errors::EngineError;
use crate::tokens::TokenInfo;

// ============================================================================
// SECTION: Sink Executor
// ============================================================================

/// Executes sink nodes.
#[derive(Debug)]
pub struct SinkExecutor {
    /// Recorder for states and outcomes.
    recorder: LandscapeRecorder,
    /// Owning run.
    run_id: RunId,
}

impl SinkExecutor {
    /// Creates a sink executor.
    #[must_use]
    pub const fn new(recorder: LandscapeRecorder, run_id: RunId) -> Self {
        Self {
            recorder,
            run_id,
        }
    }

    /// Writes the tokens' rows through the sink and records their outcomes.
    ///
    /// `routed` marks arrival via an explicit route label; tokens then
    /// record `Routed` outcomes instead of `Completed`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Plugin`] when the write fails and
    /// [`EngineError::Invariant`] when the descriptor's content hash does
    /// not match the pre-I/O canonical hash.
    pub fn execute(
        &self,
        sink: &mut dyn SinkPlugin,
        node_id: &NodeId,
        sink_name: &str,
        step_index: u32,
        tokens: &[TokenInfo],
        ctx: &PluginContext,
        routed: bool,
    ) -> Result<ArtifactDescriptor, EngineError> {
        let rows: Vec<Value> = tokens.iter().map(|token| token.row_data.clone()).collect();
        // Hash of the payload as given, computed before any I/O.
        let expected_hash = stable_hash(&rows)?;

        if let Some(contract) = &ctx.contract {
            sink.set_output_contract(contract);
        }

        let started = Instant::now();
        let descriptor = sink.write(&rows, ctx).map_err(|err| EngineError::Plugin {
            node_id: node_id.clone(),
            message: err.to_string(),
        })?;
        let duration = started.elapsed().as_secs_f64() * 1_000.0;

        if descriptor.content_hash != expected_hash {
            return Err(EngineError::Invariant(format!(
                "sink '{sink_name}' descriptor hash {} does not match the canonical payload \
                 hash {expected_hash}",
                descriptor.content_hash
            )));
        }

        let outcome = if routed {
            TokenOutcomeKind::Routed
        } else {
            TokenOutcomeKind::Completed
        };
        for token in tokens {
            let state = self.recorder.begin_node_state(
                &token.token_id,
                node_id,
                &self.run_id,
                step_index,
                1,
                &token.row_data,
            )?;
            self.recorder.complete_node_state(
                &state.state_id,
                NodeStateStatus::Completed,
                Some(&token.row_data),
                Some(duration),
                None,
            )?;
            self.recorder.record_token_outcome(
                &self.run_id,
                &token.token_id,
                outcome,
                Some(sink_name),
            )?;
        }
        Ok(descriptor)
    }
}
