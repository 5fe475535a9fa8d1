// auditflow-engine/src/executors/source.rs
// ============================================================================
// Module: Source Executor
// Description: Reads external input into rows and initial tokens.
// Purpose: Validate, hash, persist, and tokenize every source record.
// Dependencies: auditflow-core, auditflow-landscape, crate::tokens
// ============================================================================

//! ## Overview
//! The source executor reads the plugin's stream, creates one row per input
//! record with its hash, optionally persists the payload through the
//! content-addressed store, and mints the initial token. Rows failing the
//! source schema follow the configured `on_validation_failure` policy:
//! `discard` records the violation and drops the row, `route` quarantines
//! the token, and `fail` aborts the run.

// ============================================================================
// SECTION: Imports
// ============================================================================

use auditflow_core::IntegrityError;
use auditflow_core::NodeId;
use auditflow_core::PluginContext;
use auditflow_core::SourcePlugin;
use auditflow_core::TokenOutcomeKind;
use auditflow_core::ValidationFailurePolicy;
use auditflow_core::stable_hash;
use auditflow_landscape::LandscapeRecorder;
use serde_json::json;

use crate::errors::EngineError;
use crate::tokens::TokenInfo;
use crate::tokens::TokenManager;

// ============================================================================
// SECTION: Output
// ============================================================================

/// Result of draining a source.
#[derive(Debug, Default)]
pub struct SourceOutput {
    /// Tokens ready for the pipeline, in row order.
    pub tokens: Vec<TokenInfo>,
    /// Rows discarded or quarantined by validation.
    pub rejected_rows: u64,
}

// ============================================================================
// SECTION: Source Executor
// ============================================================================

/// Executes a source node.
#[derive(Debug)]
pub struct SourceExecutor {
    /// Recorder for rows, errors, and resolutions.
    recorder: LandscapeRecorder,
    /// Token manager minting initial tokens.
    token_manager: TokenManager,
    /// Source node identifier.
    node_id: NodeId,
    /// Validation failure policy.
    policy: ValidationFailurePolicy,
}

impl SourceExecutor {
    /// Creates a source executor.
    #[must_use]
    pub const fn new(
        recorder: LandscapeRecorder,
        token_manager: TokenManager,
        node_id: NodeId,
        policy: ValidationFailurePolicy,
    ) -> Self {
        Self {
            recorder,
            token_manager,
            node_id,
            policy,
        }
    }

    /// Drains the source into rows and initial tokens.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] under the `fail` policy,
    /// [`EngineError::Integrity`] when a source-declared hash mismatches the
    /// canonical hash, and [`EngineError`] when reads or writes fail.
    pub fn execute(
        &self,
        source: &mut dyn SourcePlugin,
        ctx: &PluginContext,
    ) -> Result<SourceOutput, EngineError> {
        let schema = source.input_schema();
        let mappings: Vec<(String, String)> = schema
            .fields
            .iter()
            .map(|field| (field.original_name.clone(), field.normalized_name.clone()))
            .collect();
        if !mappings.is_empty() {
            self.recorder.record_source_field_resolution(
                self.token_manager.run_id(),
                &self.node_id,
                &mappings,
            )?;
        }

        let mut output = SourceOutput::default();
        let mut row_index: u64 = 0;
        let run_id = self.token_manager.run_id().clone();
        let items: Vec<_> = source
            .read(ctx)
            .map_err(|err| EngineError::Plugin {
                node_id: self.node_id.clone(),
                message: err.to_string(),
            })?
            .collect();
        for item in items {
            let source_row = item.map_err(|err| EngineError::Plugin {
                node_id: self.node_id.clone(),
                message: err.to_string(),
            })?;
            let index = row_index;
            row_index += 1;

            // The recorded hash is always the canonical hash of the data; a
            // source that declares a different hash is corrupting the trail.
            let canonical = stable_hash(&source_row.data)?;
            if !source_row.source_data_hash.is_empty()
                && source_row.source_data_hash != canonical
            {
                return Err(EngineError::Integrity(IntegrityError::CorruptPayload(format!(
                    "source row {index} declared hash {} but data hashes to {canonical}",
                    source_row.source_data_hash
                ))));
            }

            match schema.validate_row(&source_row.data) {
                Ok(()) => {
                    let row =
                        self.recorder.create_row(&run_id, &self.node_id, index, &source_row.data)?;
                    let token = self.token_manager.create_initial(&row, source_row.data)?;
                    output.tokens.push(token);
                }
                Err(violation) => {
                    let row =
                        self.recorder.create_row(&run_id, &self.node_id, index, &source_row.data)?;
                    let violation_json = serde_json::to_value(&violation)
                        .unwrap_or_else(|_| json!({"violation_type": "unknown"}));
                    match self.policy {
                        ValidationFailurePolicy::Discard => {
                            self.recorder.record_validation_error(
                                &run_id,
                                &row.row_id,
                                &self.node_id,
                                &violation_json,
                                "discard",
                            )?;
                            output.rejected_rows += 1;
                        }
                        ValidationFailurePolicy::Route => {
                            self.recorder.record_validation_error(
                                &run_id,
                                &row.row_id,
                                &self.node_id,
                                &violation_json,
                                "route",
                            )?;
                            let token =
                                self.token_manager.create_initial(&row, source_row.data)?;
                            self.recorder.record_token_outcome(
                                &run_id,
                                &token.token_id,
                                TokenOutcomeKind::Quarantined,
                                None,
                            )?;
                            output.rejected_rows += 1;
                        }
                        ValidationFailurePolicy::Fail => {
                            self.recorder.record_validation_error(
                                &run_id,
                                &row.row_id,
                                &self.node_id,
                                &violation_json,
                                "fail",
                            )?;
                            return Err(EngineError::Validation(violation));
                        }
                    }
                }
            }
        }
        Ok(output)
    }
}
