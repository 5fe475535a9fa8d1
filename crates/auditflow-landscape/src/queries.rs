// auditflow-landscape/src/queries.rs
// ============================================================================
// Module: Landscape Queries
// Description: Read-only query methods for the recorder.
// Purpose: Ordered and batched reads backing export and recovery.
// Dependencies: auditflow-core, crate::{database, recorder, schema}, rusqlite
// ============================================================================

//! ## Overview
//! Every list query orders by stable, tie-broken keys so export signatures
//! reproduce bit-for-bit: tokens by `(created_at, token_id)`, node states by
//! `(step_index, attempt)`, routing events by `(ordinal, event_id)` (batched
//! variants join node states for `(step_index, attempt, ordinal, event_id)`),
//! calls by `call_index`, token parents by `ordinal`. Batched per-run getters
//! eliminate N+1 scans in the exporter.

// ============================================================================
// SECTION: Imports
// ============================================================================

use auditflow_core::BatchId;
use auditflow_core::BatchMemberRecord;
use auditflow_core::BatchRecord;
use auditflow_core::CallRecord;
use auditflow_core::CheckpointRecord;
use auditflow_core::EdgeRecord;
use auditflow_core::NodeRecord;
use auditflow_core::NodeStateRecord;
use auditflow_core::RoutingEventRecord;
use auditflow_core::RowId;
use auditflow_core::RowRecord;
use auditflow_core::RunId;
use auditflow_core::RunRecord;
use auditflow_core::SourceFieldResolutionRecord;
use auditflow_core::StateId;
use auditflow_core::Timestamp;
use auditflow_core::TokenId;
use auditflow_core::TokenOutcomeRecord;
use auditflow_core::TokenParentRecord;
use auditflow_core::TokenRecord;
use auditflow_core::TransformErrorRecord;
use auditflow_core::ValidationErrorRecord;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde_json::Value;

use crate::database::LandscapeError;
use crate::database::map_sqlite_error;
use crate::payload::PayloadError;
use crate::recorder::LandscapeRecorder;
use crate::schema;

// ============================================================================
// SECTION: Row Data Result
// ============================================================================

/// Why row payload data may be unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowDataState {
    /// Payload bytes are available.
    Available,
    /// The payload was purged by retention; the hash survives.
    Purged,
    /// The row never stored a payload.
    NeverStored,
    /// No payload store is configured.
    StoreNotConfigured,
    /// The row does not exist.
    RowNotFound,
}

/// Row payload lookup result with explicit state.
#[derive(Debug, Clone, PartialEq)]
pub struct RowDataResult {
    /// Availability state.
    pub state: RowDataState,
    /// Decoded payload when available.
    pub data: Option<Value>,
}

// ============================================================================
// SECTION: Query Methods
// ============================================================================

impl LandscapeRecorder {
    /// Returns a run by id.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_run(&self, run_id: &RunId) -> Result<Option<RunRecord>, LandscapeError> {
        self.db().read(|conn| {
            conn.query_row(
                "SELECT run_id, status, started_at, completed_at, config_hash, \
                 canonical_version, reproducibility_grade, source_schema_json, export_status, \
                 export_error, export_final_hash FROM runs WHERE run_id = ?1",
                params![run_id.as_str()],
                load_run,
            )
            .optional()
            .map_err(|err| map_sqlite_error(&err))?
            .map(convert_run)
            .transpose()
        })
    }

    /// Returns the run's nodes in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_nodes(&self, run_id: &RunId) -> Result<Vec<NodeRecord>, LandscapeError> {
        self.db().read(|conn| {
            query_vec(
                conn,
                "SELECT node_id, run_id, plugin_name, node_type, plugin_version, determinism, \
                 config_hash, sequence_index, registered_at FROM nodes WHERE run_id = ?1 ORDER \
                 BY sequence_index, node_id",
                params![run_id.as_str()],
                load_node,
                convert_node,
            )
        })
    }

    /// Returns the run's edges in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_edges(&self, run_id: &RunId) -> Result<Vec<EdgeRecord>, LandscapeError> {
        self.db().read(|conn| {
            query_vec(
                conn,
                "SELECT edge_id, run_id, from_node_id, to_node_id, label, mode, registered_at \
                 FROM edges WHERE run_id = ?1 ORDER BY registered_at, edge_id",
                params![run_id.as_str()],
                load_edge,
                convert_edge,
            )
        })
    }

    /// Returns the run's rows ordered by row index.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_rows(&self, run_id: &RunId) -> Result<Vec<RowRecord>, LandscapeError> {
        self.db().read(|conn| {
            query_vec(
                conn,
                "SELECT row_id, run_id, source_node_id, row_index, source_data_hash, \
                 payload_ref, created_at FROM rows WHERE run_id = ?1 ORDER BY row_index",
                params![run_id.as_str()],
                load_row,
                convert_row,
            )
        })
    }

    /// Returns a row by id.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_row(&self, row_id: &RowId) -> Result<Option<RowRecord>, LandscapeError> {
        self.db().read(|conn| {
            conn.query_row(
                "SELECT row_id, run_id, source_node_id, row_index, source_data_hash, \
                 payload_ref, created_at FROM rows WHERE row_id = ?1",
                params![row_id.as_str()],
                load_row,
            )
            .optional()
            .map_err(|err| map_sqlite_error(&err))?
            .map(convert_row)
            .transpose()
        })
    }

    /// Returns the payload data for a row with explicit availability state.
    ///
    /// Purged payloads degrade gracefully: the row stays queryable with its
    /// hash, and the state reports `Purged`. Corrupt payloads propagate as
    /// Tier-1 integrity errors.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::Integrity`] for corrupt payloads and
    /// [`LandscapeError`] on read failure.
    pub fn get_row_data(&self, row_id: &RowId) -> Result<RowDataResult, LandscapeError> {
        let Some(row) = self.get_row(row_id)? else {
            return Ok(RowDataResult {
                state: RowDataState::RowNotFound,
                data: None,
            });
        };
        let Some(reference) = row.payload_ref else {
            return Ok(RowDataResult {
                state: RowDataState::NeverStored,
                data: None,
            });
        };
        let Some(store) = self.payload_store() else {
            return Ok(RowDataResult {
                state: RowDataState::StoreNotConfigured,
                data: None,
            });
        };
        match store.retrieve(&reference) {
            Ok(bytes) => {
                let data: Value = serde_json::from_slice(&bytes).map_err(|err| {
                    LandscapeError::Integrity(auditflow_core::IntegrityError::CorruptPayload(
                        format!("row {row_id} payload is not valid JSON: {err}"),
                    ))
                })?;
                Ok(RowDataResult {
                    state: RowDataState::Available,
                    data: Some(data),
                })
            }
            Err(PayloadError::NotFound(_)) => Ok(RowDataResult {
                state: RowDataState::Purged,
                data: None,
            }),
            Err(PayloadError::Integrity(err)) => Err(LandscapeError::Integrity(err)),
            Err(err) => Err(LandscapeError::Io(err.to_string())),
        }
    }

    /// Returns a row's tokens ordered by `(created_at, token_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_tokens(&self, row_id: &RowId) -> Result<Vec<TokenRecord>, LandscapeError> {
        self.db().read(|conn| {
            query_vec(
                conn,
                "SELECT token_id, row_id, branch_name, fork_group_id, join_group_id, \
                 expand_group_id, step_index, created_at FROM tokens WHERE row_id = ?1 ORDER \
                 BY created_at, token_id",
                params![row_id.as_str()],
                load_token,
                convert_token,
            )
        })
    }

    /// Returns a token by id.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_token(&self, token_id: &TokenId) -> Result<Option<TokenRecord>, LandscapeError> {
        self.db().read(|conn| {
            conn.query_row(
                "SELECT token_id, row_id, branch_name, fork_group_id, join_group_id, \
                 expand_group_id, step_index, created_at FROM tokens WHERE token_id = ?1",
                params![token_id.as_str()],
                load_token,
            )
            .optional()
            .map_err(|err| map_sqlite_error(&err))?
            .map(convert_token)
            .transpose()
        })
    }

    /// Returns every token in the run ordered by `(row_id, created_at,
    /// token_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_all_tokens_for_run(
        &self,
        run_id: &RunId,
    ) -> Result<Vec<TokenRecord>, LandscapeError> {
        self.db().read(|conn| {
            query_vec(
                conn,
                "SELECT t.token_id, t.row_id, t.branch_name, t.fork_group_id, \
                 t.join_group_id, t.expand_group_id, t.step_index, t.created_at FROM tokens t \
                 JOIN rows r ON t.row_id = r.row_id WHERE r.run_id = ?1 ORDER BY t.row_id, \
                 t.created_at, t.token_id",
                params![run_id.as_str()],
                load_token,
                convert_token,
            )
        })
    }

    /// Returns a token's parents ordered by ordinal.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_token_parents(
        &self,
        token_id: &TokenId,
    ) -> Result<Vec<TokenParentRecord>, LandscapeError> {
        self.db().read(|conn| {
            query_vec(
                conn,
                "SELECT token_id, parent_token_id, ordinal FROM token_parents WHERE token_id \
                 = ?1 ORDER BY ordinal",
                params![token_id.as_str()],
                load_token_parent,
                Ok,
            )
        })
    }

    /// Returns a token's node states ordered by `(step_index, attempt)`.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_node_states_for_token(
        &self,
        token_id: &TokenId,
    ) -> Result<Vec<NodeStateRecord>, LandscapeError> {
        self.db().read(|conn| {
            query_vec(
                conn,
                "SELECT state_id, token_id, node_id, run_id, step_index, attempt, status, \
                 input_hash, output_hash, duration_ms, error_json, started_at, completed_at \
                 FROM node_states WHERE token_id = ?1 ORDER BY step_index, attempt",
                params![token_id.as_str()],
                load_state,
                convert_state,
            )
        })
    }

    /// Returns every node state in the run ordered by `(token_id,
    /// step_index, attempt)`.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_all_node_states_for_run(
        &self,
        run_id: &RunId,
    ) -> Result<Vec<NodeStateRecord>, LandscapeError> {
        self.db().read(|conn| {
            query_vec(
                conn,
                "SELECT state_id, token_id, node_id, run_id, step_index, attempt, status, \
                 input_hash, output_hash, duration_ms, error_json, started_at, completed_at \
                 FROM node_states WHERE run_id = ?1 ORDER BY token_id, step_index, attempt",
                params![run_id.as_str()],
                load_state,
                convert_state,
            )
        })
    }

    /// Returns a state's routing events ordered by `(ordinal, event_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_routing_events(
        &self,
        state_id: &StateId,
    ) -> Result<Vec<RoutingEventRecord>, LandscapeError> {
        self.db().read(|conn| {
            query_vec(
                conn,
                "SELECT event_id, state_id, edge_id, ordinal, mode, reason_json, created_at \
                 FROM routing_events WHERE state_id = ?1 ORDER BY ordinal, event_id",
                params![state_id.as_str()],
                load_event,
                convert_event,
            )
        })
    }

    /// Returns every routing event in the run in execution order
    /// `(step_index, attempt, ordinal, event_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_all_routing_events_for_run(
        &self,
        run_id: &RunId,
    ) -> Result<Vec<RoutingEventRecord>, LandscapeError> {
        self.db().read(|conn| {
            query_vec(
                conn,
                "SELECT e.event_id, e.state_id, e.edge_id, e.ordinal, e.mode, e.reason_json, \
                 e.created_at FROM routing_events e JOIN node_states s ON e.state_id = \
                 s.state_id WHERE s.run_id = ?1 ORDER BY s.step_index, s.attempt, e.ordinal, \
                 e.event_id",
                params![run_id.as_str()],
                load_event,
                convert_event,
            )
        })
    }

    /// Returns a state's calls ordered by call index.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_calls(&self, state_id: &StateId) -> Result<Vec<CallRecord>, LandscapeError> {
        self.db().read(|conn| {
            query_vec(
                conn,
                "SELECT call_id, state_id, call_index, kind, status, request_hash, \
                 response_hash, latency_ms, provider, error, created_at FROM calls WHERE \
                 state_id = ?1 ORDER BY call_index",
                params![state_id.as_str()],
                load_call,
                convert_call,
            )
        })
    }

    /// Returns every call in the run in execution order `(step_index,
    /// attempt, call_index)`.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_all_calls_for_run(
        &self,
        run_id: &RunId,
    ) -> Result<Vec<CallRecord>, LandscapeError> {
        self.db().read(|conn| {
            query_vec(
                conn,
                "SELECT c.call_id, c.state_id, c.call_index, c.kind, c.status, \
                 c.request_hash, c.response_hash, c.latency_ms, c.provider, c.error, \
                 c.created_at FROM calls c JOIN node_states s ON c.state_id = s.state_id \
                 WHERE s.run_id = ?1 ORDER BY s.step_index, s.attempt, c.call_index",
                params![run_id.as_str()],
                load_call,
                convert_call,
            )
        })
    }

    /// Returns every token parent edge in the run ordered by `(token_id,
    /// ordinal)`.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_all_token_parents_for_run(
        &self,
        run_id: &RunId,
    ) -> Result<Vec<TokenParentRecord>, LandscapeError> {
        self.db().read(|conn| {
            query_vec(
                conn,
                "SELECT p.token_id, p.parent_token_id, p.ordinal FROM token_parents p JOIN \
                 tokens t ON p.token_id = t.token_id JOIN rows r ON t.row_id = r.row_id WHERE \
                 r.run_id = ?1 ORDER BY p.token_id, p.ordinal",
                params![run_id.as_str()],
                load_token_parent,
                Ok,
            )
        })
    }

    /// Returns the outcome for a (run, token) pair.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_token_outcome(
        &self,
        run_id: &RunId,
        token_id: &TokenId,
    ) -> Result<Option<TokenOutcomeRecord>, LandscapeError> {
        self.db().read(|conn| {
            conn.query_row(
                "SELECT outcome_id, run_id, token_id, outcome, is_terminal, sink_name, \
                 recorded_at FROM token_outcomes WHERE run_id = ?1 AND token_id = ?2",
                params![run_id.as_str(), token_id.as_str()],
                load_outcome,
            )
            .optional()
            .map_err(|err| map_sqlite_error(&err))?
            .map(convert_outcome)
            .transpose()
        })
    }

    /// Returns every token outcome in the run ordered by `(token_id,
    /// outcome_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_token_outcomes(
        &self,
        run_id: &RunId,
    ) -> Result<Vec<TokenOutcomeRecord>, LandscapeError> {
        self.db().read(|conn| {
            query_vec(
                conn,
                "SELECT outcome_id, run_id, token_id, outcome, is_terminal, sink_name, \
                 recorded_at FROM token_outcomes WHERE run_id = ?1 ORDER BY token_id, \
                 outcome_id",
                params![run_id.as_str()],
                load_outcome,
                convert_outcome,
            )
        })
    }

    /// Returns the run's validation errors ordered by `(row_id, error_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_validation_errors(
        &self,
        run_id: &RunId,
    ) -> Result<Vec<ValidationErrorRecord>, LandscapeError> {
        self.db().read(|conn| {
            query_vec(
                conn,
                "SELECT error_id, run_id, row_id, node_id, violation_json, policy_applied, \
                 created_at FROM validation_errors WHERE run_id = ?1 ORDER BY row_id, error_id",
                params![run_id.as_str()],
                load_validation_error,
                convert_validation_error,
            )
        })
    }

    /// Returns the run's transform errors ordered by `(state_id, error_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_transform_errors(
        &self,
        run_id: &RunId,
    ) -> Result<Vec<TransformErrorRecord>, LandscapeError> {
        self.db().read(|conn| {
            query_vec(
                conn,
                "SELECT error_id, run_id, state_id, token_id, reason_json, retryable, \
                 created_at FROM transform_errors WHERE run_id = ?1 ORDER BY state_id, \
                 error_id",
                params![run_id.as_str()],
                load_transform_error,
                convert_transform_error,
            )
        })
    }

    /// Returns the recorded header mapping for a source node.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_source_field_resolution(
        &self,
        run_id: &RunId,
        node_id: &auditflow_core::NodeId,
    ) -> Result<Vec<SourceFieldResolutionRecord>, LandscapeError> {
        self.db().read(|conn| {
            query_vec(
                conn,
                "SELECT run_id, node_id, original_name, normalized_name, ordinal, created_at \
                 FROM source_field_resolutions WHERE run_id = ?1 AND node_id = ?2 ORDER BY \
                 ordinal",
                params![run_id.as_str(), node_id.as_str()],
                load_field_resolution,
                Ok,
            )
        })
    }

    /// Returns a batch by id.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_batch(&self, batch_id: &BatchId) -> Result<Option<BatchRecord>, LandscapeError> {
        self.db().read(|conn| {
            conn.query_row(
                "SELECT batch_id, run_id, node_id, status, attempt, trigger_kind, \
                 created_at, completed_at FROM batches WHERE batch_id = ?1",
                params![batch_id.as_str()],
                load_batch,
            )
            .optional()
            .map_err(|err| map_sqlite_error(&err))?
            .map(convert_batch)
            .transpose()
        })
    }

    /// Returns the run's batches ordered by `(created_at, batch_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_batches(&self, run_id: &RunId) -> Result<Vec<BatchRecord>, LandscapeError> {
        self.db().read(|conn| {
            query_vec(
                conn,
                "SELECT batch_id, run_id, node_id, status, attempt, trigger_kind, \
                 created_at, completed_at FROM batches WHERE run_id = ?1 ORDER BY created_at, \
                 batch_id",
                params![run_id.as_str()],
                load_batch,
                convert_batch,
            )
        })
    }

    /// Returns a batch's members ordered by ordinal.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_batch_members(
        &self,
        batch_id: &BatchId,
    ) -> Result<Vec<BatchMemberRecord>, LandscapeError> {
        self.db().read(|conn| {
            query_vec(
                conn,
                "SELECT batch_id, token_id, ordinal FROM batch_members WHERE batch_id = ?1 \
                 ORDER BY ordinal",
                params![batch_id.as_str()],
                load_batch_member,
                Ok,
            )
        })
    }

    /// Returns the latest checkpoint by sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn latest_checkpoint(
        &self,
        run_id: &RunId,
    ) -> Result<Option<CheckpointRecord>, LandscapeError> {
        self.db().read(|conn| {
            conn.query_row(
                "SELECT checkpoint_id, run_id, token_id, node_id, sequence_number, \
                 graph_hash, created_at FROM checkpoints WHERE run_id = ?1 ORDER BY \
                 sequence_number DESC, checkpoint_id DESC LIMIT 1",
                params![run_id.as_str()],
                load_checkpoint,
                )
            .optional()
            .map_err(|err| map_sqlite_error(&err))?
            .map(Ok)
            .transpose()
        })
    }

    /// Returns rows with no terminal outcome on any of their tokens.
    ///
    /// This is the recovery rule: a row is unprocessed until some token of
    /// it records a terminal `completed` or `routed` outcome. Row-index
    /// boundaries are never consulted.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on read failure.
    pub fn get_unprocessed_rows(
        &self,
        run_id: &RunId,
    ) -> Result<Vec<RowRecord>, LandscapeError> {
        self.db().read(|conn| {
            query_vec(
                conn,
                "SELECT r.row_id, r.run_id, r.source_node_id, r.row_index, \
                 r.source_data_hash, r.payload_ref, r.created_at FROM rows r WHERE r.run_id = \
                 ?1 AND NOT EXISTS (SELECT 1 FROM tokens t JOIN token_outcomes o ON \
                 o.token_id = t.token_id WHERE t.row_id = r.row_id AND o.run_id = r.run_id \
                 AND o.is_terminal = 1 AND o.outcome IN ('completed', 'routed')) ORDER BY \
                 r.row_index",
                params![run_id.as_str()],
                load_row,
                convert_row,
            )
        })
    }
}

// ============================================================================
// SECTION: Raw Row Loaders
// ============================================================================

/// Raw run row.
type RawRun = (
    String,
    String,
    i64,
    Option<i64>,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

/// Loads a raw run row.
fn load_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRun> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

/// Converts a raw run row into a record.
fn convert_run(raw: RawRun) -> Result<RunRecord, LandscapeError> {
    let (
        run_id,
        status,
        started_at,
        completed_at,
        config_hash,
        canonical_version,
        grade,
        source_schema_json,
        export_status,
        export_error,
        export_final_hash,
    ) = raw;
    Ok(RunRecord {
        run_id: RunId::new(run_id),
        status: schema::parse_run_status(&status)?,
        started_at: Timestamp::from_unix_millis(started_at),
        completed_at: completed_at.map(Timestamp::from_unix_millis),
        config_hash,
        canonical_version,
        reproducibility_grade: grade.as_deref().map(schema::parse_grade).transpose()?,
        source_schema: source_schema_json.as_deref().map(parse_json).transpose()?,
        export_status: export_status.as_deref().map(schema::parse_export_status).transpose()?,
        export_error,
        export_final_hash,
    })
}

/// Raw node row.
type RawNode = (String, String, String, String, String, String, String, u32, i64);

/// Loads a raw node row.
fn load_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawNode> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

/// Converts a raw node row into a record.
fn convert_node(raw: RawNode) -> Result<NodeRecord, LandscapeError> {
    let (
        node_id,
        run_id,
        plugin_name,
        node_type,
        plugin_version,
        determinism,
        config_hash,
        sequence_index,
        registered_at,
    ) = raw;
    Ok(NodeRecord {
        node_id: auditflow_core::NodeId::new(node_id),
        run_id: RunId::new(run_id),
        plugin_name,
        node_type: schema::parse_node_type(&node_type)?,
        plugin_version,
        determinism: schema::parse_determinism(&determinism)?,
        config_hash,
        sequence_index,
        registered_at: Timestamp::from_unix_millis(registered_at),
    })
}

/// Raw edge row.
type RawEdge = (String, String, String, String, String, String, i64);

/// Loads a raw edge row.
fn load_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEdge> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

/// Converts a raw edge row into a record.
fn convert_edge(raw: RawEdge) -> Result<EdgeRecord, LandscapeError> {
    let (edge_id, run_id, from_node_id, to_node_id, label, mode, registered_at) = raw;
    Ok(EdgeRecord {
        edge_id: auditflow_core::EdgeId::new(edge_id),
        run_id: RunId::new(run_id),
        from_node_id: auditflow_core::NodeId::new(from_node_id),
        to_node_id: auditflow_core::NodeId::new(to_node_id),
        label,
        mode: schema::parse_routing_mode(&mode)?,
        registered_at: Timestamp::from_unix_millis(registered_at),
    })
}

/// Raw row row.
type RawRow = (String, String, String, u64, String, Option<String>, i64);

/// Loads a raw row row.
fn load_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        #[allow(clippy::cast_sign_loss, reason = "row index stored as non-negative i64")]
        (row.get::<_, i64>(3)? as u64),
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

/// Converts a raw row row into a record.
fn convert_row(raw: RawRow) -> Result<RowRecord, LandscapeError> {
    let (row_id, run_id, source_node_id, row_index, source_data_hash, payload_ref, created_at) =
        raw;
    Ok(RowRecord {
        row_id: RowId::new(row_id),
        run_id: RunId::new(run_id),
        source_node_id: auditflow_core::NodeId::new(source_node_id),
        row_index,
        source_data_hash,
        payload_ref,
        created_at: Timestamp::from_unix_millis(created_at),
    })
}

/// Raw token row.
type RawToken = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<u32>,
    i64,
);

/// Loads a raw token row.
fn load_token(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawToken> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

/// Converts a raw token row into a record.
fn convert_token(raw: RawToken) -> Result<TokenRecord, LandscapeError> {
    let (token_id, row_id, branch_name, fork, join, expand, step_index, created_at) = raw;
    Ok(TokenRecord {
        token_id: TokenId::new(token_id),
        row_id: RowId::new(row_id),
        branch_name,
        fork_group_id: fork.map(auditflow_core::GroupId::new),
        join_group_id: join.map(auditflow_core::GroupId::new),
        expand_group_id: expand.map(auditflow_core::GroupId::new),
        step_index,
        created_at: Timestamp::from_unix_millis(created_at),
    })
}

/// Loads a token parent record directly.
fn load_token_parent(row: &rusqlite::Row<'_>) -> rusqlite::Result<TokenParentRecord> {
    Ok(TokenParentRecord {
        token_id: TokenId::new(row.get::<_, String>(0)?),
        parent_token_id: TokenId::new(row.get::<_, String>(1)?),
        ordinal: row.get(2)?,
    })
}

/// Raw node state row.
type RawState = (
    String,
    String,
    String,
    String,
    u32,
    u32,
    String,
    String,
    Option<String>,
    Option<f64>,
    Option<String>,
    i64,
    Option<i64>,
);

/// Loads a raw node state row.
fn load_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawState> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
    ))
}

/// Converts a raw node state row into a record.
fn convert_state(raw: RawState) -> Result<NodeStateRecord, LandscapeError> {
    let (
        state_id,
        token_id,
        node_id,
        run_id,
        step_index,
        attempt,
        status,
        input_hash,
        output_hash,
        duration_ms,
        error_json,
        started_at,
        completed_at,
    ) = raw;
    Ok(NodeStateRecord {
        state_id: StateId::new(state_id),
        token_id: TokenId::new(token_id),
        node_id: auditflow_core::NodeId::new(node_id),
        run_id: RunId::new(run_id),
        step_index,
        attempt,
        status: schema::parse_state_status(&status)?,
        input_hash,
        output_hash,
        duration_ms,
        error: error_json.as_deref().map(parse_json).transpose()?,
        started_at: Timestamp::from_unix_millis(started_at),
        completed_at: completed_at.map(Timestamp::from_unix_millis),
    })
}

/// Raw routing event row.
type RawEvent = (String, String, String, u32, String, Option<String>, i64);

/// Loads a raw routing event row.
fn load_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEvent> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

/// Converts a raw routing event row into a record.
fn convert_event(raw: RawEvent) -> Result<RoutingEventRecord, LandscapeError> {
    let (event_id, state_id, edge_id, ordinal, mode, reason_json, created_at) = raw;
    Ok(RoutingEventRecord {
        event_id: auditflow_core::EventId::new(event_id),
        state_id: StateId::new(state_id),
        edge_id: auditflow_core::EdgeId::new(edge_id),
        ordinal,
        mode: schema::parse_routing_mode(&mode)?,
        reason: reason_json.as_deref().map(parse_json).transpose()?,
        created_at: Timestamp::from_unix_millis(created_at),
    })
}

/// Raw call row.
type RawCall = (
    String,
    String,
    u32,
    String,
    String,
    String,
    Option<String>,
    Option<f64>,
    Option<String>,
    Option<String>,
    i64,
);

/// Loads a raw call row.
fn load_call(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawCall> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

/// Converts a raw call row into a record.
fn convert_call(raw: RawCall) -> Result<CallRecord, LandscapeError> {
    let (
        call_id,
        state_id,
        call_index,
        kind,
        status,
        request_hash,
        response_hash,
        latency_ms,
        provider,
        error,
        created_at,
    ) = raw;
    Ok(CallRecord {
        call_id: auditflow_core::CallId::new(call_id),
        state_id: StateId::new(state_id),
        call_index,
        kind: schema::parse_call_kind(&kind)?,
        status: schema::parse_call_status(&status)?,
        request_hash,
        response_hash,
        latency_ms,
        provider,
        error,
        created_at: Timestamp::from_unix_millis(created_at),
    })
}

/// Raw outcome row.
type RawOutcome = (String, String, String, String, bool, Option<String>, i64);

/// Loads a raw outcome row.
fn load_outcome(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawOutcome> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

/// Converts a raw outcome row into a record.
fn convert_outcome(raw: RawOutcome) -> Result<TokenOutcomeRecord, LandscapeError> {
    let (outcome_id, run_id, token_id, outcome, is_terminal, sink_name, recorded_at) = raw;
    Ok(TokenOutcomeRecord {
        outcome_id: auditflow_core::OutcomeId::new(outcome_id),
        run_id: RunId::new(run_id),
        token_id: TokenId::new(token_id),
        outcome: schema::parse_outcome(&outcome)?,
        is_terminal,
        sink_name,
        recorded_at: Timestamp::from_unix_millis(recorded_at),
    })
}

/// Raw validation error row.
type RawValidationError = (String, String, String, String, String, String, i64);

/// Loads a raw validation error row.
fn load_validation_error(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawValidationError> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

/// Converts a raw validation error row into a record.
fn convert_validation_error(
    raw: RawValidationError,
) -> Result<ValidationErrorRecord, LandscapeError> {
    let (error_id, run_id, row_id, node_id, violation_json, policy_applied, created_at) = raw;
    Ok(ValidationErrorRecord {
        error_id: auditflow_core::ErrorId::new(error_id),
        run_id: RunId::new(run_id),
        row_id: RowId::new(row_id),
        node_id: auditflow_core::NodeId::new(node_id),
        violation: parse_json(&violation_json)?,
        policy_applied,
        created_at: Timestamp::from_unix_millis(created_at),
    })
}

/// Raw transform error row.
type RawTransformError = (String, String, String, String, String, bool, i64);

/// Loads a raw transform error row.
fn load_transform_error(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTransformError> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

/// Converts a raw transform error row into a record.
fn convert_transform_error(
    raw: RawTransformError,
) -> Result<TransformErrorRecord, LandscapeError> {
    let (error_id, run_id, state_id, token_id, reason_json, retryable, created_at) = raw;
    Ok(TransformErrorRecord {
        error_id: auditflow_core::ErrorId::new(error_id),
        run_id: RunId::new(run_id),
        state_id: StateId::new(state_id),
        token_id: TokenId::new(token_id),
        reason: parse_json(&reason_json)?,
        retryable,
        created_at: Timestamp::from_unix_millis(created_at),
    })
}

/// Loads a field resolution record directly.
fn load_field_resolution(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<SourceFieldResolutionRecord> {
    Ok(SourceFieldResolutionRecord {
        run_id: RunId::new(row.get::<_, String>(0)?),
        node_id: auditflow_core::NodeId::new(row.get::<_, String>(1)?),
        original_name: row.get(2)?,
        normalized_name: row.get(3)?,
        ordinal: row.get(4)?,
        created_at: Timestamp::from_unix_millis(row.get(5)?),
    })
}

/// Raw batch row.
type RawBatch = (String, String, String, String, u32, Option<String>, i64, Option<i64>);

/// Loads a raw batch row.
fn load_batch(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawBatch> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

/// Converts a raw batch row into a record.
fn convert_batch(raw: RawBatch) -> Result<BatchRecord, LandscapeError> {
    let (batch_id, run_id, node_id, status, attempt, trigger, created_at, completed_at) = raw;
    Ok(BatchRecord {
        batch_id: BatchId::new(batch_id),
        run_id: RunId::new(run_id),
        node_id: auditflow_core::NodeId::new(node_id),
        status: schema::parse_batch_status(&status)?,
        attempt,
        trigger: trigger.as_deref().map(schema::parse_batch_trigger).transpose()?,
        created_at: Timestamp::from_unix_millis(created_at),
        completed_at: completed_at.map(Timestamp::from_unix_millis),
    })
}

/// Loads a batch member record directly.
fn load_batch_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<BatchMemberRecord> {
    Ok(BatchMemberRecord {
        batch_id: BatchId::new(row.get::<_, String>(0)?),
        token_id: TokenId::new(row.get::<_, String>(1)?),
        ordinal: row.get(2)?,
    })
}

/// Loads a checkpoint record directly.
fn load_checkpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<CheckpointRecord> {
    Ok(CheckpointRecord {
        checkpoint_id: auditflow_core::CheckpointId::new(row.get::<_, String>(0)?),
        run_id: RunId::new(row.get::<_, String>(1)?),
        token_id: TokenId::new(row.get::<_, String>(2)?),
        node_id: auditflow_core::NodeId::new(row.get::<_, String>(3)?),
        #[allow(clippy::cast_sign_loss, reason = "sequence number stored as non-negative i64")]
        sequence_number: row.get::<_, i64>(4)? as u64,
        graph_hash: row.get(5)?,
        created_at: Timestamp::from_unix_millis(row.get(6)?),
    })
}

// ============================================================================
// SECTION: Query Helpers
// ============================================================================

/// Parses a stored JSON column.
fn parse_json(text: &str) -> Result<Value, LandscapeError> {
    serde_json::from_str(text)
        .map_err(|err| LandscapeError::Invalid(format!("stored json column is invalid: {err}")))
}

/// Runs a query and converts each raw row.
fn query_vec<Raw, Record>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    load: impl Fn(&rusqlite::Row<'_>) -> rusqlite::Result<Raw>,
    convert: impl Fn(Raw) -> Result<Record, LandscapeError>,
) -> Result<Vec<Record>, LandscapeError> {
    let mut statement = conn.prepare(sql).map_err(|err| map_sqlite_error(&err))?;
    let rows = statement
        .query_map(params, load)
        .map_err(|err| map_sqlite_error(&err))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| map_sqlite_error(&err))?;
    rows.into_iter().map(convert).collect()
}
