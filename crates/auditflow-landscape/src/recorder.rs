// auditflow-landscape/src/recorder.rs
// ============================================================================
// Module: Landscape Recorder
// Description: Write facade for the audit store.
// Purpose: Record runs, nodes, rows, tokens, states, events, and outcomes.
// Dependencies: auditflow-core, crate::{database, journal, payload, schema}
// ============================================================================

//! ## Overview
//! The recorder is the single write path into the landscape. Every operation
//! runs as one transaction; foreign keys are enforced by the store, so an
//! orphan write fails as a Tier-1 integrity error rather than landing.
//! Status is always `completed` for successful logic; terminal token
//! behavior is derived from routing events and token parents, never stored
//! as a node-state status.
//!
//! Read-side queries live in [`crate::queries`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use auditflow_core::BatchId;
use auditflow_core::BatchMemberRecord;
use auditflow_core::BatchRecord;
use auditflow_core::BatchStatus;
use auditflow_core::BatchTrigger;
use auditflow_core::CANONICAL_VERSION;
use auditflow_core::CallId;
use auditflow_core::CallKind;
use auditflow_core::CallRecord;
use auditflow_core::CallStatus;
use auditflow_core::CheckpointId;
use auditflow_core::CheckpointRecord;
use auditflow_core::DeterminismClass;
use auditflow_core::EdgeId;
use auditflow_core::EdgeRecord;
use auditflow_core::ErrorId;
use auditflow_core::EventId;
use auditflow_core::ExportStatus;
use auditflow_core::GroupId;
use auditflow_core::HashError;
use auditflow_core::IntegrityError;
use auditflow_core::NodeId;
use auditflow_core::NodeRecord;
use auditflow_core::NodeStateRecord;
use auditflow_core::NodeStateStatus;
use auditflow_core::NodeType;
use auditflow_core::OutcomeId;
use auditflow_core::ReproducibilityGrade;
use auditflow_core::RoutingEventRecord;
use auditflow_core::RoutingMode;
use auditflow_core::RowId;
use auditflow_core::RowRecord;
use auditflow_core::RunId;
use auditflow_core::RunRecord;
use auditflow_core::RunStatus;
use auditflow_core::SecretResolutionRecord;
use auditflow_core::SourceFieldResolutionRecord;
use auditflow_core::StateId;
use auditflow_core::Timestamp;
use auditflow_core::TokenId;
use auditflow_core::TokenOutcomeKind;
use auditflow_core::TokenOutcomeRecord;
use auditflow_core::TokenParentRecord;
use auditflow_core::TokenRecord;
use auditflow_core::TransformErrorRecord;
use auditflow_core::ValidationErrorRecord;
use auditflow_core::stable_hash;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use serde_json::Value;
use serde_json::json;

use crate::database::LandscapeDb;
use crate::database::LandscapeError;
use crate::database::map_sqlite_error;
use crate::journal::JournalLine;
use crate::payload::FilesystemPayloadStore;
use crate::schema;

// ============================================================================
// SECTION: Specs
// ============================================================================

/// Inputs for creating a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSpec {
    /// Owning row.
    pub row_id: RowId,
    /// Branch name for fork children.
    pub branch_name: Option<String>,
    /// Fork group shared by sibling fork children.
    pub fork_group_id: Option<GroupId>,
    /// Join group stamped on a coalesce-merged token.
    pub join_group_id: Option<GroupId>,
    /// Expand group shared by sibling deaggregation children.
    pub expand_group_id: Option<GroupId>,
    /// Pipeline step index at creation.
    pub step_index: Option<u32>,
}

impl TokenSpec {
    /// Creates a plain token spec for a row.
    #[must_use]
    pub const fn for_row(row_id: RowId) -> Self {
        Self {
            row_id,
            branch_name: None,
            fork_group_id: None,
            join_group_id: None,
            expand_group_id: None,
            step_index: None,
        }
    }
}

/// Inputs for recording an external call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSpec {
    /// Owning node state.
    pub state_id: StateId,
    /// Position among the state's calls.
    pub call_index: u32,
    /// Call classification.
    pub kind: CallKind,
    /// Call status.
    pub status: CallStatus,
    /// Request payload hash.
    pub request_hash: String,
    /// Response payload hash, when available.
    pub response_hash: Option<String>,
    /// Round-trip latency in milliseconds.
    pub latency_ms: Option<f64>,
    /// Provider label.
    pub provider: Option<String>,
    /// Error message, when failed.
    pub error: Option<String>,
}

// ============================================================================
// SECTION: Recorder
// ============================================================================

/// Write facade over the landscape database.
#[derive(Debug, Clone)]
pub struct LandscapeRecorder {
    /// Underlying database handle.
    db: LandscapeDb,
    /// Optional payload store for oversize row bodies.
    payloads: Option<Arc<FilesystemPayloadStore>>,
}

impl LandscapeRecorder {
    /// Creates a recorder over the given database.
    #[must_use]
    pub const fn new(db: LandscapeDb) -> Self {
        Self {
            db,
            payloads: None,
        }
    }

    /// Attaches a payload store for row bodies.
    #[must_use]
    pub fn with_payload_store(mut self, store: Arc<FilesystemPayloadStore>) -> Self {
        self.payloads = Some(store);
        self
    }

    /// Returns the underlying database handle.
    #[must_use]
    pub const fn db(&self) -> &LandscapeDb {
        &self.db
    }

    /// Returns the attached payload store, when configured.
    #[must_use]
    pub fn payload_store(&self) -> Option<&Arc<FilesystemPayloadStore>> {
        self.payloads.as_ref()
    }

    // ------------------------------------------------------------------
    // Run lifecycle
    // ------------------------------------------------------------------

    /// Begins a run with the resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when the config cannot be canonicalized or
    /// the insert fails.
    pub fn begin_run(
        &self,
        config: &Value,
        source_schema: Option<&Value>,
    ) -> Result<RunRecord, LandscapeError> {
        let record = RunRecord {
            run_id: RunId::mint(),
            status: RunStatus::Running,
            started_at: Timestamp::now(),
            completed_at: None,
            config_hash: stable_hash(config).map_err(canonicalization)?,
            canonical_version: CANONICAL_VERSION.to_string(),
            reproducibility_grade: None,
            source_schema: source_schema.cloned(),
            export_status: None,
            export_error: None,
            export_final_hash: None,
        };
        let source_schema_json = record
            .source_schema
            .as_ref()
            .map(|schema| serde_json::to_string(schema))
            .transpose()
            .map_err(|err| LandscapeError::Invalid(err.to_string()))?;
        self.db.write(|tx, lines| {
            exec(
                tx,
                lines,
                "INSERT INTO runs (run_id, status, started_at, config_hash, \
                 canonical_version, source_schema_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                json!([
                    record.run_id.as_str(),
                    schema::run_status_label(record.status),
                    record.started_at.as_unix_millis(),
                    record.config_hash.as_str(),
                    record.canonical_version.as_str(),
                    source_schema_json.as_deref(),
                ]),
                params![
                    record.run_id.as_str(),
                    schema::run_status_label(record.status),
                    record.started_at.as_unix_millis(),
                    record.config_hash,
                    record.canonical_version,
                    source_schema_json.as_deref(),
                ],
            )?;
            Ok(())
        })?;
        Ok(record)
    }

    /// Updates the run status without completing the run.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::NotFound`] for an unknown run.
    pub fn update_run_status(
        &self,
        run_id: &RunId,
        status: RunStatus,
    ) -> Result<(), LandscapeError> {
        self.db.write(|tx, lines| {
            let changed = exec(
                tx,
                lines,
                "UPDATE runs SET status = ?1 WHERE run_id = ?2",
                json!([schema::run_status_label(status), run_id.as_str()]),
                params![schema::run_status_label(status), run_id.as_str()],
            )?;
            require_found(changed, "run", run_id.as_str())
        })
    }

    /// Completes the run with a terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::NotFound`] for an unknown run.
    pub fn complete_run(&self, run_id: &RunId, status: RunStatus) -> Result<(), LandscapeError> {
        let completed_at = Timestamp::now().as_unix_millis();
        self.db.write(|tx, lines| {
            let changed = exec(
                tx,
                lines,
                "UPDATE runs SET status = ?1, completed_at = ?2 WHERE run_id = ?3",
                json!([schema::run_status_label(status), completed_at, run_id.as_str()]),
                params![schema::run_status_label(status), completed_at, run_id.as_str()],
            )?;
            require_found(changed, "run", run_id.as_str())
        })
    }

    /// Computes the reproducibility grade and completes the run.
    ///
    /// The grade is `Full` when every node that executed at least one state
    /// declared deterministic behavior, `Limited` otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::NotFound`] for an unknown run.
    pub fn finalize_run(&self, run_id: &RunId) -> Result<ReproducibilityGrade, LandscapeError> {
        let completed_at = Timestamp::now().as_unix_millis();
        self.db.write(|tx, lines| {
            let non_deterministic: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM nodes n WHERE n.run_id = ?1 AND n.determinism != \
                     'deterministic' AND EXISTS (SELECT 1 FROM node_states s WHERE s.node_id \
                     = n.node_id)",
                    params![run_id.as_str()],
                    |row| row.get(0),
                )
                .map_err(|err| map_sqlite_error(&err))?;
            let grade = if non_deterministic == 0 {
                ReproducibilityGrade::Full
            } else {
                ReproducibilityGrade::Limited
            };
            let changed = exec(
                tx,
                lines,
                "UPDATE runs SET status = ?1, completed_at = ?2, reproducibility_grade = ?3 \
                 WHERE run_id = ?4",
                json!([
                    schema::run_status_label(RunStatus::Completed),
                    completed_at,
                    schema::grade_label(grade),
                    run_id.as_str(),
                ]),
                params![
                    schema::run_status_label(RunStatus::Completed),
                    completed_at,
                    schema::grade_label(grade),
                    run_id.as_str(),
                ],
            )?;
            require_found(changed, "run", run_id.as_str())?;
            Ok(grade)
        })
    }

    /// Sets the export status on the run.
    ///
    /// A `Failed` status stores the provided error; any other status clears
    /// it. The final chained hash is stored when provided.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::NotFound`] for an unknown run.
    pub fn set_export_status(
        &self,
        run_id: &RunId,
        status: ExportStatus,
        error: Option<&str>,
        final_hash: Option<&str>,
    ) -> Result<(), LandscapeError> {
        let stored_error = if status == ExportStatus::Failed {
            error
        } else {
            None
        };
        self.db.write(|tx, lines| {
            let changed = exec(
                tx,
                lines,
                "UPDATE runs SET export_status = ?1, export_error = ?2, export_final_hash = \
                 COALESCE(?3, export_final_hash) WHERE run_id = ?4",
                json!([
                    schema::export_status_label(status),
                    stored_error,
                    final_hash,
                    run_id.as_str(),
                ]),
                params![
                    schema::export_status_label(status),
                    stored_error,
                    final_hash,
                    run_id.as_str(),
                ],
            )?;
            require_found(changed, "run", run_id.as_str())
        })
    }

    // ------------------------------------------------------------------
    // Graph registration
    // ------------------------------------------------------------------

    /// Registers a node for the run.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on hashing or insert failure.
    #[allow(clippy::too_many_arguments, reason = "Node registration is one row of attributes.")]
    pub fn register_node(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
        plugin_name: &str,
        node_type: NodeType,
        plugin_version: &str,
        determinism: DeterminismClass,
        config: &Value,
        sequence_index: u32,
    ) -> Result<NodeRecord, LandscapeError> {
        let record = NodeRecord {
            node_id: node_id.clone(),
            run_id: run_id.clone(),
            plugin_name: plugin_name.to_string(),
            node_type,
            plugin_version: plugin_version.to_string(),
            determinism,
            config_hash: stable_hash(config).map_err(canonicalization)?,
            sequence_index,
            registered_at: Timestamp::now(),
        };
        self.db.write(|tx, lines| {
            exec(
                tx,
                lines,
                "INSERT INTO nodes (node_id, run_id, plugin_name, node_type, plugin_version, \
                 determinism, config_hash, sequence_index, registered_at) VALUES (?1, ?2, ?3, \
                 ?4, ?5, ?6, ?7, ?8, ?9)",
                json!([
                    record.node_id.as_str(),
                    record.run_id.as_str(),
                    record.plugin_name.as_str(),
                    schema::node_type_label(record.node_type),
                    record.plugin_version.as_str(),
                    schema::determinism_label(record.determinism),
                    record.config_hash.as_str(),
                    record.sequence_index,
                    record.registered_at.as_unix_millis(),
                ]),
                params![
                    record.node_id.as_str(),
                    record.run_id.as_str(),
                    record.plugin_name,
                    schema::node_type_label(record.node_type),
                    record.plugin_version,
                    schema::determinism_label(record.determinism),
                    record.config_hash,
                    record.sequence_index,
                    record.registered_at.as_unix_millis(),
                ],
            )?;
            Ok(())
        })?;
        Ok(record)
    }

    /// Registers a labeled edge for the run.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::Conflict`] for a duplicate (origin, label)
    /// pair.
    pub fn register_edge(
        &self,
        run_id: &RunId,
        from_node_id: &NodeId,
        to_node_id: &NodeId,
        label: &str,
        mode: RoutingMode,
    ) -> Result<EdgeRecord, LandscapeError> {
        let record = EdgeRecord {
            edge_id: EdgeId::mint(),
            run_id: run_id.clone(),
            from_node_id: from_node_id.clone(),
            to_node_id: to_node_id.clone(),
            label: label.to_string(),
            mode,
            registered_at: Timestamp::now(),
        };
        self.db.write(|tx, lines| {
            exec(
                tx,
                lines,
                "INSERT INTO edges (edge_id, run_id, from_node_id, to_node_id, label, mode, \
                 registered_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                json!([
                    record.edge_id.as_str(),
                    record.run_id.as_str(),
                    record.from_node_id.as_str(),
                    record.to_node_id.as_str(),
                    record.label.as_str(),
                    schema::routing_mode_label(record.mode),
                    record.registered_at.as_unix_millis(),
                ]),
                params![
                    record.edge_id.as_str(),
                    record.run_id.as_str(),
                    record.from_node_id.as_str(),
                    record.to_node_id.as_str(),
                    record.label,
                    schema::routing_mode_label(record.mode),
                    record.registered_at.as_unix_millis(),
                ],
            )?;
            Ok(())
        })?;
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Rows and tokens
    // ------------------------------------------------------------------

    /// Creates a row from source data.
    ///
    /// The source data hash is computed here and never changes thereafter.
    /// When a payload store is attached the canonical body is stored and the
    /// reference recorded.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on hashing, payload store, or insert
    /// failure.
    pub fn create_row(
        &self,
        run_id: &RunId,
        source_node_id: &NodeId,
        row_index: u64,
        data: &Value,
    ) -> Result<RowRecord, LandscapeError> {
        let source_data_hash = stable_hash(data).map_err(canonicalization)?;
        let payload_ref = match &self.payloads {
            Some(store) => {
                let body = serde_json::to_vec(data)
                    .map_err(|err| LandscapeError::Invalid(err.to_string()))?;
                Some(store.store(&body).map_err(|err| LandscapeError::Io(err.to_string()))?)
            }
            None => None,
        };
        let record = RowRecord {
            row_id: RowId::mint(),
            run_id: run_id.clone(),
            source_node_id: source_node_id.clone(),
            row_index,
            source_data_hash,
            payload_ref,
            created_at: Timestamp::now(),
        };
        #[allow(clippy::cast_possible_wrap, reason = "row index fits in i64 in practice")]
        let row_index_param = record.row_index as i64;
        self.db.write(|tx, lines| {
            exec(
                tx,
                lines,
                "INSERT INTO rows (row_id, run_id, source_node_id, row_index, \
                 source_data_hash, payload_ref, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                json!([
                    record.row_id.as_str(),
                    record.run_id.as_str(),
                    record.source_node_id.as_str(),
                    record.row_index,
                    record.source_data_hash.as_str(),
                    record.payload_ref.as_deref(),
                    record.created_at.as_unix_millis(),
                ]),
                params![
                    record.row_id.as_str(),
                    record.run_id.as_str(),
                    record.source_node_id.as_str(),
                    row_index_param,
                    record.source_data_hash,
                    record.payload_ref.as_deref(),
                    record.created_at.as_unix_millis(),
                ],
            )?;
            Ok(())
        })?;
        Ok(record)
    }

    /// Creates a token.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when the owning row does not exist.
    pub fn create_token(&self, spec: TokenSpec) -> Result<TokenRecord, LandscapeError> {
        let record = TokenRecord {
            token_id: TokenId::mint(),
            row_id: spec.row_id,
            branch_name: spec.branch_name,
            fork_group_id: spec.fork_group_id,
            join_group_id: spec.join_group_id,
            expand_group_id: spec.expand_group_id,
            step_index: spec.step_index,
            created_at: Timestamp::now(),
        };
        self.db.write(|tx, lines| {
            exec(
                tx,
                lines,
                "INSERT INTO tokens (token_id, row_id, branch_name, fork_group_id, \
                 join_group_id, expand_group_id, step_index, created_at) VALUES (?1, ?2, ?3, \
                 ?4, ?5, ?6, ?7, ?8)",
                json!([
                    record.token_id.as_str(),
                    record.row_id.as_str(),
                    record.branch_name.as_deref(),
                    record.fork_group_id.as_ref().map(GroupId::as_str),
                    record.join_group_id.as_ref().map(GroupId::as_str),
                    record.expand_group_id.as_ref().map(GroupId::as_str),
                    record.step_index,
                    record.created_at.as_unix_millis(),
                ]),
                params![
                    record.token_id.as_str(),
                    record.row_id.as_str(),
                    record.branch_name.as_deref(),
                    record.fork_group_id.as_ref().map(GroupId::as_str),
                    record.join_group_id.as_ref().map(GroupId::as_str),
                    record.expand_group_id.as_ref().map(GroupId::as_str),
                    record.step_index,
                    record.created_at.as_unix_millis(),
                ],
            )?;
            Ok(())
        })?;
        Ok(record)
    }

    /// Adds a parent edge to the token lineage DAG.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::Conflict`] for a duplicate ordinal or
    /// parent, and an integrity error for unknown tokens.
    pub fn add_token_parent(
        &self,
        token_id: &TokenId,
        parent_token_id: &TokenId,
        ordinal: u32,
    ) -> Result<TokenParentRecord, LandscapeError> {
        let record = TokenParentRecord {
            token_id: token_id.clone(),
            parent_token_id: parent_token_id.clone(),
            ordinal,
        };
        self.db.write(|tx, lines| {
            exec(
                tx,
                lines,
                "INSERT INTO token_parents (token_id, parent_token_id, ordinal) VALUES (?1, \
                 ?2, ?3)",
                json!([record.token_id.as_str(), record.parent_token_id.as_str(), record.ordinal]),
                params![
                    record.token_id.as_str(),
                    record.parent_token_id.as_str(),
                    record.ordinal,
                ],
            )?;
            Ok(())
        })?;
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Node states
    // ------------------------------------------------------------------

    /// Opens a node state for one execution attempt.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] on hashing or insert failure.
    pub fn begin_node_state(
        &self,
        token_id: &TokenId,
        node_id: &NodeId,
        run_id: &RunId,
        step_index: u32,
        attempt: u32,
        input: &Value,
    ) -> Result<NodeStateRecord, LandscapeError> {
        let record = NodeStateRecord {
            state_id: StateId::mint(),
            token_id: token_id.clone(),
            node_id: node_id.clone(),
            run_id: run_id.clone(),
            step_index,
            attempt,
            status: NodeStateStatus::Open,
            input_hash: stable_hash(input).map_err(canonicalization)?,
            output_hash: None,
            duration_ms: None,
            error: None,
            started_at: Timestamp::now(),
            completed_at: None,
        };
        self.db.write(|tx, lines| {
            exec(
                tx,
                lines,
                "INSERT INTO node_states (state_id, token_id, node_id, run_id, step_index, \
                 attempt, status, input_hash, started_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, \
                 ?8, ?9)",
                json!([
                    record.state_id.as_str(),
                    record.token_id.as_str(),
                    record.node_id.as_str(),
                    record.run_id.as_str(),
                    record.step_index,
                    record.attempt,
                    schema::state_status_label(record.status),
                    record.input_hash.as_str(),
                    record.started_at.as_unix_millis(),
                ]),
                params![
                    record.state_id.as_str(),
                    record.token_id.as_str(),
                    record.node_id.as_str(),
                    record.run_id.as_str(),
                    record.step_index,
                    record.attempt,
                    schema::state_status_label(record.status),
                    record.input_hash,
                    record.started_at.as_unix_millis(),
                ],
            )?;
            Ok(())
        })?;
        Ok(record)
    }

    /// Transitions an open node state to `Completed` or `Failed`.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::Invalid`] for an `Open` target status or an
    /// already-closed state, and [`LandscapeError::NotFound`] for an unknown
    /// state.
    pub fn complete_node_state(
        &self,
        state_id: &StateId,
        status: NodeStateStatus,
        output: Option<&Value>,
        duration_ms: Option<f64>,
        error: Option<&Value>,
    ) -> Result<(), LandscapeError> {
        if status == NodeStateStatus::Open {
            return Err(LandscapeError::Invalid(
                "complete_node_state requires a terminal status".to_string(),
            ));
        }
        let output_hash = output.map(stable_hash).transpose().map_err(canonicalization)?;
        let error_json = error
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| LandscapeError::Invalid(err.to_string()))?;
        let completed_at = Timestamp::now().as_unix_millis();
        self.db.write(|tx, lines| {
            let changed = exec(
                tx,
                lines,
                "UPDATE node_states SET status = ?1, output_hash = ?2, duration_ms = ?3, \
                 error_json = ?4, completed_at = ?5 WHERE state_id = ?6 AND status = 'open'",
                json!([
                    schema::state_status_label(status),
                    output_hash.as_deref(),
                    duration_ms,
                    error_json.as_deref(),
                    completed_at,
                    state_id.as_str(),
                ]),
                params![
                    schema::state_status_label(status),
                    output_hash.as_deref(),
                    duration_ms,
                    error_json.as_deref(),
                    completed_at,
                    state_id.as_str(),
                ],
            )?;
            if changed == 1 {
                return Ok(());
            }
            let exists: Option<String> = tx
                .query_row(
                    "SELECT status FROM node_states WHERE state_id = ?1",
                    params![state_id.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|err| map_sqlite_error(&err))?;
            match exists {
                None => Err(LandscapeError::NotFound(format!("node state {state_id}"))),
                Some(current) => Err(LandscapeError::Invalid(format!(
                    "node state {state_id} is already '{current}'"
                ))),
            }
        })
    }

    // ------------------------------------------------------------------
    // Routing events and calls
    // ------------------------------------------------------------------

    /// Records one routing event for a state.
    ///
    /// The ordinal continues the state's existing event sequence.
    ///
    /// # Errors
    ///
    /// Returns an integrity error for an unknown edge or state.
    pub fn record_routing_event(
        &self,
        state_id: &StateId,
        edge_id: &EdgeId,
        mode: RoutingMode,
        reason: Option<&Value>,
    ) -> Result<RoutingEventRecord, LandscapeError> {
        let mut events = self.record_routing_events(state_id, &[(edge_id.clone(), mode)], reason)?;
        events
            .pop()
            .ok_or_else(|| LandscapeError::Invalid("routing event insert vanished".to_string()))
    }

    /// Records one routing event per destination, in order.
    ///
    /// # Errors
    ///
    /// Returns an integrity error for an unknown edge or state.
    pub fn record_routing_events(
        &self,
        state_id: &StateId,
        routes: &[(EdgeId, RoutingMode)],
        reason: Option<&Value>,
    ) -> Result<Vec<RoutingEventRecord>, LandscapeError> {
        let reason_json = reason
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| LandscapeError::Invalid(err.to_string()))?;
        self.db.write(|tx, lines| {
            let existing: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM routing_events WHERE state_id = ?1",
                    params![state_id.as_str()],
                    |row| row.get(0),
                )
                .map_err(|err| map_sqlite_error(&err))?;
            let base = u32::try_from(existing).unwrap_or(u32::MAX);
            let mut records = Vec::with_capacity(routes.len());
            for (offset, (edge_id, mode)) in routes.iter().enumerate() {
                let record = RoutingEventRecord {
                    event_id: EventId::mint(),
                    state_id: state_id.clone(),
                    edge_id: edge_id.clone(),
                    ordinal: base + u32::try_from(offset).unwrap_or(u32::MAX),
                    mode: *mode,
                    reason: reason.cloned(),
                    created_at: Timestamp::now(),
                };
                exec(
                    tx,
                    lines,
                    "INSERT INTO routing_events (event_id, state_id, edge_id, ordinal, mode, \
                     reason_json, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    json!([
                        record.event_id.as_str(),
                        record.state_id.as_str(),
                        record.edge_id.as_str(),
                        record.ordinal,
                        schema::routing_mode_label(record.mode),
                        reason_json.as_deref(),
                        record.created_at.as_unix_millis(),
                    ]),
                    params![
                        record.event_id.as_str(),
                        record.state_id.as_str(),
                        record.edge_id.as_str(),
                        record.ordinal,
                        schema::routing_mode_label(record.mode),
                        reason_json.as_deref(),
                        record.created_at.as_unix_millis(),
                    ],
                )?;
                records.push(record);
            }
            Ok(records)
        })
    }

    /// Records an external call made from within a node state.
    ///
    /// # Errors
    ///
    /// Returns an integrity error for an unknown state.
    pub fn record_call(&self, spec: CallSpec) -> Result<CallRecord, LandscapeError> {
        let record = CallRecord {
            call_id: CallId::mint(),
            state_id: spec.state_id,
            call_index: spec.call_index,
            kind: spec.kind,
            status: spec.status,
            request_hash: spec.request_hash,
            response_hash: spec.response_hash,
            latency_ms: spec.latency_ms,
            provider: spec.provider,
            error: spec.error,
            created_at: Timestamp::now(),
        };
        self.db.write(|tx, lines| {
            exec(
                tx,
                lines,
                "INSERT INTO calls (call_id, state_id, call_index, kind, status, \
                 request_hash, response_hash, latency_ms, provider, error, created_at) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                json!([
                    record.call_id.as_str(),
                    record.state_id.as_str(),
                    record.call_index,
                    schema::call_kind_label(record.kind),
                    schema::call_status_label(record.status),
                    record.request_hash.as_str(),
                    record.response_hash.as_deref(),
                    record.latency_ms,
                    record.provider.as_deref(),
                    record.error.as_deref(),
                    record.created_at.as_unix_millis(),
                ]),
                params![
                    record.call_id.as_str(),
                    record.state_id.as_str(),
                    record.call_index,
                    schema::call_kind_label(record.kind),
                    schema::call_status_label(record.status),
                    record.request_hash,
                    record.response_hash.as_deref(),
                    record.latency_ms,
                    record.provider.as_deref(),
                    record.error.as_deref(),
                    record.created_at.as_unix_millis(),
                ],
            )?;
            Ok(())
        })?;
        Ok(record)
    }

    /// Records the terminal disposition of a token.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::Conflict`] when the (run, token) pair
    /// already has an outcome.
    pub fn record_token_outcome(
        &self,
        run_id: &RunId,
        token_id: &TokenId,
        outcome: TokenOutcomeKind,
        sink_name: Option<&str>,
    ) -> Result<TokenOutcomeRecord, LandscapeError> {
        let record = TokenOutcomeRecord {
            outcome_id: OutcomeId::mint(),
            run_id: run_id.clone(),
            token_id: token_id.clone(),
            outcome,
            is_terminal: true,
            sink_name: sink_name.map(str::to_string),
            recorded_at: Timestamp::now(),
        };
        self.db.write(|tx, lines| {
            exec(
                tx,
                lines,
                "INSERT INTO token_outcomes (outcome_id, run_id, token_id, outcome, \
                 is_terminal, sink_name, recorded_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                json!([
                    record.outcome_id.as_str(),
                    record.run_id.as_str(),
                    record.token_id.as_str(),
                    schema::outcome_label(record.outcome),
                    record.is_terminal,
                    record.sink_name.as_deref(),
                    record.recorded_at.as_unix_millis(),
                ]),
                params![
                    record.outcome_id.as_str(),
                    record.run_id.as_str(),
                    record.token_id.as_str(),
                    schema::outcome_label(record.outcome),
                    record.is_terminal,
                    record.sink_name.as_deref(),
                    record.recorded_at.as_unix_millis(),
                ],
            )?;
            Ok(())
        })?;
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Recorded errors and resolutions
    // ------------------------------------------------------------------

    /// Records a source validation failure against a row.
    ///
    /// # Errors
    ///
    /// Returns an integrity error for unknown row or node references.
    pub fn record_validation_error(
        &self,
        run_id: &RunId,
        row_id: &RowId,
        node_id: &NodeId,
        violation: &Value,
        policy_applied: &str,
    ) -> Result<ValidationErrorRecord, LandscapeError> {
        let record = ValidationErrorRecord {
            error_id: ErrorId::mint(),
            run_id: run_id.clone(),
            row_id: row_id.clone(),
            node_id: node_id.clone(),
            violation: violation.clone(),
            policy_applied: policy_applied.to_string(),
            created_at: Timestamp::now(),
        };
        let violation_json = serde_json::to_string(&record.violation)
            .map_err(|err| LandscapeError::Invalid(err.to_string()))?;
        self.db.write(|tx, lines| {
            exec(
                tx,
                lines,
                "INSERT INTO validation_errors (error_id, run_id, row_id, node_id, \
                 violation_json, policy_applied, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                json!([
                    record.error_id.as_str(),
                    record.run_id.as_str(),
                    record.row_id.as_str(),
                    record.node_id.as_str(),
                    violation_json.as_str(),
                    record.policy_applied.as_str(),
                    record.created_at.as_unix_millis(),
                ]),
                params![
                    record.error_id.as_str(),
                    record.run_id.as_str(),
                    record.row_id.as_str(),
                    record.node_id.as_str(),
                    violation_json,
                    record.policy_applied,
                    record.created_at.as_unix_millis(),
                ],
            )?;
            Ok(())
        })?;
        Ok(record)
    }

    /// Records a transform failure against a node state.
    ///
    /// # Errors
    ///
    /// Returns an integrity error for unknown state or token references.
    pub fn record_transform_error(
        &self,
        run_id: &RunId,
        state_id: &StateId,
        token_id: &TokenId,
        reason: &Value,
        retryable: bool,
    ) -> Result<TransformErrorRecord, LandscapeError> {
        let record = TransformErrorRecord {
            error_id: ErrorId::mint(),
            run_id: run_id.clone(),
            state_id: state_id.clone(),
            token_id: token_id.clone(),
            reason: reason.clone(),
            retryable,
            created_at: Timestamp::now(),
        };
        let reason_json = serde_json::to_string(&record.reason)
            .map_err(|err| LandscapeError::Invalid(err.to_string()))?;
        self.db.write(|tx, lines| {
            exec(
                tx,
                lines,
                "INSERT INTO transform_errors (error_id, run_id, state_id, token_id, \
                 reason_json, retryable, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                json!([
                    record.error_id.as_str(),
                    record.run_id.as_str(),
                    record.state_id.as_str(),
                    record.token_id.as_str(),
                    reason_json.as_str(),
                    record.retryable,
                    record.created_at.as_unix_millis(),
                ]),
                params![
                    record.error_id.as_str(),
                    record.run_id.as_str(),
                    record.state_id.as_str(),
                    record.token_id.as_str(),
                    reason_json,
                    record.retryable,
                    record.created_at.as_unix_millis(),
                ],
            )?;
            Ok(())
        })?;
        Ok(record)
    }

    /// Records the source's original-to-normalized header mapping.
    ///
    /// # Errors
    ///
    /// Returns an integrity error for unknown run or node references.
    pub fn record_source_field_resolution(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
        mappings: &[(String, String)],
    ) -> Result<Vec<SourceFieldResolutionRecord>, LandscapeError> {
        self.db.write(|tx, lines| {
            let mut records = Vec::with_capacity(mappings.len());
            for (index, (original_name, normalized_name)) in mappings.iter().enumerate() {
                let record = SourceFieldResolutionRecord {
                    run_id: run_id.clone(),
                    node_id: node_id.clone(),
                    original_name: original_name.clone(),
                    normalized_name: normalized_name.clone(),
                    ordinal: u32::try_from(index).unwrap_or(u32::MAX),
                    created_at: Timestamp::now(),
                };
                exec(
                    tx,
                    lines,
                    "INSERT INTO source_field_resolutions (run_id, node_id, original_name, \
                     normalized_name, ordinal, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    json!([
                        record.run_id.as_str(),
                        record.node_id.as_str(),
                        record.original_name.as_str(),
                        record.normalized_name.as_str(),
                        record.ordinal,
                        record.created_at.as_unix_millis(),
                    ]),
                    params![
                        record.run_id.as_str(),
                        record.node_id.as_str(),
                        record.original_name,
                        record.normalized_name,
                        record.ordinal,
                        record.created_at.as_unix_millis(),
                    ],
                )?;
                records.push(record);
            }
            Ok(records)
        })
    }

    /// Records the names (never values) of resolved secrets.
    ///
    /// # Errors
    ///
    /// Returns an integrity error for an unknown run reference.
    pub fn record_secret_resolutions(
        &self,
        run_id: &RunId,
        resolutions: &[(String, String)],
    ) -> Result<Vec<SecretResolutionRecord>, LandscapeError> {
        self.db.write(|tx, lines| {
            let mut records = Vec::with_capacity(resolutions.len());
            for (name, provider) in resolutions {
                let record = SecretResolutionRecord {
                    run_id: run_id.clone(),
                    name: name.clone(),
                    provider: provider.clone(),
                    created_at: Timestamp::now(),
                };
                exec(
                    tx,
                    lines,
                    "INSERT INTO secret_resolutions (run_id, name, provider, created_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    json!([
                        record.run_id.as_str(),
                        record.name.as_str(),
                        record.provider.as_str(),
                        record.created_at.as_unix_millis(),
                    ]),
                    params![
                        record.run_id.as_str(),
                        record.name,
                        record.provider,
                        record.created_at.as_unix_millis(),
                    ],
                )?;
                records.push(record);
            }
            Ok(records)
        })
    }

    // ------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------

    /// Creates a draft aggregation batch.
    ///
    /// # Errors
    ///
    /// Returns an integrity error for unknown run or node references.
    pub fn create_batch(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
    ) -> Result<BatchRecord, LandscapeError> {
        self.insert_batch(run_id, node_id, 1)
    }

    /// Adds a member token to a batch.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::Conflict`] for a duplicate ordinal.
    pub fn add_batch_member(
        &self,
        batch_id: &BatchId,
        token_id: &TokenId,
        ordinal: u32,
    ) -> Result<BatchMemberRecord, LandscapeError> {
        let record = BatchMemberRecord {
            batch_id: batch_id.clone(),
            token_id: token_id.clone(),
            ordinal,
        };
        self.db.write(|tx, lines| {
            exec(
                tx,
                lines,
                "INSERT INTO batch_members (batch_id, token_id, ordinal) VALUES (?1, ?2, ?3)",
                json!([record.batch_id.as_str(), record.token_id.as_str(), record.ordinal]),
                params![record.batch_id.as_str(), record.token_id.as_str(), record.ordinal],
            )?;
            Ok(())
        })?;
        Ok(record)
    }

    /// Updates the batch status machine.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::NotFound`] for an unknown batch.
    pub fn update_batch_status(
        &self,
        batch_id: &BatchId,
        status: BatchStatus,
        trigger: Option<BatchTrigger>,
    ) -> Result<(), LandscapeError> {
        let completed_at = matches!(status, BatchStatus::Completed | BatchStatus::Failed)
            .then(|| Timestamp::now().as_unix_millis());
        self.db.write(|tx, lines| {
            let changed = exec(
                tx,
                lines,
                "UPDATE batches SET status = ?1, trigger_kind = COALESCE(?2, trigger_kind), \
                 completed_at = COALESCE(?3, completed_at) WHERE batch_id = ?4",
                json!([
                    schema::batch_status_label(status),
                    trigger.map(schema::batch_trigger_label),
                    completed_at,
                    batch_id.as_str(),
                ]),
                params![
                    schema::batch_status_label(status),
                    trigger.map(schema::batch_trigger_label),
                    completed_at,
                    batch_id.as_str(),
                ],
            )?;
            require_found(changed, "batch", batch_id.as_str())
        })
    }

    /// Retries a failed batch: a fresh batch id, `attempt + 1`, members
    /// copied in order.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::NotFound`] for an unknown batch.
    pub fn retry_batch(&self, batch_id: &BatchId) -> Result<BatchRecord, LandscapeError> {
        let source = self.get_batch(batch_id)?.ok_or_else(|| {
            LandscapeError::NotFound(format!("batch {batch_id}"))
        })?;
        let members = self.get_batch_members(batch_id)?;
        let retry = self.insert_batch(&source.run_id, &source.node_id, source.attempt + 1)?;
        for member in members {
            self.add_batch_member(&retry.batch_id, &member.token_id, member.ordinal)?;
        }
        Ok(retry)
    }

    /// Inserts a batch row with the given attempt.
    fn insert_batch(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
        attempt: u32,
    ) -> Result<BatchRecord, LandscapeError> {
        let record = BatchRecord {
            batch_id: BatchId::mint(),
            run_id: run_id.clone(),
            node_id: node_id.clone(),
            status: BatchStatus::Draft,
            attempt,
            trigger: None,
            created_at: Timestamp::now(),
            completed_at: None,
        };
        self.db.write(|tx, lines| {
            exec(
                tx,
                lines,
                "INSERT INTO batches (batch_id, run_id, node_id, status, attempt, \
                 created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                json!([
                    record.batch_id.as_str(),
                    record.run_id.as_str(),
                    record.node_id.as_str(),
                    schema::batch_status_label(record.status),
                    record.attempt,
                    record.created_at.as_unix_millis(),
                ]),
                params![
                    record.batch_id.as_str(),
                    record.run_id.as_str(),
                    record.node_id.as_str(),
                    schema::batch_status_label(record.status),
                    record.attempt,
                    record.created_at.as_unix_millis(),
                ],
            )?;
            Ok(())
        })?;
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Checkpoints
    // ------------------------------------------------------------------

    /// Records a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an integrity error for unknown references.
    pub fn record_checkpoint(
        &self,
        run_id: &RunId,
        token_id: &TokenId,
        node_id: &NodeId,
        sequence_number: u64,
        graph_hash: &str,
    ) -> Result<CheckpointRecord, LandscapeError> {
        let record = CheckpointRecord {
            checkpoint_id: CheckpointId::mint(),
            run_id: run_id.clone(),
            token_id: token_id.clone(),
            node_id: node_id.clone(),
            sequence_number,
            graph_hash: graph_hash.to_string(),
            created_at: Timestamp::now(),
        };
        #[allow(clippy::cast_possible_wrap, reason = "sequence number fits in i64 in practice")]
        let sequence_number_param = record.sequence_number as i64;
        self.db.write(|tx, lines| {
            exec(
                tx,
                lines,
                "INSERT INTO checkpoints (checkpoint_id, run_id, token_id, node_id, \
                 sequence_number, graph_hash, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                json!([
                    record.checkpoint_id.as_str(),
                    record.run_id.as_str(),
                    record.token_id.as_str(),
                    record.node_id.as_str(),
                    record.sequence_number,
                    record.graph_hash.as_str(),
                    record.created_at.as_unix_millis(),
                ]),
                params![
                    record.checkpoint_id.as_str(),
                    record.run_id.as_str(),
                    record.token_id.as_str(),
                    record.node_id.as_str(),
                    sequence_number_param,
                    record.graph_hash,
                    record.created_at.as_unix_millis(),
                ],
            )?;
            Ok(())
        })?;
        Ok(record)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Maps a canonicalization failure to a Tier-1 integrity error.
fn canonicalization(err: HashError) -> LandscapeError {
    LandscapeError::Integrity(IntegrityError::InvalidCanonicalJson(err.to_string()))
}

/// Executes a journaled statement inside a transaction.
fn exec(
    tx: &Transaction<'_>,
    lines: &mut Vec<JournalLine>,
    sql: &str,
    journal_params: Value,
    params: impl rusqlite::Params,
) -> Result<usize, LandscapeError> {
    let changed = tx.execute(sql, params).map_err(|err| map_sqlite_error(&err))?;
    lines.push(JournalLine::new(sql, journal_params));
    Ok(changed)
}

/// Converts an update count into a not-found error when zero rows changed.
fn require_found(changed: usize, entity: &str, id: &str) -> Result<(), LandscapeError> {
    if changed == 0 {
        return Err(LandscapeError::NotFound(format!("{entity} {id}")));
    }
    Ok(())
}
