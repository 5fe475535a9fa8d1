// auditflow-landscape/src/schema.rs
// ============================================================================
// Module: Landscape Schema
// Description: DDL, foreign key registry, and enum label codecs.
// Purpose: Define the relational audit schema and validate it on open.
// Dependencies: auditflow-core, rusqlite
// ============================================================================

//! ## Overview
//! Every foreign key is declared at DDL time; orphan records are a Tier-1
//! integrity violation. On open the store enumerates the expected foreign
//! keys per table via `PRAGMA foreign_key_list` and fails loudly, with
//! remediation text naming the database path, if any are absent.
//!
//! Enum columns store stable snake_case labels; the codecs here are the only
//! translation point between Rust enums and stored text.

// ============================================================================
// SECTION: Imports
// ============================================================================

use auditflow_core::BatchStatus;
use auditflow_core::BatchTrigger;
use auditflow_core::CallKind;
use auditflow_core::CallStatus;
use auditflow_core::DeterminismClass;
use auditflow_core::ExportStatus;
use auditflow_core::IntegrityError;
use auditflow_core::NodeStateStatus;
use auditflow_core::NodeType;
use auditflow_core::ReproducibilityGrade;
use auditflow_core::RoutingMode;
use auditflow_core::RunStatus;
use auditflow_core::TokenOutcomeKind;
use rusqlite::Connection;

use crate::database::LandscapeError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Landscape schema version.
pub const SCHEMA_VERSION: i64 = 1;

/// Full DDL for a fresh landscape database.
pub const SCHEMA_DDL: &str = "
CREATE TABLE IF NOT EXISTS runs (
    run_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    config_hash TEXT NOT NULL,
    canonical_version TEXT NOT NULL,
    reproducibility_grade TEXT,
    source_schema_json TEXT,
    export_status TEXT,
    export_error TEXT,
    export_final_hash TEXT
);
CREATE TABLE IF NOT EXISTS nodes (
    node_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    plugin_name TEXT NOT NULL,
    node_type TEXT NOT NULL,
    plugin_version TEXT NOT NULL,
    determinism TEXT NOT NULL,
    config_hash TEXT NOT NULL,
    sequence_index INTEGER NOT NULL,
    registered_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_nodes_run ON nodes (run_id, sequence_index);
CREATE TABLE IF NOT EXISTS edges (
    edge_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    from_node_id TEXT NOT NULL REFERENCES nodes(node_id),
    to_node_id TEXT NOT NULL REFERENCES nodes(node_id),
    label TEXT NOT NULL,
    mode TEXT NOT NULL,
    registered_at INTEGER NOT NULL,
    UNIQUE (run_id, from_node_id, label)
);
CREATE TABLE IF NOT EXISTS rows (
    row_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    source_node_id TEXT NOT NULL REFERENCES nodes(node_id),
    row_index INTEGER NOT NULL,
    source_data_hash TEXT NOT NULL,
    payload_ref TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rows_run ON rows (run_id, row_index);
CREATE TABLE IF NOT EXISTS tokens (
    token_id TEXT PRIMARY KEY,
    row_id TEXT NOT NULL REFERENCES rows(row_id),
    branch_name TEXT,
    fork_group_id TEXT,
    join_group_id TEXT,
    expand_group_id TEXT,
    step_index INTEGER,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tokens_row ON tokens (row_id, created_at, token_id);
CREATE TABLE IF NOT EXISTS token_parents (
    token_id TEXT NOT NULL REFERENCES tokens(token_id),
    parent_token_id TEXT NOT NULL REFERENCES tokens(token_id),
    ordinal INTEGER NOT NULL,
    PRIMARY KEY (token_id, ordinal),
    UNIQUE (token_id, parent_token_id)
);
CREATE TABLE IF NOT EXISTS node_states (
    state_id TEXT PRIMARY KEY,
    token_id TEXT NOT NULL REFERENCES tokens(token_id),
    node_id TEXT NOT NULL REFERENCES nodes(node_id),
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    step_index INTEGER NOT NULL,
    attempt INTEGER NOT NULL,
    status TEXT NOT NULL,
    input_hash TEXT NOT NULL,
    output_hash TEXT,
    duration_ms REAL,
    error_json TEXT,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    UNIQUE (token_id, node_id, attempt)
);
CREATE INDEX IF NOT EXISTS idx_node_states_run ON node_states (run_id);
CREATE INDEX IF NOT EXISTS idx_node_states_token ON node_states (token_id, step_index, attempt);
CREATE TABLE IF NOT EXISTS routing_events (
    event_id TEXT PRIMARY KEY,
    state_id TEXT NOT NULL REFERENCES node_states(state_id),
    edge_id TEXT NOT NULL REFERENCES edges(edge_id),
    ordinal INTEGER NOT NULL,
    mode TEXT NOT NULL,
    reason_json TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_routing_events_state ON routing_events (state_id, ordinal, event_id);
CREATE TABLE IF NOT EXISTS calls (
    call_id TEXT PRIMARY KEY,
    state_id TEXT NOT NULL REFERENCES node_states(state_id),
    call_index INTEGER NOT NULL,
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    response_hash TEXT,
    latency_ms REAL,
    provider TEXT,
    error TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_calls_state ON calls (state_id, call_index);
CREATE TABLE IF NOT EXISTS token_outcomes (
    outcome_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    token_id TEXT NOT NULL REFERENCES tokens(token_id),
    outcome TEXT NOT NULL,
    is_terminal INTEGER NOT NULL,
    sink_name TEXT,
    recorded_at INTEGER NOT NULL,
    UNIQUE (run_id, token_id)
);
CREATE TABLE IF NOT EXISTS batches (
    batch_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    node_id TEXT NOT NULL REFERENCES nodes(node_id),
    status TEXT NOT NULL,
    attempt INTEGER NOT NULL,
    trigger_kind TEXT,
    created_at INTEGER NOT NULL,
    completed_at INTEGER
);
CREATE TABLE IF NOT EXISTS batch_members (
    batch_id TEXT NOT NULL REFERENCES batches(batch_id),
    token_id TEXT NOT NULL REFERENCES tokens(token_id),
    ordinal INTEGER NOT NULL,
    PRIMARY KEY (batch_id, ordinal)
);
CREATE TABLE IF NOT EXISTS validation_errors (
    error_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    row_id TEXT NOT NULL REFERENCES rows(row_id),
    node_id TEXT NOT NULL REFERENCES nodes(node_id),
    violation_json TEXT NOT NULL,
    policy_applied TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS transform_errors (
    error_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    state_id TEXT NOT NULL REFERENCES node_states(state_id),
    token_id TEXT NOT NULL REFERENCES tokens(token_id),
    reason_json TEXT NOT NULL,
    retryable INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS source_field_resolutions (
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    node_id TEXT NOT NULL REFERENCES nodes(node_id),
    original_name TEXT NOT NULL,
    normalized_name TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (run_id, node_id, ordinal)
);
CREATE TABLE IF NOT EXISTS secret_resolutions (
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    name TEXT NOT NULL,
    provider TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (run_id, name)
);
CREATE TABLE IF NOT EXISTS checkpoints (
    checkpoint_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    token_id TEXT NOT NULL REFERENCES tokens(token_id),
    node_id TEXT NOT NULL REFERENCES nodes(node_id),
    sequence_number INTEGER NOT NULL,
    graph_hash TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_checkpoints_run ON checkpoints (run_id, sequence_number);
";

/// Expected foreign keys per table: (table, column, referenced table).
///
/// Checked on open; a missing declaration fails schema validation.
pub const EXPECTED_FOREIGN_KEYS: &[(&str, &str, &str)] = &[
    ("nodes", "run_id", "runs"),
    ("edges", "run_id", "runs"),
    ("edges", "from_node_id", "nodes"),
    ("edges", "to_node_id", "nodes"),
    ("rows", "run_id", "runs"),
    ("rows", "source_node_id", "nodes"),
    ("tokens", "row_id", "rows"),
    ("token_parents", "token_id", "tokens"),
    ("token_parents", "parent_token_id", "tokens"),
    ("node_states", "token_id", "tokens"),
    ("node_states", "node_id", "nodes"),
    ("node_states", "run_id", "runs"),
    ("routing_events", "state_id", "node_states"),
    ("routing_events", "edge_id", "edges"),
    ("calls", "state_id", "node_states"),
    ("token_outcomes", "run_id", "runs"),
    ("token_outcomes", "token_id", "tokens"),
    ("batches", "run_id", "runs"),
    ("batches", "node_id", "nodes"),
    ("batch_members", "batch_id", "batches"),
    ("batch_members", "token_id", "tokens"),
    ("validation_errors", "run_id", "runs"),
    ("validation_errors", "row_id", "rows"),
    ("validation_errors", "node_id", "nodes"),
    ("transform_errors", "run_id", "runs"),
    ("transform_errors", "state_id", "node_states"),
    ("transform_errors", "token_id", "tokens"),
    ("source_field_resolutions", "run_id", "runs"),
    ("source_field_resolutions", "node_id", "nodes"),
    ("secret_resolutions", "run_id", "runs"),
    ("checkpoints", "run_id", "runs"),
    ("checkpoints", "token_id", "tokens"),
    ("checkpoints", "node_id", "nodes"),
];

// ============================================================================
// SECTION: Schema Validation
// ============================================================================

/// Validates that every expected foreign key is declared in the open
/// database.
///
/// # Errors
///
/// Returns [`LandscapeError::Integrity`] with remediation text when a
/// declaration is absent.
pub fn validate_foreign_keys(
    connection: &Connection,
    database_path: &str,
) -> Result<(), LandscapeError> {
    for (table, column, referenced) in EXPECTED_FOREIGN_KEYS {
        let mut statement = connection
            .prepare(&format!("PRAGMA foreign_key_list({table})"))
            .map_err(|err| LandscapeError::Db(err.to_string()))?;
        let declared = statement
            .query_map([], |row| {
                let referenced_table: String = row.get(2)?;
                let from_column: String = row.get(3)?;
                Ok((referenced_table, from_column))
            })
            .map_err(|err| LandscapeError::Db(err.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| LandscapeError::Db(err.to_string()))?;
        let present = declared
            .iter()
            .any(|(ref_table, from)| ref_table == referenced && from == column);
        if !present {
            return Err(LandscapeError::Integrity(IntegrityError::SchemaIncompatible {
                path: database_path.to_string(),
                detail: format!(
                    "table '{table}' is missing foreign key {column} -> {referenced}"
                ),
                remediation: "recreate the audit database with this build or point \
                              landscape.url at a fresh path"
                    .to_string(),
            }));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Enum Codecs
// ============================================================================

/// Declares label/parse codecs for an enum stored as snake_case text.
macro_rules! label_codec {
    ($label_fn:ident, $parse_fn:ident, $ty:ty, { $($variant:path => $label:literal),+ $(,)? }) => {
        /// Returns the stored label for the value.
        #[must_use]
        pub const fn $label_fn(value: $ty) -> &'static str {
            match value {
                $($variant => $label,)+
            }
        }

        /// Parses a stored label.
        ///
        /// # Errors
        ///
        /// Returns [`LandscapeError::Invalid`] for an unknown label.
        pub fn $parse_fn(label: &str) -> Result<$ty, LandscapeError> {
            match label {
                $($label => Ok($variant),)+
                other => Err(LandscapeError::Invalid(format!(
                    concat!("unknown ", stringify!($ty), " label: {}"),
                    other
                ))),
            }
        }
    };
}

label_codec!(run_status_label, parse_run_status, RunStatus, {
    RunStatus::Running => "running",
    RunStatus::Completed => "completed",
    RunStatus::Failed => "failed",
});

label_codec!(export_status_label, parse_export_status, ExportStatus, {
    ExportStatus::Pending => "pending",
    ExportStatus::Completed => "completed",
    ExportStatus::Failed => "failed",
});

label_codec!(grade_label, parse_grade, ReproducibilityGrade, {
    ReproducibilityGrade::Full => "full",
    ReproducibilityGrade::Limited => "limited",
});

label_codec!(node_type_label, parse_node_type, NodeType, {
    NodeType::Source => "source",
    NodeType::Transform => "transform",
    NodeType::Gate => "gate",
    NodeType::Aggregation => "aggregation",
    NodeType::Sink => "sink",
    NodeType::Coalesce => "coalesce",
});

label_codec!(determinism_label, parse_determinism, DeterminismClass, {
    DeterminismClass::Deterministic => "deterministic",
    DeterminismClass::Seeded => "seeded",
    DeterminismClass::NonDeterministic => "non_deterministic",
});

label_codec!(routing_mode_label, parse_routing_mode, RoutingMode, {
    RoutingMode::Move => "move",
    RoutingMode::Copy => "copy",
});

label_codec!(state_status_label, parse_state_status, NodeStateStatus, {
    NodeStateStatus::Open => "open",
    NodeStateStatus::Completed => "completed",
    NodeStateStatus::Failed => "failed",
});

label_codec!(call_kind_label, parse_call_kind, CallKind, {
    CallKind::Http => "http",
    CallKind::Sql => "sql",
    CallKind::Llm => "llm",
    CallKind::Other => "other",
});

label_codec!(call_status_label, parse_call_status, CallStatus, {
    CallStatus::Success => "success",
    CallStatus::Error => "error",
});

label_codec!(outcome_label, parse_outcome, TokenOutcomeKind, {
    TokenOutcomeKind::Completed => "completed",
    TokenOutcomeKind::Routed => "routed",
    TokenOutcomeKind::Quarantined => "quarantined",
    TokenOutcomeKind::Failed => "failed",
});

label_codec!(batch_status_label, parse_batch_status, BatchStatus, {
    BatchStatus::Draft => "draft",
    BatchStatus::Executing => "executing",
    BatchStatus::Completed => "completed",
    BatchStatus::Failed => "failed",
});

label_codec!(batch_trigger_label, parse_batch_trigger, BatchTrigger, {
    BatchTrigger::Count => "count",
    BatchTrigger::Duration => "duration",
    BatchTrigger::Boundary => "boundary",
});
