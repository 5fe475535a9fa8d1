// auditflow-core/src/core/records.rs
// ============================================================================
// Module: Auditflow Audit Records
// Description: Canonical audit entities for runs, rows, tokens, and states.
// Purpose: Provide stable, serializable records for the landscape store.
// Dependencies: crate::core::{hashing, identifiers, time}, serde
// ============================================================================

//! ## Overview
//! Audit records are the canonical source of truth for everything a run did.
//! They are append-only: entities are created once and mutated only through
//! the explicit transitions the recorder exposes (run status, state
//! completion, batch status, export status). Field names and enum spellings
//! are stable because export signatures hash the serialized form.
//!
//! Terminal token behavior (routed / forked) is derived from routing events
//! and token parents, never stored as a node-state status.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::BatchId;
use crate::core::identifiers::CallId;
use crate::core::identifiers::CheckpointId;
use crate::core::identifiers::EdgeId;
use crate::core::identifiers::ErrorId;
use crate::core::identifiers::EventId;
use crate::core::identifiers::GroupId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::OutcomeId;
use crate::core::identifiers::RowId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::StateId;
use crate::core::identifiers::TokenId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Run
// ============================================================================

/// Run lifecycle status.
///
/// # Invariants
/// - Variants are stable for serialization and export signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is executing.
    Running,
    /// Run completed successfully.
    Completed,
    /// Run failed; a partial audit trail still exists.
    Failed,
}

/// Export lifecycle status recorded on the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    /// Export has not run yet.
    Pending,
    /// Export completed and the final chain hash is recorded.
    Completed,
    /// Export failed; `export_error` carries the reason.
    Failed,
}

/// Reproducibility grade computed at run finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReproducibilityGrade {
    /// Every executed node declared deterministic behavior.
    Full,
    /// At least one executed node is seeded or non-deterministic.
    Limited,
}

/// Root audit entity; owns all descendants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier.
    pub run_id: RunId,
    /// Run lifecycle status.
    pub status: RunStatus,
    /// Start timestamp.
    pub started_at: Timestamp,
    /// Completion timestamp, set by `complete_run`.
    pub completed_at: Option<Timestamp>,
    /// RFC 8785 hash of the resolved configuration.
    pub config_hash: String,
    /// Canonical serialization version used for all hashes in this run.
    pub canonical_version: String,
    /// Reproducibility grade, set by `finalize_run`.
    pub reproducibility_grade: Option<ReproducibilityGrade>,
    /// Optional source schema captured at registration.
    pub source_schema: Option<Value>,
    /// Export status, set by `set_export_status`.
    pub export_status: Option<ExportStatus>,
    /// Export error, present only while `export_status` is `Failed`.
    pub export_error: Option<String>,
    /// Final chained export hash, present after a completed export.
    pub export_final_hash: Option<String>,
}

// ============================================================================
// SECTION: Node
// ============================================================================

/// Graph vertex classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Reads external data and emits rows.
    Source,
    /// Row-level transformation.
    Transform,
    /// Routing decision point.
    Gate,
    /// Buffers tokens and emits batch results.
    Aggregation,
    /// Consumes artifacts.
    Sink,
    /// Merges forked branches.
    Coalesce,
}

/// Determinism class declared by a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeterminismClass {
    /// Same inputs always produce the same outputs.
    Deterministic,
    /// Deterministic under a recorded seed.
    Seeded,
    /// Output may vary across runs (external services, wall clock).
    NonDeterministic,
}

/// One node per graph vertex per run; immutable after registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node identifier.
    pub node_id: NodeId,
    /// Owning run.
    pub run_id: RunId,
    /// Plugin name backing the node.
    pub plugin_name: String,
    /// Node classification.
    pub node_type: NodeType,
    /// Plugin version string.
    pub plugin_version: String,
    /// Declared determinism class.
    pub determinism: DeterminismClass,
    /// RFC 8785 hash of the node configuration.
    pub config_hash: String,
    /// Sequence index in pipeline registration order.
    pub sequence_index: u32,
    /// Registration timestamp.
    pub registered_at: Timestamp,
}

// ============================================================================
// SECTION: Edge
// ============================================================================

/// Routing mode carried by an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// The token moves along the edge.
    Move,
    /// The token lineage is duplicated along the edge.
    Copy,
}

/// Directed labeled edge between two nodes.
///
/// # Invariants
/// - The (origin node, label) pair is unique within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// Edge identifier.
    pub edge_id: EdgeId,
    /// Owning run.
    pub run_id: RunId,
    /// Origin node.
    pub from_node_id: NodeId,
    /// Destination node.
    pub to_node_id: NodeId,
    /// Edge label (`continue`, `true`, `false`, route name, or branch name).
    pub label: String,
    /// Routing mode.
    pub mode: RoutingMode,
    /// Registration timestamp.
    pub registered_at: Timestamp,
}

// ============================================================================
// SECTION: Row
// ============================================================================

/// One row per input record from a source.
///
/// # Invariants
/// - `source_data_hash` is computed at creation and never changes, even when
///   the payload is purged by retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRecord {
    /// Row identifier.
    pub row_id: RowId,
    /// Owning run.
    pub run_id: RunId,
    /// Source node that produced the row.
    pub source_node_id: NodeId,
    /// Zero-based index within the source stream.
    pub row_index: u64,
    /// RFC 8785 hash of the source data.
    pub source_data_hash: String,
    /// Optional content-addressed payload reference.
    pub payload_ref: Option<String>,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Token
// ============================================================================

/// The moving unit of work; carries lineage, not data identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Token identifier.
    pub token_id: TokenId,
    /// Owning row.
    pub row_id: RowId,
    /// Branch name when the token was created by a fork.
    pub branch_name: Option<String>,
    /// Fork group shared by sibling fork children.
    pub fork_group_id: Option<GroupId>,
    /// Join group stamped on a coalesce-merged token.
    pub join_group_id: Option<GroupId>,
    /// Expand group shared by sibling deaggregation children.
    pub expand_group_id: Option<GroupId>,
    /// Pipeline step index at creation, when known.
    pub step_index: Option<u32>,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

/// Parent edge in the token lineage DAG.
///
/// # Invariants
/// - Ordinals are unique and monotonic per child token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenParentRecord {
    /// Child token.
    pub token_id: TokenId,
    /// Parent token.
    pub parent_token_id: TokenId,
    /// Position of this parent among the child's parents.
    pub ordinal: u32,
}

// ============================================================================
// SECTION: Node State
// ============================================================================

/// Status of one execution attempt of one token at one node.
///
/// # Invariants
/// - No state is `Open` at run termination.
/// - Routed/forked terminal behavior is derived from routing events, never
///   encoded here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStateStatus {
    /// Execution is in flight.
    Open,
    /// Execution finished; routing events describe where the token went.
    Completed,
    /// Execution failed; `error` carries the structured reason.
    Failed,
}

/// One record per (token, node, attempt).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStateRecord {
    /// State identifier.
    pub state_id: StateId,
    /// Token being executed.
    pub token_id: TokenId,
    /// Node executing the token.
    pub node_id: NodeId,
    /// Owning run (denormalized for batched queries).
    pub run_id: RunId,
    /// Pipeline step index.
    pub step_index: u32,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// State status.
    pub status: NodeStateStatus,
    /// RFC 8785 hash of the input row.
    pub input_hash: String,
    /// RFC 8785 hash of the output row, when completed.
    pub output_hash: Option<String>,
    /// Execution duration in milliseconds.
    pub duration_ms: Option<f64>,
    /// Structured error payload, when failed.
    pub error: Option<Value>,
    /// Start timestamp.
    pub started_at: Timestamp,
    /// Completion timestamp.
    pub completed_at: Option<Timestamp>,
}

// ============================================================================
// SECTION: Routing Event
// ============================================================================

/// One routing event per destination produced by an executor.
///
/// # Invariants
/// - Ordered by `(step_index, attempt, ordinal, event_id)` across a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingEventRecord {
    /// Event identifier.
    pub event_id: EventId,
    /// Node state that produced the event.
    pub state_id: StateId,
    /// Edge the token was routed along.
    pub edge_id: EdgeId,
    /// Position among the state's routing events.
    pub ordinal: u32,
    /// Routing mode applied.
    pub mode: RoutingMode,
    /// Structured reason payload.
    pub reason: Option<Value>,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Call
// ============================================================================

/// External call classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    /// HTTP request.
    Http,
    /// SQL statement.
    Sql,
    /// LLM completion call.
    Llm,
    /// Any other external interaction.
    Other,
}

/// External call status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Call succeeded.
    Success,
    /// Call failed.
    Error,
}

/// External interaction recorded from within a node state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Call identifier.
    pub call_id: CallId,
    /// Owning node state.
    pub state_id: StateId,
    /// Position among the state's calls.
    pub call_index: u32,
    /// Call classification.
    pub kind: CallKind,
    /// Call status.
    pub status: CallStatus,
    /// RFC 8785 hash of the request payload.
    pub request_hash: String,
    /// RFC 8785 hash of the response payload, when available.
    pub response_hash: Option<String>,
    /// Round-trip latency in milliseconds.
    pub latency_ms: Option<f64>,
    /// Provider label (service name, model name).
    pub provider: Option<String>,
    /// Error message, when failed.
    pub error: Option<String>,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Token Outcome
// ============================================================================

/// Terminal disposition of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenOutcomeKind {
    /// Reached the default sink.
    Completed,
    /// Reached a named sink by explicit route.
    Routed,
    /// Diverted to quarantine.
    Quarantined,
    /// Failed terminally.
    Failed,
}

/// Terminal disposition record.
///
/// # Invariants
/// - The (run, token) pair is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenOutcomeRecord {
    /// Outcome identifier.
    pub outcome_id: OutcomeId,
    /// Owning run.
    pub run_id: RunId,
    /// Token receiving the outcome.
    pub token_id: TokenId,
    /// Terminal disposition.
    pub outcome: TokenOutcomeKind,
    /// Whether the outcome terminates the token.
    pub is_terminal: bool,
    /// Sink that consumed the token, when applicable.
    pub sink_name: Option<String>,
    /// Recording timestamp.
    pub recorded_at: Timestamp,
}

// ============================================================================
// SECTION: Batch
// ============================================================================

/// Aggregation batch status machine: `Draft → Executing → {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Accepting members.
    Draft,
    /// Executing the aggregation plugin.
    Executing,
    /// Aggregation emitted its result.
    Completed,
    /// Aggregation failed; `retry_batch` may copy members into a new batch.
    Failed,
}

/// Trigger that closed an aggregation batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchTrigger {
    /// Member count threshold reached.
    Count,
    /// Buffering duration elapsed.
    Duration,
    /// Explicit boundary (end of source, checkpoint boundary).
    Boundary,
}

/// Aggregation batch record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecord {
    /// Batch identifier.
    pub batch_id: BatchId,
    /// Owning run.
    pub run_id: RunId,
    /// Aggregation node that owns the batch.
    pub node_id: NodeId,
    /// Batch status.
    pub status: BatchStatus,
    /// Attempt number, starting at 1; incremented by `retry_batch`.
    pub attempt: u32,
    /// Trigger that closed the batch, when closed.
    pub trigger: Option<BatchTrigger>,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Completion timestamp.
    pub completed_at: Option<Timestamp>,
}

/// Batch membership record.
///
/// # Invariants
/// - Ordinals are unique and monotonic per batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMemberRecord {
    /// Owning batch.
    pub batch_id: BatchId,
    /// Member token.
    pub token_id: TokenId,
    /// Position within the batch.
    pub ordinal: u32,
}

// ============================================================================
// SECTION: Errors Recorded In The Trail
// ============================================================================

/// Source validation failure recorded against a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationErrorRecord {
    /// Error identifier.
    pub error_id: ErrorId,
    /// Owning run.
    pub run_id: RunId,
    /// Row that failed validation.
    pub row_id: RowId,
    /// Source node that rejected the row.
    pub node_id: NodeId,
    /// Structured contract violation payload.
    pub violation: Value,
    /// Validation failure policy that was applied.
    pub policy_applied: String,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

/// Transform failure recorded against a node state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformErrorRecord {
    /// Error identifier.
    pub error_id: ErrorId,
    /// Owning run.
    pub run_id: RunId,
    /// Node state that failed.
    pub state_id: StateId,
    /// Token being transformed.
    pub token_id: TokenId,
    /// Structured reason payload.
    pub reason: Value,
    /// Whether the failure was retryable under policy.
    pub retryable: bool,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Resolutions
// ============================================================================

/// One original-to-normalized header mapping recorded by a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFieldResolutionRecord {
    /// Owning run.
    pub run_id: RunId,
    /// Source node that resolved the field.
    pub node_id: NodeId,
    /// Header as it appeared in the source.
    pub original_name: String,
    /// Normalized field name used downstream.
    pub normalized_name: String,
    /// Position within the source header set.
    pub ordinal: u32,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

/// Name (never value) of a secret resolved during configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretResolutionRecord {
    /// Owning run.
    pub run_id: RunId,
    /// Secret name.
    pub name: String,
    /// Provider the secret came from.
    pub provider: String,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Checkpoint
// ============================================================================

/// Resume checkpoint captured on configured boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Checkpoint identifier.
    pub checkpoint_id: CheckpointId,
    /// Owning run.
    pub run_id: RunId,
    /// Token in flight at checkpoint time.
    pub token_id: TokenId,
    /// Node the token was at.
    pub node_id: NodeId,
    /// Monotonic sequence number.
    pub sequence_number: u64,
    /// RFC 8785 hash of the execution graph.
    pub graph_hash: String,
    /// Creation timestamp.
    pub created_at: Timestamp,
}
