// auditflow-engine/src/errors.rs
// ============================================================================
// Module: Engine Errors
// Description: Error taxonomy for pipeline execution.
// Purpose: Give every failure class a distinct type; only plugin bugs crash.
// Dependencies: auditflow-core, auditflow-landscape, thiserror
// ============================================================================

//! ## Overview
//! Routing failures, contract violations, integrity violations, and
//! configuration problems each have distinct types. Expected row-level
//! failures travel through `TransformResult::Error`; plugin panics are
//! transported out of worker threads and resumed in the orchestrator thread,
//! never converted into errors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use auditflow_core::ConfigError;
use auditflow_core::ContractViolation;
use auditflow_core::GraphError;
use auditflow_core::HashError;
use auditflow_core::IntegrityError;
use auditflow_core::NodeId;
use auditflow_landscape::ExportError;
use auditflow_landscape::LandscapeError;
use auditflow_landscape::checkpoint::CheckpointError;
use thiserror::Error;

// ============================================================================
// SECTION: Missing Edge
// ============================================================================

/// A routing label resolved to no registered edge.
///
/// The node state is recorded `Failed` before this error propagates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no edge registered from {node_id} with label '{label}'")]
pub struct MissingEdgeError {
    /// Origin node.
    pub node_id: NodeId,
    /// Unresolvable label.
    pub label: String,
}

// ============================================================================
// SECTION: Engine Error
// ============================================================================

/// Pipeline execution errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The audit store failed.
    #[error(transparent)]
    Landscape(#[from] LandscapeError),
    /// Tier-1 integrity violation.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    /// The execution graph is invalid.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Canonical hashing failed.
    #[error("engine hashing failed: {0}")]
    Hashing(String),
    /// An unknown routing label was used.
    #[error(transparent)]
    MissingEdge(#[from] MissingEdgeError),
    /// A source row violated its contract under the `fail` policy.
    #[error("source validation failed: {0}")]
    Validation(ContractViolation),
    /// A plugin reported an infrastructure failure.
    #[error("plugin failure at {node_id}: {message}")]
    Plugin {
        /// Node whose plugin failed.
        node_id: NodeId,
        /// Failure description.
        message: String,
    },
    /// An internal invariant was violated; aborts the run.
    #[error("orchestration invariant violated: {0}")]
    Invariant(String),
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Checkpointing failed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    /// Export failed.
    #[error(transparent)]
    Export(#[from] ExportError),
    /// A bounded wait expired.
    #[error("engine timeout: {0}")]
    Timeout(String),
    /// The engine is shutting down.
    #[error("engine shut down")]
    Shutdown,
}

impl From<HashError> for EngineError {
    fn from(err: HashError) -> Self {
        Self::Hashing(err.to_string())
    }
}
