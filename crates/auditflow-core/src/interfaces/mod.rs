// auditflow-core/src/interfaces/mod.rs
// ============================================================================
// Module: Auditflow Plugin Interfaces
// Description: Capability traits and result sums for pipeline plugins.
// Purpose: Define the narrow contract surfaces the engine consumes.
// Dependencies: crate::core, serde
// ============================================================================

//! ## Overview
//! Plugins integrate through capability traits; the engine never sees
//! concrete plugin types. Every cross-boundary result is a closed sum
//! (routing actions, route destinations, transform results). Every plugin
//! call receives an explicit [`PluginContext`] instead of reading ambient
//! state. Implementations must be deterministic within their declared
//! determinism class and fail closed on missing or invalid data.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::config::ConcurrencySettings;
use crate::core::config::RateLimitSettings;
use crate::core::contract::SchemaContract;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::StateId;
use crate::core::records::DeterminismClass;
use crate::core::records::RoutingMode;

// ============================================================================
// SECTION: Plugin Errors
// ============================================================================

/// Infrastructure-level plugin failure.
///
/// Expected row-level failures travel through [`TransformResult::Error`];
/// this type covers failures of the plugin itself (unreachable target,
/// exhausted source, invalid configuration discovered at call time).
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin reported a failure.
    #[error("plugin failure: {0}")]
    Failed(String),
    /// The plugin's external target rejected the operation.
    #[error("plugin target unavailable: {0}")]
    TargetUnavailable(String),
}

// ============================================================================
// SECTION: Source Row
// ============================================================================

/// One record emitted by a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRow {
    /// Row payload.
    pub data: Value,
    /// RFC 8785 hash of the payload at read time.
    pub source_data_hash: String,
}

// ============================================================================
// SECTION: Transform Result
// ============================================================================

/// Result of one transform invocation.
///
/// A closed sum: success with the produced row, or a structured error with a
/// retryability flag. Plugin bugs are not represented here; a panicking
/// plugin crashes the run by design.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransformResult {
    /// The transform produced a row.
    Success {
        /// Produced row.
        row: Value,
        /// Structured success reason for the audit trail.
        reason: Option<Value>,
    },
    /// The transform failed on this row.
    Error {
        /// Structured failure reason.
        reason: Value,
        /// Whether the retry policy may re-attempt the row.
        retryable: bool,
    },
}

impl TransformResult {
    /// Creates a success result.
    #[must_use]
    pub const fn success(row: Value, reason: Option<Value>) -> Self {
        Self::Success {
            row,
            reason,
        }
    }

    /// Creates an error result.
    #[must_use]
    pub const fn error(reason: Value, retryable: bool) -> Self {
        Self::Error {
            reason,
            retryable,
        }
    }

    /// Returns true for success results.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

// ============================================================================
// SECTION: Routing
// ============================================================================

/// Routing decision produced by a gate or transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RoutingAction {
    /// Continue along the default `continue` edge.
    Continue {
        /// Structured reason payload.
        reason: Option<Value>,
    },
    /// Route along the named edge.
    Route {
        /// Edge label.
        label: String,
        /// Routing mode.
        mode: RoutingMode,
        /// Structured reason payload.
        reason: Option<Value>,
    },
    /// Fork to one child per branch.
    Fork {
        /// Branch names; one routing event and one child token each.
        branches: Vec<String>,
        /// Structured reason payload.
        reason: Option<Value>,
    },
}

impl RoutingAction {
    /// Creates a continue action.
    #[must_use]
    pub const fn continue_with(reason: Option<Value>) -> Self {
        Self::Continue {
            reason,
        }
    }

    /// Creates a move-mode route action.
    #[must_use]
    pub fn route(label: impl Into<String>, mode: RoutingMode, reason: Option<Value>) -> Self {
        Self::Route {
            label: label.into(),
            mode,
            reason,
        }
    }

    /// Creates a fork action.
    #[must_use]
    pub const fn fork_to_paths(branches: Vec<String>, reason: Option<Value>) -> Self {
        Self::Fork {
            branches,
            reason,
        }
    }

    /// Returns the edge labels this action routes along.
    #[must_use]
    pub fn destinations(&self) -> Vec<String> {
        match self {
            Self::Continue {
                ..
            } => vec!["continue".to_string()],
            Self::Route {
                label, ..
            } => vec![label.clone()],
            Self::Fork {
                branches, ..
            } => branches.clone(),
        }
    }

    /// Returns the routing mode applied to every destination.
    #[must_use]
    pub const fn mode(&self) -> RoutingMode {
        match self {
            Self::Route {
                mode, ..
            } => *mode,
            Self::Continue {
                ..
            }
            | Self::Fork {
                ..
            } => RoutingMode::Move,
        }
    }

    /// Returns the structured reason payload.
    #[must_use]
    pub const fn reason(&self) -> Option<&Value> {
        match self {
            Self::Continue {
                reason,
            }
            | Self::Route {
                reason, ..
            }
            | Self::Fork {
                reason, ..
            } => reason.as_ref(),
        }
    }
}

/// Concrete destination a route label resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouteDestination {
    /// Continue along the default edge.
    Continue,
    /// A named sink.
    Sink {
        /// Sink name.
        name: String,
    },
    /// Another processing node.
    ProcessingNode {
        /// Destination node.
        node_id: NodeId,
    },
    /// A fork to the origin's configured branches.
    Fork,
}

// ============================================================================
// SECTION: Artifacts
// ============================================================================

/// Artifact security classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Freely shareable output.
    Public,
    /// Internal-only output.
    #[default]
    Internal,
    /// Restricted output requiring explicit disclosure.
    Restricted,
}

/// Descriptor for the output object a sink recorded.
///
/// # Invariants
/// - `content_hash` is SHA-256 over the RFC 8785 canonical JSON of the rows
///   as given to the sink, computed before any I/O. Storage-side mutations
///   (server-filled columns, coercions) never affect it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    /// Artifact type label (`file`, `table`, `object`).
    pub artifact_type: String,
    /// Content hash of the payload as given.
    pub content_hash: String,
    /// Payload size in canonical-JSON bytes.
    pub size_bytes: u64,
    /// Optional schema identifier.
    pub schema_id: Option<String>,
    /// Optional sink-specific metadata.
    pub metadata: Option<Value>,
    /// Optional alias for downstream artifact consumers.
    pub alias: Option<String>,
    /// Security classification.
    pub security_level: SecurityLevel,
}

// ============================================================================
// SECTION: Plugin Context
// ============================================================================

/// Telemetry emit callback handed to plugins.
pub type TelemetryEmit = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// Context passed to every plugin call.
///
/// Carries every capability a plugin may use; nothing is read from
/// process-wide storage.
#[derive(Clone)]
pub struct PluginContext {
    /// Owning run.
    pub run_id: RunId,
    /// Node being executed.
    pub node_id: NodeId,
    /// Current node state, when executing inside one.
    pub state_id: Option<StateId>,
    /// Frozen run contract, when captured.
    pub contract: Option<SchemaContract>,
    /// Concurrency configuration, when pooled execution applies.
    pub concurrency: Option<ConcurrencySettings>,
    /// Rate limit configuration, when limits apply.
    pub rate_limits: Option<RateLimitSettings>,
    /// Telemetry emit callback, when a bus is attached.
    pub telemetry: Option<TelemetryEmit>,
}

impl PluginContext {
    /// Creates a minimal context for the given run and node.
    #[must_use]
    pub const fn new(run_id: RunId, node_id: NodeId) -> Self {
        Self {
            run_id,
            node_id,
            state_id: None,
            contract: None,
            concurrency: None,
            rate_limits: None,
            telemetry: None,
        }
    }

    /// Returns a copy bound to the given node state.
    #[must_use]
    pub fn with_state(&self, state_id: StateId) -> Self {
        let mut ctx = self.clone();
        ctx.state_id = Some(state_id);
        ctx
    }

    /// Emits a telemetry event when a bus is attached.
    pub fn emit_telemetry(&self, event: &str, payload: Value) {
        if let Some(emit) = &self.telemetry {
            emit(event, payload);
        }
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("run_id", &self.run_id)
            .field("node_id", &self.node_id)
            .field("state_id", &self.state_id)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Plugin Metadata
// ============================================================================

/// Identity and determinism metadata shared by every plugin kind.
pub trait PluginMetadata {
    /// Returns the plugin name.
    fn plugin_name(&self) -> &str;

    /// Returns the plugin version.
    fn plugin_version(&self) -> &str;

    /// Returns the declared determinism class.
    fn determinism(&self) -> DeterminismClass;
}

// ============================================================================
// SECTION: Source
// ============================================================================

/// Source plugin: reads external input and emits rows.
pub trait SourcePlugin: PluginMetadata + Send {
    /// Reads the input stream as (row data, source data hash) records.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when the input cannot be opened; per-row read
    /// failures surface through the iterator items.
    fn read(
        &mut self,
        ctx: &PluginContext,
    ) -> Result<Box<dyn Iterator<Item = Result<SourceRow, PluginError>> + '_>, PluginError>;

    /// Returns the declared input schema.
    fn input_schema(&self) -> SchemaContract;
}

// ============================================================================
// SECTION: Transform
// ============================================================================

/// Transform plugin: processes one row into a [`TransformResult`].
pub trait TransformPlugin: PluginMetadata + Send + Sync {
    /// Processes a row.
    fn process(&self, row: &Value, ctx: &PluginContext) -> TransformResult;

    /// Returns the declared input contract.
    fn input_contract(&self) -> SchemaContract;

    /// Returns the declared output contract.
    fn output_contract(&self) -> SchemaContract;

    /// Returns the input fields this transform requires.
    fn required_fields(&self) -> Vec<String> {
        Vec::new()
    }
}

// ============================================================================
// SECTION: Gate
// ============================================================================

/// Gate plugin: produces a routing decision for one row.
pub trait GatePlugin: PluginMetadata + Send {
    /// Evaluates the row into a routing action.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when evaluation fails outright.
    fn evaluate(&self, row: &Value, ctx: &PluginContext) -> Result<RoutingAction, PluginError>;
}

// ============================================================================
// SECTION: Aggregation
// ============================================================================

/// Aggregation plugin: buffers rows and emits batch results.
pub trait AggregationPlugin: PluginMetadata + Send {
    /// Accepts one row into the open batch.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when the row cannot be buffered.
    fn accept(&mut self, row: &Value, ctx: &PluginContext) -> Result<(), PluginError>;

    /// Emits the batch result rows and resets the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when aggregation fails; the batch becomes
    /// retryable via `retry_batch`.
    fn emit(&mut self, ctx: &PluginContext) -> Result<Vec<Value>, PluginError>;

    /// Returns the contract constraining what may arrive.
    fn input_contract(&self) -> SchemaContract;

    /// Returns the contract guaranteeing what the aggregate emits.
    fn output_contract(&self) -> SchemaContract;
}

// ============================================================================
// SECTION: Sink
// ============================================================================

/// Sink plugin: consumes rows and records an artifact.
pub trait SinkPlugin: PluginMetadata + Send {
    /// Writes rows and returns the artifact descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when the write fails.
    fn write(
        &mut self,
        rows: &[Value],
        ctx: &PluginContext,
    ) -> Result<ArtifactDescriptor, PluginError>;

    /// Validates the output target before the run starts.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when the target is unusable.
    fn validate_output_target(&self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Receives the frozen run contract for header resolution.
    fn set_output_contract(&mut self, _contract: &SchemaContract) {}

    /// Prepares the sink to append after a recovery resume.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when resume preparation fails.
    fn configure_for_resume(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}
