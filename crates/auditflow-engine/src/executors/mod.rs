// auditflow-engine/src/executors/mod.rs
// ============================================================================
// Module: Executors
// Description: Per-node-type executors with audit recording.
// Purpose: Wrap plugin calls in node-state lifecycle and routing events.
// Dependencies: crate::{batch_adapter, batching, errors, retry, tokens}
// ============================================================================

//! ## Overview
//! Every executor follows one protocol: open a node state, compute the input
//! hash, run the plugin, record calls and routing events, write the output
//! hash and duration, and transition the state to `Completed` or `Failed`.
//! Status is always `Completed` for successful logic; routing decisions
//! live in routing events, never in the state status.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod aggregation;
pub mod coalesce;
pub mod expression;
pub mod gate;
pub mod sink;
pub mod source;
pub mod transform;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use aggregation::AggregationExecutor;
pub use coalesce::CoalesceExecutor;
pub use coalesce::CoalesceOutcome;
pub use expression::Expression;
pub use expression::ExpressionError;
pub use gate::GateExecutor;
pub use gate::GateOutcome;
pub use sink::SinkExecutor;
pub use source::SourceExecutor;
pub use source::SourceOutput;
pub use transform::TransformExecution;
pub use transform::TransformExecutor;
