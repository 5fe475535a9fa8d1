// auditflow-engine/src/lib.rs
// ============================================================================
// Module: Auditflow Engine Library
// Description: Pipeline execution engine over the landscape audit store.
// Purpose: Expose token lifecycle, concurrency primitives, and executors.
// Dependencies: crate::{batch_adapter, batching, errors, executors,
// orchestrator, pool, retry, rrb, tokens}
// ============================================================================

//! ## Overview
//! The engine walks the execution graph token by token, dispatching to
//! per-node-type executors that record every decision in the landscape.
//! Concurrency is thread-based with explicit suspension points: the
//! row-reorder buffer multiplexes bounded parallelism while preserving
//! submission-order output, and the retry-safe batch adapter routes results
//! to the exact attempt that is waiting for them.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod batch_adapter;
pub mod batching;
pub mod errors;
pub mod executors;
pub mod orchestrator;
pub mod pool;
pub mod retry;
pub mod rrb;
pub mod tokens;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use batch_adapter::AdapterWaitError;
pub use batch_adapter::SharedBatchAdapter;
pub use batch_adapter::Waiter;
pub use batching::ConcurrentRowDriver;
pub use batching::OutputPort;
pub use batching::WorkerOutcome;
pub use errors::EngineError;
pub use errors::MissingEdgeError;
pub use orchestrator::GateKind;
pub use orchestrator::NodePlugin;
pub use orchestrator::Orchestrator;
pub use orchestrator::RunOutcome;
pub use pool::PooledExecutor;
pub use retry::RetryPolicy;
pub use rrb::ReleaseEntry;
pub use rrb::RowReorderBuffer;
pub use rrb::RowTicket;
pub use rrb::RrbError;
pub use tokens::TokenInfo;
pub use tokens::TokenManager;
