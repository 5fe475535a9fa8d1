// auditflow-core/src/core/mod.rs
// ============================================================================
// Module: Auditflow Core Types
// Description: Canonical audit data model and supporting helpers.
// Purpose: Provide stable, serializable types for audit records and graphs.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Core types define the audit data model (runs, nodes, edges, rows, tokens,
//! states, events, calls, outcomes, batches), schema contracts, the execution
//! graph, configuration settings, deterministic hashing, and identifiers.
//! These types are the canonical source of truth for the landscape store and
//! the engine.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod config;
pub mod contract;
pub mod graph;
pub mod hashing;
pub mod identifiers;
pub mod integrity;
pub mod records;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::AggregationOutputMode;
pub use config::AggregationSettings;
pub use config::CheckpointFrequency;
pub use config::CheckpointSettings;
pub use config::CoalescePolicy;
pub use config::CoalesceSettings;
pub use config::ConcurrencySettings;
pub use config::ConfigError;
pub use config::EngineSettings;
pub use config::ExportFormat;
pub use config::ExportSettings;
pub use config::GateSettings;
pub use config::LandscapeSettings;
pub use config::MergeStrategy;
pub use config::PayloadBackend;
pub use config::PayloadStoreSettings;
pub use config::PoolSettings;
pub use config::RateLimitSettings;
pub use config::RetrySettings;
pub use config::RouteSpec;
pub use config::ValidationFailurePolicy;
pub use contract::ContractMode;
pub use contract::ContractViolation;
pub use contract::FieldProvenance;
pub use contract::FieldSpec;
pub use contract::SchemaContract;
pub use graph::ExecutionGraph;
pub use graph::GraphEdge;
pub use graph::GraphError;
pub use graph::GraphNode;
pub use hashing::CANONICAL_VERSION;
pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use hashing::HashError;
pub use hashing::canonical_json_bytes;
pub use hashing::hash_bytes;
pub use hashing::hash_canonical_json;
pub use hashing::stable_hash;
pub use identifiers::BatchId;
pub use identifiers::CallId;
pub use identifiers::CheckpointId;
pub use identifiers::EdgeId;
pub use identifiers::ErrorId;
pub use identifiers::EventId;
pub use identifiers::GroupId;
pub use identifiers::NodeId;
pub use identifiers::OutcomeId;
pub use identifiers::RowId;
pub use identifiers::RunId;
pub use identifiers::StateId;
pub use identifiers::TokenId;
pub use identifiers::mint_hex_id;
pub use integrity::IntegrityError;
pub use records::BatchMemberRecord;
pub use records::BatchRecord;
pub use records::BatchStatus;
pub use records::BatchTrigger;
pub use records::CallKind;
pub use records::CallRecord;
pub use records::CallStatus;
pub use records::CheckpointRecord;
pub use records::DeterminismClass;
pub use records::EdgeRecord;
pub use records::ExportStatus;
pub use records::NodeRecord;
pub use records::NodeStateRecord;
pub use records::NodeStateStatus;
pub use records::NodeType;
pub use records::ReproducibilityGrade;
pub use records::RoutingEventRecord;
pub use records::RoutingMode;
pub use records::RowRecord;
pub use records::RunRecord;
pub use records::RunStatus;
pub use records::SecretResolutionRecord;
pub use records::SourceFieldResolutionRecord;
pub use records::TokenOutcomeKind;
pub use records::TokenOutcomeRecord;
pub use records::TokenParentRecord;
pub use records::TokenRecord;
pub use records::TransformErrorRecord;
pub use records::ValidationErrorRecord;
pub use time::Timestamp;
