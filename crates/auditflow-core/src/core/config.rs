// auditflow-core/src/core/config.rs
// ============================================================================
// Module: Auditflow Configuration Surface
// Description: Typed, frozen settings for engine, store, and executors.
// Purpose: Provide validated configuration objects for all components.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! All recognized configuration options live here as typed settings structs.
//! Settings deserialize with defaults, validate once via `validate()`, and
//! are frozen afterwards: no mutating accessors exist, and components receive
//! them by value or shared reference.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A settings field holds an invalid value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Retry
// ============================================================================

/// Retry policy configuration; jitter is internal to the policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Maximum attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in seconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_seconds: f64,
    /// Upper bound on any single delay, in seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_seconds: f64,
    /// Exponential growth base between attempts.
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_seconds: default_initial_delay(),
            max_delay_seconds: default_max_delay(),
            exponential_base: default_exponential_base(),
        }
    }
}

impl RetrySettings {
    /// Validates the retry settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for non-positive attempts or delays,
    /// or a growth base not greater than 1.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".to_string()));
        }
        if self.initial_delay_seconds < 0.0 || self.max_delay_seconds < 0.0 {
            return Err(ConfigError::Invalid("retry delays must be non-negative".to_string()));
        }
        if self.exponential_base <= 1.0 {
            return Err(ConfigError::Invalid(
                "retry.exponential_base must be greater than 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default maximum attempts.
const fn default_max_attempts() -> u32 {
    3
}

/// Default initial retry delay in seconds.
const fn default_initial_delay() -> f64 {
    0.5
}

/// Default maximum retry delay in seconds.
const fn default_max_delay() -> f64 {
    30.0
}

/// Default exponential base.
const fn default_exponential_base() -> f64 {
    2.0
}

// ============================================================================
// SECTION: Concurrency / Rate Limit
// ============================================================================

/// Concurrency configuration for pooled transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencySettings {
    /// Maximum worker threads per pooled transform.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

/// Default pooled worker count.
const fn default_max_workers() -> usize {
    4
}

/// Rate limit configuration for external services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RateLimitSettings {
    /// Whether rate limiting is applied at all.
    #[serde(default)]
    pub enabled: bool,
    /// Default requests-per-minute for unlisted services.
    #[serde(default = "default_requests_per_minute")]
    pub default_requests_per_minute: u32,
    /// Optional persistence path for limiter state.
    #[serde(default)]
    pub persistence_path: Option<PathBuf>,
    /// Per-service requests-per-minute overrides.
    #[serde(default)]
    pub services: BTreeMap<String, u32>,
}

/// Default requests-per-minute.
const fn default_requests_per_minute() -> u32 {
    60
}

// ============================================================================
// SECTION: Checkpoint
// ============================================================================

/// Serialized form of the checkpoint frequency option.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum CheckpointFrequencyRepr {
    /// Keyword form (`"every_row"`).
    Keyword(String),
    /// Every-N-rows form.
    Count(u64),
}

/// Checkpoint creation frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CheckpointFrequencyRepr", into = "CheckpointFrequencyRepr")]
pub enum CheckpointFrequency {
    /// Checkpoint after every row.
    EveryRow,
    /// Checkpoint after every N rows.
    EveryN(u64),
}

impl TryFrom<CheckpointFrequencyRepr> for CheckpointFrequency {
    type Error = String;

    fn try_from(repr: CheckpointFrequencyRepr) -> Result<Self, Self::Error> {
        match repr {
            CheckpointFrequencyRepr::Keyword(keyword) if keyword == "every_row" => {
                Ok(Self::EveryRow)
            }
            CheckpointFrequencyRepr::Keyword(keyword) => {
                Err(format!("unknown checkpoint frequency keyword: {keyword}"))
            }
            CheckpointFrequencyRepr::Count(0) => {
                Err("checkpoint frequency count must be positive".to_string())
            }
            CheckpointFrequencyRepr::Count(count) => Ok(Self::EveryN(count)),
        }
    }
}

impl From<CheckpointFrequency> for CheckpointFrequencyRepr {
    fn from(frequency: CheckpointFrequency) -> Self {
        match frequency {
            CheckpointFrequency::EveryRow => Self::Keyword("every_row".to_string()),
            CheckpointFrequency::EveryN(count) => Self::Count(count),
        }
    }
}

/// Checkpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSettings {
    /// Whether checkpoints are produced at all.
    #[serde(default)]
    pub enabled: bool,
    /// Row boundary frequency.
    #[serde(default = "default_checkpoint_frequency")]
    pub frequency: CheckpointFrequency,
    /// Pruning interval: checkpoints older than this many rows are dropped.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,
    /// Whether aggregation completion also produces checkpoints.
    #[serde(default)]
    pub aggregation_boundaries: bool,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: default_checkpoint_frequency(),
            checkpoint_interval: default_checkpoint_interval(),
            aggregation_boundaries: false,
        }
    }
}

/// Default checkpoint frequency.
const fn default_checkpoint_frequency() -> CheckpointFrequency {
    CheckpointFrequency::EveryRow
}

/// Default checkpoint pruning interval.
const fn default_checkpoint_interval() -> u64 {
    100
}

// ============================================================================
// SECTION: Payload Store
// ============================================================================

/// Payload store backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PayloadBackend {
    /// Content-addressed filesystem store.
    #[default]
    Filesystem,
}

/// Payload store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadStoreSettings {
    /// Backend selector.
    #[serde(default)]
    pub backend: PayloadBackend,
    /// Base directory owned exclusively by the store.
    pub base_path: PathBuf,
    /// Retention window in days; payloads older than this may be purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

/// Default payload retention in days.
const fn default_retention_days() -> u32 {
    30
}

// ============================================================================
// SECTION: Landscape
// ============================================================================

/// Audit export format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// One JSON array of heterogeneous records.
    #[default]
    Json,
}

/// Audit export configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSettings {
    /// Whether export runs at end of run.
    #[serde(default)]
    pub enabled: bool,
    /// Name of the sink receiving the export stream.
    pub sink: String,
    /// Export format.
    #[serde(default)]
    pub format: ExportFormat,
    /// Whether records are HMAC-signed and chained.
    #[serde(default)]
    pub sign: bool,
}

/// Landscape (audit store) configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LandscapeSettings {
    /// Store URL (`sqlite:///path/to.db` or `sqlite://:memory:`).
    pub url: String,
    /// Optional export configuration.
    #[serde(default)]
    pub export: Option<ExportSettings>,
    /// Whether every committed statement is mirrored to a JSONL journal.
    #[serde(default)]
    pub dump_to_jsonl: bool,
    /// Journal path; required when `dump_to_jsonl` is set.
    #[serde(default)]
    pub dump_to_jsonl_path: Option<PathBuf>,
}

impl LandscapeSettings {
    /// Validates the landscape settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when journaling is enabled without a
    /// path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dump_to_jsonl && self.dump_to_jsonl_path.is_none() {
            return Err(ConfigError::Invalid(
                "landscape.dump_to_jsonl requires dump_to_jsonl_path".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Coalesce
// ============================================================================

/// Coalesce merge-condition policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoalescePolicy {
    /// Merge only when every expected branch arrived.
    RequireAll,
    /// Merge on the first arrival.
    First,
    /// Merge once `quorum_count` branches arrived.
    Quorum,
    /// Merge whatever arrived at timeout or flush.
    BestEffort,
}

/// Coalesce data merge strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Combine all fields; later branches override earlier ones.
    Union,
    /// Nest each branch's row under its branch name.
    Nested,
    /// Take one selected branch's row.
    Select,
}

/// Coalesce point configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoalesceSettings {
    /// Coalesce point name.
    pub name: String,
    /// Merge-condition policy.
    pub policy: CoalescePolicy,
    /// Data merge strategy.
    pub merge: MergeStrategy,
    /// Expected branch names.
    pub branches: Vec<String>,
    /// Required arrivals under the quorum policy.
    #[serde(default)]
    pub quorum_count: Option<usize>,
    /// Branch taken under the select strategy.
    #[serde(default)]
    pub select_branch: Option<String>,
    /// Hold timeout in seconds for timeout-driven merges.
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
}

impl CoalesceSettings {
    /// Validates the coalesce settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an empty branch set, a quorum
    /// policy without a count, a count exceeding the branch set, or a select
    /// strategy without (or with an unknown) selected branch.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.branches.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "coalesce '{}' requires at least one branch",
                self.name
            )));
        }
        if self.policy == CoalescePolicy::Quorum {
            let Some(count) = self.quorum_count else {
                return Err(ConfigError::Invalid(format!(
                    "coalesce '{}' uses quorum policy without quorum_count",
                    self.name
                )));
            };
            if count == 0 || count > self.branches.len() {
                return Err(ConfigError::Invalid(format!(
                    "coalesce '{}' quorum_count must be in 1..={}",
                    self.name,
                    self.branches.len()
                )));
            }
        }
        if self.merge == MergeStrategy::Select {
            let Some(branch) = &self.select_branch else {
                return Err(ConfigError::Invalid(format!(
                    "coalesce '{}' uses select merge without select_branch",
                    self.name
                )));
            };
            if !self.branches.contains(branch) {
                return Err(ConfigError::Invalid(format!(
                    "coalesce '{}' select_branch '{branch}' is not an expected branch",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Gate
// ============================================================================

/// Route destination spec as written in gate configuration.
///
/// String forms: `continue`, `fork`, `sink:<name>`, `node:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RouteSpec {
    /// Continue along the default edge.
    Continue,
    /// Fork to the configured branches.
    Fork,
    /// Route to a named sink.
    Sink(String),
    /// Route to another processing node.
    Node(String),
}

impl TryFrom<String> for RouteSpec {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == "continue" {
            return Ok(Self::Continue);
        }
        if value == "fork" {
            return Ok(Self::Fork);
        }
        if let Some(name) = value.strip_prefix("sink:") {
            if name.is_empty() {
                return Err("sink route requires a name".to_string());
            }
            return Ok(Self::Sink(name.to_string()));
        }
        if let Some(id) = value.strip_prefix("node:") {
            if id.is_empty() {
                return Err("node route requires an id".to_string());
            }
            return Ok(Self::Node(id.to_string()));
        }
        Err(format!("unknown route spec: {value}"))
    }
}

impl From<RouteSpec> for String {
    fn from(spec: RouteSpec) -> Self {
        match spec {
            RouteSpec::Continue => "continue".to_string(),
            RouteSpec::Fork => "fork".to_string(),
            RouteSpec::Sink(name) => format!("sink:{name}"),
            RouteSpec::Node(id) => format!("node:{id}"),
        }
    }
}

/// Config-driven gate configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateSettings {
    /// Gate name.
    pub name: String,
    /// Boolean/string-producing expression over the row.
    pub condition: String,
    /// Route table mapping expression results to destinations.
    pub routes: BTreeMap<String, RouteSpec>,
    /// Fork branch names for `fork` destinations.
    #[serde(default)]
    pub fork_to: Option<Vec<String>>,
}

impl GateSettings {
    /// Validates the gate settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an empty route table or a fork
    /// destination without configured branches.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.routes.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "gate '{}' requires at least one route",
                self.name
            )));
        }
        let has_fork = self.routes.values().any(|spec| *spec == RouteSpec::Fork);
        if has_fork {
            match &self.fork_to {
                Some(branches) if !branches.is_empty() => {}
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "gate '{}' routes to fork without fork_to branches",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Aggregation
// ============================================================================

/// Aggregation output mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AggregationOutputMode {
    /// Emit a single merged row per batch.
    #[default]
    Transform,
    /// Emit one row per buffered member (rarely used).
    Expand,
}

/// Aggregation node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationSettings {
    /// Aggregation name.
    pub name: String,
    /// Close the batch at this member count.
    #[serde(default)]
    pub max_count: Option<usize>,
    /// Close the batch after this buffering duration, in seconds.
    #[serde(default)]
    pub max_duration_seconds: Option<f64>,
    /// Output mode.
    #[serde(default)]
    pub output_mode: AggregationOutputMode,
}

impl AggregationSettings {
    /// Validates the aggregation settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a count trigger is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_count == Some(0) {
            return Err(ConfigError::Invalid(format!(
                "aggregation '{}' max_count must be positive",
                self.name
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Pool
// ============================================================================

/// Pool configuration for batching transforms (AIMD dispatch throttle).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Worker pool size; also the backpressure threshold.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Minimum inter-dispatch delay in milliseconds.
    #[serde(default)]
    pub min_dispatch_delay_ms: u64,
    /// Maximum inter-dispatch delay in milliseconds.
    #[serde(default = "default_max_dispatch_delay_ms")]
    pub max_dispatch_delay_ms: u64,
    /// Multiplicative backoff factor on capacity errors (> 1).
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Additive recovery step on success, in milliseconds.
    #[serde(default = "default_recovery_step_ms")]
    pub recovery_step_ms: u64,
    /// Total wall-clock retry budget per row, in seconds.
    #[serde(default = "default_max_capacity_retry_seconds")]
    pub max_capacity_retry_seconds: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            min_dispatch_delay_ms: 0,
            max_dispatch_delay_ms: default_max_dispatch_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            recovery_step_ms: default_recovery_step_ms(),
            max_capacity_retry_seconds: default_max_capacity_retry_seconds(),
        }
    }
}

impl PoolSettings {
    /// Validates the pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero pool, a backoff
    /// multiplier not greater than 1, or an inverted delay range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be positive".to_string()));
        }
        if self.backoff_multiplier <= 1.0 {
            return Err(ConfigError::Invalid(
                "backoff_multiplier must be greater than 1".to_string(),
            ));
        }
        if self.min_dispatch_delay_ms > self.max_dispatch_delay_ms {
            return Err(ConfigError::Invalid(
                "min_dispatch_delay_ms exceeds max_dispatch_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default pool size.
const fn default_pool_size() -> usize {
    4
}

/// Default maximum dispatch delay in milliseconds.
const fn default_max_dispatch_delay_ms() -> u64 {
    10_000
}

/// Default multiplicative backoff factor.
const fn default_backoff_multiplier() -> f64 {
    2.0
}

/// Default additive recovery step in milliseconds.
const fn default_recovery_step_ms() -> u64 {
    250
}

/// Default capacity retry budget in seconds.
const fn default_max_capacity_retry_seconds() -> u64 {
    3_600
}

// ============================================================================
// SECTION: Validation Failure Policy
// ============================================================================

/// Source validation failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationFailurePolicy {
    /// Drop the row, record the violation, continue.
    #[default]
    Discard,
    /// Quarantine the row through the configured route.
    Route,
    /// Abort the run.
    Fail,
}

// ============================================================================
// SECTION: Engine Settings
// ============================================================================

/// Top-level engine configuration aggregating all recognized sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineSettings {
    /// Retry policy.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Concurrency configuration.
    #[serde(default)]
    pub concurrency: ConcurrencySettings,
    /// Rate limit configuration.
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    /// Checkpoint configuration.
    #[serde(default)]
    pub checkpoint: CheckpointSettings,
    /// Payload store configuration.
    #[serde(default)]
    pub payload_store: Option<PayloadStoreSettings>,
    /// Landscape configuration.
    #[serde(default)]
    pub landscape: Option<LandscapeSettings>,
}

impl EngineSettings {
    /// Validates every populated section.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found in any section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        if let Some(landscape) = &self.landscape {
            landscape.validate()?;
        }
        Ok(())
    }
}
