// auditflow-engine/src/executors/coalesce.rs
// ============================================================================
// Module: Coalesce Executor
// Description: Stateful barrier merging tokens from parallel fork paths.
// Purpose: Hold forked tokens until merge conditions are met, then merge.
// Dependencies: auditflow-core, auditflow-landscape, crate::tokens
// ============================================================================

//! ## Overview
//! Coalesce correlates tokens by row: forked siblings share the source row,
//! so the barrier is keyed by `(coalesce_name, row_id)`. Arrivals buffer by
//! branch until the policy is satisfied (`require_all`, `first`, `quorum`,
//! `best_effort`); merging produces one new token via the token manager and
//! records one completed node state per consumed token with
//! `{"merged_into": <merged_token_id>}` as output.
//!
//! `check_timeouts` merges overdue `best_effort` and quorum-met holds;
//! `flush_pending` drains everything at end of run: `best_effort` merges
//! what arrived, `quorum` merges when met and fails otherwise, `require_all`
//! never partially merges (`failure_reason = "incomplete_branches"`), and
//! `first` should have nothing pending.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::time::Duration;
use std::time::Instant;

use auditflow_core::CoalescePolicy;
use auditflow_core::CoalesceSettings;
use auditflow_core::MergeStrategy;
use auditflow_core::NodeId;
use auditflow_core::NodeStateStatus;
use auditflow_core::RowId;
use auditflow_landscape::LandscapeRecorder;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::errors::EngineError;
use crate::tokens::TokenInfo;
use crate::tokens::TokenManager;

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Result of a coalesce accept, timeout, or flush operation.
#[derive(Debug, Default)]
pub struct CoalesceOutcome {
    /// True when the token is being held waiting for more branches.
    pub held: bool,
    /// The merged token when the merge completed.
    pub merged_token: Option<TokenInfo>,
    /// Tokens consumed by the merge (or abandoned by a failure).
    pub consumed_tokens: Vec<TokenInfo>,
    /// Audit metadata about the merge decision.
    pub metadata: Option<Value>,
    /// Failure reason when the barrier gave up without merging.
    pub failure_reason: Option<String>,
}

// ============================================================================
// SECTION: Pending State
// ============================================================================

/// Pending tokens for one `(coalesce_name, row_id)` barrier.
#[derive(Debug)]
struct PendingCoalesce {
    /// Arrived tokens in arrival order: (branch, token, arrival time).
    arrived: Vec<(String, TokenInfo, Instant)>,
    /// First arrival, for timeout calculation.
    first_arrival: Instant,
}

impl PendingCoalesce {
    /// Returns true when the branch has already arrived.
    fn has_branch(&self, branch: &str) -> bool {
        self.arrived.iter().any(|(name, _, _)| name == branch)
    }
}

// ============================================================================
// SECTION: Coalesce Executor
// ============================================================================

/// Executes coalesce points with audit recording.
#[derive(Debug)]
pub struct CoalesceExecutor {
    /// Recorder for consumed-token node states.
    recorder: LandscapeRecorder,
    /// Token manager producing merged tokens.
    token_manager: TokenManager,
    /// Registered coalesce settings by name.
    settings: HashMap<String, CoalesceSettings>,
    /// Node ids by coalesce name.
    node_ids: HashMap<String, NodeId>,
    /// Pending barriers keyed by (coalesce name, row id).
    pending: HashMap<(String, RowId), PendingCoalesce>,
}

impl CoalesceExecutor {
    /// Creates a coalesce executor.
    #[must_use]
    pub fn new(recorder: LandscapeRecorder, token_manager: TokenManager) -> Self {
        Self {
            recorder,
            token_manager,
            settings: HashMap::new(),
            node_ids: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Registers a coalesce point.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] when the settings are invalid.
    pub fn register_coalesce(
        &mut self,
        settings: CoalesceSettings,
        node_id: NodeId,
    ) -> Result<(), EngineError> {
        settings.validate()?;
        self.node_ids.insert(settings.name.clone(), node_id);
        self.settings.insert(settings.name.clone(), settings);
        Ok(())
    }

    /// Returns the registered coalesce names for timeout sweeps.
    #[must_use]
    pub fn registered_names(&self) -> Vec<String> {
        self.settings.keys().cloned().collect()
    }

    /// Accepts a token at a coalesce point.
    ///
    /// Returns a held outcome while branches are missing, or the merged
    /// outcome once the policy is satisfied.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Invariant`] for unregistered names, tokens
    /// without a branch name, or unexpected branches.
    pub fn accept(
        &mut self,
        token: TokenInfo,
        coalesce_name: &str,
        step_index: u32,
    ) -> Result<CoalesceOutcome, EngineError> {
        let Some(settings) = self.settings.get(coalesce_name).cloned() else {
            return Err(EngineError::Invariant(format!(
                "coalesce '{coalesce_name}' not registered"
            )));
        };
        let Some(branch) = token.branch_name.clone() else {
            return Err(EngineError::Invariant(format!(
                "token {} has no branch name; only forked tokens can be coalesced",
                token.token_id
            )));
        };
        if !settings.branches.contains(&branch) {
            return Err(EngineError::Invariant(format!(
                "token branch '{branch}' not in expected branches for coalesce \
                 '{coalesce_name}': {:?}",
                settings.branches
            )));
        }

        let key = (coalesce_name.to_string(), token.row_id.clone());
        let now = Instant::now();
        let pending = self.pending.entry(key.clone()).or_insert_with(|| PendingCoalesce {
            arrived: Vec::new(),
            first_arrival: now,
        });
        // A branch arriving twice replaces its earlier arrival.
        if pending.has_branch(&branch) {
            pending.arrived.retain(|(name, _, _)| name != &branch);
        }
        pending.arrived.push((branch, token, now));

        if should_merge(&settings, pending) {
            let Some(pending) = self.pending.remove(&key) else {
                return Err(EngineError::Invariant(
                    "pending coalesce vanished during merge".to_string(),
                ));
            };
            return self.execute_merge(&settings, pending, step_index);
        }
        Ok(CoalesceOutcome {
            held: true,
            ..CoalesceOutcome::default()
        })
    }

    /// Merges overdue holds for one coalesce point.
    ///
    /// `best_effort` merges whatever arrived; `quorum` merges when the
    /// quorum is met. Other policies ignore timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Invariant`] for unregistered names.
    pub fn check_timeouts(
        &mut self,
        coalesce_name: &str,
        step_index: u32,
    ) -> Result<Vec<CoalesceOutcome>, EngineError> {
        let Some(settings) = self.settings.get(coalesce_name).cloned() else {
            return Err(EngineError::Invariant(format!(
                "coalesce '{coalesce_name}' not registered"
            )));
        };
        let Some(timeout_seconds) = settings.timeout_seconds else {
            return Ok(Vec::new());
        };
        let timeout = Duration::from_secs_f64(timeout_seconds.max(0.0));
        let now = Instant::now();
        let due: Vec<(String, RowId)> = self
            .pending
            .iter()
            .filter(|((name, _), pending)| {
                name == coalesce_name && now.duration_since(pending.first_arrival) >= timeout
            })
            .map(|(key, _)| key.clone())
            .collect();

        let mut outcomes = Vec::new();
        for key in due {
            let Some(pending) = self.pending.remove(&key) else {
                continue;
            };
            let quorum_met = settings
                .quorum_count
                .is_some_and(|count| pending.arrived.len() >= count);
            match settings.policy {
                CoalescePolicy::BestEffort if !pending.arrived.is_empty() => {
                    outcomes.push(self.execute_merge(&settings, pending, step_index)?);
                }
                CoalescePolicy::Quorum if quorum_met => {
                    outcomes.push(self.execute_merge(&settings, pending, step_index)?);
                }
                _ => {
                    // Not mergeable on timeout; hold until flush.
                    self.pending.insert(key, pending);
                }
            }
        }
        Ok(outcomes)
    }

    /// Drains pending barriers for one coalesce point at end of source.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when merge recording fails.
    pub fn flush_pending_for(
        &mut self,
        coalesce_name: &str,
        step_index: u32,
    ) -> Result<Vec<CoalesceOutcome>, EngineError> {
        let keys: Vec<(String, RowId)> = self
            .pending
            .keys()
            .filter(|(name, _)| name == coalesce_name)
            .cloned()
            .collect();
        self.drain_keys(keys, step_index)
    }

    /// Drains every pending barrier at end of source or shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when merge recording fails.
    pub fn flush_pending(&mut self, step_index: u32) -> Result<Vec<CoalesceOutcome>, EngineError> {
        let keys: Vec<(String, RowId)> = self.pending.keys().cloned().collect();
        self.drain_keys(keys, step_index)
    }

    /// Drains the provided barrier keys by policy.
    fn drain_keys(
        &mut self,
        keys: Vec<(String, RowId)>,
        step_index: u32,
    ) -> Result<Vec<CoalesceOutcome>, EngineError> {
        let mut outcomes = Vec::new();
        for key in keys {
            let Some(settings) = self.settings.get(&key.0).cloned() else {
                continue;
            };
            let Some(pending) = self.pending.remove(&key) else {
                continue;
            };
            match settings.policy {
                CoalescePolicy::BestEffort => {
                    if !pending.arrived.is_empty() {
                        outcomes.push(self.execute_merge(&settings, pending, step_index)?);
                    }
                }
                CoalescePolicy::Quorum => {
                    let met = settings
                        .quorum_count
                        .is_some_and(|count| pending.arrived.len() >= count);
                    if met {
                        outcomes.push(self.execute_merge(&settings, pending, step_index)?);
                    } else {
                        outcomes.push(failure_outcome(
                            &settings,
                            pending,
                            "quorum_not_met",
                        ));
                    }
                }
                CoalescePolicy::RequireAll => {
                    // require_all never does a partial merge.
                    outcomes.push(failure_outcome(
                        &settings,
                        pending,
                        "incomplete_branches",
                    ));
                }
                CoalescePolicy::First => {
                    // first merges immediately; pending entries are a bug.
                    outcomes.push(failure_outcome(&settings, pending, "unexpected_pending"));
                }
            }
        }
        Ok(outcomes)
    }

    /// Executes a merge: data strategy, merged token, consumed-token states.
    fn execute_merge(
        &self,
        settings: &CoalesceSettings,
        pending: PendingCoalesce,
        step_index: u32,
    ) -> Result<CoalesceOutcome, EngineError> {
        let now = Instant::now();
        let merged_data = merge_data(settings, &pending);
        let consumed: Vec<TokenInfo> =
            pending.arrived.iter().map(|(_, token, _)| token.clone()).collect();
        let merged_token =
            self.token_manager.coalesce_tokens(&consumed, merged_data, step_index)?;

        let Some(node_id) = self.node_ids.get(&settings.name) else {
            return Err(EngineError::Invariant(format!(
                "coalesce '{}' has no registered node",
                settings.name
            )));
        };
        for token in &consumed {
            let state = self.recorder.begin_node_state(
                &token.token_id,
                node_id,
                self.token_manager.run_id(),
                step_index,
                1,
                &token.row_data,
            )?;
            self.recorder.complete_node_state(
                &state.state_id,
                NodeStateStatus::Completed,
                Some(&json!({"merged_into": merged_token.token_id.as_str()})),
                Some(0.0),
                None,
            )?;
        }

        let arrival_order: Vec<Value> = pending
            .arrived
            .iter()
            .map(|(branch, _, at)| {
                json!({
                    "branch": branch,
                    "arrival_offset_ms":
                        at.duration_since(pending.first_arrival).as_secs_f64() * 1_000.0,
                })
            })
            .collect();
        let metadata = json!({
            "policy": settings.policy,
            "merge_strategy": settings.merge,
            "expected_branches": settings.branches,
            "branches_arrived":
                pending.arrived.iter().map(|(branch, _, _)| branch.clone()).collect::<Vec<_>>(),
            "arrival_order": arrival_order,
            "wait_duration_ms":
                now.duration_since(pending.first_arrival).as_secs_f64() * 1_000.0,
        });

        Ok(CoalesceOutcome {
            held: false,
            merged_token: Some(merged_token),
            consumed_tokens: consumed,
            metadata: Some(metadata),
            failure_reason: None,
        })
    }
}

// ============================================================================
// SECTION: Merge Conditions
// ============================================================================

/// Checks whether the policy is satisfied by the arrivals.
fn should_merge(settings: &CoalesceSettings, pending: &PendingCoalesce) -> bool {
    let arrived = pending.arrived.len();
    let expected = settings.branches.len();
    match settings.policy {
        CoalescePolicy::RequireAll | CoalescePolicy::BestEffort => arrived == expected,
        CoalescePolicy::First => arrived >= 1,
        CoalescePolicy::Quorum => {
            settings.quorum_count.is_some_and(|count| arrived >= count)
        }
    }
}

/// Merges arrived row data according to the strategy.
fn merge_data(settings: &CoalesceSettings, pending: &PendingCoalesce) -> Value {
    let by_branch = |branch: &str| {
        pending
            .arrived
            .iter()
            .find(|(name, _, _)| name == branch)
            .map(|(_, token, _)| &token.row_data)
    };
    match settings.merge {
        MergeStrategy::Union => {
            // Combine all fields; later branches override earlier ones.
            let mut merged = Map::new();
            for branch in &settings.branches {
                if let Some(Value::Object(fields)) = by_branch(branch) {
                    for (key, value) in fields {
                        merged.insert(key.clone(), value.clone());
                    }
                }
            }
            Value::Object(merged)
        }
        MergeStrategy::Nested => {
            let mut merged = Map::new();
            for branch in &settings.branches {
                if let Some(data) = by_branch(branch) {
                    merged.insert(branch.clone(), data.clone());
                }
            }
            Value::Object(merged)
        }
        MergeStrategy::Select => settings
            .select_branch
            .as_deref()
            .and_then(by_branch)
            .or_else(|| pending.arrived.first().map(|(_, token, _)| &token.row_data))
            .cloned()
            .unwrap_or(Value::Null),
    }
}

/// Builds a failure outcome with audit metadata.
fn failure_outcome(
    settings: &CoalesceSettings,
    pending: PendingCoalesce,
    reason: &str,
) -> CoalesceOutcome {
    let branches_arrived: Vec<String> =
        pending.arrived.iter().map(|(branch, _, _)| branch.clone()).collect();
    let consumed: Vec<TokenInfo> =
        pending.arrived.into_iter().map(|(_, token, _)| token).collect();
    CoalesceOutcome {
        held: false,
        merged_token: None,
        consumed_tokens: consumed,
        metadata: Some(json!({
            "policy": settings.policy,
            "expected_branches": settings.branches,
            "quorum_required": settings.quorum_count,
            "branches_arrived": branches_arrived,
        })),
        failure_reason: Some(reason.to_string()),
    }
}
