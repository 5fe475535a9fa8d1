// auditflow-engine/src/executors/gate.rs
// ============================================================================
// Module: Gate Executor
// Description: Config and plugin gates with routing and fork dispatch.
// Purpose: Resolve route labels to destinations and record every decision.
// Dependencies: auditflow-core, auditflow-landscape, crate::{errors,
// executors::expression, tokens}
// ============================================================================

//! ## Overview
//! Config gates evaluate an expression over the row and look the result up
//! in the gate's route table; plugin gates return a routing action directly.
//! Labels resolve to a destination: continue, a named sink, another
//! processing node, or a fork. Unknown labels close the state `Failed` and
//! raise [`MissingEdgeError`]. Fork destinations require a token manager and
//! a non-empty branch list, realized through `fork_token` followed by one
//! routing event per branch.
//!
//! Successful gates always complete with status `Completed`; the terminal
//! routed/forked behavior is derived from routing events.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::time::Instant;

use auditflow_core::EdgeId;
use auditflow_core::GatePlugin;
use auditflow_core::GateSettings;
use auditflow_core::NodeId;
use auditflow_core::NodeStateStatus;
use auditflow_core::NodeType;
use auditflow_core::PluginContext;
use auditflow_core::RouteSpec;
use auditflow_core::RoutingAction;
use auditflow_core::RoutingMode;
use auditflow_core::RunId;
use auditflow_landscape::LandscapeRecorder;
use serde_json::Value;
use serde_json::json;

use crate::errors::EngineError;
use crate::errors::MissingEdgeError;
use crate::executors::expression::Expression;
use crate::tokens::TokenInfo;
use crate::tokens::TokenManager;

// ============================================================================
// SECTION: Edge Map
// ============================================================================

/// Resolved edge: identifier plus destination node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeTarget {
    /// Registered edge identifier.
    pub edge_id: EdgeId,
    /// Destination node.
    pub to_node: NodeId,
}

/// Maps `(origin node, label)` to its registered edge.
pub type EdgeMap = HashMap<(NodeId, String), EdgeTarget>;

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Result of executing a gate for one token.
#[derive(Debug)]
pub struct GateOutcome {
    /// The routing action taken.
    pub action: RoutingAction,
    /// Token after the gate (gates do not modify data).
    pub updated_token: TokenInfo,
    /// Child tokens minted by a fork, paired with their branch edges.
    pub child_tokens: Vec<(TokenInfo, NodeId)>,
    /// Sink node reached by an explicit route, when any.
    pub sink_node: Option<NodeId>,
    /// Processing node reached by an explicit route, when any.
    pub next_node_id: Option<NodeId>,
    /// The explicit route label taken, when not `continue`.
    pub route_label: Option<String>,
}

// ============================================================================
// SECTION: Gate Executor
// ============================================================================

/// Executes gate nodes.
#[derive(Debug)]
pub struct GateExecutor {
    /// Recorder for states and routing events.
    recorder: LandscapeRecorder,
    /// Owning run.
    run_id: RunId,
    /// Registered edges by (origin, label).
    edge_map: EdgeMap,
    /// Node types for destination derivation.
    node_types: HashMap<NodeId, NodeType>,
}

impl GateExecutor {
    /// Creates a gate executor.
    #[must_use]
    pub const fn new(
        recorder: LandscapeRecorder,
        run_id: RunId,
        edge_map: EdgeMap,
        node_types: HashMap<NodeId, NodeType>,
    ) -> Self {
        Self {
            recorder,
            run_id,
            edge_map,
            node_types,
        }
    }

    /// Executes a config-driven gate.
    ///
    /// The condition expression is evaluated against the token's row data; a
    /// boolean result becomes the `true`/`false` label, a string result is
    /// used directly. The label is looked up in the gate's route table and
    /// dispatched.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingEdge`] after recording the state
    /// `Failed` when a label has no registered edge, and
    /// [`EngineError::Invariant`] for labels missing from the route table or
    /// fork destinations without a token manager.
    pub fn execute_config_gate(
        &self,
        settings: &GateSettings,
        node_id: &NodeId,
        step_index: u32,
        token: &TokenInfo,
        _ctx: &PluginContext,
        token_manager: Option<&TokenManager>,
    ) -> Result<GateOutcome, EngineError> {
        let state = self.recorder.begin_node_state(
            &token.token_id,
            node_id,
            &self.run_id,
            step_index,
            1,
            &token.row_data,
        )?;
        let started = Instant::now();

        let eval_result = Expression::parse(&settings.condition)
            .and_then(|expression| expression.evaluate(&token.row_data));
        let evaluated = match eval_result {
            Ok(value) => value,
            Err(err) => {
                self.recorder.complete_node_state(
                    &state.state_id,
                    NodeStateStatus::Failed,
                    None,
                    Some(duration_ms(started)),
                    Some(&json!({"exception": err.to_string(), "type": "ExpressionError"})),
                )?;
                return Err(EngineError::Plugin {
                    node_id: node_id.clone(),
                    message: err.to_string(),
                });
            }
        };

        let route_label = match &evaluated {
            Value::Bool(true) => "true".to_string(),
            Value::Bool(false) => "false".to_string(),
            Value::String(label) => label.clone(),
            other => other.to_string(),
        };
        let reason = json!({"condition": settings.condition, "result": route_label});

        let Some(spec) = settings.routes.get(&route_label) else {
            self.recorder.complete_node_state(
                &state.state_id,
                NodeStateStatus::Failed,
                None,
                Some(duration_ms(started)),
                Some(&json!({
                    "exception": format!(
                        "route label '{route_label}' not found in routes config"
                    ),
                    "type": "RouteConfigError",
                })),
            )?;
            return Err(EngineError::Invariant(format!(
                "gate '{}' condition returned '{route_label}' which is not in its routes",
                settings.name
            )));
        };

        let dispatch = self.dispatch_spec(
            &state.state_id,
            node_id,
            step_index,
            &route_label,
            spec,
            token,
            token_manager,
            settings.fork_to.as_deref(),
            &reason,
        );
        let outcome = match dispatch {
            Ok(outcome) => outcome,
            Err(err) => {
                // The state must never be left open on a routing failure.
                self.recorder.complete_node_state(
                    &state.state_id,
                    NodeStateStatus::Failed,
                    None,
                    Some(duration_ms(started)),
                    Some(&json!({"exception": err.to_string(), "type": "RoutingError"})),
                )?;
                return Err(err);
            }
        };

        self.recorder.complete_node_state(
            &state.state_id,
            NodeStateStatus::Completed,
            Some(&token.row_data),
            Some(duration_ms(started)),
            None,
        )?;
        Ok(outcome)
    }

    /// Executes a plugin gate returning a routing action directly.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingEdge`] after recording the state
    /// `Failed` when a destination has no registered edge.
    pub fn execute_plugin_gate(
        &self,
        plugin: &dyn GatePlugin,
        node_id: &NodeId,
        step_index: u32,
        token: &TokenInfo,
        ctx: &PluginContext,
        token_manager: Option<&TokenManager>,
    ) -> Result<GateOutcome, EngineError> {
        let state = self.recorder.begin_node_state(
            &token.token_id,
            node_id,
            &self.run_id,
            step_index,
            1,
            &token.row_data,
        )?;
        let state_ctx = ctx.with_state(state.state_id.clone());
        let started = Instant::now();

        let action = match plugin.evaluate(&token.row_data, &state_ctx) {
            Ok(action) => action,
            Err(err) => {
                self.recorder.complete_node_state(
                    &state.state_id,
                    NodeStateStatus::Failed,
                    None,
                    Some(duration_ms(started)),
                    Some(&json!({"exception": err.to_string(), "type": "GatePluginError"})),
                )?;
                return Err(EngineError::Plugin {
                    node_id: node_id.clone(),
                    message: err.to_string(),
                });
            }
        };

        let dispatch =
            self.dispatch_action(&state.state_id, node_id, step_index, &action, token, token_manager);
        let outcome = match dispatch {
            Ok(outcome) => outcome,
            Err(err) => {
                self.recorder.complete_node_state(
                    &state.state_id,
                    NodeStateStatus::Failed,
                    None,
                    Some(duration_ms(started)),
                    Some(&json!({"exception": err.to_string(), "type": "RoutingError"})),
                )?;
                return Err(err);
            }
        };

        self.recorder.complete_node_state(
            &state.state_id,
            NodeStateStatus::Completed,
            Some(&token.row_data),
            Some(duration_ms(started)),
            None,
        )?;
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Dispatches a config route spec.
    #[allow(clippy::too_many_arguments, reason = "Dispatch carries the full routing context.")]
    fn dispatch_spec(
        &self,
        state_id: &auditflow_core::StateId,
        node_id: &NodeId,
        step_index: u32,
        route_label: &str,
        spec: &RouteSpec,
        token: &TokenInfo,
        token_manager: Option<&TokenManager>,
        fork_branches: Option<&[String]>,
        reason: &Value,
    ) -> Result<GateOutcome, EngineError> {
        match spec {
            RouteSpec::Continue => {
                let action = RoutingAction::continue_with(Some(reason.clone()));
                self.record_routing(state_id, node_id, &action)?;
                Ok(GateOutcome {
                    action,
                    updated_token: token.clone(),
                    child_tokens: Vec::new(),
                    sink_node: None,
                    next_node_id: None,
                    route_label: None,
                })
            }
            RouteSpec::Fork => {
                let branches = fork_branches.filter(|branches| !branches.is_empty()).ok_or_else(
                    || {
                        EngineError::Invariant(format!(
                            "gate {node_id} route '{route_label}' resolved to fork but no fork \
                             branches are configured"
                        ))
                    },
                )?;
                let Some(manager) = token_manager else {
                    return Err(EngineError::Invariant(format!(
                        "gate {node_id} routes to fork but no token manager is available; \
                         child tokens cannot be created without compromising audit integrity"
                    )));
                };
                let action =
                    RoutingAction::fork_to_paths(branches.to_vec(), Some(reason.clone()));
                self.record_routing(state_id, node_id, &action)?;
                let (children, _fork_group) =
                    manager.fork_token(token, branches, step_index)?;
                let mut child_tokens = Vec::with_capacity(children.len());
                for child in children {
                    let branch = child.branch_name.clone().unwrap_or_default();
                    let target = self.edge_target(node_id, &branch)?;
                    child_tokens.push((child, target.to_node));
                }
                Ok(GateOutcome {
                    action,
                    updated_token: token.clone(),
                    child_tokens,
                    sink_node: None,
                    next_node_id: None,
                    route_label: None,
                })
            }
            RouteSpec::Sink(sink_name) => {
                let action = RoutingAction::route(
                    route_label,
                    RoutingMode::Move,
                    Some(reason.clone()),
                );
                self.record_routing(state_id, node_id, &action)?;
                Ok(GateOutcome {
                    action,
                    updated_token: token.clone(),
                    child_tokens: Vec::new(),
                    sink_node: Some(NodeId::new(sink_name.as_str())),
                    next_node_id: None,
                    route_label: Some(route_label.to_string()),
                })
            }
            RouteSpec::Node(next) => {
                let action = RoutingAction::route(
                    route_label,
                    RoutingMode::Move,
                    Some(reason.clone()),
                );
                self.record_routing(state_id, node_id, &action)?;
                Ok(GateOutcome {
                    action,
                    updated_token: token.clone(),
                    child_tokens: Vec::new(),
                    sink_node: None,
                    next_node_id: Some(NodeId::new(next.as_str())),
                    route_label: Some(route_label.to_string()),
                })
            }
        }
    }

    /// Dispatches a plugin-produced routing action.
    fn dispatch_action(
        &self,
        state_id: &auditflow_core::StateId,
        node_id: &NodeId,
        step_index: u32,
        action: &RoutingAction,
        token: &TokenInfo,
        token_manager: Option<&TokenManager>,
    ) -> Result<GateOutcome, EngineError> {
        match action {
            RoutingAction::Continue {
                ..
            } => {
                self.record_routing(state_id, node_id, action)?;
                Ok(GateOutcome {
                    action: action.clone(),
                    updated_token: token.clone(),
                    child_tokens: Vec::new(),
                    sink_node: None,
                    next_node_id: None,
                    route_label: None,
                })
            }
            RoutingAction::Fork {
                branches, ..
            } => {
                if branches.is_empty() {
                    return Err(EngineError::Invariant(format!(
                        "gate {node_id} produced a fork with no branches"
                    )));
                }
                let Some(manager) = token_manager else {
                    return Err(EngineError::Invariant(format!(
                        "gate {node_id} routes to fork but no token manager is available"
                    )));
                };
                self.record_routing(state_id, node_id, action)?;
                let (children, _fork_group) = manager.fork_token(token, branches, step_index)?;
                let mut child_tokens = Vec::with_capacity(children.len());
                for child in children {
                    let branch = child.branch_name.clone().unwrap_or_default();
                    let target = self.edge_target(node_id, &branch)?;
                    child_tokens.push((child, target.to_node));
                }
                Ok(GateOutcome {
                    action: action.clone(),
                    updated_token: token.clone(),
                    child_tokens,
                    sink_node: None,
                    next_node_id: None,
                    route_label: None,
                })
            }
            RoutingAction::Route {
                label, ..
            } => {
                self.record_routing(state_id, node_id, action)?;
                let target = self.edge_target(node_id, label)?;
                let target_type = self.node_types.get(&target.to_node).copied();
                let (sink_node, next_node_id) = if target_type == Some(NodeType::Sink) {
                    (Some(target.to_node), None)
                } else {
                    (None, Some(target.to_node))
                };
                Ok(GateOutcome {
                    action: action.clone(),
                    updated_token: token.clone(),
                    child_tokens: Vec::new(),
                    sink_node,
                    next_node_id,
                    route_label: Some(label.clone()),
                })
            }
        }
    }

    /// Records routing events for every destination of an action.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingEdge`] when any destination has no
    /// registered edge.
    fn record_routing(
        &self,
        state_id: &auditflow_core::StateId,
        node_id: &NodeId,
        action: &RoutingAction,
    ) -> Result<(), EngineError> {
        let mut routes = Vec::new();
        for destination in action.destinations() {
            let target = self.edge_target(node_id, &destination)?;
            routes.push((target.edge_id, action.mode()));
        }
        self.recorder.record_routing_events(state_id, &routes, action.reason())?;
        Ok(())
    }

    /// Resolves an edge by (origin, label) or fails closed.
    fn edge_target(&self, node_id: &NodeId, label: &str) -> Result<EdgeTarget, EngineError> {
        self.edge_map
            .get(&(node_id.clone(), label.to_string()))
            .cloned()
            .ok_or_else(|| {
                EngineError::MissingEdge(MissingEdgeError {
                    node_id: node_id.clone(),
                    label: label.to_string(),
                })
            })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns elapsed wall-clock milliseconds.
fn duration_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1_000.0
}
