// auditflow-engine/src/orchestrator.rs
// ============================================================================
// Module: Orchestrator
// Description: Top-level pipeline driver over the execution graph.
// Purpose: Walk the graph per token, owning retry, checkpoint, and routing.
// Dependencies: auditflow-core, auditflow-landscape, auditflow-telemetry,
// crate::{errors, executors, tokens}
// ============================================================================

//! ## Overview
//! The orchestrator is the single canonical execution path: it registers the
//! graph, drains the source into tokens, and walks each token through the
//! node it sits at, advancing along routing destinations, enqueueing fork
//! children, and handing off to aggregations and coalesce points. State
//! transitions are committed before any downstream work observes them.
//!
//! End of run drains coalesce points and aggregation batches, finalizes the
//! run (reproducibility grade), and, when configured, streams the signed
//! export. A failed run still transitions to `Failed` and still exports a
//! partial, signed audit record of everything that did happen.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use auditflow_core::AggregationPlugin;
use auditflow_core::AggregationSettings;
use auditflow_core::CheckpointFrequency;
use auditflow_core::CoalesceSettings;
use auditflow_core::EngineSettings;
use auditflow_core::ExecutionGraph;
use auditflow_core::GatePlugin;
use auditflow_core::GateSettings;
use auditflow_core::NodeId;
use auditflow_core::NodeType;
use auditflow_core::PluginContext;
use auditflow_core::ReproducibilityGrade;
use auditflow_core::RunId;
use auditflow_core::RunStatus;
use auditflow_core::SchemaContract;
use auditflow_core::SinkPlugin;
use auditflow_core::SourcePlugin;
use auditflow_core::TokenOutcomeKind;
use auditflow_core::TransformPlugin;
use auditflow_core::ValidationFailurePolicy;
use auditflow_landscape::CheckpointManager;
use auditflow_landscape::LandscapeExporter;
use auditflow_landscape::LandscapeRecorder;
use auditflow_landscape::manifest_final_hash;
use auditflow_telemetry::TelemetryBus;
use auditflow_telemetry::TelemetryEvent;
use serde_json::Value;
use serde_json::json;

use crate::errors::EngineError;
use crate::errors::MissingEdgeError;
use crate::executors::AggregationExecutor;
use crate::executors::CoalesceExecutor;
use crate::executors::GateExecutor;
use crate::executors::SinkExecutor;
use crate::executors::SourceExecutor;
use crate::executors::TransformExecution;
use crate::executors::TransformExecutor;
use crate::executors::gate::EdgeMap;
use crate::executors::gate::EdgeTarget;
use crate::retry::RetryPolicy;
use crate::tokens::TokenInfo;
use crate::tokens::TokenManager;

// ============================================================================
// SECTION: Node Plugins
// ============================================================================

/// Gate flavor: config-driven expression or plugin.
pub enum GateKind {
    /// Expression + route table evaluated by the engine.
    Config(GateSettings),
    /// Plugin returning a routing action directly.
    Plugin(Box<dyn GatePlugin>),
}

impl std::fmt::Debug for GateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(settings) => f.debug_tuple("Config").field(&settings.name).finish(),
            Self::Plugin(_) => f.debug_tuple("Plugin").finish(),
        }
    }
}

/// Plugin binding for one graph node.
pub enum NodePlugin {
    /// Source node.
    Source(Box<dyn SourcePlugin>),
    /// Transform node.
    Transform(Arc<dyn TransformPlugin>),
    /// Gate node.
    Gate(GateKind),
    /// Aggregation node with its settings.
    Aggregation {
        /// The aggregation plugin.
        plugin: Box<dyn AggregationPlugin>,
        /// Trigger and output-mode settings.
        settings: AggregationSettings,
    },
    /// Sink node.
    Sink(Box<dyn SinkPlugin>),
    /// Coalesce point.
    Coalesce(CoalesceSettings),
}

impl std::fmt::Debug for NodePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Source(_) => "Source",
            Self::Transform(_) => "Transform",
            Self::Gate(_) => "Gate",
            Self::Aggregation {
                ..
            } => "Aggregation",
            Self::Sink(_) => "Sink",
            Self::Coalesce(_) => "Coalesce",
        };
        f.write_str(label)
    }
}

// ============================================================================
// SECTION: Run Outcome
// ============================================================================

/// Summary of a completed (or failed) run.
#[derive(Debug)]
pub struct RunOutcome {
    /// Run identifier.
    pub run_id: RunId,
    /// Terminal run status.
    pub status: RunStatus,
    /// Reproducibility grade, when the run finalized.
    pub grade: Option<ReproducibilityGrade>,
    /// Rows emitted by the source into the pipeline.
    pub rows_emitted: u64,
    /// Rows discarded or quarantined by source validation.
    pub rows_rejected: u64,
    /// Exported audit records, when export ran.
    pub export: Option<Vec<Value>>,
    /// Manifest final hash, when export ran.
    pub export_final_hash: Option<String>,
}

// ============================================================================
// SECTION: Work Queue
// ============================================================================

/// One queued unit of work: a token sitting at a node.
#[derive(Debug)]
struct WorkItem {
    /// The token.
    token: TokenInfo,
    /// Node the token is at.
    node_id: NodeId,
    /// Explicit route label that delivered the token here, when any.
    route_label: Option<String>,
}

// ============================================================================
// SECTION: Orchestrator
// ============================================================================

/// Top-level pipeline driver.
pub struct Orchestrator {
    /// Recorder for the whole run.
    recorder: LandscapeRecorder,
    /// The execution graph.
    graph: ExecutionGraph,
    /// Plugin bindings per node.
    plugins: BTreeMap<NodeId, NodePlugin>,
    /// Engine settings.
    settings: EngineSettings,
    /// Source validation failure policy.
    validation_policy: ValidationFailurePolicy,
    /// Export signing key, when signing is requested.
    signing_key: Option<Vec<u8>>,
    /// Optional telemetry bus.
    telemetry: Option<Arc<TelemetryBus>>,
}

impl Orchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub const fn new(
        recorder: LandscapeRecorder,
        graph: ExecutionGraph,
        plugins: BTreeMap<NodeId, NodePlugin>,
        settings: EngineSettings,
        validation_policy: ValidationFailurePolicy,
    ) -> Self {
        Self {
            recorder,
            graph,
            plugins,
            settings,
            validation_policy,
            signing_key: None,
            telemetry: None,
        }
    }

    /// Attaches an export signing key.
    #[must_use]
    pub fn with_signing_key(mut self, key: &[u8]) -> Self {
        self.signing_key = Some(key.to_vec());
        self
    }

    /// Attaches a telemetry bus.
    #[must_use]
    pub fn with_telemetry(mut self, bus: Arc<TelemetryBus>) -> Self {
        self.telemetry = Some(bus);
        self
    }

    /// Executes the pipeline to completion.
    ///
    /// On failure the run transitions to `Failed` and the exporter still
    /// produces a partial record before the error propagates.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] for integrity violations, routing failures,
    /// plugin infrastructure failures, and audit store failures.
    pub fn run(mut self) -> Result<RunOutcome, EngineError> {
        self.settings.validate()?;
        self.graph.validate_edge_compatibility()?;

        let config = json!({
            "settings": self.settings,
            "graph_hash": self.graph.graph_hash()?,
        });
        let source_schema = self.source_schema();
        let run = self.recorder.begin_run(&config, source_schema.as_ref())?;
        let run_id = run.run_id.clone();
        self.emit_event(&run_id, "run_started", json!({}));

        let result = self.execute_run(&run_id);
        match result {
            Ok(mut outcome) => {
                let grade = self.recorder.finalize_run(&run_id)?;
                outcome.grade = Some(grade);
                outcome.status = RunStatus::Completed;
                let (export, final_hash) = self.run_export(&run_id);
                outcome.export = export;
                outcome.export_final_hash = final_hash;
                self.emit_event(&run_id, "run_completed", json!({}));
                self.flush_telemetry();
                Ok(outcome)
            }
            Err(err) => {
                // Best effort: the partial trail is still valuable.
                let _ = self.recorder.complete_run(&run_id, RunStatus::Failed);
                let _ = self.run_export(&run_id);
                self.emit_event(&run_id, "run_failed", json!({"error": err.to_string()}));
                self.flush_telemetry();
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Inner execution
    // ------------------------------------------------------------------

    /// Runs registration, the source, and the token loop.
    fn execute_run(&mut self, run_id: &RunId) -> Result<RunOutcome, EngineError> {
        let order = self.graph.topological_order()?;
        let step_map: HashMap<NodeId, u32> = order
            .iter()
            .enumerate()
            .map(|(index, node_id)| {
                (node_id.clone(), u32::try_from(index).unwrap_or(u32::MAX))
            })
            .collect();
        let node_types: HashMap<NodeId, NodeType> = self
            .graph
            .nodes()
            .iter()
            .map(|node| (node.node_id.clone(), node.node_type))
            .collect();

        // Register nodes in topological order, then edges.
        for (index, node_id) in order.iter().enumerate() {
            let Some(node) = self.graph.node(node_id) else {
                return Err(EngineError::Invariant(format!("node {node_id} vanished")));
            };
            let (plugin_name, plugin_version, determinism) = self.plugin_identity(node_id);
            self.recorder.register_node(
                run_id,
                node_id,
                &plugin_name,
                node.node_type,
                &plugin_version,
                determinism,
                &node.config,
                u32::try_from(index).unwrap_or(u32::MAX),
            )?;
        }
        let mut edge_map: EdgeMap = HashMap::new();
        for edge in self.graph.edges() {
            let record = self.recorder.register_edge(
                run_id,
                &edge.from,
                &edge.to,
                &edge.label,
                edge.mode,
            )?;
            edge_map.insert(
                (edge.from.clone(), edge.label.clone()),
                EdgeTarget {
                    edge_id: record.edge_id,
                    to_node: edge.to.clone(),
                },
            );
        }

        let token_manager = TokenManager::new(self.recorder.clone(), run_id.clone());
        let retry = RetryPolicy::new(self.settings.retry.clone());
        let transform_exec =
            TransformExecutor::new(self.recorder.clone(), run_id.clone(), retry);
        let gate_exec = GateExecutor::new(
            self.recorder.clone(),
            run_id.clone(),
            edge_map.clone(),
            node_types.clone(),
        );
        let sink_exec = SinkExecutor::new(self.recorder.clone(), run_id.clone());
        let mut coalesce_exec =
            CoalesceExecutor::new(self.recorder.clone(), token_manager.clone());
        let mut aggregation_execs: HashMap<NodeId, AggregationExecutor> = HashMap::new();
        for (node_id, plugin) in &self.plugins {
            match plugin {
                NodePlugin::Coalesce(settings) => {
                    coalesce_exec.register_coalesce(settings.clone(), node_id.clone())?;
                }
                NodePlugin::Aggregation {
                    settings, ..
                } => {
                    aggregation_execs.insert(
                        node_id.clone(),
                        AggregationExecutor::new(
                            self.recorder.clone(),
                            token_manager.clone(),
                            node_id.clone(),
                            settings.clone(),
                        )?,
                    );
                }
                _ => {}
            }
        }

        // Drain the source.
        let source_id = self.source_node_id()?;
        let source_ctx = self.plugin_context(run_id, &source_id);
        let source_output = {
            let Some(NodePlugin::Source(source)) = self.plugins.get_mut(&source_id) else {
                return Err(EngineError::Invariant(format!(
                    "source node {source_id} has no source plugin"
                )));
            };
            let executor = SourceExecutor::new(
                self.recorder.clone(),
                token_manager.clone(),
                source_id.clone(),
                self.validation_policy,
            );
            executor.execute(source.as_mut(), &source_ctx)?
        };
        let rows_emitted = u64::try_from(source_output.tokens.len()).unwrap_or(u64::MAX);

        // Seed the queue at the source's continue successor.
        let mut queue: VecDeque<WorkItem> = VecDeque::new();
        let first_hop = continue_target(&edge_map, &source_id)?;
        for token in source_output.tokens {
            queue.push_back(WorkItem {
                token,
                node_id: first_hop.clone(),
                route_label: None,
            });
        }

        // Token loop with end-of-run draining.
        let mut sequence: u64 = 0;
        let checkpoints = CheckpointManager::new(self.recorder.clone());
        loop {
            while let Some(item) = queue.pop_front() {
                self.process_item(
                    run_id,
                    item,
                    &mut queue,
                    &node_types,
                    &step_map,
                    &edge_map,
                    &token_manager,
                    &transform_exec,
                    &gate_exec,
                    &sink_exec,
                    &mut coalesce_exec,
                    &mut aggregation_execs,
                    &checkpoints,
                    &mut sequence,
                )?;
            }

            // Drain coalesce points and aggregation batches; either may
            // produce new work, so loop until the system is quiescent.
            let mut produced = false;
            let coalesce_nodes: Vec<NodeId> = self
                .plugins
                .iter()
                .filter(|(_, plugin)| matches!(plugin, NodePlugin::Coalesce(_)))
                .map(|(node_id, _)| node_id.clone())
                .collect();
            for node_id in coalesce_nodes {
                let step = *step_map.get(&node_id).unwrap_or(&0);
                let Some(NodePlugin::Coalesce(settings)) = self.plugins.get(&node_id) else {
                    continue;
                };
                let name = settings.name.clone();
                let outcomes = coalesce_exec.flush_pending_for(&name, step)?;
                for outcome in outcomes {
                    if let Some(merged) = outcome.merged_token {
                        queue.push_back(WorkItem {
                            token: merged,
                            node_id: continue_target(&edge_map, &node_id)?,
                            route_label: None,
                        });
                        produced = true;
                    } else if outcome.failure_reason.is_some() {
                        for token in outcome.consumed_tokens {
                            self.recorder.record_token_outcome(
                                run_id,
                                &token.token_id,
                                TokenOutcomeKind::Failed,
                                None,
                            )?;
                        }
                    }
                }
            }
            let aggregation_nodes: Vec<NodeId> = aggregation_execs.keys().cloned().collect();
            for node_id in aggregation_nodes {
                let step = *step_map.get(&node_id).unwrap_or(&0);
                let ctx = self.plugin_context(run_id, &node_id);
                let Some(NodePlugin::Aggregation {
                    plugin, ..
                }) = self.plugins.get_mut(&node_id)
                else {
                    continue;
                };
                let Some(executor) = aggregation_execs.get_mut(&node_id) else {
                    continue;
                };
                if let Some(outputs) = executor.flush(plugin.as_mut(), step, &ctx)? {
                    let target = continue_target(&edge_map, &node_id)?;
                    for token in outputs {
                        queue.push_back(WorkItem {
                            token,
                            node_id: target.clone(),
                            route_label: None,
                        });
                        produced = true;
                    }
                }
            }
            if !produced && queue.is_empty() {
                break;
            }
        }

        Ok(RunOutcome {
            run_id: run_id.clone(),
            status: RunStatus::Running,
            grade: None,
            rows_emitted,
            rows_rejected: source_output.rejected_rows,
            export: None,
            export_final_hash: None,
        })
    }

    /// Processes one queued token at one node.
    #[allow(
        clippy::too_many_arguments,
        reason = "The token loop threads every executor through one dispatch point."
    )]
    fn process_item(
        &mut self,
        run_id: &RunId,
        item: WorkItem,
        queue: &mut VecDeque<WorkItem>,
        node_types: &HashMap<NodeId, NodeType>,
        step_map: &HashMap<NodeId, u32>,
        edge_map: &EdgeMap,
        token_manager: &TokenManager,
        transform_exec: &TransformExecutor,
        gate_exec: &GateExecutor,
        sink_exec: &SinkExecutor,
        coalesce_exec: &mut CoalesceExecutor,
        aggregation_execs: &mut HashMap<NodeId, AggregationExecutor>,
        checkpoints: &CheckpointManager,
        sequence: &mut u64,
    ) -> Result<(), EngineError> {
        let WorkItem {
            token,
            node_id,
            route_label,
        } = item;
        let step = *step_map.get(&node_id).unwrap_or(&0);
        let node_type = node_types.get(&node_id).copied().ok_or_else(|| {
            EngineError::Invariant(format!("token {} arrived at unknown node {node_id}", token.token_id))
        })?;
        let ctx = self.plugin_context(run_id, &node_id);

        match node_type {
            NodeType::Source => Err(EngineError::Invariant(format!(
                "token {} arrived at source node {node_id}",
                token.token_id
            ))),
            NodeType::Transform => {
                let Some(NodePlugin::Transform(plugin)) = self.plugins.get(&node_id) else {
                    return Err(EngineError::Invariant(format!(
                        "transform node {node_id} has no transform plugin"
                    )));
                };
                let plugin = Arc::clone(plugin);
                match transform_exec.execute(plugin.as_ref(), &node_id, step, &token, &ctx)? {
                    TransformExecution::Completed(updated) => {
                        queue.push_back(WorkItem {
                            token: updated,
                            node_id: continue_target(edge_map, &node_id)?,
                            route_label,
                        });
                    }
                    TransformExecution::Failed {
                        reason: _,
                    } => {
                        self.recorder.record_token_outcome(
                            run_id,
                            &token.token_id,
                            TokenOutcomeKind::Failed,
                            None,
                        )?;
                    }
                }
                Ok(())
            }
            NodeType::Gate => {
                let outcome = {
                    let Some(NodePlugin::Gate(kind)) = self.plugins.get(&node_id) else {
                        return Err(EngineError::Invariant(format!(
                            "gate node {node_id} has no gate binding"
                        )));
                    };
                    match kind {
                        GateKind::Config(settings) => gate_exec.execute_config_gate(
                            settings,
                            &node_id,
                            step,
                            &token,
                            &ctx,
                            Some(token_manager),
                        )?,
                        GateKind::Plugin(plugin) => gate_exec.execute_plugin_gate(
                            plugin.as_ref(),
                            &node_id,
                            step,
                            &token,
                            &ctx,
                            Some(token_manager),
                        )?,
                    }
                };
                if !outcome.child_tokens.is_empty() {
                    for (child, target) in outcome.child_tokens {
                        queue.push_back(WorkItem {
                            token: child,
                            node_id: target,
                            route_label: None,
                        });
                    }
                    return Ok(());
                }
                if let Some(sink_node) = outcome.sink_node {
                    queue.push_back(WorkItem {
                        token: outcome.updated_token,
                        node_id: sink_node,
                        route_label: outcome.route_label,
                    });
                    return Ok(());
                }
                if let Some(next) = outcome.next_node_id {
                    queue.push_back(WorkItem {
                        token: outcome.updated_token,
                        node_id: next,
                        route_label: outcome.route_label,
                    });
                    return Ok(());
                }
                queue.push_back(WorkItem {
                    token: outcome.updated_token,
                    node_id: continue_target(edge_map, &node_id)?,
                    route_label: None,
                });
                Ok(())
            }
            NodeType::Coalesce => {
                let Some(NodePlugin::Coalesce(settings)) = self.plugins.get(&node_id) else {
                    return Err(EngineError::Invariant(format!(
                        "coalesce node {node_id} has no settings"
                    )));
                };
                let name = settings.name.clone();
                let outcome = coalesce_exec.accept(token, &name, step)?;
                if let Some(merged) = outcome.merged_token {
                    queue.push_back(WorkItem {
                        token: merged,
                        node_id: continue_target(edge_map, &node_id)?,
                        route_label: None,
                    });
                }
                Ok(())
            }
            NodeType::Aggregation => {
                let Some(NodePlugin::Aggregation {
                    plugin, ..
                }) = self.plugins.get_mut(&node_id)
                else {
                    return Err(EngineError::Invariant(format!(
                        "aggregation node {node_id} has no plugin"
                    )));
                };
                let Some(executor) = aggregation_execs.get_mut(&node_id) else {
                    return Err(EngineError::Invariant(format!(
                        "aggregation node {node_id} has no executor"
                    )));
                };
                if let Some(outputs) = executor.accept(plugin.as_mut(), token, step, &ctx)? {
                    let target = continue_target(edge_map, &node_id)?;
                    for output in outputs {
                        queue.push_back(WorkItem {
                            token: output,
                            node_id: target.clone(),
                            route_label: None,
                        });
                    }
                }
                Ok(())
            }
            NodeType::Sink => {
                let routed = route_label.is_some();
                let sink_name = node_id.to_string();
                let Some(NodePlugin::Sink(sink)) = self.plugins.get_mut(&node_id) else {
                    return Err(EngineError::Invariant(format!(
                        "sink node {node_id} has no sink plugin"
                    )));
                };
                sink_exec.execute(
                    sink.as_mut(),
                    &node_id,
                    &sink_name,
                    step,
                    std::slice::from_ref(&token),
                    &ctx,
                    routed,
                )?;
                *sequence += 1;
                self.maybe_checkpoint(checkpoints, run_id, &token, &node_id, *sequence)?;
                self.emit_event(
                    run_id,
                    "token_sunk",
                    json!({"sink": sink_name, "routed": routed}),
                );
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Support
    // ------------------------------------------------------------------

    /// Creates a checkpoint when the configured boundary is reached.
    fn maybe_checkpoint(
        &self,
        checkpoints: &CheckpointManager,
        run_id: &RunId,
        token: &TokenInfo,
        node_id: &NodeId,
        sequence: u64,
    ) -> Result<(), EngineError> {
        if !self.settings.checkpoint.enabled {
            return Ok(());
        }
        let due = match self.settings.checkpoint.frequency {
            CheckpointFrequency::EveryRow => true,
            CheckpointFrequency::EveryN(n) => sequence % n == 0,
        };
        if due {
            checkpoints.create_checkpoint(
                run_id,
                &token.token_id,
                node_id,
                sequence,
                &self.graph,
            )?;
        }
        Ok(())
    }

    /// Returns the single source node.
    fn source_node_id(&self) -> Result<NodeId, EngineError> {
        let mut sources = self
            .graph
            .nodes()
            .iter()
            .filter(|node| node.node_type == NodeType::Source)
            .map(|node| node.node_id.clone());
        let Some(first) = sources.next() else {
            return Err(EngineError::Invariant("graph has no source node".to_string()));
        };
        if sources.next().is_some() {
            return Err(EngineError::Invariant(
                "graph has more than one source node".to_string(),
            ));
        }
        Ok(first)
    }

    /// Returns the source's declared schema as a JSON value.
    fn source_schema(&self) -> Option<Value> {
        let source_id = self.source_node_id().ok()?;
        match self.plugins.get(&source_id) {
            Some(NodePlugin::Source(source)) => {
                serde_json::to_value(source.input_schema()).ok()
            }
            _ => None,
        }
    }

    /// Returns the run contract captured from the source schema.
    fn run_contract(&self) -> Option<SchemaContract> {
        let source_id = self.source_node_id().ok()?;
        match self.plugins.get(&source_id) {
            Some(NodePlugin::Source(source)) => Some(source.input_schema()),
            _ => None,
        }
    }

    /// Builds a plugin context for a node.
    fn plugin_context(&self, run_id: &RunId, node_id: &NodeId) -> PluginContext {
        let mut ctx = PluginContext::new(run_id.clone(), node_id.clone());
        ctx.contract = self.run_contract();
        ctx.concurrency = Some(self.settings.concurrency);
        ctx.rate_limits = Some(self.settings.rate_limit.clone());
        if let Some(bus) = &self.telemetry {
            let bus = Arc::clone(bus);
            let run = run_id.clone();
            ctx.telemetry = Some(Arc::new(move |name: &str, payload: Value| {
                bus.emit(TelemetryEvent::new(name, Some(run.clone()), payload));
            }));
        }
        ctx
    }

    /// Returns plugin identity metadata for node registration.
    fn plugin_identity(
        &self,
        node_id: &NodeId,
    ) -> (String, String, auditflow_core::DeterminismClass) {
        use auditflow_core::DeterminismClass;
        match self.plugins.get(node_id) {
            Some(NodePlugin::Source(plugin)) => (
                plugin.plugin_name().to_string(),
                plugin.plugin_version().to_string(),
                plugin.determinism(),
            ),
            Some(NodePlugin::Transform(plugin)) => (
                plugin.plugin_name().to_string(),
                plugin.plugin_version().to_string(),
                plugin.determinism(),
            ),
            Some(NodePlugin::Gate(GateKind::Plugin(plugin))) => (
                plugin.plugin_name().to_string(),
                plugin.plugin_version().to_string(),
                plugin.determinism(),
            ),
            Some(NodePlugin::Gate(GateKind::Config(settings))) => (
                format!("config_gate:{}", settings.name),
                "1.0.0".to_string(),
                DeterminismClass::Deterministic,
            ),
            Some(NodePlugin::Aggregation {
                plugin, ..
            }) => (
                plugin.plugin_name().to_string(),
                plugin.plugin_version().to_string(),
                plugin.determinism(),
            ),
            Some(NodePlugin::Sink(plugin)) => (
                plugin.plugin_name().to_string(),
                plugin.plugin_version().to_string(),
                plugin.determinism(),
            ),
            Some(NodePlugin::Coalesce(settings)) => (
                format!("coalesce:{}", settings.name),
                "1.0.0".to_string(),
                DeterminismClass::Deterministic,
            ),
            None => ("unbound".to_string(), "0.0.0".to_string(), DeterminismClass::Deterministic),
        }
    }

    /// Runs the configured export, recording its status on the run.
    fn run_export(&self, run_id: &RunId) -> (Option<Vec<Value>>, Option<String>) {
        let Some(landscape) = &self.settings.landscape else {
            return (None, None);
        };
        let Some(export) = &landscape.export else {
            return (None, None);
        };
        if !export.enabled {
            return (None, None);
        }
        let exporter = if export.sign {
            match &self.signing_key {
                Some(key) => LandscapeExporter::with_signing_key(self.recorder.clone(), key),
                None => {
                    let _ = self.recorder.set_export_status(
                        run_id,
                        auditflow_core::ExportStatus::Failed,
                        Some("signing requested but no signing key configured"),
                        None,
                    );
                    return (None, None);
                }
            }
        } else {
            LandscapeExporter::new(self.recorder.clone())
        };
        match exporter.export_run(run_id) {
            Ok(records) => {
                let final_hash = manifest_final_hash(&records).map(str::to_string);
                let _ = self.recorder.set_export_status(
                    run_id,
                    auditflow_core::ExportStatus::Completed,
                    None,
                    final_hash.as_deref(),
                );
                (Some(records), final_hash)
            }
            Err(err) => {
                let _ = self.recorder.set_export_status(
                    run_id,
                    auditflow_core::ExportStatus::Failed,
                    Some(&err.to_string()),
                    None,
                );
                (None, None)
            }
        }
    }

    /// Emits a telemetry event when a bus is attached.
    fn emit_event(&self, run_id: &RunId, name: &str, payload: Value) {
        if let Some(bus) = &self.telemetry {
            bus.emit(TelemetryEvent::new(name, Some(run_id.clone()), payload));
        }
    }

    /// Flushes the telemetry bus.
    fn flush_telemetry(&self) {
        if let Some(bus) = &self.telemetry {
            bus.flush();
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("nodes", &self.graph.nodes().len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the `continue` successor of a node.
fn continue_target(edge_map: &EdgeMap, node_id: &NodeId) -> Result<NodeId, EngineError> {
    edge_map
        .get(&(node_id.clone(), "continue".to_string()))
        .map(|target| target.to_node.clone())
        .ok_or_else(|| {
            EngineError::MissingEdge(MissingEdgeError {
                node_id: node_id.clone(),
                label: "continue".to_string(),
            })
        })
}
