// auditflow-engine/tests/common/mod.rs
// ============================================================================
// Module: Engine Test Plugins
// Description: Minimal plugin implementations for end-to-end tests.
// ============================================================================
//! ## Overview
//! Static sources, passthrough transforms, and memory sinks used by the
//! pipeline tests. The mutating sink models a database filling columns
//! server-side after the content hash was computed.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    dead_code,
    reason = "Test-only helpers; each test binary uses a subset."
)]

use std::sync::Arc;
use std::sync::Mutex;

use auditflow_core::ArtifactDescriptor;
use auditflow_core::DeterminismClass;
use auditflow_core::PluginContext;
use auditflow_core::PluginError;
use auditflow_core::PluginMetadata;
use auditflow_core::SchemaContract;
use auditflow_core::SecurityLevel;
use auditflow_core::SinkPlugin;
use auditflow_core::SourcePlugin;
use auditflow_core::SourceRow;
use auditflow_core::TransformPlugin;
use auditflow_core::TransformResult;
use auditflow_core::canonical_json_bytes;
use auditflow_core::stable_hash;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Static Source
// ============================================================================

/// Source emitting a fixed list of rows.
pub struct StaticSource {
    /// Rows to emit.
    pub rows: Vec<Value>,
    /// Declared input schema.
    pub schema: SchemaContract,
}

impl StaticSource {
    /// Creates a source over the rows with an observed schema.
    pub fn new(rows: Vec<Value>) -> Self {
        Self {
            rows,
            schema: SchemaContract::observed(),
        }
    }

    /// Creates a source with a declared schema.
    pub fn with_schema(rows: Vec<Value>, schema: SchemaContract) -> Self {
        Self {
            rows,
            schema,
        }
    }
}

impl PluginMetadata for StaticSource {
    fn plugin_name(&self) -> &str {
        "static_source"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn determinism(&self) -> DeterminismClass {
        DeterminismClass::Deterministic
    }
}

impl SourcePlugin for StaticSource {
    fn read(
        &mut self,
        _ctx: &PluginContext,
    ) -> Result<Box<dyn Iterator<Item = Result<SourceRow, PluginError>> + '_>, PluginError> {
        let rows = self.rows.clone();
        Ok(Box::new(rows.into_iter().map(|data| {
            let source_data_hash = stable_hash(&data)
                .map_err(|err| PluginError::Failed(err.to_string()))?;
            Ok(SourceRow {
                data,
                source_data_hash,
            })
        })))
    }

    fn input_schema(&self) -> SchemaContract {
        self.schema.clone()
    }
}

// ============================================================================
// SECTION: Passthrough Transform
// ============================================================================

/// Transform passing rows through, optionally tagging them.
pub struct PassthroughTransform {
    /// Field name to stamp with `true`, when set.
    pub tag: Option<String>,
}

impl PluginMetadata for PassthroughTransform {
    fn plugin_name(&self) -> &str {
        "passthrough"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn determinism(&self) -> DeterminismClass {
        DeterminismClass::Deterministic
    }
}

impl TransformPlugin for PassthroughTransform {
    fn process(&self, row: &Value, _ctx: &PluginContext) -> TransformResult {
        let mut output = row.clone();
        if let (Some(tag), Some(object)) = (&self.tag, output.as_object_mut()) {
            object.insert(tag.clone(), Value::Bool(true));
        }
        TransformResult::success(output, Some(json!({"action": "passthrough"})))
    }

    fn input_contract(&self) -> SchemaContract {
        SchemaContract::observed()
    }

    fn output_contract(&self) -> SchemaContract {
        SchemaContract::observed()
    }
}

// ============================================================================
// SECTION: Memory Sink
// ============================================================================

/// Shared store of rows written by a memory sink.
pub type WrittenRows = Arc<Mutex<Vec<Value>>>;

/// Sink collecting rows in memory.
pub struct MemorySink {
    /// Rows written so far.
    pub written: WrittenRows,
    /// Whether write() should fail.
    pub fail: bool,
}

impl MemorySink {
    /// Creates a sink and returns it with its shared row store.
    pub fn new() -> (Self, WrittenRows) {
        let written: WrittenRows = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                written: Arc::clone(&written),
                fail: false,
            },
            written,
        )
    }
}

impl PluginMetadata for MemorySink {
    fn plugin_name(&self) -> &str {
        "memory_sink"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn determinism(&self) -> DeterminismClass {
        DeterminismClass::Deterministic
    }
}

impl SinkPlugin for MemorySink {
    fn write(
        &mut self,
        rows: &[Value],
        _ctx: &PluginContext,
    ) -> Result<ArtifactDescriptor, PluginError> {
        if self.fail {
            return Err(PluginError::TargetUnavailable("sink is down".to_string()));
        }
        // Hash the payload as given, before storing anything.
        let content_hash =
            stable_hash(&rows.to_vec()).map_err(|err| PluginError::Failed(err.to_string()))?;
        let size_bytes = canonical_json_bytes(&rows.to_vec())
            .map(|bytes| u64::try_from(bytes.len()).unwrap_or(u64::MAX))
            .map_err(|err| PluginError::Failed(err.to_string()))?;
        self.written
            .lock()
            .map_err(|_| PluginError::Failed("sink mutex poisoned".to_string()))?
            .extend(rows.iter().cloned());
        Ok(ArtifactDescriptor {
            artifact_type: "memory".to_string(),
            content_hash,
            size_bytes,
            schema_id: None,
            metadata: None,
            alias: None,
            security_level: SecurityLevel::Internal,
        })
    }
}

// ============================================================================
// SECTION: Mutating Sink
// ============================================================================

/// Sink modeling a database that fills columns server-side.
///
/// The content hash is computed over the rows as given, before the
/// server-side `created_at` is added to the stored form.
pub struct MutatingSink {
    /// Rows as stored (with server-side additions).
    pub stored: WrittenRows,
}

impl MutatingSink {
    /// Creates a sink and returns it with its shared stored-row view.
    pub fn new() -> (Self, WrittenRows) {
        let stored: WrittenRows = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                stored: Arc::clone(&stored),
            },
            stored,
        )
    }
}

impl PluginMetadata for MutatingSink {
    fn plugin_name(&self) -> &str {
        "database_sink"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn determinism(&self) -> DeterminismClass {
        DeterminismClass::Deterministic
    }
}

impl SinkPlugin for MutatingSink {
    fn write(
        &mut self,
        rows: &[Value],
        _ctx: &PluginContext,
    ) -> Result<ArtifactDescriptor, PluginError> {
        // Hash BEFORE the storage layer transforms the data.
        let content_hash =
            stable_hash(&rows.to_vec()).map_err(|err| PluginError::Failed(err.to_string()))?;
        let size_bytes = canonical_json_bytes(&rows.to_vec())
            .map(|bytes| u64::try_from(bytes.len()).unwrap_or(u64::MAX))
            .map_err(|err| PluginError::Failed(err.to_string()))?;
        let mut stored = self
            .stored
            .lock()
            .map_err(|_| PluginError::Failed("sink mutex poisoned".to_string()))?;
        for row in rows {
            let mut transformed = row.clone();
            if let Some(object) = transformed.as_object_mut() {
                // Server-side column fill: never part of the content hash.
                object.insert("created_at".to_string(), json!("2026-08-01T00:00:00Z"));
            }
            stored.push(transformed);
        }
        Ok(ArtifactDescriptor {
            artifact_type: "table".to_string(),
            content_hash,
            size_bytes,
            schema_id: Some("orders_v1".to_string()),
            metadata: Some(json!({"table": "orders"})),
            alias: None,
            security_level: SecurityLevel::Internal,
        })
    }
}
