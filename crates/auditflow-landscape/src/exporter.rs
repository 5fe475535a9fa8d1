// auditflow-landscape/src/exporter.rs
// ============================================================================
// Module: Landscape Exporter
// Description: Deterministic streamable export with HMAC chaining.
// Purpose: Produce a signed, replayable record of an entire run.
// Dependencies: auditflow-core, crate::{database, recorder}, hmac, sha2
// ============================================================================

//! ## Overview
//! Records stream in a fixed total order: run, nodes in registration order,
//! edges, then rows by `row_index`, per row its tokens, node states, routing
//! events, calls, parents, validation/transform errors, and terminal
//! outcomes; the last record is a manifest carrying `final_hash`.
//!
//! In signing mode each record carries a 64-hex HMAC-SHA-256 signature over
//! `canonical(record) || prev_chain_hash`; the chain value after the manifest
//! is the export's `final_hash`. Identical data and key produce an identical
//! `final_hash`; different keys on identical data produce different ones.
//! The determinism burden sits entirely on the recorder's ordering contract
//! and canonical hashing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use auditflow_core::HashError;
use auditflow_core::NodeStateRecord;
use auditflow_core::RunId;
use auditflow_core::canonical_json_bytes;
use auditflow_core::hash_bytes;
use hmac::Hmac;
use hmac::Mac;
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

use crate::database::LandscapeError;
use crate::recorder::LandscapeRecorder;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Initial chain value before the first record.
const CHAIN_SEED: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// HMAC-SHA-256 alias used for signatures.
type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Export errors.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The run does not exist.
    #[error("run not found: {0}")]
    RunNotFound(String),
    /// Reading audit data failed.
    #[error(transparent)]
    Landscape(#[from] LandscapeError),
    /// Canonicalizing a record failed.
    #[error("export canonicalization failed: {0}")]
    Canonicalization(String),
    /// Signing failed.
    #[error("export signing failed: {0}")]
    Signing(String),
}

impl From<HashError> for ExportError {
    fn from(err: HashError) -> Self {
        Self::Canonicalization(err.to_string())
    }
}

// ============================================================================
// SECTION: Exporter
// ============================================================================

/// Deterministic run exporter.
pub struct LandscapeExporter {
    /// Recorder providing the ordered queries.
    recorder: LandscapeRecorder,
    /// Signing key; `None` exports unsigned records.
    signing_key: Option<Vec<u8>>,
}

impl LandscapeExporter {
    /// Creates an unsigned exporter.
    #[must_use]
    pub const fn new(recorder: LandscapeRecorder) -> Self {
        Self {
            recorder,
            signing_key: None,
        }
    }

    /// Creates a signing exporter with the given key.
    #[must_use]
    pub fn with_signing_key(recorder: LandscapeRecorder, key: &[u8]) -> Self {
        Self {
            recorder,
            signing_key: Some(key.to_vec()),
        }
    }

    /// Exports the run as an ordered record stream ending with a manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError`] when the run is unknown or a read,
    /// canonicalization, or signing step fails.
    pub fn export_run(&self, run_id: &RunId) -> Result<Vec<Value>, ExportError> {
        let run = self
            .recorder
            .get_run(run_id)?
            .ok_or_else(|| ExportError::RunNotFound(run_id.to_string()))?;

        // Batched reads; grouped in memory to keep the stream free of N+1
        // scans while preserving the per-parent ordering contract.
        let nodes = self.recorder.get_nodes(run_id)?;
        let edges = self.recorder.get_edges(run_id)?;
        let rows = self.recorder.get_rows(run_id)?;
        let tokens_by_row = group_by(self.recorder.get_all_tokens_for_run(run_id)?, |token| {
            token.row_id.clone()
        });
        let states_by_token =
            group_by(self.recorder.get_all_node_states_for_run(run_id)?, |state| {
                state.token_id.clone()
            });
        let events_by_state =
            group_by(self.recorder.get_all_routing_events_for_run(run_id)?, |event| {
                event.state_id.clone()
            });
        let calls_by_state = group_by(self.recorder.get_all_calls_for_run(run_id)?, |call| {
            call.state_id.clone()
        });
        let parents_by_token =
            group_by(self.recorder.get_all_token_parents_for_run(run_id)?, |parent| {
                parent.token_id.clone()
            });
        let validation_by_row = group_by(self.recorder.get_validation_errors(run_id)?, |err| {
            err.row_id.clone()
        });
        let transform_by_state = group_by(self.recorder.get_transform_errors(run_id)?, |err| {
            err.state_id.clone()
        });
        let outcomes_by_token = group_by(self.recorder.get_token_outcomes(run_id)?, |outcome| {
            outcome.token_id.clone()
        });

        let mut chain = Chain::new(self.signing_key.as_deref());
        let mut records = Vec::new();
        push_record(&mut records, &mut chain, "run", &run)?;
        for node in &nodes {
            push_record(&mut records, &mut chain, "node", node)?;
        }
        for edge in &edges {
            push_record(&mut records, &mut chain, "edge", edge)?;
        }
        for row in &rows {
            push_record(&mut records, &mut chain, "row", row)?;
            let tokens = tokens_by_row.get(&row.row_id).map_or(&[][..], Vec::as_slice);
            for token in tokens {
                push_record(&mut records, &mut chain, "token", token)?;
                let states: &[NodeStateRecord] =
                    states_by_token.get(&token.token_id).map_or(&[][..], Vec::as_slice);
                for state in states {
                    push_record(&mut records, &mut chain, "node_state", state)?;
                    for event in
                        events_by_state.get(&state.state_id).map_or(&[][..], Vec::as_slice)
                    {
                        push_record(&mut records, &mut chain, "routing_event", event)?;
                    }
                    for call in
                        calls_by_state.get(&state.state_id).map_or(&[][..], Vec::as_slice)
                    {
                        push_record(&mut records, &mut chain, "call", call)?;
                    }
                    for error in
                        transform_by_state.get(&state.state_id).map_or(&[][..], Vec::as_slice)
                    {
                        push_record(&mut records, &mut chain, "transform_error", error)?;
                    }
                }
                for parent in
                    parents_by_token.get(&token.token_id).map_or(&[][..], Vec::as_slice)
                {
                    push_record(&mut records, &mut chain, "token_parent", parent)?;
                }
                for outcome in
                    outcomes_by_token.get(&token.token_id).map_or(&[][..], Vec::as_slice)
                {
                    push_record(&mut records, &mut chain, "token_outcome", outcome)?;
                }
            }
            for error in validation_by_row.get(&row.row_id).map_or(&[][..], Vec::as_slice) {
                push_record(&mut records, &mut chain, "validation_error", error)?;
            }
        }

        let manifest = Manifest {
            final_hash: chain.current().to_string(),
            record_count: records.len(),
        };
        push_record(&mut records, &mut chain, "manifest", &manifest)?;
        Ok(records)
    }
}

impl std::fmt::Debug for LandscapeExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LandscapeExporter")
            .field("signed", &self.signing_key.is_some())
            .finish_non_exhaustive()
    }
}

/// Returns the manifest `final_hash` of an exported stream.
#[must_use]
pub fn manifest_final_hash(records: &[Value]) -> Option<&str> {
    let manifest = records.last()?;
    if manifest.get("record_type")?.as_str()? != "manifest" {
        return None;
    }
    manifest.get("final_hash")?.as_str()
}

// ============================================================================
// SECTION: Manifest
// ============================================================================

/// Terminal export record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct Manifest {
    /// Chain value over every preceding record.
    final_hash: String,
    /// Number of preceding records.
    record_count: usize,
}

// ============================================================================
// SECTION: Chain
// ============================================================================

/// Signature / hash chain state.
struct Chain<'key> {
    /// Signing key when signing is enabled.
    key: Option<&'key [u8]>,
    /// Current chain value (64-hex).
    current: String,
}

impl<'key> Chain<'key> {
    /// Creates a chain starting from the fixed seed.
    fn new(key: Option<&'key [u8]>) -> Self {
        Self {
            key,
            current: CHAIN_SEED.to_string(),
        }
    }

    /// Returns the current chain value.
    fn current(&self) -> &str {
        &self.current
    }

    /// Absorbs a record body, returning its signature when signing.
    fn absorb(&mut self, body: &[u8]) -> Result<Option<String>, ExportError> {
        let mut message = Vec::with_capacity(body.len() + self.current.len());
        message.extend_from_slice(body);
        message.extend_from_slice(self.current.as_bytes());
        match self.key {
            Some(key) => {
                let mut mac = HmacSha256::new_from_slice(key)
                    .map_err(|err| ExportError::Signing(err.to_string()))?;
                mac.update(&message);
                let signature = hex_lower(&mac.finalize().into_bytes());
                self.current = signature.clone();
                Ok(Some(signature))
            }
            None => {
                self.current =
                    hash_bytes(auditflow_core::DEFAULT_HASH_ALGORITHM, &message).value;
                Ok(None)
            }
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Serializes, chains, and appends one export record.
fn push_record<T: Serialize>(
    records: &mut Vec<Value>,
    chain: &mut Chain<'_>,
    record_type: &str,
    payload: &T,
) -> Result<(), ExportError> {
    let mut record = serde_json::to_value(payload)
        .map_err(|err| ExportError::Canonicalization(err.to_string()))?;
    let Some(object) = record.as_object_mut() else {
        return Err(ExportError::Canonicalization(format!(
            "export record '{record_type}' is not an object"
        )));
    };
    object.insert("record_type".to_string(), Value::String(record_type.to_string()));
    let body = canonical_json_bytes(&record)?;
    if let Some(signature) = chain.absorb(&body)? {
        if let Some(object) = record.as_object_mut() {
            object.insert("signature".to_string(), Value::String(signature));
        }
    }
    records.push(record);
    Ok(())
}

/// Groups records by key, preserving the incoming (already ordered)
/// sequence within each group.
fn group_by<K: Ord, T>(items: Vec<T>, key: impl Fn(&T) -> K) -> BTreeMap<K, Vec<T>> {
    let mut grouped: BTreeMap<K, Vec<T>> = BTreeMap::new();
    for item in items {
        grouped.entry(key(&item)).or_default().push(item);
    }
    grouped
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as lowercase hex.
fn hex_lower(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}
