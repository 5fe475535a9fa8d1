// auditflow-engine/src/tokens.rs
// ============================================================================
// Module: Token Manager
// Description: Token identity and fork/coalesce/expand lineage.
// Purpose: Create tokens and maintain the lineage DAG through the recorder.
// Dependencies: auditflow-core, auditflow-landscape
// ============================================================================

//! ## Overview
//! Tokens are the moving unit of work; they carry lineage, not data
//! identity. The manager mints tokens through the recorder so every
//! creation and parent edge lands in the audit trail: forks produce one
//! child per branch sharing a fork group, coalesces produce one child whose
//! parents are the consumed tokens in arrival order, and expands produce one
//! child per element of a source array.

// ============================================================================
// SECTION: Imports
// ============================================================================

use auditflow_core::GroupId;
use auditflow_core::RowId;
use auditflow_core::RunId;
use auditflow_core::RowRecord;
use auditflow_core::TokenId;
use auditflow_landscape::LandscapeRecorder;
use auditflow_landscape::TokenSpec;
use serde_json::Value;

use crate::errors::EngineError;

// ============================================================================
// SECTION: Token Info
// ============================================================================

/// Runtime view of a token: identity plus the row data it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenInfo {
    /// Token identifier.
    pub token_id: TokenId,
    /// Owning row.
    pub row_id: RowId,
    /// Current row data carried by the token.
    pub row_data: Value,
    /// Branch name when the token was created by a fork.
    pub branch_name: Option<String>,
}

impl TokenInfo {
    /// Returns a copy carrying updated row data.
    #[must_use]
    pub fn with_updated_data(&self, row_data: Value) -> Self {
        let mut updated = self.clone();
        updated.row_data = row_data;
        updated
    }
}

// ============================================================================
// SECTION: Token Manager
// ============================================================================

/// Creates tokens and maintains lineage for one run.
#[derive(Debug, Clone)]
pub struct TokenManager {
    /// Recorder backing token and parent writes.
    recorder: LandscapeRecorder,
    /// Owning run.
    run_id: RunId,
}

impl TokenManager {
    /// Creates a manager for the run.
    #[must_use]
    pub const fn new(recorder: LandscapeRecorder, run_id: RunId) -> Self {
        Self {
            recorder,
            run_id,
        }
    }

    /// Returns the owning run.
    #[must_use]
    pub const fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Creates the initial token for a freshly created row.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the write fails.
    pub fn create_initial(&self, row: &RowRecord, data: Value) -> Result<TokenInfo, EngineError> {
        let token = self.recorder.create_token(TokenSpec::for_row(row.row_id.clone()))?;
        Ok(TokenInfo {
            token_id: token.token_id,
            row_id: row.row_id.clone(),
            row_data: data,
            branch_name: None,
        })
    }

    /// Forks a token into one child per branch.
    ///
    /// Every child inherits the parent's row and data, records the shared
    /// fork group, and carries a single parent edge to the forked token.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Invariant`] for an empty branch list and
    /// [`EngineError`] when a write fails.
    pub fn fork_token(
        &self,
        parent: &TokenInfo,
        branches: &[String],
        step_index: u32,
    ) -> Result<(Vec<TokenInfo>, GroupId), EngineError> {
        if branches.is_empty() {
            return Err(EngineError::Invariant(format!(
                "fork of token {} has no branches",
                parent.token_id
            )));
        }
        let fork_group_id = GroupId::mint();
        let mut children = Vec::with_capacity(branches.len());
        for branch in branches {
            let child = self.recorder.create_token(TokenSpec {
                row_id: parent.row_id.clone(),
                branch_name: Some(branch.clone()),
                fork_group_id: Some(fork_group_id.clone()),
                join_group_id: None,
                expand_group_id: None,
                step_index: Some(step_index),
            })?;
            self.recorder.add_token_parent(&child.token_id, &parent.token_id, 0)?;
            children.push(TokenInfo {
                token_id: child.token_id,
                row_id: parent.row_id.clone(),
                row_data: parent.row_data.clone(),
                branch_name: Some(branch.clone()),
            });
        }
        Ok((children, fork_group_id))
    }

    /// Coalesces arrived tokens into one merged token.
    ///
    /// Parents attach in the provided (arrival) order with monotonically
    /// unique ordinals; the merged token records the shared join group.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Invariant`] for an empty parent list and
    /// [`EngineError`] when a write fails.
    pub fn coalesce_tokens(
        &self,
        parents: &[TokenInfo],
        merged_data: Value,
        step_index: u32,
    ) -> Result<TokenInfo, EngineError> {
        let Some(first) = parents.first() else {
            return Err(EngineError::Invariant("coalesce with no parents".to_string()));
        };
        let join_group_id = GroupId::mint();
        let merged = self.recorder.create_token(TokenSpec {
            row_id: first.row_id.clone(),
            branch_name: None,
            fork_group_id: None,
            join_group_id: Some(join_group_id),
            expand_group_id: None,
            step_index: Some(step_index),
        })?;
        for (ordinal, parent) in parents.iter().enumerate() {
            self.recorder.add_token_parent(
                &merged.token_id,
                &parent.token_id,
                u32::try_from(ordinal).unwrap_or(u32::MAX),
            )?;
        }
        Ok(TokenInfo {
            token_id: merged.token_id,
            row_id: first.row_id.clone(),
            row_data: merged_data,
            branch_name: None,
        })
    }

    /// Expands (deaggregates) a token into one child per element.
    ///
    /// Each child records the shared expand group and a single parent edge
    /// to the expanded token.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when a write fails.
    pub fn expand_token(
        &self,
        parent: &TokenInfo,
        children_data: Vec<Value>,
        step_index: u32,
    ) -> Result<Vec<TokenInfo>, EngineError> {
        let expand_group_id = GroupId::mint();
        let mut children = Vec::with_capacity(children_data.len());
        for data in children_data {
            let child = self.recorder.create_token(TokenSpec {
                row_id: parent.row_id.clone(),
                branch_name: parent.branch_name.clone(),
                fork_group_id: None,
                join_group_id: None,
                expand_group_id: Some(expand_group_id.clone()),
                step_index: Some(step_index),
            })?;
            self.recorder.add_token_parent(&child.token_id, &parent.token_id, 0)?;
            children.push(TokenInfo {
                token_id: child.token_id,
                row_id: parent.row_id.clone(),
                row_data: data,
                branch_name: parent.branch_name.clone(),
            });
        }
        Ok(children)
    }
}
