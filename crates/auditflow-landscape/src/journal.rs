// auditflow-landscape/src/journal.rs
// ============================================================================
// Module: Landscape Change Journal
// Description: Append-only JSONL mirror of committed statements.
// Purpose: Provide an external replay log of every committed audit write.
// Dependencies: auditflow-core, serde, serde_json
// ============================================================================

//! ## Overview
//! The change journal mirrors every committed statement with its bound
//! parameters as one JSONL line `{timestamp, statement, parameters}`.
//! Recorder operations buffer lines during their transaction and hand them
//! to the journal only after commit, so rolled-back transactions produce no
//! lines. Appends are serialized under a mutex.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use auditflow_core::Timestamp;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Journal Line
// ============================================================================

/// One committed statement with its bound parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalLine {
    /// Commit-side timestamp.
    pub timestamp: Timestamp,
    /// SQL statement text.
    pub statement: String,
    /// Bound parameters as a JSON array.
    pub parameters: Value,
}

impl JournalLine {
    /// Creates a journal line stamped with the current time.
    #[must_use]
    pub fn new(statement: impl Into<String>, parameters: Value) -> Self {
        Self {
            timestamp: Timestamp::now(),
            statement: statement.into(),
            parameters,
        }
    }
}

// ============================================================================
// SECTION: Journal
// ============================================================================

/// Append-only JSONL change journal.
pub struct Journal {
    /// Open file handle guarded by a mutex.
    file: Mutex<File>,
}

impl Journal {
    /// Opens (creating if needed) a journal file for appending.
    ///
    /// # Errors
    ///
    /// Returns [`io::Error`] when the file cannot be opened.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Appends committed lines in order.
    ///
    /// # Errors
    ///
    /// Returns [`io::Error`] when serialization or the write fails.
    pub fn append_lines(&self, lines: &[JournalLine]) -> io::Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let mut buffer = Vec::new();
        for line in lines {
            serde_json::to_writer(&mut buffer, line)?;
            buffer.push(b'\n');
        }
        let mut guard = self
            .file
            .lock()
            .map_err(|_| io::Error::other("journal mutex poisoned"))?;
        guard.write_all(&buffer)?;
        guard.flush()
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal").finish_non_exhaustive()
    }
}
