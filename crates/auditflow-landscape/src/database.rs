// auditflow-landscape/src/database.rs
// ============================================================================
// Module: Landscape Database
// Description: SQLite connection management for the audit store.
// Purpose: Open, secure, and validate the audit database; run transactions.
// Dependencies: auditflow-core, crate::{journal, schema}, rusqlite
// ============================================================================

//! ## Overview
//! The landscape database is SQLite behind a mutex-guarded connection. Every
//! connection applies the optional encryption pragma first, then
//! `foreign_keys = ON` and WAL journaling. On open the schema is created or
//! version-checked and the expected foreign keys are validated.
//!
//! Writes run as one transaction per recorder operation; rolled-back
//! transactions contribute nothing to the optional JSONL change journal.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use auditflow_core::IntegrityError;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use thiserror::Error;

use crate::journal::Journal;
use crate::journal::JournalLine;
use crate::schema::SCHEMA_DDL;
use crate::schema::SCHEMA_VERSION;
use crate::schema::validate_foreign_keys;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// In-memory URL forms accepted for tests and ephemeral runs.
const MEMORY_URLS: &[&str] = &["sqlite://:memory:", ":memory:", "sqlite:///:memory:"];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Landscape store errors.
#[derive(Debug, Error)]
pub enum LandscapeError {
    /// Store I/O error.
    #[error("landscape io error: {0}")]
    Io(String),
    /// SQLite engine error.
    #[error("landscape db error: {0}")]
    Db(String),
    /// Tier-1 integrity violation.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    /// Invalid arguments or stored data.
    #[error("landscape invalid data: {0}")]
    Invalid(String),
    /// Uniqueness conflict on write.
    #[error("landscape conflict: {0}")]
    Conflict(String),
    /// The referenced entity does not exist.
    #[error("landscape not found: {0}")]
    NotFound(String),
}

/// Maps a `SQLite` error into a landscape error.
///
/// Foreign key violations surface as integrity errors; other constraint
/// violations surface as conflicts.
pub(crate) fn map_sqlite_error(err: &rusqlite::Error) -> LandscapeError {
    if let rusqlite::Error::SqliteFailure(failure, message) = err {
        if failure.code == ErrorCode::ConstraintViolation {
            let text = message.clone().unwrap_or_else(|| failure.to_string());
            if text.contains("FOREIGN KEY") {
                return LandscapeError::Integrity(IntegrityError::ForeignKey(text));
            }
            return LandscapeError::Conflict(text);
        }
    }
    LandscapeError::Db(err.to_string())
}

// ============================================================================
// SECTION: Url Parsing
// ============================================================================

/// Parsed landscape URL target.
#[derive(Debug, Clone, PartialEq, Eq)]
enum UrlTarget {
    /// In-memory database.
    Memory,
    /// File-backed database.
    File(PathBuf),
}

/// Parses a landscape URL into a target.
///
/// Accepted forms: `sqlite:///absolute/path`, `sqlite://relative/path`,
/// `sqlite://:memory:`, and a bare `:memory:`.
fn parse_url(url: &str) -> Result<UrlTarget, LandscapeError> {
    if MEMORY_URLS.contains(&url) {
        return Ok(UrlTarget::Memory);
    }
    if let Some(rest) = url.strip_prefix("sqlite://") {
        if rest.is_empty() {
            return Err(LandscapeError::Invalid(format!("landscape url has no path: {url}")));
        }
        return Ok(UrlTarget::File(PathBuf::from(rest)));
    }
    Err(LandscapeError::Invalid(format!(
        "unsupported landscape url (only sqlite URLs are accepted): {url}"
    )))
}

// ============================================================================
// SECTION: Landscape Db
// ============================================================================

/// `SQLite`-backed audit database handle.
#[derive(Clone)]
pub struct LandscapeDb {
    /// Display form of the database location for error messages.
    location: String,
    /// Shared connection guarded by a mutex; writes are serialized here.
    connection: Arc<Mutex<Connection>>,
    /// Optional JSONL change journal.
    journal: Option<Arc<Journal>>,
}

impl LandscapeDb {
    /// Opens an in-memory audit database.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when initialization fails.
    pub fn in_memory() -> Result<Self, LandscapeError> {
        Self::open("sqlite://:memory:", None)
    }

    /// Opens an audit database from a landscape URL.
    ///
    /// A passphrase enables encryption-at-rest via a keyed pragma executed
    /// first on the new connection. Passphrases require a file-backed SQLite
    /// URL; memory URLs and non-SQLite backends are configuration errors.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] for unsupported URLs, passphrase misuse,
    /// open failures, or schema validation failures.
    pub fn open(url: &str, passphrase: Option<&str>) -> Result<Self, LandscapeError> {
        let target = parse_url(url)?;
        if passphrase.is_some() && target == UrlTarget::Memory {
            return Err(LandscapeError::Invalid(
                "encryption passphrase requires a file-backed sqlite url".to_string(),
            ));
        }
        let mut connection = match &target {
            UrlTarget::Memory => Connection::open_in_memory()
                .map_err(|err| LandscapeError::Db(err.to_string()))?,
            UrlTarget::File(path) => {
                ensure_parent_dir(path)?;
                let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
                Connection::open_with_flags(path, flags)
                    .map_err(|err| LandscapeError::Db(err.to_string()))?
            }
        };
        apply_pragmas(&connection, passphrase)?;
        let location = url.to_string();
        initialize_schema(&mut connection, &location)?;
        validate_foreign_keys(&connection, &location)?;
        Ok(Self {
            location,
            connection: Arc::new(Mutex::new(connection)),
            journal: None,
        })
    }

    /// Attaches a JSONL change journal mirroring committed statements.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError::Io`] when the journal file cannot be opened.
    pub fn with_journal(mut self, path: &Path) -> Result<Self, LandscapeError> {
        let journal = Journal::open(path).map_err(|err| LandscapeError::Io(err.to_string()))?;
        self.journal = Some(Arc::new(journal));
        Ok(self)
    }

    /// Returns the display location of the database.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Runs a read-only operation on the connection.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when the callback fails or the connection
    /// mutex is poisoned.
    pub fn read<T>(
        &self,
        operation: impl FnOnce(&Connection) -> Result<T, LandscapeError>,
    ) -> Result<T, LandscapeError> {
        let guard = self
            .connection
            .lock()
            .map_err(|_| LandscapeError::Db("connection mutex poisoned".to_string()))?;
        operation(&guard)
    }

    /// Runs a write operation inside one transaction.
    ///
    /// Statements recorded into the journal buffer are appended to the JSONL
    /// journal only after a successful commit; rollbacks produce no lines.
    ///
    /// # Errors
    ///
    /// Returns [`LandscapeError`] when the operation or commit fails.
    pub fn write<T>(
        &self,
        operation: impl FnOnce(&Transaction<'_>, &mut Vec<JournalLine>) -> Result<T, LandscapeError>,
    ) -> Result<T, LandscapeError> {
        let mut guard = self
            .connection
            .lock()
            .map_err(|_| LandscapeError::Db("connection mutex poisoned".to_string()))?;
        let tx = guard.transaction().map_err(|err| map_sqlite_error(&err))?;
        let mut lines = Vec::new();
        let result = operation(&tx, &mut lines)?;
        tx.commit().map_err(|err| map_sqlite_error(&err))?;
        drop(guard);
        if let Some(journal) = &self.journal {
            journal.append_lines(&lines).map_err(|err| LandscapeError::Io(err.to_string()))?;
        }
        Ok(result)
    }
}

impl std::fmt::Debug for LandscapeDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LandscapeDb").field("location", &self.location).finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Ensures the parent directory for a file-backed store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), LandscapeError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|err| LandscapeError::Io(err.to_string()))?;
        }
    }
    Ok(())
}

/// Escapes a passphrase for embedding in a quoted pragma.
fn escape_pragma_value(passphrase: &str) -> String {
    passphrase.replace('\'', "''")
}

/// Applies connection pragmas; the keyed pragma always runs first.
fn apply_pragmas(
    connection: &Connection,
    passphrase: Option<&str>,
) -> Result<(), LandscapeError> {
    if let Some(passphrase) = passphrase {
        connection
            .execute_batch(&format!("PRAGMA key = '{}';", escape_pragma_value(passphrase)))
            .map_err(|err| LandscapeError::Db(err.to_string()))?;
    }
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| LandscapeError::Db(err.to_string()))?;
    connection
        .execute_batch("PRAGMA journal_mode = wal;")
        .map_err(|err| LandscapeError::Db(err.to_string()))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
        .map_err(|err| LandscapeError::Db(err.to_string()))?;
    Ok(())
}

/// Initializes the schema or validates an existing version.
fn initialize_schema(connection: &mut Connection, location: &str) -> Result<(), LandscapeError> {
    let tx = connection.transaction().map_err(|err| map_sqlite_error(&err))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| map_sqlite_error(&err))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| map_sqlite_error(&err))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| map_sqlite_error(&err))?;
            tx.execute_batch(SCHEMA_DDL).map_err(|err| map_sqlite_error(&err))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(LandscapeError::Integrity(IntegrityError::SchemaIncompatible {
                path: location.to_string(),
                detail: format!(
                    "unsupported schema version {value} (this build expects {SCHEMA_VERSION})"
                ),
                remediation: "export the audit trail with the matching build, then \
                              recreate the database"
                    .to_string(),
            }));
        }
    }
    tx.commit().map_err(|err| map_sqlite_error(&err))?;
    Ok(())
}
