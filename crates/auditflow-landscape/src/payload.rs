// auditflow-landscape/src/payload.rs
// ============================================================================
// Module: Landscape Payload Store
// Description: Content-addressed filesystem blob store with retention.
// Purpose: Hold oversize row payloads outside the relational store.
// Dependencies: auditflow-core, sha2
// ============================================================================

//! ## Overview
//! Payloads are stored under their SHA-256 digest, sharded two levels deep.
//! Retrieval re-hashes the stored bytes and fails closed on mismatch: a
//! corrupt or truncated payload is a Tier-1 integrity error, while a payload
//! purged by retention is an expected missing condition that leaves the row
//! queryable (the hash survives, the data is gone).
//!
//! The store is the only owner of its directory tree.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::SystemTime;

use auditflow_core::DEFAULT_HASH_ALGORITHM;
use auditflow_core::IntegrityError;
use auditflow_core::hash_bytes;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Length of a payload reference (SHA-256 hex).
const REF_LENGTH: usize = 64;

/// Seconds per day for retention arithmetic.
const SECONDS_PER_DAY: u64 = 86_400;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Payload store errors.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The payload does not exist (purged or never stored); expected.
    #[error("payload not found: {0}")]
    NotFound(String),
    /// Tier-1 integrity violation: stored bytes do not match their ref.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    /// Filesystem failure.
    #[error("payload store io error: {0}")]
    Io(String),
    /// The reference is not a valid payload ref.
    #[error("invalid payload ref: {0}")]
    InvalidRef(String),
}

// ============================================================================
// SECTION: Filesystem Store
// ============================================================================

/// Content-addressed filesystem payload store.
#[derive(Debug, Clone)]
pub struct FilesystemPayloadStore {
    /// Base directory owned exclusively by the store.
    base_path: PathBuf,
}

impl FilesystemPayloadStore {
    /// Creates a store rooted at the given directory.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Io`] when the directory cannot be created.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, PayloadError> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path).map_err(|err| PayloadError::Io(err.to_string()))?;
        Ok(Self {
            base_path,
        })
    }

    /// Stores a payload and returns its content-addressed reference.
    ///
    /// Storing identical bytes twice is idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Io`] when the write fails.
    pub fn store(&self, payload: &[u8]) -> Result<String, PayloadError> {
        let reference = hash_bytes(DEFAULT_HASH_ALGORITHM, payload).value;
        let path = self.ref_path(&reference)?;
        if path.exists() {
            return Ok(reference);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| PayloadError::Io(err.to_string()))?;
        }
        // Write-then-rename keeps a crashed write from leaving a truncated
        // blob under its final name.
        let staging = path.with_extension("tmp");
        std::fs::write(&staging, payload).map_err(|err| PayloadError::Io(err.to_string()))?;
        std::fs::rename(&staging, &path).map_err(|err| PayloadError::Io(err.to_string()))?;
        Ok(reference)
    }

    /// Retrieves a payload by reference, verifying its digest.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::NotFound`] for purged or never-stored refs and
    /// [`PayloadError::Integrity`] when stored bytes fail their digest check.
    pub fn retrieve(&self, reference: &str) -> Result<Vec<u8>, PayloadError> {
        let path = self.ref_path(reference)?;
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(PayloadError::NotFound(reference.to_string()));
            }
            Err(err) => return Err(PayloadError::Io(err.to_string())),
        };
        let actual = hash_bytes(DEFAULT_HASH_ALGORITHM, &bytes).value;
        if actual != reference {
            return Err(PayloadError::Integrity(IntegrityError::CorruptPayload(format!(
                "payload {reference} hashes to {actual}"
            ))));
        }
        Ok(bytes)
    }

    /// Removes payloads older than the retention window.
    ///
    /// Returns the number of payloads purged.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Io`] when the directory walk fails.
    pub fn purge_older_than(&self, retention_days: u32) -> Result<u64, PayloadError> {
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(u64::from(retention_days) * SECONDS_PER_DAY));
        let Some(cutoff) = cutoff else {
            return Ok(0);
        };
        let mut purged = 0u64;
        purge_dir(&self.base_path, cutoff, &mut purged)
            .map_err(|err| PayloadError::Io(err.to_string()))?;
        Ok(purged)
    }

    /// Resolves a reference to its sharded path.
    fn ref_path(&self, reference: &str) -> Result<PathBuf, PayloadError> {
        if reference.len() != REF_LENGTH
            || !reference.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        {
            return Err(PayloadError::InvalidRef(reference.to_string()));
        }
        let (first, rest) = reference.split_at(2);
        let (second, _) = rest.split_at(2);
        Ok(self.base_path.join(first).join(second).join(reference))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Recursively removes payload files whose mtime precedes the cutoff.
fn purge_dir(dir: &Path, cutoff: SystemTime, purged: &mut u64) -> io::Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            purge_dir(&path, cutoff, purged)?;
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if modified < cutoff {
            std::fs::remove_file(&path)?;
            *purged += 1;
        }
    }
    Ok(())
}
