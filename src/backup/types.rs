// Backup System Types - records, retention policy and cleanup results

use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// A stored backup identified purely by its filename.
///
/// Records are materialized from a store listing and never persisted on
/// their own; the timestamp is always the one embedded in `filename`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    /// Object key as listed by the store
    pub filename: String,
    /// Capture time decoded from the filename
    pub timestamp: DateTime<Utc>,
}

impl BackupRecord {
    /// Decode a record from a listed key.
    pub fn parse(filename: &str) -> Result<Self, FormatError> {
        let timestamp = super::filename::parse_backup_filename(filename)?;
        Ok(Self {
            filename: filename.to_string(),
            timestamp,
        })
    }

    /// Newest-first ordering used by retention.
    pub fn newest_first(a: &Self, b: &Self) -> Ordering {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.filename.cmp(&a.filename))
    }
}

/// How many past backups survive a cleanup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetentionPolicy {
    /// Number of newest backups to keep; `0` keeps everything
    pub keep_last: usize,
}

impl RetentionPolicy {
    /// Keep the newest `count` backups.
    pub fn keep_last(count: usize) -> Self {
        Self { keep_last: count }
    }

    /// A policy that never deletes anything.
    pub fn unlimited() -> Self {
        Self { keep_last: 0 }
    }

    /// Whether this policy ever deletes.
    pub fn is_unlimited(&self) -> bool {
        self.keep_last == 0
    }
}

/// A deletion that failed during cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDeletion {
    /// Key that could not be removed
    pub filename: String,
    /// Rendered backend error
    pub error: String,
}

/// Outcome of a retention pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Keys removed from the store
    pub deleted: Vec<String>,
    /// Deletion candidates the store refused to remove
    pub failed: Vec<FailedDeletion>,
    /// Backups intentionally kept
    pub retained: usize,
    /// Listed keys that did not parse as backup filenames
    pub skipped: usize,
}

impl CleanupReport {
    /// Number of backups remaining after the pass (kept plus failed deletions).
    pub fn remaining(&self) -> usize {
        self.retained + self.failed.len()
    }
}

/// A name that is not a well-formed backup filename.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid backup filename {filename:?}: {reason}")]
pub struct FormatError {
    /// The rejected input
    pub filename: String,
    /// Why it was rejected
    pub reason: String,
}

impl FormatError {
    pub(crate) fn new(filename: &str, reason: impl Into<String>) -> Self {
        Self {
            filename: filename.to_string(),
            reason: reason.into(),
        }
    }
}
