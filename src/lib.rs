//! # UniFi Backup
//!
//! Pulls a configuration snapshot from a UniFi Network controller and persists
//! it to one of several interchangeable storage backends, then enforces a
//! keep-last-N retention policy on the snapshots already stored there.
//!
//! ## Overview
//!
//! A run is a single linear pipeline:
//!
//! 1. open the object store named by a storage URL
//! 2. log in to the controller and trigger a backup
//! 3. download the backup (retried with exponential backoff)
//! 4. stream it into the store through a progress-tracking reader
//! 5. delete the oldest snapshots beyond the retention limit
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use unifi_backup::controller::unifi::{UnifiClient, UnifiClientOptions};
//! use unifi_backup::pipeline::{BackupPipeline, PipelineSettings};
//!
//! # async fn example() -> unifi_backup::Result<()> {
//! let client = UnifiClient::new("https://192.168.1.1", UnifiClientOptions::default())?;
//! let settings = PipelineSettings::new("admin", "secret").with_keep_last(7);
//!
//! let report = BackupPipeline::new(client, settings)
//!     .run("file://./backups")
//!     .await?;
//! println!("saved {} ({} bytes)", report.filename, report.bytes_written);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`backup`]: backup filename codec and retention cleaner
//! - [`storage`]: the object store contract and its backends
//! - [`stream`]: progress-tracking byte streams
//! - [`retry`]: bounded retry with exponential backoff
//! - [`controller`]: the controller collaborator and its HTTP client
//! - [`pipeline`]: the backup run orchestrator
//! - [`config`]: configuration loading and validation

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use std::time::Duration;

use thiserror::Error;

/// Result type for backup operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for backup operations
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed backup filename
    #[error("Format error: {0}")]
    Format(#[from] backup::FormatError),

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(#[from] storage::StoreError),

    /// Controller collaborator failure
    #[error("Controller error: {0}")]
    Controller(#[from] controller::ControllerError),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// The run was interrupted
    #[error("Operation cancelled")]
    Cancelled,

    /// A stage did not finish within its deadline
    #[error("{stage} did not complete within {timeout:?}")]
    DeadlineExceeded {
        /// Pipeline stage that timed out
        stage: &'static str,
        /// The deadline that was exceeded
        timeout: Duration,
    },
}

impl Error {
    /// Whether the failure is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Controller(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Whether the failure came from cancellation or an expired deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded { .. })
    }
}

impl From<retry::Cancelled> for Error {
    fn from(_: retry::Cancelled) -> Self {
        Error::Cancelled
    }
}

/// Backup naming and retention
pub mod backup;

/// Object store contract and backends
pub mod storage;

/// Progress-tracking streams
pub mod stream;

/// Retry with exponential backoff
pub mod retry;

/// Time source abstraction
pub mod clock;

/// Controller collaborator
pub mod controller;

/// Backup run orchestration
pub mod pipeline;

/// Configuration loading
pub mod config;

/// Logging setup
pub mod logging;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_errors_are_not_retryable() {
        let cancelled = Error::Cancelled;
        let deadline = Error::DeadlineExceeded {
            stage: "download",
            timeout: Duration::from_secs(1),
        };

        assert!(cancelled.is_cancellation());
        assert!(deadline.is_cancellation());
        assert!(!cancelled.is_retryable());
        assert!(!deadline.is_retryable());
    }

    #[test]
    fn test_transient_controller_error_is_retryable() {
        let err = Error::from(controller::ControllerError::Transient("connection reset".into()));
        assert!(err.is_retryable());

        let err = Error::from(controller::ControllerError::Authentication("bad password".into()));
        assert!(!err.is_retryable());
    }
}
