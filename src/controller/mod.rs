//! The controller collaborator.
//!
//! The pipeline only needs three capabilities from the controller: log in,
//! trigger a backup, and download it. [`Controller`] captures exactly that so
//! the orchestrator can be driven by a scripted fake in tests.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

pub mod unifi;

pub use unifi::{UnifiClient, UnifiClientOptions};

/// Errors raised by a controller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// Credentials rejected or session not established
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Network failure or unexpected status; worth retrying
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The controller answered with something we cannot use
    #[error("Unexpected controller response: {0}")]
    Protocol(String),
}

impl ControllerError {
    /// Whether the failure may go away on retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, ControllerError::Transient(_))
    }
}

/// A backup download in progress.
pub struct Download {
    /// Backup contents
    pub body: Box<dyn AsyncRead + Send + Unpin>,
    /// Expected size when the controller reports one
    pub content_length: Option<u64>,
}

impl Download {
    /// Wrap a body of known or unknown length.
    pub fn new(body: impl AsyncRead + Send + Unpin + 'static, content_length: Option<u64>) -> Self {
        Self {
            body: Box::new(body),
            content_length,
        }
    }
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Source of backups.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Authenticate; later calls reuse the session.
    async fn login(&self, username: &str, password: &str) -> Result<(), ControllerError>;

    /// Trigger a backup and return the URL to download it from.
    ///
    /// `username` is only used to explain permission failures.
    async fn create_backup(&self, username: &str, include_days: u32) -> Result<String, ControllerError>;

    /// Start downloading a backup created by [`Controller::create_backup`].
    async fn download(&self, url: &str) -> Result<Download, ControllerError>;
}
