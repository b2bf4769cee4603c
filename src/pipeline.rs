//! Backup run orchestration.
//!
//! One run takes exactly one backup:
//!
//! ```text
//! open store -> login -> trigger -> download (retried) -> put -> cleanup
//! ```
//!
//! Every stage races its own deadline and the run's cancellation token. The
//! store is owned by the run and closed when the run ends, however it ends.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backup::{self, CleanupReport, RetentionPolicy};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, ConfigError};
use crate::controller::{Controller, Download};
use crate::retry::{RetryConfig, RetryExecutor};
use crate::storage::{self, StoreHandle};
use crate::stream::{ProgressReader, ProgressSink, TracingProgressSink};
use crate::{Error, Result};

/// Deadline for each pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    /// Controller login
    pub login: Duration,
    /// Backup trigger
    pub trigger: Duration,
    /// Download, including every retry and backoff wait
    pub download: Duration,
    /// Writing the backup into the store
    pub store: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self::with_operation_timeout(Duration::from_secs(10 * 60))
    }
}

impl StageTimeouts {
    /// Fixed login and trigger deadlines; `timeout` for download and store.
    pub fn with_operation_timeout(timeout: Duration) -> Self {
        Self {
            login: Duration::from_secs(30),
            trigger: Duration::from_secs(5 * 60),
            download: timeout,
            store: timeout,
        }
    }
}

/// What a run needs besides its collaborators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Controller account
    pub username: String,
    /// Controller password
    pub password: String,
    /// Days of history included in the backup
    pub include_days: u32,
    /// Download retries after the first attempt
    pub max_retries: u32,
    /// Retention applied after a successful write
    pub retention: RetentionPolicy,
    /// Stage deadlines
    pub timeouts: StageTimeouts,
}

impl PipelineSettings {
    /// Settings with defaults for everything but the credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            include_days: 0,
            max_retries: RetryConfig::default().max_retries,
            retention: RetentionPolicy::unlimited(),
            timeouts: StageTimeouts::default(),
        }
    }

    /// Build settings from a validated configuration.
    pub fn from_config(config: &Config) -> std::result::Result<Self, ConfigError> {
        let invalid = |field: &str| ConfigError::Invalid(format!("{} must be non-negative", field));

        let include_days =
            u32::try_from(config.unifi.include_days).map_err(|_| invalid("unifi.includeDays"))?;
        let max_retries =
            u32::try_from(config.unifi.max_retries).map_err(|_| invalid("unifi.max_retries"))?;
        let keep_last =
            usize::try_from(config.retention.keep_last).map_err(|_| invalid("retention.keepLast"))?;

        Ok(Self::new(&config.unifi.username, &config.unifi.password)
            .with_include_days(include_days)
            .with_max_retries(max_retries)
            .with_keep_last(keep_last)
            .with_timeouts(StageTimeouts::with_operation_timeout(config.timeout()?)))
    }

    /// Keep the newest `count` backups; `0` keeps all.
    pub fn with_keep_last(mut self, count: usize) -> Self {
        self.retention = RetentionPolicy::keep_last(count);
        self
    }

    /// Include `days` of history in the backup.
    pub fn with_include_days(mut self, days: u32) -> Self {
        self.include_days = days;
        self
    }

    /// Retry the download up to `retries` times.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Replace the stage deadlines.
    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Key the backup was stored under
    pub filename: String,
    /// Bytes the store accepted
    pub bytes_written: u64,
    /// Size announced by the controller, if any
    pub expected_bytes: Option<u64>,
    /// Retention outcome; `None` when retention is off or cleanup failed
    pub cleanup: Option<CleanupReport>,
}

/// Runs backups against one controller.
pub struct BackupPipeline<C> {
    controller: C,
    settings: PipelineSettings,
    cancel: CancellationToken,
    clock: Arc<dyn Clock>,
    progress: Arc<dyn ProgressSink>,
    retry_delays: RetryConfig,
}

impl<C: Controller> BackupPipeline<C> {
    /// Create a pipeline with the system clock and log-based progress.
    pub fn new(controller: C, settings: PipelineSettings) -> Self {
        let retry_delays = RetryConfig::with_max_retries(settings.max_retries);
        Self {
            controller,
            settings,
            cancel: CancellationToken::new(),
            clock: Arc::new(SystemClock),
            progress: Arc::new(TracingProgressSink),
            retry_delays,
        }
    }

    /// Abort the run when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Take backup timestamps from `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Send download progress to `sink`.
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Override the backoff delays; the retry count stays `settings.max_retries`.
    pub fn with_retry_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_delays.initial_delay = initial;
        self.retry_delays.max_delay = max;
        self
    }

    /// The controller this pipeline talks to
    pub fn controller(&self) -> &C {
        &self.controller
    }

    /// Open the store at `storage_url` and run one backup into it.
    pub async fn run(&self, storage_url: &str) -> Result<RunReport> {
        let store = self
            .stage("open storage", self.settings.timeouts.store, storage::open(storage_url))
            .await?;
        info!(backend = store.backend(), "Opened backup storage");
        self.run_with_store(store).await
    }

    /// Run one backup into an already opened store, closing it afterwards.
    pub async fn run_with_store(&self, store: StoreHandle) -> Result<RunReport> {
        let settings = &self.settings;
        let timeouts = settings.timeouts;

        // 1. Login
        self.stage(
            "login",
            timeouts.login,
            self.controller.login(&settings.username, &settings.password),
        )
        .await?;

        // 2. Trigger backup
        let backup_url = self
            .stage(
                "trigger backup",
                timeouts.trigger,
                self.controller
                    .create_backup(&settings.username, settings.include_days),
            )
            .await?;

        // 3. Download with retry
        let download = self
            .stage("download", timeouts.download, self.download(&backup_url))
            .await?;
        let expected_bytes = download.content_length.filter(|&len| len > 0);

        // 4. Store
        let filename = backup::generate_backup_filename(self.clock.now());
        let mut reader =
            ProgressReader::new(download.body, expected_bytes, Arc::clone(&self.progress));
        let bytes_written = self
            .stage("store backup", timeouts.store, store.put(&filename, &mut reader))
            .await?;

        if let Some(expected) = expected_bytes {
            if bytes_written != expected {
                warn!(
                    expected_bytes = expected,
                    written_bytes = bytes_written,
                    "Backup size mismatch"
                );
            }
        }

        info!(
            filename = %filename,
            size_bytes = bytes_written,
            expected_bytes = ?expected_bytes,
            backend = store.backend(),
            "Backup saved successfully"
        );

        // 5. Cleanup; the backup is already safe, so failures only warn
        let cleanup = if settings.retention.is_unlimited() {
            None
        } else {
            match self
                .stage(
                    "cleanup",
                    timeouts.store,
                    backup::clean(&*store, settings.retention),
                )
                .await
            {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(error = %e, "Failed to cleanup old backups");
                    None
                }
            }
        };

        Ok(RunReport {
            filename,
            bytes_written,
            expected_bytes,
            cleanup,
        })
    }

    async fn download(&self, url: &str) -> Result<Download> {
        let controller = &self.controller;
        RetryExecutor::new(self.retry_delays.clone())
            .execute(&self.cancel, move || async move {
                controller.download(url).await.map_err(Error::from)
            })
            .await
    }

    /// Run `fut` unless the deadline passes or the run is cancelled first.
    async fn stage<T, E, F>(&self, stage: &'static str, timeout: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        Error: From<E>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!(stage, "Cancelled");
                Err(Error::Cancelled)
            }
            outcome = tokio::time::timeout(timeout, fut) => match outcome {
                Ok(result) => result.map_err(Error::from),
                Err(_) => {
                    warn!(stage, timeout = ?timeout, "Deadline exceeded");
                    Err(Error::DeadlineExceeded { stage, timeout })
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_default_stage_timeouts() {
        let timeouts = StageTimeouts::default();
        assert_eq!(timeouts.login, Duration::from_secs(30));
        assert_eq!(timeouts.trigger, Duration::from_secs(300));
        assert_eq!(timeouts.download, Duration::from_secs(600));
        assert_eq!(timeouts.store, Duration::from_secs(600));
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.unifi.include_days = 3;
        config.unifi.max_retries = 5;
        config.unifi.timeout = "1h30m".to_string();
        config.retention.keep_last = 10;

        let settings = PipelineSettings::from_config(&config).unwrap();
        assert_eq!(settings.username, "admin");
        assert_eq!(settings.include_days, 3);
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.retention, RetentionPolicy::keep_last(10));
        assert_eq!(settings.timeouts.download, Duration::from_secs(5400));
        assert_eq!(settings.timeouts.login, Duration::from_secs(30));
    }

    #[test]
    fn test_settings_reject_negative_values() {
        let mut config = Config::default();
        config.retention.keep_last = -1;
        assert!(matches!(
            PipelineSettings::from_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }
}
