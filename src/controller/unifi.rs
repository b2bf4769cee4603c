//! HTTP client for the UniFi Network controller API.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::io::StreamReader;
use tracing::info;

use super::{Controller, ControllerError, Download};
use crate::stream::format_bytes;

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Client options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiClientOptions {
    /// Site whose backup is taken
    pub site: String,
    /// Accept any TLS certificate (self-signed controllers)
    pub insecure_skip_verify: bool,
    /// Bound on each HTTP request, including reading the body
    pub timeout: Duration,
}

impl Default for UnifiClientOptions {
    fn default() -> Self {
        Self {
            site: "default".to_string(),
            insecure_skip_verify: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct BackupRequest {
    cmd: &'static str,
    days: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ApiMeta {
    #[serde(default)]
    rc: String,
    #[serde(default)]
    msg: String,
}

#[derive(Debug, Deserialize)]
struct BackupData {
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    meta: ApiMeta,
    #[serde(default)]
    data: Vec<BackupData>,
}

/// Session-holding client for one controller.
///
/// Authentication cookies from [`Controller::login`] are kept and sent with
/// every later request.
pub struct UnifiClient {
    http: reqwest::Client,
    base_url: String,
    site: String,
}

impl UnifiClient {
    /// Build a client for the controller at `base_url`, e.g. `https://192.168.1.1:8443`.
    pub fn new(base_url: impl Into<String>, options: UnifiClientOptions) -> Result<Self, ControllerError> {
        let timeout = if options.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            options.timeout
        };

        let http = reqwest::Client::builder()
            .user_agent(format!("unifi-backup/{}", env!("CARGO_PKG_VERSION")))
            .cookie_store(true)
            .danger_accept_invalid_certs(options.insecure_skip_verify)
            .timeout(timeout)
            .build()
            .map_err(|e| ControllerError::Protocol(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            site: options.site,
        })
    }

    /// Controller root URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn backup_endpoint(&self) -> String {
        format!("{}/api/s/{}/cmd/backup", self.base_url, self.site)
    }
}

/// Pull the download URL out of a backup command response.
fn backup_download_url(base_url: &str, username: &str, response: &ApiResponse) -> Result<String, ControllerError> {
    match response.data.first() {
        Some(data) if response.meta.rc == "ok" && !data.url.is_empty() => {
            Ok(format!("{}{}", base_url, data.url))
        }
        _ => {
            if response.meta.msg == "api.err.NoPermission" {
                info!(
                    "Make sure the user '{}' is an Administrator rather than just a Site Administrator",
                    username
                );
            }
            Err(ControllerError::Protocol(format!(
                "backup failed: response_code={}, message={}, data_length={}",
                response.meta.rc,
                response.meta.msg,
                response.data.len()
            )))
        }
    }
}

fn transient(context: &str, err: reqwest::Error) -> ControllerError {
    ControllerError::Transient(format!("{}: {}", context, err))
}

#[async_trait]
impl Controller for UnifiClient {
    async fn login(&self, username: &str, password: &str) -> Result<(), ControllerError> {
        info!(username = %username, "Logging in to UniFi controller");

        let response = self
            .http
            .post(format!("{}/api/login", self.base_url))
            .json(&LoginRequest { username, password })
            .send()
            .await
            .map_err(|e| transient("login request failed", e))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ControllerError::Authentication(format!(
                "login failed with status {}: {}",
                status, body
            )));
        }

        let result: ApiResponse = response
            .json()
            .await
            .map_err(|e| ControllerError::Protocol(format!("failed to decode login response: {}", e)))?;
        if result.meta.rc != "ok" {
            return Err(ControllerError::Authentication(format!(
                "login failed: {}",
                result.meta.msg
            )));
        }

        info!("Successfully logged in");
        Ok(())
    }

    async fn create_backup(&self, username: &str, include_days: u32) -> Result<String, ControllerError> {
        info!(include_days, "Triggering backup");

        let response = self
            .http
            .post(self.backup_endpoint())
            .json(&BackupRequest {
                cmd: "backup",
                days: include_days,
            })
            .send()
            .await
            .map_err(|e| transient("backup request failed", e))?;

        let result: ApiResponse = response
            .json()
            .await
            .map_err(|e| ControllerError::Protocol(format!("failed to decode backup response: {}", e)))?;

        let url = backup_download_url(&self.base_url, username, &result)?;
        info!(url = %url, "Backup created successfully");
        Ok(url)
    }

    async fn download(&self, url: &str) -> Result<Download, ControllerError> {
        info!("Downloading backup file");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| transient("failed to download backup", e))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ControllerError::Transient(format!(
                "download failed with status {}: {}",
                status, body
            )));
        }

        let content_length = response.content_length();
        info!(
            size = %content_length.map(format_bytes).unwrap_or_else(|| "unknown".to_string()),
            "Backup download started"
        );

        let stream = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        let body = StreamReader::new(Box::pin(stream));

        Ok(Download::new(body, content_length))
    }
}
