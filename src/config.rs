//! Configuration loading.
//!
//! Values are resolved in three layers, later ones winning:
//!
//! 1. built-in defaults
//! 2. a YAML or JSON file (explicit path, or `config.yaml` / `config.yml` /
//!    `config.json` in the working directory)
//! 3. environment variables (`UNIFI_URL`, `STORAGE_URL`, `LOG_LEVEL`, ...)
//!
//! The result is validated as a whole and every problem is reported at once.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Files tried when no explicit path is given
pub const DEFAULT_CONFIG_FILES: [&str; 3] = ["config.yaml", "config.yml", "config.json"];

const LOG_LEVELS: [&str; 5] = ["debug", "info", "warn", "warning", "error"];
const LOG_FORMATS: [&str; 3] = ["pretty", "text", "json"];

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The YAML file did not parse
    #[error("failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The JSON file did not parse
    #[error("failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),

    /// The file extension is not one we read
    #[error("unsupported config file format: {0:?} (supported: .yaml, .yml, .json)")]
    UnsupportedFormat(String),

    /// An environment variable held an unparseable value
    #[error("environment variable {name}={value:?} is invalid: {reason}")]
    Env {
        /// Variable name
        name: &'static str,
        /// Raw value
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// The merged configuration is not valid
    #[error("configuration validation failed: {0}")]
    Invalid(String),
}

// ============================================================================
// Config (root)
// ============================================================================

/// Complete tool configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Controller connection
    pub unifi: UnifiConfig,
    /// Backup destination
    pub storage: StorageConfig,
    /// Log output
    pub logging: LoggingConfig,
    /// Retention policy
    pub retention: RetentionConfig,
}

/// Controller connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnifiConfig {
    /// Controller root URL
    pub url: String,
    /// Administrator account
    pub username: String,
    /// Account password
    pub password: String,
    /// Site name
    pub site: String,
    /// Days of history to include (0 for current state only)
    #[serde(rename = "includeDays")]
    pub include_days: i64,
    /// Skip TLS certificate verification
    pub insecure_skip_verify: bool,
    /// Go-style duration bounding HTTP requests and the download stage
    pub timeout: String,
    /// Download retries after the first attempt
    pub max_retries: i64,
}

impl Default for UnifiConfig {
    fn default() -> Self {
        Self {
            url: "https://unifi.my-site.com".to_string(),
            username: "admin".to_string(),
            password: "changeme".to_string(),
            site: "default".to_string(),
            include_days: 0,
            insecure_skip_verify: false,
            timeout: "10m".to_string(),
            max_retries: 3,
        }
    }
}

/// Backup destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage URL, e.g. `file://./backups` or `s3://bucket`
    pub url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: "file://./backups".to_string(),
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `debug`, `info`, `warn` or `error`
    pub level: String,
    /// `pretty`, `text` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Retention settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Backups to keep (0 for unlimited)
    #[serde(rename = "keepLast")]
    pub keep_last: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { keep_last: 7 }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl Config {
    /// Load defaults, then `path` (or a discovered file), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => discover(Path::new(".")),
        };
        if let Some(file) = file {
            config = Self::from_file(&file)?;
        }

        config.apply_env_with(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML or JSON file on top of the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        match extension.as_str() {
            "yaml" | "yml" => Ok(serde_yaml::from_str(&contents)?),
            "json" => Ok(serde_json::from_str(&contents)?),
            other => Err(ConfigError::UnsupportedFormat(format!(".{}", other))),
        }
    }

    /// Override fields from environment variables resolved through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |name: &'static str, target: &mut String| {
            if let Some(value) = lookup(name) {
                *target = value;
            }
        };
        set("UNIFI_URL", &mut self.unifi.url);
        set("UNIFI_USER", &mut self.unifi.username);
        set("UNIFI_PASS", &mut self.unifi.password);
        set("UNIFI_SITE", &mut self.unifi.site);
        set("UNIFI_TIMEOUT", &mut self.unifi.timeout);
        set("STORAGE_URL", &mut self.storage.url);
        set("LOG_LEVEL", &mut self.logging.level);
        set("LOG_FORMAT", &mut self.logging.format);

        if let Some(value) = lookup("UNIFI_INCLUDE_DAYS") {
            self.unifi.include_days = env_int("UNIFI_INCLUDE_DAYS", value)?;
        }
        if let Some(value) = lookup("UNIFI_MAX_RETRIES") {
            self.unifi.max_retries = env_int("UNIFI_MAX_RETRIES", value)?;
        }
        if let Some(value) = lookup("RETENTION_KEEP_LAST") {
            self.retention.keep_last = env_int("RETENTION_KEEP_LAST", value)?;
        }
        if let Some(value) = lookup("UNIFI_INSECURE") {
            self.unifi.insecure_skip_verify = env_bool("UNIFI_INSECURE", value)?;
        }

        Ok(())
    }

    /// Check the merged configuration, reporting every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.unifi.url.is_empty() {
            errors.push("unifi.url is required".to_string());
        }
        if self.unifi.username.is_empty() {
            errors.push("unifi.username is required".to_string());
        }
        if self.unifi.password.is_empty() {
            errors.push("unifi.password is required".to_string());
        }
        if self.unifi.site.is_empty() {
            errors.push("unifi.site is required".to_string());
        }
        if self.unifi.timeout.is_empty() {
            errors.push("unifi.timeout is required".to_string());
        } else if let Err(e) = parse_duration(&self.unifi.timeout) {
            errors.push(format!(
                "unifi.timeout is invalid: {} (examples: 10m, 1h, 30s)",
                e
            ));
        }
        if self.unifi.include_days < 0 || self.unifi.include_days > u32::MAX as i64 {
            errors.push("unifi.includeDays must be non-negative".to_string());
        }
        if self.unifi.max_retries < 0 || self.unifi.max_retries > u32::MAX as i64 {
            errors.push("unifi.max_retries must be non-negative".to_string());
        }

        if self.storage.url.is_empty() {
            errors.push("storage.url is required".to_string());
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            errors.push("logging.level must be one of: debug, info, warn, error".to_string());
        }
        if !LOG_FORMATS.contains(&self.logging.format.to_ascii_lowercase().as_str()) {
            errors.push("logging.format must be one of: pretty, text, json".to_string());
        }

        if self.retention.keep_last < 0 {
            errors.push("retention.keepLast must be non-negative (0 for unlimited)".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors.join("; ")))
        }
    }

    /// The parsed `unifi.timeout`.
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.unifi.timeout)
            .map_err(|e| ConfigError::Invalid(format!("unifi.timeout is invalid: {}", e)))
    }
}

/// First default config file present in `dir`.
pub fn discover(dir: &Path) -> Option<PathBuf> {
    DEFAULT_CONFIG_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

fn env_int(name: &'static str, value: String) -> Result<i64, ConfigError> {
    match value.trim().parse::<i64>() {
        Ok(parsed) => Ok(parsed),
        Err(e) => Err(ConfigError::Env {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}

fn env_bool(name: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(ConfigError::Env {
            name,
            value,
            reason: "expected a boolean".to_string(),
        }),
    }
}

// ============================================================================
// Durations
// ============================================================================

/// Parse a Go-style duration such as `10m`, `1h30m`, `1.5s` or `500ms`.
///
/// Units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. A bare `0` is allowed;
/// any other number needs a unit.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    let rest = input.strip_prefix('+').unwrap_or(input);
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.starts_with('-') {
        return Err(format!("negative duration {:?}", input));
    }

    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut rest = rest;
    let mut nanos = 0f64;

    while !rest.is_empty() {
        let number_end = rest.find(|c: char| !is_number(c)).unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_end);
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid duration {:?}", input))?;

        let unit_end = tail.find(is_number).unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_end);
        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(format!("missing unit in duration {:?}", input)),
            other => return Err(format!("unknown unit {:?} in duration {:?}", other, input)),
        };

        nanos += value * scale;
        rest = next;
    }

    if !nanos.is_finite() || nanos > u64::MAX as f64 {
        return Err(format!("invalid duration {:?}", input));
    }
    Ok(Duration::from_nanos(nanos.round() as u64))
}
