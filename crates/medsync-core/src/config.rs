//! Configuration module for MedSync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for MedSync.
///
/// Every section is optional in the YAML file; missing sections and fields
/// take their default values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub connectivity: ConnectivityConfig,
    pub sync: SyncConfig,
    pub retention: RetentionConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Clinic backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the REST API, e.g. `https://clinic.example.org/api`.
    pub base_url: String,
    /// Bearer token sent with every request. Session handling lives elsewhere.
    pub access_token: Option<String>,
    /// Time budget for push/pull requests, in seconds.
    pub request_timeout_secs: u64,
    /// Path of the cheap endpoint used for reachability probes.
    pub health_path: String,
}

/// Reachability probing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Time budget of one health probe, in seconds.
    pub probe_timeout_secs: u64,
    /// Delay before the single probe retry, in seconds.
    pub probe_retry_secs: u64,
    /// Delay between going online and the automatic sync, in seconds.
    pub settle_delay_secs: u64,
}

/// Sync scheduling and backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between periodic pull-only cycles while online.
    pub pull_interval_secs: u64,
    /// Backoff after the first failed push attempt, in seconds.
    pub backoff_base_secs: u64,
    /// Upper bound of the push backoff, in seconds.
    pub backoff_max_secs: u64,
}

/// Sync queue retention limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Items with more failed attempts than this are dropped.
    pub max_attempts: u32,
    /// Items older than this many hours are dropped.
    pub max_age_hours: u64,
}

/// Local database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the SQLite database file.
    pub database: PathBuf,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/medsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("medsync")
            .join("config.yaml")
    }

    /// Serialize to YAML, as written by `medsync config show`.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

// ---------------------------------------------------------------------------
// Duration accessors
// ---------------------------------------------------------------------------

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ConnectivityConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn probe_retry(&self) -> Duration {
        Duration::from_secs(self.probe_retry_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

impl SyncConfig {
    pub fn pull_interval(&self) -> Duration {
        Duration::from_secs(self.pull_interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            access_token: None,
            request_timeout_secs: 30,
            health_path: "/health".to_string(),
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: 5,
            probe_retry_secs: 10,
            settle_delay_secs: 2,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pull_interval_secs: 300,
            backoff_base_secs: 5,
            backoff_max_secs: 300,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            max_age_hours: 72,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("medsync");
        Self {
            database: data_dir.join("medsync.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.pull_interval_secs"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

fn require_positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError {
            field: field.into(),
            message: "must be greater than 0".into(),
        });
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- server ---
        let base_url = self.server.base_url.as_str();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            errors.push(ValidationError {
                field: "server.base_url".into(),
                message: format!("must be an http(s) URL, got '{base_url}'"),
            });
        }
        require_positive(
            &mut errors,
            "server.request_timeout_secs",
            self.server.request_timeout_secs,
        );
        if !self.server.health_path.starts_with('/') {
            errors.push(ValidationError {
                field: "server.health_path".into(),
                message: "must start with '/'".into(),
            });
        }

        // --- connectivity ---
        require_positive(
            &mut errors,
            "connectivity.probe_timeout_secs",
            self.connectivity.probe_timeout_secs,
        );
        require_positive(
            &mut errors,
            "connectivity.probe_retry_secs",
            self.connectivity.probe_retry_secs,
        );

        // --- sync ---
        require_positive(
            &mut errors,
            "sync.pull_interval_secs",
            self.sync.pull_interval_secs,
        );
        require_positive(
            &mut errors,
            "sync.backoff_base_secs",
            self.sync.backoff_base_secs,
        );
        if self.sync.backoff_max_secs < self.sync.backoff_base_secs {
            errors.push(ValidationError {
                field: "sync.backoff_max_secs".into(),
                message: format!(
                    "backoff_max_secs ({}) must not be below backoff_base_secs ({})",
                    self.sync.backoff_max_secs, self.sync.backoff_base_secs
                ),
            });
        }

        // --- retention ---
        require_positive(
            &mut errors,
            "retention.max_attempts",
            u64::from(self.retention.max_attempts),
        );
        require_positive(
            &mut errors,
            "retention.max_age_hours",
            self.retention.max_age_hours,
        );

        // --- storage ---
        if self.storage.database.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.database".into(),
                message: "must not be empty".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use medsync_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .server_base_url("https://clinic.example.org/api")
///     .sync_pull_interval_secs(60)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- server ---

    pub fn server_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.server.base_url = url.into();
        self
    }

    pub fn server_access_token(mut self, token: impl Into<String>) -> Self {
        self.config.server.access_token = Some(token.into());
        self
    }

    pub fn server_request_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.server.request_timeout_secs = seconds;
        self
    }

    pub fn server_health_path(mut self, path: impl Into<String>) -> Self {
        self.config.server.health_path = path.into();
        self
    }

    // --- connectivity ---

    pub fn connectivity_probe_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.connectivity.probe_timeout_secs = seconds;
        self
    }

    pub fn connectivity_probe_retry_secs(mut self, seconds: u64) -> Self {
        self.config.connectivity.probe_retry_secs = seconds;
        self
    }

    pub fn connectivity_settle_delay_secs(mut self, seconds: u64) -> Self {
        self.config.connectivity.settle_delay_secs = seconds;
        self
    }

    // --- sync ---

    pub fn sync_pull_interval_secs(mut self, seconds: u64) -> Self {
        self.config.sync.pull_interval_secs = seconds;
        self
    }

    pub fn sync_backoff_base_secs(mut self, seconds: u64) -> Self {
        self.config.sync.backoff_base_secs = seconds;
        self
    }

    pub fn sync_backoff_max_secs(mut self, seconds: u64) -> Self {
        self.config.sync.backoff_max_secs = seconds;
        self
    }

    // --- retention ---

    pub fn retention_max_attempts(mut self, n: u32) -> Self {
        self.config.retention.max_attempts = n;
        self
    }

    pub fn retention_max_age_hours(mut self, hours: u64) -> Self {
        self.config.retention.max_age_hours = hours;
        self
    }

    // --- storage ---

    pub fn storage_database(mut self, path: PathBuf) -> Self {
        self.config.storage.database = path;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
