// crates/shape-load-config/src/config.rs
// ============================================================================
// Module: Shape Load Configuration
// Description: Configuration loading and validation for the load harness.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: serde, shape-load-core, thiserror, toml, url
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file. The path comes from the caller,
//! then the `SHAPE_LOAD_CONFIG` environment variable, then
//! `./shape-load.toml`. An explicitly named file must exist; a missing default
//! file yields the built-in defaults. After parsing, `DATABASE_ID` and
//! `AUTH_TOKEN` override the target section and the result is validated.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use shape_load_core::HistogramMode;
use shape_load_core::Shape;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "shape-load.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "SHAPE_LOAD_CONFIG";
/// Environment variable overriding `target.database_id`.
pub const DATABASE_ID_ENV_VAR: &str = "DATABASE_ID";
/// Environment variable overriding `target.auth_token`.
pub const AUTH_TOKEN_ENV_VAR: &str = "AUTH_TOKEN";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 256 * 1024;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum number of simulated clients per worker.
pub const MAX_CLIENTS: u32 = 100_000;
/// Maximum shape fan-out.
pub const MAX_SHAPE_FAN_OUT: u32 = 10_000;
/// Maximum bearer token length.
const MAX_AUTH_TOKEN_LENGTH: usize = 4096;
/// Minimum report interval in milliseconds.
const MIN_REPORT_INTERVAL_MS: u64 = 100;
/// Maximum report interval in milliseconds.
const MAX_REPORT_INTERVAL_MS: u64 = 600_000;
/// Maximum poll interval in milliseconds.
const MAX_POLL_INTERVAL_MS: u64 = 600_000;

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Shape load harness configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ShapeLoadConfig {
    /// Sync service target.
    #[serde(default)]
    pub target: TargetConfig,
    /// Simulated client population.
    #[serde(default)]
    pub load: LoadConfig,
    /// Worker report cycle.
    #[serde(default)]
    pub report: ReportConfig,
    /// Coordinator listener.
    #[serde(default)]
    pub server: ServerConfig,
    /// Event logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ShapeLoadConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match resolve_path(path)? {
            ConfigSource::File(resolved) => Self::read(&resolved)?,
            ConfigSource::Defaults => Self::default(),
        };
        config.apply_overrides(|name| env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parses a configuration file without overrides or validation.
    fn read(path: &Path) -> Result<Self, ConfigError> {
        if path.to_string_lossy().len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        let bytes = fs::read(path)
            .map_err(|err| ConfigError::Io(format!("{}: {err}", path.display())))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml(content)
    }

    /// Parses configuration text without overrides or validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the text is not a valid config document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Applies environment overrides read through `lookup`.
    ///
    /// Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value: &String| !value.trim().is_empty());
        if let Some(database_id) = read(DATABASE_ID_ENV_VAR) {
            self.target.database_id = Some(database_id);
        }
        if let Some(token) = read(AUTH_TOKEN_ENV_VAR) {
            self.target.auth_token = Some(token);
        }
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.target.validate()?;
        self.load.validate()?;
        self.report.validate()?;
        self.server.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Sync service target.
#[derive(Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    /// Shape API base URL, ending in `/`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Table each simulated client subscribes to.
    #[serde(default = "default_root_table")]
    pub root_table: String,
    /// Optional tenant database identifier.
    #[serde(default)]
    pub database_id: Option<String>,
    /// Optional bearer token.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Protocol spelling.
    #[serde(default)]
    pub dialect: ProtocolDialect,
    /// Connection establishment timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Whole-request timeout in milliseconds; unset leaves long polls unbounded.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            root_table: default_root_table(),
            database_id: None,
            auth_token: None,
            dialect: ProtocolDialect::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: None,
        }
    }
}

impl std::fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetConfig")
            .field("base_url", &self.base_url)
            .field("root_table", &self.root_table)
            .field("database_id", &self.database_id)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("dialect", &self.dialect)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

impl TargetConfig {
    /// Returns an unsynced shape for this target.
    #[must_use]
    pub fn shape(&self) -> Shape {
        let mut shape = Shape::new(self.base_url.clone(), self.root_table.clone());
        if let Some(database_id) = &self.database_id {
            shape = shape.with_database_id(database_id.clone());
        }
        shape
    }

    /// Returns the connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Returns the request timeout, if bounded.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Validates target settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_url.ends_with('/') {
            return Err(ConfigError::Invalid("target.base_url must end with '/'".to_string()));
        }
        if self.root_table.trim().is_empty() || self.root_table.contains('/') {
            return Err(ConfigError::Invalid(
                "target.root_table must be a non-empty table name".to_string(),
            ));
        }
        shape_load_core::validate(&self.shape())
            .map_err(|err| ConfigError::Invalid(format!("target: {err}")))?;
        if let Some(token) = &self.auth_token {
            if token.trim().is_empty() || token.len() > MAX_AUTH_TOKEN_LENGTH {
                return Err(ConfigError::Invalid(
                    "target.auth_token must be non-empty and at most 4096 bytes".to_string(),
                ));
            }
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid("target.connect_timeout_ms must be > 0".to_string()));
        }
        if self.request_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("target.request_timeout_ms must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Protocol spelling of the shape identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolDialect {
    /// `shape_id` / `electric-shape-id`.
    Legacy,
    /// `handle` / `electric-handle`.
    #[default]
    Current,
}

/// Simulated client population.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoadConfig {
    /// Number of simulated clients in this worker.
    #[serde(default = "default_clients")]
    pub clients: u32,
    /// Clients started per second.
    #[serde(default = "default_spawn_rate")]
    pub spawn_rate: u32,
    /// Pause between live polls in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Number of distinct shape predicates clients are spread across.
    #[serde(default = "default_shape_fan_out")]
    pub shape_fan_out: u32,
    /// Sample keying mode.
    #[serde(default)]
    pub histogram_mode: HistogramMode,
    /// Optional run duration in seconds; unset runs until interrupted.
    #[serde(default)]
    pub run_time_secs: Option<u64>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            clients: default_clients(),
            spawn_rate: default_spawn_rate(),
            poll_interval_ms: default_poll_interval_ms(),
            shape_fan_out: default_shape_fan_out(),
            histogram_mode: HistogramMode::default(),
            run_time_secs: None,
        }
    }
}

impl LoadConfig {
    /// Returns the pause between live polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the run duration, if bounded.
    #[must_use]
    pub fn run_time(&self) -> Option<Duration> {
        self.run_time_secs.map(Duration::from_secs)
    }

    /// Validates load settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.clients == 0 || self.clients > MAX_CLIENTS {
            return Err(ConfigError::Invalid(format!(
                "load.clients must be between 1 and {MAX_CLIENTS}"
            )));
        }
        if self.spawn_rate == 0 {
            return Err(ConfigError::Invalid("load.spawn_rate must be > 0".to_string()));
        }
        if self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(ConfigError::Invalid(format!(
                "load.poll_interval_ms must be at most {MAX_POLL_INTERVAL_MS}"
            )));
        }
        if self.shape_fan_out == 0 || self.shape_fan_out > MAX_SHAPE_FAN_OUT {
            return Err(ConfigError::Invalid(format!(
                "load.shape_fan_out must be between 1 and {MAX_SHAPE_FAN_OUT}"
            )));
        }
        if self.run_time_secs == Some(0) {
            return Err(ConfigError::Invalid("load.run_time_secs must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Worker report cycle.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReportConfig {
    /// Milliseconds between drains of the local accumulator.
    #[serde(default = "default_report_interval_ms")]
    pub interval_ms: u64,
    /// Coordinator base URL for `worker` mode.
    #[serde(default)]
    pub coordinator_url: Option<String>,
    /// Worker identity; defaults to a generated id.
    #[serde(default)]
    pub worker_id: Option<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_report_interval_ms(),
            coordinator_url: None,
            worker_id: None,
        }
    }
}

impl ReportConfig {
    /// Returns the report interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Returns the parsed coordinator URL, if configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the URL is not absolute `http`/`https`.
    pub fn coordinator(&self) -> Result<Option<Url>, ConfigError> {
        let Some(raw) = &self.coordinator_url else {
            return Ok(None);
        };
        let url = Url::parse(raw)
            .map_err(|err| ConfigError::Invalid(format!("report.coordinator_url: {err}")))?;
        match url.scheme() {
            "http" | "https" => Ok(Some(url)),
            other => Err(ConfigError::Invalid(format!(
                "report.coordinator_url has unsupported scheme {other}"
            ))),
        }
    }

    /// Validates report settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_REPORT_INTERVAL_MS ..= MAX_REPORT_INTERVAL_MS).contains(&self.interval_ms) {
            return Err(ConfigError::Invalid(format!(
                "report.interval_ms must be between {MIN_REPORT_INTERVAL_MS} and \
                 {MAX_REPORT_INTERVAL_MS}"
            )));
        }
        self.coordinator()?;
        if let Some(worker_id) = &self.worker_id {
            if worker_id.trim().is_empty() || worker_id.len() > 128 {
                return Err(ConfigError::Invalid(
                    "report.worker_id must be 1 to 128 bytes".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Coordinator listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address for the stats and report endpoints.
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl ServerConfig {
    /// Returns the parsed bind address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the address does not parse.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("server.bind is not a socket address: {}", self.bind)))
    }

    /// Validates server settings.
    fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr().map(|_| ())
    }
}

/// Event sink selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSink {
    /// JSON lines on stderr.
    #[default]
    Stderr,
    /// JSON lines appended to `logging.path`.
    File,
    /// Events discarded.
    None,
}

/// Event logging.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Sink selection.
    #[serde(default)]
    pub sink: LogSink,
    /// Log file path for the file sink.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl LoggingConfig {
    /// Validates logging settings.
    fn validate(&self) -> Result<(), ConfigError> {
        match (self.sink, &self.path) {
            (LogSink::File, None) => {
                Err(ConfigError::Invalid("logging.path is required for the file sink".to_string()))
            }
            (LogSink::File, Some(path)) if path.as_os_str().is_empty() => {
                Err(ConfigError::Invalid("logging.path must not be empty".to_string()))
            }
            _ => Ok(()),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Where configuration comes from.
enum ConfigSource {
    /// A file that must exist.
    File(PathBuf),
    /// Built-in defaults.
    Defaults,
}

/// Resolves the config path from the caller, the environment or the default name.
fn resolve_path(path: Option<&Path>) -> Result<ConfigSource, ConfigError> {
    if let Some(path) = path {
        return Ok(ConfigSource::File(path.to_path_buf()));
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(ConfigSource::File(PathBuf::from(env_path)));
    }
    let default = PathBuf::from(DEFAULT_CONFIG_NAME);
    if default.is_file() {
        Ok(ConfigSource::File(default))
    } else {
        Ok(ConfigSource::Defaults)
    }
}

/// Default shape API base URL.
fn default_base_url() -> String {
    "http://localhost:3000/v1/shape/".to_string()
}

/// Default subscribed table.
fn default_root_table() -> String {
    "items".to_string()
}

/// Default connect timeout.
const fn default_connect_timeout_ms() -> u64 {
    10_000
}

/// Default client count.
const fn default_clients() -> u32 {
    10
}

/// Default spawn rate.
const fn default_spawn_rate() -> u32 {
    10
}

/// Default pause between live polls.
const fn default_poll_interval_ms() -> u64 {
    1_000
}

/// Default shape fan-out.
const fn default_shape_fan_out() -> u32 {
    1
}

/// Default report interval.
const fn default_report_interval_ms() -> u64 {
    3_000
}

/// Default coordinator bind address.
fn default_bind() -> String {
    "127.0.0.1:8089".to_string()
}
