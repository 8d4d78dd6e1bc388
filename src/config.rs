//! Worker configuration.
//!
//! A single TOML file configures the listener, the registration identity,
//! the collaborators and logging. Every key is optional; missing keys take
//! the stock defaults below and unknown keys are rejected.
//!
//! ```toml
//! local_addr = "127.0.0.1:8443"
//! instance = "mediaserverimage"
//! domains = []
//! concurrency = 3
//! queue_size = 10
//! error_timeout_secs = 10
//! action_timeout_secs = 0
//! client_timeout_secs = 10
//! dispatchers = ["http://localhost:8761"]
//! database = "http://localhost:8762"
//! aspect_comparison = "truncating"
//! log_level = "info"
//! log_file = ""
//! ```
//!
//! Run `mediaserverimage --gen-config` for a commented copy.

use crate::imaging::AspectComparison;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Worker configuration loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Address the RPC server binds to.
    pub local_addr: String,
    /// Instance name announced to dispatchers.
    pub instance: String,
    /// Domains this worker serves. Empty means all.
    pub domains: Vec<String>,
    /// Maximum number of actions executing at once.
    pub concurrency: u32,
    /// Queue length announced to dispatchers.
    pub queue_size: u32,
    /// Wait before retrying a failed registration.
    pub error_timeout_secs: u64,
    /// Per-action deadline. `0` disables it.
    pub action_timeout_secs: u64,
    /// Timeout of outbound dispatcher and database calls.
    pub client_timeout_secs: u64,
    /// Dispatcher base URLs; one registration loop each.
    pub dispatchers: Vec<String>,
    /// Database base URL.
    pub database: String,
    pub aspect_comparison: AspectComparison,
    /// Default log filter, overridden by `RUST_LOG`.
    pub log_level: String,
    /// Log file path. Empty logs to stderr only.
    pub log_file: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            local_addr: "127.0.0.1:8443".to_string(),
            instance: "mediaserverimage".to_string(),
            domains: Vec::new(),
            concurrency: 3,
            queue_size: 10,
            error_timeout_secs: 10,
            action_timeout_secs: 0,
            client_timeout_secs: 10,
            dispatchers: vec!["http://localhost:8761".to_string()],
            database: "http://localhost:8762".to_string(),
            aspect_comparison: AspectComparison::default(),
            log_level: "info".to_string(),
            log_file: String::new(),
        }
    }
}

impl WorkerConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Validation("concurrency must be at least 1".into()));
        }
        if self.error_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "error_timeout_secs must be at least 1".into(),
            ));
        }
        if self.client_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "client_timeout_secs must be at least 1".into(),
            ));
        }
        if self.dispatchers.is_empty() {
            return Err(ConfigError::Validation(
                "at least one dispatcher is required".into(),
            ));
        }
        if let Some(empty) = self.dispatchers.iter().position(|d| d.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "dispatchers[{empty}] must not be empty"
            )));
        }
        if self.database.trim().is_empty() {
            return Err(ConfigError::Validation("database must not be empty".into()));
        }
        if self.instance.trim().is_empty() {
            return Err(ConfigError::Validation("instance must not be empty".into()));
        }
        self.socket_addr()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.local_addr.parse().map_err(|e| {
            ConfigError::Validation(format!("local_addr '{}': {e}", self.local_addr))
        })
    }

    pub fn error_timeout(&self) -> Duration {
        Duration::from_secs(self.error_timeout_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    pub fn action_timeout(&self) -> Option<Duration> {
        (self.action_timeout_secs > 0).then(|| Duration::from_secs(self.action_timeout_secs))
    }
}

/// Parse and validate a config document.
pub fn parse_config(content: &str) -> Result<WorkerConfig, ConfigError> {
    let config: WorkerConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path`, or the stock defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<WorkerConfig, ConfigError> {
    match path {
        Some(path) => parse_config(&fs::read_to_string(path)?),
        None => {
            let config = WorkerConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Returns a fully-commented stock config with all keys and explanations.
///
/// Used by the `--gen-config` CLI flag.
pub fn stock_config_toml() -> &'static str {
    r##"# Media server image worker configuration
# =======================================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

# Address the RPC server listens on.
local_addr = "127.0.0.1:8443"

# ---------------------------------------------------------------------------
# Registration
# ---------------------------------------------------------------------------
# Name announced to dispatchers.
instance = "mediaserverimage"

# Domains served by this worker. Empty serves all domains.
domains = []

# Actions executed in parallel. Extra requests wait for a free slot.
concurrency = 3

# Queue length announced to dispatchers.
queue_size = 10

# Seconds to wait before retrying a failed registration.
error_timeout_secs = 10

# Dispatchers to register with. One registration loop runs per entry.
dispatchers = ["http://localhost:8761"]

# ---------------------------------------------------------------------------
# Collaborators
# ---------------------------------------------------------------------------
# Database resolving canonical renditions.
database = "http://localhost:8762"

# Timeout in seconds for dispatcher and database calls.
client_timeout_secs = 10

# ---------------------------------------------------------------------------
# Actions
# ---------------------------------------------------------------------------
# Seconds a caller waits for one action. 0 waits forever.
action_timeout_secs = 0

# How resize compares aspect ratios:
#   "truncating" - integer ratios, compatible with existing caches
#   "exact"      - exact ratio comparison
aspect_comparison = "truncating"

# ---------------------------------------------------------------------------
# Logging
# ---------------------------------------------------------------------------
# Default filter (trace, debug, info, warn, error). RUST_LOG takes precedence.
log_level = "info"

# Also write logs to this file. Empty logs to stderr only.
log_file = ""
"##
}
