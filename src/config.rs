//! Session configuration.
//!
//! Loaded from YAML or JSON files, or from `POLAR_HOST_*` environment variables
//! (nested keys separated by `__`, e.g. `POLAR_HOST_CACHE__MAX_ENTRIES=256`).

use crate::{Error, Result};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "POLAR_HOST";

/// Top-level configuration for a policy session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Method-resolution cache
    pub cache: CacheConfig,
    /// Telemetry counters
    pub telemetry: TelemetryConfig,
    /// Log output (used by the CLI)
    pub logging: LoggingConfig,
    /// Policy sources loaded at startup
    pub policy: PolicyConfig,
}

/// Method-resolution cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether resolutions are cached
    pub enabled: bool,
    /// Maximum cached resolutions
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1024,
        }
    }
}

/// Telemetry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Whether counters are kept
    pub enabled: bool,
    /// Service name recorded on session and query logs
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "polar-host".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `info` or `polar_host=debug`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Policy source settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Files loaded when the session is built
    pub files: Vec<PathBuf>,
    /// Reject files without a `.polar` extension
    pub require_polar_extension: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            require_polar_extension: true,
        }
    }
}

impl SessionConfig {
    /// Parse configuration from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("invalid YAML configuration: {}", e)))
    }

    /// Parse configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::config(format!("invalid JSON configuration: {}", e)))
    }

    /// Load configuration from a file, choosing the format by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read {}: {}", path.display(), e))
        })?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = match extension.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml(&content)?,
            "json" => Self::from_json(&content)?,
            _ => Self::from_yaml(&content).or_else(|_| Self::from_json(&content))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `POLAR_HOST_*` environment variables over defaults.
    pub fn from_env() -> Result<Self> {
        let source = ::config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("policy.files");

        let config: Self = ::config::Config::builder()
            .add_source(source)
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::config(format!("invalid environment configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(Error::config_key(
                "cache size must be positive when the cache is enabled",
                "cache.max_entries",
            ));
        }
        if self.telemetry.service_name.trim().is_empty() {
            return Err(Error::config_key(
                "service name must not be empty",
                "telemetry.service_name",
            ));
        }
        if self.logging.level.trim().is_empty() {
            return Err(Error::config_key("log level must not be empty", "logging.level"));
        }
        Ok(())
    }
}
