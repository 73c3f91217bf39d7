//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::index::RetryConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub federation: FederationConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Federation engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Index snapshot TTL; also sizes the era slack (`2 * cache_timeout_ms`)
    #[serde(default = "default_cache_timeout")]
    pub cache_timeout_ms: u64,
}

fn default_cache_timeout() -> u64 {
    10 * 60 * 1000 // 10 minutes
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            cache_timeout_ms: default_cache_timeout(),
        }
    }
}

impl FederationConfig {
    /// TTL as the signed millis the engine computes with
    pub fn cache_timeout_ms(&self) -> i64 {
        i64::try_from(self.cache_timeout_ms).unwrap_or(i64::MAX)
    }
}

/// Routing history store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_put_max_attempts")]
    pub put_max_attempts: u32,

    #[serde(default = "default_put_initial_backoff")]
    pub put_initial_backoff_ms: u64,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("chronicle").join("federation").to_string_lossy().to_string())
        .unwrap_or_else(|| "./chronicle_federation".to_string())
}

fn default_put_max_attempts() -> u32 {
    6
}

fn default_put_initial_backoff() -> u64 {
    800
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            put_max_attempts: default_put_max_attempts(),
            put_initial_backoff_ms: default_put_initial_backoff(),
        }
    }
}

impl StoreConfig {
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    /// File backing the metric ID registry
    pub fn registry_path(&self) -> PathBuf {
        self.data_path().join("metric_ids.json")
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.put_max_attempts,
            initial_backoff: Duration::from_millis(self.put_initial_backoff_ms),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("chronicle").join("federation.toml")),
            Some(PathBuf::from("/etc/chronicle/federation.toml")),
            Some(PathBuf::from("./federation.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any `CHRONICLE_*` variable source
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(data_dir) = lookup("CHRONICLE_FED_DATA_DIR") {
            self.store.data_dir = data_dir;
        }
        if let Some(timeout) = lookup("CHRONICLE_FED_CACHE_TIMEOUT_MS") {
            match timeout.parse() {
                Ok(ms) => self.federation.cache_timeout_ms = ms,
                Err(_) => tracing::warn!(
                    "Ignoring CHRONICLE_FED_CACHE_TIMEOUT_MS={:?}: not a number",
                    timeout
                ),
            }
        }

        // Logging overrides
        if let Some(level) = lookup("CHRONICLE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("CHRONICLE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Chronicle Federation Configuration
#
# Environment variables override these settings:
# - CHRONICLE_FED_DATA_DIR
# - CHRONICLE_FED_CACHE_TIMEOUT_MS
# - CHRONICLE_LOG_LEVEL
# - CHRONICLE_LOG_FORMAT

[federation]
# How long an index snapshot is served before it is reloaded (ms).
# Queries keep reading a finished era for twice this long, so points
# routed by a stale snapshot are still found.
cache_timeout_ms = 600000

[store]
# Directory holding the routing history and metric ID registry
# (default: the platform's local data dir + chronicle/federation)
# data_dir = "/var/lib/chronicle/federation"

# Attempts per routing history write, first one included
put_max_attempts = 6

# Delay after the first failed write, doubled after each further one (ms)
put_initial_backoff_ms = 800

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.federation.cache_timeout_ms, 600_000);
        assert_eq!(config.store.put_max_attempts, 6);
        assert_eq!(config.store.retry().initial_backoff, Duration::from_millis(800));
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("federation.toml");
        std::fs::write(&path, "[federation]\ncache_timeout_ms = 10000\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.federation.cache_timeout_ms(), 10_000);
        assert_eq!(config.store.put_initial_backoff_ms, 800);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_generated_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.federation.cache_timeout_ms, 600_000);
        assert_eq!(config.store.put_max_attempts, 6);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CHRONICLE_FED_DATA_DIR", "/tmp/fed"),
            ("CHRONICLE_FED_CACHE_TIMEOUT_MS", "5000"),
            ("CHRONICLE_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.store.data_dir, "/tmp/fed");
        assert_eq!(config.store.registry_path(), PathBuf::from("/tmp/fed/metric_ids.json"));
        assert_eq!(config.federation.cache_timeout_ms, 5_000);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_bad_timeout_override_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|key| {
            (key == "CHRONICLE_FED_CACHE_TIMEOUT_MS").then(|| "soon".to_string())
        });
        assert_eq!(config.federation.cache_timeout_ms, 600_000);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = Config::load(Path::new("/nonexistent/federation.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
