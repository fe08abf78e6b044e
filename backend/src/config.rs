//! Engine configuration from the environment.
//!
//! Call `dotenvy::dotenv()` before [`EngineConfig::from_env`] to pick up a
//! `.env` file. CLI flags override individual values afterwards.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::registry::DEFAULT_REGISTRY_DIR;

pub const ENV_REGISTRY_DIR: &str = "STEPFLOW_REGISTRY_DIR";
pub const ENV_OUTPUT_DIR: &str = "STEPFLOW_OUTPUT_DIR";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "STEPFLOW_HTTP_TIMEOUT_SECS";
pub const ENV_PORT: &str = "STEPFLOW_PORT";
pub const ENV_MAX_LOGGED_FAILURES: &str = "STEPFLOW_MAX_LOGGED_FAILURES";

/// Runtime settings shared by the CLI and the HTTP server.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Directory of entity definition files
    pub registry_dir: PathBuf,
    /// Where download outputs are written
    pub output_dir: PathBuf,
    /// Timeout of HTTP source fetches
    pub http_timeout: Duration,
    pub port: u16,
    /// Record failures logged in full per run
    pub max_logged_failures: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            registry_dir: PathBuf::from(DEFAULT_REGISTRY_DIR),
            output_dir: PathBuf::from(".stepflow/output"),
            http_timeout: Duration::from_secs(30),
            port: 3000,
            max_logged_failures: 5,
        }
    }
}

impl EngineConfig {
    /// Read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unset variables keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_REGISTRY_DIR).filter(|v| !v.trim().is_empty()) {
            config.registry_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_OUTPUT_DIR).filter(|v| !v.trim().is_empty()) {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_HTTP_TIMEOUT_SECS)? {
            config.http_timeout = Duration::from_secs(secs);
        }
        if let Some(port) = parse_var::<u16>(&lookup, ENV_PORT)? {
            config.port = port;
        }
        if let Some(max) = parse_var::<usize>(&lookup, ENV_MAX_LOGGED_FAILURES)? {
            config.max_logged_failures = max;
        }
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                value: raw,
            }),
    }
}
