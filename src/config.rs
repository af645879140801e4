//! Configuration management for the contributions client
//!
//! Provides layered configuration with zero-config defaults: built-in
//! constants, then an optional TOML file, then environment variables
//! (`MPC_HOST`, `MPC_API_KEY`) on top. The API key is never written to the
//! config file by this crate; the environment is the expected source.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::app::client::ClientConfig;
use crate::app::scheduler::RequestScheduler;
use crate::constants::{api, env as env_constants, limits, workers};
use crate::errors::{ClientError, ConfigError, Result};

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// API endpoint settings
    pub api: ApiConfigToml,
    /// Concurrency settings
    pub workers: WorkersConfigToml,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// TOML-friendly API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfigToml {
    /// API base URL
    pub host: String,
    /// API key; prefer the MPC_API_KEY environment variable
    pub api_key: Option<String>,
    /// Rate limit (requests per second)
    pub rate_limit_rps: u32,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
    /// Maximum retry attempts for transient failures
    pub max_retries: u32,
}

impl Default for ApiConfigToml {
    fn default() -> Self {
        Self {
            host: api::DEFAULT_HOST.to_string(),
            api_key: None,
            rate_limit_rps: limits::DEFAULT_RATE_LIMIT_RPS,
            request_timeout_secs: crate::constants::http::DEFAULT_TIMEOUT.as_secs(),
            max_retries: limits::MAX_RETRIES,
        }
    }
}

/// TOML-friendly concurrency settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfigToml {
    /// Number of concurrent in-flight requests
    pub max_workers: usize,
    /// Wall-clock budget for one orchestrated run, in seconds
    pub timeout_secs: u64,
}

impl Default for WorkersConfigToml {
    fn default() -> Self {
        Self {
            max_workers: workers::DEFAULT_WORKER_COUNT,
            timeout_secs: workers::DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (error, warn, info, debug, trace)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the given path, the default location, or
    /// fall back to built-in defaults when no file exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound {
                        path: path.to_path_buf(),
                    }
                    .into());
                }
                path.to_path_buf()
            }
            None => {
                let Some(default_path) = Self::default_path() else {
                    return Ok(Self::default());
                };
                if !default_path.exists() {
                    debug!("no config file found, using defaults");
                    return Ok(Self::default());
                }
                default_path
            }
        };

        let raw = std::fs::read_to_string(&path).map_err(ConfigError::Io)?;
        let config: AppConfig = toml::from_str(&raw).map_err(ConfigError::InvalidFormat)?;
        debug!(path = %path.display(), "loaded config file");
        config.validate()?;
        Ok(config)
    }

    /// Default config file location under the user config dir
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("contribs-client").join("config.toml"))
    }

    fn validate(&self) -> Result<()> {
        if self.workers.max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "workers.max_workers".to_string(),
                value: "0".to_string(),
                reason: "at least one worker is required".to_string(),
            }
            .into());
        }
        if self.api.rate_limit_rps == 0 {
            return Err(ConfigError::InvalidValue {
                field: "api.rate_limit_rps".to_string(),
                value: "0".to_string(),
                reason: "rate limit must be non-zero".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Resolve the HTTP client configuration, applying env overrides
    ///
    /// Precedence: environment, then config file, then defaults. A missing
    /// API key is a hard error since every endpoint requires one.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let host = env::var(env_constants::HOST).unwrap_or_else(|_| self.api.host.clone());
        let api_key = env::var(env_constants::API_KEY)
            .ok()
            .or_else(|| self.api.api_key.clone())
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)
            .map_err(ClientError::Config)?;

        Ok(ClientConfig {
            host,
            api_key,
            request_timeout: Duration::from_secs(self.api.request_timeout_secs),
            rate_limit_rps: self.api.rate_limit_rps,
            max_retries: self.api.max_retries,
            ..Default::default()
        })
    }

    /// Build a request scheduler from the configured concurrency settings
    pub fn scheduler(&self) -> RequestScheduler {
        RequestScheduler::new(
            self.workers.max_workers,
            Duration::from_secs(self.workers.timeout_secs),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_when_no_file() {
        let config = AppConfig::default();
        assert_eq!(config.api.host, api::DEFAULT_HOST);
        assert_eq!(config.workers.max_workers, workers::DEFAULT_WORKER_COUNT);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/config.toml")));
        assert!(matches!(
            result,
            Err(ClientError::Config(ConfigError::NotFound { .. }))
        ));
    }

    #[test]
    fn test_load_toml_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let config = AppConfig {
            workers: WorkersConfigToml {
                max_workers: 4,
                timeout_secs: 60,
            },
            ..Default::default()
        };
        file.write_all(toml::to_string(&config).unwrap().as_bytes())
            .unwrap();

        let loaded = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(loaded.workers.max_workers, 4);
        assert_eq!(loaded.workers.timeout_secs, 60);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = AppConfig {
            workers: WorkersConfigToml {
                max_workers: 0,
                timeout_secs: 60,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scheduler_from_config() {
        let config = AppConfig::default();
        let scheduler = config.scheduler();
        assert_eq!(scheduler.max_workers(), workers::DEFAULT_WORKER_COUNT);
        assert_eq!(scheduler.timeout(), workers::DEFAULT_TIMEOUT);
    }
}
