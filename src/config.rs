use crate::connector::ConnectorOptions;
use crate::descriptor::{ConnectionDescriptor, SslMode, DEFAULT_PORT};
use crate::logging::{LoggingConfig, LoggingError};
use crate::retry::{RetryPolicy, DEFAULT_DELAY, DEFAULT_MAX_ATTEMPTS};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error occurred while reading config file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error occurred
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML parsing error in a named file
    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        /// File being parsed
        path: PathBuf,
        /// Underlying TOML error
        source: toml::de::Error,
    },

    /// The environment variable holding the password is not set
    #[error("Password environment variable {0} is not set")]
    MissingPasswordEnv(String),

    /// The `[logging]` section could not be turned into a dispatch
    #[error("Logging configuration error: {0}")]
    Logging(#[from] LoggingError),
}

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Database connection configuration
    pub database: DatabaseConfig,
    /// Retry budget
    #[serde(default)]
    pub retry: RetryConfig,
    /// Per-connector logging; when absent the ambient subscriber is used
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

/// Database connection configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    /// Database host
    pub host: String,
    /// Database port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database user
    pub user: String,
    /// Database name
    pub dbname: String,
    /// Environment variable containing the password
    pub password_env: Option<String>,
    /// TLS mode
    #[serde(default)]
    pub sslmode: SslMode,
}

/// Retry budget configuration
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts before giving up
    pub max_attempts: u32,
    /// Pause between attempts, in milliseconds
    pub delay_ms: u64,
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for RetryConfig {
    fn default() -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let delay_ms = DEFAULT_DELAY.as_millis() as u64;
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_ms,
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self::new()
            .with_max_attempts(config.max_attempts)
            .with_delay(Duration::from_millis(config.delay_ms))
    }
}

impl DatabaseConfig {
    /// Build a descriptor, reading the password from `password_env`.
    ///
    /// No `password_env` means an empty password.
    pub fn descriptor(&self) -> Result<ConnectionDescriptor, ConfigError> {
        let password = match &self.password_env {
            Some(var) => {
                debug!("Reading password from environment variable: {}", var);
                env::var(var).map_err(|_| ConfigError::MissingPasswordEnv(var.clone()))?
            }
            None => String::new(),
        };

        Ok(
            ConnectionDescriptor::new(&self.host, &self.user, password, &self.dbname, self.port)
                .with_ssl_mode(self.sslmode),
        )
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Connector options described by the `[retry]` and `[logging]` sections
    pub fn connector_options(&self) -> Result<ConnectorOptions, ConfigError> {
        let mut options = ConnectorOptions::default().with_retry(self.retry.into());
        if let Some(logging) = &self.logging {
            options = options.with_logging(logging.dispatch()?);
        }
        Ok(options)
    }
}
