//! Logging configuration
//!
//! Connectors log through `tracing`. A [`LoggingConfig`] builds a
//! self-contained [`Dispatch`] that can be handed to one connector (or shared
//! between several) without touching the process-wide subscriber. Programs
//! that want a global subscriber call [`LoggingConfig::init`] themselves.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Dispatch;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Errors that can occur while building a logging dispatch
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The filter directive could not be parsed
    #[error("Invalid log filter '{filter}': {source}")]
    Filter {
        /// The offending directive
        filter: String,
        /// Parser error
        source: tracing_subscriber::filter::ParseError,
    },

    /// A global subscriber was already installed
    #[error("Global logger already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::dispatcher::SetGlobalDefaultError),
}

/// How connector events are filtered and formatted
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `dbclient=info,warn`
    pub filter: String,
    /// Include the event target
    pub with_target: bool,
    /// Include the emitting thread id
    pub with_thread_ids: bool,
    /// Include the source file
    pub with_file: bool,
    /// Include the source line
    pub with_line_number: bool,
    /// Emit ANSI colors
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "dbclient=info,warn".to_string(),
            with_target: true,
            with_thread_ids: true,
            with_file: true,
            with_line_number: true,
            ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Use `RUST_LOG` when set, this config's filter otherwise
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(filter) = std::env::var(EnvFilter::DEFAULT_ENV) {
            config.filter = filter;
        }
        config
    }

    /// Build a dispatch that writes to stderr
    pub fn dispatch(&self) -> Result<Dispatch, LoggingError> {
        self.dispatch_with_writer(std::io::stderr)
    }

    /// Build a dispatch that writes through `make_writer`
    pub fn dispatch_with_writer<W>(&self, make_writer: W) -> Result<Dispatch, LoggingError>
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let env_filter =
            EnvFilter::try_new(&self.filter).map_err(|source| LoggingError::Filter {
                filter: self.filter.clone(),
                source,
            })?;

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(self.with_target)
            .with_thread_ids(self.with_thread_ids)
            .with_file(self.with_file)
            .with_line_number(self.with_line_number)
            .with_ansi(self.ansi)
            .with_writer(make_writer)
            .finish();

        Ok(Dispatch::new(subscriber))
    }

    /// Install this configuration as the process-wide subscriber
    pub fn init(&self) -> Result<(), LoggingError> {
        tracing::dispatcher::set_global_default(self.dispatch()?)?;
        Ok(())
    }
}
