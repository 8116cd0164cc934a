use crate::config::ConfigError;
use crate::descriptor::DescriptorError;
use thiserror::Error;

/// Failure of a single connection attempt.
///
/// The connector logs these and retries; callers only see one as the
/// `source` of [`ConnectError::Exhausted`].
#[derive(Error, Debug)]
pub enum DriverError {
    /// The PostgreSQL driver rejected the descriptor or the connection failed
    #[error("Postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// A driver refused the attempt for a reason of its own
    #[error("Connection rejected: {0}")]
    Rejected(String),
}

/// Terminal errors returned by connector operations
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Every attempt in the retry budget failed
    #[error("Failed to connect after {attempts} attempts: {source}")]
    Exhausted {
        /// Number of attempts made
        attempts: u32,
        /// The error observed on the last attempt
        source: DriverError,
    },

    /// The configuration could not be turned into a connector
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The descriptor text could not be parsed
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),
}

impl ConnectError {
    /// The last attempt's error, when the retry budget ran out
    #[must_use]
    pub const fn last_error(&self) -> Option<&DriverError> {
        match self {
            Self::Exhausted { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type alias for connector operations
pub type Result<T> = std::result::Result<T, ConnectError>;
