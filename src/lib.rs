//! `dbclient` - PostgreSQL connection helper
//!
//! Opens a database connection from a descriptor, retrying failed attempts
//! with a fixed delay up to a bounded number of attempts, and hands the live
//! handle to the caller.

#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    missing_docs,
    rust_2018_idioms
)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

/// Configuration file loading
pub mod config;
pub mod connector;
pub mod descriptor;
pub mod driver;
/// Error types
pub mod error;
pub mod logging;
pub mod retry;

pub use config::Config;
pub use connector::{
    connect, connect_development, connect_from_config, connect_str, connect_with_params,
    ConnectReport, Connector, ConnectorOptions, ConnectorState,
};
pub use descriptor::{ConnectionDescriptor, SslMode, Target};
pub use driver::{Driver, PgConnection, PostgresDriver};
pub use error::{ConnectError, DriverError, Result};
pub use logging::LoggingConfig;
pub use retry::{RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
