//! # Connector
//!
//! Produces a live database connection from a descriptor, tolerating
//! transient failures. Each attempt opens a connection and, unless disabled,
//! pings it; an attempt that fails either step is retried after a fixed
//! delay until the retry budget is spent.
//!
//! ```text
//! Idle -> Attempting -> Connected
//!                    -> Exhausted
//! ```
//!
//! A connector holds at most one connection. Callers never see a handle
//! together with an error.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use dbclient::{ConnectionDescriptor, Connector, PostgresDriver};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let descriptor = ConnectionDescriptor::new("localhost", "postgres", "secret", "app", 5432);
//! let mut connector = Connector::new(PostgresDriver::new(), descriptor);
//! let connection = connector.connect().await?;
//! connection.client().simple_query("SELECT 1").await?;
//! connector.close().await;
//! # Ok(())
//! # }
//! ```

use crate::config::Config;
use crate::descriptor::{ConnectionDescriptor, Target};
use crate::driver::{Driver, PostgresDriver};
use crate::error::{ConnectError, DriverError};
use crate::retry::{RetryPolicy, RetryResult, Sleeper, TokioSleeper};
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, warn, Dispatch};

/// Lifecycle of a connector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    /// No attempt made since creation or the last close
    Idle,
    /// An attempt is in flight. A run whose future is dropped falls back
    /// to `Idle`.
    Attempting,
    /// A live connection is held
    Connected,
    /// The last run spent its whole retry budget
    Exhausted,
}

/// Connector behavior
#[derive(Debug, Clone)]
pub struct ConnectorOptions {
    /// Attempt budget and delay
    pub retry: RetryPolicy,
    /// Ping each freshly opened connection before accepting it
    pub verify: bool,
    /// Where this connector's events go; `None` uses the ambient subscriber
    pub logging: Option<Dispatch>,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            verify: true,
            logging: None,
        }
    }
}

impl ConnectorOptions {
    /// Set the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enable or disable the ping after open
    #[must_use]
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Send this connector's events to `dispatch`
    #[must_use]
    pub fn with_logging(mut self, dispatch: Dispatch) -> Self {
        self.logging = Some(dispatch);
        self
    }
}

/// Summary of the most recent [`Connector::connect`] run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectReport {
    /// Attempts made
    pub attempts: u32,
    /// When the first attempt started
    pub started_at: DateTime<Utc>,
    /// Time spent, sleeps included
    pub elapsed: Duration,
    /// Whether the run ended with a live connection
    pub connected: bool,
}

/// Retry-connect wrapper around a [`Driver`]
pub struct Connector<D: Driver, S: Sleeper = TokioSleeper> {
    driver: D,
    sleeper: S,
    target: Target,
    options: ConnectorOptions,
    state: ConnectorState,
    connection: Option<D::Connection>,
    last_report: Option<ConnectReport>,
}

impl<D: Driver> Connector<D> {
    /// Create an idle connector for `target` with default options
    pub fn new(driver: D, target: impl Into<Target>) -> Self {
        Self {
            driver,
            sleeper: TokioSleeper,
            target: target.into(),
            options: ConnectorOptions::default(),
            state: ConnectorState::Idle,
            connection: None,
            last_report: None,
        }
    }
}

impl<D: Driver, S: Sleeper> Connector<D, S> {
    /// Replace the options
    #[must_use]
    pub fn with_options(mut self, options: ConnectorOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the sleeper used between attempts
    pub fn with_sleeper<T: Sleeper>(self, sleeper: T) -> Connector<D, T> {
        Connector {
            driver: self.driver,
            sleeper,
            target: self.target,
            options: self.options,
            state: self.state,
            connection: self.connection,
            last_report: self.last_report,
        }
    }

    /// What this connector connects to
    pub const fn target(&self) -> &Target {
        &self.target
    }

    /// Current options
    pub const fn options(&self) -> &ConnectorOptions {
        &self.options
    }

    /// Current lifecycle state
    pub const fn state(&self) -> ConnectorState {
        self.state
    }

    /// The live connection, if any
    pub const fn connection(&self) -> Option<&D::Connection> {
        self.connection.as_ref()
    }

    /// Whether a live connection is held
    pub const fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Summary of the last run, if one happened
    pub const fn last_report(&self) -> Option<&ConnectReport> {
        self.last_report.as_ref()
    }

    /// Connect, retrying failed attempts with a fixed delay.
    ///
    /// Returns the held connection without new attempts when already
    /// connected.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::Exhausted`] carrying the last attempt's error
    /// once the retry budget is spent.
    pub async fn connect(&mut self) -> Result<&D::Connection, ConnectError> {
        let connection = match self.connection.take() {
            Some(connection) => {
                let target = &self.target;
                with_logging(self.options.logging.as_ref(), async move {
                    debug!("Reusing existing connection to {}", target);
                })
                .await;
                connection
            }
            None => self.establish().await?,
        };
        let connection: &D::Connection = self.connection.insert(connection);
        Ok(connection)
    }

    async fn establish(&mut self) -> Result<D::Connection, ConnectError> {
        let state = AttemptingGuard::enter(&mut self.state);
        let started_at = Utc::now();
        let started = Instant::now();

        let run = attempt_loop(&self.driver, &self.sleeper, &self.target, &self.options);
        let result = with_logging(self.options.logging.as_ref(), run).await;

        let attempts = result.attempts();
        let connected = matches!(result, RetryResult::Success { .. });
        self.last_report = Some(ConnectReport {
            attempts,
            started_at,
            elapsed: started.elapsed(),
            connected,
        });

        match result {
            RetryResult::Success { value, .. } => {
                state.finish(ConnectorState::Connected);
                Ok(value)
            }
            RetryResult::Failed { last_error, .. } => {
                state.finish(ConnectorState::Exhausted);
                Err(ConnectError::Exhausted {
                    attempts,
                    source: last_error,
                })
            }
        }
    }

    /// Release the held connection through the driver and return to `Idle`
    pub async fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            let driver = &self.driver;
            let target = &self.target;
            with_logging(self.options.logging.as_ref(), async move {
                driver.close(connection).await;
                info!("Closed connection to {}", target);
            })
            .await;
        }
        self.state = ConnectorState::Idle;
    }

    /// Hand the connection to the caller, consuming the connector
    pub fn into_connection(self) -> Option<D::Connection> {
        self.connection
    }
}

impl<D: Driver, S: Sleeper> fmt::Debug for Connector<D, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("target", &self.target.to_string())
            .field("state", &self.state)
            .field("options", &self.options)
            .field("last_report", &self.last_report)
            .finish_non_exhaustive()
    }
}

/// Holds a connector in `Attempting` and drops it back to `Idle` if the run
/// is cancelled before it finishes
struct AttemptingGuard<'a> {
    state: &'a mut ConnectorState,
}

impl<'a> AttemptingGuard<'a> {
    fn enter(state: &'a mut ConnectorState) -> Self {
        *state = ConnectorState::Attempting;
        Self { state }
    }

    fn finish(self, outcome: ConnectorState) {
        *self.state = outcome;
    }
}

impl Drop for AttemptingGuard<'_> {
    fn drop(&mut self) {
        if *self.state == ConnectorState::Attempting {
            *self.state = ConnectorState::Idle;
        }
    }
}

async fn with_logging<F: Future>(logging: Option<&Dispatch>, future: F) -> F::Output {
    match logging {
        Some(dispatch) => future.with_subscriber(dispatch.clone()).await,
        None => future.await,
    }
}

async fn attempt_loop<D: Driver, S: Sleeper>(
    driver: &D,
    sleeper: &S,
    target: &Target,
    options: &ConnectorOptions,
) -> RetryResult<D::Connection, DriverError> {
    let policy = options.retry;
    let max_attempts = policy.effective_max_attempts();
    let verify = options.verify;

    let result = policy
        .execute(sleeper, |attempt| async move {
            match open_verified(driver, target, verify).await {
                Ok(connection) => {
                    info!(
                        "Connection established to {} on attempt {}/{}",
                        target, attempt, max_attempts
                    );
                    Ok(connection)
                }
                Err(e) => {
                    warn!(
                        "Connection attempt {}/{} to {} failed: {}",
                        attempt, max_attempts, target, e
                    );
                    Err(e)
                }
            }
        })
        .await;

    if let RetryResult::Failed {
        last_error,
        attempts,
        total_duration,
    } = &result
    {
        error!(
            "Giving up on {} after {} attempts in {:?}: {}",
            target, attempts, total_duration, last_error
        );
    }

    result
}

/// One attempt: open, then ping when `verify` is set
async fn open_verified<D: Driver>(
    driver: &D,
    target: &Target,
    verify: bool,
) -> Result<D::Connection, DriverError> {
    let connection = driver.open(target).await?;
    if !verify {
        return Ok(connection);
    }

    let ping = driver.ping(&connection).await;
    match ping {
        Ok(()) => Ok(connection),
        Err(e) => {
            driver.close(connection).await;
            Err(e)
        }
    }
}

async fn connect_target(
    target: Target,
    options: ConnectorOptions,
) -> Result<Connector<PostgresDriver>, ConnectError> {
    let mut connector = Connector::new(PostgresDriver::new(), target).with_options(options);
    connector.connect().await?;
    Ok(connector)
}

/// Connect to `descriptor` with the default 10 x 5s budget
pub async fn connect(
    descriptor: ConnectionDescriptor,
) -> Result<Connector<PostgresDriver>, ConnectError> {
    connect_target(descriptor.into(), ConnectorOptions::default()).await
}

/// Connect using discrete parameters, with TLS disabled
pub async fn connect_with_params(
    host: &str,
    user: &str,
    password: &str,
    dbname: &str,
    port: u16,
) -> Result<Connector<PostgresDriver>, ConnectError> {
    connect(ConnectionDescriptor::new(host, user, password, dbname, port)).await
}

/// Connect to the containerized development database
pub async fn connect_development() -> Result<Connector<PostgresDriver>, ConnectError> {
    connect(ConnectionDescriptor::development()).await
}

/// Connect using a raw descriptor string, passed to the driver verbatim
pub async fn connect_str(raw: &str) -> Result<Connector<PostgresDriver>, ConnectError> {
    connect_target(raw.into(), ConnectorOptions::default()).await
}

/// Connect using a loaded [`Config`]
pub async fn connect_from_config(
    config: &Config,
) -> Result<Connector<PostgresDriver>, ConnectError> {
    let descriptor = config.database.descriptor()?;
    let options = config.connector_options()?;
    connect_target(descriptor.into(), options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RecordingSleeper;
    use futures::future::{BoxFuture, FutureExt};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` opens, then succeeds
    struct FlakyDriver {
        failures: u32,
        opens: AtomicU32,
    }

    impl FlakyDriver {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                opens: AtomicU32::new(0),
            }
        }
    }

    impl Driver for FlakyDriver {
        type Connection = u32;

        fn open<'a>(&'a self, _target: &'a Target) -> BoxFuture<'a, Result<u32, DriverError>> {
            let n = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
            let result = if n <= self.failures {
                Err(DriverError::Rejected(format!("refused #{n}")))
            } else {
                Ok(n)
            };
            futures::future::ready(result).boxed()
        }

        fn ping<'a>(&'a self, _connection: &'a u32) -> BoxFuture<'a, Result<(), DriverError>> {
            futures::future::ready(Ok(())).boxed()
        }

        fn close(&self, _connection: u32) -> BoxFuture<'_, ()> {
            futures::future::ready(()).boxed()
        }
    }

    fn connector(failures: u32) -> (Connector<FlakyDriver, RecordingSleeper>, RecordingSleeper) {
        let sleeper = RecordingSleeper::new();
        let connector = Connector::new(FlakyDriver::new(failures), ConnectionDescriptor::development())
            .with_sleeper(sleeper.clone());
        (connector, sleeper)
    }

    #[tokio::test]
    async fn test_new_connector_is_idle() {
        let (connector, _) = connector(0);
        assert_eq!(connector.state(), ConnectorState::Idle);
        assert!(!connector.is_connected());
        assert!(connector.last_report().is_none());
    }

    #[tokio::test]
    async fn test_connect_first_try() {
        let (mut connector, sleeper) = connector(0);
        assert_eq!(*connector.connect().await.unwrap(), 1);
        assert_eq!(connector.state(), ConnectorState::Connected);
        assert_eq!(connector.last_report().unwrap().attempts, 1);
        assert!(sleeper.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_connect_twice_reuses_handle() {
        let (mut connector, _) = connector(0);
        connector.connect().await.unwrap();
        assert_eq!(*connector.connect().await.unwrap(), 1);
        assert_eq!(connector.driver.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_leaves_no_handle() {
        let (mut connector, sleeper) = connector(u32::MAX);
        let err = connector.connect().await.unwrap_err();
        assert!(matches!(err, ConnectError::Exhausted { attempts: 10, .. }));
        assert_eq!(connector.state(), ConnectorState::Exhausted);
        assert!(connector.connection().is_none());
        assert_eq!(sleeper.sleeps().len(), 9);
        assert!(!connector.last_report().unwrap().connected);
    }

    #[tokio::test]
    async fn test_close_returns_to_idle() {
        let (mut connector, _) = connector(0);
        connector.connect().await.unwrap();
        connector.close().await;
        assert_eq!(connector.state(), ConnectorState::Idle);
        assert!(!connector.is_connected());
    }

    #[tokio::test]
    async fn test_into_connection() {
        let (mut connector, _) = connector(2);
        connector.connect().await.unwrap();
        assert_eq!(connector.into_connection(), Some(3));
    }
}
