//! Connection-open primitive
//!
//! [`Driver`] is the seam between the retry loop and the database driver.
//! [`PostgresDriver`] is the production implementation on `tokio-postgres`.

use crate::descriptor::Target;
use crate::error::DriverError;
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, warn};

/// Opens, checks and releases database connections
pub trait Driver: Send + Sync {
    /// Handle to an open session
    type Connection: Send + Sync;

    /// Open a connection to `target`
    fn open<'a>(&'a self, target: &'a Target) -> BoxFuture<'a, Result<Self::Connection, DriverError>>;

    /// Verify that an open connection is alive
    fn ping<'a>(&'a self, connection: &'a Self::Connection) -> BoxFuture<'a, Result<(), DriverError>>;

    /// Release a connection
    fn close(&self, connection: Self::Connection) -> BoxFuture<'_, ()>;
}

/// Open PostgreSQL session
///
/// `tokio-postgres` splits a session into a [`Client`] and a connection
/// future that performs the I/O; the latter runs as a spawned task owned by
/// this handle.
pub struct PgConnection {
    client: Client,
    task: JoinHandle<()>,
}

impl PgConnection {
    /// The client used to issue queries
    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }

    /// Whether the server side of the session has gone away
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

impl fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgConnection")
            .field("closed", &self.client.is_closed())
            .finish_non_exhaustive()
    }
}

/// [`Driver`] backed by `tokio-postgres`, without TLS
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDriver {
    connect_timeout: Option<Duration>,
}

impl PostgresDriver {
    /// Create a driver with no per-attempt timeout
    #[must_use]
    pub const fn new() -> Self {
        Self {
            connect_timeout: None,
        }
    }

    /// Bound how long a single open may take
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

impl Driver for PostgresDriver {
    type Connection = PgConnection;

    fn open<'a>(&'a self, target: &'a Target) -> BoxFuture<'a, Result<PgConnection, DriverError>> {
        async move {
            let mut config: tokio_postgres::Config = target.connection_string().parse()?;
            if let Some(timeout) = self.connect_timeout {
                config.connect_timeout(timeout);
            }

            let (client, connection) = config.connect(NoTls).await?;
            let task = tokio::spawn(async move {
                if let Err(e) = connection.await {
                    warn!("Postgres connection terminated: {}", e);
                }
            });

            Ok(PgConnection { client, task })
        }
        .boxed()
    }

    fn ping<'a>(&'a self, connection: &'a PgConnection) -> BoxFuture<'a, Result<(), DriverError>> {
        async move {
            connection.client.simple_query("SELECT 1").await?;
            Ok(())
        }
        .boxed()
    }

    fn close(&self, connection: PgConnection) -> BoxFuture<'_, ()> {
        async move {
            let PgConnection { client, task } = connection;
            // Dropping the last client ends the connection future
            drop(client);
            if let Err(e) = task.await {
                warn!("Postgres connection task failed during close: {}", e);
            }
            debug!("Postgres connection closed");
        }
        .boxed()
    }
}
