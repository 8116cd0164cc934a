//! Connection descriptors
//!
//! A descriptor identifies a PostgreSQL endpoint: host, credentials, database
//! name, port and TLS mode. It renders to the libpq key-value form consumed by
//! `tokio-postgres`:
//!
//! ```text
//! host=<H> user=<U> password=<P> dbname=<D> port=<PORT> sslmode=<MODE>
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use dbclient::ConnectionDescriptor;
//!
//! let descriptor = ConnectionDescriptor::new("localhost", "app", "secret", "appdb", 5432);
//! assert_eq!(
//!     descriptor.connection_string(),
//!     "host=localhost user=app password=secret dbname=appdb port=5432 sslmode=disable"
//! );
//! ```

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tokio_postgres::config::Host;

/// Port used when a parsed descriptor does not name one
pub const DEFAULT_PORT: u16 = 5432;

const REDACTED_PASSWORD: &str = "********";

/// Errors produced while turning text into a [`ConnectionDescriptor`]
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// The driver could not parse the descriptor text
    #[error("Invalid connection descriptor: {0}")]
    Parse(#[from] tokio_postgres::Error),

    /// No host was given
    #[error("Connection descriptor has no host")]
    MissingHost,

    /// The host is not a TCP host name (e.g. a unix socket directory)
    #[error("Unsupported host in connection descriptor: {0}")]
    UnsupportedHost(String),

    /// No user was given
    #[error("Connection descriptor has no user")]
    MissingUser,
}

/// TLS negotiation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    /// Never use TLS
    #[default]
    Disable,
    /// Use TLS when the server supports it
    Prefer,
    /// Refuse to connect without TLS
    Require,
}

impl SslMode {
    /// The value written after `sslmode=`
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Prefer => "prefer",
            Self::Require => "require",
        }
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<tokio_postgres::config::SslMode> for SslMode {
    fn from(mode: tokio_postgres::config::SslMode) -> Self {
        match mode {
            tokio_postgres::config::SslMode::Disable => Self::Disable,
            tokio_postgres::config::SslMode::Require => Self::Require,
            _ => Self::Prefer,
        }
    }
}

/// Where and how to connect. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    host: String,
    user: String,
    password: String,
    dbname: String,
    port: u16,
    ssl_mode: SslMode,
}

impl ConnectionDescriptor {
    /// Build a descriptor from discrete parameters, with TLS disabled
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        dbname: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            password: password.into(),
            dbname: dbname.into(),
            port,
            ssl_mode: SslMode::Disable,
        }
    }

    /// Descriptor for the containerized development database
    /// (`dbpostgres`, `docker`/`docker`, database `docker`, port 5432).
    ///
    /// Only meant for local development; there is intentionally no
    /// `Default` implementation.
    #[must_use]
    pub fn development() -> Self {
        Self::new("dbpostgres", "docker", "docker", "docker", DEFAULT_PORT)
    }

    /// Copy of this descriptor with a different TLS mode
    #[must_use]
    pub fn with_ssl_mode(mut self, ssl_mode: SslMode) -> Self {
        self.ssl_mode = ssl_mode;
        self
    }

    /// Database host
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Database user
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Database password
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Database name
    #[must_use]
    pub fn dbname(&self) -> &str {
        &self.dbname
    }

    /// Database port
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// TLS mode
    #[must_use]
    pub const fn ssl_mode(&self) -> SslMode {
        self.ssl_mode
    }

    /// Render the key-value connection string handed to the driver
    #[must_use]
    pub fn connection_string(&self) -> String {
        self.render(&self.password)
    }

    fn render(&self, password: &str) -> String {
        let mut out = String::with_capacity(96);
        let port = self.port.to_string();
        let pairs = [
            ("host", self.host.as_str()),
            ("user", self.user.as_str()),
            ("password", password),
            ("dbname", self.dbname.as_str()),
            ("port", port.as_str()),
            ("sslmode", self.ssl_mode.as_str()),
        ];
        for (i, (key, value)) in pairs.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(key);
            out.push('=');
            push_value(&mut out, value);
        }
        out
    }
}

/// Append a value, single-quoting it when the driver's parser would
/// otherwise split or mangle it
fn push_value(out: &mut String, value: &str) {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '\\');
    if !needs_quotes {
        out.push_str(value);
        return;
    }

    out.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(REDACTED_PASSWORD))
    }
}

// Keep the password out of debug output as well
impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &REDACTED_PASSWORD)
            .field("dbname", &self.dbname)
            .field("port", &self.port)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

impl TryFrom<&tokio_postgres::Config> for ConnectionDescriptor {
    type Error = DescriptorError;

    fn try_from(config: &tokio_postgres::Config) -> Result<Self, Self::Error> {
        let host = match config.get_hosts().first() {
            Some(Host::Tcp(host)) => host.clone(),
            Some(other) => return Err(DescriptorError::UnsupportedHost(format!("{other:?}"))),
            None => return Err(DescriptorError::MissingHost),
        };
        let user = config
            .get_user()
            .ok_or(DescriptorError::MissingUser)?
            .to_string();
        let password = config
            .get_password()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default();
        // libpq falls back to the user name when no database is given
        let dbname = config.get_dbname().unwrap_or(user.as_str()).to_string();
        let port = config.get_ports().first().copied().unwrap_or(DEFAULT_PORT);

        Ok(Self {
            host,
            user,
            password,
            dbname,
            port,
            ssl_mode: config.get_ssl_mode().into(),
        })
    }
}

/// Parses either the key-value form or a `postgres://` URL
impl FromStr for ConnectionDescriptor {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: tokio_postgres::Config = s.parse()?;
        Self::try_from(&config)
    }
}

/// What a connector hands to the driver's open call
#[derive(Clone, PartialEq, Eq)]
pub enum Target {
    /// A structured descriptor, rendered with [`ConnectionDescriptor::connection_string`]
    Descriptor(ConnectionDescriptor),
    /// A descriptor string passed to the driver verbatim
    Raw(String),
}

impl Target {
    /// The string the driver parses
    #[must_use]
    pub fn connection_string(&self) -> Cow<'_, str> {
        match self {
            Self::Descriptor(descriptor) => Cow::Owned(descriptor.connection_string()),
            Self::Raw(raw) => Cow::Borrowed(raw),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Descriptor(descriptor) => fmt::Display::fmt(descriptor, f),
            Self::Raw(raw) => match raw.parse::<ConnectionDescriptor>() {
                Ok(descriptor) => fmt::Display::fmt(&descriptor, f),
                Err(_) => f.write_str("<unparsed descriptor>"),
            },
        }
    }
}

// Raw strings may carry a password
impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Descriptor(_) => f.debug_tuple("Descriptor").field(&self.to_string()).finish(),
            Self::Raw(_) => f.debug_tuple("Raw").field(&self.to_string()).finish(),
        }
    }
}

impl From<ConnectionDescriptor> for Target {
    fn from(descriptor: ConnectionDescriptor) -> Self {
        Self::Descriptor(descriptor)
    }
}

impl From<String> for Target {
    fn from(raw: String) -> Self {
        Self::Raw(raw)
    }
}

impl From<&str> for Target {
    fn from(raw: &str) -> Self {
        Self::Raw(raw.to_string())
    }
}
