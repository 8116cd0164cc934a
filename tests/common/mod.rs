/// Shared test utilities for dbclient integration tests
use dbclient::descriptor::Target;
use dbclient::driver::Driver;
use dbclient::error::DriverError;
use dbclient::logging::LoggingConfig;
use futures::future::{BoxFuture, FutureExt};
use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::Dispatch;

/// What the scripted driver does on one open call
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
pub enum Step {
    /// The open call fails with this message
    Fail(&'static str),
    /// The open call succeeds and the connection answers pings
    Open,
    /// The open call succeeds but the ping fails
    OpenUnhealthy,
}

/// Connection handed out by [`ScriptedDriver`]
#[derive(Debug, PartialEq, Eq)]
pub struct FakeConnection {
    pub id: u32,
    healthy: bool,
}

/// Call counters, shared with the test after the driver moves into a connector
#[derive(Debug, Default)]
pub struct DriverStats {
    pub opens: AtomicU32,
    pub pings: AtomicU32,
    pub closes: AtomicU32,
    pub last_target: Mutex<Option<String>>,
}

#[allow(dead_code)]
impl DriverStats {
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> u32 {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn last_target(&self) -> Option<String> {
        self.last_target.lock().unwrap().clone()
    }
}

/// Driver that follows a fixed script of outcomes; fails once the script runs out
pub struct ScriptedDriver {
    steps: Mutex<VecDeque<Step>>,
    stats: Arc<DriverStats>,
}

#[allow(dead_code)]
impl ScriptedDriver {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> (Self, Arc<DriverStats>) {
        let stats = Arc::new(DriverStats::default());
        let driver = Self {
            steps: Mutex::new(steps.into_iter().collect()),
            stats: stats.clone(),
        };
        (driver, stats)
    }

    /// Fails `failures` times, then opens a healthy connection
    pub fn failing_then_open(failures: usize) -> (Self, Arc<DriverStats>) {
        let steps = std::iter::repeat(Step::Fail("connection refused"))
            .take(failures)
            .chain(std::iter::once(Step::Open));
        Self::new(steps)
    }

    /// Fails every attempt
    pub fn always_failing() -> (Self, Arc<DriverStats>) {
        Self::new([])
    }
}

impl Driver for ScriptedDriver {
    type Connection = FakeConnection;

    fn open<'a>(
        &'a self,
        target: &'a Target,
    ) -> BoxFuture<'a, Result<FakeConnection, DriverError>> {
        let id = self.stats.opens.fetch_add(1, Ordering::SeqCst) + 1;
        *self.stats.last_target.lock().unwrap() = Some(target.connection_string().into_owned());

        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Fail("script exhausted"));

        let result = match step {
            Step::Fail(message) => Err(DriverError::Rejected(format!("{message} (open #{id})"))),
            Step::Open => Ok(FakeConnection { id, healthy: true }),
            Step::OpenUnhealthy => Ok(FakeConnection { id, healthy: false }),
        };
        futures::future::ready(result).boxed()
    }

    fn ping<'a>(
        &'a self,
        connection: &'a FakeConnection,
    ) -> BoxFuture<'a, Result<(), DriverError>> {
        self.stats.pings.fetch_add(1, Ordering::SeqCst);
        let result = if connection.healthy {
            Ok(())
        } else {
            Err(DriverError::Rejected(format!(
                "ping failed on connection #{}",
                connection.id
            )))
        };
        futures::future::ready(result).boxed()
    }

    fn close(&self, _connection: FakeConnection) -> BoxFuture<'_, ()> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(()).boxed()
    }
}

/// In-memory log sink for asserting on connector output
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[allow(dead_code)]
impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatch writing plain-text `dbclient=info` output into this buffer
    pub fn dispatch(&self) -> Dispatch {
        self.dispatch_with_filter("dbclient=info")
    }

    /// Like [`dispatch`](Self::dispatch) with a custom filter
    pub fn dispatch_with_filter(&self, filter: &str) -> Dispatch {
        let writer = self.clone();
        LoggingConfig {
            filter: filter.to_string(),
            ansi: false,
            ..LoggingConfig::default()
        }
        .dispatch_with_writer(move || writer.clone())
        .unwrap()
    }

    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }

    /// Number of lines containing `needle`
    pub fn count(&self, needle: &str) -> usize {
        self.contents().lines().filter(|line| line.contains(needle)).count()
    }
}
