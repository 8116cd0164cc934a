//! Fixed-delay retry loop
//!
//! The connector retries a failed open a bounded number of times, sleeping a
//! fixed interval between consecutive attempts. There is no backoff and no
//! jitter. Sleeping goes through [`Sleeper`] so tests can run the full
//! 10 x 5s budget without waiting.

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default number of attempts before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default pause between consecutive attempts
pub const DEFAULT_DELAY: Duration = Duration::from_secs(5);

/// Something that can pause the current task
pub trait Sleeper: Send + Sync {
    /// Wait for `duration`
    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()>;
}

/// [`Sleeper`] backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

/// [`Sleeper`] that returns immediately and remembers every requested pause.
///
/// Clones share the same record, so a test can keep one clone and hand the
/// other to a connector.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every pause requested so far, in order
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .map(|sleeps| sleeps.clone())
            .unwrap_or_default()
    }

    /// Sum of all requested pauses
    #[must_use]
    pub fn total(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()> {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        futures::future::ready(()).boxed()
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Fixed pause between consecutive attempts
    pub delay: Duration,
}

/// Result of a retry operation
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded
    Success {
        /// Value produced by the successful attempt
        value: T,
        /// Attempts made, including the successful one
        attempts: u32,
    },

    /// Operation failed on every attempt
    Failed {
        /// Error of the final attempt
        last_error: E,
        /// Attempts made
        attempts: u32,
        /// Wall time spent, sleeps included
        total_duration: Duration,
    },
}

impl<T, E> RetryResult<T, E> {
    /// Number of attempts made
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. } | Self::Failed { attempts, .. } => *attempts,
        }
    }

    /// Convert into a plain `Result`, dropping the bookkeeping
    pub fn into_result(self) -> Result<T, E> {
        match self {
            Self::Success { value, .. } => Ok(value),
            Self::Failed { last_error, .. } => Err(last_error),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the default budget (10 attempts, 5s apart)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum number of attempts. Zero is treated as one.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the pause between attempts
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Attempt budget actually used by [`execute`](Self::execute)
    #[must_use]
    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Total time spent sleeping when every attempt fails, saturating at
    /// [`Duration::MAX`]
    #[must_use]
    pub fn total_budget(&self) -> Duration {
        self.delay.saturating_mul(self.effective_max_attempts() - 1)
    }

    /// Run `operation` until it succeeds or the attempt budget is spent.
    ///
    /// The operation receives the 1-based attempt number. Sleeps happen only
    /// between attempts, never after the last one.
    pub async fn execute<T, E, F, Fut, S>(&self, sleeper: &S, mut operation: F) -> RetryResult<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        S: Sleeper + ?Sized,
    {
        let start_time = Instant::now();
        let max_attempts = self.effective_max_attempts();
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    return RetryResult::Success {
                        value,
                        attempts: attempt,
                    };
                }
                Err(last_error) if attempt >= max_attempts => {
                    return RetryResult::Failed {
                        last_error,
                        attempts: attempt,
                        total_duration: start_time.elapsed(),
                    };
                }
                Err(_) => {
                    debug!(
                        "Attempt {}/{} failed, retrying in {:?}",
                        attempt, max_attempts, self.delay
                    );
                    sleeper.sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
