//! Retry policy for network operations
//!
//! A failed attempt is retried only when its error reports itself as
//! [`Transient`]. After every transient failure the policy sleeps for the next
//! delay of an exponential schedule (`delay, delay * backoff, delay * backoff^2`, ...)
//! generated by backon, so `max_attempts` attempts see exactly `max_attempts` delays.

use backon::{BackoffBuilder, ExponentialBuilder};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

/// Errors that can tell whether trying again might help
pub trait Transient {
    fn is_transient(&self) -> bool;
}

#[derive(Error, Debug)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    #[error("{operation} failed after {attempts} attempts: {source}")]
    Exhausted {
        operation: String,
        attempts: usize,
        #[source]
        source: E,
    },

    #[error(transparent)]
    Fatal(E),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub backoff: f32,
}

impl Default for RetryPolicy {
    /// 3 attempts, 5 seconds, doubling
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(5),
            backoff: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, initial_delay: Duration, backoff: f32) -> Self {
        Self {
            max_attempts,
            initial_delay,
            backoff,
        }
    }

    /// Delay before the final retry, `initial_delay * backoff^(max_attempts - 1)`
    ///
    /// `None` when the product is not a finite, representable duration.
    pub fn largest_delay(&self) -> Option<Duration> {
        let exponent = i32::try_from(self.max_attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * f64::from(self.backoff).powi(exponent);
        Duration::try_from_secs_f64(secs).ok()
    }

    /// The sleep taken after each failed attempt, in order
    ///
    /// The schedule only grows as documented for a finite `backoff >= 1.0`;
    /// `Config` rejects anything else. Out-of-range values saturate rather
    /// than panic.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let largest = self
            .largest_delay()
            .unwrap_or(Duration::MAX)
            .max(self.initial_delay);

        ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(largest)
            .with_factor(self.backoff)
            .with_max_times(self.max_attempts)
            .build()
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display + std::error::Error + 'static,
    {
        let mut delays = self.delays();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(RetryError::Fatal(e)),
                Err(e) => e,
            };

            if let Some(delay) = delays.next() {
                warn!(
                    operation,
                    attempt,
                    max_attempts = self.max_attempts,
                    delay_secs = delay.as_secs_f32(),
                    error = %err,
                    "Attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }

            if attempt >= self.max_attempts {
                error!(operation, attempts = attempt, error = %err, "Giving up");
                return Err(RetryError::Exhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    source: err,
                });
            }
        }
    }
}
