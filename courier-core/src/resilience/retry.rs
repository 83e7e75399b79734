//! Retry with configurable backoff.
//!
//! ## Example
//!
//! ```rust,ignore
//! use courier_core::resilience::{BackoffStrategy, Retry, RetryConfig};
//! use std::time::Duration;
//!
//! let retry = Retry::new(RetryConfig {
//!     max_retry_attempts: 3,
//!     backoff: BackoffStrategy::exponential(Duration::from_millis(100), 2.0),
//!     ..Default::default()
//! });
//!
//! let result = retry
//!     .call(&cancellation, |token| async move { inventory.reserve(&token).await })
//!     .await;
//! ```

use crate::error::{DispatchError, DispatchResult};
use crate::options::RetryOptions;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Predicate deciding whether a failure is worth another attempt.
pub type RetryPredicate = Arc<dyn Fn(&DispatchError) -> bool + Send + Sync>;

/// Backoff strategy for retries.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// No delay between retries.
    None,
    /// Constant delay between retries.
    Constant(Duration),
    /// `initial * multiplier^n` before retry `n` (0-indexed).
    Exponential {
        /// Delay before the first retry.
        initial: Duration,
        /// Growth factor applied after every retry.
        multiplier: f64,
    },
}

impl BackoffStrategy {
    /// Create constant backoff.
    pub fn constant(delay: Duration) -> Self {
        Self::Constant(delay)
    }

    /// Create exponential backoff.
    pub fn exponential(initial: Duration, multiplier: f64) -> Self {
        Self::Exponential {
            initial,
            multiplier,
        }
    }

    /// Calculate the delay before retry `retry` (0-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Constant(d) => *d,
            Self::Exponential {
                initial,
                multiplier,
            } => {
                let factor = multiplier.powi(retry as i32);
                Duration::try_from_secs_f64(initial.as_secs_f64() * factor)
                    .unwrap_or(Duration::MAX)
            }
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(1), 2.0)
    }
}

/// Retry configuration.
#[derive(Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt (total invocations = this + 1).
    pub max_retry_attempts: u32,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Which failures are retried.
    pub retry_on: RetryPredicate,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetryOptions::default())
    }
}

impl From<&RetryOptions> for RetryConfig {
    fn from(options: &RetryOptions) -> Self {
        Self {
            max_retry_attempts: options.max_retry_attempts,
            backoff: BackoffStrategy::exponential(
                options.initial_delay(),
                options.backoff_factor,
            ),
            retry_on: Arc::new(DispatchError::is_transient),
        }
    }
}

impl RetryConfig {
    /// Create a configuration with the given retry count and default backoff.
    pub fn new(max_retry_attempts: u32) -> Self {
        Self {
            max_retry_attempts,
            ..Default::default()
        }
    }

    /// Set the backoff strategy.
    pub fn backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Only retry failures matching `predicate`.
    pub fn retry_on<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&DispatchError) -> bool + Send + Sync + 'static,
    {
        self.retry_on = Arc::new(predicate);
        self
    }

    /// Retry every failure except cancellation.
    pub fn retry_all(self) -> Self {
        self.retry_on(|_| true)
    }
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retry_attempts", &self.max_retry_attempts)
            .field("backoff", &self.backoff)
            .finish()
    }
}

/// Retry executor.
#[derive(Clone, Debug)]
pub struct Retry {
    config: RetryConfig,
}

impl Retry {
    /// Create a new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create from options.
    pub fn from_options(options: &RetryOptions) -> Self {
        Self::new(RetryConfig::from(options))
    }

    /// Get the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `f` until it succeeds, fails with a non-retryable error, or the
    /// retries are used up.
    ///
    /// `Cancelled` and registration errors come back unchanged. Any other
    /// final failure is reported as [`DispatchError::RetryExhausted`] with
    /// the number of invocations made and the last failure as its source.
    pub async fn call<F, Fut, T>(&self, cancellation: &CancellationToken, mut f: F) -> DispatchResult<T>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = DispatchResult<T>>,
    {
        let mut retry = 0u32;

        loop {
            if cancellation.is_cancelled() {
                return Err(DispatchError::Cancelled);
            }

            let attempt = retry + 1;
            let error = match f(cancellation.clone()).await {
                Ok(result) => {
                    if retry > 0 {
                        debug!(attempt, "Retry succeeded");
                    }
                    return Ok(result);
                }
                Err(e) => e,
            };

            if error.is_cancelled() || error.is_configuration() {
                return Err(error);
            }

            if !(self.config.retry_on)(&error) {
                debug!(attempt, error = %error, "Failure is not retryable");
                return Err(exhausted(attempt, error));
            }

            if retry >= self.config.max_retry_attempts {
                warn!(
                    attempt,
                    max_retry_attempts = self.config.max_retry_attempts,
                    error = %error,
                    "Final retry attempt failed"
                );
                return Err(exhausted(attempt, error));
            }

            let delay = self.config.backoff.delay_for_retry(retry);
            debug!(
                attempt,
                delay = ?delay,
                error = %error,
                "Retry attempt failed, waiting before retry"
            );

            if delay > Duration::ZERO {
                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => return Err(DispatchError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            retry += 1;
        }
    }
}

fn exhausted(attempts: u32, error: DispatchError) -> DispatchError {
    DispatchError::RetryExhausted {
        attempts,
        source: Box::new(error),
    }
}
