//! Timeout for operations.
//!
//! ## Example
//!
//! ```rust,ignore
//! use courier_core::resilience::Timeout;
//! use std::time::Duration;
//!
//! let timeout = Timeout::with_duration(Duration::from_secs(5));
//!
//! let result = timeout
//!     .call(&cancellation, |token| async move { slow_operation(token).await })
//!     .await;
//! ```

use crate::error::{DispatchError, DispatchResult};
use crate::options::TimeoutOptions;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Timeout configuration.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Name reported in the timeout error and logs.
    pub name: String,
    /// Timeout duration.
    pub duration: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            duration: TimeoutOptions::default().timeout(),
        }
    }
}

impl TimeoutConfig {
    /// Create a new timeout configuration.
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            ..Default::default()
        }
    }

    /// Set the name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl From<&TimeoutOptions> for TimeoutConfig {
    fn from(options: &TimeoutOptions) -> Self {
        Self::new(options.timeout())
    }
}

/// Timeout executor.
#[derive(Clone, Debug)]
pub struct Timeout {
    config: TimeoutConfig,
}

impl Timeout {
    /// Create a new timeout executor.
    pub fn new(config: TimeoutConfig) -> Self {
        Self { config }
    }

    /// Create with a duration.
    pub fn with_duration(duration: Duration) -> Self {
        Self::new(TimeoutConfig::new(duration))
    }

    /// Get the timeout duration.
    pub fn duration(&self) -> Duration {
        self.config.duration
    }

    /// Run `f` with a deadline.
    ///
    /// `f` receives a child of `cancellation` that is cancelled when the
    /// deadline passes, so cooperative work stops too. Caller cancellation
    /// wins over the deadline and is reported as `Cancelled`.
    pub async fn call<F, Fut, T>(&self, cancellation: &CancellationToken, f: F) -> DispatchResult<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = DispatchResult<T>>,
    {
        let linked = cancellation.child_token();
        let operation = f(linked.clone());

        tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(DispatchError::Cancelled),
            result = operation => result,
            _ = tokio::time::sleep(self.config.duration) => {
                linked.cancel();
                warn!(
                    name = %self.config.name,
                    duration = ?self.config.duration,
                    "Operation timed out"
                );
                Err(DispatchError::timeout(self.config.name.clone(), self.config.duration))
            }
        }
    }
}

/// Run a fallible operation with a deadline.
///
/// ```
/// use courier_core::{CancellationToken, DispatchError, with_timeout};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let token = CancellationToken::new();
/// let value = with_timeout(Duration::from_secs(1), &token, |_| async {
///     Ok::<_, DispatchError>(7)
/// })
/// .await
/// .unwrap();
/// assert_eq!(value, 7);
/// # });
/// ```
pub async fn with_timeout<F, Fut, T>(
    duration: Duration,
    cancellation: &CancellationToken,
    f: F,
) -> DispatchResult<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = DispatchResult<T>>,
{
    Timeout::with_duration(duration).call(cancellation, f).await
}
