//! Dispatch and resilience options.
//!
//! Options are plain `serde` structs so hosts can load them from any
//! configuration source. Field names accept both `snake_case` and the
//! PascalCase spelling used by many configuration files
//! (`DefaultTimeoutSeconds`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Process-wide dispatch configuration, fixed once the dispatcher is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchOptions {
    /// Tolerate more than one handler per request type (first match wins)
    #[serde(alias = "AllowMultipleHandlers")]
    pub allow_multiple_handlers: bool,

    /// Attach the validation behavior when a validator exists for the request type
    #[serde(alias = "AutoValidateRequests")]
    pub auto_validate_requests: bool,

    /// Log dispatch start, elapsed time and failures
    #[serde(alias = "EnableDetailedLogging")]
    pub enable_detailed_logging: bool,

    /// Dispatch timeout in seconds; zero or negative disables it
    #[serde(alias = "DefaultTimeoutSeconds")]
    pub default_timeout_seconds: i64,

    /// Record per-request-type counters and durations
    #[serde(alias = "TrackRequestMetrics")]
    pub track_request_metrics: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            allow_multiple_handlers: false,
            auto_validate_requests: true,
            enable_detailed_logging: true,
            default_timeout_seconds: 60,
            track_request_metrics: true,
        }
    }
}

impl DispatchOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow multiple handlers per request type.
    pub fn allow_multiple_handlers(mut self, allow: bool) -> Self {
        self.allow_multiple_handlers = allow;
        self
    }

    /// Enable or disable automatic validation.
    pub fn auto_validate_requests(mut self, enabled: bool) -> Self {
        self.auto_validate_requests = enabled;
        self
    }

    /// Enable or disable detailed logging.
    pub fn enable_detailed_logging(mut self, enabled: bool) -> Self {
        self.enable_detailed_logging = enabled;
        self
    }

    /// Set the dispatch timeout in seconds (zero or negative disables it).
    pub fn default_timeout_seconds(mut self, seconds: i64) -> Self {
        self.default_timeout_seconds = seconds;
        self
    }

    /// Enable or disable request metrics.
    pub fn track_request_metrics(mut self, enabled: bool) -> Self {
        self.track_request_metrics = enabled;
        self
    }

    /// Dispatch timeout, if enabled.
    pub fn default_timeout(&self) -> Option<Duration> {
        (self.default_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.default_timeout_seconds as u64))
    }
}

/// Retry strategy options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Retries after the first attempt
    #[serde(alias = "MaxRetryAttempts")]
    pub max_retry_attempts: u32,

    /// Delay before the first retry
    #[serde(alias = "InitialDelaySeconds")]
    pub initial_delay_seconds: f64,

    /// Multiplier applied to the delay after every retry
    #[serde(alias = "BackoffFactor")]
    pub backoff_factor: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            initial_delay_seconds: 1.0,
            backoff_factor: 2.0,
        }
    }
}

impl RetryOptions {
    /// Delay before the first retry.
    pub fn initial_delay(&self) -> Duration {
        seconds(self.initial_delay_seconds)
    }
}

/// Circuit breaker options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerOptions {
    /// Consecutive failures that open the circuit
    #[serde(alias = "FailureThreshold")]
    pub failure_threshold: u32,

    /// How long the circuit stays open before a trial call
    #[serde(alias = "DurationOfBreakSeconds")]
    pub duration_of_break_seconds: f64,
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            duration_of_break_seconds: 30.0,
        }
    }
}

impl CircuitBreakerOptions {
    /// Break duration.
    pub fn duration_of_break(&self) -> Duration {
        seconds(self.duration_of_break_seconds)
    }
}

/// Timeout strategy options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutOptions {
    #[serde(alias = "TimeoutSeconds")]
    pub timeout_seconds: f64,
}

impl Default for TimeoutOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30.0,
        }
    }
}

impl TimeoutOptions {
    /// Timeout duration.
    pub fn timeout(&self) -> Duration {
        seconds(self.timeout_seconds)
    }
}

/// All resilience options together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceOptions {
    #[serde(alias = "Retry")]
    pub retry: RetryOptions,
    #[serde(alias = "CircuitBreaker")]
    pub circuit_breaker: CircuitBreakerOptions,
    #[serde(alias = "Timeout")]
    pub timeout: TimeoutOptions,
}

/// Shortest duration any resilience option resolves to.
///
/// Zero, negative and NaN seconds clamp up to this; values too large for a
/// `Duration` saturate at `Duration::MAX`.
pub const MIN_DURATION: Duration = Duration::from_millis(1);

fn seconds(value: f64) -> Duration {
    match Duration::try_from_secs_f64(value) {
        Ok(duration) => duration.max(MIN_DURATION),
        Err(_) if value > 0.0 => Duration::MAX,
        Err(_) => MIN_DURATION,
    }
}
