// Configuration validation

use crate::{ConfigError, Result};
use courier_core::{
    CircuitBreakerOptions, DispatchOptions, ResilienceOptions, RetryOptions, TimeoutOptions,
};

/// Trait for validating configuration
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Configuration validator with rules
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate that a count is at least `min`
    pub fn at_least(value: u32, min: u32, field: &str) -> Result<()> {
        if value < min {
            return Err(ConfigError::ValidationError(format!(
                "{} must be at least {}, got {}",
                field, min, value
            )));
        }
        Ok(())
    }

    /// Validate that a value is finite and strictly positive
    pub fn positive(value: f64, field: &str) -> Result<()> {
        if !value.is_finite() || value <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "{} must be greater than 0, got {}",
                field, value
            )));
        }
        Ok(())
    }

    /// Validate that a value is finite and strictly greater than `min`
    pub fn greater_than(value: f64, min: f64, field: &str) -> Result<()> {
        if !value.is_finite() || value <= min {
            return Err(ConfigError::ValidationError(format!(
                "{} must be greater than {}, got {}",
                field, min, value
            )));
        }
        Ok(())
    }
}

// Any timeout is accepted: zero or negative disables it.
impl Validate for DispatchOptions {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

impl Validate for RetryOptions {
    fn validate(&self) -> Result<()> {
        ConfigValidator::at_least(self.max_retry_attempts, 1, "retry.max_retry_attempts")?;
        ConfigValidator::positive(self.initial_delay_seconds, "retry.initial_delay_seconds")?;
        ConfigValidator::greater_than(self.backoff_factor, 1.0, "retry.backoff_factor")
    }
}

impl Validate for CircuitBreakerOptions {
    fn validate(&self) -> Result<()> {
        ConfigValidator::at_least(self.failure_threshold, 1, "circuit_breaker.failure_threshold")?;
        ConfigValidator::positive(
            self.duration_of_break_seconds,
            "circuit_breaker.duration_of_break_seconds",
        )
    }
}

impl Validate for TimeoutOptions {
    fn validate(&self) -> Result<()> {
        ConfigValidator::positive(self.timeout_seconds, "timeout.timeout_seconds")
    }
}

impl Validate for ResilienceOptions {
    fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        self.timeout.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_least_validation() {
        assert!(ConfigValidator::at_least(1, 1, "field").is_ok());
        assert!(ConfigValidator::at_least(0, 1, "field").is_err());
    }

    #[test]
    fn test_positive_validation() {
        assert!(ConfigValidator::positive(0.01, "field").is_ok());
        assert!(ConfigValidator::positive(0.0, "field").is_err());
        assert!(ConfigValidator::positive(-1.0, "field").is_err());
        assert!(ConfigValidator::positive(f64::NAN, "field").is_err());
    }

    #[test]
    fn test_greater_than_validation() {
        assert!(ConfigValidator::greater_than(2.0, 1.0, "field").is_ok());
        assert!(ConfigValidator::greater_than(1.0, 1.0, "field").is_err());
        assert!(ConfigValidator::greater_than(f64::INFINITY, 1.0, "field").is_err());
    }

    #[test]
    fn test_default_options_are_valid() {
        assert!(ResilienceOptions::default().validate().is_ok());
        assert!(DispatchOptions::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_retry_options() {
        let options = RetryOptions {
            max_retry_attempts: 0,
            ..RetryOptions::default()
        };
        let err = options.validate().unwrap_err();
        assert!(err.to_string().contains("retry.max_retry_attempts"));

        let options = RetryOptions {
            backoff_factor: 1.0,
            ..RetryOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_invalid_breaker_and_timeout() {
        let breaker = CircuitBreakerOptions {
            failure_threshold: 0,
            ..CircuitBreakerOptions::default()
        };
        assert!(breaker.validate().is_err());

        let timeout = TimeoutOptions { timeout_seconds: 0.0 };
        assert!(timeout.validate().is_err());
    }
}
