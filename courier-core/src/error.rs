// Error types for the courier dispatch engine

use crate::validation::ValidationErrors;
use std::time::Duration;
use thiserror::Error;

/// Boxed error produced by handlers and by operations wrapped in a
/// resilience strategy.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the dispatch engine.
pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("No handler registered for request type `{request_type}`")]
    HandlerNotFound { request_type: &'static str },

    #[error(
        "Request type `{request_type}` has {} handlers ({}) and multiple handlers are not allowed",
        .handlers.len(),
        .handlers.join(", ")
    )]
    AmbiguousHandlers {
        request_type: &'static str,
        handlers: Vec<&'static str>,
    },

    #[error("Handler `{handler}` failed: {source}")]
    HandlerInvocation {
        handler: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("Could not resolve handler `{handler}`: {reason}")]
    HandlerResolution {
        handler: &'static str,
        reason: String,
    },

    #[error("`{operation}` timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Retry exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<DispatchError>,
    },

    #[error("Circuit breaker `{name}` is open")]
    CircuitOpen { name: String },

    #[error("Request cancelled by caller")]
    Cancelled,

    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("Operation failed: {0}")]
    Operation(#[source] BoxError),

    #[error("Type mismatch in `{context}`: expected `{expected}`")]
    TypeMismatch {
        context: &'static str,
        expected: &'static str,
    },
}

/// Field-less tag for a [`DispatchError`].
///
/// Transport collaborators own the mapping from kind to their own status
/// vocabulary (HTTP status, gRPC code, exit code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    HandlerNotFound,
    AmbiguousHandlers,
    HandlerInvocation,
    HandlerResolution,
    Timeout,
    RetryExhausted,
    CircuitOpen,
    Cancelled,
    Validation,
    Operation,
    TypeMismatch,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::HandlerNotFound => "handler_not_found",
            Self::AmbiguousHandlers => "ambiguous_handlers",
            Self::HandlerInvocation => "handler_invocation",
            Self::HandlerResolution => "handler_resolution",
            Self::Timeout => "timeout",
            Self::RetryExhausted => "retry_exhausted",
            Self::CircuitOpen => "circuit_open",
            Self::Cancelled => "cancelled",
            Self::Validation => "validation",
            Self::Operation => "operation",
            Self::TypeMismatch => "type_mismatch",
        };
        f.write_str(name)
    }
}

impl DispatchError {
    /// Wrap an arbitrary error as a failed operation.
    pub fn operation(error: impl Into<BoxError>) -> Self {
        Self::Operation(error.into())
    }

    /// Build a timeout failure for the named operation.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Get the tag for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::HandlerNotFound { .. } => ErrorKind::HandlerNotFound,
            Self::AmbiguousHandlers { .. } => ErrorKind::AmbiguousHandlers,
            Self::HandlerInvocation { .. } => ErrorKind::HandlerInvocation,
            Self::HandlerResolution { .. } => ErrorKind::HandlerResolution,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Operation(_) => ErrorKind::Operation,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
        }
    }

    /// Check if this is a registration-shape error (`HandlerNotFound`,
    /// `AmbiguousHandlers`). These are never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::HandlerNotFound { .. } | Self::AmbiguousHandlers { .. }
        )
    }

    /// Check if the caller cancelled the request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this is a timeout raised by the dispatcher or a timeout
    /// strategy.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Default transient-failure classification used by retry.
    ///
    /// Timeouts, I/O errors anywhere in the source chain, and messages
    /// mentioning "timeout" or "temporarily unavailable" are transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::HandlerInvocation { source, .. } | Self::Operation(source) => {
                is_transient_source(source.as_ref())
            }
            _ => false,
        }
    }
}

fn is_transient_source(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(dispatch) = err.downcast_ref::<DispatchError>() {
            return dispatch.is_transient();
        }
        if err.is::<std::io::Error>() || err.is::<tokio::time::error::Elapsed>() {
            return true;
        }
        let message = err.to_string().to_lowercase();
        if message.contains("timeout") || message.contains("temporarily unavailable") {
            return true;
        }
        current = err.source();
    }
    false
}

impl From<ValidationErrors> for DispatchError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}
