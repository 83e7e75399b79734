//! # Resilience Strategies
//!
//! Standalone strategies wrapping any cancellable async operation. The
//! resilience behaviors in [`behaviors`](crate::behaviors) apply them to
//! dispatched requests; application code can also use them directly around
//! calls to external services.
//!
//! - **Retry**: bounded re-invocation with exponential backoff
//! - **Circuit Breaker**: fail fast after consecutive failures
//! - **Timeout**: deadline with cooperative cancellation
//!
//! Every strategy takes the caller's [`CancellationToken`](tokio_util::sync::CancellationToken)
//! and hands the operation a token to observe, so strategies compose:
//!
//! ```rust,ignore
//! use courier_core::resilience::{CircuitBreaker, Retry, Timeout};
//!
//! let result = retry
//!     .call(&cancellation, |token| async move {
//!         breaker
//!             .call(&token, |token| async move { timeout.call(&token, fetch).await })
//!             .await
//!     })
//!     .await;
//! ```

mod circuit_breaker;
mod retry;
mod timeout;

pub use circuit_breaker::*;
pub use retry::*;
pub use timeout::*;
