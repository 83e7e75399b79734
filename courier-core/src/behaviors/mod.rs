//! Built-in pipeline behaviors.
//!
//! Install them with [`DispatcherBuilder::behavior`](crate::DispatcherBuilder::behavior);
//! the first installed behavior is the outermost. A typical order is:
//!
//! ```rust,ignore
//! Dispatcher::builder()
//!     .module(OrdersModule)
//!     .behavior(LoggingBehavior::new())
//!     .behavior(TimeoutBehavior::new(Duration::from_secs(5)))
//!     .behavior(RetryBehavior::from_options(&options.retry).retry::<GetQuote>())
//!     .behavior(CircuitBreakerBehavior::from_options(&options.circuit_breaker))
//!     .build()?;
//! ```
//!
//! [`ValidationBehavior`] is never installed by hand: the compiler attaches
//! it, closest to the handler, for request types that have validators.

mod caching;
mod circuit_breaker;
mod logging;
mod retry;
mod timeout;
mod validation;

pub use caching::CachingBehavior;
pub use circuit_breaker::CircuitBreakerBehavior;
pub use logging::LoggingBehavior;
pub use retry::RetryBehavior;
pub use timeout::TimeoutBehavior;
pub use validation::ValidationBehavior;
