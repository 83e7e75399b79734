//! Request/response dispatch engine for Courier
//!
//! Callers send typed commands and queries; the dispatcher routes each one to
//! exactly one registered handler through a chain of behaviors compiled once
//! at startup.
//!
//! ## Features
//!
//! - **Handler Registry** - Explicit handler modules, discovered in order
//! - **Compiled Pipelines** - One immutable behavior chain per request type
//! - **Dispatcher** - Timeout/cancellation linking, metrics, detailed logging
//! - **Behaviors** - Logging, validation, timeout, retry, circuit breaker, caching
//! - **Resilience** - Retry, circuit breaker and timeout strategies usable on their own
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use courier_core::*;
//! use async_trait::async_trait;
//! use tokio_util::sync::CancellationToken;
//!
//! struct CreateUser {
//!     email: String,
//! }
//!
//! impl Request for CreateUser {
//!     type Response = u64;
//! }
//!
//! struct CreateUserHandler;
//!
//! #[async_trait]
//! impl RequestHandler<CreateUser> for CreateUserHandler {
//!     async fn handle(&self, command: CreateUser, _ctx: &RequestContext) -> Result<u64, BoxError> {
//!         Ok(command.email.len() as u64)
//!     }
//! }
//!
//! struct UsersModule;
//!
//! impl HandlerModule for UsersModule {
//!     fn register(&self, catalog: &mut HandlerCatalog) {
//!         catalog.handler::<CreateUser, _>(CreateUserHandler);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), DispatchError> {
//!     let dispatcher = Dispatcher::builder()
//!         .module(UsersModule)
//!         .behavior(LoggingBehavior::new())
//!         .options(DispatchOptions::new().default_timeout_seconds(5))
//!         .build()?;
//!
//!     let id = dispatcher
//!         .send(CreateUser { email: "ada@example.com".into() }, &CancellationToken::new())
//!         .await?;
//!     println!("created user {id}");
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Multiple Handlers
//!
//! Binding two handlers to one request type fails [`DispatcherBuilder::build`]
//! with [`DispatchError::AmbiguousHandlers`]. With
//! `allow_multiple_handlers` enabled the first binding in discovery order
//! serves the request and the others are logged as shadowed.

pub mod behavior;
pub mod behaviors;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod options;
pub mod pipeline;
pub mod registry;
pub mod request;
pub mod resilience;
pub mod services;
pub mod validation;

pub use behavior::{Next, PipelineBehavior, RequestBehavior, TypedBehavior, TypedNext, for_request};
pub use behaviors::{
    CachingBehavior, CircuitBreakerBehavior, LoggingBehavior, RetryBehavior, TimeoutBehavior,
    ValidationBehavior,
};
pub use dispatcher::{Dispatcher, DispatcherBuilder, DispatcherSummary};
pub use error::{BoxError, DispatchError, DispatchResult, ErrorKind};
pub use handler::{RequestContext, RequestHandler};
pub use metrics::{DispatchMetrics, DispatchOutcome, RequestMetricsSnapshot};
pub use options::{
    CircuitBreakerOptions, DispatchOptions, ResilienceOptions, RetryOptions, TimeoutOptions,
};
pub use pipeline::{CompiledPipeline, CompiledPipelineTable, PipelineCompiler};
pub use registry::{FnModule, HandlerBinding, HandlerCatalog, HandlerModule, HandlerRegistry, module_fn};
pub use resilience::{
    BackoffStrategy, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState, Retry,
    RetryConfig, RetryPredicate, Timeout, TimeoutConfig, with_timeout,
};
pub use request::{AnyRequest, AnyResponse, Request, RequestDescriptor, RequestKind};
pub use services::Services;
pub use validation::{ValidationError, ValidationErrors, Validator};

// Re-exported so hosts and handlers agree on the cancellation type
pub use tokio_util::sync::CancellationToken;
