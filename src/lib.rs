// Courier - typed request/response dispatch for Rust
//
// Commands and queries are routed to exactly one registered handler through a
// behavior pipeline compiled once at startup, with retry, circuit breaker and
// timeout strategies available as behaviors or on their own.

// Re-export core functionality
pub use courier_core::*;

// Re-export optional crates
#[cfg(feature = "config")]
pub use courier_config;

#[cfg(feature = "log")]
pub use courier_log;

// Re-export for handler and behavior implementations
pub use async_trait::async_trait;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        AnyRequest,
        AnyResponse,
        BoxError,
        CancellationToken,
        DispatchError,
        DispatchOptions,
        DispatchResult,
        Dispatcher,
        HandlerCatalog,
        HandlerModule,
        Next,
        PipelineBehavior,
        Request,
        RequestBehavior,
        RequestContext,
        RequestHandler,
        RequestKind,
        Services,
        TypedNext,
        ValidationError,
        ValidationErrors,
        Validator,
        async_trait,
        for_request,
        module_fn,
    };

    #[cfg(feature = "config")]
    pub use courier_config::{Settings, SettingsLoader};
}
