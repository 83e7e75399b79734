//! Request handlers and the per-dispatch context they run in.

use crate::error::{BoxError, DispatchError, DispatchResult};
use crate::request::{AnyRequest, AnyResponse, Request, RequestDescriptor};
use crate::services::Services;
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Handler for a single request type.
///
/// Return any error type; a [`DispatchError`] passes through the pipeline
/// unchanged (for handlers that dispatch nested requests), everything else
/// is reported as [`DispatchError::HandlerInvocation`] with the original
/// error kept as its source.
///
/// ```rust,ignore
/// struct CreateUserHandler;
///
/// #[async_trait]
/// impl RequestHandler<CreateUser> for CreateUserHandler {
///     async fn handle(&self, command: CreateUser, ctx: &RequestContext) -> Result<u64, BoxError> {
///         if ctx.is_cancelled() {
///             return Err(DispatchError::Cancelled.into());
///         }
///         Ok(42)
///     }
/// }
/// ```
#[async_trait]
pub trait RequestHandler<R: Request>: Send + Sync + 'static {
    /// Handle the request
    async fn handle(&self, request: R, ctx: &RequestContext) -> Result<R::Response, BoxError>;
}

/// Context passed down a compiled pipeline for one dispatch.
#[derive(Clone)]
pub struct RequestContext {
    descriptor: RequestDescriptor,
    cancellation: CancellationToken,
    services: Arc<Services>,
}

impl RequestContext {
    /// Create a context for a dispatch.
    pub fn new(
        descriptor: RequestDescriptor,
        cancellation: CancellationToken,
        services: Arc<Services>,
    ) -> Self {
        Self {
            descriptor,
            cancellation,
            services,
        }
    }

    /// Request type being dispatched.
    pub fn descriptor(&self) -> &RequestDescriptor {
        &self.descriptor
    }

    /// Linked cancellation signal (caller cancellation and timeouts).
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Check if the linked signal has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Active service scope.
    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Same context with a different cancellation signal.
    pub fn with_cancellation(&self, cancellation: CancellationToken) -> Self {
        Self {
            descriptor: self.descriptor,
            cancellation,
            services: self.services.clone(),
        }
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request", &self.descriptor.type_name)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

pub(crate) type HandlerFactoryFn<H> = dyn Fn(&Services) -> DispatchResult<H> + Send + Sync;

/// Where a binding gets its handler instance from.
pub(crate) enum HandlerSource<H> {
    /// One shared instance for every dispatch
    Instance(Arc<H>),
    /// Constructed from the active scope on every dispatch
    Factory(Arc<HandlerFactoryFn<H>>),
}

impl<H> HandlerSource<H> {
    fn resolve(&self, services: &Services) -> DispatchResult<Arc<H>> {
        match self {
            Self::Instance(handler) => Ok(handler.clone()),
            Self::Factory(factory) => factory(services).map(Arc::new),
        }
    }
}

/// Type-erased handler stored in a binding.
#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    async fn invoke(&self, request: AnyRequest, ctx: RequestContext) -> DispatchResult<AnyResponse>;
}

/// Wrapper for typed request handlers
pub(crate) struct TypedHandler<R, H> {
    source: HandlerSource<H>,
    _marker: PhantomData<fn(R)>,
}

impl<R, H> TypedHandler<R, H> {
    pub(crate) fn new(source: HandlerSource<H>) -> Self {
        Self {
            source,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<R: Request, H: RequestHandler<R>> ErasedHandler for TypedHandler<R, H> {
    async fn invoke(&self, request: AnyRequest, ctx: RequestContext) -> DispatchResult<AnyResponse> {
        let request = request
            .downcast::<R>()
            .map_err(|_| DispatchError::TypeMismatch {
                context: std::any::type_name::<H>(),
                expected: std::any::type_name::<R>(),
            })?;

        let handler = self.source.resolve(ctx.services())?;
        match handler.handle(*request, &ctx).await {
            Ok(response) => Ok(Box::new(response)),
            Err(error) => Err(into_dispatch_error(std::any::type_name::<H>(), error)),
        }
    }
}

fn into_dispatch_error(handler: &'static str, error: BoxError) -> DispatchError {
    match error.downcast::<DispatchError>() {
        Ok(dispatch) => *dispatch,
        Err(source) => DispatchError::HandlerInvocation { handler, source },
    }
}
