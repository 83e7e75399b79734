// Pipeline behaviors: cross-cutting wrappers around handler invocation

use crate::error::{DispatchError, DispatchResult};
use crate::handler::RequestContext;
use crate::request::{AnyRequest, AnyResponse, Request, RequestDescriptor};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::marker::PhantomData;
use std::sync::Arc;

/// A compiled step of a pipeline: behaviors wrapped around a handler.
pub(crate) type ChainFn = Arc<
    dyn Fn(AnyRequest, RequestContext) -> BoxFuture<'static, DispatchResult<AnyResponse>>
        + Send
        + Sync,
>;

pub(crate) fn chain_fn<F>(f: F) -> ChainFn
where
    F: Fn(AnyRequest, RequestContext) -> BoxFuture<'static, DispatchResult<AnyResponse>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Continuation to the rest of the pipeline.
///
/// Calling [`Next::run`] invokes the next behavior, or the handler when the
/// caller is the innermost behavior. Not calling it short-circuits the chain.
/// `Next` is cheap to clone, so a behavior may run it more than once (retry)
/// as long as it can produce a fresh request for every run.
#[derive(Clone)]
pub struct Next {
    chain: ChainFn,
}

impl Next {
    pub(crate) fn new(chain: ChainFn) -> Self {
        Self { chain }
    }

    /// Run the rest of the pipeline.
    pub async fn run(&self, request: AnyRequest, ctx: RequestContext) -> DispatchResult<AnyResponse> {
        (self.chain)(request, ctx).await
    }
}

/// Behavior wrapped around handler invocation.
///
/// Behaviors operate on type-erased requests so that one instance can serve
/// every request type. Whether a behavior takes part in a request type's
/// pipeline is decided once, when pipelines are compiled, through
/// [`applies_to`](PipelineBehavior::applies_to).
#[async_trait]
pub trait PipelineBehavior: Send + Sync + 'static {
    /// Behavior name (for logging and diagnostics)
    fn name(&self) -> &'static str;

    /// Whether this behavior wraps pipelines of the given request type.
    fn applies_to(&self, _descriptor: &RequestDescriptor) -> bool {
        true
    }

    /// Process the request and optionally pass it to `next`.
    async fn handle(
        &self,
        request: AnyRequest,
        ctx: RequestContext,
        next: Next,
    ) -> DispatchResult<AnyResponse>;
}

/// Behavior written against one concrete request type.
///
/// Wrap it with [`for_request`] to install it into a dispatcher.
#[async_trait]
pub trait RequestBehavior<R: Request>: Send + Sync + 'static {
    async fn handle(
        &self,
        request: R,
        ctx: RequestContext,
        next: TypedNext<R>,
    ) -> DispatchResult<R::Response>;
}

/// Typed view of [`Next`] for a [`RequestBehavior`].
pub struct TypedNext<R> {
    next: Next,
    _marker: PhantomData<fn(R)>,
}

impl<R: Request> TypedNext<R> {
    /// Run the rest of the pipeline.
    pub async fn run(&self, request: R, ctx: RequestContext) -> DispatchResult<R::Response> {
        let response = self.next.run(Box::new(request), ctx).await?;
        downcast_response::<R>(response, "TypedNext::run")
    }
}

impl<R> Clone for TypedNext<R> {
    fn clone(&self) -> Self {
        Self {
            next: self.next.clone(),
            _marker: PhantomData,
        }
    }
}

/// Adapter installing a [`RequestBehavior`] for its request type only.
pub struct TypedBehavior<R, B> {
    name: &'static str,
    behavior: B,
    _marker: PhantomData<fn(R)>,
}

/// Install a typed behavior for request type `R`.
pub fn for_request<R, B>(name: &'static str, behavior: B) -> TypedBehavior<R, B>
where
    R: Request,
    B: RequestBehavior<R>,
{
    TypedBehavior {
        name,
        behavior,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<R, B> PipelineBehavior for TypedBehavior<R, B>
where
    R: Request,
    B: RequestBehavior<R>,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn applies_to(&self, descriptor: &RequestDescriptor) -> bool {
        descriptor.is::<R>()
    }

    async fn handle(
        &self,
        request: AnyRequest,
        ctx: RequestContext,
        next: Next,
    ) -> DispatchResult<AnyResponse> {
        let request = request
            .downcast::<R>()
            .map_err(|_| DispatchError::TypeMismatch {
                context: self.name,
                expected: std::any::type_name::<R>(),
            })?;
        let next = TypedNext {
            next,
            _marker: PhantomData,
        };
        let response = self.behavior.handle(*request, ctx, next).await?;
        Ok(Box::new(response))
    }
}

pub(crate) fn downcast_response<R: Request>(
    response: AnyResponse,
    context: &'static str,
) -> DispatchResult<R::Response> {
    response
        .downcast::<R::Response>()
        .map(|response| *response)
        .map_err(|_| DispatchError::TypeMismatch {
            context,
            expected: std::any::type_name::<R::Response>(),
        })
}
