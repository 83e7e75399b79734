//! The runtime entry point.

use crate::behavior::{PipelineBehavior, downcast_response};
use crate::error::{DispatchError, DispatchResult};
use crate::handler::RequestContext;
use crate::metrics::{DispatchMetrics, DispatchOutcome};
use crate::options::DispatchOptions;
use crate::pipeline::{CompiledPipelineTable, PipelineCompiler};
use crate::registry::{HandlerModule, HandlerRegistry};
use crate::request::{Request, RequestDescriptor};
use crate::services::Services;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counts exposed for health and readiness checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatcherSummary {
    /// Handler bindings serving command request types
    pub command_handlers: usize,
    /// Handler bindings serving query request types
    pub query_handlers: usize,
    /// Request types with a compiled pipeline
    pub compiled_pipelines: usize,
}

/// Builder for [`Dispatcher`].
#[derive(Default)]
pub struct DispatcherBuilder {
    modules: Vec<Arc<dyn HandlerModule>>,
    behaviors: Vec<Arc<dyn PipelineBehavior>>,
    options: DispatchOptions,
    services: Services,
}

impl DispatcherBuilder {
    /// Create a builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler module. Modules are scanned in the order added.
    pub fn module<M: HandlerModule + 'static>(self, module: M) -> Self {
        self.module_arc(Arc::new(module))
    }

    /// Add a shared handler module.
    pub fn module_arc(mut self, module: Arc<dyn HandlerModule>) -> Self {
        self.modules.push(module);
        self
    }

    /// Add a behavior. The first behavior added is the outermost.
    pub fn behavior<B: PipelineBehavior>(self, behavior: B) -> Self {
        self.behavior_arc(Arc::new(behavior))
    }

    /// Add a shared behavior.
    pub fn behavior_arc(mut self, behavior: Arc<dyn PipelineBehavior>) -> Self {
        self.behaviors.push(behavior);
        self
    }

    /// Set dispatch options.
    pub fn options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the root service scope handed to handler factories.
    pub fn services(mut self, services: Services) -> Self {
        self.services = services;
        self
    }

    /// Discover handlers and compile every pipeline.
    pub fn build(self) -> DispatchResult<Dispatcher> {
        let registry = HandlerRegistry::discover(&self.modules);
        let pipelines = PipelineCompiler::new(&registry, &self.behaviors, &self.options).compile()?;

        let summary = DispatcherSummary {
            command_handlers: registry.command_handler_count(),
            query_handlers: registry.query_handler_count(),
            compiled_pipelines: pipelines.len(),
        };

        info!(
            modules = registry.modules().len(),
            command_handlers = summary.command_handlers,
            query_handlers = summary.query_handlers,
            compiled_pipelines = summary.compiled_pipelines,
            default_timeout = ?self.options.default_timeout(),
            "Dispatcher ready"
        );

        let metrics = self
            .options
            .track_request_metrics
            .then(DispatchMetrics::new);

        Ok(Dispatcher {
            inner: Arc::new(DispatcherInner {
                registry,
                pipelines,
                summary,
                options: self.options,
                services: Arc::new(self.services),
                metrics,
            }),
        })
    }
}

struct DispatcherInner {
    registry: HandlerRegistry,
    pipelines: CompiledPipelineTable,
    summary: DispatcherSummary,
    options: DispatchOptions,
    services: Arc<Services>,
    metrics: Option<DispatchMetrics>,
}

/// Routes typed requests to their compiled pipelines.
///
/// Cheap to clone; clones share the same compiled table, service scope and
/// metrics.
///
/// ```rust,ignore
/// let dispatcher = Dispatcher::builder()
///     .module(UsersModule)
///     .behavior(LoggingBehavior::new())
///     .build()?;
///
/// let id = dispatcher.send(CreateUser { name: "ada".into() }, &CancellationToken::new()).await?;
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// Create a builder.
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Dispatch a request and return its handler's response.
    ///
    /// Fails with `Timeout` when the default timeout elapses first and with
    /// `Cancelled` when `cancellation` fires first.
    pub async fn send<R: Request>(
        &self,
        request: R,
        cancellation: &CancellationToken,
    ) -> DispatchResult<R::Response> {
        self.dispatch(request, cancellation, self.inner.services.clone())
            .await
    }

    /// Dispatch a request with extra services layered over the root scope.
    pub async fn send_scoped<R: Request>(
        &self,
        request: R,
        services: Services,
        cancellation: &CancellationToken,
    ) -> DispatchResult<R::Response> {
        let scope = Arc::new(self.inner.services.scoped(services));
        self.dispatch(request, cancellation, scope).await
    }

    /// Dispatch a side-effect-only request.
    pub async fn execute<R>(&self, request: R, cancellation: &CancellationToken) -> DispatchResult<()>
    where
        R: Request<Response = ()>,
    {
        self.send(request, cancellation).await
    }

    /// Dispatch a side-effect-only request with extra services.
    pub async fn execute_scoped<R>(
        &self,
        request: R,
        services: Services,
        cancellation: &CancellationToken,
    ) -> DispatchResult<()>
    where
        R: Request<Response = ()>,
    {
        self.send_scoped(request, services, cancellation).await
    }

    async fn dispatch<R: Request>(
        &self,
        request: R,
        cancellation: &CancellationToken,
        services: Arc<Services>,
    ) -> DispatchResult<R::Response> {
        let descriptor = RequestDescriptor::of::<R>();
        let detailed = self.inner.options.enable_detailed_logging;
        let started = Instant::now();

        if detailed {
            debug!(
                request = descriptor.type_name,
                kind = %descriptor.kind,
                "Dispatching request"
            );
        }

        let result = match self.inner.pipelines.get(descriptor.type_id) {
            Some(pipeline) => {
                let linked = cancellation.child_token();
                let ctx = RequestContext::new(descriptor, linked.clone(), services);
                let invocation = pipeline.invoke(Box::new(request), ctx);

                match self.inner.options.default_timeout() {
                    Some(timeout) => {
                        tokio::select! {
                            biased;
                            _ = cancellation.cancelled() => Err(DispatchError::Cancelled),
                            result = invocation => result,
                            _ = tokio::time::sleep(timeout) => {
                                linked.cancel();
                                Err(DispatchError::timeout(descriptor.type_name, timeout))
                            }
                        }
                    }
                    None => {
                        tokio::select! {
                            biased;
                            _ = cancellation.cancelled() => Err(DispatchError::Cancelled),
                            result = invocation => result,
                        }
                    }
                }
            }
            None => Err(DispatchError::HandlerNotFound {
                request_type: descriptor.type_name,
            }),
        };

        let elapsed = started.elapsed();
        if let Some(metrics) = &self.inner.metrics {
            metrics.record(&descriptor, DispatchOutcome::of(&result), elapsed);
        }

        match &result {
            Ok(_) if detailed => debug!(
                request = descriptor.type_name,
                elapsed_ms = elapsed.as_millis() as u64,
                "Request dispatched"
            ),
            Ok(_) => {}
            Err(e) if e.is_cancelled() => {
                if detailed {
                    debug!(request = descriptor.type_name, "Request cancelled by caller");
                }
            }
            Err(e) if e.is_timeout() => warn!(
                request = descriptor.type_name,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %e,
                "Request timed out"
            ),
            Err(e) if detailed => error!(
                request = descriptor.type_name,
                kind = %e.kind(),
                elapsed_ms = elapsed.as_millis() as u64,
                error = %e,
                "Request failed"
            ),
            Err(_) => {}
        }

        downcast_response::<R>(result?, "Dispatcher::send")
    }

    /// Handler and pipeline counts.
    pub fn summary(&self) -> DispatcherSummary {
        self.inner.summary
    }

    /// Per-request-type metrics, when tracking is enabled.
    pub fn metrics(&self) -> Option<&DispatchMetrics> {
        self.inner.metrics.as_ref()
    }

    /// Compiled pipelines.
    pub fn pipelines(&self) -> &CompiledPipelineTable {
        &self.inner.pipelines
    }

    /// Discovered handler bindings.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    /// Options the dispatcher was built with.
    pub fn options(&self) -> &DispatchOptions {
        &self.inner.options
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("summary", &self.inner.summary)
            .field("options", &self.inner.options)
            .finish()
    }
}
