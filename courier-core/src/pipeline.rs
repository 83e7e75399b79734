//! Pipeline compilation.
//!
//! At startup every request type known to the registry gets one
//! [`CompiledPipeline`]: the applicable behaviors folded, outermost first,
//! around the invocation of its handler. The resulting
//! [`CompiledPipelineTable`] is immutable and read without locks by every
//! dispatch; nothing is resolved per call except the handler instance.

use crate::behavior::{ChainFn, Next, PipelineBehavior, chain_fn};
use crate::behaviors::ValidationBehavior;
use crate::error::{DispatchError, DispatchResult};
use crate::handler::RequestContext;
use crate::options::DispatchOptions;
use crate::registry::{HandlerBinding, HandlerRegistry};
use crate::request::{AnyRequest, AnyResponse, Request, RequestDescriptor};
use futures_util::future::BoxFuture;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Precomputed execution unit for one request type.
pub struct CompiledPipeline {
    descriptor: RequestDescriptor,
    handler_type: &'static str,
    module: &'static str,
    behaviors: Vec<&'static str>,
    chain: ChainFn,
}

impl CompiledPipeline {
    /// Request type served.
    pub fn descriptor(&self) -> &RequestDescriptor {
        &self.descriptor
    }

    /// Handler type at the end of the chain.
    pub fn handler_type(&self) -> &'static str {
        self.handler_type
    }

    /// Module that registered the handler.
    pub fn module(&self) -> &'static str {
        self.module
    }

    /// Behavior names, outermost first.
    pub fn behaviors(&self) -> &[&'static str] {
        &self.behaviors
    }

    pub(crate) fn invoke(
        &self,
        request: AnyRequest,
        ctx: RequestContext,
    ) -> BoxFuture<'static, DispatchResult<AnyResponse>> {
        (self.chain)(request, ctx)
    }
}

impl std::fmt::Debug for CompiledPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledPipeline")
            .field("request", &self.descriptor.type_name)
            .field("handler", &self.handler_type)
            .field("behaviors", &self.behaviors)
            .finish()
    }
}

/// Read-only request type → compiled pipeline table.
#[derive(Debug, Default)]
pub struct CompiledPipelineTable {
    pipelines: HashMap<TypeId, CompiledPipeline>,
}

impl CompiledPipelineTable {
    /// Pipeline for a request type id.
    pub fn get(&self, type_id: TypeId) -> Option<&CompiledPipeline> {
        self.pipelines.get(&type_id)
    }

    /// Pipeline for request type `R`.
    pub fn get_for<R: Request>(&self) -> Option<&CompiledPipeline> {
        self.get(TypeId::of::<R>())
    }

    /// Check if request type `R` has a pipeline.
    pub fn contains<R: Request>(&self) -> bool {
        self.pipelines.contains_key(&TypeId::of::<R>())
    }

    /// Behavior names in the compiled order of `R`'s pipeline.
    pub fn behavior_names<R: Request>(&self) -> Option<&[&'static str]> {
        self.get_for::<R>().map(CompiledPipeline::behaviors)
    }

    /// Iterate over all pipelines (unordered).
    pub fn iter(&self) -> impl Iterator<Item = &CompiledPipeline> {
        self.pipelines.values()
    }

    /// Number of compiled pipelines.
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

/// Builds the compiled pipeline table.
pub struct PipelineCompiler<'a> {
    registry: &'a HandlerRegistry,
    behaviors: &'a [Arc<dyn PipelineBehavior>],
    options: &'a DispatchOptions,
}

impl<'a> PipelineCompiler<'a> {
    /// Create a compiler over discovered bindings and host behaviors
    /// (outermost first).
    pub fn new(
        registry: &'a HandlerRegistry,
        behaviors: &'a [Arc<dyn PipelineBehavior>],
        options: &'a DispatchOptions,
    ) -> Self {
        Self {
            registry,
            behaviors,
            options,
        }
    }

    /// Compile every request type known to the registry.
    ///
    /// Fails with [`DispatchError::AmbiguousHandlers`] for the first request
    /// type (in discovery order) bound to several handlers while multiple
    /// handlers are not allowed. When they are, the first binding wins.
    pub fn compile(&self) -> DispatchResult<CompiledPipelineTable> {
        let mut table = CompiledPipelineTable::default();

        for descriptor in self.registry.request_types() {
            let binding = self.resolve(descriptor)?;
            let pipeline = self.compile_one(*descriptor, binding);

            debug!(
                request = descriptor.type_name,
                handler = pipeline.handler_type,
                behaviors = ?pipeline.behaviors,
                "Compiled pipeline"
            );
            table.pipelines.insert(descriptor.type_id, pipeline);
        }

        info!(
            pipelines = table.len(),
            behaviors = self.behaviors.len(),
            "Dispatch pipelines compiled"
        );

        Ok(table)
    }

    fn resolve(&self, descriptor: &RequestDescriptor) -> DispatchResult<&'a HandlerBinding> {
        let bindings = self.registry.bindings(descriptor.type_id);
        let [first, shadowed @ ..] = bindings else {
            return Err(DispatchError::HandlerNotFound {
                request_type: descriptor.type_name,
            });
        };

        if !shadowed.is_empty() {
            if !self.options.allow_multiple_handlers {
                return Err(DispatchError::AmbiguousHandlers {
                    request_type: descriptor.type_name,
                    handlers: bindings.iter().map(HandlerBinding::handler_type).collect(),
                });
            }
            warn!(
                request = descriptor.type_name,
                handler = first.handler_type(),
                shadowed = ?shadowed.iter().map(HandlerBinding::handler_type).collect::<Vec<_>>(),
                "Multiple handlers bound, using the first"
            );
        }

        Ok(first)
    }

    fn compile_one(&self, descriptor: RequestDescriptor, binding: &HandlerBinding) -> CompiledPipeline {
        let mut applicable: Vec<Arc<dyn PipelineBehavior>> = self
            .behaviors
            .iter()
            .filter(|b| b.applies_to(&descriptor))
            .cloned()
            .collect();

        let validators = self.registry.validators(descriptor.type_id);
        if self.options.auto_validate_requests && !validators.is_empty() {
            applicable.push(Arc::new(ValidationBehavior::new(descriptor, validators.to_vec())));
        }

        let invoker = binding.invoker.clone();
        let mut chain: ChainFn = chain_fn(move |request, ctx| {
            let invoker = invoker.clone();
            Box::pin(async move { invoker.invoke(request, ctx).await })
        });

        for behavior in applicable.iter().rev() {
            let behavior = behavior.clone();
            let next = Next::new(chain);
            chain = chain_fn(move |request, ctx| {
                let behavior = behavior.clone();
                let next = next.clone();
                Box::pin(async move { behavior.handle(request, ctx, next).await })
            });
        }

        CompiledPipeline {
            descriptor,
            handler_type: binding.handler_type(),
            module: binding.module(),
            behaviors: applicable.iter().map(|b| b.name()).collect(),
            chain,
        }
    }
}
