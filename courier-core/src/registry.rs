//! Handler discovery.
//!
//! Hosts hand the registry an explicit list of [`HandlerModule`]s. Each module
//! registers its handlers (and optionally validators) into a
//! [`HandlerCatalog`]; the registry merges the catalogs into an immutable
//! request-type → handler-bindings map. Duplicate bindings are recorded, not
//! rejected: whether ambiguity is an error is decided by the pipeline
//! compiler from [`DispatchOptions`](crate::DispatchOptions).

use crate::error::DispatchResult;
use crate::handler::{ErasedHandler, HandlerSource, RequestHandler, TypedHandler};
use crate::request::{Request, RequestDescriptor, RequestKind};
use crate::services::Services;
use crate::validation::{ErasedValidator, TypedValidator, Validator};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A source of handler registrations.
pub trait HandlerModule: Send + Sync {
    /// Module name (for logging and diagnostics)
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Register this module's handlers and validators.
    fn register(&self, catalog: &mut HandlerCatalog);
}

/// Module built from a closure.
pub struct FnModule<F> {
    name: &'static str,
    register: F,
}

/// Create a named module from a registration closure.
pub fn module_fn<F>(name: &'static str, register: F) -> FnModule<F>
where
    F: Fn(&mut HandlerCatalog) + Send + Sync,
{
    FnModule { name, register }
}

impl<F> HandlerModule for FnModule<F>
where
    F: Fn(&mut HandlerCatalog) + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn register(&self, catalog: &mut HandlerCatalog) {
        (self.register)(catalog)
    }
}

/// Relation between a request type and one handler type.
#[derive(Clone)]
pub struct HandlerBinding {
    request: RequestDescriptor,
    handler_type: &'static str,
    module: &'static str,
    pub(crate) invoker: Arc<dyn ErasedHandler>,
}

impl HandlerBinding {
    /// Request type served by this binding.
    pub fn request(&self) -> &RequestDescriptor {
        &self.request
    }

    /// Handler type name.
    pub fn handler_type(&self) -> &'static str {
        self.handler_type
    }

    /// Name of the module that registered the binding.
    pub fn module(&self) -> &'static str {
        self.module
    }
}

impl std::fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("request", &self.request.type_name)
            .field("response", &self.request.response_type)
            .field("handler", &self.handler_type)
            .field("module", &self.module)
            .finish()
    }
}

/// Registration sink handed to a [`HandlerModule`].
pub struct HandlerCatalog {
    module: &'static str,
    bindings: Vec<HandlerBinding>,
    validators: Vec<(RequestDescriptor, Arc<dyn ErasedValidator>)>,
}

impl HandlerCatalog {
    fn new(module: &'static str) -> Self {
        Self {
            module,
            bindings: Vec::new(),
            validators: Vec::new(),
        }
    }

    /// Register a handler instance shared by every dispatch.
    pub fn handler<R, H>(&mut self, handler: H) -> &mut Self
    where
        R: Request,
        H: RequestHandler<R>,
    {
        self.handler_arc::<R, H>(Arc::new(handler))
    }

    /// Register an already shared handler instance.
    pub fn handler_arc<R, H>(&mut self, handler: Arc<H>) -> &mut Self
    where
        R: Request,
        H: RequestHandler<R>,
    {
        self.bind::<R, H>(HandlerSource::Instance(handler))
    }

    /// Register a handler constructed from the active scope on every dispatch.
    pub fn handler_factory<R, H, F>(&mut self, factory: F) -> &mut Self
    where
        R: Request,
        H: RequestHandler<R>,
        F: Fn(&Services) -> DispatchResult<H> + Send + Sync + 'static,
    {
        self.bind::<R, H>(HandlerSource::Factory(Arc::new(factory)))
    }

    /// Register a validator for request type `R`.
    pub fn validator<R, V>(&mut self, validator: V) -> &mut Self
    where
        R: Request,
        V: Validator<R>,
    {
        self.validators.push((
            RequestDescriptor::of::<R>(),
            Arc::new(TypedValidator::<R, V>::new(validator)),
        ));
        self
    }

    fn bind<R, H>(&mut self, source: HandlerSource<H>) -> &mut Self
    where
        R: Request,
        H: RequestHandler<R>,
    {
        self.bindings.push(HandlerBinding {
            request: RequestDescriptor::of::<R>(),
            handler_type: std::any::type_name::<H>(),
            module: self.module,
            invoker: Arc::new(TypedHandler::<R, H>::new(source)),
        });
        self
    }
}

/// Immutable request-type → handler-bindings map.
#[derive(Default)]
pub struct HandlerRegistry {
    order: Vec<RequestDescriptor>,
    bindings: HashMap<TypeId, Vec<HandlerBinding>>,
    validators: HashMap<TypeId, Vec<Arc<dyn ErasedValidator>>>,
    modules: Vec<&'static str>,
}

impl HandlerRegistry {
    /// Scan the given modules and build the binding map.
    ///
    /// Bindings keep discovery order: modules in the order given, handlers
    /// in the order each module registered them.
    pub fn discover(modules: &[Arc<dyn HandlerModule>]) -> Self {
        let mut registry = Self::default();

        for module in modules {
            let mut catalog = HandlerCatalog::new(module.name());
            module.register(&mut catalog);

            debug!(
                module = module.name(),
                handlers = catalog.bindings.len(),
                validators = catalog.validators.len(),
                "Discovered handler module"
            );

            registry.modules.push(module.name());
            for binding in catalog.bindings {
                let type_id = binding.request.type_id;
                if !registry.bindings.contains_key(&type_id) {
                    registry.order.push(binding.request);
                }
                registry.bindings.entry(type_id).or_default().push(binding);
            }
            for (descriptor, validator) in catalog.validators {
                registry
                    .validators
                    .entry(descriptor.type_id)
                    .or_default()
                    .push(validator);
            }
        }

        registry
    }

    /// Request types with at least one binding, in discovery order.
    pub fn request_types(&self) -> impl Iterator<Item = &RequestDescriptor> {
        self.order.iter()
    }

    /// Bindings for a request type id.
    pub fn bindings(&self, type_id: TypeId) -> &[HandlerBinding] {
        self.bindings
            .get(&type_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Bindings for request type `R`.
    pub fn bindings_for<R: Request>(&self) -> &[HandlerBinding] {
        self.bindings(TypeId::of::<R>())
    }

    /// Request types bound to more than one handler.
    pub fn ambiguous(&self) -> impl Iterator<Item = &RequestDescriptor> {
        self.order
            .iter()
            .filter(|d| self.bindings(d.type_id).len() > 1)
    }

    pub(crate) fn validators(&self, type_id: TypeId) -> &[Arc<dyn ErasedValidator>] {
        self.validators
            .get(&type_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Check if any validator is registered for a request type.
    pub fn has_validator(&self, type_id: TypeId) -> bool {
        !self.validators(type_id).is_empty()
    }

    /// Number of handler bindings serving command request types.
    pub fn command_handler_count(&self) -> usize {
        self.count_handlers(RequestKind::Command)
    }

    /// Number of handler bindings serving query request types.
    pub fn query_handler_count(&self) -> usize {
        self.count_handlers(RequestKind::Query)
    }

    fn count_handlers(&self, kind: RequestKind) -> usize {
        self.order
            .iter()
            .filter(|d| d.kind == kind)
            .map(|d| self.bindings(d.type_id).len())
            .sum()
    }

    /// Names of the scanned modules, in scan order.
    pub fn modules(&self) -> &[&'static str] {
        &self.modules
    }

    /// Number of distinct request types bound.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if no request type is bound.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("modules", &self.modules)
            .field("request_types", &self.order.len())
            .finish()
    }
}
