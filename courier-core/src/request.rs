//! Request model: commands and queries.

use std::any::{Any, TypeId};
use std::fmt;

/// Whether a request mutates state or only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// A request that may mutate state, optionally returning a response.
    Command,
    /// A request that reads state and returns a response.
    Query,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => write!(f, "command"),
            Self::Query => write!(f, "query"),
        }
    }
}

/// A typed request dispatched to exactly one handler.
///
/// A request whose `Response` is `()` is side-effect only; it can be sent
/// through [`Dispatcher::execute`](crate::Dispatcher::execute).
///
/// ```rust
/// use courier_core::{Request, RequestKind};
///
/// struct GetUser {
///     id: u64,
/// }
///
/// impl Request for GetUser {
///     type Response = Option<String>;
///     const KIND: RequestKind = RequestKind::Query;
/// }
/// ```
pub trait Request: Send + Sync + 'static {
    /// Response produced by the handler
    type Response: Send + 'static;

    /// Command or query; defaults to command
    const KIND: RequestKind = RequestKind::Command;
}

/// Type-erased request as it travels through a compiled pipeline.
pub type AnyRequest = Box<dyn Any + Send + Sync>;

/// Type-erased response as it travels back out of a compiled pipeline.
pub type AnyResponse = Box<dyn Any + Send>;

/// Runtime identity of a request type.
#[derive(Debug, Clone, Copy)]
pub struct RequestDescriptor {
    /// Exact runtime type of the request
    pub type_id: TypeId,
    /// Request type name (for logging and diagnostics)
    pub type_name: &'static str,
    /// Response type name
    pub response_type: &'static str,
    response_type_id: TypeId,
    /// Command or query
    pub kind: RequestKind,
}

impl RequestDescriptor {
    /// Describe a request type.
    pub fn of<R: Request>() -> Self {
        Self {
            type_id: TypeId::of::<R>(),
            type_name: std::any::type_name::<R>(),
            response_type: std::any::type_name::<R::Response>(),
            response_type_id: TypeId::of::<R::Response>(),
            kind: R::KIND,
        }
    }

    /// Check if this descriptor is for the given request type.
    pub fn is<R: Request>(&self) -> bool {
        self.type_id == TypeId::of::<R>()
    }

    /// Check if the request produces no response.
    pub fn returns_unit(&self) -> bool {
        self.response_type_id == TypeId::of::<()>()
    }
}

impl PartialEq for RequestDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for RequestDescriptor {}

impl fmt::Display for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.type_name)
    }
}
