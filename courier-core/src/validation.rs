//! Request validation contracts.
//!
//! Validation rules themselves live with the host application. The core only
//! defines the shape of a validator and the errors it reports; validators are
//! registered per request type through a [`HandlerCatalog`](crate::HandlerCatalog)
//! and attached automatically when `auto_validate_requests` is enabled.

use crate::request::Request;
use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

/// Validation error for a single field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Field name that failed validation
    pub field: String,

    /// Error message
    pub message: String,

    /// Validation constraint that failed
    pub constraint: String,
}

impl ValidationError {
    /// Create a new validation error
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            constraint: "custom".to_string(),
        }
    }

    /// Set the constraint name
    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = constraint.into();
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Collection of validation errors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    pub errors: Vec<ValidationError>,
}

impl ValidationErrors {
    /// Create a new validation errors collection
    pub fn new(errors: Vec<ValidationError>) -> Self {
        Self { errors }
    }

    /// Check if there are any errors
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Get the number of errors
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Add an error
    pub fn add(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Merge errors from another collection
    pub fn merge(&mut self, other: ValidationErrors) {
        self.errors.extend(other.errors);
    }

    /// Errors reported for a given field
    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a ValidationError> {
        self.errors.iter().filter(move |e| e.field == field)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl From<ValidationError> for ValidationErrors {
    fn from(error: ValidationError) -> Self {
        Self::new(vec![error])
    }
}

/// Validator for one request type.
#[async_trait]
pub trait Validator<R: Request>: Send + Sync + 'static {
    /// Validate the request, returning every rule violation found.
    async fn validate(&self, request: &R) -> Result<(), ValidationErrors>;
}

/// Validator stored by request `TypeId` and invoked on type-erased requests.
#[async_trait]
pub(crate) trait ErasedValidator: Send + Sync {
    fn validator_type(&self) -> &'static str;

    async fn validate_dyn(&self, request: &(dyn Any + Send + Sync)) -> Result<(), ValidationErrors>;
}

pub(crate) struct TypedValidator<R, V> {
    validator: V,
    _marker: PhantomData<fn(R)>,
}

impl<R, V> TypedValidator<R, V> {
    pub(crate) fn new(validator: V) -> Self {
        Self {
            validator,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<R: Request, V: Validator<R>> ErasedValidator for TypedValidator<R, V> {
    fn validator_type(&self) -> &'static str {
        std::any::type_name::<V>()
    }

    async fn validate_dyn(&self, request: &(dyn Any + Send + Sync)) -> Result<(), ValidationErrors> {
        match request.downcast_ref::<R>() {
            Some(request) => self.validator.validate(request).await,
            None => Err(ValidationError::new("request", "request type mismatch")
                .with_constraint("type")
                .into()),
        }
    }
}
