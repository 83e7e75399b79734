use crate::behavior::{Next, PipelineBehavior};
use crate::error::{DispatchError, DispatchResult};
use crate::handler::RequestContext;
use crate::request::{AnyRequest, AnyResponse, RequestDescriptor};
use crate::validation::{ErasedValidator, ValidationErrors};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Runs every validator registered for a request type before its handler.
///
/// All validators run; their errors are merged and the handler is skipped
/// when any rule fails.
pub struct ValidationBehavior {
    request: RequestDescriptor,
    validators: Vec<Arc<dyn ErasedValidator>>,
}

impl ValidationBehavior {
    pub(crate) fn new(request: RequestDescriptor, validators: Vec<Arc<dyn ErasedValidator>>) -> Self {
        Self {
            request,
            validators,
        }
    }

    /// Number of validators run for the request type.
    pub fn validator_count(&self) -> usize {
        self.validators.len()
    }
}

#[async_trait]
impl PipelineBehavior for ValidationBehavior {
    fn name(&self) -> &'static str {
        "validation"
    }

    fn applies_to(&self, descriptor: &RequestDescriptor) -> bool {
        *descriptor == self.request
    }

    async fn handle(
        &self,
        request: AnyRequest,
        ctx: RequestContext,
        next: Next,
    ) -> DispatchResult<AnyResponse> {
        let mut errors = ValidationErrors::default();
        for validator in &self.validators {
            if let Err(found) = validator.validate_dyn(&*request).await {
                debug!(
                    request = self.request.type_name,
                    validator = validator.validator_type(),
                    errors = found.len(),
                    "Request failed validation"
                );
                errors.merge(found);
            }
        }

        if !errors.is_empty() {
            return Err(DispatchError::Validation(errors));
        }

        next.run(request, ctx).await
    }
}
