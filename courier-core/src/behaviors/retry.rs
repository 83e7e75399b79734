use crate::behavior::{Next, PipelineBehavior};
use crate::error::{DispatchError, DispatchResult};
use crate::handler::RequestContext;
use crate::options::RetryOptions;
use crate::request::{AnyRequest, AnyResponse, Request, RequestDescriptor};
use crate::resilience::{Retry, RetryConfig};
use async_trait::async_trait;
use std::any::{Any, TypeId};
use std::collections::HashMap;

type Cloner = fn(&(dyn Any + Send + Sync)) -> Option<AnyRequest>;

/// Re-runs the inner pipeline on transient failures.
///
/// Every attempt needs its own copy of the request, so only request types
/// registered with [`retry`](RetryBehavior::retry) (which must be `Clone`)
/// are wrapped; the behavior stays out of every other pipeline.
#[derive(Debug, Clone)]
pub struct RetryBehavior {
    retry: Retry,
    cloners: HashMap<TypeId, Cloner>,
}

impl RetryBehavior {
    /// Create a retry behavior with the given configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            retry: Retry::new(config),
            cloners: HashMap::new(),
        }
    }

    /// Create from options.
    pub fn from_options(options: &RetryOptions) -> Self {
        Self::new(RetryConfig::from(options))
    }

    /// Retry requests of type `R`.
    pub fn retry<R: Request + Clone>(mut self) -> Self {
        self.cloners.insert(TypeId::of::<R>(), clone_request::<R>);
        self
    }

    /// Get the retry executor.
    pub fn executor(&self) -> &Retry {
        &self.retry
    }
}

fn clone_request<R: Request + Clone>(request: &(dyn Any + Send + Sync)) -> Option<AnyRequest> {
    request
        .downcast_ref::<R>()
        .map(|request| Box::new(request.clone()) as AnyRequest)
}

#[async_trait]
impl PipelineBehavior for RetryBehavior {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn applies_to(&self, descriptor: &RequestDescriptor) -> bool {
        self.cloners.contains_key(&descriptor.type_id)
    }

    async fn handle(
        &self,
        request: AnyRequest,
        ctx: RequestContext,
        next: Next,
    ) -> DispatchResult<AnyResponse> {
        let descriptor = *ctx.descriptor();
        let Some(cloner) = self.cloners.get(&descriptor.type_id).copied() else {
            return next.run(request, ctx).await;
        };
        let cancellation = ctx.cancellation().clone();

        self.retry
            .call(&cancellation, |token| {
                let attempt = cloner(&*request);
                let ctx = ctx.with_cancellation(token);
                let next = next.clone();
                async move {
                    let attempt = attempt.ok_or(DispatchError::TypeMismatch {
                        context: "RetryBehavior",
                        expected: descriptor.type_name,
                    })?;
                    next.run(attempt, ctx).await
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behaviors::testing::{context, next_fn};
    use crate::resilience::BackoffStrategy;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    #[derive(Clone)]
    struct GetQuote {
        symbol: String,
    }

    impl Request for GetQuote {
        type Response = String;
        const KIND: crate::request::RequestKind = crate::request::RequestKind::Query;
    }

    struct PlaceOrder;
    impl Request for PlaceOrder {
        type Response = ();
    }

    fn flaky(failures: u32, calls: Arc<AtomicU32>) -> Next {
        next_fn(move |request, _| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                let quote = request
                    .downcast::<GetQuote>()
                    .map_err(|_| DispatchError::operation("wrong request"))?;
                if call < failures {
                    Err(DispatchError::operation("quote service temporarily unavailable"))
                } else {
                    Ok(Box::new(format!("{}: 42", quote.symbol)) as AnyResponse)
                }
            })
        })
    }

    fn behavior(max_retry_attempts: u32) -> RetryBehavior {
        RetryBehavior::new(RetryConfig::new(max_retry_attempts).backoff(BackoffStrategy::None))
            .retry::<GetQuote>()
    }

    #[test]
    fn test_applies_only_to_registered_types() {
        let behavior = behavior(3);
        assert!(behavior.applies_to(&RequestDescriptor::of::<GetQuote>()));
        assert!(!behavior.applies_to(&RequestDescriptor::of::<PlaceOrder>()));
    }

    #[tokio::test]
    async fn test_fresh_copy_for_every_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let request = GetQuote {
            symbol: "ACME".into(),
        };

        let response = behavior(3)
            .handle(
                Box::new(request),
                context::<GetQuote>(CancellationToken::new()),
                flaky(2, calls.clone()),
            )
            .await
            .unwrap();

        assert_eq!(*response.downcast::<String>().unwrap(), "ACME: 42");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_after_all_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let request = GetQuote {
            symbol: "ACME".into(),
        };

        let err = behavior(2)
            .handle(
                Box::new(request),
                context::<GetQuote>(CancellationToken::new()),
                flaky(u32::MAX, calls.clone()),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::RetryExhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
