use crate::behavior::{Next, PipelineBehavior};
use crate::error::DispatchResult;
use crate::handler::RequestContext;
use crate::options::CircuitBreakerOptions;
use crate::request::{AnyRequest, AnyResponse, RequestDescriptor};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use async_trait::async_trait;
use dashmap::DashMap;
use std::any::TypeId;
use std::sync::Arc;

/// Guards handlers with circuit breakers.
///
/// By default every request type gets its own breaker, named after the
/// request type and created on first use. [`shared`](Self::shared) puts all
/// request types behind one breaker instead, for handlers that call the
/// same dependency.
pub struct CircuitBreakerBehavior {
    config: CircuitBreakerConfig,
    shared: Option<Arc<CircuitBreaker>>,
    breakers: DashMap<TypeId, Arc<CircuitBreaker>>,
}

impl CircuitBreakerBehavior {
    /// One breaker per request type with the given settings.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            shared: None,
            breakers: DashMap::new(),
        }
    }

    /// One breaker per request type, configured from options.
    pub fn from_options(options: &CircuitBreakerOptions) -> Self {
        Self::new(CircuitBreakerConfig::from_options("", options))
    }

    /// Every request type behind the same breaker.
    pub fn shared(breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            config: breaker.config().clone(),
            shared: Some(breaker),
            breakers: DashMap::new(),
        }
    }

    /// Breaker guarding a request type, if one exists yet.
    pub fn breaker_for(&self, type_id: TypeId) -> Option<Arc<CircuitBreaker>> {
        match &self.shared {
            Some(shared) => Some(shared.clone()),
            None => self.breakers.get(&type_id).map(|b| b.clone()),
        }
    }

    /// Statistics of every breaker created so far.
    pub fn stats(&self) -> Vec<CircuitBreakerStats> {
        match &self.shared {
            Some(shared) => vec![shared.stats()],
            None => self.breakers.iter().map(|b| b.stats()).collect(),
        }
    }

    fn breaker(&self, descriptor: &RequestDescriptor) -> Arc<CircuitBreaker> {
        if let Some(shared) = &self.shared {
            return shared.clone();
        }
        self.breakers
            .entry(descriptor.type_id)
            .or_insert_with(|| {
                let mut config = self.config.clone();
                config.name = descriptor.type_name.to_string();
                CircuitBreaker::new(config)
            })
            .clone()
    }
}

#[async_trait]
impl PipelineBehavior for CircuitBreakerBehavior {
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    async fn handle(
        &self,
        request: AnyRequest,
        ctx: RequestContext,
        next: Next,
    ) -> DispatchResult<AnyResponse> {
        let breaker = self.breaker(ctx.descriptor());
        let cancellation = ctx.cancellation().clone();

        breaker
            .call(&cancellation, |token| {
                let ctx = ctx.with_cancellation(token);
                async move { next.run(request, ctx).await }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behaviors::testing::{context, next_fn};
    use crate::error::DispatchError;
    use crate::request::Request;
    use crate::resilience::CircuitState;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Charge;
    impl Request for Charge {
        type Response = ();
    }

    struct Refund;
    impl Request for Refund {
        type Response = ();
    }

    fn failing() -> Next {
        next_fn(|_, _| Box::pin(async { Err(DispatchError::operation("gateway down")) }))
    }

    fn behavior() -> CircuitBreakerBehavior {
        CircuitBreakerBehavior::new(
            CircuitBreakerConfig::new("payments")
                .failure_threshold(2)
                .duration_of_break(Duration::from_secs(30)),
        )
    }

    #[tokio::test]
    async fn test_breaker_per_request_type() {
        let behavior = behavior();

        for _ in 0..2 {
            let _ = behavior
                .handle(Box::new(Charge), context::<Charge>(CancellationToken::new()), failing())
                .await;
        }

        let err = behavior
            .handle(Box::new(Charge), context::<Charge>(CancellationToken::new()), failing())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::CircuitOpen { ref name } if name.ends_with("Charge")));

        let charge = behavior.breaker_for(TypeId::of::<Charge>()).unwrap();
        assert_eq!(charge.state(), CircuitState::Open);
        assert!(behavior.breaker_for(TypeId::of::<Refund>()).is_none());
    }

    #[tokio::test]
    async fn test_shared_breaker_spans_request_types() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::new("gateway").failure_threshold(1));
        let behavior = CircuitBreakerBehavior::shared(breaker.clone());

        let _ = behavior
            .handle(Box::new(Charge), context::<Charge>(CancellationToken::new()), failing())
            .await;
        let err = behavior
            .handle(Box::new(Refund), context::<Refund>(CancellationToken::new()), failing())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::CircuitOpen { .. }));
        assert_eq!(behavior.stats().len(), 1);
        assert_eq!(breaker.total_rejections(), 1);
    }
}
