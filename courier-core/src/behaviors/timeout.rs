use crate::behavior::{Next, PipelineBehavior};
use crate::error::DispatchResult;
use crate::handler::RequestContext;
use crate::options::TimeoutOptions;
use crate::request::{AnyRequest, AnyResponse};
use crate::resilience::{Timeout, TimeoutConfig};
use async_trait::async_trait;
use std::time::Duration;

/// Bounds the inner pipeline with a deadline.
///
/// On expiry the inner pipeline's cancellation signal is fired and the
/// request fails with [`DispatchError::Timeout`](crate::DispatchError::Timeout)
/// naming the request type.
#[derive(Debug, Clone)]
pub struct TimeoutBehavior {
    duration: Duration,
}

impl TimeoutBehavior {
    /// Create a timeout behavior.
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Create from options.
    pub fn from_options(options: &TimeoutOptions) -> Self {
        Self::new(options.timeout())
    }

    /// Get the timeout duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

#[async_trait]
impl PipelineBehavior for TimeoutBehavior {
    fn name(&self) -> &'static str {
        "timeout"
    }

    async fn handle(
        &self,
        request: AnyRequest,
        ctx: RequestContext,
        next: Next,
    ) -> DispatchResult<AnyResponse> {
        let timeout = Timeout::new(TimeoutConfig::new(self.duration).name(ctx.descriptor().type_name));
        let cancellation = ctx.cancellation().clone();

        timeout
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
    use tokio_util::sync::CancellationToken;

    struct Slow;
    impl Request for Slow {
        type Response = ();
    }

    fn sleeping(duration: Duration) -> Next {
        next_fn(move |_, ctx| {
            Box::pin(async move {
                tokio::select! {
                    _ = ctx.cancellation().cancelled() => Err(DispatchError::Cancelled),
                    _ = tokio::time::sleep(duration) => Ok(Box::new(()) as AnyResponse),
                }
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_slow_request() {
        let err = TimeoutBehavior::new(Duration::from_millis(50))
            .handle(
                Box::new(Slow),
                context::<Slow>(CancellationToken::new()),
                sleeping(Duration::from_secs(5)),
            )
            .await
            .unwrap_err();

        match err {
            DispatchError::Timeout { operation, after } => {
                assert!(operation.ends_with("Slow"));
                assert_eq!(after, Duration::from_millis(50));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_request_completes() {
        let result = TimeoutBehavior::from_options(&TimeoutOptions::default())
            .handle(
                Box::new(Slow),
                context::<Slow>(CancellationToken::new()),
                sleeping(Duration::from_millis(5)),
            )
            .await;
        assert!(result.is_ok());
    }
}
