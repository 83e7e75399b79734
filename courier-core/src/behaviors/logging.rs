use crate::behavior::{Next, PipelineBehavior};
use crate::error::DispatchResult;
use crate::handler::RequestContext;
use crate::request::{AnyRequest, AnyResponse};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Logs every request passing through the pipeline.
///
/// Start and completion are logged at `debug`. Failures are logged at
/// `error`, timeouts at `warn`; caller cancellation only at `debug`.
#[derive(Debug, Clone, Default)]
pub struct LoggingBehavior {
    slow_threshold: Option<Duration>,
}

impl LoggingBehavior {
    /// Create a logging behavior.
    pub fn new() -> Self {
        Self::default()
    }

    /// Warn when a request takes longer than `threshold`.
    pub fn slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = Some(threshold);
        self
    }
}

#[async_trait]
impl PipelineBehavior for LoggingBehavior {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn handle(
        &self,
        request: AnyRequest,
        ctx: RequestContext,
        next: Next,
    ) -> DispatchResult<AnyResponse> {
        let descriptor = *ctx.descriptor();
        let started = Instant::now();

        debug!(
            request = descriptor.type_name,
            kind = %descriptor.kind,
            "Handling request"
        );

        let result = next.run(request, ctx).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(_) => {
                debug!(
                    request = descriptor.type_name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Request handled"
                );
                if let Some(threshold) = self.slow_threshold
                    && elapsed > threshold
                {
                    warn!(
                        request = descriptor.type_name,
                        elapsed_ms = elapsed.as_millis() as u64,
                        threshold_ms = threshold.as_millis() as u64,
                        "Slow request"
                    );
                }
            }
            Err(e) if e.is_cancelled() => {
                debug!(request = descriptor.type_name, "Request cancelled by caller");
            }
            Err(e) if e.is_timeout() => {
                warn!(
                    request = descriptor.type_name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %e,
                    "Request timed out"
                );
            }
            Err(e) => {
                error!(
                    request = descriptor.type_name,
                    kind = %e.kind(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %e,
                    "Request failed"
                );
            }
        }

        result
    }
}
