//! Error-triggered upstream restarts with backoff.

use async_trait::async_trait;
use tracing::warn;

use crate::action::StreamAction;
use crate::channel::Outlet;
use crate::context::StreamContext;
use crate::flow::{Flow, FlowHandler};
use crate::retry::RetryConfig;
use crate::StreamError;

struct RetryFlow {
    config: RetryConfig,
    attempts: u32,
}

#[async_trait]
impl<T: Send + 'static> FlowHandler<T, T> for RetryFlow {
    async fn on_elem(&mut self, _ctx: &StreamContext, out: &Outlet<T>, value: T) -> StreamAction {
        // A successful value resets the budget.
        self.attempts = 0;
        if out.value(value).await.is_ok() {
            StreamAction::Proceed
        } else {
            StreamAction::Stop
        }
    }

    async fn on_err(
        &mut self,
        ctx: &StreamContext,
        out: &Outlet<T>,
        err: StreamError,
    ) -> StreamAction {
        let Some(delay) = self.config.next_backoff(self.attempts) else {
            warn!(
                stream = %ctx.name,
                attempts = self.attempts,
                error = %err,
                "retry budget exhausted"
            );
            let _ = out.error(err).await;
            return StreamAction::Stop;
        };

        self.attempts += 1;
        warn!(
            stream = %ctx.name,
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "restarting upstream after error"
        );
        tokio::select! {
            biased;
            _ = ctx.token.cancelled() => StreamAction::Stop,
            _ = tokio::time::sleep(delay) => StreamAction::RestartUpstream,
        }
    }
}

/// Swallow upstream errors and restart the upstream subtree with backoff,
/// until the configured retry budget runs out; then the last error is
/// forwarded and the stage stops.
pub fn retry<T: Send + 'static>(config: RetryConfig) -> Flow<T, T> {
    Flow::new(RetryFlow {
        config,
        attempts: 0,
    })
}
