//! Rate limiting.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::action::StreamAction;
use crate::channel::Outlet;
use crate::context::StreamContext;
use crate::flow::{Flow, FlowHandler};

struct ThrottleFlow {
    capacity: usize,
    permits: usize,
    interval: Duration,
    ticker: Option<Interval>,
}

#[async_trait]
impl<I: Send + 'static> FlowHandler<I, I> for ThrottleFlow {
    async fn on_elem(&mut self, ctx: &StreamContext, out: &Outlet<I>, value: I) -> StreamAction {
        if self.permits == 0 {
            let period = self.interval;
            let ticker = self.ticker.get_or_insert_with(|| {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ticker
            });
            tokio::select! {
                biased;
                _ = ctx.token.cancelled() => return StreamAction::Stop,
                _ = ticker.tick() => {}
            }
            self.permits = self.capacity;
        }
        self.permits -= 1;
        if out.value(value).await.is_ok() {
            StreamAction::Proceed
        } else {
            StreamAction::Stop
        }
    }

    async fn on_done(&mut self, _ctx: &StreamContext, _out: &Outlet<I>) {
        self.ticker = None;
    }
}

/// Token bucket: let through up to `permits` values, then hold further
/// values until the next tick of the `interval` cadence refills the bucket.
pub fn throttle<I: Send + 'static>(permits: usize, interval: Duration) -> Flow<I, I> {
    assert!(permits > 0, "throttle needs at least one permit");
    Flow::new(ThrottleFlow {
        capacity: permits,
        permits,
        interval,
        ticker: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{collect, iter};
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn throttle_paces_emission() {
        let started = Instant::now();
        let mut stream = iter(vec![1, 2, 3, 4, 5, 6])
            .via(throttle(2, Duration::from_millis(40)))
            .to(collect());
        let outcome = stream.run(&CancellationToken::new()).recv().await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(outcome.value, vec![1, 2, 3, 4, 5, 6]);
        // Two values pass immediately; the remaining four need two refills.
        assert!(
            elapsed >= Duration::from_millis(70),
            "finished too fast: {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn throttle_respects_cancellation_while_waiting() {
        let token = CancellationToken::new();
        let mut stream = iter(vec![1, 2, 3, 4])
            .via(throttle(1, Duration::from_secs(60)))
            .to(collect());
        stream.run(&token);

        tokio::time::sleep(Duration::from_millis(20)).await;
        stream.cancel();
        let outcome = stream.run(&token).recv().await.unwrap();
        assert!(outcome.error.unwrap().is_cancelled());
        stream.await_done().await;
    }
}
