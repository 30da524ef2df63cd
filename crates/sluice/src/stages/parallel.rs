//! Parallel transforms.
//!
//! `map_par` and `flat_map_par` run up to `parallelism` invocations of the
//! user function concurrently. Workers emit straight into the downstream
//! channel, so output order is not preserved; everything else about the
//! stage contract (backpressure, cancellation, clean close) is unchanged.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::action::StreamAction;
use crate::channel::Outlet;
use crate::context::StreamContext;
use crate::flow::{Flow, FlowHandler};

struct MapParFlow<F> {
    f: Arc<F>,
    semaphore: Arc<Semaphore>,
    workers: JoinSet<()>,
}

#[async_trait]
impl<I, O, F, Fut> FlowHandler<I, O> for MapParFlow<F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = O> + Send + 'static,
{
    async fn on_elem(&mut self, ctx: &StreamContext, out: &Outlet<O>, value: I) -> StreamAction {
        // Reap whatever already finished so the set stays small.
        while self.workers.try_join_next().is_some() {}

        let permit = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => return StreamAction::Stop,
            permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return StreamAction::Stop,
            },
        };

        let f = Arc::clone(&self.f);
        let out = out.clone();
        self.workers.spawn(async move {
            let _permit = permit;
            let mapped = f(value).await;
            let _ = out.value(mapped).await;
        });
        StreamAction::Proceed
    }

    async fn on_done(&mut self, _ctx: &StreamContext, _out: &Outlet<O>) {
        while self.workers.join_next().await.is_some() {}
    }
}

/// Transform values with up to `parallelism` concurrent invocations of `f`.
/// Output order is unspecified.
pub fn map_par<I, O, F, Fut>(parallelism: usize, f: F) -> Flow<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = O> + Send + 'static,
{
    assert!(parallelism > 0, "parallelism must be at least 1");
    Flow::new(MapParFlow {
        f: Arc::new(f),
        semaphore: Arc::new(Semaphore::new(parallelism)),
        workers: JoinSet::new(),
    })
}

struct FlatMapParFlow<F> {
    f: Arc<F>,
    semaphore: Arc<Semaphore>,
    workers: JoinSet<()>,
}

#[async_trait]
impl<I, C, O, F, Fut> FlowHandler<I, O> for FlatMapParFlow<F>
where
    I: Send + 'static,
    C: IntoIterator<Item = O> + Send + 'static,
    C::IntoIter: Send,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = C> + Send + 'static,
{
    async fn on_elem(&mut self, ctx: &StreamContext, out: &Outlet<O>, value: I) -> StreamAction {
        while self.workers.try_join_next().is_some() {}

        let permit = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => return StreamAction::Stop,
            permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return StreamAction::Stop,
            },
        };

        let f = Arc::clone(&self.f);
        let out = out.clone();
        self.workers.spawn(async move {
            let _permit = permit;
            let values = f(value).await;
            let _ = out.send_all(values).await;
        });
        StreamAction::Proceed
    }

    async fn on_done(&mut self, _ctx: &StreamContext, _out: &Outlet<O>) {
        while self.workers.join_next().await.is_some() {}
    }
}

/// Like [`map_par`], but each worker emits zero or more values.
pub fn flat_map_par<I, C, O, F, Fut>(parallelism: usize, f: F) -> Flow<I, O>
where
    I: Send + 'static,
    C: IntoIterator<Item = O> + Send + 'static,
    C::IntoIter: Send,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = C> + Send + 'static,
{
    assert!(parallelism > 0, "parallelism must be at least 1");
    Flow::new(FlatMapParFlow {
        f: Arc::new(f),
        semaphore: Arc::new(Semaphore::new(parallelism)),
        workers: JoinSet::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{collect, iter};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn map_par_preserves_the_multiset() {
        let input: Vec<i32> = (0..20).collect();
        let mut stream = iter(input.clone())
            .via(map_par(4, |n: i32| async move { n * 2 }))
            .to(collect());
        let outcome = stream.run(&CancellationToken::new()).recv().await.unwrap();

        let mut doubled = outcome.value;
        doubled.sort_unstable();
        let expected: Vec<i32> = input.iter().map(|n| n * 2).collect();
        assert_eq!(doubled, expected);
    }

    #[tokio::test]
    async fn map_par_bounds_concurrency() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let active_in = Arc::clone(&active);
        let peak_in = Arc::clone(&peak);

        let mut stream = iter((0..12).collect::<Vec<i32>>())
            .via(map_par(3, move |n: i32| {
                let active = Arc::clone(&active_in);
                let peak = Arc::clone(&peak_in);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    n
                }
            }))
            .to(collect());
        let outcome = stream.run(&CancellationToken::new()).recv().await.unwrap();

        assert_eq!(outcome.value.len(), 12);
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "observed {peak} concurrent workers");
        assert!(peak >= 2, "parallelism never materialized");
    }

    #[tokio::test]
    async fn flat_map_par_emits_all_elements() {
        let mut stream = iter(vec![1, 2, 3])
            .via(flat_map_par(2, |n: i32| async move { vec![n, n + 100] }))
            .to(collect());
        let outcome = stream.run(&CancellationToken::new()).recv().await.unwrap();

        let mut values = outcome.value;
        values.sort_unstable();
        assert_eq!(values, vec![1, 2, 3, 101, 102, 103]);
    }
}
