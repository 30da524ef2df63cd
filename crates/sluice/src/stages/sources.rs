//! Library sources: fixed values, caller-owned channels, and polling.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::channel::SourceOutlet;
use crate::context::StreamContext;
use crate::item::Item;
use crate::source::{Produce, Source};

struct IterProducer<T> {
    items: Vec<T>,
}

#[async_trait]
impl<T: Clone + Send + 'static> Produce<T> for IterProducer<T> {
    async fn produce(&mut self, _ctx: &StreamContext, out: &SourceOutlet<T>) {
        // A restarted subtree re-emits from the start.
        for value in self.items.clone() {
            if out.value(value).await.is_err() {
                return;
            }
        }
    }
}

/// Emit each value once, in order; close on exhaustion.
pub fn iter<T, C>(items: C) -> Source<T>
where
    T: Clone + Send + 'static,
    C: IntoIterator<Item = T>,
{
    Source::new(IterProducer {
        items: items.into_iter().collect(),
    })
}

struct RepeatProducer<T> {
    value: T,
}

#[async_trait]
impl<T: Clone + Send + 'static> Produce<T> for RepeatProducer<T> {
    async fn produce(&mut self, _ctx: &StreamContext, out: &SourceOutlet<T>) {
        while out.value(self.value.clone()).await.is_ok() {}
    }
}

/// Emit clones of `value` until the stream completes or cancels.
pub fn repeat<T: Clone + Send + 'static>(value: T) -> Source<T> {
    Source::new(RepeatProducer { value })
}

struct ChannelProducer<T> {
    rx: Option<mpsc::Receiver<T>>,
}

#[async_trait]
impl<T: Send + 'static> Produce<T> for ChannelProducer<T> {
    async fn produce(&mut self, _ctx: &StreamContext, out: &SourceOutlet<T>) {
        // The caller's receiver is a single-shot resource; after a restart
        // this source is exhausted and closes immediately.
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        loop {
            let received = tokio::select! {
                biased;
                _ = out.stopped() => return,
                received = rx.recv() => received,
            };
            match received {
                Some(value) => {
                    if out.value(value).await.is_err() {
                        return;
                    }
                }
                None => return,
            }
        }
    }
}

/// Forward values from a caller-owned channel until it closes.
pub fn from_channel<T: Send + 'static>(rx: mpsc::Receiver<T>) -> Source<T> {
    Source::new(ChannelProducer { rx: Some(rx) })
}

/// Polling callback for [`poll`] sources.
///
/// Each call reports an optional item (a value or an error, both are
/// emitted downstream) and whether more input is immediately available.
/// When it is, the next poll happens right away; otherwise the source
/// sleeps for its interval first.
#[async_trait]
pub trait Poller<T: Send + 'static>: Send + 'static {
    async fn poll(&mut self, ctx: &StreamContext) -> (Option<Item<T>>, bool);
}

struct PollProducer<P> {
    poller: P,
    interval: Duration,
}

#[async_trait]
impl<T, P> Produce<T> for PollProducer<P>
where
    T: Send + 'static,
    P: Poller<T>,
{
    async fn produce(&mut self, ctx: &StreamContext, out: &SourceOutlet<T>) {
        loop {
            if out.is_stopped() {
                return;
            }
            let (item, more) = self.poller.poll(ctx).await;
            if let Some(item) = item
                && out.send(item).await.is_err()
            {
                return;
            }
            if !more && out.idle(self.interval).await.is_err() {
                return;
            }
        }
    }
}

/// Poll `poller` forever, sleeping `interval` whenever it reports no more
/// immediate input. Errors are emitted as items; polling continues on the
/// next tick, leaving teardown policy to the downstream stages.
pub fn poll<T, P>(poller: P, interval: Duration) -> Source<T>
where
    T: Send + 'static,
    P: Poller<T>,
{
    Source::new(PollProducer { poller, interval })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::collect;
    use crate::StreamError;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn iter_emits_in_order() {
        let mut stream = iter(vec![1, 2, 3]).to(collect());
        let outcome = stream.run(&CancellationToken::new()).recv().await.unwrap();
        assert!(outcome.error.is_none());
        assert_eq!(outcome.value, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn empty_iter_yields_initial_accumulator() {
        let mut stream = iter(Vec::<i32>::new()).to(collect());
        let outcome = stream.run(&CancellationToken::new()).recv().await.unwrap();
        assert!(outcome.error.is_none());
        assert!(outcome.value.is_empty());
    }

    #[tokio::test]
    async fn from_channel_forwards_until_close() {
        let (tx, rx) = mpsc::channel(4);
        for n in [10, 20, 30] {
            tx.send(n).await.unwrap();
        }
        drop(tx);

        let mut stream = from_channel(rx).to(collect());
        let outcome = stream.run(&CancellationToken::new()).recv().await.unwrap();
        assert_eq!(outcome.value, vec![10, 20, 30]);
    }

    struct CountdownPoller {
        remaining: u32,
    }

    #[async_trait]
    impl Poller<u32> for CountdownPoller {
        async fn poll(&mut self, _ctx: &StreamContext) -> (Option<Item<u32>>, bool) {
            if self.remaining == 0 {
                return (None, false);
            }
            self.remaining -= 1;
            (Some(Item::Value(self.remaining)), self.remaining > 0)
        }
    }

    #[tokio::test]
    async fn poll_emits_until_drained() {
        let token = CancellationToken::new();
        let source = poll(CountdownPoller { remaining: 3 }, Duration::from_millis(5));
        let mut stream = source.to(collect());
        stream.run(&token);

        tokio::time::sleep(Duration::from_millis(30)).await;
        stream.drain();
        let outcome = stream.run(&token).recv().await.unwrap();
        assert!(outcome.error.is_none());
        assert_eq!(outcome.value, vec![2, 1, 0]);
    }

    struct FailingPoller {
        polled: bool,
    }

    #[async_trait]
    impl Poller<u32> for FailingPoller {
        async fn poll(&mut self, _ctx: &StreamContext) -> (Option<Item<u32>>, bool) {
            if self.polled {
                (Some(Item::Value(7)), false)
            } else {
                self.polled = true;
                (Some(Item::Error(StreamError::message("probe failed"))), false)
            }
        }
    }

    #[tokio::test]
    async fn poll_surfaces_errors_as_items() {
        let token = CancellationToken::new();
        let source = poll(FailingPoller { polled: false }, Duration::from_millis(1));
        let mut stream = source.to(collect());

        // The poller keeps going after an error; here the default sink
        // policy stops the stream on the first one it sees.
        let outcome = stream.run(&token).recv().await.unwrap();
        assert_eq!(outcome.error.unwrap().to_string(), "probe failed");
        assert!(outcome.value.is_empty());
    }
}
