//! Library sinks.

use async_trait::async_trait;

use crate::action::StreamAction;
use crate::context::StreamContext;
use crate::item::Outcome;
use crate::sink::{Sink, SinkHandler};

struct CollectSink;

#[async_trait]
impl<I: Send + 'static> SinkHandler<I, Vec<I>> for CollectSink {
    async fn on_elem(
        &mut self,
        _ctx: &StreamContext,
        acc: &mut Outcome<Vec<I>>,
        value: I,
    ) -> StreamAction {
        acc.value.push(value);
        StreamAction::Proceed
    }
}

/// Collect every value into a `Vec`.
pub fn collect<I: Send + 'static>() -> Sink<I, Vec<I>> {
    Sink::new(Vec::new, CollectSink)
}

struct ReduceSink<F> {
    f: F,
}

#[async_trait]
impl<I, R, F> SinkHandler<I, R> for ReduceSink<F>
where
    I: Send + 'static,
    R: Send + 'static,
    F: FnMut(&StreamContext, &mut R, I) + Send + 'static,
{
    async fn on_elem(
        &mut self,
        ctx: &StreamContext,
        acc: &mut Outcome<R>,
        value: I,
    ) -> StreamAction {
        (self.f)(ctx, &mut acc.value, value);
        StreamAction::Proceed
    }
}

/// Fold every value into an accumulator seeded with `init`.
pub fn reduce<I, R, F>(init: R, f: F) -> Sink<I, R>
where
    I: Send + 'static,
    R: Clone + Send + 'static,
    F: FnMut(&StreamContext, &mut R, I) + Send + 'static,
{
    Sink::new(move || init.clone(), ReduceSink { f })
}

struct ForEachSink<F> {
    f: F,
}

#[async_trait]
impl<I, F> SinkHandler<I, ()> for ForEachSink<F>
where
    I: Send + 'static,
    F: FnMut(&StreamContext, I) + Send + 'static,
{
    async fn on_elem(
        &mut self,
        ctx: &StreamContext,
        _acc: &mut Outcome<()>,
        value: I,
    ) -> StreamAction {
        (self.f)(ctx, value);
        StreamAction::Proceed
    }
}

/// Run a side effect for every value; the terminal value is unit.
pub fn for_each_sink<I, F>(f: F) -> Sink<I, ()>
where
    I: Send + 'static,
    F: FnMut(&StreamContext, I) + Send + 'static,
{
    Sink::new(|| (), ForEachSink { f })
}

struct NoopSink;

#[async_trait]
impl<I: Send + 'static> SinkHandler<I, ()> for NoopSink {
    async fn on_elem(
        &mut self,
        _ctx: &StreamContext,
        _acc: &mut Outcome<()>,
        _value: I,
    ) -> StreamAction {
        StreamAction::Proceed
    }
}

/// Discard every value; the terminal value is unit.
pub fn noop<I: Send + 'static>() -> Sink<I, ()> {
    Sink::new(|| (), NoopSink)
}

struct CancelIfSink<F> {
    predicate: F,
}

#[async_trait]
impl<I, F> SinkHandler<I, ()> for CancelIfSink<F>
where
    I: Send + 'static,
    F: FnMut(&I) -> bool + Send + 'static,
{
    async fn on_elem(
        &mut self,
        _ctx: &StreamContext,
        _acc: &mut Outcome<()>,
        value: I,
    ) -> StreamAction {
        if (self.predicate)(&value) {
            StreamAction::Cancel
        } else {
            StreamAction::Proceed
        }
    }
}

/// Abort the whole stream as soon as a value matches `predicate`.
pub fn cancel_if_sink<I, F>(predicate: F) -> Sink<I, ()>
where
    I: Send + 'static,
    F: FnMut(&I) -> bool + Send + 'static,
{
    Sink::new(|| (), CancelIfSink { predicate })
}

struct CompleteIfSink<F> {
    predicate: F,
}

#[async_trait]
impl<I, F> SinkHandler<I, ()> for CompleteIfSink<F>
where
    I: Send + 'static,
    F: FnMut(&I) -> bool + Send + 'static,
{
    async fn on_elem(
        &mut self,
        _ctx: &StreamContext,
        _acc: &mut Outcome<()>,
        value: I,
    ) -> StreamAction {
        if (self.predicate)(&value) {
            StreamAction::Complete
        } else {
            StreamAction::Proceed
        }
    }
}

/// Gracefully complete the stream once a value matches `predicate`.
pub fn complete_if_sink<I, F>(predicate: F) -> Sink<I, ()>
where
    I: Send + 'static,
    F: FnMut(&I) -> bool + Send + 'static,
{
    Sink::new(|| (), CompleteIfSink { predicate })
}
