//! Predicate-driven flows: selection, truncation, and shutdown triggers.

use async_trait::async_trait;

use crate::action::StreamAction;
use crate::channel::Outlet;
use crate::context::StreamContext;
use crate::flow::{Flow, FlowHandler};

struct FilterFlow<F> {
    predicate: F,
}

#[async_trait]
impl<I, F> FlowHandler<I, I> for FilterFlow<F>
where
    I: Send + 'static,
    F: FnMut(&I) -> bool + Send + 'static,
{
    async fn on_elem(&mut self, _ctx: &StreamContext, out: &Outlet<I>, value: I) -> StreamAction {
        if !(self.predicate)(&value) {
            return StreamAction::Proceed;
        }
        if out.value(value).await.is_ok() {
            StreamAction::Proceed
        } else {
            StreamAction::Stop
        }
    }
}

/// Forward only the values matching `predicate`.
pub fn filter<I, F>(predicate: F) -> Flow<I, I>
where
    I: Send + 'static,
    F: FnMut(&I) -> bool + Send + 'static,
{
    Flow::new(FilterFlow { predicate })
}

struct TakeWhileFlow<F> {
    predicate: F,
}

#[async_trait]
impl<I, F> FlowHandler<I, I> for TakeWhileFlow<F>
where
    I: Send + 'static,
    F: FnMut(&I) -> bool + Send + 'static,
{
    async fn on_elem(&mut self, _ctx: &StreamContext, out: &Outlet<I>, value: I) -> StreamAction {
        if !(self.predicate)(&value) {
            // The first failing value is dropped, not forwarded.
            return StreamAction::Stop;
        }
        if out.value(value).await.is_ok() {
            StreamAction::Proceed
        } else {
            StreamAction::Stop
        }
    }
}

/// Forward values while `predicate` holds; stop cleanly at the first value
/// that fails it.
pub fn take_while<I, F>(predicate: F) -> Flow<I, I>
where
    I: Send + 'static,
    F: FnMut(&I) -> bool + Send + 'static,
{
    Flow::new(TakeWhileFlow { predicate })
}

struct CancelIfFlow<F> {
    predicate: F,
}

#[async_trait]
impl<I, F> FlowHandler<I, I> for CancelIfFlow<F>
where
    I: Send + 'static,
    F: FnMut(&I) -> bool + Send + 'static,
{
    async fn on_elem(&mut self, _ctx: &StreamContext, out: &Outlet<I>, value: I) -> StreamAction {
        if (self.predicate)(&value) {
            return StreamAction::Cancel;
        }
        if out.value(value).await.is_ok() {
            StreamAction::Proceed
        } else {
            StreamAction::Stop
        }
    }
}

/// Abort the whole stream as soon as a value matches `predicate`. The
/// matching value is not forwarded.
pub fn cancel_if<I, F>(predicate: F) -> Flow<I, I>
where
    I: Send + 'static,
    F: FnMut(&I) -> bool + Send + 'static,
{
    Flow::new(CancelIfFlow { predicate })
}

struct CompleteIfFlow<F> {
    predicate: F,
}

#[async_trait]
impl<I, F> FlowHandler<I, I> for CompleteIfFlow<F>
where
    I: Send + 'static,
    F: FnMut(&I) -> bool + Send + 'static,
{
    async fn on_elem(&mut self, _ctx: &StreamContext, out: &Outlet<I>, value: I) -> StreamAction {
        let matched = (self.predicate)(&value);
        if out.value(value).await.is_err() {
            return StreamAction::Stop;
        }
        if matched {
            StreamAction::Complete
        } else {
            StreamAction::Proceed
        }
    }
}

/// Gracefully complete the stream once a value matches `predicate`. The
/// matching value is forwarded first.
pub fn complete_if<I, F>(predicate: F) -> Flow<I, I>
where
    I: Send + 'static,
    F: FnMut(&I) -> bool + Send + 'static,
{
    Flow::new(CompleteIfFlow { predicate })
}
