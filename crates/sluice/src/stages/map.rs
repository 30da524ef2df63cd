//! One-to-one transforms and pass-through side effects.

use async_trait::async_trait;

use crate::action::StreamAction;
use crate::channel::Outlet;
use crate::context::StreamContext;
use crate::flow::{Flow, FlowHandler};
use crate::StreamError;

struct MapFlow<F> {
    f: F,
}

#[async_trait]
impl<I, O, F> FlowHandler<I, O> for MapFlow<F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: FnMut(I) -> O + Send + 'static,
{
    async fn on_elem(&mut self, _ctx: &StreamContext, out: &Outlet<O>, value: I) -> StreamAction {
        if out.value((self.f)(value)).await.is_ok() {
            StreamAction::Proceed
        } else {
            StreamAction::Stop
        }
    }
}

/// Transform every value with `f`.
pub fn map<I, O, F>(f: F) -> Flow<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
    F: FnMut(I) -> O + Send + 'static,
{
    Flow::new(MapFlow { f })
}

struct TryMapFlow<F> {
    f: F,
}

#[async_trait]
impl<I, O, E, F> FlowHandler<I, O> for TryMapFlow<F>
where
    I: Send + 'static,
    O: Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
    F: FnMut(I) -> Result<O, E> + Send + 'static,
{
    async fn on_elem(&mut self, _ctx: &StreamContext, out: &Outlet<O>, value: I) -> StreamAction {
        let sent = match (self.f)(value) {
            Ok(mapped) => out.value(mapped).await,
            Err(e) => out.error(StreamError::failed(e)).await,
        };
        if sent.is_ok() {
            StreamAction::Proceed
        } else {
            StreamAction::Stop
        }
    }
}

/// Transform every value with a fallible `f`; failures travel downstream as
/// error items and processing proceeds.
pub fn try_map<I, O, E, F>(f: F) -> Flow<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
    F: FnMut(I) -> Result<O, E> + Send + 'static,
{
    Flow::new(TryMapFlow { f })
}

struct ForEachFlow<F> {
    f: F,
}

#[async_trait]
impl<I, F> FlowHandler<I, I> for ForEachFlow<F>
where
    I: Send + 'static,
    F: FnMut(&StreamContext, &I) + Send + 'static,
{
    async fn on_elem(&mut self, ctx: &StreamContext, out: &Outlet<I>, value: I) -> StreamAction {
        (self.f)(ctx, &value);
        if out.value(value).await.is_ok() {
            StreamAction::Proceed
        } else {
            StreamAction::Stop
        }
    }
}

/// Run a side effect for every value and pass it through unchanged.
pub fn for_each<I, F>(f: F) -> Flow<I, I>
where
    I: Send + 'static,
    F: FnMut(&StreamContext, &I) + Send + 'static,
{
    Flow::new(ForEachFlow { f })
}
