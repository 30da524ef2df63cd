//! Grouping and ungrouping flows.

use async_trait::async_trait;

use crate::action::StreamAction;
use crate::channel::Outlet;
use crate::context::StreamContext;
use crate::flow::{Flow, FlowHandler};

struct BatchFlow<I> {
    size: usize,
    buffer: Vec<I>,
}

impl<I> BatchFlow<I> {
    async fn flush(&mut self, out: &Outlet<Vec<I>>) -> bool {
        if self.buffer.is_empty() {
            return true;
        }
        let batch = std::mem::take(&mut self.buffer);
        out.value(batch).await.is_ok()
    }
}

#[async_trait]
impl<I: Send + 'static> FlowHandler<I, Vec<I>> for BatchFlow<I> {
    async fn on_elem(
        &mut self,
        _ctx: &StreamContext,
        out: &Outlet<Vec<I>>,
        value: I,
    ) -> StreamAction {
        self.buffer.push(value);
        if self.buffer.len() < self.size {
            return StreamAction::Proceed;
        }
        if self.flush(out).await {
            StreamAction::Proceed
        } else {
            StreamAction::Stop
        }
    }

    async fn on_upstream_closed(
        &mut self,
        _ctx: &StreamContext,
        out: &Outlet<Vec<I>>,
    ) -> StreamAction {
        self.flush(out).await;
        StreamAction::Stop
    }

    async fn on_done(&mut self, _ctx: &StreamContext, out: &Outlet<Vec<I>>) {
        // Emitted at most once: a flush from the closed path leaves the
        // buffer empty.
        self.flush(out).await;
    }
}

/// Group values into batches of up to `size`, emitting each batch when it
/// fills. A partial batch is emitted exactly once when the stage winds down.
pub fn batch<I: Send + 'static>(size: usize) -> Flow<I, Vec<I>> {
    assert!(size > 0, "batch size must be at least 1");
    Flow::new(BatchFlow {
        size,
        buffer: Vec::new(),
    })
}

struct FlattenFlow;

#[async_trait]
impl<C, O> FlowHandler<C, O> for FlattenFlow
where
    C: IntoIterator<Item = O> + Send + 'static,
    C::IntoIter: Send,
    O: Send + 'static,
{
    async fn on_elem(&mut self, _ctx: &StreamContext, out: &Outlet<O>, values: C) -> StreamAction {
        if out.send_all(values).await.is_ok() {
            StreamAction::Proceed
        } else {
            StreamAction::Stop
        }
    }
}

/// Emit every element of each incoming sequence, in order.
pub fn flatten<C, O>() -> Flow<C, O>
where
    C: IntoIterator<Item = O> + Send + 'static,
    C::IntoIter: Send,
    O: Send + 'static,
{
    Flow::new(FlattenFlow)
}

struct FlatMapFlow<F> {
    f: F,
}

#[async_trait]
impl<I, C, O, F> FlowHandler<I, O> for FlatMapFlow<F>
where
    I: Send + 'static,
    C: IntoIterator<Item = O> + Send + 'static,
    C::IntoIter: Send,
    O: Send + 'static,
    F: FnMut(I) -> C + Send + 'static,
{
    async fn on_elem(&mut self, _ctx: &StreamContext, out: &Outlet<O>, value: I) -> StreamAction {
        if out.send_all((self.f)(value)).await.is_ok() {
            StreamAction::Proceed
        } else {
            StreamAction::Stop
        }
    }
}

/// Map every value to a sequence and emit all elements in order; empty
/// sequences emit nothing.
pub fn flat_map<I, C, O, F>(f: F) -> Flow<I, O>
where
    I: Send + 'static,
    C: IntoIterator<Item = O> + Send + 'static,
    C::IntoIter: Send,
    O: Send + 'static,
    F: FnMut(I) -> C + Send + 'static,
{
    Flow::new(FlatMapFlow { f })
}
