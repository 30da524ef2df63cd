//! Flows: per-item transform stages between a source and a sink.
//!
//! A flow's behaviour is a [`FlowHandler`]: one callback per driver event,
//! each returning the [`StreamAction`] that tells the driver what to do
//! next. The driver owns the receive-and-dispatch loop, so handlers stay
//! small state machines, and shutdown, draining, and upstream restarts are
//! implemented once.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::action::StreamAction;
use crate::channel::Outlet;
use crate::complete::CompleteSignal;
use crate::context::StreamContext;
use crate::item::Item;
use crate::sink::Sink;
use crate::source::{SetupBox, Source, StageEnv, StageOutput, UpstreamLink};
use crate::StreamError;

/// Per-item logic of a flow stage.
///
/// Only `on_elem` is mandatory. The defaults implement the conventional
/// behaviour: errors are forwarded and processing proceeds, a closed
/// upstream stops the stage, and the finaliser does nothing.
#[async_trait]
pub trait FlowHandler<I: Send + 'static, O: Send + 'static>: Send + 'static {
    /// Called for every upstream value item.
    async fn on_elem(&mut self, ctx: &StreamContext, out: &Outlet<O>, value: I) -> StreamAction;

    /// Called for every upstream error item.
    async fn on_err(
        &mut self,
        _ctx: &StreamContext,
        out: &Outlet<O>,
        err: StreamError,
    ) -> StreamAction {
        if out.error(err).await.is_ok() {
            StreamAction::Proceed
        } else {
            StreamAction::Stop
        }
    }

    /// Called once when the upstream channel closes cleanly.
    async fn on_upstream_closed(&mut self, _ctx: &StreamContext, _out: &Outlet<O>) -> StreamAction {
        StreamAction::Stop
    }

    /// Finaliser, called just before the downstream channel closes.
    async fn on_done(&mut self, _ctx: &StreamContext, _out: &Outlet<O>) {}
}

/// A transform stage from `Item<I>` to `Item<O>`.
///
/// Flows compose by attachment: internally a flow is a function from a
/// [`Source<I>`] to a [`Source<O>`], which keeps composition associative
/// and gives every driver a re-invocable handle on its upstream subtree.
pub struct Flow<I, O> {
    attach: Box<dyn FnOnce(Source<I>, usize) -> Source<O> + Send>,
    buf_size: usize,
}

impl<I: Send + 'static, O: Send + 'static> Flow<I, O> {
    /// Wrap a handler into a flow with an unbuffered downstream channel.
    pub fn new<H>(handler: H) -> Self
    where
        H: FlowHandler<I, O>,
    {
        Self {
            attach: Box::new(move |source, buf| attach_handler(source, handler, buf)),
            buf_size: 0,
        }
    }

    /// Set the buffer added to this flow's downstream channel. On a composed
    /// flow this configures the final stage of the chain.
    pub fn with_buffer(mut self, buf_size: usize) -> Self {
        self.buf_size = buf_size;
        self
    }

    /// Chain another flow after this one.
    pub fn via<P: Send + 'static>(self, next: Flow<O, P>) -> Flow<I, P> {
        let Flow {
            attach: first,
            buf_size: first_buf,
        } = self;
        let Flow {
            attach: second,
            buf_size: second_buf,
        } = next;
        Flow {
            attach: Box::new(move |source, buf| second(first(source, first_buf), buf)),
            buf_size: second_buf,
        }
    }

    /// Prepend this flow to a sink.
    pub fn to_sink<R: Send + 'static>(self, sink: Sink<O, R>) -> Sink<I, R> {
        sink.prepend(self)
    }

    pub(crate) fn apply(self, source: Source<I>) -> Source<O> {
        (self.attach)(source, self.buf_size)
    }
}

/// Wire a handler-backed flow stage onto `upstream`, yielding the composite
/// source whose setup spawns both the subtree and this stage's driver.
fn attach_handler<I, O, H>(upstream: Source<I>, handler: H, buf_size: usize) -> Source<O>
where
    I: Send + 'static,
    O: Send + 'static,
    H: FlowHandler<I, O>,
{
    let handler = Arc::new(tokio::sync::Mutex::new(handler));
    let up_setup = Arc::clone(&upstream.setup);
    let up_buf = upstream.buf_size;

    let setup: SetupBox<O> = Box::new(move |env, out_buf| {
        let complete = CompleteSignal::new();
        let (tx, rx) = mpsc::channel(out_buf + 1);
        let out = Outlet::new(tx, env.ctx.token.clone());
        let link = UpstreamLink::from_setup(Arc::clone(&up_setup), up_buf, env);
        let handler = Arc::clone(&handler);
        let env = env.clone();
        let own_complete = complete.clone();
        let handle = env.tracker.clone().spawn(async move {
            let mut handler = handler.lock().await;
            drive_flow(&mut *handler, env, link, out, own_complete).await;
        });
        StageOutput {
            rx,
            complete,
            handle,
        }
    });

    Source::from_setup(setup, buf_size)
}

enum FlowEvent<I> {
    Elem(I),
    Error(StreamError),
    Closed,
    Drain,
    Cancelled,
}

/// The flow driver loop. Runs in the stage's task until the stage stops,
/// the stream is cancelled, or the upstream closes.
async fn drive_flow<I, O, H>(
    handler: &mut H,
    env: StageEnv,
    mut link: UpstreamLink<I>,
    out: Outlet<O>,
    own_complete: CompleteSignal,
) where
    I: Send + 'static,
    O: Send + 'static,
    H: FlowHandler<I, O> + ?Sized,
{
    let ctx = Arc::clone(&env.ctx);
    let mut draining = false;

    loop {
        let event = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => FlowEvent::Cancelled,
            _ = own_complete.triggered(), if !draining => FlowEvent::Drain,
            item = link.rx.recv() => match item {
                Some(Item::Value(v)) => FlowEvent::Elem(v),
                Some(Item::Error(e)) => FlowEvent::Error(e),
                None => FlowEvent::Closed,
            },
        };

        let action = match event {
            FlowEvent::Cancelled => {
                debug!(stream = %ctx.name, "flow cancelled");
                handler.on_done(&ctx, &out).await;
                return;
            }
            FlowEvent::Drain => {
                draining = true;
                link.request_complete();
                continue;
            }
            FlowEvent::Elem(v) => {
                if draining {
                    continue;
                }
                handler.on_elem(&ctx, &out, v).await
            }
            FlowEvent::Error(e) => {
                if draining {
                    continue;
                }
                handler.on_err(&ctx, &out, e).await
            }
            FlowEvent::Closed => {
                let action = handler.on_upstream_closed(&ctx, &out).await;
                // There is nothing left to proceed with.
                if action == StreamAction::Proceed {
                    StreamAction::Stop
                } else {
                    action
                }
            }
        };

        match action {
            StreamAction::Proceed => {}
            StreamAction::Stop => {
                handler.on_done(&ctx, &out).await;
                debug!(stream = %ctx.name, "flow stopped");
                drop(out);
                link.shutdown().await;
                return;
            }
            StreamAction::Cancel => {
                debug!(stream = %ctx.name, "flow requested stream cancel");
                ctx.token.cancel();
                handler.on_done(&ctx, &out).await;
                return;
            }
            StreamAction::Complete => {
                draining = true;
                link.request_complete();
            }
            StreamAction::RestartUpstream => {
                link.restart(&env).await;
            }
        }
    }
}
