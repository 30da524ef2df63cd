//! Sinks: the folding end of a pipeline.
//!
//! A sink consumes its upstream channel into an accumulator and delivers
//! exactly one terminal [`Outcome`] through a capacity-one channel. The
//! driver mirrors the flow driver's dispatch; the differences are that
//! `Stop` emits the accumulator, and abrupt cancellation records the
//! cancellation error into the accumulator and still emits it, so the
//! terminal always carries the last accumulator state.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::action::StreamAction;
use crate::complete::CompleteSignal;
use crate::context::StreamContext;
use crate::flow::Flow;
use crate::item::{Item, Outcome};
use crate::source::{Source, StageEnv, UpstreamLink};
use crate::StreamError;

/// Folding logic of a sink stage.
///
/// Handlers mutate the accumulator in place and return the action for the
/// driver. The defaults record an error into the accumulator and stop, and
/// stop when the upstream closes.
#[async_trait]
pub trait SinkHandler<I: Send + 'static, R: Send + 'static>: Send + 'static {
    /// Called for every upstream value item.
    async fn on_elem(
        &mut self,
        ctx: &StreamContext,
        acc: &mut Outcome<R>,
        value: I,
    ) -> StreamAction;

    /// Called for every upstream error item.
    async fn on_err(
        &mut self,
        _ctx: &StreamContext,
        acc: &mut Outcome<R>,
        err: StreamError,
    ) -> StreamAction {
        acc.error = Some(err);
        StreamAction::Stop
    }

    /// Called once when the upstream channel closes cleanly.
    async fn on_upstream_closed(
        &mut self,
        _ctx: &StreamContext,
        _acc: &mut Outcome<R>,
    ) -> StreamAction {
        StreamAction::Stop
    }
}

/// Handed to the stream driver by a wired sink: the internal terminal
/// channel plus the accumulator factory, which doubles as the fallback for
/// the anomaly path where the terminal closes without an item.
pub(crate) struct SinkHandle<R> {
    pub(crate) terminal: mpsc::Receiver<Outcome<R>>,
    pub(crate) fallback: Box<dyn FnMut() -> R + Send>,
}

type WireFn<I, R> = Box<dyn FnOnce(Source<I>, &StageEnv, CompleteSignal) -> SinkHandle<R> + Send>;

/// A stage folding `Item<I>`s into a terminal `Outcome<R>`.
pub struct Sink<I, R> {
    wire: WireFn<I, R>,
}

impl<I: Send + 'static, R: Send + 'static> Sink<I, R> {
    /// Build a sink from an initial-accumulator factory and a handler.
    ///
    /// The factory runs once per wiring for the driver's accumulator; it is
    /// kept around so the terminal forwarder can still fabricate a value if
    /// the driver dies without emitting.
    pub fn new<F, H>(init: F, handler: H) -> Self
    where
        F: FnMut() -> R + Send + 'static,
        H: SinkHandler<I, R>,
    {
        Self {
            wire: Box::new(move |source, env, own_complete| {
                let mut init = init;
                let acc = Outcome::new(init());
                let (term_tx, term_rx) = mpsc::channel(1);
                let link = UpstreamLink::connect(&source, env);
                let env = env.clone();
                env.tracker.clone().spawn(async move {
                    drive_sink(handler, env, link, acc, term_tx, own_complete).await;
                });
                SinkHandle {
                    terminal: term_rx,
                    fallback: Box::new(init),
                }
            }),
        }
    }

    /// Prepend a flow, yielding a sink that consumes the flow's input.
    pub(crate) fn prepend<H: Send + 'static>(self, flow: Flow<H, I>) -> Sink<H, R> {
        Sink {
            wire: Box::new(move |source, env, own_complete| {
                (self.wire)(flow.apply(source), env, own_complete)
            }),
        }
    }

    pub(crate) fn wire(
        self,
        source: Source<I>,
        env: &StageEnv,
        own_complete: CompleteSignal,
    ) -> SinkHandle<R> {
        (self.wire)(source, env, own_complete)
    }
}

enum SinkEvent<I> {
    Elem(I),
    Error(StreamError),
    Closed,
    Drain,
    Cancelled,
}

/// The sink driver loop. Emits the accumulator exactly once, whichever way
/// the stage ends.
async fn drive_sink<I, R, H>(
    mut handler: H,
    env: StageEnv,
    mut link: UpstreamLink<I>,
    mut acc: Outcome<R>,
    term_tx: mpsc::Sender<Outcome<R>>,
    own_complete: CompleteSignal,
) where
    I: Send + 'static,
    R: Send + 'static,
    H: SinkHandler<I, R>,
{
    let ctx = Arc::clone(&env.ctx);
    let mut draining = false;

    loop {
        let event = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => SinkEvent::Cancelled,
            _ = own_complete.triggered(), if !draining => SinkEvent::Drain,
            item = link.rx.recv() => match item {
                Some(Item::Value(v)) => SinkEvent::Elem(v),
                Some(Item::Error(e)) => SinkEvent::Error(e),
                None => SinkEvent::Closed,
            },
        };

        let action = match event {
            SinkEvent::Cancelled => {
                debug!(stream = %ctx.name, "sink cancelled");
                acc.error = Some(StreamError::Cancelled);
                let _ = term_tx.send(acc).await;
                return;
            }
            SinkEvent::Drain => {
                draining = true;
                link.request_complete();
                continue;
            }
            SinkEvent::Elem(v) => {
                if draining {
                    continue;
                }
                handler.on_elem(&ctx, &mut acc, v).await
            }
            SinkEvent::Error(e) => {
                if draining {
                    continue;
                }
                handler.on_err(&ctx, &mut acc, e).await
            }
            SinkEvent::Closed => {
                let action = handler.on_upstream_closed(&ctx, &mut acc).await;
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
                debug!(stream = %ctx.name, "sink stopped, delivering outcome");
                let _ = term_tx.send(acc).await;
                link.shutdown().await;
                return;
            }
            StreamAction::Cancel => {
                debug!(stream = %ctx.name, "sink requested stream cancel");
                ctx.token.cancel();
                acc.error.get_or_insert(StreamError::Cancelled);
                let _ = term_tx.send(acc).await;
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
