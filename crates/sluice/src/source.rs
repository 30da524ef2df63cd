//! Sources: the producing end of a pipeline.
//!
//! A [`Source`] is inert until a stream run invokes its setup, which spawns
//! the producing task and hands back the downstream channel together with
//! the subtree's complete trigger and join handle. Setups are re-invocable:
//! [`StreamAction::RestartUpstream`](crate::StreamAction) tears the subtree
//! down and calls the same setup again for a fresh channel, re-entering the
//! same producer state.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::channel::{Outlet, SourceOutlet};
use crate::complete::CompleteSignal;
use crate::context::StreamContext;
use crate::flow::Flow;
use crate::item::Item;
use crate::sink::Sink;
use crate::stream::Stream;

/// Everything a stage setup needs from the surrounding run.
#[derive(Clone)]
pub(crate) struct StageEnv {
    pub(crate) ctx: Arc<StreamContext>,
    pub(crate) tracker: TaskTracker,
}

/// What a source-subtree setup hands to its consumer: the data channel, the
/// trigger that politely stops the subtree, and a handle resolving once the
/// subtree has fully exited.
pub(crate) struct StageOutput<T> {
    pub(crate) rx: mpsc::Receiver<Item<T>>,
    pub(crate) complete: CompleteSignal,
    pub(crate) handle: JoinHandle<()>,
}

pub(crate) type SetupBox<T> = Box<dyn FnMut(&StageEnv, usize) -> StageOutput<T> + Send>;
pub(crate) type SetupFn<T> = Arc<Mutex<SetupBox<T>>>;

/// Producing logic of a source stage.
///
/// `produce` is driven in its own task and owns the production loop: emit
/// through the outlet until it reports an abort, the input is exhausted, or
/// production cannot continue. A producer that fails should emit one error
/// item and return; the channel closes when the task ends. Restarted
/// subtrees re-enter the same producer, so attempt counters and other state
/// carried in `self` survive across restarts.
#[async_trait]
pub trait Produce<T: Send + 'static>: Send + 'static {
    async fn produce(&mut self, ctx: &StreamContext, out: &SourceOutlet<T>);
}

/// A stage producing `Item<T>`s for a downstream consumer.
pub struct Source<T> {
    pub(crate) setup: SetupFn<T>,
    pub(crate) buf_size: usize,
}

impl<T: Send + 'static> Source<T> {
    /// Wrap a producer into a source with an unbuffered downstream channel.
    pub fn new<P>(producer: P) -> Self
    where
        P: Produce<T>,
    {
        let producer = Arc::new(tokio::sync::Mutex::new(producer));
        let setup: SetupBox<T> = Box::new(move |env, buf| {
            let complete = CompleteSignal::new();
            // tokio's minimum capacity is one slot; the configured buffer
            // adds slots on top of it.
            let (tx, rx) = mpsc::channel(buf + 1);
            let out = SourceOutlet::new(
                Outlet::new(tx, env.ctx.token.clone()),
                complete.clone(),
            );
            let producer = Arc::clone(&producer);
            let ctx = Arc::clone(&env.ctx);
            let handle = env.tracker.spawn(async move {
                // Serialized with any previous incarnation: restarts await
                // the old task before re-invoking the setup.
                let mut producer = producer.lock().await;
                debug!(stream = %ctx.name, "source started");
                producer.produce(&ctx, &out).await;
                debug!(stream = %ctx.name, "source finished");
            });
            StageOutput {
                rx,
                complete,
                handle,
            }
        });
        Self {
            setup: Arc::new(Mutex::new(setup)),
            buf_size: 0,
        }
    }

    pub(crate) fn from_setup(setup: SetupBox<T>, buf_size: usize) -> Self {
        Self {
            setup: Arc::new(Mutex::new(setup)),
            buf_size,
        }
    }

    /// Set the buffer added to this source's downstream channel.
    pub fn with_buffer(mut self, buf_size: usize) -> Self {
        self.buf_size = buf_size;
        self
    }

    /// Append a flow, yielding a source that produces the flow's output.
    pub fn via<U: Send + 'static>(self, flow: Flow<T, U>) -> Source<U> {
        flow.apply(self)
    }

    /// Terminate with a sink, yielding a runnable stream.
    pub fn to<R: Send + 'static>(self, sink: Sink<T, R>) -> Stream<R> {
        Stream::connect(self, sink)
    }
}

/// A driver's connection to its upstream subtree.
///
/// Owns the receiving end of the upstream channel, the subtree's complete
/// trigger and join handle, and the setup needed to rebuild all of it for
/// `RestartUpstream`.
pub(crate) struct UpstreamLink<T> {
    setup: SetupFn<T>,
    buf_size: usize,
    pub(crate) rx: mpsc::Receiver<Item<T>>,
    complete: CompleteSignal,
    handle: JoinHandle<()>,
}

impl<T> UpstreamLink<T> {
    pub(crate) fn connect(source: &Source<T>, env: &StageEnv) -> Self {
        Self::from_setup(Arc::clone(&source.setup), source.buf_size, env)
    }

    pub(crate) fn from_setup(setup: SetupFn<T>, buf_size: usize, env: &StageEnv) -> Self {
        let output = {
            let mut invoke = setup.lock();
            (*invoke)(env, buf_size)
        };
        Self {
            setup,
            buf_size,
            rx: output.rx,
            complete: output.complete,
            handle: output.handle,
        }
    }

    /// Ask the subtree to stop producing. Idempotent.
    pub(crate) fn request_complete(&self) {
        self.complete.trigger();
    }

    /// Tear the subtree down and bring up a fresh incarnation: trigger its
    /// complete signal, drop our receiver so a blocked producer unblocks,
    /// wait for the subtree to exit, then re-invoke the setup.
    pub(crate) async fn restart(&mut self, env: &StageEnv) {
        self.complete.trigger();
        let (_stale_tx, stale_rx) = mpsc::channel(1);
        drop(std::mem::replace(&mut self.rx, stale_rx));
        let _ = (&mut self.handle).await;
        let output = {
            let mut invoke = self.setup.lock();
            (*invoke)(env, self.buf_size)
        };
        self.rx = output.rx;
        self.complete = output.complete;
        self.handle = output.handle;
        debug!(stream = %env.ctx.name, "upstream restarted");
    }

    /// Stop the subtree for good and wait until it has exited.
    pub(crate) async fn shutdown(self) {
        self.complete.trigger();
        drop(self.rx);
        let _ = self.handle.await;
    }
}
