//! The wired pipeline and its lifecycle.
//!
//! `Idle → Running → Stopped`: the first [`Stream::run`] derives a child
//! cancellation token, mints the top-level complete signal, wires the
//! stages, and spawns the terminal forwarder; repeated calls while running
//! return the same terminal receiver and spawn nothing. [`Stream::cancel`]
//! aborts, [`Stream::drain`] completes gracefully, and
//! [`Stream::await_done`] blocks until every stage task has exited.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::complete::CompleteSignal;
use crate::context::StreamContext;
use crate::item::Outcome;
use crate::sink::Sink;
use crate::source::{Source, StageEnv};
use crate::StreamError;

type StartFn<R> = Box<dyn FnOnce(&StageEnv, CompleteSignal) -> crate::sink::SinkHandle<R> + Send>;

/// A fully wired pipeline, ready to run once.
pub struct Stream<R> {
    start: Option<StartFn<R>>,
    name: String,
    token: Option<CancellationToken>,
    complete: Option<CompleteSignal>,
    tracker: TaskTracker,
    running: Arc<AtomicBool>,
    terminal: Option<mpsc::Receiver<Outcome<R>>>,
}

impl<R: Send + 'static> Stream<R> {
    pub(crate) fn connect<I: Send + 'static>(source: Source<I>, sink: Sink<I, R>) -> Self {
        Self {
            start: Some(Box::new(move |env, own_complete| {
                sink.wire(source, env, own_complete)
            })),
            name: "stream".to_string(),
            token: None,
            complete: None,
            tracker: TaskTracker::new(),
            running: Arc::new(AtomicBool::new(false)),
            terminal: None,
        }
    }

    /// Name the stream for log output.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Start the pipeline under `parent` and return the terminal receiver.
    ///
    /// Exactly one [`Outcome`] arrives on the receiver, then it closes.
    /// Idempotent while running: repeat calls return the same receiver.
    pub fn run(&mut self, parent: &CancellationToken) -> &mut mpsc::Receiver<Outcome<R>> {
        if let Some(start) = self.start.take() {
            let token = parent.child_token();
            let complete = CompleteSignal::new();
            let ctx = Arc::new(StreamContext::with_name(self.name.clone(), token.clone()));
            let env = StageEnv {
                ctx,
                tracker: self.tracker.clone(),
            };

            debug!(stream = %self.name, "stream starting");
            let handle = start(&env, complete.clone());
            let crate::sink::SinkHandle {
                mut terminal,
                mut fallback,
            } = handle;

            let (tx, rx) = mpsc::channel(1);
            let running = Arc::clone(&self.running);
            running.store(true, Ordering::SeqCst);
            let forwarder_token = token.clone();
            let name = self.name.clone();
            self.tracker.spawn(async move {
                // The sink emits in every exit path, including cancellation,
                // so a closed channel without an item is a protocol anomaly
                // unless the run was cancelled outright.
                let outcome = match terminal.recv().await {
                    Some(outcome) => outcome,
                    None => {
                        let error = if forwarder_token.is_cancelled() {
                            StreamError::Cancelled
                        } else {
                            StreamError::ResultClosed
                        };
                        Outcome {
                            value: fallback(),
                            error: Some(error),
                        }
                    }
                };
                if tx.send(outcome).await.is_err() {
                    debug!(stream = %name, "terminal receiver dropped before delivery");
                }
                running.store(false, Ordering::SeqCst);
                debug!(stream = %name, "stream stopped");
            });

            self.token = Some(token);
            self.complete = Some(complete);
            self.terminal = Some(rx);
        }

        self.terminal.get_or_insert_with(|| {
            // Unreachable wiring-wise; yields an already-closed receiver.
            let (_tx, rx) = mpsc::channel(1);
            rx
        })
    }

    /// Abort the run. Non-blocking; a no-op before `run` or after the end.
    pub fn cancel(&self) {
        if let Some(token) = &self.token {
            debug!(stream = %self.name, "stream cancel requested");
            token.cancel();
        }
    }

    /// Ask the pipeline to finish gracefully. Non-blocking. The complete
    /// signal cascades bottom-up: the sink asks its upstream to complete,
    /// and so on until the source stops producing.
    pub fn drain(&self) {
        if let Some(complete) = &self.complete {
            debug!(stream = %self.name, "stream drain requested");
            complete.trigger();
        }
    }

    /// Wait until every stage task of this stream has exited.
    pub async fn await_done(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SourceOutlet;
    use crate::item::Item;
    use crate::sink::SinkHandler;
    use crate::source::Produce;
    use crate::stages::{collect, for_each, for_each_sink, iter, map, noop, repeat, throttle};
    use crate::test_utils::init_tracing;
    use crate::StreamAction;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    #[tokio::test]
    async fn terminal_delivers_exactly_one_outcome() {
        let token = CancellationToken::new();
        let mut stream = iter(vec![1, 2, 3]).to(collect());
        let rx = stream.run(&token);
        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.value, vec![1, 2, 3]);
        // The channel closes after the single delivery.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn run_is_idempotent_while_running() {
        struct CountingProducer {
            runs: Arc<AtomicU32>,
        }

        #[async_trait]
        impl Produce<i32> for CountingProducer {
            async fn produce(&mut self, _ctx: &StreamContext, out: &SourceOutlet<i32>) {
                self.runs.fetch_add(1, AtomicOrdering::SeqCst);
                let _ = out.value(1).await;
            }
        }

        let runs = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        let mut stream = Source::new(CountingProducer {
            runs: Arc::clone(&runs),
        })
        .to(collect());

        stream.run(&token);
        stream.run(&token);
        let outcome = stream.run(&token).recv().await.unwrap();
        assert_eq!(outcome.value, vec![1]);
        assert_eq!(runs.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn drain_finishes_an_infinite_stream() {
        init_tracing();
        let token = CancellationToken::new();
        let mut stream = repeat(1).to(noop());
        stream.run(&token);
        assert!(stream.is_running());

        tokio::time::sleep(Duration::from_millis(20)).await;
        // Repeated triggers behave like a single one.
        stream.drain();
        stream.drain();

        let outcome = stream.run(&token).recv().await.unwrap();
        assert!(outcome.error.is_none());

        tokio::time::timeout(Duration::from_secs(1), stream.await_done())
            .await
            .expect("stages did not wind down after drain");
        assert!(!stream.is_running());
    }

    #[tokio::test]
    async fn cancel_mid_stream_reports_cancellation() {
        let token = CancellationToken::new();
        let mut stream = repeat(1).via(map(|n: i32| n * 2)).to(noop());
        stream.run(&token);

        tokio::time::sleep(Duration::from_millis(10)).await;
        stream.cancel();

        let outcome = stream.run(&token).recv().await.unwrap();
        assert!(outcome.error.unwrap().is_cancelled());

        tokio::time::timeout(Duration::from_secs(1), stream.await_done())
            .await
            .expect("stages did not abort after cancel");
    }

    #[tokio::test]
    async fn cancel_before_run_still_delivers_an_outcome() {
        let token = CancellationToken::new();
        token.cancel();

        let mut stream = iter(vec![1, 2, 3]).to(collect());
        let outcome = stream.run(&token).recv().await.unwrap();
        assert!(outcome.error.unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn error_on_first_item_keeps_initial_accumulator() {
        struct ErrProducer;

        #[async_trait]
        impl Produce<i32> for ErrProducer {
            async fn produce(&mut self, _ctx: &StreamContext, out: &SourceOutlet<i32>) {
                let _ = out.error(StreamError::message("no data")).await;
            }
        }

        let mut stream = Source::new(ErrProducer).to(collect());
        let outcome = stream
            .run(&CancellationToken::new())
            .recv()
            .await
            .unwrap();
        assert!(outcome.value.is_empty());
        assert_eq!(outcome.error.unwrap().to_string(), "no data");
    }

    #[tokio::test]
    async fn flow_composition_is_associative() {
        let left = map(|n: i32| n + 1).via(map(|n: i32| n * 2)).via(map(|n: i32| n - 3));
        let right = map(|n: i32| n + 1).via(map(|n: i32| n * 2).via(map(|n: i32| n - 3)));

        let token = CancellationToken::new();
        let mut first = iter(vec![1, 2, 3]).via(left).to(collect());
        let mut second = iter(vec![1, 2, 3]).via(right).to(collect());

        let a = first.run(&token).recv().await.unwrap().value;
        let b = second.run(&token).recv().await.unwrap().value;
        assert_eq!(a, b);
        assert_eq!(a, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn prepended_flows_match_appended_flows() {
        let token = CancellationToken::new();
        let mut appended = iter(vec![1, 2, 3]).via(map(|n: i32| n * 2)).to(collect());
        let mut prepended = iter(vec![1, 2, 3]).to(map(|n: i32| n * 2).to_sink(collect()));

        let a = appended.run(&token).recv().await.unwrap().value;
        let b = prepended.run(&token).recv().await.unwrap().value;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn buffered_flow_bounds_in_flight_items() {
        let produced = Arc::new(AtomicUsize::new(0));
        let consumed = Arc::new(AtomicUsize::new(0));
        let produced_in = Arc::clone(&produced);
        let consumed_in = Arc::clone(&consumed);

        let token = CancellationToken::new();
        let mut stream = repeat(1u8)
            .via(for_each(move |_ctx, _v| {
                produced_in.fetch_add(1, AtomicOrdering::SeqCst);
            })
            .with_buffer(10))
            .via(throttle(1, Duration::from_millis(15)))
            .to(for_each_sink(move |_ctx, _v| {
                consumed_in.fetch_add(1, AtomicOrdering::SeqCst);
            }));
        stream.run(&token);

        tokio::time::sleep(Duration::from_millis(120)).await;
        let p = produced.load(AtomicOrdering::SeqCst);
        let c = consumed.load(AtomicOrdering::SeqCst);
        stream.cancel();
        stream.await_done().await;

        // The buffer fills up front, then production is paced by the sink:
        // the gap stays near buffer size + the slots the stages hold.
        let in_flight = p - c;
        assert!(in_flight >= 8, "buffer never filled: {in_flight}");
        assert!(in_flight <= 20, "backpressure leak: {in_flight}");
    }

    #[tokio::test]
    async fn sink_can_restart_its_upstream() {
        struct FlakyProducer {
            runs: Arc<AtomicU32>,
        }

        #[async_trait]
        impl Produce<i32> for FlakyProducer {
            async fn produce(&mut self, _ctx: &StreamContext, out: &SourceOutlet<i32>) {
                if self.runs.fetch_add(1, AtomicOrdering::SeqCst) == 0 {
                    let _ = out.error(StreamError::message("cold start")).await;
                    return;
                }
                let _ = out.value(42).await;
            }
        }

        struct RestartOnceSink {
            restarted: bool,
        }

        #[async_trait]
        impl SinkHandler<i32, Vec<i32>> for RestartOnceSink {
            async fn on_elem(
                &mut self,
                _ctx: &StreamContext,
                acc: &mut Outcome<Vec<i32>>,
                value: i32,
            ) -> StreamAction {
                acc.value.push(value);
                StreamAction::Proceed
            }

            async fn on_err(
                &mut self,
                _ctx: &StreamContext,
                acc: &mut Outcome<Vec<i32>>,
                err: StreamError,
            ) -> StreamAction {
                if self.restarted {
                    acc.error = Some(err);
                    return StreamAction::Stop;
                }
                self.restarted = true;
                StreamAction::RestartUpstream
            }
        }

        let runs = Arc::new(AtomicU32::new(0));
        let source = Source::new(FlakyProducer {
            runs: Arc::clone(&runs),
        });
        let sink = crate::Sink::new(Vec::new, RestartOnceSink { restarted: false });
        let mut stream = source.to(sink);

        let outcome = stream
            .run(&CancellationToken::new())
            .recv()
            .await
            .unwrap();
        assert!(outcome.error.is_none());
        assert_eq!(outcome.value, vec![42]);
        assert_eq!(runs.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn item_values_survive_a_value_error_mix() {
        struct MixedProducer;

        #[async_trait]
        impl Produce<i32> for MixedProducer {
            async fn produce(&mut self, _ctx: &StreamContext, out: &SourceOutlet<i32>) {
                for item in [
                    Item::Value(1),
                    Item::Error(StreamError::message("transient")),
                    Item::Value(2),
                ] {
                    if out.send(item).await.is_err() {
                        return;
                    }
                }
            }
        }

        // A sink that records errors without stopping.
        struct TolerantSink;

        #[async_trait]
        impl SinkHandler<i32, Vec<i32>> for TolerantSink {
            async fn on_elem(
                &mut self,
                _ctx: &StreamContext,
                acc: &mut Outcome<Vec<i32>>,
                value: i32,
            ) -> StreamAction {
                acc.value.push(value);
                StreamAction::Proceed
            }

            async fn on_err(
                &mut self,
                _ctx: &StreamContext,
                _acc: &mut Outcome<Vec<i32>>,
                _err: StreamError,
            ) -> StreamAction {
                StreamAction::Proceed
            }
        }

        let mut stream = Source::new(MixedProducer).to(crate::Sink::new(Vec::new, TolerantSink));
        let outcome = stream
            .run(&CancellationToken::new())
            .recv()
            .await
            .unwrap();
        assert!(outcome.error.is_none());
        assert_eq!(outcome.value, vec![1, 2]);
    }
}
