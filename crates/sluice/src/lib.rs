//! # Sluice
//!
//! A typed streaming-dataflow runtime for building, composing, and executing
//! linear processing pipelines: a single source, zero or more flows, and a
//! single sink. Each stage runs as its own task, connected to its neighbour
//! by a bounded channel, so a fast producer is naturally paced by a slow
//! consumer.
//!
//! ## Features
//!
//! - Typed [`Item`] envelopes carrying a value or an error between stages
//! - Backpressure through bounded channels (unbuffered by default)
//! - Graceful drain and abrupt cancellation as separate shutdown paths
//! - A small control protocol ([`StreamAction`]) for per-item stage logic
//! - Upstream restart, used by [`stages::retry`] for error recovery
//! - A library of ready-made sources, flows, and sinks in [`stages`]
//!
//! ## Example
//!
//! ```no_run
//! use sluice::stages;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() {
//! let mut stream = stages::iter(vec![1, 2, 3, 4, 5])
//!     .via(stages::filter(|n: &i32| n % 2 == 0))
//!     .via(stages::map(|n: i32| n.to_string()))
//!     .to(stages::collect());
//!
//! let outcome = stream.run(&CancellationToken::new()).recv().await;
//! # }
//! ```

use thiserror::Error;

mod action;
mod channel;
mod complete;
mod context;
mod flow;
mod item;
mod retry;
mod sink;
mod source;
pub mod stages;
mod stream;

#[cfg(test)]
pub mod test_utils;

pub use action::StreamAction;
pub use channel::{Outlet, SendAbort, SourceOutlet};
pub use complete::CompleteSignal;
pub use context::StreamContext;
pub use flow::{Flow, FlowHandler};
pub use item::{Item, Outcome};
pub use retry::RetryConfig;
pub use sink::{Sink, SinkHandler};
pub use source::{Produce, Source};
pub use stream::Stream;

/// Common error type carried by [`Item::Error`] and recorded in the terminal
/// [`Outcome`].
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("operation was cancelled")]
    Cancelled,

    #[error("result channel closed unexpectedly")]
    ResultClosed,

    #[error("{0}")]
    Failed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StreamError {
    /// Wrap an arbitrary error as a stream failure.
    pub fn failed(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Failed(err.into())
    }

    /// Build a failure from a plain message.
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Failed(Box::new(std::io::Error::other(msg.into())))
    }

    /// Whether this error is the cancellation sentinel.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_error_displays_transparently() {
        let err = StreamError::message("boom");
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn cancelled_is_detectable() {
        assert!(StreamError::Cancelled.is_cancelled());
        assert!(!StreamError::message("x").is_cancelled());
    }
}
