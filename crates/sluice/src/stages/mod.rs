//! Ready-made sources, flows, and sinks.
//!
//! Everything here is built on the public stage traits; nothing uses
//! runtime internals a user could not reach. Constructors return plain
//! [`Source`](crate::Source), [`Flow`](crate::Flow), and
//! [`Sink`](crate::Sink) values that compose with `via`/`to`.

mod batch;
mod filter;
mod map;
mod parallel;
mod retry;
mod sinks;
mod sources;
mod throttle;

pub use batch::{batch, flat_map, flatten};
pub use filter::{cancel_if, complete_if, filter, take_while};
pub use map::{for_each, map, try_map};
pub use parallel::{flat_map_par, map_par};
pub use retry::retry;
pub use sinks::{cancel_if_sink, collect, complete_if_sink, for_each_sink, noop, reduce};
pub use sources::{from_channel, iter, poll, repeat, Poller};
pub use throttle::throttle;
