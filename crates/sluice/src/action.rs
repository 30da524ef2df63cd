//! The control protocol between stage handlers and the runtime.

/// Returned by stage handlers to direct the driver loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAction {
    /// Continue with the next upstream item.
    Proceed,
    /// Stop this stage: emit the accumulator (sinks), run the finaliser,
    /// signal upstream to complete, and close downstream cleanly.
    Stop,
    /// Cancel the stream context; every stage aborts.
    Cancel,
    /// Trigger the upstream complete signal and keep draining whatever is
    /// still in flight.
    Complete,
    /// Tear down the upstream subtree, wait for it to exit, and re-invoke
    /// its setup for a fresh input channel.
    RestartUpstream,
}
