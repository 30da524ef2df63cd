//! Shared context threaded through every stage of a running stream.

use tokio_util::sync::CancellationToken;

/// Context shared across the stages of one stream run.
///
/// Carries the stream name (for logging) and the cancellation token that
/// every stage observes. Cancelling the token is the abrupt shutdown path;
/// graceful shutdown travels through [`crate::CompleteSignal`]s instead.
#[derive(Debug, Clone)]
pub struct StreamContext {
    /// Name of the stream, used in log output.
    pub name: String,
    /// The cancellation token for this run.
    pub token: CancellationToken,
}

impl StreamContext {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            name: "stream".to_string(),
            token,
        }
    }

    pub fn with_name(name: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            name: name.into(),
            token,
        }
    }
}
