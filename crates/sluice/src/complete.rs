//! The graceful-shutdown signal.
//!
//! A `CompleteSignal` is an idempotent one-shot broadcast: any number of
//! producers may trigger it, any number of observers may wait on it, and
//! only the first trigger has effect. Downstream stages use it to politely
//! ask their upstream to stop producing. It is deliberately distinct from
//! the stream's cancellation token: completing drains in-flight work,
//! cancelling aborts it.

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct CompleteSignal {
    token: CancellationToken,
}

impl CompleteSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request completion. Idempotent; every call after the first is a no-op.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Wait until the signal has been triggered.
    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }
}
